//! FFmpeg-based media probing
//!
//! Uses ffprobe (command-line) to extract the technical attributes stored on
//! an asset: container, codecs, resolution, bitrate, duration, HDR type, and
//! per-track language tags.
//!
//! This approach is more reliable than Rust FFmpeg bindings as ffprobe's JSON
//! output format is stable and well-documented.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{VaultError, VaultResult};
use crate::services::quality::{normalize_video_codec, resolution_tier};

/// HDR classification derived from color metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdrType {
    Sdr,
    Hdr10,
    DolbyVision,
    Hlg,
}

impl HdrType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HdrType::Sdr => "SDR",
            HdrType::Hdr10 => "HDR10",
            HdrType::DolbyVision => "DolbyVision",
            HdrType::Hlg => "HLG",
        }
    }
}

impl std::fmt::Display for HdrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Technical metadata extracted from one media file
///
/// Field semantics match the asset columns the scanner writes.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub resolution_tier: Option<String>,
    pub bitrate_kbps: Option<i64>,
    pub framerate_fps: Option<f64>,
    pub duration_seconds: Option<f64>,
    /// Channel layout with one decimal place, e.g. "2.0", "5.1"
    pub audio_channels: Option<String>,
    pub audio_track_count: i64,
    pub subtitle_track_count: i64,
    /// Ordered, deduplicated ISO-639-1 codes where a mapping is known
    pub audio_languages: Vec<String>,
    pub subtitle_languages: Vec<String>,
    /// None when the HDR classification is unknown
    pub hdr_type: Option<HdrType>,
}

impl ProbeResult {
    /// First non-empty audio language, if any
    pub fn dominant_audio_language(&self) -> Option<String> {
        self.audio_languages.first().cloned()
    }

    /// Channel layout as a number for scoring, e.g. "5.1" -> 5.1
    pub fn audio_channels_value(&self) -> Option<f64> {
        self.audio_channels.as_deref().and_then(|s| s.parse().ok())
    }
}

/// FFprobe JSON output structures
mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub format: Option<Format>,
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub format_name: Option<String>,
        pub duration: Option<String>,
        pub bit_rate: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_name: Option<String>,
        pub codec_type: Option<String>,

        // Video specific
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub coded_width: Option<u32>,
        pub coded_height: Option<u32>,
        pub r_frame_rate: Option<String>,
        pub avg_frame_rate: Option<String>,
        pub color_transfer: Option<String>,
        pub color_primaries: Option<String>,

        // Audio specific
        pub channels: Option<u16>,

        // Common
        pub bit_rate: Option<String>,
        pub tags: Option<HashMap<String, String>>,

        // Side data for HDR detection
        pub side_data_list: Option<Vec<SideData>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct SideData {
        pub side_data_type: Option<String>,
    }
}

/// Media probing service backed by the ffprobe executable
#[derive(Debug, Clone)]
pub struct FfprobeService {
    ffprobe_path: String,
    timeout: Duration,
}

impl FfprobeService {
    pub fn new(timeout_seconds: u64) -> Self {
        Self {
            ffprobe_path: "ffprobe".to_string(),
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    /// Create with a custom ffprobe path
    pub fn with_ffprobe_path(mut self, ffprobe_path: String) -> Self {
        self.ffprobe_path = ffprobe_path;
        self
    }

    /// Probe a media file and extract its technical attributes
    pub async fn probe(&self, path: &Path) -> VaultResult<ProbeResult> {
        debug!(path = %path.display(), "Probing media file with ffprobe");

        if !path.exists() {
            return Err(VaultError::io(
                path.to_string_lossy(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        let child = Command::new(&self.ffprobe_path)
            .args(["-v", "error"])
            .args(["-print_format", "json"])
            .args(["-show_format", "-show_streams"])
            .arg(path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VaultError::probe(path.to_string_lossy(), format!("failed to spawn ffprobe: {}", e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                VaultError::probe(
                    path.to_string_lossy(),
                    format!("ffprobe timed out after {:?}", self.timeout),
                )
            })?
            .map_err(|e| VaultError::probe(path.to_string_lossy(), format!("ffprobe failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(VaultError::probe(
                path.to_string_lossy(),
                format!(
                    "exit code {}: {}",
                    exit_code,
                    if stderr.is_empty() {
                        "no error output"
                    } else {
                        stderr.trim()
                    }
                ),
            ));
        }

        let probe: ffprobe::FfprobeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| VaultError::probe(path.to_string_lossy(), format!("unparseable output: {}", e)))?;

        Ok(interpret_probe_output(probe))
    }
}

/// Fold the raw ffprobe document into a [`ProbeResult`]
fn interpret_probe_output(probe: ffprobe::FfprobeOutput) -> ProbeResult {
    let mut result = ProbeResult::default();

    let mut stream_bitrate_sum: i64 = 0;
    let mut saw_video = false;

    if let Some(streams) = &probe.streams {
        for stream in streams {
            if let Some(rate) = parse_number::<i64>(stream.bit_rate.as_deref()) {
                stream_bitrate_sum += rate;
            }

            match stream.codec_type.as_deref() {
                Some("video") => {
                    // Resolution, codec, and framerate come from the first video stream
                    if !saw_video {
                        saw_video = true;
                        result.video_codec = stream
                            .codec_name
                            .as_deref()
                            .map(normalize_video_codec);
                        result.width = stream.width.or(stream.coded_width).map(i64::from);
                        result.height = stream.height.or(stream.coded_height).map(i64::from);
                        result.resolution_tier =
                            result.height.map(|h| resolution_tier(h).to_string());
                        result.framerate_fps = stream
                            .avg_frame_rate
                            .as_deref()
                            .and_then(parse_frame_rate)
                            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));
                        result.hdr_type = detect_hdr_type(
                            stream.color_transfer.as_deref(),
                            stream.color_primaries.as_deref(),
                            stream.codec_name.as_deref().unwrap_or(""),
                            stream.side_data_list.as_ref(),
                        );
                    }
                }
                Some("audio") => {
                    result.audio_track_count += 1;
                    if result.audio_codec.is_none() {
                        result.audio_codec = stream.codec_name.clone();
                    }
                    if result.audio_channels.is_none() {
                        result.audio_channels =
                            stream.channels.map(|c| channel_layout(c).to_string());
                    }
                    if let Some(code) = stream_language(stream) {
                        push_unique(&mut result.audio_languages, code);
                    }
                }
                Some("subtitle") => {
                    result.subtitle_track_count += 1;
                    if let Some(code) = stream_language(stream) {
                        push_unique(&mut result.subtitle_languages, code);
                    }
                }
                _ => {}
            }
        }
    }

    if let Some(format) = &probe.format {
        result.container = format
            .format_name
            .as_deref()
            .map(normalize_container);
        result.duration_seconds = parse_number::<f64>(format.duration.as_deref());

        // Bitrate from the format layer, falling back to the sum of streams
        let format_bitrate = parse_number::<i64>(format.bit_rate.as_deref());
        result.bitrate_kbps = match format_bitrate {
            Some(bps) if bps > 0 => Some(bps / 1000),
            _ if stream_bitrate_sum > 0 => Some(stream_bitrate_sum / 1000),
            _ => None,
        };
    }

    result
}

fn parse_number<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

/// Parse an ffprobe rational like "24000/1001" or a plain "25"
fn parse_frame_rate(rate: &str) -> Option<f64> {
    if let Some((num, den)) = rate.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den == 0.0 || num == 0.0 {
            return None;
        }
        Some(num / den)
    } else {
        rate.parse().ok().filter(|v: &f64| *v > 0.0)
    }
}

/// Short container label from ffprobe's comma-separated format_name
fn normalize_container(format_name: &str) -> String {
    let first = format_name.split(',').next().unwrap_or(format_name);
    match first {
        "matroska" => "mkv".to_string(),
        "mov" => "mp4".to_string(),
        other => other.to_string(),
    }
}

/// Render a channel count as the conventional layout label
fn channel_layout(channels: u16) -> &'static str {
    match channels {
        0 | 1 => "1.0",
        2 => "2.0",
        3 => "2.1",
        4 => "4.0",
        5 => "5.0",
        6 => "5.1",
        7 => "6.1",
        _ => "7.1",
    }
}

fn stream_language(stream: &ffprobe::Stream) -> Option<String> {
    let tags = stream.tags.as_ref()?;
    let raw = tags.get("language").or_else(|| tags.get("LANGUAGE"))?;
    normalize_language(raw)
}

/// Normalize a stream language tag to ISO-639-1 where a mapping is known
///
/// Unmapped three-letter codes pass through lowercased; "und" is dropped.
pub fn normalize_language(code: &str) -> Option<String> {
    let lower = code.trim().to_lowercase();
    if lower.is_empty() || lower == "und" {
        return None;
    }

    let mapped = match lower.as_str() {
        "eng" => "en",
        "ger" | "deu" => "de",
        "fre" | "fra" => "fr",
        "spa" => "es",
        "ita" => "it",
        "jpn" => "ja",
        "kor" => "ko",
        "chi" | "zho" => "zh",
        "rus" => "ru",
        "por" => "pt",
        "dut" | "nld" => "nl",
        "swe" => "sv",
        "nor" => "no",
        "dan" => "da",
        "fin" => "fi",
        "pol" => "pl",
        "cze" | "ces" => "cs",
        "hun" => "hu",
        "gre" | "ell" => "el",
        "ara" => "ar",
        "heb" => "he",
        "hin" => "hi",
        "tur" => "tr",
        "tha" => "th",
        "vie" => "vi",
        "ukr" => "uk",
        "rum" | "ron" => "ro",
        other => other,
    };

    Some(mapped.to_string())
}

/// English in either normalized or raw tag form
pub fn is_english(code: &str) -> bool {
    matches!(code.to_lowercase().as_str(), "en" | "eng")
}

fn push_unique(list: &mut Vec<String>, code: String) {
    if !list.contains(&code) {
        list.push(code);
    }
}

/// Detect HDR type from color metadata and side data
fn detect_hdr_type(
    color_transfer: Option<&str>,
    color_primaries: Option<&str>,
    codec_name: &str,
    side_data: Option<&Vec<ffprobe::SideData>>,
) -> Option<HdrType> {
    // Dolby Vision shows up in the codec name or side data
    if codec_name.contains("dvhe") || codec_name.contains("dvh1") {
        return Some(HdrType::DolbyVision);
    }

    if let Some(side_data_list) = side_data {
        for sd in side_data_list {
            if let Some(ref sd_type) = sd.side_data_type {
                if sd_type.contains("Dolby Vision") {
                    return Some(HdrType::DolbyVision);
                }
                if sd_type.contains("HDR10+") || sd_type.contains("HDR10 Plus") {
                    return Some(HdrType::Hdr10);
                }
            }
        }
    }

    match color_transfer {
        Some(transfer) if transfer.contains("smpte2084") => Some(HdrType::Hdr10),
        Some(transfer) if transfer.contains("arib-std-b67") => Some(HdrType::Hlg),
        Some(transfer) if transfer.contains("bt709") || transfer.contains("smpte170m") => {
            Some(HdrType::Sdr)
        }
        _ => {
            // BT.709 primaries without a transfer tag still reads as SDR
            match color_primaries {
                Some(primaries) if primaries.contains("bt709") => Some(HdrType::Sdr),
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_fixture(json: &str) -> ProbeResult {
        let probe: ffprobe::FfprobeOutput = serde_json::from_str(json).unwrap();
        interpret_probe_output(probe)
    }

    #[test]
    fn test_interpret_full_document() {
        let result = parse_fixture(
            r#"{
                "format": {"format_name": "matroska,webm", "duration": "5400.25", "bit_rate": "8000000"},
                "streams": [
                    {"codec_type": "video", "codec_name": "hevc", "width": 1920, "height": 1080,
                     "avg_frame_rate": "24000/1001", "color_transfer": "smpte2084", "color_primaries": "bt2020"},
                    {"codec_type": "audio", "codec_name": "eac3", "channels": 6, "tags": {"language": "eng"}},
                    {"codec_type": "audio", "codec_name": "aac", "channels": 2, "tags": {"language": "ger"}},
                    {"codec_type": "subtitle", "codec_name": "subrip", "tags": {"language": "eng"}}
                ]
            }"#,
        );

        assert_eq!(result.container.as_deref(), Some("mkv"));
        assert_eq!(result.video_codec.as_deref(), Some("hevc"));
        assert_eq!(result.width, Some(1920));
        assert_eq!(result.height, Some(1080));
        assert_eq!(result.resolution_tier.as_deref(), Some("1080p"));
        assert_eq!(result.bitrate_kbps, Some(8000));
        assert_eq!(result.duration_seconds, Some(5400.25));
        assert_eq!(result.audio_track_count, 2);
        assert_eq!(result.subtitle_track_count, 1);
        assert_eq!(result.audio_channels.as_deref(), Some("5.1"));
        assert_eq!(result.audio_languages, vec!["en", "de"]);
        assert_eq!(result.subtitle_languages, vec!["en"]);
        assert_eq!(result.dominant_audio_language().as_deref(), Some("en"));
        assert_eq!(result.hdr_type, Some(HdrType::Hdr10));
        let fps = result.framerate_fps.unwrap();
        assert!((fps - 23.976).abs() < 0.001);
    }

    #[test]
    fn test_bitrate_falls_back_to_stream_sum() {
        let result = parse_fixture(
            r#"{
                "format": {"format_name": "mp4"},
                "streams": [
                    {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720, "bit_rate": "4000000"},
                    {"codec_type": "audio", "codec_name": "aac", "channels": 2, "bit_rate": "128000"}
                ]
            }"#,
        );
        assert_eq!(result.bitrate_kbps, Some(4128));
    }

    #[test]
    fn test_missing_streams_yields_empty_result() {
        let result = parse_fixture(r#"{"format": {"format_name": "mp4"}}"#);
        assert_eq!(result.container.as_deref(), Some("mp4"));
        assert!(result.video_codec.is_none());
        assert_eq!(result.audio_track_count, 0);
        assert!(result.bitrate_kbps.is_none());
    }

    #[test]
    fn test_duplicate_languages_kept_once_in_order() {
        let result = parse_fixture(
            r#"{
                "format": {"format_name": "matroska"},
                "streams": [
                    {"codec_type": "audio", "codec_name": "ac3", "channels": 6, "tags": {"language": "ger"}},
                    {"codec_type": "audio", "codec_name": "aac", "channels": 2, "tags": {"language": "eng"}},
                    {"codec_type": "audio", "codec_name": "aac", "channels": 2, "tags": {"language": "eng"}}
                ]
            }"#,
        );
        assert_eq!(result.audio_languages, vec!["de", "en"]);
        assert_eq!(result.dominant_audio_language().as_deref(), Some("de"));
    }

    #[test]
    fn test_und_language_dropped() {
        let result = parse_fixture(
            r#"{
                "format": {"format_name": "mp4"},
                "streams": [
                    {"codec_type": "audio", "codec_name": "aac", "channels": 2, "tags": {"language": "und"}}
                ]
            }"#,
        );
        assert!(result.audio_languages.is_empty());
        assert!(result.dominant_audio_language().is_none());
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("30"), Some(30.0));
        assert!(parse_frame_rate("0/0").is_none());
        let ntsc = parse_frame_rate("24000/1001").unwrap();
        assert!((ntsc - 23.976).abs() < 0.001);
    }

    #[test]
    fn test_channel_layout() {
        assert_eq!(channel_layout(1), "1.0");
        assert_eq!(channel_layout(2), "2.0");
        assert_eq!(channel_layout(6), "5.1");
        assert_eq!(channel_layout(8), "7.1");
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("eng").as_deref(), Some("en"));
        assert_eq!(normalize_language("deu").as_deref(), Some("de"));
        assert_eq!(normalize_language("EN").as_deref(), Some("en"));
        assert_eq!(normalize_language("und"), None);
        assert_eq!(normalize_language("").as_deref(), None);
        // Unmapped codes pass through lowercased
        assert_eq!(normalize_language("YOR").as_deref(), Some("yor"));
    }

    #[test]
    fn test_detect_hdr_type() {
        assert_eq!(
            detect_hdr_type(Some("smpte2084"), Some("bt2020"), "hevc", None),
            Some(HdrType::Hdr10)
        );
        assert_eq!(
            detect_hdr_type(Some("arib-std-b67"), Some("bt2020"), "hevc", None),
            Some(HdrType::Hlg)
        );
        assert_eq!(
            detect_hdr_type(None, None, "dvhe", None),
            Some(HdrType::DolbyVision)
        );
        assert_eq!(
            detect_hdr_type(Some("bt709"), Some("bt709"), "h264", None),
            Some(HdrType::Sdr)
        );
        assert_eq!(detect_hdr_type(None, None, "h264", None), None);
    }

    #[test]
    fn test_hdr_type_labels() {
        assert_eq!(HdrType::Hdr10.as_str(), "HDR10");
        assert_eq!(HdrType::DolbyVision.as_str(), "DolbyVision");
        assert_eq!(HdrType::Hlg.as_str(), "HLG");
        assert_eq!(HdrType::Sdr.as_str(), "SDR");
    }

    #[tokio::test]
    async fn test_probe_missing_file_is_io_error() {
        let service = FfprobeService::new(5);
        let err = service.probe(Path::new("/no/such/file.mkv")).await.unwrap_err();
        assert!(matches!(err, VaultError::Io { .. }));
    }
}
