//! Quality scoring
//!
//! Deterministic scoring of probed technical metadata onto a 0-200 scale.
//! Used by the scanner when upserting assets and by the duplicate engine to
//! rank group members. Missing inputs contribute 0 to their component.

/// Inputs to the scorer, already normalized by the probe/parser layers
#[derive(Debug, Clone, Default)]
pub struct QualitySignals {
    /// Video height in pixels
    pub height: Option<i64>,
    /// Video codec name, any casing
    pub video_codec: Option<String>,
    /// Overall bitrate in kbps
    pub bitrate_kbps: Option<i64>,
    /// Channel layout as a number, e.g. 2.0, 5.1
    pub audio_channels: Option<f64>,
    pub audio_track_count: i64,
    pub subtitle_track_count: i64,
    /// One of SDR | HDR10 | DolbyVision | HLG
    pub hdr_type: Option<String>,
}

/// Compute the quality score, clamped to [0, 200]
pub fn quality_score(signals: &QualitySignals) -> i64 {
    let mut score = 0.0f64;

    score += resolution_points(signals.height) as f64;
    score += codec_points(signals.video_codec.as_deref()) as f64;
    score += bitrate_points(signals.bitrate_kbps, signals.height);
    score += channel_points(signals.audio_channels) as f64;
    score += multi_audio_points(signals.audio_track_count) as f64;
    score += subtitle_points(signals.subtitle_track_count) as f64;
    score += hdr_points(signals.hdr_type.as_deref()) as f64;

    (score.round() as i64).clamp(0, 200)
}

/// Discrete resolution label derived from pixel height
pub fn resolution_tier(height: i64) -> &'static str {
    if height >= 2160 {
        "2160p"
    } else if height >= 1080 {
        "1080p"
    } else if height >= 720 {
        "720p"
    } else if height >= 480 {
        "480p"
    } else {
        "SD"
    }
}

/// Normalize a video codec name to a short lowercase label
///
/// Handles release-name spellings ("x265", "H.264") and ffprobe codec names
/// alike.
pub fn normalize_video_codec(codec: &str) -> String {
    let compact: String = codec
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    match compact.as_str() {
        "h264" | "x264" | "avc" | "avc1" => "h264".to_string(),
        "h265" | "x265" | "hevc" => "hevc".to_string(),
        "av1" | "av01" => "av1".to_string(),
        "vp9" => "vp9".to_string(),
        other => other.to_string(),
    }
}

fn resolution_points(height: Option<i64>) -> i64 {
    let Some(height) = height else { return 0 };
    if height >= 2160 {
        100
    } else if height >= 1080 {
        75
    } else if height >= 720 {
        50
    } else if height >= 480 {
        25
    } else {
        10
    }
}

fn codec_points(codec: Option<&str>) -> i64 {
    let Some(codec) = codec else { return 0 };
    match normalize_video_codec(codec).as_str() {
        "av1" => 22,
        "hevc" => 20,
        "vp9" => 18,
        "h264" => 15,
        _ => 5,
    }
}

/// Ideal bitrate for a resolution tier, in kbps
fn ideal_bitrate_kbps(height: Option<i64>) -> f64 {
    match resolution_tier(height.unwrap_or(0)) {
        "2160p" => 50_000.0,
        "1080p" => 10_000.0,
        "720p" => 5_000.0,
        "480p" => 2_000.0,
        _ => 1_000.0,
    }
}

fn bitrate_points(bitrate_kbps: Option<i64>, height: Option<i64>) -> f64 {
    let Some(bitrate) = bitrate_kbps else { return 0.0 };
    if bitrate <= 0 {
        return 0.0;
    }
    let ratio = (bitrate as f64 / ideal_bitrate_kbps(height)).min(1.0);
    ratio * 30.0
}

fn channel_points(channels: Option<f64>) -> i64 {
    let Some(channels) = channels else { return 0 };
    if channels >= 5.0 {
        15
    } else if channels >= 2.0 {
        10
    } else {
        5
    }
}

fn multi_audio_points(track_count: i64) -> i64 {
    ((track_count - 1) * 3).clamp(0, 10)
}

fn subtitle_points(track_count: i64) -> i64 {
    (track_count * 2).clamp(0, 10)
}

fn hdr_points(hdr_type: Option<&str>) -> i64 {
    match hdr_type {
        Some("HDR10") | Some("DolbyVision") | Some("HLG") => 15,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals_1080p_h264() -> QualitySignals {
        QualitySignals {
            height: Some(1080),
            video_codec: Some("h264".to_string()),
            bitrate_kbps: Some(5000),
            audio_channels: Some(2.0),
            audio_track_count: 1,
            subtitle_track_count: 0,
            hdr_type: None,
        }
    }

    // =========================================================================
    // Component Tests
    // =========================================================================

    #[test]
    fn test_resolution_points_bands() {
        assert_eq!(resolution_points(Some(2160)), 100);
        assert_eq!(resolution_points(Some(1080)), 75);
        assert_eq!(resolution_points(Some(720)), 50);
        assert_eq!(resolution_points(Some(480)), 25);
        assert_eq!(resolution_points(Some(360)), 10);
        assert_eq!(resolution_points(None), 0);
    }

    #[test]
    fn test_codec_points_ordering() {
        assert_eq!(codec_points(Some("av1")), 22);
        assert_eq!(codec_points(Some("hevc")), 20);
        assert_eq!(codec_points(Some("vp9")), 18);
        assert_eq!(codec_points(Some("h264")), 15);
        assert_eq!(codec_points(Some("mpeg2video")), 5);
        assert_eq!(codec_points(None), 0);
    }

    #[test]
    fn test_codec_points_accepts_release_spellings() {
        assert_eq!(codec_points(Some("x265")), 20);
        assert_eq!(codec_points(Some("H.264")), 15);
        assert_eq!(codec_points(Some("HEVC")), 20);
    }

    #[test]
    fn test_bitrate_points_capped_at_ideal() {
        // 1080p ideal is 10000 kbps; at or above the ideal the component maxes out
        assert_eq!(bitrate_points(Some(10_000), Some(1080)), 30.0);
        assert_eq!(bitrate_points(Some(50_000), Some(1080)), 30.0);
        // Half the ideal earns half the component
        assert_eq!(bitrate_points(Some(5_000), Some(1080)), 15.0);
        assert_eq!(bitrate_points(None, Some(1080)), 0.0);
    }

    #[test]
    fn test_bitrate_ideal_follows_tier() {
        assert_eq!(ideal_bitrate_kbps(Some(2160)), 50_000.0);
        assert_eq!(ideal_bitrate_kbps(Some(1080)), 10_000.0);
        assert_eq!(ideal_bitrate_kbps(Some(720)), 5_000.0);
        assert_eq!(ideal_bitrate_kbps(Some(480)), 2_000.0);
        assert_eq!(ideal_bitrate_kbps(Some(240)), 1_000.0);
        assert_eq!(ideal_bitrate_kbps(None), 1_000.0);
    }

    #[test]
    fn test_channel_points_bands() {
        assert_eq!(channel_points(Some(7.1)), 15);
        assert_eq!(channel_points(Some(5.1)), 15);
        assert_eq!(channel_points(Some(2.0)), 10);
        assert_eq!(channel_points(Some(1.0)), 5);
        assert_eq!(channel_points(None), 0);
    }

    #[test]
    fn test_multi_audio_points_capped() {
        assert_eq!(multi_audio_points(0), 0);
        assert_eq!(multi_audio_points(1), 0);
        assert_eq!(multi_audio_points(2), 3);
        assert_eq!(multi_audio_points(4), 9);
        assert_eq!(multi_audio_points(5), 10);
        assert_eq!(multi_audio_points(20), 10);
    }

    #[test]
    fn test_subtitle_points_capped() {
        assert_eq!(subtitle_points(0), 0);
        assert_eq!(subtitle_points(3), 6);
        assert_eq!(subtitle_points(5), 10);
        assert_eq!(subtitle_points(12), 10);
    }

    #[test]
    fn test_hdr_points() {
        assert_eq!(hdr_points(Some("HDR10")), 15);
        assert_eq!(hdr_points(Some("DolbyVision")), 15);
        assert_eq!(hdr_points(Some("HLG")), 15);
        assert_eq!(hdr_points(Some("SDR")), 0);
        assert_eq!(hdr_points(None), 0);
    }

    // =========================================================================
    // Full Score Tests
    // =========================================================================

    #[test]
    fn test_score_1080p_h264_stereo() {
        // 75 res + 15 codec + 15 bitrate (5000/10000 * 30) + 10 channels + 0 + 0 + 0
        let score = quality_score(&signals_1080p_h264());
        assert_eq!(score, 115);
    }

    #[test]
    fn test_score_4k_hdr_reference() {
        let signals = QualitySignals {
            height: Some(2160),
            video_codec: Some("hevc".to_string()),
            bitrate_kbps: Some(50_000),
            audio_channels: Some(7.1),
            audio_track_count: 3,
            subtitle_track_count: 5,
            hdr_type: Some("DolbyVision".to_string()),
        };
        // 100 + 20 + 30 + 15 + 6 + 10 + 15
        assert_eq!(quality_score(&signals), 196);
    }

    #[test]
    fn test_score_never_exceeds_bounds() {
        let maxed = QualitySignals {
            height: Some(4320),
            video_codec: Some("av1".to_string()),
            bitrate_kbps: Some(1_000_000),
            audio_channels: Some(9.1),
            audio_track_count: 50,
            subtitle_track_count: 50,
            hdr_type: Some("HDR10".to_string()),
        };
        let score = quality_score(&maxed);
        assert!((0..=200).contains(&score));

        assert_eq!(quality_score(&QualitySignals::default()), 0);
    }

    #[test]
    fn test_score_is_deterministic() {
        let signals = signals_1080p_h264();
        assert_eq!(quality_score(&signals), quality_score(&signals));
    }

    #[test]
    fn test_missing_inputs_contribute_zero() {
        let only_height = QualitySignals {
            height: Some(720),
            ..Default::default()
        };
        assert_eq!(quality_score(&only_height), 50);
    }

    // =========================================================================
    // Resolution Tier Tests
    // =========================================================================

    #[test]
    fn test_resolution_tier_bands() {
        assert_eq!(resolution_tier(2160), "2160p");
        assert_eq!(resolution_tier(1080), "1080p");
        assert_eq!(resolution_tier(720), "720p");
        assert_eq!(resolution_tier(480), "480p");
        assert_eq!(resolution_tier(360), "SD");
    }

    #[test]
    fn test_resolution_tier_edge_cases() {
        assert_eq!(resolution_tier(2159), "1080p");
        assert_eq!(resolution_tier(1079), "720p");
        assert_eq!(resolution_tier(719), "480p");
        assert_eq!(resolution_tier(479), "SD");
    }

    #[test]
    fn test_normalize_video_codec() {
        assert_eq!(normalize_video_codec("H.264"), "h264");
        assert_eq!(normalize_video_codec("x265"), "hevc");
        assert_eq!(normalize_video_codec("AV1"), "av1");
        assert_eq!(normalize_video_codec("VP9"), "vp9");
        assert_eq!(normalize_video_codec("mpeg2video"), "mpeg2video");
    }
}
