//! Filename parser for scene-style release names
//!
//! Extracts the identity fields the duplicate engine groups on:
//! - "Red.Dwarf.S01E01.1080p.WEB.h264-GROUP" -> tv, season 1, episode 1
//! - "The.Matrix.1999.1080p.BluRay.x264-GROUP" -> movie, year 1999
//!
//! Parsing is deterministic and total: any input produces a result, falling
//! back to an unknown kind with a best-effort title.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// Lazy-initialized regex patterns (compiled once, reused across calls)
// ============================================================================

/// Pattern for S01E01 format (most common), tolerating multi-episode suffixes
static SXXEXX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(.+?)\s*[Ss](\d{1,2})[Ee](\d{1,3})(?:[-\s]?[Ee]\d{1,3})?").unwrap()
});

/// Pattern for 1x01 format (also handles 1x1, 01x01, 01x1)
static NXNN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(.+?)\s*(\d{1,2})x(\d{1,2})").unwrap());

/// Pattern for "Season X Episode Y" format
static VERBOSE_SEASON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(.+?)\s*Season\s*(\d+).*?Episode\s*(\d+)").unwrap());

/// Pattern for movie title + year: "Title (1999)", "Title.1999", "Title 1999"
static MOVIE_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(.+?)[\s\(\[\.]+((?:19|20)\d{2})(?:[\s\)\]\.]|$)").unwrap());

/// Pattern for standalone year extraction
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap());

/// Pattern for release group extraction (after the final dash)
static GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-([A-Za-z0-9]+)\s*$").unwrap());

/// Pattern for quality boundary in unparseable titles
static QUALITY_BOUNDARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+(2160p|1080p|960p|720p|576p|480p|4K|UHD|HDR|BluRay|WEB|HDTV|DVDRip|BRRip)")
        .unwrap()
});

/// Pattern for trailing year cleanup
static TRAILING_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(19\d{2}|20\d{2})\s*$").unwrap());

/// Pattern for trailing parentheses/brackets cleanup
static TRAILING_PAREN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[\(\[][^\)\]]*[\)\]]\s*$").unwrap());

/// Pattern for multiple spaces cleanup
static MULTI_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Kind of media a filename appears to describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Movie,
    Tv,
    Other,
    Unknown,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
            MediaKind::Other => "other",
            MediaKind::Unknown => "unknown",
        }
    }

    #[allow(dead_code)]
    pub fn from_str(s: &str) -> Self {
        match s {
            "movie" => MediaKind::Movie,
            "tv" => MediaKind::Tv,
            "other" => MediaKind::Other,
            _ => MediaKind::Unknown,
        }
    }

    /// Subdirectory name inside a staging root
    pub fn staging_subdir(kind: &str) -> &'static str {
        match kind {
            "movie" => "movies",
            "tv" => "tv",
            "documentary" => "documentaries",
            _ => "other",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity fields extracted from a filename
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedMedia {
    pub title: Option<String>,
    pub year: Option<i64>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub release_group: Option<String>,
    pub kind: String,
}

/// Parse a filename into identity fields
pub fn parse_media(filename: &str) -> ParsedMedia {
    let stem = strip_extension(filename);
    let cleaned = stem.replace(['.', '_'], " ");

    let mut result = ParsedMedia {
        kind: MediaKind::Unknown.as_str().to_string(),
        ..Default::default()
    };

    // TV patterns first, most specific to least
    if let Some(caps) = SXXEXX_RE.captures(&cleaned) {
        result.kind = MediaKind::Tv.as_str().to_string();
        result.title = Some(clean_title(caps.get(1).unwrap().as_str()));
        result.season = caps.get(2).and_then(|m| m.as_str().parse().ok());
        result.episode = caps.get(3).and_then(|m| m.as_str().parse().ok());
    } else if let Some(caps) = NXNN_RE.captures(&cleaned) {
        result.kind = MediaKind::Tv.as_str().to_string();
        result.title = Some(clean_title(caps.get(1).unwrap().as_str()));
        result.season = caps.get(2).and_then(|m| m.as_str().parse().ok());
        result.episode = caps.get(3).and_then(|m| m.as_str().parse().ok());
    } else if let Some(caps) = VERBOSE_SEASON_RE.captures(&cleaned) {
        result.kind = MediaKind::Tv.as_str().to_string();
        result.title = Some(clean_title(caps.get(1).unwrap().as_str()));
        result.season = caps.get(2).and_then(|m| m.as_str().parse().ok());
        result.episode = caps.get(3).and_then(|m| m.as_str().parse().ok());
    } else if let Some(caps) = MOVIE_YEAR_RE.captures(&cleaned) {
        result.kind = MediaKind::Movie.as_str().to_string();
        result.title = Some(clean_title(caps.get(1).unwrap().as_str()));
        result.year = caps.get(2).and_then(|m| m.as_str().parse().ok());
    } else if let Some(mat) = QUALITY_BOUNDARY_RE.find(&cleaned) {
        // Quality markers without a year: treat as a movie with unknown year
        result.kind = MediaKind::Movie.as_str().to_string();
        result.title = Some(clean_title(&cleaned[..mat.start()]));
    } else {
        result.title = Some(clean_title(&cleaned)).filter(|t| !t.is_empty());
    }

    // Year for disambiguation (TV filenames often carry the premiere year)
    if result.year.is_none() {
        if let Some(caps) = YEAR_RE.captures(&cleaned) {
            result.year = caps.get(1).and_then(|m| m.as_str().parse().ok());
        }
    }

    // Release group (after the last dash of the stem)
    if let Some(caps) = GROUP_RE.captures(stem) {
        result.release_group = Some(caps.get(1).unwrap().as_str().to_string());
    }

    result
}

/// Remove the final extension, if it looks like one
fn strip_extension(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            stem
        }
        _ => filename,
    }
}

/// Clean up a raw title capture
fn clean_title(name: &str) -> String {
    let mut cleaned = name.trim().to_string();

    // Remove trailing year (extracted separately)
    cleaned = TRAILING_YEAR_RE.replace(&cleaned, "").to_string();

    // Remove trailing parenthetical/bracketed chunks
    cleaned = TRAILING_PAREN_RE.replace(&cleaned, "").to_string();

    // Collapse whitespace
    cleaned = MULTI_SPACE_RE.replace_all(&cleaned, " ").to_string();

    cleaned.trim().trim_end_matches('-').trim().to_string()
}

/// Canonical form of a title for fingerprints and similarity
///
/// Lowercases, strips leading articles, replaces punctuation with spaces,
/// and collapses whitespace.
pub fn canonicalize_title(title: &str) -> String {
    let mut normalized = title.to_lowercase();

    for article in ["the ", "a ", "an "] {
        if normalized.starts_with(article) {
            normalized = normalized[article.len()..].to_string();
            break;
        }
    }

    let cleaned: String = normalized
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Token-sort similarity between two titles, in [0, 100]
///
/// Both titles are canonicalized and their tokens sorted before comparison,
/// so word order does not matter. A second pass compares the titles with
/// spaces removed, so "redwarf" still matches "Red Dwarf". Total: any pair
/// of inputs yields a value.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    use rapidfuzz::distance::levenshtein;

    let sorted_a = sorted_tokens(a);
    let sorted_b = sorted_tokens(b);

    if sorted_a.is_empty() && sorted_b.is_empty() {
        return 100.0;
    }

    let token_sort = levenshtein::normalized_similarity(sorted_a.chars(), sorted_b.chars());

    // Compare in original token order with spaces removed
    let compact_a: String = canonicalize_title(a).split_whitespace().collect();
    let compact_b: String = canonicalize_title(b).split_whitespace().collect();
    let compact = levenshtein::normalized_similarity(compact_a.chars(), compact_b.chars());

    token_sort.max(compact) * 100.0
}

fn sorted_tokens(title: &str) -> String {
    let canonical = canonicalize_title(title);
    let mut tokens: Vec<&str> = canonical.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}
