//! Duplicate detection engine
//!
//! Rebuilds the duplicate-group tables from the live asset set in two
//! passes: exact (shared content fingerprint) and fuzzy (parsed identity
//! with title similarity). Members are ranked by quality and annotated with
//! a per-member recommendation shaped by the English-audio guardrails.
//!
//! A rebuild is destructive toward the group tables but preserves review
//! state on groups that reappear. Concurrent rebuilds are refused.

use std::collections::{BTreeMap, HashSet};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::db::{
    Database, MediaAssetRecord, NewDuplicateMember, UpsertDuplicateGroup,
};
use crate::error::{VaultError, VaultResult};
use crate::services::ffmpeg::is_english;
use crate::services::filename_parser::{canonicalize_title, title_similarity};

/// Quality-delta band above which a lower-quality member is staged outright
const STAGE_DELTA: i64 = 50;

/// Quality-delta band below which human judgment is always required
const REVIEW_DELTA: i64 = 20;

/// Stricter title bar for movie pairs where both years are absent
const YEARLESS_MOVIE_SIMILARITY: f64 = 95.0;

/// Summary of one rebuild
#[derive(Debug, Clone, Default)]
pub struct RebuildReport {
    pub groups_total: usize,
    pub exact_groups: usize,
    pub fuzzy_groups: usize,
    pub groups_removed: u64,
    pub members_total: usize,
}

/// The slice of an asset the grouping logic needs
#[derive(Debug, Clone)]
pub struct GroupingAsset {
    pub id: i64,
    pub logical_path: String,
    pub size_bytes: i64,
    pub quality_score: i64,
    pub content_fingerprint: Option<String>,
    pub parsed_title: Option<String>,
    pub parsed_year: Option<i64>,
    pub parsed_season: Option<i64>,
    pub parsed_episode: Option<i64>,
    pub media_kind: String,
    pub audio_languages: Vec<String>,
    pub subtitle_languages: Vec<String>,
    pub dominant_audio_language: Option<String>,
}

impl From<&MediaAssetRecord> for GroupingAsset {
    fn from(record: &MediaAssetRecord) -> Self {
        Self {
            id: record.id,
            logical_path: record.logical_path.clone(),
            size_bytes: record.size_bytes,
            quality_score: record.quality_score,
            content_fingerprint: record.content_fingerprint.clone(),
            parsed_title: record.parsed_title.clone(),
            parsed_year: record.parsed_year,
            parsed_season: record.parsed_season,
            parsed_episode: record.parsed_episode,
            media_kind: record.media_kind.clone(),
            audio_languages: record.audio_language_list(),
            subtitle_languages: record.subtitle_language_list(),
            dominant_audio_language: record.dominant_audio_language.clone(),
        }
    }
}

/// One planned group with ranked, annotated members
#[derive(Debug, Clone)]
pub struct GroupPlan {
    pub fingerprint: String,
    pub kind: &'static str,
    pub confidence: f64,
    pub title: Option<String>,
    pub year: Option<i64>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub media_kind: String,
    pub recommended_action: String,
    pub action_reason: Option<String>,
    pub members: Vec<PlannedMember>,
}

/// One ranked member with its recommendation
#[derive(Debug, Clone)]
pub struct PlannedMember {
    pub asset_id: i64,
    pub rank: i64,
    pub recommended_action: String,
    pub action_reason: String,
}

/// Verdict of the English-audio guardrails for staging `member` below `best`
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailVerdict {
    /// Staging is permitted
    Pass,
    /// Staging would remove the only English audio track
    Blocked { reason: String },
}

/// Duplicate engine over the catalog
pub struct DuplicateEngine {
    db: Database,
    threshold: std::sync::RwLock<f64>,
    rebuild_lock: Mutex<()>,
}

impl DuplicateEngine {
    pub fn new(db: Database, similarity_threshold: f64) -> Self {
        Self {
            db,
            threshold: std::sync::RwLock::new(similarity_threshold),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Current fuzzy similarity threshold
    pub fn similarity_threshold(&self) -> f64 {
        *self.threshold.read().expect("threshold lock poisoned")
    }

    /// Adjust the fuzzy similarity threshold at runtime
    pub fn set_similarity_threshold(&self, threshold: f64) {
        *self.threshold.write().expect("threshold lock poisoned") = threshold.clamp(0.0, 100.0);
    }

    /// Rebuild all duplicate groups from the live asset set
    ///
    /// Idempotent: an unchanged asset set produces identical group and member
    /// rows (modulo `detected_at`, preserved on reappearing groups).
    pub async fn rebuild_duplicates(&self) -> VaultResult<RebuildReport> {
        let _guard = self.rebuild_lock.try_lock().map_err(|_| {
            VaultError::Conflict("duplicate rebuild already in progress".to_string())
        })?;

        let assets = self.db.assets().list_live().await?;
        let candidates: Vec<GroupingAsset> = assets
            .iter()
            .filter(|a| !a.is_staged)
            .map(GroupingAsset::from)
            .collect();

        let threshold = self.similarity_threshold();
        let plans = plan_groups(&candidates, threshold);

        let mut report = RebuildReport {
            groups_total: plans.len(),
            exact_groups: plans.iter().filter(|p| p.kind == "exact").count(),
            fuzzy_groups: plans.iter().filter(|p| p.kind == "fuzzy").count(),
            members_total: plans.iter().map(|p| p.members.len()).sum(),
            ..Default::default()
        };

        let now = chrono::Utc::now();
        let repo = self.db.duplicates();
        let mut tx = self.db.pool().begin().await.map_err(VaultError::from)?;

        let fingerprints: Vec<String> = plans.iter().map(|p| p.fingerprint.clone()).collect();
        report.groups_removed = repo
            .delete_groups_not_in(&mut tx, &fingerprints)
            .await?;

        for plan in &plans {
            let group = repo
                .upsert_group(
                    &mut tx,
                    &UpsertDuplicateGroup {
                        group_fingerprint: plan.fingerprint.clone(),
                        kind: plan.kind.to_string(),
                        confidence: plan.confidence,
                        title: plan.title.clone(),
                        year: plan.year,
                        season: plan.season,
                        episode: plan.episode,
                        media_kind: plan.media_kind.clone(),
                        member_count: plan.members.len() as i64,
                        recommended_action: plan.recommended_action.clone(),
                        action_reason: plan.action_reason.clone(),
                    },
                    now,
                )
                .await?;

            let members: Vec<NewDuplicateMember> = plan
                .members
                .iter()
                .map(|m| NewDuplicateMember {
                    asset_id: m.asset_id,
                    rank: m.rank,
                    recommended_action: m.recommended_action.clone(),
                    action_reason: Some(m.action_reason.clone()),
                })
                .collect();

            repo.replace_members(&mut tx, group.id, &members)
                .await?;
        }

        tx.commit().await.map_err(VaultError::from)?;

        info!(
            groups = report.groups_total,
            exact = report.exact_groups,
            fuzzy = report.fuzzy_groups,
            removed = report.groups_removed,
            members = report.members_total,
            "Duplicate rebuild complete"
        );

        Ok(report)
    }
}

// ============================================================================
// Grouping (pure)
// ============================================================================

/// Plan all duplicate groups for an asset set
///
/// Output order and content are a deterministic function of the input.
pub fn plan_groups(assets: &[GroupingAsset], threshold: f64) -> Vec<GroupPlan> {
    let mut plans = Vec::new();
    let mut in_exact_group: HashSet<i64> = HashSet::new();

    // Exact pass: shared non-null fingerprints
    let mut by_fingerprint: BTreeMap<&str, Vec<&GroupingAsset>> = BTreeMap::new();
    for asset in assets {
        if let Some(fingerprint) = asset.content_fingerprint.as_deref() {
            by_fingerprint.entry(fingerprint).or_default().push(asset);
        }
    }

    for (fingerprint, members) in by_fingerprint {
        if members.len() < 2 {
            continue;
        }
        for member in &members {
            in_exact_group.insert(member.id);
        }
        plans.push(build_plan(
            format!("exact:{}", fingerprint),
            "exact",
            100.0,
            members,
        ));
    }

    // Fuzzy pass over the remainder, clustered by parsed identity
    let remaining: Vec<&GroupingAsset> = assets
        .iter()
        .filter(|a| !in_exact_group.contains(&a.id))
        .collect();

    let mut clusters: Vec<Vec<&GroupingAsset>> = Vec::new();
    for asset in &remaining {
        let mut placed = false;
        for cluster in clusters.iter_mut() {
            // The first member anchors the cluster identity
            if identities_match(cluster[0], asset, threshold) {
                cluster.push(asset);
                placed = true;
                break;
            }
        }
        if !placed {
            clusters.push(vec![asset]);
        }
    }

    for cluster in clusters {
        if cluster.len() < 2 {
            continue;
        }

        let anchor = cluster[0];
        let confidence = cluster
            .iter()
            .map(|m| pair_similarity(anchor, m))
            .fold(100.0f64, f64::min);

        plans.push(build_plan(
            fuzzy_fingerprint(anchor),
            "fuzzy",
            confidence,
            cluster,
        ));
    }

    plans.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
    plans
}

/// Whether two assets of the same kind describe the same title
fn identities_match(a: &GroupingAsset, b: &GroupingAsset, threshold: f64) -> bool {
    if a.media_kind != b.media_kind {
        return false;
    }
    let (Some(title_a), Some(title_b)) = (a.parsed_title.as_deref(), b.parsed_title.as_deref())
    else {
        return false;
    };

    match a.media_kind.as_str() {
        "tv" => {
            let episodes_match = a.parsed_season.is_some()
                && a.parsed_season == b.parsed_season
                && a.parsed_episode.is_some()
                && a.parsed_episode == b.parsed_episode;
            episodes_match && title_similarity(title_a, title_b) >= threshold
        }
        "movie" => {
            let similarity = title_similarity(title_a, title_b);
            match (a.parsed_year, b.parsed_year) {
                (Some(year_a), Some(year_b)) => year_a == year_b && similarity >= threshold,
                (None, None) => {
                    similarity >= YEARLESS_MOVIE_SIMILARITY && similarity >= threshold
                }
                _ => false,
            }
        }
        _ => false,
    }
}

fn pair_similarity(a: &GroupingAsset, b: &GroupingAsset) -> f64 {
    match (a.parsed_title.as_deref(), b.parsed_title.as_deref()) {
        (Some(title_a), Some(title_b)) => title_similarity(title_a, title_b),
        _ => 0.0,
    }
}

/// Identity fingerprint for a fuzzy group, derived from its anchor member
fn fuzzy_fingerprint(anchor: &GroupingAsset) -> String {
    let title = canonicalize_title(anchor.parsed_title.as_deref().unwrap_or(""));
    let tail = match anchor.media_kind.as_str() {
        "tv" => format!(
            "s{:02}e{:02}",
            anchor.parsed_season.unwrap_or(0),
            anchor.parsed_episode.unwrap_or(0)
        ),
        _ => anchor
            .parsed_year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    };
    format!("fuzzy:{}:{}:{}", anchor.media_kind, title, tail)
}

/// Rank members and attach recommendations, producing the final plan
fn build_plan(
    fingerprint: String,
    kind: &'static str,
    confidence: f64,
    mut members: Vec<&GroupingAsset>,
) -> GroupPlan {
    // Quality desc, then size desc, then path asc for a reproducible order
    members.sort_by(|a, b| {
        b.quality_score
            .cmp(&a.quality_score)
            .then(b.size_bytes.cmp(&a.size_bytes))
            .then(a.logical_path.cmp(&b.logical_path))
    });

    let best = members[0];
    let mut planned = Vec::with_capacity(members.len());
    planned.push(PlannedMember {
        asset_id: best.id,
        rank: 1,
        recommended_action: "keep".to_string(),
        action_reason: "best quality in group".to_string(),
    });

    for (index, member) in members.iter().enumerate().skip(1) {
        let (action, reason) = member_recommendation(best, member);
        planned.push(PlannedMember {
            asset_id: member.id,
            rank: (index + 1) as i64,
            recommended_action: action.to_string(),
            action_reason: reason,
        });
    }

    let any_review = planned.iter().any(|m| m.recommended_action == "review");
    let (group_action, group_reason) = if any_review {
        ("review", "at least one member needs human judgment")
    } else {
        ("stage_lower", "lower-quality members can be staged")
    };

    GroupPlan {
        fingerprint,
        kind,
        confidence,
        title: best.parsed_title.clone(),
        year: best.parsed_year,
        season: best.parsed_season,
        episode: best.parsed_episode,
        media_kind: best.media_kind.clone(),
        recommended_action: group_action.to_string(),
        action_reason: Some(group_reason.to_string()),
        members: planned,
    }
}

/// Recommendation for a non-best member relative to the best one
pub fn member_recommendation(best: &GroupingAsset, member: &GroupingAsset) -> (&'static str, String) {
    let delta = best.quality_score - member.quality_score;

    if delta < REVIEW_DELTA {
        return (
            "review",
            "close quality; human judgment required".to_string(),
        );
    }

    match language_guardrail(best, member) {
        GuardrailVerdict::Pass if delta >= STAGE_DELTA => (
            "stage",
            format!("quality score {} below the best copy", delta),
        ),
        GuardrailVerdict::Pass => (
            "stage",
            format!("moderately lower quality (delta {})", delta),
        ),
        GuardrailVerdict::Blocked { reason } => ("review", reason),
    }
}

/// English-audio guardrails, applied before proposing a stage
///
/// Staging must not remove the only English-audio version of a title. A
/// foreign-language title (no English audio, English subtitles, non-English
/// dominant audio) is an intentional non-English viewing choice and is not
/// protected.
pub fn language_guardrail(best: &GroupingAsset, member: &GroupingAsset) -> GuardrailVerdict {
    let member_has_english = member.audio_languages.iter().any(|l| is_english(l));
    let best_has_english = best.audio_languages.iter().any(|l| is_english(l));

    if member_has_english && !best_has_english {
        return GuardrailVerdict::Blocked {
            reason: "would remove only English audio track".to_string(),
        };
    }

    if !member_has_english && is_foreign_language_title(member) {
        debug!(
            path = %member.logical_path,
            "Foreign-language title; guardrail does not apply"
        );
    }

    GuardrailVerdict::Pass
}

/// No English audio, English subtitles present, dominant audio non-English
pub fn is_foreign_language_title(asset: &GroupingAsset) -> bool {
    let has_english_audio = asset.audio_languages.iter().any(|l| is_english(l));
    let has_english_subs = asset.subtitle_languages.iter().any(|l| is_english(l));
    let dominant_not_english = asset
        .dominant_audio_language
        .as_deref()
        .map(|l| !is_english(l))
        .unwrap_or(true);

    !has_english_audio && has_english_subs && dominant_not_english
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: i64, path: &str) -> GroupingAsset {
        GroupingAsset {
            id,
            logical_path: path.to_string(),
            size_bytes: 1_000_000,
            quality_score: 100,
            content_fingerprint: None,
            parsed_title: None,
            parsed_year: None,
            parsed_season: None,
            parsed_episode: None,
            media_kind: "unknown".to_string(),
            audio_languages: vec!["en".to_string()],
            subtitle_languages: vec![],
            dominant_audio_language: Some("en".to_string()),
        }
    }

    fn tv_asset(id: i64, path: &str, title: &str, season: i64, episode: i64) -> GroupingAsset {
        GroupingAsset {
            parsed_title: Some(title.to_string()),
            parsed_season: Some(season),
            parsed_episode: Some(episode),
            media_kind: "tv".to_string(),
            ..asset(id, path)
        }
    }

    fn movie_asset(id: i64, path: &str, title: &str, year: Option<i64>) -> GroupingAsset {
        GroupingAsset {
            parsed_title: Some(title.to_string()),
            parsed_year: year,
            media_kind: "movie".to_string(),
            ..asset(id, path)
        }
    }

    // =========================================================================
    // Exact Pass Tests
    // =========================================================================

    #[test]
    fn test_exact_group_from_shared_fingerprint() {
        let mut a = movie_asset(1, "/library/a/The.Matrix.mkv", "The Matrix", Some(1999));
        let mut b = movie_asset(2, "/library/b/The.Matrix.mkv", "The Matrix", Some(1999));
        a.content_fingerprint = Some("aaaa".repeat(8));
        b.content_fingerprint = Some("aaaa".repeat(8));

        let plans = plan_groups(&[a, b], 85.0);
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.kind, "exact");
        assert_eq!(plan.confidence, 100.0);
        assert_eq!(plan.fingerprint, format!("exact:{}", "aaaa".repeat(8)));
        assert_eq!(plan.members.len(), 2);
    }

    #[test]
    fn test_exact_tie_breaks_by_path() {
        // Same quality and size: the alphabetically earlier path wins rank 1
        let mut a = movie_asset(1, "/library/a/The.Matrix.mkv", "The Matrix", Some(1999));
        let mut b = movie_asset(2, "/library/b/The.Matrix.mkv", "The Matrix", Some(1999));
        a.content_fingerprint = Some("cafe".repeat(8));
        b.content_fingerprint = Some("cafe".repeat(8));

        let plans = plan_groups(&[b, a], 85.0);
        let members = &plans[0].members;
        assert_eq!(members[0].asset_id, 1);
        assert_eq!(members[0].rank, 1);
        assert_eq!(members[0].recommended_action, "keep");
        // Identical quality: delta 0 < 20 means review
        assert_eq!(members[1].asset_id, 2);
        assert_eq!(members[1].recommended_action, "review");
    }

    #[test]
    fn test_unique_fingerprint_makes_no_group() {
        let mut a = movie_asset(1, "/library/a.mkv", "Alpha", Some(2000));
        a.content_fingerprint = Some("dead".repeat(8));
        let plans = plan_groups(&[a], 85.0);
        assert!(plans.is_empty());
    }

    // =========================================================================
    // Fuzzy Pass Tests
    // =========================================================================

    #[test]
    fn test_fuzzy_tv_grouping_with_language_guardrail() {
        // Lower-quality copy holds the only English audio: review, not stage
        let mut low = tv_asset(1, "/library/redwarf.s01e01.480p.mkv", "redwarf", 1, 1);
        low.quality_score = 60;
        low.audio_languages = vec!["en".to_string()];
        low.dominant_audio_language = Some("en".to_string());

        let mut high = tv_asset(2, "/library/Red.Dwarf.S01E01.1080p.mkv", "Red Dwarf", 1, 1);
        high.quality_score = 130;
        high.audio_languages = vec!["de".to_string()];
        high.dominant_audio_language = Some("de".to_string());

        let plans = plan_groups(&[low, high], 85.0);
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.kind, "fuzzy");
        assert_eq!(plan.media_kind, "tv");

        let best = &plan.members[0];
        assert_eq!(best.asset_id, 2);
        assert_eq!(best.recommended_action, "keep");

        let lower = &plan.members[1];
        assert_eq!(lower.asset_id, 1);
        assert_eq!(lower.recommended_action, "review");
        assert_eq!(lower.action_reason, "would remove only English audio track");

        assert_eq!(plan.recommended_action, "review");
    }

    #[test]
    fn test_fuzzy_tv_requires_same_episode() {
        let a = tv_asset(1, "/library/a.mkv", "Red Dwarf", 1, 1);
        let b = tv_asset(2, "/library/b.mkv", "Red Dwarf", 1, 2);
        assert!(plan_groups(&[a, b], 85.0).is_empty());
    }

    #[test]
    fn test_fuzzy_movie_grouping_by_year() {
        let mut a = movie_asset(1, "/library/a.mkv", "The Matrix", Some(1999));
        a.quality_score = 150;
        let mut b = movie_asset(2, "/library/b.mkv", "Matrix", Some(1999));
        b.quality_score = 70;

        let plans = plan_groups(&[a, b], 85.0);
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.fingerprint, "fuzzy:movie:matrix:1999");
        // Delta 80 with no language concern: stage
        assert_eq!(plan.members[1].recommended_action, "stage");
        assert_eq!(plan.recommended_action, "stage_lower");
    }

    #[test]
    fn test_fuzzy_movie_different_years_never_group() {
        let a = movie_asset(1, "/library/a.mkv", "Dune", Some(1984));
        let b = movie_asset(2, "/library/b.mkv", "Dune", Some(2021));
        assert!(plan_groups(&[a, b], 85.0).is_empty());
    }

    #[test]
    fn test_fuzzy_movie_yearless_needs_95() {
        let a = movie_asset(1, "/library/a.mkv", "Primer", None);
        let b = movie_asset(2, "/library/b.mkv", "Primer", None);
        let plans = plan_groups(&[a.clone(), b.clone()], 85.0);
        assert_eq!(plans.len(), 1);

        // A merely similar yearless title stays out
        let c = movie_asset(3, "/library/c.mkv", "Primers Club", None);
        let plans = plan_groups(&[a, c], 85.0);
        assert!(plans.is_empty());
    }

    #[test]
    fn test_fuzzy_respects_threshold_tuning() {
        let a = tv_asset(1, "/library/a.mkv", "Dark Skies", 1, 1);
        let b = tv_asset(2, "/library/b.mkv", "Dark Skye", 1, 1);
        let similarity = title_similarity("Dark Skies", "Dark Skye");

        let strict = plan_groups(&[a.clone(), b.clone()], similarity + 1.0);
        assert!(strict.is_empty());

        let lenient = plan_groups(&[a, b], similarity - 1.0);
        assert_eq!(lenient.len(), 1);
    }

    #[test]
    fn test_exact_members_excluded_from_fuzzy() {
        let mut a = movie_asset(1, "/library/a.mkv", "Heat", Some(1995));
        let mut b = movie_asset(2, "/library/b.mkv", "Heat", Some(1995));
        a.content_fingerprint = Some("beef".repeat(8));
        b.content_fingerprint = Some("beef".repeat(8));
        let c = movie_asset(3, "/library/c.mkv", "Heat", Some(1995));

        let plans = plan_groups(&[a, b, c], 85.0);
        // The exact pair forms a group; the third copy alone cannot form a
        // fuzzy group of two
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].kind, "exact");
    }

    #[test]
    fn test_unknown_kind_never_groups_fuzzily() {
        let mut a = asset(1, "/library/a.mkv");
        a.parsed_title = Some("clip".to_string());
        let mut b = asset(2, "/library/b.mkv");
        b.parsed_title = Some("clip".to_string());
        assert!(plan_groups(&[a, b], 85.0).is_empty());
    }

    // =========================================================================
    // Recommendation Band Tests
    // =========================================================================

    #[test]
    fn test_delta_bands() {
        let best = GroupingAsset {
            quality_score: 150,
            ..asset(1, "/library/best.mkv")
        };

        let close = GroupingAsset {
            quality_score: 140,
            ..asset(2, "/library/close.mkv")
        };
        assert_eq!(member_recommendation(&best, &close).0, "review");

        let mid = GroupingAsset {
            quality_score: 120,
            ..asset(3, "/library/mid.mkv")
        };
        assert_eq!(member_recommendation(&best, &mid).0, "stage");

        let far = GroupingAsset {
            quality_score: 50,
            ..asset(4, "/library/far.mkv")
        };
        assert_eq!(member_recommendation(&best, &far).0, "stage");
    }

    #[test]
    fn test_guardrail_overrides_large_delta() {
        let best = GroupingAsset {
            quality_score: 180,
            audio_languages: vec!["ja".to_string()],
            dominant_audio_language: Some("ja".to_string()),
            ..asset(1, "/library/best.mkv")
        };
        let member = GroupingAsset {
            quality_score: 40,
            audio_languages: vec!["en".to_string()],
            ..asset(2, "/library/member.mkv")
        };

        let (action, reason) = member_recommendation(&best, &member);
        assert_eq!(action, "review");
        assert_eq!(reason, "would remove only English audio track");
    }

    #[test]
    fn test_guardrail_inert_when_both_have_english() {
        let best = asset(1, "/library/best.mkv");
        let member = asset(2, "/library/member.mkv");
        assert_eq!(language_guardrail(&best, &member), GuardrailVerdict::Pass);
    }

    #[test]
    fn test_foreign_language_title_not_protected() {
        let best = GroupingAsset {
            quality_score: 180,
            audio_languages: vec!["ja".to_string()],
            dominant_audio_language: Some("ja".to_string()),
            ..asset(1, "/library/best.mkv")
        };
        let member = GroupingAsset {
            quality_score: 40,
            audio_languages: vec!["ja".to_string()],
            subtitle_languages: vec!["en".to_string()],
            dominant_audio_language: Some("ja".to_string()),
            ..asset(2, "/library/member.mkv")
        };

        assert!(is_foreign_language_title(&member));
        let (action, _) = member_recommendation(&best, &member);
        assert_eq!(action, "stage");
    }

    // =========================================================================
    // Determinism Tests
    // =========================================================================

    #[test]
    fn test_plan_is_deterministic_across_input_order() {
        let mut a = tv_asset(1, "/library/a.mkv", "Red Dwarf", 1, 1);
        a.quality_score = 120;
        let mut b = tv_asset(2, "/library/b.mkv", "Red Dwarf", 1, 1);
        b.quality_score = 90;
        let mut c = movie_asset(3, "/library/c.mkv", "Heat", Some(1995));
        c.content_fingerprint = Some("feed".repeat(8));
        let mut d = movie_asset(4, "/library/d.mkv", "Heat", Some(1995));
        d.content_fingerprint = Some("feed".repeat(8));

        let forward = plan_groups(&[a.clone(), b.clone(), c.clone(), d.clone()], 85.0);
        let reversed = plan_groups(&[d, c, b, a], 85.0);

        assert_eq!(forward.len(), reversed.len());
        for (x, y) in forward.iter().zip(reversed.iter()) {
            assert_eq!(x.fingerprint, y.fingerprint);
            let x_members: Vec<i64> = x.members.iter().map(|m| m.asset_id).collect();
            let y_members: Vec<i64> = y.members.iter().map(|m| m.asset_id).collect();
            assert_eq!(x_members, y_members);
        }
    }

    #[test]
    fn test_exactly_one_rank_one_per_group() {
        let mut a = tv_asset(1, "/library/a.mkv", "Red Dwarf", 1, 1);
        a.quality_score = 120;
        let mut b = tv_asset(2, "/library/b.mkv", "Red Dwarf", 1, 1);
        b.quality_score = 120;
        let mut c = tv_asset(3, "/library/c.mkv", "Red Dwarf", 1, 1);
        c.quality_score = 80;

        let plans = plan_groups(&[a, b, c], 85.0);
        assert_eq!(plans.len(), 1);
        let ranks: Vec<i64> = plans[0].members.iter().map(|m| m.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        let keeps = plans[0]
            .members
            .iter()
            .filter(|m| m.recommended_action == "keep")
            .count();
        assert_eq!(keeps, 1);
    }
}
