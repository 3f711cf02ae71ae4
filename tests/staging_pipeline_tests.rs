//! Integration tests for the deletion staging pipeline rules
//!
//! These tests verify the workflow contracts end to end:
//! - Pending-deletion state transitions (staged -> deleted, staged -> restored)
//! - Holding-area layout rules
//! - Recommendation bands and the language guardrail
//! - Cleanup eligibility

// ============================================================================
// State Transition Tests
// ============================================================================

/// States a pending deletion can be in, as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingState {
    /// No row exists for the asset
    None,
    /// Row exists with deleted_at unset
    Staged,
    /// Row exists with deleted_at set (terminal)
    Deleted,
}

/// Operations the workflow exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Stage,
    Approve,
    Restore,
}

/// The state each operation leaves the row in, or None when refused
fn apply(state: PendingState, op: Op) -> Option<PendingState> {
    match (state, op) {
        // Staging creates the row; a second stage for the same asset conflicts
        (PendingState::None, Op::Stage) => Some(PendingState::Staged),
        (PendingState::Staged, Op::Stage) => None,
        (PendingState::Deleted, Op::Stage) => None,

        // Approval is terminal and requires a live row
        (PendingState::Staged, Op::Approve) => Some(PendingState::Deleted),
        (PendingState::None, Op::Approve) => None,
        (PendingState::Deleted, Op::Approve) => None,

        // Restore removes the row entirely
        (PendingState::Staged, Op::Restore) => Some(PendingState::None),
        (PendingState::None, Op::Restore) => None,
        (PendingState::Deleted, Op::Restore) => None,
    }
}

#[test]
fn test_happy_path_stage_then_approve() {
    let staged = apply(PendingState::None, Op::Stage).unwrap();
    assert_eq!(staged, PendingState::Staged);
    let deleted = apply(staged, Op::Approve).unwrap();
    assert_eq!(deleted, PendingState::Deleted);
}

#[test]
fn test_stage_then_restore_round_trips_to_none() {
    let staged = apply(PendingState::None, Op::Stage).unwrap();
    let restored = apply(staged, Op::Restore).unwrap();
    assert_eq!(restored, PendingState::None);

    // After a restore the asset can be staged again
    assert_eq!(apply(restored, Op::Stage), Some(PendingState::Staged));
}

#[test]
fn test_deleted_is_terminal() {
    let deleted = PendingState::Deleted;
    assert_eq!(apply(deleted, Op::Stage), None);
    assert_eq!(apply(deleted, Op::Approve), None);
    assert_eq!(apply(deleted, Op::Restore), None);
}

#[test]
fn test_double_stage_is_refused() {
    let staged = apply(PendingState::None, Op::Stage).unwrap();
    assert_eq!(apply(staged, Op::Stage), None);
}

#[test]
fn test_approve_without_stage_is_refused() {
    assert_eq!(apply(PendingState::None, Op::Approve), None);
    assert_eq!(apply(PendingState::None, Op::Restore), None);
}

#[test]
fn test_failed_approve_leaves_row_staged_for_retry() {
    // An approve that fails on the unlink does not transition; a retry from
    // the same state succeeds
    let staged = apply(PendingState::None, Op::Stage).unwrap();
    let after_failed_attempt = staged;
    assert_eq!(apply(after_failed_attempt, Op::Approve), Some(PendingState::Deleted));
}

// ============================================================================
// Holding-Area Layout Tests
// ============================================================================

/// Layout contract: {root}/{kind subdir}/{yyyy-mm-dd}/{basename}
fn staged_location(root: &str, media_kind: &str, date: &str, basename: &str) -> String {
    let subdir = match media_kind {
        "movie" => "movies",
        "tv" => "tv",
        "documentary" => "documentaries",
        _ => "other",
    };
    format!("{}/{}/{}/{}", root, subdir, date, basename)
}

#[test]
fn test_layout_by_kind_and_date() {
    assert_eq!(
        staged_location("/stage", "movie", "2026-08-01", "Foo.mkv"),
        "/stage/movies/2026-08-01/Foo.mkv"
    );
    assert_eq!(
        staged_location("/stage", "tv", "2026-08-01", "Bar.mkv"),
        "/stage/tv/2026-08-01/Bar.mkv"
    );
    assert_eq!(
        staged_location("/stage", "unknown", "2026-08-01", "Baz.mkv"),
        "/stage/other/2026-08-01/Baz.mkv"
    );
}

#[test]
fn test_collision_suffix_progression() {
    // On collision the basename gains _1, _2, ... before the extension
    let existing = ["Foo.mkv", "Foo_1.mkv"];
    let mut counter = 0;
    let mut name = "Foo.mkv".to_string();
    while existing.contains(&name.as_str()) {
        counter += 1;
        name = format!("Foo_{}.mkv", counter);
    }
    assert_eq!(name, "Foo_2.mkv");
}

// ============================================================================
// Recommendation Band Tests
// ============================================================================

/// Per-member recommendation for a non-best member, given the quality delta
/// and whether staging would remove the only English audio track
fn recommendation(delta: i64, removes_only_english: bool) -> &'static str {
    if delta < 20 {
        "review"
    } else if removes_only_english {
        "review"
    } else {
        "stage"
    }
}

#[test]
fn test_close_quality_needs_human_judgment() {
    assert_eq!(recommendation(0, false), "review");
    assert_eq!(recommendation(19, false), "review");
}

#[test]
fn test_clear_quality_gap_stages() {
    assert_eq!(recommendation(20, false), "stage");
    assert_eq!(recommendation(50, false), "stage");
    assert_eq!(recommendation(120, false), "stage");
}

#[test]
fn test_guardrail_blocks_any_gap() {
    // Even a huge quality gap cannot stage the only English-audio copy
    assert_eq!(recommendation(120, true), "review");
    assert_eq!(recommendation(20, true), "review");
}

// ============================================================================
// Cleanup Eligibility Tests
// ============================================================================

/// Whether the retention sweep may purge a row
fn purgeable(approved: bool, deleted: bool, age_days: i64, retention_days: i64) -> bool {
    approved && !deleted && age_days > retention_days
}

#[test]
fn test_cleanup_requires_prior_approval() {
    // Age alone never purges: approval must have been issued by a caller
    assert!(!purgeable(false, false, 365, 30));
    assert!(purgeable(true, false, 365, 30));
}

#[test]
fn test_cleanup_respects_retention_window() {
    assert!(!purgeable(true, false, 10, 30));
    assert!(purgeable(true, false, 31, 30));
}

#[test]
fn test_cleanup_skips_terminal_rows() {
    assert!(!purgeable(true, true, 365, 30));
}
