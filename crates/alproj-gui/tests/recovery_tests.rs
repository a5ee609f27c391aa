//! Startup recovery after a session that did not end with a save.

mod common;

use std::fs;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use alproj_gui::georectify::MatchOptions;
use alproj_gui::{ProjectState, ProjectStatus, RecoveryCandidate, Stage};

use common::{Script, TestHarness};

#[tokio::test]
async fn test_interrupted_session_is_restorable() {
    let harness = TestHarness::new();
    let controller = harness.ready_controller("Hakuba");
    let before = controller.project();

    let gate = CancellationToken::new();
    harness.georectifier.script(
        Stage::Matching,
        Script::Gated {
            gate,
            output: json!({ "gcpCount": 10 }),
        },
    );
    controller
        .run_stage(Stage::Matching, MatchOptions::default().into())
        .unwrap();
    // The session ends here without a save.
    drop(controller);

    let recovery = harness.recovery();
    let candidates = recovery.list_candidates().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].project_id, before.id);
    assert_eq!(candidates[0].project_name, "Hakuba");

    let restored = recovery.restore(&candidates[0].path).unwrap();
    assert_eq!(restored, before);
    assert!(restored.stages.is_completed(Stage::CameraSetup));
    assert!(!restored.stages.is_completed(Stage::Matching));

    // Resuming: the controller starts idle and the user saves.
    let resumed = harness.controller(restored);
    assert_eq!(resumed.project().status, ProjectStatus::Draft);
    assert_eq!(resumed.snapshot().next_stage, Some(Stage::Matching));
    resumed.save(&harness.project_store()).unwrap();
    assert!(recovery.list_candidates().unwrap().is_empty());
}

#[test]
fn test_candidates_are_listed_newest_first() {
    let harness = TestHarness::new();
    let recovery = harness.recovery();
    let older = ProjectState::new("Older");
    let newer = ProjectState::new("Newer");
    let now = Utc::now();

    recovery
        .snapshot_at(&older, now - ChronoDuration::hours(2))
        .unwrap();
    recovery
        .snapshot_at(&newer, now - ChronoDuration::hours(1))
        .unwrap();
    fs::write(harness.recovery_dir.join("broken.alproj.tmp"), b"{ not json").unwrap();
    fs::write(harness.recovery_dir.join("notes.txt"), b"ignored").unwrap();

    let names: Vec<String> = recovery
        .list_candidates()
        .unwrap()
        .into_iter()
        .map(|file| file.project_name)
        .collect();
    assert_eq!(names, vec!["Newer", "Older"]);

    let scanned = recovery.scan().unwrap();
    assert_eq!(scanned.len(), 3);
    assert!(matches!(
        scanned.last(),
        Some(RecoveryCandidate::Unreadable { path, .. }) if path.ends_with("broken.alproj.tmp")
    ));
}

#[test]
fn test_bulk_resolution_keeps_only_the_newest() {
    let harness = TestHarness::new();
    let recovery = harness.recovery();
    assert!(recovery.resolve_bulk().unwrap().is_none());

    let now = Utc::now();
    let mut newest = ProjectState::new("Newest");
    newest.stages = newest
        .stages
        .mark_completed(Stage::Input, json!({ "photo": "/data/photo.jpg" }))
        .unwrap();
    recovery
        .snapshot_at(&ProjectState::new("First"), now - ChronoDuration::minutes(30))
        .unwrap();
    recovery.snapshot_at(&newest, now).unwrap();
    fs::write(harness.recovery_dir.join("broken.alproj.tmp"), b"[]").unwrap();

    let restored = recovery.resolve_bulk().unwrap().unwrap();
    assert_eq!(restored, newest);
    assert!(recovery.scan().unwrap().iter().all(|c| c.path() == recovery.path_for(newest.id)));
    assert!(!harness.recovery_dir.join("broken.alproj.tmp").exists());
}

#[test]
fn test_cleanup_removes_stale_files() {
    let harness = TestHarness::new();
    let recovery = harness.recovery();
    let stale = recovery.snapshot(&ProjectState::new("Stale")).unwrap();
    let fresh = recovery.snapshot(&ProjectState::new("Fresh")).unwrap();

    let file = fs::File::options().write(true).open(&stale.path).unwrap();
    file.set_modified(std::time::SystemTime::now() - Duration::from_secs(8 * 24 * 3600))
        .unwrap();
    drop(file);

    assert_eq!(
        recovery.cleanup_older_than(harness.settings.recovery.max_age()),
        1
    );
    assert!(!stale.path.exists());
    assert!(fresh.path.exists());
}
