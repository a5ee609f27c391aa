//! Test harness for isolated wizard runs.
//!
//! The `TestHarness` struct owns temporary recovery and project directories
//! and builds controllers wired to a `ScriptedGeorectifier`.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use alproj_gui::config::RecoveryConfig;
use alproj_gui::{JsonProjectStore, ProjectState, RecoveryStore, Settings, WizardController};

use super::georectifier::ScriptedGeorectifier;

pub fn input_selection() -> Value {
    json!({
        "photo": "/data/hakuba/photo.jpg",
        "dsm": "/data/hakuba/dsm.tif",
        "ortho": "/data/hakuba/ortho.tif"
    })
}

pub fn camera_params() -> Value {
    json!({ "x": 139.1, "y": 36.7, "z": 1800.0, "fov": 60.0, "pan": 120.0, "tilt": -5.0 })
}

/// Test harness providing an isolated environment for wizard tests.
pub struct TestHarness {
    /// Temporary directory holding everything below.
    temp_dir: TempDir,
    /// Where recovery snapshots are written.
    pub recovery_dir: PathBuf,
    /// Where projects are saved.
    pub projects_dir: PathBuf,
    pub settings: Settings,
    pub georectifier: Arc<ScriptedGeorectifier>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let recovery_dir = temp_dir.path().join("recovery");
        let projects_dir = temp_dir.path().join("projects");

        let settings = Settings {
            recovery: RecoveryConfig {
                directory: recovery_dir.clone(),
                ..Default::default()
            },
            ..Default::default()
        };

        Self {
            temp_dir,
            recovery_dir,
            projects_dir,
            settings,
            georectifier: Arc::new(ScriptedGeorectifier::new()),
        }
    }

    pub fn recovery(&self) -> RecoveryStore {
        RecoveryStore::from_config(&self.settings.recovery)
    }

    pub fn project_store(&self) -> JsonProjectStore {
        JsonProjectStore::new(&self.projects_dir)
    }

    /// A controller for `project`, using the harness settings.
    pub fn controller(&self, project: ProjectState) -> WizardController {
        WizardController::new(
            project,
            self.georectifier.clone(),
            self.recovery(),
            &self.settings,
        )
    }

    /// A controller for a fresh project with inputs and camera set.
    pub fn ready_controller(&self, name: &str) -> WizardController {
        let controller = self.controller(ProjectState::new(name));
        controller
            .set_inputs(input_selection())
            .expect("Failed to set inputs");
        controller
            .set_camera_params(camera_params())
            .expect("Failed to set camera parameters");
        controller
    }
}
