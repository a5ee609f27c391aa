//! Project state and persistence.
//!
//! The pipeline core treats a project as an opaque serializable snapshot; the
//! only structure it relies on is the identity and the [`StageSet`].

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProjectError;
use crate::sanitize::{redact_path, sanitize_file_stem};
use crate::stage::StageSet;
use crate::storage::write_atomic;

/// File format version written into project files.
pub const PROJECT_VERSION: &str = "1.0.0";

/// File extension of saved projects.
pub const PROJECT_EXTENSION: &str = "alproj";

/// Overall project status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Draft,
    Processing,
    Completed,
    Error,
}

/// Everything needed to resume a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub id: Uuid,
    pub version: String,
    pub name: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stages: StageSet,
}

impl ProjectState {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            version: PROJECT_VERSION.to_string(),
            name: name.into(),
            status: ProjectStatus::Draft,
            created_at: now,
            updated_at: now,
            stages: StageSet::new(),
        }
    }

    /// Bumps `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Where projects are saved on the normal (non-recovery) path.
pub trait ProjectStore: Send + Sync {
    /// Persists `state` and returns the file it was written to.
    fn save(&self, state: &ProjectState) -> Result<PathBuf, ProjectError>;

    fn load(&self, path: &Path) -> Result<ProjectState, ProjectError>;
}

/// Stores projects as pretty-printed JSON files named `<name>.alproj`.
pub struct JsonProjectStore {
    directory: PathBuf,
}

impl JsonProjectStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path a project with `name` is saved to.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, ProjectError> {
        let stem =
            sanitize_file_stem(name).ok_or_else(|| ProjectError::InvalidName(name.to_string()))?;
        Ok(self
            .directory
            .join(format!("{}.{}", stem, PROJECT_EXTENSION)))
    }
}

impl ProjectStore for JsonProjectStore {
    fn save(&self, state: &ProjectState) -> Result<PathBuf, ProjectError> {
        let path = self.path_for(&state.name)?;
        fs::create_dir_all(&self.directory).map_err(|e| ProjectError::CreateDirectory {
            path: self.directory.clone(),
            source: e,
        })?;

        let content = serde_json::to_vec_pretty(state)?;
        write_atomic(&path, &content).map_err(|e| ProjectError::WriteFile {
            path: path.clone(),
            source: e,
        })?;

        info!("Saved project {} to {}", state.id, redact_path(&path));
        Ok(path)
    }

    fn load(&self, path: &Path) -> Result<ProjectState, ProjectError> {
        let content = fs::read(path).map_err(|e| ProjectError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let state: ProjectState =
            serde_json::from_slice(&content).map_err(|e| ProjectError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
        state
            .stages
            .validate()
            .map_err(|e| ProjectError::InconsistentStages {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> ProjectState {
        let mut state = ProjectState::new("Tateyama");
        state.stages = state
            .stages
            .mark_completed(Stage::Input, json!({ "dsm": "/data/dsm.tif" }))
            .unwrap()
            .mark_completed(Stage::CameraSetup, json!({ "fov": 60.0 }))
            .unwrap();
        state
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonProjectStore::new(dir.path().join("projects"));
        let state = sample();

        let path = store.save(&state).unwrap();
        assert_eq!(path, dir.path().join("projects").join("Tateyama.alproj"));

        let loaded = store.load(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_invalid_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = JsonProjectStore::new(dir.path());
        let state = ProjectState::new("  ");
        assert!(matches!(
            store.save(&state),
            Err(ProjectError::InvalidName(_))
        ));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.alproj");
        fs::write(&path, b"{ not json").unwrap();
        let store = JsonProjectStore::new(dir.path());
        assert!(matches!(
            store.load(&path),
            Err(ProjectError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_rejects_stage_gaps() {
        let dir = TempDir::new().unwrap();
        let store = JsonProjectStore::new(dir.path());
        let mut value = serde_json::to_value(sample()).unwrap();
        value["stages"]["stages"][0] = json!({ "state": "pending" });
        let path = dir.path().join("gap.alproj");
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        assert!(matches!(
            store.load(&path),
            Err(ProjectError::InconsistentStages { .. })
        ));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(ProjectStatus::Processing).unwrap(),
            json!("processing")
        );
    }
}
