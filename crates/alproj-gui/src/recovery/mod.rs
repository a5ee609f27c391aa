//! Recovery snapshots for crash protection.
//!
//! Before a long operation starts, the project state is written to
//! `<dir>/<project_id>.alproj.tmp`. A clean save deletes the file, so any file
//! found at startup belongs to a session that did not end normally.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RecoveryConfig;
use crate::error::RecoveryError;
use crate::project::ProjectState;
use crate::sanitize::redact_path;
use crate::storage::{remove_if_exists, write_atomic};

/// Envelope format version.
pub const RECOVERY_FORMAT_VERSION: &str = "1.0.0";

/// Suffix of recovery files.
pub const RECOVERY_SUFFIX: &str = ".alproj.tmp";

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: &'a str,
    saved_at: DateTime<Utc>,
    project: &'a ProjectState,
}

#[derive(Deserialize)]
struct Envelope {
    version: String,
    saved_at: DateTime<Utc>,
    project: Option<ProjectState>,
}

/// Metadata about a readable recovery file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryFile {
    pub path: PathBuf,
    pub project_id: Uuid,
    pub project_name: String,
    pub saved_at: DateTime<Utc>,
    pub file_size: u64,
}

/// A file found in the recovery directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryCandidate {
    Ready(RecoveryFile),
    /// The file exists but cannot be restored.
    Unreadable { path: PathBuf, problem: String },
}

impl RecoveryCandidate {
    pub fn path(&self) -> &Path {
        match self {
            RecoveryCandidate::Ready(file) => &file.path,
            RecoveryCandidate::Unreadable { path, .. } => path,
        }
    }

    pub fn file(&self) -> Option<&RecoveryFile> {
        match self {
            RecoveryCandidate::Ready(file) => Some(file),
            RecoveryCandidate::Unreadable { .. } => None,
        }
    }
}

fn is_recovery_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(RECOVERY_SUFFIX) && n.len() > RECOVERY_SUFFIX.len())
}

fn is_supported_version(version: &str) -> bool {
    version.split('.').next() == RECOVERY_FORMAT_VERSION.split('.').next()
}

/// Reads and checks one recovery file.
fn read_envelope(path: &Path) -> Result<(DateTime<Utc>, ProjectState, u64), RecoveryError> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RecoveryError::NotFound(path.to_path_buf()))
        }
        Err(e) => {
            return Err(RecoveryError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    let corrupt = |reason: String| RecoveryError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let envelope: Envelope =
        serde_json::from_slice(&content).map_err(|e| corrupt(e.to_string()))?;
    if !is_supported_version(&envelope.version) {
        return Err(corrupt(format!(
            "unsupported format version '{}'",
            envelope.version
        )));
    }
    let project = envelope
        .project
        .ok_or_else(|| corrupt("no project data".to_string()))?;
    project
        .stages
        .validate()
        .map_err(|e| corrupt(e.to_string()))?;

    Ok((envelope.saved_at, project, content.len() as u64))
}

/// Manages recovery files in one directory.
#[derive(Debug, Clone)]
pub struct RecoveryStore {
    directory: PathBuf,
}

impl RecoveryStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(&config.directory)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Recovery file path for a project.
    pub fn path_for(&self, project_id: Uuid) -> PathBuf {
        self.directory
            .join(format!("{}{}", project_id, RECOVERY_SUFFIX))
    }

    /// Writes a snapshot of `state`, replacing any earlier one for the same
    /// project. Returns only after the file is durably in place.
    pub fn snapshot(&self, state: &ProjectState) -> Result<RecoveryFile, RecoveryError> {
        self.snapshot_at(state, Utc::now())
    }

    /// Like [`snapshot`](Self::snapshot) with an explicit timestamp.
    pub fn snapshot_at(
        &self,
        state: &ProjectState,
        saved_at: DateTime<Utc>,
    ) -> Result<RecoveryFile, RecoveryError> {
        fs::create_dir_all(&self.directory).map_err(|e| RecoveryError::CreateDirectory {
            path: self.directory.clone(),
            source: e,
        })?;

        let path = self.path_for(state.id);
        let content = serde_json::to_vec_pretty(&EnvelopeRef {
            version: RECOVERY_FORMAT_VERSION,
            saved_at,
            project: state,
        })?;
        write_atomic(&path, &content).map_err(|e| {
            error!("Failed to save recovery state: {}", e);
            RecoveryError::WriteFile {
                path: path.clone(),
                source: e,
            }
        })?;

        info!(
            "Saved recovery state for project {} to {}",
            state.id,
            redact_path(&path)
        );
        Ok(RecoveryFile {
            path,
            project_id: state.id,
            project_name: state.name.clone(),
            saved_at,
            file_size: content.len() as u64,
        })
    }

    /// Every recovery file in the directory, readable ones newest first,
    /// followed by unreadable ones.
    ///
    /// A missing directory means there is nothing to recover. A directory
    /// that exists but cannot be listed is an error.
    pub fn scan(&self) -> Result<Vec<RecoveryCandidate>, RecoveryError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RecoveryError::ListDirectory {
                    path: self.directory.clone(),
                    source: e,
                })
            }
        };

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RecoveryError::ListDirectory {
                path: self.directory.clone(),
                source: e,
            })?;
            let path = entry.path();
            if !is_recovery_file(&path) {
                continue;
            }

            match read_envelope(&path) {
                Ok((saved_at, project, file_size)) => {
                    candidates.push(RecoveryCandidate::Ready(RecoveryFile {
                        path,
                        project_id: project.id,
                        project_name: project.name,
                        saved_at,
                        file_size,
                    }))
                }
                // Deleted between listing and reading
                Err(RecoveryError::NotFound(_)) => continue,
                Err(e) => {
                    warn!("Invalid recovery file {}: {}", redact_path(&path), e);
                    candidates.push(RecoveryCandidate::Unreadable {
                        path,
                        problem: e.to_string(),
                    });
                }
            }
        }

        candidates.sort_by(|a, b| match (a, b) {
            (RecoveryCandidate::Ready(a), RecoveryCandidate::Ready(b)) => b
                .saved_at
                .cmp(&a.saved_at)
                .then_with(|| a.path.cmp(&b.path)),
            (RecoveryCandidate::Ready(_), _) => Ordering::Less,
            (_, RecoveryCandidate::Ready(_)) => Ordering::Greater,
            (a, b) => a.path().cmp(b.path()),
        });
        Ok(candidates)
    }

    /// Restorable recovery files, newest first.
    pub fn list_candidates(&self) -> Result<Vec<RecoveryFile>, RecoveryError> {
        Ok(self
            .scan()?
            .into_iter()
            .filter_map(|candidate| match candidate {
                RecoveryCandidate::Ready(file) => Some(file),
                RecoveryCandidate::Unreadable { .. } => None,
            })
            .collect())
    }

    /// Loads the project state stored in a recovery file.
    pub fn restore(&self, path: &Path) -> Result<ProjectState, RecoveryError> {
        let (saved_at, project, _) = read_envelope(path)?;
        info!(
            "Restored project {} from recovery file saved at {}",
            project.id, saved_at
        );
        Ok(project)
    }

    /// Deletes a recovery file. Failures are logged, never returned.
    ///
    /// Returns true if a file was removed.
    pub fn discard(&self, path: &Path) -> bool {
        if !is_recovery_file(path) {
            warn!(
                "Refusing to discard {}: not a recovery file",
                redact_path(path)
            );
            return false;
        }
        match remove_if_exists(path) {
            Ok(removed) => {
                if removed {
                    info!("Discarded recovery file {}", redact_path(path));
                }
                removed
            }
            Err(e) => {
                warn!(
                    "Failed to discard recovery file {}: {}",
                    redact_path(path),
                    e
                );
                false
            }
        }
    }

    /// Deletes the recovery file of a project, if any.
    pub fn discard_project(&self, project_id: Uuid) -> bool {
        let removed = self.discard(&self.path_for(project_id));
        if removed {
            info!("Cleared recovery state for project {}", project_id);
        }
        removed
    }

    /// Deletes every recovery file, readable or not. Returns the number of
    /// removed files.
    pub fn discard_all(&self) -> Result<usize, RecoveryError> {
        let removed = self
            .scan()?
            .iter()
            .filter(|candidate| self.discard(candidate.path()))
            .count();
        info!("Discarded {} recovery files", removed);
        Ok(removed)
    }

    /// Removes recovery files last modified more than `max_age` ago,
    /// readable or not. Returns the number of removed files.
    pub fn cleanup_older_than(&self, max_age: Duration) -> usize {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                error!("Failed to clean up recovery files: {}", e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_recovery_file(&path) {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(
                        "Failed to inspect recovery file {}: {}",
                        redact_path(&path),
                        e
                    );
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age && self.discard(&path) {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Cleaned up {} old recovery files", removed);
        }
        removed
    }

    /// Startup resolution when several candidates exist: the newest one is
    /// restored and every other recovery file is discarded.
    ///
    /// Returns `None` when there is nothing to recover. If the newest file
    /// fails to restore the error is returned and nothing is discarded.
    pub fn resolve_bulk(&self) -> Result<Option<ProjectState>, RecoveryError> {
        let candidates = self.scan()?;
        let Some(newest) = candidates.iter().find_map(RecoveryCandidate::file) else {
            return Ok(None);
        };

        let project = self.restore(&newest.path)?;
        for candidate in &candidates {
            if candidate.path() != newest.path.as_path() {
                self.discard(candidate.path());
            }
        }
        Ok(Some(project))
    }
}
