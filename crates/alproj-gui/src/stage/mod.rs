//! Wizard stages and the invalidation cascade.
//!
//! A [`StageSet`] is an immutable value: every transition returns a new set,
//! so the cascade is a pure function `(StageSet, k) -> StageSet`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Cached result of a completed stage. Opaque to the pipeline core.
pub type StageOutput = serde_json::Value;

static ORDER: [Stage; Stage::COUNT] = Stage::ALL;

/// One step of the five-step wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    CameraSetup,
    Matching,
    Estimation,
    Export,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Input,
        Stage::CameraSetup,
        Stage::Matching,
        Stage::Estimation,
        Stage::Export,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Fixed ordinal of the stage (0..=4).
    pub fn index(self) -> usize {
        match self {
            Stage::Input => 0,
            Stage::CameraSetup => 1,
            Stage::Matching => 2,
            Stage::Estimation => 3,
            Stage::Export => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Stage> {
        Self::ALL.get(index).copied()
    }

    /// The stage immediately after this one, if any.
    pub fn next(self) -> Option<Stage> {
        Self::from_index(self.index() + 1)
    }

    /// Stages strictly before this one.
    pub fn upstream(self) -> &'static [Stage] {
        &ORDER[..self.index()]
    }

    /// Stages strictly after this one.
    pub fn downstream(self) -> &'static [Stage] {
        &ORDER[self.index() + 1..]
    }

    /// Whether this stage is computed by a background job against the
    /// external library (as opposed to being edited directly by the user).
    pub fn runs_as_job(self) -> bool {
        matches!(self, Stage::Matching | Stage::Estimation | Stage::Export)
    }

    /// Machine-readable step label used in progress events.
    pub fn step_label(self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::CameraSetup => "camera_setup",
            Stage::Matching => "matching",
            Stage::Estimation => "estimation",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Input => write!(f, "Input data"),
            Stage::CameraSetup => write!(f, "Camera setup"),
            Stage::Matching => write!(f, "Image matching"),
            Stage::Estimation => write!(f, "Parameter estimation"),
            Stage::Export => write!(f, "GeoTIFF export"),
        }
    }
}

/// An event that makes cached stage results stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    /// The input rasters or target photograph changed.
    InputsChanged,
    /// The initial camera parameters changed.
    CameraParamsChanged,
    /// The given stage is about to be recomputed.
    Rerun(Stage),
}

impl Invalidation {
    /// First stage whose cached result becomes stale, or `None` if nothing
    /// downstream exists.
    pub fn first_stale(self) -> Option<Stage> {
        match self {
            Invalidation::InputsChanged => Stage::Input.next(),
            Invalidation::CameraParamsChanged => Stage::CameraSetup.next(),
            Invalidation::Rerun(stage) => stage.next(),
        }
    }
}

/// State of a single stage slot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "output", rename_all = "snake_case")]
pub enum StageState {
    #[default]
    Pending,
    Completed(StageOutput),
}

impl StageState {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageState::Completed(_))
    }

    pub fn output(&self) -> Option<&StageOutput> {
        match self {
            StageState::Completed(output) => Some(output),
            StageState::Pending => None,
        }
    }
}

/// The full set of wizard stages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageSet {
    stages: [StageState; Stage::COUNT],
}

impl StageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, stage: Stage) -> &StageState {
        &self.stages[stage.index()]
    }

    pub fn is_completed(&self, stage: Stage) -> bool {
        self.state(stage).is_completed()
    }

    pub fn output(&self, stage: Stage) -> Option<&StageOutput> {
        self.state(stage).output()
    }

    /// First stage that is not completed, or `None` when the whole pipeline
    /// is done.
    pub fn first_pending(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| !self.is_completed(*s))
    }

    /// Completed stages in order.
    pub fn completed(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL.into_iter().filter(|s| self.is_completed(*s))
    }

    /// Checks that every stage before `stage` is completed.
    pub fn ensure_upstream_completed(&self, stage: Stage) -> Result<(), StageError> {
        match stage.upstream().iter().find(|s| !self.is_completed(**s)) {
            Some(missing) => Err(StageError::UpstreamIncomplete {
                stage,
                missing: *missing,
            }),
            None => Ok(()),
        }
    }

    /// Returns a new set with `stage` completed with `output`.
    ///
    /// Fails if any earlier stage is still pending. Later stages are left as
    /// they are; callers invalidate them first.
    pub fn mark_completed(&self, stage: Stage, output: StageOutput) -> Result<StageSet, StageError> {
        self.ensure_upstream_completed(stage)?;
        let mut next = self.clone();
        next.stages[stage.index()] = StageState::Completed(output);
        Ok(next)
    }

    /// Returns a new set with `stage` and every later stage pending and their
    /// outputs cleared. Earlier stages are untouched.
    pub fn invalidate_from(&self, stage: Stage) -> StageSet {
        let mut next = self.clone();
        for slot in &mut next.stages[stage.index()..] {
            *slot = StageState::Pending;
        }
        next
    }

    /// Applies an invalidation trigger.
    pub fn apply(&self, invalidation: Invalidation) -> StageSet {
        match invalidation.first_stale() {
            Some(stage) => self.invalidate_from(stage),
            None => self.clone(),
        }
    }

    /// Checks the ordering invariant: no completed stage follows a pending one.
    ///
    /// Sets built through [`mark_completed`](Self::mark_completed) always hold
    /// it; sets deserialized from disk are checked with this.
    pub fn validate(&self) -> Result<(), StageError> {
        for stage in self.completed() {
            self.ensure_upstream_completed(stage)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn all_completed() -> StageSet {
        let mut set = StageSet::new();
        for stage in Stage::ALL {
            set = set
                .mark_completed(stage, json!({ "stage": stage.index() }))
                .unwrap();
        }
        set
    }

    #[test]
    fn test_stage_ordinals() {
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
            assert_eq!(Stage::from_index(i), Some(*stage));
        }
        assert_eq!(Stage::from_index(5), None);
        assert_eq!(Stage::Export.next(), None);
        assert_eq!(Stage::Matching.downstream(), &[Stage::Estimation, Stage::Export]);
        assert_eq!(Stage::Matching.upstream(), &[Stage::Input, Stage::CameraSetup]);
    }

    #[test]
    fn test_job_stages() {
        assert!(!Stage::Input.runs_as_job());
        assert!(!Stage::CameraSetup.runs_as_job());
        assert!(Stage::Matching.runs_as_job());
        assert!(Stage::Estimation.runs_as_job());
        assert!(Stage::Export.runs_as_job());
    }

    #[test]
    fn test_mark_completed_requires_upstream() {
        let set = StageSet::new();
        let err = set.mark_completed(Stage::Matching, json!(1)).unwrap_err();
        assert!(matches!(
            err,
            StageError::UpstreamIncomplete {
                stage: Stage::Matching,
                missing: Stage::Input
            }
        ));

        let set = set.mark_completed(Stage::Input, json!("in")).unwrap();
        assert!(set.mark_completed(Stage::Matching, json!(1)).is_err());
        let set = set.mark_completed(Stage::CameraSetup, json!("cam")).unwrap();
        let set = set.mark_completed(Stage::Matching, json!(1)).unwrap();
        assert!(set.is_completed(Stage::Matching));
    }

    #[test]
    fn test_mark_completed_is_pure() {
        let set = StageSet::new();
        let next = set.mark_completed(Stage::Input, json!("in")).unwrap();
        assert!(!set.is_completed(Stage::Input));
        assert!(next.is_completed(Stage::Input));
    }

    #[test]
    fn test_invalidate_from_matching_on_full_set() {
        let set = all_completed();
        let next = set.invalidate_from(Stage::Matching);

        assert!(next.is_completed(Stage::Input));
        assert!(next.is_completed(Stage::CameraSetup));
        assert_eq!(next.output(Stage::CameraSetup), Some(&json!({ "stage": 1 })));
        for stage in [Stage::Matching, Stage::Estimation, Stage::Export] {
            assert_eq!(next.state(stage), &StageState::Pending);
            assert!(next.output(stage).is_none());
        }
        // The original is untouched.
        assert!(set.is_completed(Stage::Export));
    }

    #[test]
    fn test_invalidate_from_every_stage() {
        let set = all_completed();
        for k in Stage::ALL {
            let next = set.invalidate_from(k);
            for s in Stage::ALL {
                if s < k {
                    assert_eq!(next.state(s), set.state(s), "{s:?} should be untouched");
                } else {
                    assert_eq!(next.state(s), &StageState::Pending, "{s:?} should be pending");
                }
            }
            next.validate().unwrap();
        }
    }

    #[test]
    fn test_invalidation_triggers() {
        assert_eq!(Invalidation::InputsChanged.first_stale(), Some(Stage::CameraSetup));
        assert_eq!(Invalidation::CameraParamsChanged.first_stale(), Some(Stage::Matching));
        assert_eq!(Invalidation::Rerun(Stage::Matching).first_stale(), Some(Stage::Estimation));
        assert_eq!(Invalidation::Rerun(Stage::Estimation).first_stale(), Some(Stage::Export));
        assert_eq!(Invalidation::Rerun(Stage::Export).first_stale(), None);

        let set = all_completed().apply(Invalidation::Rerun(Stage::Export));
        assert_eq!(set, all_completed());
    }

    #[test]
    fn test_first_pending() {
        assert_eq!(StageSet::new().first_pending(), Some(Stage::Input));
        assert_eq!(all_completed().first_pending(), None);
        assert_eq!(
            all_completed().invalidate_from(Stage::Estimation).first_pending(),
            Some(Stage::Estimation)
        );
    }

    #[test]
    fn test_validate_rejects_gaps() {
        let json = json!({
            "stages": [
                { "state": "completed", "output": "in" },
                { "state": "pending" },
                { "state": "completed", "output": 3 },
                { "state": "pending" },
                { "state": "pending" }
            ]
        });
        let set: StageSet = serde_json::from_value(json).unwrap();
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let set = all_completed().invalidate_from(Stage::Estimation);
        let text = serde_json::to_string(&set).unwrap();
        let back: StageSet = serde_json::from_str(&text).unwrap();
        assert_eq!(back, set);
    }
}
