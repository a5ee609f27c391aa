//! The wizard pipeline controller.

pub mod controller;
pub mod outcome;

pub use controller::WizardController;
pub use outcome::{StageOutcome, WizardSnapshot};
