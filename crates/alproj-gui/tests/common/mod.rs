//! Shared test utilities for alproj-gui integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated wizard runs with temp directories
//! - `ScriptedGeorectifier`, a stand-in for the georectification library

pub mod georectifier;
pub mod harness;

pub use georectifier::{Script, ScriptedGeorectifier};
pub use harness::{camera_params, input_selection, TestHarness};
