use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::WizardError;
use crate::stage::Stage;

fn default_threshold() -> f64 {
    30.0
}

fn default_surface_distance() -> f64 {
    3000.0
}

fn default_simulation_min_distance() -> f64 {
    100.0
}

fn default_thin_grid() -> Option<u32> {
    Some(50)
}

fn default_outlier_filter() -> Option<String> {
    Some("fundamental".to_string())
}

fn default_max_generations() -> u32 {
    300
}

fn default_min_gcp_distance() -> f64 {
    100.0
}

fn default_true() -> bool {
    true
}

fn default_resolution() -> f64 {
    1.0
}

fn default_crs() -> String {
    "EPSG:6690".to_string()
}

/// Feature matching method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMethod {
    Akaze,
    Sift,
    #[default]
    SuperpointLightglue,
    MinimaRoma,
    TinyRoma,
}

/// Camera parameter optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimizer {
    /// CMA-ES.
    #[default]
    Cma,
    /// Least squares.
    Lsq,
}

fn ensure_non_negative(field: &str, value: f64) -> Result<(), WizardError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(WizardError::validation(field, format!("must be >= 0, got {}", value)))
    }
}

fn ensure_positive(field: &str, value: f64) -> Result<(), WizardError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(WizardError::validation(field, format!("must be > 0, got {}", value)))
    }
}

/// Options for the matching stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOptions {
    #[serde(default)]
    pub method: MatchMethod,
    /// Method-dependent match threshold.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Surface extraction distance from the camera, in meters.
    #[serde(default = "default_surface_distance")]
    pub surface_distance: f64,
    /// Minimum distance rendered in the simulation, in meters.
    #[serde(default = "default_simulation_min_distance")]
    pub simulation_min_distance: f64,
    #[serde(default = "default_thin_grid")]
    pub spatial_thin_grid: Option<u32>,
    #[serde(default = "default_outlier_filter")]
    pub outlier_filter: Option<String>,
    /// Longest edge in pixels; `None` keeps the original size.
    #[serde(default)]
    pub resize: Option<u32>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            method: MatchMethod::default(),
            threshold: default_threshold(),
            surface_distance: default_surface_distance(),
            simulation_min_distance: default_simulation_min_distance(),
            spatial_thin_grid: default_thin_grid(),
            outlier_filter: default_outlier_filter(),
            resize: None,
        }
    }
}

impl MatchOptions {
    pub fn validate(&self) -> Result<(), WizardError> {
        ensure_non_negative("threshold", self.threshold)?;
        ensure_non_negative("surfaceDistance", self.surface_distance)?;
        ensure_non_negative("simulationMinDistance", self.simulation_min_distance)?;
        if self.spatial_thin_grid == Some(0) {
            return Err(WizardError::validation("spatialThinGrid", "must be >= 1"));
        }
        if self.resize == Some(0) {
            return Err(WizardError::validation("resize", "must be >= 1 pixel"));
        }
        Ok(())
    }
}

/// Options for the estimation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateOptions {
    #[serde(default)]
    pub optimizer: Optimizer,
    #[serde(default = "default_max_generations")]
    pub max_generations: u32,
    /// GCPs closer than this to the camera are ignored, in meters.
    #[serde(default = "default_min_gcp_distance")]
    pub min_gcp_distance: f64,
    /// Estimate without distortion first, then with.
    #[serde(default)]
    pub two_stage: bool,
    #[serde(default = "default_true")]
    pub optimize_position: bool,
    #[serde(default = "default_true")]
    pub optimize_orientation: bool,
    #[serde(default = "default_true")]
    pub optimize_fov: bool,
    #[serde(default = "default_true")]
    pub optimize_distortion: bool,
}

impl Default for EstimateOptions {
    fn default() -> Self {
        Self {
            optimizer: Optimizer::default(),
            max_generations: default_max_generations(),
            min_gcp_distance: default_min_gcp_distance(),
            two_stage: false,
            optimize_position: true,
            optimize_orientation: true,
            optimize_fov: true,
            optimize_distortion: true,
        }
    }
}

impl EstimateOptions {
    pub const GENERATIONS: std::ops::RangeInclusive<u32> = 10..=10000;

    pub fn validate(&self) -> Result<(), WizardError> {
        if !Self::GENERATIONS.contains(&self.max_generations) {
            return Err(WizardError::validation(
                "maxGenerations",
                format!(
                    "must be between {} and {}, got {}",
                    Self::GENERATIONS.start(),
                    Self::GENERATIONS.end(),
                    self.max_generations
                ),
            ));
        }
        ensure_non_negative("minGcpDistance", self.min_gcp_distance)?;
        if !(self.optimize_position
            || self.optimize_orientation
            || self.optimize_fov
            || self.optimize_distortion)
        {
            return Err(WizardError::validation(
                "optimize",
                "at least one parameter group must be optimized",
            ));
        }
        Ok(())
    }
}

/// Options for the GeoTIFF export stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    pub output_path: PathBuf,
    /// Meters per pixel.
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    #[serde(default = "default_crs")]
    pub crs: String,
    #[serde(default = "default_true")]
    pub interpolate: bool,
    /// Defaults to the resolution when unset.
    #[serde(default)]
    pub max_interpolation_distance: Option<f64>,
    #[serde(default = "default_surface_distance")]
    pub surface_distance: f64,
}

impl ExportOptions {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            resolution: default_resolution(),
            crs: default_crs(),
            interpolate: true,
            max_interpolation_distance: None,
            surface_distance: default_surface_distance(),
        }
    }

    /// Interpolation distance actually used.
    pub fn effective_max_distance(&self) -> f64 {
        self.max_interpolation_distance.unwrap_or(self.resolution)
    }

    pub fn validate(&self) -> Result<(), WizardError> {
        if self.output_path.as_os_str().is_empty() {
            return Err(WizardError::validation("outputPath", "must not be empty"));
        }
        ensure_positive("resolution", self.resolution)?;
        if self.crs.trim().is_empty() {
            return Err(WizardError::validation("crs", "must not be empty"));
        }
        if let Some(distance) = self.max_interpolation_distance {
            ensure_non_negative("maxInterpolationDistance", distance)?;
        }
        ensure_non_negative("surfaceDistance", self.surface_distance)?;
        Ok(())
    }
}

/// Options for one runnable stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "options", rename_all = "snake_case")]
pub enum StageOptions {
    Matching(MatchOptions),
    Estimation(EstimateOptions),
    Export(ExportOptions),
}

impl StageOptions {
    pub fn stage(&self) -> Stage {
        match self {
            StageOptions::Matching(_) => Stage::Matching,
            StageOptions::Estimation(_) => Stage::Estimation,
            StageOptions::Export(_) => Stage::Export,
        }
    }

    pub fn validate(&self) -> Result<(), WizardError> {
        match self {
            StageOptions::Matching(options) => options.validate(),
            StageOptions::Estimation(options) => options.validate(),
            StageOptions::Export(options) => options.validate(),
        }
    }
}

impl From<MatchOptions> for StageOptions {
    fn from(options: MatchOptions) -> Self {
        StageOptions::Matching(options)
    }
}

impl From<EstimateOptions> for StageOptions {
    fn from(options: EstimateOptions) -> Self {
        StageOptions::Estimation(options)
    }
}

impl From<ExportOptions> for StageOptions {
    fn from(options: ExportOptions) -> Self {
        StageOptions::Export(options)
    }
}
