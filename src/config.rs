use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::drivers::fit::FitOptions;
use crate::drivers::plasma::{GainSchedule, PhysicalConstants, PressureGauge};
use crate::drivers::spectral::{TrackPolicy, H_ALPHA_NM, H_BETA_NM, H_GAMMA_NM};
use crate::drivers::{AnalysisError, TimeWindow};

/// Environment variable naming the folder that holds the discharge folders.
pub const DATA_PATH_ENV: &str = "MUSE_DATA_PATH";

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Odd number of samples per local fit.
    pub window: usize,
    pub order: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window: 11,
            order: 3,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeFitConfig {
    /// Window on the shared relative axis used for the IV fit. The whole
    /// probe record when unset.
    pub window: Option<TimeWindow>,
    #[serde(flatten)]
    pub options: FitOptions,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    /// Wavelengths to follow over time, nm.
    pub lines_nm: Vec<f64>,
    pub track_policy: TrackPolicy,
    /// Time index of the spectrum drawn under the spectrogram.
    pub slice_index: usize,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            lines_nm: vec![H_ALPHA_NM, H_BETA_NM, H_GAMMA_NM],
            track_policy: TrackPolicy::Accumulate,
            slice_index: 150,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfConfig {
    /// Samples on the common axis of the two-generator total.
    pub combine_points: usize,
}

impl Default for RfConfig {
    fn default() -> Self {
        Self {
            combine_points: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 900,
        }
    }
}

/// Every tunable of an analysis run. Missing JSON fields keep their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub physics: PhysicalConstants,
    pub gains: GainSchedule,
    pub pressure: PressureGauge,
    pub smoothing: SmoothingConfig,
    pub fit: ProbeFitConfig,
    pub spectral: SpectralConfig,
    pub rf: RfConfig,
    pub plot: PlotConfig,
}

impl AnalysisConfig {
    pub fn from_json(text: &str) -> Result<Self, AnalysisError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
