//! VCA Distance Metric
//!
//! Compares two datasets by the significance of the difference of their
//! fitted slopes:
//!
//! ```text
//! d = (slope1 - slope2) / sqrt(err1^2 + err2^2)
//! ```
//!
//! The sign is kept, so `d(a, b) = -d(b, a)`; use
//! [`DistanceResult::magnitude`] for the symmetric value.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cube::SpectralCube;
use crate::fitting::FitResult;
use crate::regrid::ChannelWidth;
use crate::types::VcaResult;
use crate::units::Length;
use crate::vca::{RunConfig, Vca, VcaRun};

/// Signed distance between two fits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceResult {
    pub distance: f64,
    pub fit1: FitResult,
    pub fit2: FitResult,
}

impl DistanceResult {
    pub fn from_fits(fit1: FitResult, fit2: FitResult) -> Self {
        Self {
            distance: slope_distance(fit1.slope, fit1.slope_err, fit2.slope, fit2.slope_err),
            fit1,
            fit2,
        }
    }

    /// `|distance|`
    pub fn magnitude(&self) -> f64 {
        self.distance.abs()
    }
}

/// Slope difference in units of the combined standard error.
///
/// Equal slopes give 0 even when both errors vanish; different slopes with
/// zero errors give an infinity carrying the sign of the difference.
pub fn slope_distance(slope1: f64, err1: f64, slope2: f64, err2: f64) -> f64 {
    let diff = slope1 - slope2;
    if diff == 0.0 {
        return 0.0;
    }
    let combined = err1.hypot(err2);
    if combined == 0.0 {
        return if diff > 0.0 {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        };
    }
    diff / combined
}

/// One side of a comparison: a cube and how to analyse it
#[derive(Debug, Clone)]
pub struct DistanceInput {
    pub cube: SpectralCube,
    pub config: RunConfig,
    pub distance: Option<Length>,
    pub channel_width: Option<ChannelWidth>,
}

impl DistanceInput {
    pub fn new(cube: SpectralCube) -> Self {
        Self {
            cube,
            config: RunConfig::default(),
            distance: None,
            channel_width: None,
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_distance(mut self, distance: Length) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn with_channel_width(mut self, width: ChannelWidth) -> Self {
        self.channel_width = Some(width);
        self
    }

    fn run(&self) -> VcaResult<VcaRun> {
        let mut vca = match self.channel_width {
            Some(width) => Vca::regridded(&self.cube, width)?,
            None => Vca::new(self.cube.clone())?,
        };
        if let Some(distance) = self.distance {
            vca = vca.with_distance(distance);
        }
        vca.run(&self.config)
    }
}

/// Distance between two datasets, keeping both runs
#[derive(Debug, Clone, PartialEq)]
pub struct VcaDistance {
    pub run1: VcaRun,
    pub run2: VcaRun,
}

impl VcaDistance {
    /// Analyse both inputs; the first failure aborts the comparison
    pub fn compute(input1: &DistanceInput, input2: &DistanceInput) -> VcaResult<Self> {
        let run1 = input1.run()?;
        let run2 = input2.run()?;
        Ok(Self::from_runs(run1, run2))
    }

    /// Both cubes with the same options
    pub fn with_config(
        cube1: SpectralCube,
        cube2: SpectralCube,
        config: &RunConfig,
    ) -> VcaResult<Self> {
        Self::compute(
            &DistanceInput::new(cube1).with_config(config.clone()),
            &DistanceInput::new(cube2).with_config(config.clone()),
        )
    }

    pub fn from_runs(run1: VcaRun, run2: VcaRun) -> Self {
        Self { run1, run2 }
    }

    pub fn distance_metric(&self) -> DistanceResult {
        let result = DistanceResult::from_fits(self.run1.fit, self.run2.fit);
        info!(
            distance = result.distance,
            slope1 = result.fit1.slope,
            slope2 = result.fit2.slope,
            "VCA distance"
        );
        result
    }
}
