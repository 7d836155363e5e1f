//! # Configuration
//!
//! YAML configuration for VCA runs: fit range, fitting and binning options,
//! apodization, beam correction, FFT backend, regridding, source distance
//! and logging.
//!
//! ## Configuration Search Path
//!
//! Configuration is loaded from the first file found:
//! 1. Path specified via the `VCA_CONFIG` environment variable
//! 2. `./vca.yaml` (current directory)
//! 3. `~/.config/vca/config.yaml` (user config)
//! 4. `/etc/vca/config.yaml` (system config)
//!
//! ## Example Configuration
//!
//! ```yaml
//! run:
//!   low_cut:
//!     kind: pixel
//!     value: 0.02
//!   fit_2d: true
//!   fit:
//!     weighted: true
//!   radial:
//!     binsize: 2.0
//!   apodize:
//!     kernel: tukey
//!     alpha: 0.3
//! channel_width: "0.4 km/s"
//! distance:
//!   value: 250.0
//!   unit: parsec
//! logging:
//!   level: info
//!   format: compact
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::apodization::ApodizationKernel;
use crate::cube::SpectralCube;
use crate::fitting::FitOptions;
use crate::logging::LogConfig;
use crate::radial::{AzimuthalWedge, RadialOptions};
use crate::regrid::ChannelWidth;
use crate::types::{VcaError, VcaResult};
use crate::units::{FrequencyQuantity, Length};
use crate::vca::{RunConfig, Vca};

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "VCA_CONFIG";

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VcaConfig {
    /// Options for each estimator run
    pub run: RunConfig,
    /// Regrid target applied before the run
    pub channel_width: Option<ChannelWidth>,
    /// Source distance for physical-unit cutoffs
    pub distance: Option<Length>,
    pub logging: LogConfig,
}

impl VcaConfig {
    /// Load configuration from the default search path.
    ///
    /// Returns the default configuration if no file is found.
    pub fn load() -> VcaResult<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if Path::new(&path).exists() {
                return Self::load_from(Path::new(&path));
            }
        }

        for path in Self::config_search_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> VcaResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn parse(yaml: &str) -> VcaResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| VcaError::Configuration(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> VcaResult<String> {
        serde_yaml::to_string(self).map_err(|e| VcaError::Serialization(e.to_string()))
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> VcaResult<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./vca.yaml")];

        if let Some(dirs) = directories::ProjectDirs::from("", "", "vca") {
            paths.push(dirs.config_dir().join("config.yaml"));
        }

        paths.push(PathBuf::from("/etc/vca/config.yaml"));
        paths
    }

    pub fn validate(&self) -> VcaResult<()> {
        self.run.validate()?;
        if let Some(distance) = &self.distance {
            let pc = distance.to_parsecs();
            if !(pc.is_finite() && pc > 0.0) {
                return Err(VcaError::Configuration(format!(
                    "distance must be positive, got {:?}",
                    distance
                )));
            }
        }
        if let Some(ChannelWidth::Pixels(factor)) = self.channel_width {
            if !(factor >= 1.0) {
                return Err(VcaError::Configuration(format!(
                    "channel width multiple must be at least 1, got {}",
                    factor
                )));
            }
        }
        Ok(())
    }

    /// Build the estimator for `cube`, regridding and attaching the distance
    pub fn estimator(&self, cube: SpectralCube) -> VcaResult<Vca> {
        let mut vca = match self.channel_width {
            Some(width) => Vca::regridded(&cube, width)?,
            None => Vca::new(cube)?,
        };
        if let Some(distance) = self.distance {
            vca = vca.with_distance(distance);
        }
        Ok(vca)
    }

    /// Example configuration YAML
    pub fn example_yaml() -> String {
        let config = Self {
            run: RunConfig {
                low_cut: Some(FrequencyQuantity::per_pixel(0.02)),
                high_cut: Some(FrequencyQuantity::per_pixel(0.4)),
                fit: FitOptions::weighted(),
                radial: RadialOptions::default()
                    .with_binsize(2.0)
                    .with_wedge(AzimuthalWedge::new(0.0, 45.0)),
                apodize: ApodizationKernel::Tukey { alpha: 0.3 },
                ..Default::default()
            },
            channel_width: Some(ChannelWidth::Pixels(2.0)),
            distance: Some(Length::parsecs(250.0)),
            logging: LogConfig::default(),
        };

        config.to_yaml().unwrap_or_default()
    }
}
