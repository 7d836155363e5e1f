//! Velocity Channel Analysis
//!
//! [`Vca`] owns a cube (optionally regridded along the spectral axis) and an
//! optional source distance. [`Vca::run`] executes the whole pipeline for a
//! [`RunConfig`] and returns an immutable [`VcaRun`]:
//!
//! ```text
//! cube ─> apodize ─> FFT per channel ─> channel mean ─> shift ─> (beam)
//!      ─> radial profile ─> 1D fit (+ optional 2D fit)
//! ```
//!
//! A failed run returns an error and produces nothing; runs obtained earlier
//! are plain values and stay valid.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vca_core::prelude::*;
//!
//! let cube = SyntheticConfig::new(10, 256, 3.0).generate()?;
//! let run = Vca::new(cube)?.run(
//!     &RunConfig::default().with_low_cut(FrequencyQuantity::per_pixel(0.02)),
//! )?;
//! println!("slope = {:.2} +/- {:.2}", run.slope(), run.fit.slope_err);
//! # Ok::<(), vca_core::VcaError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::apodization::ApodizationKernel;
use crate::cube::SpectralCube;
use crate::fitting::{fit_1d, fit_2d, resolve_cutoffs, FitOptions, FitResult};
use crate::power_spectrum::{FftOptions, PowerSpectrum2D, PowerSpectrumEstimator};
use crate::radial::{radial_profile, RadialOptions, RadialProfile1D};
use crate::regrid::{regrid_cube, ChannelWidth};
use crate::types::{VcaError, VcaResult};
use crate::units::{FrequencyQuantity, Length, UnitContext};

/// Options for one run of the estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Lower fit cutoff (defaults to the lowest radial bin)
    pub low_cut: Option<FrequencyQuantity>,
    /// Upper fit cutoff (defaults to Nyquist)
    pub high_cut: Option<FrequencyQuantity>,
    /// Also fit the 2D spectrum
    pub fit_2d: bool,
    pub fit: FitOptions,
    pub radial: RadialOptions,
    pub apodize: ApodizationKernel,
    /// Divide out the beam response
    pub beam_correct: bool,
    pub fft: FftOptions,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            low_cut: None,
            high_cut: None,
            fit_2d: true,
            fit: FitOptions::default(),
            radial: RadialOptions::default(),
            apodize: ApodizationKernel::None,
            beam_correct: false,
            fft: FftOptions::default(),
        }
    }
}

impl RunConfig {
    pub fn with_low_cut(mut self, cut: FrequencyQuantity) -> Self {
        self.low_cut = Some(cut);
        self
    }

    pub fn with_high_cut(mut self, cut: FrequencyQuantity) -> Self {
        self.high_cut = Some(cut);
        self
    }

    pub fn with_fit_2d(mut self, enable: bool) -> Self {
        self.fit_2d = enable;
        self
    }

    pub fn with_fit(mut self, fit: FitOptions) -> Self {
        self.fit = fit;
        self
    }

    pub fn with_radial(mut self, radial: RadialOptions) -> Self {
        self.radial = radial;
        self
    }

    pub fn with_apodization(mut self, kernel: ApodizationKernel) -> Self {
        self.apodize = kernel;
        self
    }

    pub fn with_beam_correction(mut self, enable: bool) -> Self {
        self.beam_correct = enable;
        self
    }

    pub fn with_fft(mut self, fft: FftOptions) -> Self {
        self.fft = fft;
        self
    }

    /// Check option values that do not depend on the cube
    pub fn validate(&self) -> VcaResult<()> {
        self.fit.validate()?;
        self.radial.validate()?;
        self.apodize.validate()?;
        self.fft.validate()?;
        for (name, cut) in [("low_cut", &self.low_cut), ("high_cut", &self.high_cut)] {
            if let Some(q) = cut {
                if !(q.value().is_finite() && q.value() >= 0.0) {
                    return Err(VcaError::Configuration(format!(
                        "{} must be a non-negative frequency, got {}",
                        name, q
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Result of one estimator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VcaRun {
    pub ps2d: PowerSpectrum2D,
    pub ps1d: RadialProfile1D,
    pub fit: FitResult,
    pub fit_2d: Option<FitResult>,
    pub config: RunConfig,
}

impl VcaRun {
    /// Slope of the 1D fit
    pub fn slope(&self) -> f64 {
        self.fit.slope
    }

    /// Slope of the 2D fit, when one was requested
    pub fn slope_2d(&self) -> Option<f64> {
        self.fit_2d.as_ref().map(|f| f.slope)
    }
}

/// Velocity Channel Analysis estimator
#[derive(Debug, Clone)]
pub struct Vca {
    cube: SpectralCube,
    distance: Option<Length>,
}

impl Vca {
    pub fn new(cube: SpectralCube) -> VcaResult<Self> {
        cube.validate()?;
        Ok(Self {
            cube,
            distance: None,
        })
    }

    /// Estimator on a cube regridded to `width`
    pub fn regridded(cube: &SpectralCube, width: ChannelWidth) -> VcaResult<Self> {
        Self::new(regrid_cube(cube, width)?)
    }

    /// Source distance for physical-unit cutoffs
    pub fn with_distance(mut self, distance: Length) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn cube(&self) -> &SpectralCube {
        &self.cube
    }

    pub fn distance(&self) -> Option<Length> {
        self.distance
    }

    pub fn unit_context(&self) -> UnitContext {
        UnitContext::new(self.cube.header.pixel_scale(), self.distance)
    }

    /// Compute the power spectra and fits
    pub fn run(&self, config: &RunConfig) -> VcaResult<VcaRun> {
        config.validate()?;
        let ctx = self.unit_context();

        // Convert cutoffs before the expensive part so bad units fail fast
        let (low, high_cut) =
            resolve_cutoffs(config.low_cut.as_ref(), config.high_cut.as_ref(), &ctx)?;
        if let Some(low_cut) = low {
            if low_cut > high_cut {
                return Err(VcaError::Configuration(format!(
                    "low_cut ({:.4e} 1/pix) is above high_cut ({:.4e} 1/pix)",
                    low_cut, high_cut
                )));
            }
        }

        let mut estimator = PowerSpectrumEstimator::new()
            .with_apodization(config.apodize)
            .with_beam_correction(config.beam_correct)
            .with_backend(config.fft.backend());
        let ps2d = estimator.compute(&self.cube)?;
        let ps1d = radial_profile(&ps2d, &config.radial)?;

        let low_cut = low
            .or_else(|| ps1d.min_frequency())
            .unwrap_or_else(|| ps2d.freq_step());
        debug!(low_cut, high_cut, "Fit range in cycles/pixel");

        let fit = fit_1d(&ps1d, low_cut, high_cut, &config.fit, &ctx)?;
        let fit_2d = if config.fit_2d {
            Some(fit_2d(&ps2d, low_cut, high_cut)?)
        } else {
            None
        };

        info!(
            slope = fit.slope,
            slope_err = fit.slope_err,
            slope_2d = fit_2d.as_ref().map(|f| f.slope),
            bins = ps1d.len(),
            "VCA run complete"
        );

        Ok(VcaRun {
            ps2d,
            ps1d,
            fit,
            fit_2d,
            config: config.clone(),
        })
    }

    /// Persist `run`, with or without the input cube
    pub fn save_results(&self, run: &VcaRun, path: &Path, keep_data: bool) -> VcaResult<()> {
        let snapshot = VcaSnapshot {
            run: run.clone(),
            cube: keep_data.then(|| self.cube.clone()),
            distance: self.distance,
        };
        snapshot.save(path)
    }

    /// Reload results written by [`Vca::save_results`]
    pub fn load_results(path: &Path) -> VcaResult<VcaSnapshot> {
        VcaSnapshot::load(path)
    }
}

/// Serialized run results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VcaSnapshot {
    pub run: VcaRun,
    /// Input cube, absent when saved without data
    #[serde(default)]
    pub cube: Option<SpectralCube>,
    #[serde(default)]
    pub distance: Option<Length>,
}

impl VcaSnapshot {
    pub fn save(&self, path: &Path) -> VcaResult<()> {
        let content = serde_json::to_string(self)?;
        std::fs::write(path, content)?;
        debug!(path = %path.display(), with_data = self.cube.is_some(), "Saved VCA results");
        Ok(())
    }

    pub fn load(path: &Path) -> VcaResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: VcaSnapshot = serde_json::from_str(&content)?;
        if let Some(cube) = &snapshot.cube {
            cube.validate()?;
        }
        Ok(snapshot)
    }

    /// Rebuild an estimator when the cube was saved
    pub fn estimator(&self) -> Option<Vca> {
        let cube = self.cube.clone()?;
        Some(Vca {
            cube,
            distance: self.distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::Beam;
    use crate::radial::{AzimuthalWedge, EllipticalCorrection};
    use crate::synthetic::SyntheticConfig;
    use crate::units::{AngleUnit, LengthUnit};
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    const SCALE: f64 = 10.0 / 3600.0;

    fn red_noise(channels: usize, size: usize, index: f64) -> SpectralCube {
        SyntheticConfig::new(channels, size, index)
            .with_pixel_scale(SCALE)
            .generate()
            .unwrap()
    }

    #[test]
    fn test_recovers_index_512() {
        let cube = red_noise(10, 512, 3.0);
        let config = RunConfig::default()
            .with_low_cut(FrequencyQuantity::per_pixel(0.01))
            .with_fit_2d(false);
        let run = Vca::new(cube).unwrap().run(&config).unwrap();

        assert!((run.slope() + 3.0).abs() < 0.1, "slope {}", run.slope());
        assert!(run.slope_2d().is_none());
        assert!(run.ps2d.power.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn test_fit_2d_exact_for_power_law() {
        let cube = red_noise(2, 64, 2.5);
        let run = Vca::new(cube)
            .unwrap()
            .run(&RunConfig::default().with_low_cut(FrequencyQuantity::per_pixel(0.05)))
            .unwrap();
        let slope_2d = run.slope_2d().unwrap();
        assert_relative_eq!(slope_2d, -2.5, epsilon = 1e-6);
        assert!((run.slope() + 2.5).abs() < 0.1);
    }

    #[test]
    fn test_cutoff_units_agree() {
        let distance = 250.0;
        let vca = Vca::new(red_noise(3, 128, 3.0))
            .unwrap()
            .with_distance(Length::parsecs(distance));

        let (low, high) = (0.02, 0.1);
        let pixel = RunConfig::default()
            .with_low_cut(FrequencyQuantity::per_pixel(low))
            .with_high_cut(FrequencyQuantity::per_pixel(high));

        let per_arcsec = |f: f64| f / 10.0;
        let angular = RunConfig::default()
            .with_low_cut(FrequencyQuantity::per_angle(per_arcsec(low), AngleUnit::Arcsecond))
            .with_high_cut(FrequencyQuantity::per_angle(per_arcsec(high), AngleUnit::Arcsecond));

        let per_pc = |f: f64| f / (SCALE.to_radians() * distance);
        let physical = RunConfig::default()
            .with_low_cut(FrequencyQuantity::per_length(per_pc(low), LengthUnit::Parsec))
            .with_high_cut(FrequencyQuantity::per_length(per_pc(high), LengthUnit::Parsec));

        let a = vca.run(&pixel).unwrap();
        let b = vca.run(&angular).unwrap();
        let c = vca.run(&physical).unwrap();
        assert_eq!(a.fit.n_points, b.fit.n_points);
        assert_eq!(a.fit.n_points, c.fit.n_points);
        assert_relative_eq!(a.slope(), b.slope(), epsilon = 1e-12);
        assert_relative_eq!(a.slope(), c.slope(), epsilon = 1e-12);
        assert_relative_eq!(a.slope_2d().unwrap(), c.slope_2d().unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn test_physical_cutoff_without_distance() {
        let vca = Vca::new(red_noise(1, 32, 3.0)).unwrap();
        let config =
            RunConfig::default().with_low_cut(FrequencyQuantity::per_length(1.0, LengthUnit::Parsec));
        assert!(matches!(vca.run(&config), Err(VcaError::UnitConversion(_))));
    }

    #[test]
    fn test_save_load_without_cube() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vca.json");

        let vca = Vca::new(red_noise(2, 64, 3.0)).unwrap();
        let run = vca
            .run(&RunConfig::default().with_fit(FitOptions::weighted()))
            .unwrap();
        vca.save_results(&run, &path, false).unwrap();

        let snapshot = Vca::load_results(&path).unwrap();
        assert!(snapshot.cube.is_none());
        assert!(snapshot.estimator().is_none());
        assert_eq!(snapshot.run.ps1d, run.ps1d);
        assert_eq!(snapshot.run.slope(), run.slope());
        assert_eq!(snapshot.run.slope_2d(), run.slope_2d());
        assert_eq!(snapshot.run, run);
    }

    #[test]
    fn test_save_load_with_cube() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vca_data.json");

        let vca = Vca::new(red_noise(1, 32, 2.0))
            .unwrap()
            .with_distance(Length::parsecs(140.0));
        let run = vca.run(&RunConfig::default()).unwrap();
        vca.save_results(&run, &path, true).unwrap();

        let snapshot = Vca::load_results(&path).unwrap();
        let restored = snapshot.estimator().unwrap();
        assert_eq!(restored.cube(), vca.cube());
        assert_eq!(restored.distance(), vca.distance());
        assert_eq!(restored.run(&RunConfig::default()).unwrap(), run);
    }

    #[test]
    fn test_orthogonal_wedges_recover_index() {
        // Anisotropic fields without de-projection: the amplitude differs
        // between directions but every wedge sees the same slope
        for index in [3.0, 4.0] {
            for ellipticity in [0.2, 0.5, 0.75, 0.9, 1.0] {
                let cube = SyntheticConfig::new(10, 512, index)
                    .with_ellipse(ellipticity, 0.0)
                    .generate()
                    .unwrap();
                let vca = Vca::new(cube).unwrap();
                let radial = RadialOptions::default().with_binsize(8.0);
                let base = RunConfig::default()
                    .with_low_cut(FrequencyQuantity::per_pixel(0.01))
                    .with_fit(FitOptions::weighted())
                    .with_fit_2d(false);

                let runs = [
                    base.clone()
                        .with_radial(radial.with_wedge(AzimuthalWedge::new(0.0, 40.0))),
                    base.clone()
                        .with_radial(radial.with_wedge(AzimuthalWedge::new(90.0, 40.0))),
                    base.with_radial(radial),
                ];
                for config in &runs {
                    let slope = vca.run(config).unwrap().slope();
                    assert!(
                        (slope + index).abs() < 0.1,
                        "index {} ellipticity {} wedge {:?}: slope {}",
                        index,
                        ellipticity,
                        config.radial.azimuthal,
                        slope
                    );
                }
            }
        }
    }

    #[test]
    fn test_ellipse_correction_with_wedge() {
        let cube = SyntheticConfig::new(2, 256, 3.0)
            .with_ellipse(0.5, 30.0)
            .generate()
            .unwrap();
        let vca = Vca::new(cube).unwrap();
        let radial = RadialOptions::default()
            .with_binsize(4.0)
            .with_ellipse(EllipticalCorrection::new(0.5, 30.0))
            .with_wedge(AzimuthalWedge::new(45.0, 30.0));
        let config = RunConfig::default()
            .with_low_cut(FrequencyQuantity::per_pixel(0.02))
            .with_high_cut(FrequencyQuantity::per_pixel(0.4))
            .with_radial(radial)
            .with_fit_2d(false);
        let run = vca.run(&config).unwrap();
        assert!((run.slope() + 3.0).abs() < 0.1, "slope {}", run.slope());
    }

    #[test]
    fn test_too_few_bins_is_fit_range_error() {
        let vca = Vca::new(red_noise(1, 64, 3.0)).unwrap();
        let good = vca.run(&RunConfig::default()).unwrap();

        let config = RunConfig::default()
            .with_low_cut(FrequencyQuantity::per_pixel(0.1))
            .with_high_cut(FrequencyQuantity::per_pixel(0.11));
        let err = vca.run(&config).unwrap_err();
        assert!(matches!(err, VcaError::FitRange { .. }));

        // Earlier results are untouched by the failed run
        assert!(good.slope().is_finite());
    }

    #[test]
    fn test_beam_correction_restores_slope() {
        let beam = Beam::circular(3.0 * SCALE);
        let cube = SyntheticConfig::new(2, 128, 3.0)
            .with_pixel_scale(SCALE)
            .with_beam(beam)
            .generate()
            .unwrap();
        let vca = Vca::new(cube).unwrap();
        let base = RunConfig::default()
            .with_low_cut(FrequencyQuantity::per_pixel(0.02))
            .with_high_cut(FrequencyQuantity::per_pixel(1.0 / 6.0));

        let raw = vca.run(&base).unwrap();
        let corrected = vca.run(&base.clone().with_beam_correction(true)).unwrap();

        assert!((corrected.slope() + 3.0).abs() < 0.1, "slope {}", corrected.slope());
        assert_relative_eq!(corrected.slope_2d().unwrap(), -3.0, epsilon = 1e-6);
        assert!(raw.slope() < corrected.slope() - 0.3);
    }

    #[test]
    fn test_apodization_kernels_recover_index() {
        let vca = Vca::new(red_noise(10, 512, 3.0)).unwrap();
        for name in ["splitcosinebell", "hanning", "tukey", "cosinebell"] {
            let kernel = ApodizationKernel::from_name(name, 0.3, 0.8).unwrap();
            let mut config = RunConfig::default()
                .with_apodization(kernel)
                .with_fit_2d(false);
            // The cosine bell tapers from the centre and distorts large scales
            if name == "cosinebell" {
                config = config.with_low_cut(FrequencyQuantity::per_pixel(10f64.powf(-1.8)));
            }
            let run = vca.run(&config).unwrap();
            assert!((run.slope() + 3.0).abs() < 0.1, "{}: slope {}", name, run.slope());
        }
    }

    #[test]
    fn test_regridded_estimator() {
        let cube = red_noise(8, 32, 3.0);
        let vca = Vca::regridded(&cube, ChannelWidth::Pixels(4.0)).unwrap();
        assert_eq!(vca.cube().num_channels(), 2);
        assert_relative_eq!(vca.cube().header.cdelt3, 4000.0);
    }

    #[test]
    fn test_inverted_cutoffs_rejected() {
        let vca = Vca::new(red_noise(1, 32, 3.0)).unwrap();
        let config = RunConfig::default()
            .with_low_cut(FrequencyQuantity::per_pixel(0.3))
            .with_high_cut(FrequencyQuantity::per_pixel(0.1));
        assert!(matches!(vca.run(&config), Err(VcaError::Configuration(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let vca = Vca::new(red_noise(1, 32, 3.0)).unwrap();
        let config = RunConfig::default().with_radial(RadialOptions::default().with_binsize(-1.0));
        assert!(matches!(vca.run(&config), Err(VcaError::Configuration(_))));
    }
}
