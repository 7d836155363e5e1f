//! Radial / Azimuthal Averaging
//!
//! Bins a [`PowerSpectrum2D`] into a 1D profile over spatial frequency.
//!
//! ```text
//!   step  = binsize / max(H, W)          cycles/pixel
//!   bin   = round(|f| / step)            bin 0 (DC) is dropped
//!   angle = atan2(fy, fx) mod 180 deg    wedge test, inclusive
//! ```
//!
//! With an elliptical correction the radius is measured in the de-projected
//! frame: rotate by `theta`, then stretch the rotated x component by
//! `1 / ellipticity`.
//!
//! Bin statistics use Welford's online mean/variance. The error is the
//! standard error of the mean and is unavailable for single-pixel or
//! constant bins.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::power_spectrum::PowerSpectrum2D;
use crate::types::{VcaError, VcaResult};

/// Highest usable spatial frequency, in cycles/pixel
pub const NYQUIST: f64 = 0.5;

/// Wedge of position angles in the frequency plane (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AzimuthalWedge {
    /// Centre angle, measured from +fx towards +fy
    pub theta_0: f64,
    /// Half-width of the wedge
    pub delta_theta: f64,
}

impl AzimuthalWedge {
    pub fn new(theta_0: f64, delta_theta: f64) -> Self {
        Self {
            theta_0,
            delta_theta,
        }
    }

    pub fn validate(&self) -> VcaResult<()> {
        if !self.theta_0.is_finite() {
            return Err(VcaError::Configuration(format!(
                "wedge centre must be finite, got {}",
                self.theta_0
            )));
        }
        if !(self.delta_theta > 0.0 && self.delta_theta <= 90.0) {
            return Err(VcaError::Configuration(format!(
                "wedge half-width must be in (0, 90] degrees, got {}",
                self.delta_theta
            )));
        }
        Ok(())
    }

    /// The same wedge rotated by 180 degrees
    pub fn rotated(&self) -> Self {
        Self::new(self.theta_0 + 180.0, self.delta_theta)
    }

    /// Whether frequency `(fy, fx)` lies inside the wedge.
    ///
    /// The power spectrum of a real image is symmetric under `f -> -f`, so
    /// angles are compared modulo 180 degrees.
    pub fn contains(&self, fy: f64, fx: f64) -> bool {
        let angle = fy.atan2(fx).to_degrees().rem_euclid(180.0);
        let centre = self.theta_0.rem_euclid(180.0);
        let diff = (angle - centre).abs();
        let dist = diff.min(180.0 - diff);
        dist <= self.delta_theta + 1e-9
    }
}

/// De-projection of elliptical (anisotropic) spectra
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EllipticalCorrection {
    /// Minor-to-major axis ratio, in (0, 1]
    pub ellipticity: f64,
    /// Orientation in degrees
    pub theta: f64,
}

impl EllipticalCorrection {
    pub fn new(ellipticity: f64, theta: f64) -> Self {
        Self { ellipticity, theta }
    }

    pub fn validate(&self) -> VcaResult<()> {
        if !(self.ellipticity > 0.0 && self.ellipticity <= 1.0) {
            return Err(VcaError::Configuration(format!(
                "ellipticity must be in (0, 1], got {}",
                self.ellipticity
            )));
        }
        if !self.theta.is_finite() {
            return Err(VcaError::Configuration(format!(
                "ellipse orientation must be finite, got {}",
                self.theta
            )));
        }
        Ok(())
    }

    /// De-projected radial frequency
    pub fn radius(&self, fy: f64, fx: f64) -> f64 {
        let (sin_t, cos_t) = self.theta.to_radians().sin_cos();
        let u = fx * cos_t + fy * sin_t;
        let v = -fx * sin_t + fy * cos_t;
        ((u / self.ellipticity).powi(2) + v * v).sqrt()
    }
}

/// Radial binning options
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadialOptions {
    /// Bin width in frequency-plane pixels
    pub binsize: f64,
    pub azimuthal: Option<AzimuthalWedge>,
    pub ellipse: Option<EllipticalCorrection>,
}

impl Default for RadialOptions {
    fn default() -> Self {
        Self {
            binsize: 1.0,
            azimuthal: None,
            ellipse: None,
        }
    }
}

impl RadialOptions {
    pub fn with_binsize(mut self, binsize: f64) -> Self {
        self.binsize = binsize;
        self
    }

    pub fn with_wedge(mut self, wedge: AzimuthalWedge) -> Self {
        self.azimuthal = Some(wedge);
        self
    }

    pub fn with_ellipse(mut self, ellipse: EllipticalCorrection) -> Self {
        self.ellipse = Some(ellipse);
        self
    }

    pub fn validate(&self) -> VcaResult<()> {
        if !(self.binsize.is_finite() && self.binsize > 0.0) {
            return Err(VcaError::Configuration(format!(
                "binsize must be positive, got {}",
                self.binsize
            )));
        }
        if let Some(wedge) = &self.azimuthal {
            wedge.validate()?;
        }
        if let Some(ellipse) = &self.ellipse {
            ellipse.validate()?;
        }
        Ok(())
    }
}

/// One radial bin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadialBin {
    /// Bin centre in cycles/pixel
    pub frequency: f64,
    /// Mean power
    pub power: f64,
    /// Standard error of the mean
    pub error: Option<f64>,
    /// `1 / error^2`, or the pixel count when the error is unavailable
    pub weight: f64,
    /// Pixels in the bin
    pub count: usize,
}

/// Radially averaged power spectrum, ordered by increasing frequency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RadialProfile1D {
    pub bins: Vec<RadialBin>,
}

impl RadialProfile1D {
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RadialBin> {
        self.bins.iter()
    }

    pub fn frequencies(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.frequency).collect()
    }

    pub fn powers(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.power).collect()
    }

    /// Lowest binned frequency, if any
    pub fn min_frequency(&self) -> Option<f64> {
        self.bins.first().map(|b| b.frequency)
    }
}

/// Welford accumulator for one bin
#[derive(Debug, Clone, Copy, Default)]
struct BinStats {
    count: usize,
    mean: f64,
    m2: f64,
}

impl BinStats {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn std_error(&self) -> Option<f64> {
        if self.count < 2 || self.m2 <= 0.0 {
            return None;
        }
        let variance = self.m2 / (self.count - 1) as f64;
        Some((variance / self.count as f64).sqrt())
    }
}

/// Bin a 2D power spectrum into a radial profile
pub fn radial_profile(
    ps: &PowerSpectrum2D,
    options: &RadialOptions,
) -> VcaResult<RadialProfile1D> {
    options.validate()?;
    let step = options.binsize * ps.freq_step();
    // Saturates for tiny steps; only occupied bins are stored
    let max_bin = (NYQUIST / step + 1e-9).floor() as usize;
    let mut stats: BTreeMap<usize, BinStats> = BTreeMap::new();

    for (fy, fx, power) in ps.iter_valid() {
        if let Some(wedge) = &options.azimuthal {
            if !wedge.contains(fy, fx) {
                continue;
            }
        }
        let radius = match &options.ellipse {
            Some(ellipse) => ellipse.radius(fy, fx),
            None => fy.hypot(fx),
        };
        let index = (radius / step).round() as usize;
        if index == 0 || index > max_bin {
            continue;
        }
        stats.entry(index).or_default().push(power);
    }

    let bins: Vec<RadialBin> = stats
        .iter()
        .map(|(&index, s)| {
            let error = s.std_error();
            RadialBin {
                frequency: index as f64 * step,
                power: s.mean,
                error,
                weight: error.map_or(s.count as f64, |e| 1.0 / (e * e)),
                count: s.count,
            }
        })
        .collect();

    debug!(
        bins = bins.len(),
        step,
        wedge = options.azimuthal.is_some(),
        ellipse = options.ellipse.is_some(),
        "Built radial profile"
    );
    Ok(RadialProfile1D { bins })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    /// Power depends only on |f|: P = |f|^-2 (DC set to 0)
    fn isotropic_spectrum(n: usize) -> PowerSpectrum2D {
        let c = n as f64 / 2.0;
        let power = Array2::from_shape_fn((n, n), |(y, x)| {
            let fy = (y as f64 - c) / n as f64;
            let fx = (x as f64 - c) / n as f64;
            let r2 = fy * fy + fx * fx;
            if r2 == 0.0 {
                0.0
            } else {
                1.0 / r2
            }
        });
        PowerSpectrum2D::from_parts(power, Array2::from_elem((n, n), true)).unwrap()
    }

    #[test]
    fn test_bins_ordered_within_nyquist() {
        let ps = isotropic_spectrum(64);
        let profile = radial_profile(&ps, &RadialOptions::default()).unwrap();

        assert!(!profile.is_empty());
        let freqs = profile.frequencies();
        assert!(freqs.windows(2).all(|w| w[1] > w[0]));
        assert!(freqs[0] > 0.0);
        assert!(*freqs.last().unwrap() <= NYQUIST + 1e-12);
        // Every integer radius up to n/2 is populated
        assert_eq!(profile.len(), 32);
        assert_relative_eq!(freqs[0], 1.0 / 64.0);
    }

    #[test]
    fn test_binsize_scales_step() {
        let ps = isotropic_spectrum(64);
        let profile = radial_profile(&ps, &RadialOptions::default().with_binsize(4.0)).unwrap();
        assert_relative_eq!(profile.bins[0].frequency, 4.0 / 64.0);
        assert_eq!(profile.len(), 8);
    }

    #[test]
    fn test_bin_statistics() {
        // Constant power: errors are unavailable and weights are counts
        let n = 16;
        let power = Array2::from_elem((n, n), 2.5);
        let ps = PowerSpectrum2D::from_parts(power, Array2::from_elem((n, n), true)).unwrap();
        let profile = radial_profile(&ps, &RadialOptions::default()).unwrap();
        for bin in profile.iter() {
            assert_relative_eq!(bin.power, 2.5);
            assert_eq!(bin.error, None);
            assert_relative_eq!(bin.weight, bin.count as f64);
        }
        // Radius 1 holds the eight neighbours of DC (sqrt(2) rounds to 1)
        assert_eq!(profile.bins[0].count, 8);
    }

    #[test]
    fn test_standard_error_of_mean() {
        let mut stats = BinStats::default();
        for v in [1.0, 2.0, 3.0, 4.0] {
            stats.push(v);
        }
        // sample variance 5/3, SEM = sqrt(5/12)
        assert_relative_eq!(stats.mean, 2.5);
        assert_relative_eq!(stats.std_error().unwrap(), (5.0f64 / 12.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_masked_pixels_skipped() {
        let n = 16;
        let power = Array2::from_elem((n, n), 1.0);
        let mut valid = Array2::from_elem((n, n), true);
        // Mask the +fx axis neighbour of DC
        valid[[n / 2, n / 2 + 1]] = false;
        let ps = PowerSpectrum2D::from_parts(power, valid).unwrap();
        let profile = radial_profile(&ps, &RadialOptions::default()).unwrap();
        assert_eq!(profile.bins[0].count, 7);
    }

    #[test]
    fn test_wedge_inclusive_and_folded() {
        let wedge = AzimuthalWedge::new(0.0, 45.0);
        assert!(wedge.contains(0.0, 0.1));
        assert!(wedge.contains(0.0, -0.1));
        // Exactly on the boundary
        assert!(wedge.contains(0.1, 0.1));
        assert!(wedge.contains(-0.1, 0.1));
        assert!(!wedge.contains(0.1, 0.0));

        let rotated = wedge.rotated();
        for &(fy, fx) in &[(0.0, 0.1), (0.1, 0.1), (0.1, 0.0), (0.03, -0.2)] {
            assert_eq!(wedge.contains(fy, fx), rotated.contains(fy, fx));
        }
    }

    #[test]
    fn test_rotated_wedge_selects_same_bins() {
        let ps = isotropic_spectrum(64);
        let wedge = AzimuthalWedge::new(30.0, 25.0);
        let a = radial_profile(&ps, &RadialOptions::default().with_wedge(wedge)).unwrap();
        let b = radial_profile(&ps, &RadialOptions::default().with_wedge(wedge.rotated())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tiny_binsize_only_stores_occupied_bins() {
        let ps = isotropic_spectrum(16);
        let profile =
            radial_profile(&ps, &RadialOptions::default().with_binsize(1e-9)).unwrap();
        let pixels: usize = profile.iter().map(|b| b.count).sum();
        // Every non-DC pixel inside Nyquist lands in some bin
        assert!(pixels > 0 && pixels < 16 * 16);
        assert!(profile.len() <= pixels);
        assert!(profile
            .frequencies()
            .windows(2)
            .all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_wedge_restricts_counts() {
        let ps = isotropic_spectrum(64);
        let full = radial_profile(&ps, &RadialOptions::default()).unwrap();
        let wedge = radial_profile(
            &ps,
            &RadialOptions::default().with_wedge(AzimuthalWedge::new(90.0, 20.0)),
        )
        .unwrap();
        let full_count: usize = full.iter().map(|b| b.count).sum();
        let wedge_count: usize = wedge.iter().map(|b| b.count).sum();
        assert!(wedge_count < full_count / 2);
        assert!(wedge_count > 0);
    }

    #[test]
    fn test_ellipse_unit_ratio_is_identity() {
        let ps = isotropic_spectrum(32);
        let plain = radial_profile(&ps, &RadialOptions::default()).unwrap();
        let ellipse = radial_profile(
            &ps,
            &RadialOptions::default().with_ellipse(EllipticalCorrection::new(1.0, 37.0)),
        )
        .unwrap();
        assert_eq!(plain.len(), ellipse.len());
        for (a, b) in plain.iter().zip(ellipse.iter()) {
            assert_relative_eq!(a.frequency, b.frequency);
            assert_eq!(a.count, b.count);
        }
    }

    #[test]
    fn test_ellipse_radius() {
        let ellipse = EllipticalCorrection::new(0.5, 0.0);
        assert_relative_eq!(ellipse.radius(0.0, 0.1), 0.2);
        assert_relative_eq!(ellipse.radius(0.1, 0.0), 0.1);

        let rotated = EllipticalCorrection::new(0.5, 90.0);
        assert_relative_eq!(rotated.radius(0.1, 0.0), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_options() {
        let ps = isotropic_spectrum(8);
        let bad = [
            RadialOptions::default().with_binsize(0.0),
            RadialOptions::default().with_wedge(AzimuthalWedge::new(0.0, 0.0)),
            RadialOptions::default().with_wedge(AzimuthalWedge::new(0.0, 120.0)),
            RadialOptions::default().with_ellipse(EllipticalCorrection::new(1.5, 0.0)),
            RadialOptions::default().with_ellipse(EllipticalCorrection::new(0.0, 0.0)),
        ];
        for options in bad {
            assert!(matches!(
                radial_profile(&ps, &options),
                Err(VcaError::Configuration(_))
            ));
        }
    }
}
