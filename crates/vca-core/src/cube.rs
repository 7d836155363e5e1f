//! Spectral-line cube data model
//!
//! A cube is a `(channel, y, x)` array of intensities with the subset of the
//! FITS header the analysis needs:
//!
//! | Field           | FITS keyword | Unit                        |
//! |-----------------|--------------|-----------------------------|
//! | `cdelt1/cdelt2` | CDELT1/2     | degrees per pixel           |
//! | `cdelt3`        | CDELT3       | m/s or Hz per channel       |
//! | `beam`          | BMAJ/BMIN/BPA| degrees (FWHM), degrees     |
//! | `ctype1/ctype2` | CTYPE1/2     | projection, e.g. `GLON-CAR` |

use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;

use crate::types::{VcaError, VcaResult};

/// FWHM = sigma * sqrt(8 ln 2)
pub const FWHM_TO_SIGMA: f64 = 0.424_660_900_144_009_5;

/// Physical type of the spectral axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectralAxis {
    /// Velocity in m/s
    #[default]
    Velocity,
    /// Frequency in Hz
    Frequency,
}

/// Gaussian beam description
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    /// Major axis FWHM in degrees (BMAJ)
    pub major: f64,
    /// Minor axis FWHM in degrees (BMIN)
    pub minor: f64,
    /// Position angle in degrees, east of north (BPA)
    pub pa: f64,
}

impl Beam {
    pub fn new(major: f64, minor: f64, pa: f64) -> Self {
        Self { major, minor, pa }
    }

    /// Circular beam with the given FWHM in degrees
    pub fn circular(fwhm: f64) -> Self {
        Self::new(fwhm, fwhm, 0.0)
    }

    /// Major and minor Gaussian widths (sigma) in pixels
    pub fn sigma_pixels(&self, pixel_scale_deg: f64) -> (f64, f64) {
        let scale = pixel_scale_deg.abs();
        (
            self.major / scale * FWHM_TO_SIGMA,
            self.minor / scale * FWHM_TO_SIGMA,
        )
    }

    /// Amplitude of the beam's Fourier transform at `(fy, fx)` cycles/pixel.
    ///
    /// Normalised to 1 at zero frequency. North is +y and east is -x, so the
    /// major axis points along `(-sin PA, cos PA)` in `(x, y)`.
    pub fn transfer(&self, fy: f64, fx: f64, pixel_scale_deg: f64) -> f64 {
        let (sig_maj, sig_min) = self.sigma_pixels(pixel_scale_deg);
        let (sin_pa, cos_pa) = self.pa.to_radians().sin_cos();
        let f_maj = -fx * sin_pa + fy * cos_pa;
        let f_min = fx * cos_pa + fy * sin_pa;
        let arg = sig_maj * sig_maj * f_maj * f_maj + sig_min * sig_min * f_min * f_min;
        (-2.0 * PI * PI * arg).exp()
    }

    fn validate(&self) -> VcaResult<()> {
        let ok = self.major.is_finite()
            && self.minor.is_finite()
            && self.pa.is_finite()
            && self.major > 0.0
            && self.minor > 0.0
            && self.minor <= self.major;
        if ok {
            Ok(())
        } else {
            Err(VcaError::InvalidCube(format!("invalid beam {:?}", self)))
        }
    }
}

/// Header metadata attached to a cube
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CubeHeader {
    /// Pixel scale along x in degrees
    pub cdelt1: Option<f64>,
    /// Pixel scale along y in degrees
    pub cdelt2: Option<f64>,
    /// Channel width (signed)
    pub cdelt3: f64,
    /// Unit of `cdelt3`
    pub spectral_axis: SpectralAxis,
    /// Optional beam
    pub beam: Option<Beam>,
    /// Projection type of the first spatial axis
    pub ctype1: Option<String>,
    /// Projection type of the second spatial axis
    pub ctype2: Option<String>,
}

impl Default for CubeHeader {
    fn default() -> Self {
        Self {
            cdelt1: None,
            cdelt2: None,
            cdelt3: 1.0,
            spectral_axis: SpectralAxis::Velocity,
            beam: None,
            ctype1: None,
            ctype2: None,
        }
    }
}

impl CubeHeader {
    /// Header with square pixels of `scale_deg` degrees
    pub fn with_pixel_scale(mut self, scale_deg: f64) -> Self {
        self.cdelt1 = Some(-scale_deg.abs());
        self.cdelt2 = Some(scale_deg.abs());
        self
    }

    pub fn with_channel_width(mut self, cdelt3: f64, axis: SpectralAxis) -> Self {
        self.cdelt3 = cdelt3;
        self.spectral_axis = axis;
        self
    }

    pub fn with_beam(mut self, beam: Beam) -> Self {
        self.beam = Some(beam);
        self
    }

    /// Absolute pixel scale in degrees, from CDELT2
    pub fn pixel_scale(&self) -> Option<f64> {
        self.cdelt2.map(f64::abs)
    }
}

/// A spectral-line cube: `data[[channel, y, x]]` plus header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralCube {
    pub data: Array3<f64>,
    pub header: CubeHeader,
}

impl SpectralCube {
    /// Create a cube, validating its shape and header
    pub fn new(data: Array3<f64>, header: CubeHeader) -> VcaResult<Self> {
        let cube = Self { data, header };
        cube.validate()?;
        Ok(cube)
    }

    /// Check shape and header consistency
    pub fn validate(&self) -> VcaResult<()> {
        let (nchan, ny, nx) = self.data.dim();
        if nchan == 0 {
            return Err(VcaError::InvalidCube("cube has no channels".to_string()));
        }
        if ny < 2 || nx < 2 {
            return Err(VcaError::InvalidCube(format!(
                "spatial shape {}x{} is too small",
                ny, nx
            )));
        }
        if !self.header.cdelt3.is_finite() || self.header.cdelt3 == 0.0 {
            return Err(VcaError::InvalidCube(format!(
                "invalid channel width CDELT3 = {}",
                self.header.cdelt3
            )));
        }
        for (key, value) in [("CDELT1", self.header.cdelt1), ("CDELT2", self.header.cdelt2)] {
            if let Some(v) = value {
                if !v.is_finite() || v == 0.0 {
                    return Err(VcaError::InvalidCube(format!("invalid {} = {}", key, v)));
                }
            }
        }
        if let Some(beam) = &self.header.beam {
            beam.validate()?;
        }
        Ok(())
    }

    /// `(channels, height, width)`
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn num_channels(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// View of one channel slice
    pub fn channel(&self, index: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), index)
    }

    /// Sum of all finite values
    pub fn total(&self) -> f64 {
        self.data.iter().filter(|v| v.is_finite()).sum()
    }

    /// Load a cube from its JSON serialization
    pub fn load_json(path: &Path) -> VcaResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let cube: SpectralCube = serde_json::from_str(&content)?;
        cube.validate()?;
        Ok(cube)
    }

    /// Write the cube as JSON
    pub fn save_json(&self, path: &Path) -> VcaResult<()> {
        let content = serde_json::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    #[test]
    fn test_cube_validation() {
        let ok = SpectralCube::new(Array3::zeros((3, 8, 8)), CubeHeader::default());
        assert!(ok.is_ok());

        let empty = SpectralCube::new(Array3::zeros((0, 8, 8)), CubeHeader::default());
        assert!(matches!(empty, Err(VcaError::InvalidCube(_))));

        let thin = SpectralCube::new(Array3::zeros((3, 1, 8)), CubeHeader::default());
        assert!(matches!(thin, Err(VcaError::InvalidCube(_))));

        let header = CubeHeader::default().with_channel_width(0.0, SpectralAxis::Velocity);
        let bad = SpectralCube::new(Array3::zeros((3, 8, 8)), header);
        assert!(matches!(bad, Err(VcaError::InvalidCube(_))));
    }

    #[test]
    fn test_beam_transfer_circular() {
        // 3 pixel FWHM
        let scale = 10.0 / 3600.0;
        let beam = Beam::circular(3.0 * scale);
        assert_relative_eq!(beam.transfer(0.0, 0.0, scale), 1.0);

        let sigma = 3.0 * FWHM_TO_SIGMA;
        let f: f64 = 0.1;
        let expected = (-2.0 * PI * PI * sigma * sigma * f * f).exp();
        assert_relative_eq!(beam.transfer(f, 0.0, scale), expected, epsilon = 1e-12);
        assert_relative_eq!(beam.transfer(0.0, f, scale), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_beam_transfer_elliptical_orientation() {
        let scale = 1.0;
        // Major axis north-south: response falls fastest along fy
        let beam = Beam::new(4.0, 2.0, 0.0);
        assert!(beam.transfer(0.1, 0.0, scale) < beam.transfer(0.0, 0.1, scale));

        // Rotated by 90 degrees the roles swap
        let rotated = Beam::new(4.0, 2.0, 90.0);
        assert!(rotated.transfer(0.1, 0.0, scale) > rotated.transfer(0.0, 0.1, scale));
    }

    #[test]
    fn test_invalid_beam_rejected() {
        let header = CubeHeader::default().with_beam(Beam::new(1.0, 2.0, 0.0));
        let cube = SpectralCube::new(Array3::zeros((1, 4, 4)), header);
        assert!(matches!(cube, Err(VcaError::InvalidCube(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cube.json");

        let data = Array3::from_shape_fn((2, 4, 5), |(c, y, x)| (c * 100 + y * 10 + x) as f64);
        let header = CubeHeader::default()
            .with_pixel_scale(0.01)
            .with_beam(Beam::circular(0.03));
        let cube = SpectralCube::new(data, header).unwrap();

        cube.save_json(&path).unwrap();
        let loaded = SpectralCube::load_json(&path).unwrap();
        assert_eq!(loaded, cube);
        assert_relative_eq!(loaded.total(), cube.total());
    }
}
