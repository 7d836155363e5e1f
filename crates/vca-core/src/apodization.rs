//! Apodization Kernels
//!
//! Radially symmetric windows applied to each channel before the Fourier
//! transform to suppress the spurious high-frequency power produced by
//! sharp image edges.
//!
//! All kernels are members of the split-cosine-bell family, measured from the
//! image centre in pixels:
//!
//! ```text
//!   1 ─────────┐
//!              │╲  cosine taper
//!              │  ╲
//!   0          │    ╲________
//!   └──────────┴─────┴────────> r
//!           r_inner  r_inner + r_taper
//!
//!   npts    = (min(H, W) - 1) / 2
//!   r_inner = beta * npts
//!   r_taper = floor(alpha * npts)
//! ```
//!
//! | Kernel          | alpha   | beta        |
//! |-----------------|---------|-------------|
//! | Hanning         | 1       | 0           |
//! | CosineBell      | alpha   | 0           |
//! | SplitCosineBell | alpha   | beta        |
//! | Tukey           | alpha   | 1 - alpha   |

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::types::{VcaError, VcaResult};

/// Apodization window applied to channel slices
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kernel", rename_all = "lowercase")]
pub enum ApodizationKernel {
    /// No windowing
    #[default]
    None,
    /// Full-radius cosine taper
    Hanning,
    /// Cosine taper of width `alpha` starting at the centre
    CosineBell { alpha: f64 },
    /// Flat core of radius `beta` followed by a taper of width `alpha`
    SplitCosineBell { alpha: f64, beta: f64 },
    /// Flat core with a taper over the outer `alpha` fraction
    Tukey { alpha: f64 },
}

impl ApodizationKernel {
    /// Build a kernel from its name and shape parameters.
    ///
    /// Parameters not used by the named kernel are ignored.
    pub fn from_name(name: &str, alpha: f64, beta: f64) -> VcaResult<Self> {
        let kernel = match name.to_lowercase().as_str() {
            "none" => ApodizationKernel::None,
            "hanning" | "hann" => ApodizationKernel::Hanning,
            "cosinebell" | "cosine-bell" => ApodizationKernel::CosineBell { alpha },
            "splitcosinebell" | "split-cosine-bell" => {
                ApodizationKernel::SplitCosineBell { alpha, beta }
            }
            "tukey" => ApodizationKernel::Tukey { alpha },
            other => {
                return Err(VcaError::Configuration(format!(
                    "unsupported apodization kernel '{}' (expected none, hanning, cosinebell, splitcosinebell or tukey)",
                    other
                )))
            }
        };
        kernel.validate()?;
        Ok(kernel)
    }

    /// Kernel name as accepted by [`ApodizationKernel::from_name`]
    pub fn name(&self) -> &'static str {
        match self {
            ApodizationKernel::None => "none",
            ApodizationKernel::Hanning => "hanning",
            ApodizationKernel::CosineBell { .. } => "cosinebell",
            ApodizationKernel::SplitCosineBell { .. } => "splitcosinebell",
            ApodizationKernel::Tukey { .. } => "tukey",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ApodizationKernel::None)
    }

    /// Check the shape parameters
    pub fn validate(&self) -> VcaResult<()> {
        let (alpha, beta) = match self.split_cosine_params() {
            Some(params) => params,
            None => return Ok(()),
        };
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(VcaError::Configuration(format!(
                "{} alpha must be in (0, 1], got {}",
                self.name(),
                alpha
            )));
        }
        if !(0.0..1.0).contains(&beta) {
            return Err(VcaError::Configuration(format!(
                "{} beta must be in [0, 1), got {}",
                self.name(),
                beta
            )));
        }
        Ok(())
    }

    /// Equivalent `(alpha, beta)` of the split-cosine-bell family
    fn split_cosine_params(&self) -> Option<(f64, f64)> {
        match *self {
            ApodizationKernel::None => None,
            ApodizationKernel::Hanning => Some((1.0, 0.0)),
            ApodizationKernel::CosineBell { alpha } => Some((alpha, 0.0)),
            ApodizationKernel::SplitCosineBell { alpha, beta } => Some((alpha, beta)),
            ApodizationKernel::Tukey { alpha } => Some((alpha, 1.0 - alpha)),
        }
    }

    /// Generate the multiplicative mask for an image of `shape` (rows, cols)
    pub fn generate(&self, shape: (usize, usize)) -> VcaResult<Array2<f64>> {
        self.validate()?;
        let (alpha, beta) = match self.split_cosine_params() {
            Some(params) => params,
            None => return Ok(Array2::ones(shape)),
        };

        let (ny, nx) = shape;
        let cy = (ny as f64 - 1.0) / 2.0;
        let cx = (nx as f64 - 1.0) / 2.0;
        let npts = (ny.min(nx) as f64 - 1.0) / 2.0;
        let r_inner = beta * npts;
        let r_taper = (alpha * npts).floor();
        let r_cut = r_inner + r_taper;

        Ok(Array2::from_shape_fn(shape, |(y, x)| {
            let r = ((y as f64 - cy).powi(2) + (x as f64 - cx).powi(2)).sqrt();
            if r < r_inner {
                1.0
            } else if r_taper == 0.0 {
                // Degenerate taper collapses to a hard edge at r_inner
                if r <= r_inner {
                    1.0
                } else {
                    0.0
                }
            } else if r > r_cut {
                0.0
            } else {
                0.5 * (1.0 + (PI * (r - r_inner) / r_taper).cos())
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_kernels() -> Vec<ApodizationKernel> {
        vec![
            ApodizationKernel::Hanning,
            ApodizationKernel::CosineBell { alpha: 0.3 },
            ApodizationKernel::SplitCosineBell {
                alpha: 0.3,
                beta: 0.6,
            },
            ApodizationKernel::Tukey { alpha: 0.3 },
        ]
    }

    #[test]
    fn test_none_is_ones() {
        let mask = ApodizationKernel::None.generate((16, 12)).unwrap();
        assert_eq!(mask.dim(), (16, 12));
        assert!(mask.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_kernels_bounded_and_peaked() {
        for kernel in all_kernels() {
            let mask = kernel.generate((64, 64)).unwrap();
            assert!(
                mask.iter().all(|&v| (0.0..=1.0).contains(&v)),
                "{} out of [0, 1]",
                kernel.name()
            );
            // Centre pixels are close to 1, corners are 0
            assert!(mask[[32, 32]] > 0.9, "{} centre {}", kernel.name(), mask[[32, 32]]);
            assert_eq!(mask[[0, 0]], 0.0, "{} corner", kernel.name());
            assert_eq!(mask[[63, 63]], 0.0, "{} corner", kernel.name());
        }
    }

    #[test]
    fn test_kernels_radially_symmetric() {
        for kernel in all_kernels() {
            let mask = kernel.generate((33, 33)).unwrap();
            for y in 0..33 {
                for x in 0..33 {
                    let v = mask[[y, x]];
                    assert!((v - mask[[32 - y, x]]).abs() < 1e-12);
                    assert!((v - mask[[y, 32 - x]]).abs() < 1e-12);
                    assert!((v - mask[[x, y]]).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_tukey_flat_core() {
        let mask = ApodizationKernel::Tukey { alpha: 0.3 }
            .generate((101, 101))
            .unwrap();
        // npts = 50, r_inner = 35: everything within 35 pixels is untouched
        assert_eq!(mask[[50, 50]], 1.0);
        assert_eq!(mask[[50, 84]], 1.0);
        assert!(mask[[50, 90]] < 1.0);
        assert!(mask[[50, 100]].abs() < 1e-12);
    }

    #[test]
    fn test_hanning_edge_decays_to_zero() {
        let mask = ApodizationKernel::Hanning.generate((65, 65)).unwrap();
        // r = npts exactly at the middle of each edge
        assert!(mask[[32, 0]].abs() < 1e-12);
        assert!(mask[[0, 32]].abs() < 1e-12);
        assert!((mask[[32, 16]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(
            ApodizationKernel::from_name("TUKEY", 0.3, 0.8).unwrap(),
            ApodizationKernel::Tukey { alpha: 0.3 }
        );
        assert_eq!(
            ApodizationKernel::from_name("splitcosinebell", 0.3, 0.8).unwrap(),
            ApodizationKernel::SplitCosineBell {
                alpha: 0.3,
                beta: 0.8
            }
        );
        assert_eq!(
            ApodizationKernel::from_name("hanning", 0.3, 0.8).unwrap(),
            ApodizationKernel::Hanning
        );
    }

    #[test]
    fn test_unsupported_name_is_config_error() {
        let err = ApodizationKernel::from_name("blackman", 0.3, 0.8).unwrap_err();
        assert!(matches!(err, VcaError::Configuration(_)));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(ApodizationKernel::from_name("tukey", 0.0, 0.0).is_err());
        assert!(ApodizationKernel::from_name("cosinebell", 1.5, 0.0).is_err());
        assert!(ApodizationKernel::from_name("splitcosinebell", 0.3, 1.0).is_err());
    }
}
