//! # Velocity Channel Analysis
//!
//! This crate estimates the spatial power spectrum of spectral-line data
//! cubes (position-position-velocity) and fits power laws to it, following
//! the Velocity Channel Analysis technique used to characterise turbulence
//! in the interstellar medium.
//!
//! ## Overview
//!
//! - **Apodization**: taper kernels that suppress edge ringing
//! - **Regridding**: spectral down-sampling to a coarser channel width
//! - **Power Spectrum**: channel-averaged 2D spectrum with optional beam
//!   deconvolution
//! - **Radial Profile**: azimuthal averaging with wedges and elliptical
//!   de-projection
//! - **Fitting**: log-log power-law fits in 1D and 2D, with an optional
//!   break point
//! - **Distance**: significance of the slope difference between two datasets
//!
//! ## Signal Flow
//!
//! ```text
//! cube → regrid → apodize → FFT → |F|² channel mean → shift → beam
//!      → radial profile → 1D fit (+ 2D fit) → distance
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use vca_core::prelude::*;
//!
//! let cube = SyntheticConfig::new(8, 128, 3.0).generate()?;
//! let config = RunConfig::default()
//!     .with_low_cut(FrequencyQuantity::per_pixel(0.02))
//!     .with_apodization(ApodizationKernel::Tukey { alpha: 0.3 });
//!
//! let run = Vca::regridded(&cube, ChannelWidth::Pixels(2.0))?.run(&config)?;
//! println!("index = {:.2}", run.slope());
//! # Ok::<(), vca_core::VcaError>(())
//! ```

pub mod apodization;
pub mod config;
pub mod cube;
pub mod distance;
pub mod fft_utils;
pub mod fitting;
pub mod logging;
pub mod power_spectrum;
pub mod radial;
pub mod regrid;
pub mod synthetic;
pub mod types;
pub mod units;
pub mod vca;

// Threaded transforms (requires `parallel` feature)
#[cfg(feature = "parallel")]
pub mod parallel;

// Re-export main types
pub use apodization::ApodizationKernel;
pub use config::VcaConfig;
pub use cube::{Beam, CubeHeader, SpectralAxis, SpectralCube};
pub use distance::{slope_distance, DistanceInput, DistanceResult, VcaDistance};
pub use fft_utils::{FourierBackend, SerialFft};
pub use fitting::{fit_1d, fit_2d, BreakPoint, FitOptions, FitResult};
pub use power_spectrum::{FftOptions, PowerSpectrum2D, PowerSpectrumEstimator};
pub use radial::{
    radial_profile, AzimuthalWedge, EllipticalCorrection, RadialBin, RadialOptions,
    RadialProfile1D,
};
pub use regrid::{regrid_cube, ChannelWidth, FrequencyUnit, VelocityUnit};
pub use synthetic::SyntheticConfig;
pub use types::{VcaError, VcaResult};
pub use units::{AngleUnit, FrequencyQuantity, Length, LengthUnit, UnitContext};
pub use vca::{RunConfig, Vca, VcaRun, VcaSnapshot};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::apodization::ApodizationKernel;
    pub use crate::cube::{Beam, CubeHeader, SpectralAxis, SpectralCube};
    pub use crate::distance::{DistanceInput, DistanceResult, VcaDistance};
    pub use crate::fitting::{FitOptions, FitResult};
    pub use crate::radial::{AzimuthalWedge, EllipticalCorrection, RadialOptions};
    pub use crate::regrid::ChannelWidth;
    pub use crate::synthetic::SyntheticConfig;
    pub use crate::types::{VcaError, VcaResult};
    pub use crate::units::{AngleUnit, FrequencyQuantity, Length, LengthUnit};
    pub use crate::vca::{RunConfig, Vca, VcaRun};
}
