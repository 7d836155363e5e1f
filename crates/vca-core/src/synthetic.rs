//! Synthetic Red-Noise Cubes
//!
//! Generates channel maps whose power spectrum is an exact power law
//! `P(k) ∝ k'^-index`, where `k'` is the de-projected radius of
//! [`EllipticalCorrection`]. Each Fourier coefficient has amplitude
//! `k'^(-index/2)` and phase `phi(k) - phi(-k)` for uniform random `phi`,
//! which is Hermitian, so the inverse transform is real and the
//! amplitudes survive the round trip unchanged.
//!
//! Channels share the amplitudes and draw independent phases. An optional
//! Gaussian beam multiplies the coefficients by its transfer function, and
//! white noise is added in the image plane.

use ndarray::{Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

use crate::cube::{Beam, CubeHeader, SpectralAxis, SpectralCube};
use crate::fft_utils::{fft_freq, ifft2_inplace, SerialFft};
use crate::radial::EllipticalCorrection;
use crate::types::{VcaError, VcaResult};

/// Parameters of a synthetic cube
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    /// Power-law index (positive; the slope is `-index`)
    pub index: f64,
    /// Minor-to-major ratio of the anisotropy, 1 for isotropic
    pub ellipticity: f64,
    /// Orientation of the anisotropy in degrees
    pub theta: f64,
    pub seed: u64,
    /// Standard deviation of additive white noise
    pub noise_std: f64,
    /// Pixel scale in degrees written to the header
    pub pixel_scale: Option<f64>,
    /// Channel width in m/s written to the header
    pub channel_width: f64,
    /// Beam applied to the field and written to the header
    pub beam: Option<Beam>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            channels: 10,
            height: 128,
            width: 128,
            index: 3.0,
            ellipticity: 1.0,
            theta: 0.0,
            seed: 42,
            noise_std: 0.0,
            pixel_scale: None,
            channel_width: 1000.0,
            beam: None,
        }
    }
}

impl SyntheticConfig {
    pub fn new(channels: usize, size: usize, index: f64) -> Self {
        Self {
            channels,
            height: size,
            width: size,
            index,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_ellipse(mut self, ellipticity: f64, theta: f64) -> Self {
        self.ellipticity = ellipticity;
        self.theta = theta;
        self
    }

    pub fn with_pixel_scale(mut self, scale_deg: f64) -> Self {
        self.pixel_scale = Some(scale_deg);
        self
    }

    pub fn with_beam(mut self, beam: Beam) -> Self {
        self.beam = Some(beam);
        self
    }

    pub fn with_noise(mut self, noise_std: f64) -> Self {
        self.noise_std = noise_std;
        self
    }

    pub fn validate(&self) -> VcaResult<()> {
        if self.channels == 0 || self.height < 2 || self.width < 2 {
            return Err(VcaError::Configuration(format!(
                "synthetic cube shape ({}, {}, {}) is too small",
                self.channels, self.height, self.width
            )));
        }
        if !self.index.is_finite() {
            return Err(VcaError::Configuration(format!(
                "power-law index must be finite, got {}",
                self.index
            )));
        }
        if !(self.noise_std >= 0.0 && self.noise_std.is_finite()) {
            return Err(VcaError::Configuration(format!(
                "noise standard deviation must be non-negative, got {}",
                self.noise_std
            )));
        }
        EllipticalCorrection::new(self.ellipticity, self.theta).validate()?;
        if self.beam.is_some() && self.pixel_scale.is_none() {
            return Err(VcaError::Configuration(
                "a synthetic beam needs a pixel scale".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate the cube
    pub fn generate(&self) -> VcaResult<SpectralCube> {
        self.validate()?;
        let (h, w) = (self.height, self.width);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let amplitudes = self.amplitudes();
        let mut backend = SerialFft::new();

        let mut data = Array3::<f64>::zeros((self.channels, h, w));
        for mut channel in data.axis_iter_mut(Axis(0)) {
            let phases: Vec<f64> = (0..h * w).map(|_| rng.gen_range(0.0..2.0 * PI)).collect();
            let mut buffer: Vec<Complex64> = (0..h * w)
                .map(|i| {
                    let (ky, kx) = (i / w, i % w);
                    let mirror = ((h - ky) % h) * w + (w - kx) % w;
                    Complex64::from_polar(amplitudes[i], phases[i] - phases[mirror])
                })
                .collect();

            ifft2_inplace(&mut backend, &mut buffer, h, w);
            for (dst, z) in channel.iter_mut().zip(buffer.iter()) {
                *dst = z.re;
            }
        }

        if self.noise_std > 0.0 {
            let normal = Normal::new(0.0, self.noise_std)
                .map_err(|e| VcaError::Configuration(format!("invalid noise level: {}", e)))?;
            for v in data.iter_mut() {
                *v += normal.sample(&mut rng);
            }
        }

        let mut header = CubeHeader::default()
            .with_channel_width(self.channel_width, SpectralAxis::Velocity);
        if let Some(scale) = self.pixel_scale {
            header = header.with_pixel_scale(scale);
        }
        if let Some(beam) = self.beam {
            header = header.with_beam(beam);
        }

        debug!(
            channels = self.channels,
            height = h,
            width = w,
            index = self.index,
            seed = self.seed,
            "Generated synthetic red-noise cube"
        );
        SpectralCube::new(data, header)
    }

    /// Fourier amplitudes in unshifted (FFT) order, zero at DC
    fn amplitudes(&self) -> Vec<f64> {
        let (h, w) = (self.height, self.width);
        let ellipse = EllipticalCorrection::new(self.ellipticity, self.theta);
        let beam = self.beam.zip(self.pixel_scale);

        let field = Array2::from_shape_fn((h, w), |(ky, kx)| {
            let (fy, fx) = (fft_freq(ky, h), fft_freq(kx, w));
            let radius = ellipse.radius(fy, fx);
            if radius == 0.0 {
                return 0.0;
            }
            let mut amplitude = radius.powf(-self.index / 2.0);
            if let Some((beam, scale)) = beam {
                amplitude *= beam.transfer(fy, fx, scale);
            }
            amplitude
        });
        field.into_raw_vec()
    }
}
