//! 2D Spatial Power Spectrum
//!
//! Each channel slice is (optionally) apodized, transformed, and its squared
//! magnitude normalised by the pixel count. The per-channel spectra are
//! averaged and shifted so that the zero frequency sits at
//! `(height / 2, width / 2)`:
//!
//! ```text
//! P(ky, kx) = 1/N_chan * sum_c |FFT2(w * I_c)|^2 / (H * W)
//! ```
//!
//! With beam correction the averaged spectrum is divided by the beam's power
//! response `|B(k)|^2`. The beam is the same for every channel, so dividing
//! the average is identical to dividing each slice. Pixels where the response
//! drops below [`BEAM_POWER_FLOOR`] are masked instead of divided.

use ndarray::Array2;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::apodization::ApodizationKernel;
use crate::cube::SpectralCube;
use crate::fft_utils::{fft_shift_2d, shifted_freq, FourierBackend, SerialFft};
use crate::types::{VcaError, VcaResult};

/// Beam power responses below this are treated as zero
pub const BEAM_POWER_FLOOR: f64 = 1e-10;

/// Channel-averaged, fftshift-ed 2D power spectrum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSpectrum2D {
    /// Power indexed `[[ky, kx]]`, zero frequency at the centre
    pub power: Array2<f64>,
    /// `false` where the pixel must not be used (guarded beam division)
    pub valid: Array2<bool>,
}

impl PowerSpectrum2D {
    /// Assemble a spectrum from parts, checking shape and sign
    pub fn from_parts(power: Array2<f64>, valid: Array2<bool>) -> VcaResult<Self> {
        if power.dim() != valid.dim() {
            return Err(VcaError::InvalidCube(format!(
                "power shape {:?} does not match mask shape {:?}",
                power.dim(),
                valid.dim()
            )));
        }
        if power.iter().any(|&p| !(p >= 0.0) || !p.is_finite()) {
            return Err(VcaError::InvalidCube(
                "power spectrum must be finite and non-negative".to_string(),
            ));
        }
        Ok(Self { power, valid })
    }

    /// `(height, width)`
    pub fn shape(&self) -> (usize, usize) {
        self.power.dim()
    }

    /// Frequency step of the radial grid, in cycles/pixel
    pub fn freq_step(&self) -> f64 {
        let (h, w) = self.shape();
        1.0 / h.max(w) as f64
    }

    /// `(fy, fx)` in cycles/pixel of pixel `(y, x)`
    pub fn frequency(&self, y: usize, x: usize) -> (f64, f64) {
        let (h, w) = self.shape();
        (shifted_freq(y, h), shifted_freq(x, w))
    }

    /// Iterate `(fy, fx, power)` over usable pixels
    pub fn iter_valid(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        let (h, w) = self.shape();
        self.power
            .indexed_iter()
            .filter(move |&((y, x), _)| self.valid[[y, x]])
            .map(move |((y, x), &p)| (shifted_freq(y, h), shifted_freq(x, w), p))
    }

    /// Number of usable pixels
    pub fn num_valid(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Total power over usable pixels
    pub fn total_power(&self) -> f64 {
        self.iter_valid().map(|(_, _, p)| p).sum()
    }
}

/// Fourier backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FftOptions {
    /// Use the threaded backend when available
    pub threaded: bool,
    /// Worker threads for the threaded backend
    pub threads: usize,
}

impl Default for FftOptions {
    fn default() -> Self {
        Self {
            threaded: false,
            threads: 1,
        }
    }
}

impl FftOptions {
    pub fn threaded(threads: usize) -> Self {
        Self {
            threaded: true,
            threads,
        }
    }

    pub fn validate(&self) -> VcaResult<()> {
        if self.threaded && self.threads == 0 {
            return Err(VcaError::Configuration(
                "threaded transform needs at least one thread".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the backend, falling back to [`SerialFft`] when the threaded one
    /// is unavailable
    pub fn backend(&self) -> Box<dyn FourierBackend> {
        if !self.threaded {
            return Box::new(SerialFft::new());
        }
        self.threaded_backend()
    }

    #[cfg(feature = "parallel")]
    fn threaded_backend(&self) -> Box<dyn FourierBackend> {
        match crate::parallel::ParallelFft::new(self.threads) {
            Ok(backend) => Box::new(backend),
            Err(e) => {
                warn!("Threaded FFT unavailable ({}), using serial transform", e);
                Box::new(SerialFft::new())
            }
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn threaded_backend(&self) -> Box<dyn FourierBackend> {
        warn!(
            threads = self.threads,
            "Threaded FFT requested but the `parallel` feature is disabled, using serial transform"
        );
        Box::new(SerialFft::new())
    }
}

/// Computes [`PowerSpectrum2D`] from a cube
#[derive(Debug)]
pub struct PowerSpectrumEstimator {
    apodize: ApodizationKernel,
    beam_correct: bool,
    backend: Box<dyn FourierBackend>,
}

impl Default for PowerSpectrumEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerSpectrumEstimator {
    /// Estimator without apodization or beam correction, serial FFT
    pub fn new() -> Self {
        Self {
            apodize: ApodizationKernel::None,
            beam_correct: false,
            backend: Box::new(SerialFft::new()),
        }
    }

    pub fn with_apodization(mut self, kernel: ApodizationKernel) -> Self {
        self.apodize = kernel;
        self
    }

    pub fn with_beam_correction(mut self, enable: bool) -> Self {
        self.beam_correct = enable;
        self
    }

    pub fn with_backend(mut self, backend: Box<dyn FourierBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn apodization(&self) -> ApodizationKernel {
        self.apodize
    }

    /// Compute the channel-averaged 2D power spectrum of `cube`
    pub fn compute(&mut self, cube: &SpectralCube) -> VcaResult<PowerSpectrum2D> {
        cube.validate()?;
        let (nchan, h, w) = cube.shape();
        let window = self.apodize.generate((h, w))?;

        debug!(
            channels = nchan,
            height = h,
            width = w,
            backend = self.backend.name(),
            apodize = self.apodize.name(),
            "Computing 2D power spectrum"
        );

        let mut accumulated = vec![0.0f64; h * w];
        let mut buffer = vec![Complex64::new(0.0, 0.0); h * w];
        let mut non_finite = 0usize;

        for c in 0..nchan {
            let slice = cube.channel(c);
            for ((dst, &v), &wv) in buffer.iter_mut().zip(slice.iter()).zip(window.iter()) {
                let v = if v.is_finite() {
                    v
                } else {
                    non_finite += 1;
                    0.0
                };
                *dst = Complex64::new(v * wv, 0.0);
            }

            self.backend.fft2_inplace(&mut buffer, h, w);

            for (acc, z) in accumulated.iter_mut().zip(buffer.iter()) {
                *acc += z.norm_sqr();
            }
        }

        if non_finite > 0 {
            debug!(count = non_finite, "Replaced non-finite pixels with zero");
        }

        let norm = 1.0 / (nchan * h * w) as f64;
        for p in accumulated.iter_mut() {
            *p *= norm;
        }

        let shifted = fft_shift_2d(&accumulated, h, w);
        let mut power = Array2::from_shape_fn((h, w), |(y, x)| shifted[y * w + x]);
        let mut valid = Array2::from_elem((h, w), true);

        if self.beam_correct {
            let masked = Self::deconvolve_beam(cube, &mut power, &mut valid)?;
            debug!(masked, "Applied beam correction");
        }

        Ok(PowerSpectrum2D { power, valid })
    }

    /// Divide by the beam power response; returns the number of masked pixels
    fn deconvolve_beam(
        cube: &SpectralCube,
        power: &mut Array2<f64>,
        valid: &mut Array2<bool>,
    ) -> VcaResult<usize> {
        let header = &cube.header;
        let beam = header.beam.ok_or_else(|| {
            VcaError::Configuration("beam correction requested but the header has no beam".to_string())
        })?;
        let scale = header.pixel_scale().ok_or_else(|| {
            VcaError::Configuration(
                "beam correction requested but the header has no pixel scale (CDELT2)".to_string(),
            )
        })?;
        if let Some(cdelt1) = header.cdelt1 {
            if ((cdelt1.abs() - scale) / scale).abs() > 1e-6 {
                warn!(
                    cdelt1,
                    cdelt2 = scale,
                    "Non-square pixels; beam response uses the CDELT2 scale"
                );
            }
        }

        let (h, w) = power.dim();
        let mut masked = 0usize;
        for ((y, x), p) in power.indexed_iter_mut() {
            let response = beam.transfer(shifted_freq(y, h), shifted_freq(x, w), scale);
            let response_power = response * response;
            if response_power < BEAM_POWER_FLOOR {
                *p = 0.0;
                valid[[y, x]] = false;
                masked += 1;
            } else {
                *p /= response_power;
            }
        }
        Ok(masked)
    }
}
