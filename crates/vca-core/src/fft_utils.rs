//! FFT Utilities for 2D Power Spectra
//!
//! Channel slices are transformed as row-major `height x width` buffers of
//! [`Complex64`]. A 2D DFT is a pass of 1D transforms over the rows, a
//! transpose, a pass over the (former) columns and a transpose back:
//!
//! ```text
//!   rows ──FFT──> transpose ──FFT──> transpose
//!   [h x w]        [w x h]            [h x w]
//! ```
//!
//! The pass strategy is pluggable through [`FourierBackend`] so that a
//! threaded implementation (see `parallel`) can be swapped in without
//! changing results: every 1D transform is computed independently with the
//! same plan, so the output is identical whichever backend runs it.

use num_complex::Complex64;
use rustfft::FftPlanner;
use std::fmt;

/// Strategy for computing forward 2D DFTs
pub trait FourierBackend: fmt::Debug {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// In-place forward (unnormalised) 2D DFT of a row-major buffer
    fn fft2_inplace(&mut self, buffer: &mut [Complex64], height: usize, width: usize);
}

/// Single-threaded rustfft backend (the default)
pub struct SerialFft {
    planner: FftPlanner<f64>,
    transposed: Vec<Complex64>,
    scratch: Vec<Complex64>,
}

impl fmt::Debug for SerialFft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialFft")
            .field("buffer_len", &self.transposed.len())
            .field("scratch_len", &self.scratch.len())
            .finish()
    }
}

impl Default for SerialFft {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialFft {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            transposed: Vec::new(),
            scratch: Vec::new(),
        }
    }
}

impl FourierBackend for SerialFft {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn fft2_inplace(&mut self, buffer: &mut [Complex64], height: usize, width: usize) {
        assert_eq!(buffer.len(), height * width);
        let fft_rows = self.planner.plan_fft_forward(width);
        let fft_cols = self.planner.plan_fft_forward(height);

        let scratch_len = fft_rows
            .get_inplace_scratch_len()
            .max(fft_cols.get_inplace_scratch_len());
        self.scratch.resize(scratch_len, Complex64::new(0.0, 0.0));

        // rustfft processes every `width`-long chunk of the buffer
        let row_scratch = fft_rows.get_inplace_scratch_len();
        fft_rows.process_with_scratch(buffer, &mut self.scratch[..row_scratch]);

        self.transposed
            .resize(height * width, Complex64::new(0.0, 0.0));
        transpose(buffer, &mut self.transposed, height, width);
        let col_scratch = fft_cols.get_inplace_scratch_len();
        fft_cols.process_with_scratch(&mut self.transposed, &mut self.scratch[..col_scratch]);
        transpose(&self.transposed, buffer, width, height);
    }
}

/// Transpose a row-major `rows x cols` buffer into `dst` (`cols x rows`)
pub fn transpose(src: &[Complex64], dst: &mut [Complex64], rows: usize, cols: usize) {
    debug_assert_eq!(src.len(), rows * cols);
    debug_assert_eq!(dst.len(), rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            dst[c * rows + r] = src[r * cols + c];
        }
    }
}

/// Inverse (normalised) 2D DFT through a forward backend.
///
/// Uses `ifft(x) = conj(fft(conj(x))) / N`.
pub fn ifft2_inplace(
    backend: &mut dyn FourierBackend,
    buffer: &mut [Complex64],
    height: usize,
    width: usize,
) {
    for v in buffer.iter_mut() {
        *v = v.conj();
    }
    backend.fft2_inplace(buffer, height, width);
    let scale = 1.0 / (height * width) as f64;
    for v in buffer.iter_mut() {
        *v = v.conj() * scale;
    }
}

/// Sample frequency of DFT bin `index` for a transform of length `n`,
/// in cycles per sample (numpy `fftfreq` ordering).
pub fn fft_freq(index: usize, n: usize) -> f64 {
    let k = if index < n.div_ceil(2) {
        index as f64
    } else {
        index as f64 - n as f64
    };
    k / n as f64
}

/// Frequency of row/column `index` of an fftshift-ed axis of length `n`
pub fn shifted_freq(index: usize, n: usize) -> f64 {
    (index as f64 - (n / 2) as f64) / n as f64
}

/// 2D FFT shift - move the zero frequency to `(height / 2, width / 2)`
pub fn fft_shift_2d<T: Copy + Default>(data: &[T], height: usize, width: usize) -> Vec<T> {
    let mut shifted = vec![T::default(); data.len()];
    let (dy, dx) = (height / 2, width / 2);
    for y in 0..height {
        let sy = (y + dy) % height;
        for x in 0..width {
            let sx = (x + dx) % width;
            shifted[sy * width + sx] = data[y * width + x];
        }
    }
    shifted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn naive_dft2(input: &[Complex64], h: usize, w: usize) -> Vec<Complex64> {
        let mut out = vec![Complex64::new(0.0, 0.0); h * w];
        for ky in 0..h {
            for kx in 0..w {
                let mut acc = Complex64::new(0.0, 0.0);
                for y in 0..h {
                    for x in 0..w {
                        let phase = -2.0
                            * PI
                            * ((ky * y) as f64 / h as f64 + (kx * x) as f64 / w as f64);
                        acc += input[y * w + x] * Complex64::new(phase.cos(), phase.sin());
                    }
                }
                out[ky * w + kx] = acc;
            }
        }
        out
    }

    #[test]
    fn test_fft2_matches_naive_dft() {
        let (h, w) = (6, 8);
        let input: Vec<Complex64> = (0..h * w)
            .map(|i| Complex64::new((i as f64 * 0.37).sin(), (i as f64 * 0.11).cos()))
            .collect();

        let mut buffer = input.clone();
        let mut backend = SerialFft::new();
        backend.fft2_inplace(&mut buffer, h, w);

        let expected = naive_dft2(&input, h, w);
        for (got, want) in buffer.iter().zip(expected.iter()) {
            assert!((got - want).norm() < 1e-9);
        }
    }

    #[test]
    fn test_backend_reused_across_shapes() {
        // Prime lengths plan algorithms that need scratch space
        let mut backend = SerialFft::new();
        for (h, w) in [(13, 17), (6, 8), (17, 13), (11, 11)] {
            let input: Vec<Complex64> = (0..h * w)
                .map(|i| Complex64::new((i as f64 * 0.21).cos(), (i as f64 * 0.05).sin()))
                .collect();
            let mut buffer = input.clone();
            backend.fft2_inplace(&mut buffer, h, w);

            let expected = naive_dft2(&input, h, w);
            for (got, want) in buffer.iter().zip(expected.iter()) {
                assert!((got - want).norm() < 1e-9, "{}x{}", h, w);
            }
        }
    }

    #[test]
    fn test_inverse_identity() {
        let (h, w) = (8, 5);
        let input: Vec<Complex64> = (0..h * w)
            .map(|i| Complex64::new(i as f64, (i * 2) as f64))
            .collect();

        let mut backend = SerialFft::new();
        let mut buffer = input.clone();
        backend.fft2_inplace(&mut buffer, h, w);
        ifft2_inplace(&mut backend, &mut buffer, h, w);

        for (orig, recovered) in input.iter().zip(buffer.iter()) {
            assert!((orig - recovered).norm() < 1e-9);
        }
    }

    #[test]
    fn test_fft_freq_ordering() {
        let even: Vec<f64> = (0..4).map(|i| fft_freq(i, 4)).collect();
        assert_eq!(even, vec![0.0, 0.25, -0.5, -0.25]);

        let odd: Vec<f64> = (0..5).map(|i| fft_freq(i, 5)).collect();
        assert_eq!(odd, vec![0.0, 0.2, 0.4, -0.4, -0.2]);
    }

    #[test]
    fn test_shift_puts_dc_at_centre() {
        for &(h, w) in &[(4usize, 4usize), (5, 6), (7, 3)] {
            let mut data = vec![0.0f64; h * w];
            data[0] = 1.0;
            let shifted = fft_shift_2d(&data, h, w);
            assert_eq!(shifted[(h / 2) * w + w / 2], 1.0);
            assert_eq!(shifted_freq(h / 2, h), 0.0);
        }
    }

    #[test]
    fn test_shift_matches_shifted_freq() {
        let n = 6;
        let freqs: Vec<f64> = (0..n).map(|i| fft_freq(i, n)).collect();
        // Shift a single row (height 1)
        let shifted = fft_shift_2d(&freqs, 1, n);
        for (i, f) in shifted.iter().enumerate() {
            assert!((f - shifted_freq(i, n)).abs() < 1e-15);
        }
    }
}
