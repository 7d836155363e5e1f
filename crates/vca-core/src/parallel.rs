//! Parallel Fourier Backend
//!
//! Threaded 2D FFT using Rayon. Enable with the `parallel` feature flag.
//!
//! ```toml
//! [dependencies]
//! vca-core = { version = "0.1", features = ["parallel"] }
//! ```
//!
//! Rows (and, after the transpose, columns) are independent 1D transforms
//! sharing one plan, so the result is bit-identical to [`SerialFft`]; only
//! the wall-clock time changes. For small images the thread hand-off costs
//! more than it saves.
//!
//! [`SerialFft`]: crate::fft_utils::SerialFft

use rayon::prelude::*;
use num_complex::Complex64;
use rustfft::FftPlanner;
use std::fmt;

use crate::fft_utils::{transpose, FourierBackend};
use crate::types::{VcaError, VcaResult};

/// Rayon-backed 2D FFT running on a dedicated thread pool
pub struct ParallelFft {
    pool: rayon::ThreadPool,
    threads: usize,
    planner: FftPlanner<f64>,
    transposed: Vec<Complex64>,
}

impl fmt::Debug for ParallelFft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelFft")
            .field("threads", &self.threads)
            .finish()
    }
}

impl ParallelFft {
    /// Create a backend with `threads` workers
    pub fn new(threads: usize) -> VcaResult<Self> {
        if threads == 0 {
            return Err(VcaError::Configuration(
                "threaded transform needs at least one thread".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("vca-fft-{}", i))
            .build()
            .map_err(|e| VcaError::Configuration(format!("failed to build FFT thread pool: {}", e)))?;

        Ok(Self {
            pool,
            threads,
            planner: FftPlanner::new(),
            transposed: Vec::new(),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl FourierBackend for ParallelFft {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn fft2_inplace(&mut self, buffer: &mut [Complex64], height: usize, width: usize) {
        assert_eq!(buffer.len(), height * width);
        let fft_rows = self.planner.plan_fft_forward(width);
        let fft_cols = self.planner.plan_fft_forward(height);

        self.transposed
            .resize(height * width, Complex64::new(0.0, 0.0));
        let transposed = &mut self.transposed;

        self.pool.install(|| {
            // One scratch buffer per worker, reused across its rows
            let row_scratch = fft_rows.get_inplace_scratch_len();
            buffer.par_chunks_mut(width).for_each_init(
                || vec![Complex64::new(0.0, 0.0); row_scratch],
                |scratch, row| fft_rows.process_with_scratch(row, scratch),
            );

            transpose(buffer, transposed, height, width);
            let col_scratch = fft_cols.get_inplace_scratch_len();
            transposed.par_chunks_mut(height).for_each_init(
                || vec![Complex64::new(0.0, 0.0); col_scratch],
                |scratch, col| fft_cols.process_with_scratch(col, scratch),
            );
            transpose(transposed, buffer, width, height);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft_utils::SerialFft;

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(
            ParallelFft::new(0),
            Err(VcaError::Configuration(_))
        ));
    }

    #[test]
    fn test_matches_serial_backend() {
        let (h, w) = (32, 48);
        let input: Vec<Complex64> = (0..h * w)
            .map(|i| Complex64::new((i as f64 * 0.013).sin(), 0.0))
            .collect();

        let mut serial = SerialFft::new();
        let mut expected = input.clone();
        serial.fft2_inplace(&mut expected, h, w);

        let mut parallel = ParallelFft::new(4).unwrap();
        let mut got = input;
        parallel.fft2_inplace(&mut got, h, w);

        for (a, b) in got.iter().zip(expected.iter()) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_prime_shapes_match_serial_backend() {
        let mut serial = SerialFft::new();
        let mut parallel = ParallelFft::new(3).unwrap();
        for (h, w) in [(31, 37), (16, 16), (37, 31)] {
            let input: Vec<Complex64> = (0..h * w)
                .map(|i| Complex64::new((i as f64 * 0.07).cos(), (i as f64 * 0.029).sin()))
                .collect();

            let mut expected = input.clone();
            serial.fft2_inplace(&mut expected, h, w);
            let mut got = input;
            parallel.fft2_inplace(&mut got, h, w);

            for (a, b) in got.iter().zip(expected.iter()) {
                assert!((a - b).norm() < 1e-9, "{}x{}", h, w);
            }
        }
    }
}
