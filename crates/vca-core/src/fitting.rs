//! Power-Law Fitting
//!
//! Fits `log10(P) = slope * log10(f) + intercept` to a radial profile (1D) or
//! directly to the pixels of a 2D spectrum.
//!
//! - Ordinary or weighted least squares; weights for the 1D fit are the
//!   log-space inverse variances `(P / error)^2`.
//! - Parameter covariance `s^2 (X^T W X)^-1` with `s^2 = sum(w r^2) / (n - p)`.
//! - Optional single breakpoint by segmented regression: the break is
//!   refined by iterating
//!
//! ```text
//!   y = b0 + b1 x + b2 (x - psi)+ - g I(x > psi)
//!   psi <- psi + g / b2
//! ```
//!
//! until the update is below `1e-8` in `log10(f)`.

use serde::{Deserialize, Serialize};
use std::f64::consts::LN_10;
use tracing::{debug, warn};

use crate::power_spectrum::PowerSpectrum2D;
use crate::radial::{RadialProfile1D, NYQUIST};
use crate::types::{VcaError, VcaResult};
use crate::units::{FrequencyQuantity, UnitContext};

/// Minimum points for any fit
pub const MIN_FIT_POINTS: usize = 2;

/// Convergence threshold for the break location, in `log10(f)`
const BREAK_TOLERANCE: f64 = 1e-8;

/// Relative slack on inclusive cutoffs
const CUT_TOLERANCE: f64 = 1e-9;

/// Fit options shared by 1D runs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Weighted least squares using the bin errors
    pub weighted: bool,
    /// Initial guess for a single break in the power law
    pub breakpoint: Option<FrequencyQuantity>,
    /// Iteration limit for the break search
    pub max_iterations: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            weighted: false,
            breakpoint: None,
            max_iterations: 100,
        }
    }
}

impl FitOptions {
    pub fn weighted() -> Self {
        Self {
            weighted: true,
            ..Self::default()
        }
    }

    pub fn with_breakpoint(mut self, guess: FrequencyQuantity) -> Self {
        self.breakpoint = Some(guess);
        self
    }

    pub fn validate(&self) -> VcaResult<()> {
        if self.breakpoint.is_some() && self.max_iterations == 0 {
            return Err(VcaError::Configuration(
                "breakpoint fit needs max_iterations > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Location and upper-segment slope of a fitted break
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakPoint {
    /// Break frequency in cycles/pixel
    pub frequency: f64,
    pub frequency_err: f64,
    /// Slope above the break
    pub slope_above: f64,
    pub slope_above_err: f64,
}

/// Result of a power-law fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Slope (below the break, when one was fitted)
    pub slope: f64,
    pub slope_err: f64,
    /// `log10` amplitude at `f = 1` cycle/pixel
    pub intercept: f64,
    pub intercept_err: f64,
    /// Cutoffs used, cycles/pixel
    pub low_cut: f64,
    pub high_cut: f64,
    pub n_points: usize,
    pub weighted: bool,
    pub r_squared: f64,
    pub breakpoint: Option<BreakPoint>,
}

impl FitResult {
    /// Model power at `frequency` (cycles/pixel)
    pub fn predict(&self, frequency: f64) -> f64 {
        let x = frequency.log10();
        let mut log_p = self.intercept + self.slope * x;
        if let Some(bp) = &self.breakpoint {
            let xb = bp.frequency.log10();
            if x > xb {
                log_p += (bp.slope_above - self.slope) * (x - xb);
            }
        }
        10f64.powf(log_p)
    }
}

/// Convert optional cutoffs to cycles/pixel.
///
/// A missing upper cutoff defaults to the Nyquist frequency; the lower
/// default depends on the binned data and is left to the caller.
pub fn resolve_cutoffs(
    low_cut: Option<&FrequencyQuantity>,
    high_cut: Option<&FrequencyQuantity>,
    ctx: &UnitContext,
) -> VcaResult<(Option<f64>, f64)> {
    let low = low_cut.map(|q| q.to_pixel(ctx)).transpose()?;
    let high = match high_cut {
        Some(q) => q.to_pixel(ctx)?,
        None => NYQUIST,
    };
    Ok((low, high))
}

fn in_range(f: f64, low_cut: f64, high_cut: f64) -> bool {
    f >= low_cut * (1.0 - CUT_TOLERANCE) && f <= high_cut * (1.0 + CUT_TOLERANCE)
}

/// Fit a power law to a radial profile
pub fn fit_1d(
    profile: &RadialProfile1D,
    low_cut: f64,
    high_cut: f64,
    options: &FitOptions,
    ctx: &UnitContext,
) -> VcaResult<FitResult> {
    options.validate()?;
    let selected: Vec<_> = profile
        .iter()
        .filter(|b| in_range(b.frequency, low_cut, high_cut) && b.power > 0.0)
        .collect();
    if selected.len() < MIN_FIT_POINTS {
        return Err(VcaError::FitRange {
            low_cut,
            high_cut,
            found: selected.len(),
            required: MIN_FIT_POINTS,
        });
    }

    let x: Vec<f64> = selected.iter().map(|b| b.frequency.log10()).collect();
    let y: Vec<f64> = selected.iter().map(|b| b.power.log10()).collect();
    let w: Vec<f64> = if options.weighted {
        if selected.iter().all(|b| b.error.is_some_and(|e| e > 0.0)) {
            selected
                .iter()
                .map(|b| match b.error {
                    Some(e) => (b.power / e).powi(2),
                    None => b.count as f64,
                })
                .collect()
        } else {
            debug!("Some bins lack errors; weighting by pixel count");
            selected.iter().map(|b| b.count as f64).collect()
        }
    } else {
        vec![1.0; x.len()]
    };

    let mut result = None;
    if let Some(guess) = &options.breakpoint {
        let psi0 = guess.to_pixel(ctx)?.log10();
        match segmented_fit(&x, &y, &w, psi0, options.max_iterations) {
            Some(seg) => result = Some(seg),
            None => warn!(
                guess = %guess,
                "Breakpoint fit failed; falling back to a single power law"
            ),
        }
    }

    let (fit, breakpoint) = match result {
        Some((fit, bp)) => (fit, Some(bp)),
        None => (
            fit_line(&x, &y, &w).ok_or_else(|| degenerate(low_cut, high_cut, x.len()))?,
            None,
        ),
    };

    let result = FitResult {
        slope: fit.coef[1],
        slope_err: fit.std_err(1),
        intercept: fit.coef[0],
        intercept_err: fit.std_err(0),
        low_cut,
        high_cut,
        n_points: x.len(),
        weighted: options.weighted,
        r_squared: fit.r_squared,
        breakpoint,
    };
    debug!(
        slope = result.slope,
        slope_err = result.slope_err,
        n_points = result.n_points,
        "1D power-law fit"
    );
    Ok(result)
}

/// Fit a power law to every valid, non-DC pixel of a 2D spectrum
pub fn fit_2d(ps: &PowerSpectrum2D, low_cut: f64, high_cut: f64) -> VcaResult<FitResult> {
    let mut x = Vec::new();
    let mut y = Vec::new();
    for (fy, fx, power) in ps.iter_valid() {
        let f = fy.hypot(fx);
        if f > 0.0 && power > 0.0 && in_range(f, low_cut, high_cut) {
            x.push(f.log10());
            y.push(power.log10());
        }
    }
    if x.len() < MIN_FIT_POINTS {
        return Err(VcaError::FitRange {
            low_cut,
            high_cut,
            found: x.len(),
            required: MIN_FIT_POINTS,
        });
    }

    let w = vec![1.0; x.len()];
    let fit = fit_line(&x, &y, &w).ok_or_else(|| degenerate(low_cut, high_cut, x.len()))?;
    debug!(slope = fit.coef[1], n_points = x.len(), "2D power-law fit");
    Ok(FitResult {
        slope: fit.coef[1],
        slope_err: fit.std_err(1),
        intercept: fit.coef[0],
        intercept_err: fit.std_err(0),
        low_cut,
        high_cut,
        n_points: x.len(),
        weighted: false,
        r_squared: fit.r_squared,
        breakpoint: None,
    })
}

/// All selected points share one frequency, so no slope is defined
fn degenerate(low_cut: f64, high_cut: f64, found: usize) -> VcaError {
    VcaError::FitRange {
        low_cut,
        high_cut,
        found: found.min(1),
        required: MIN_FIT_POINTS,
    }
}

// ── Least squares ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct LinearFit {
    coef: Vec<f64>,
    cov: Vec<Vec<f64>>,
    r_squared: f64,
}

impl LinearFit {
    fn std_err(&self, i: usize) -> f64 {
        self.cov[i][i].max(0.0).sqrt()
    }
}

/// `[intercept, slope]` fit of `y` on `x`
fn fit_line(x: &[f64], y: &[f64], w: &[f64]) -> Option<LinearFit> {
    let design: Vec<Vec<f64>> = x.iter().map(|&xi| vec![1.0, xi]).collect();
    weighted_least_squares(&design, y, w)
}

/// Solve the weighted normal equations for a design matrix given by rows
fn weighted_least_squares(design: &[Vec<f64>], y: &[f64], w: &[f64]) -> Option<LinearFit> {
    let n = y.len();
    let p = design.first()?.len();
    if n < p {
        return None;
    }

    let mut xtwx = vec![vec![0.0; p]; p];
    let mut xtwy = vec![0.0; p];
    for ((row, &yi), &wi) in design.iter().zip(y).zip(w) {
        for i in 0..p {
            xtwy[i] += wi * row[i] * yi;
            for j in 0..p {
                xtwx[i][j] += wi * row[i] * row[j];
            }
        }
    }

    let inv = invert_matrix(&xtwx)?;
    let coef: Vec<f64> = (0..p)
        .map(|i| (0..p).map(|j| inv[i][j] * xtwy[j]).sum())
        .collect();

    let w_sum: f64 = w.iter().sum();
    let y_mean = y.iter().zip(w).map(|(yi, wi)| yi * wi).sum::<f64>() / w_sum;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for ((row, &yi), &wi) in design.iter().zip(y).zip(w) {
        let predicted: f64 = row.iter().zip(&coef).map(|(a, b)| a * b).sum();
        ss_res += wi * (yi - predicted).powi(2);
        ss_tot += wi * (yi - y_mean).powi(2);
    }

    let scale = if n > p { ss_res / (n - p) as f64 } else { 0.0 };
    let cov = inv
        .iter()
        .map(|row| row.iter().map(|v| v * scale).collect())
        .collect();
    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    Some(LinearFit {
        coef,
        cov,
        r_squared,
    })
}

/// Gauss-Jordan inverse with partial pivoting; `None` if singular
fn invert_matrix(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let max_abs = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |m, v| m.max(v.abs()));
    if max_abs == 0.0 || !max_abs.is_finite() {
        return None;
    }

    // Augmented [A | I]
    let mut aug: Vec<Vec<f64>> = a
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut r = row.clone();
            r.extend((0..n).map(|j| if i == j { 1.0 } else { 0.0 }));
            r
        })
        .collect();

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| {
            aug[r1][col]
                .abs()
                .partial_cmp(&aug[r2][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        aug.swap(col, pivot_row);

        let pivot = aug[col][col];
        if pivot.abs() < max_abs * 1e-13 {
            return None;
        }
        for v in aug[col].iter_mut() {
            *v /= pivot;
        }
        for row in 0..n {
            if row != col {
                let factor = aug[row][col];
                if factor != 0.0 {
                    for j in 0..2 * n {
                        aug[row][j] -= factor * aug[col][j];
                    }
                }
            }
        }
    }

    Some(aug.into_iter().map(|row| row[n..].to_vec()).collect())
}

// ── Segmented regression ────────────────────────────────────────────────

/// Refine a single break starting at `psi` (log10 frequency).
///
/// Returns the converged fit with coefficients `[b0, b1]` of the lower segment
/// and the break description, or `None` when the break is not supported by
/// the data.
fn segmented_fit(
    x: &[f64],
    y: &[f64],
    w: &[f64],
    mut psi: f64,
    max_iterations: usize,
) -> Option<(LinearFit, BreakPoint)> {
    let (x_min, x_max) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let splits = |psi: f64| {
        let below = x.iter().filter(|&&v| v <= psi).count();
        below >= MIN_FIT_POINTS && x.len() - below >= MIN_FIT_POINTS
    };
    if !psi.is_finite() || psi <= x_min || psi >= x_max || !splits(psi) {
        debug!(psi, x_min, x_max, "Break guess outside the fitted range");
        return None;
    }

    for iteration in 0..max_iterations {
        let design: Vec<Vec<f64>> = x
            .iter()
            .map(|&xi| {
                let above = xi > psi;
                vec![
                    1.0,
                    xi,
                    if above { xi - psi } else { 0.0 },
                    if above { -1.0 } else { 0.0 },
                ]
            })
            .collect();
        let fit = weighted_least_squares(&design, y, w)?;
        let (b2, gamma) = (fit.coef[2], fit.coef[3]);
        if b2 == 0.0 || !b2.is_finite() {
            return None;
        }

        let next = psi + gamma / b2;
        if !next.is_finite() || next <= x_min || next >= x_max || !splits(next) {
            debug!(iteration, psi = next, "Break moved outside the fitted range");
            return None;
        }
        let converged = (next - psi).abs() < BREAK_TOLERANCE;
        psi = next;
        if converged {
            let psi_err = fit.std_err(3) / b2.abs();
            let slope_above_var = fit.cov[1][1] + fit.cov[2][2] + 2.0 * fit.cov[1][2];
            let frequency = 10f64.powf(psi);
            let bp = BreakPoint {
                frequency,
                frequency_err: frequency * LN_10 * psi_err,
                slope_above: fit.coef[1] + b2,
                slope_above_err: slope_above_var.max(0.0).sqrt(),
            };
            debug!(iteration, break_frequency = frequency, "Breakpoint converged");
            return Some((fit, bp));
        }
    }

    debug!(max_iterations, "Breakpoint search did not converge");
    None
}
