//! Adaptive time integration for the flattened N-body state
//!
//! [`OdeSystem`] is the first-order system `dy/dt = f(t, y)` seen by a solver,
//! [`OdeSolver`] advances such a system over an interval, and
//! [`DormandPrince54`] is the embedded Runge–Kutta 5(4) solver used by the
//! simulation controller.

use super::error::IntegrationError;
use super::params::SolverParams;
use super::states::NVec;

/// A first-order ODE system over a flat real vector
pub trait OdeSystem {
    /// Length of the state vector
    fn dimension(&self) -> usize;

    /// Write `f(t, y)` into `dy`
    fn derivatives(&mut self, t: f64, y: &NVec, dy: &mut NVec);
}

/// Counters from one call to [`OdeSolver::advance`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolverStats {
    pub accepted: usize,
    pub rejected: usize,
    pub evaluations: usize,
}

/// Advances a state vector from `t0` to `t1`.
///
/// On success `y` holds the state at `t1`. On error `y` is left untouched.
pub trait OdeSolver {
    fn advance(
        &mut self,
        system: &mut dyn OdeSystem,
        t0: f64,
        y: &mut NVec,
        t1: f64,
    ) -> Result<SolverStats, IntegrationError>;
}

// Dormand–Prince 5(4) tableau
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th order weights (also the last stage row, FSAL)
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// 5th minus 4th order weights
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

/// Embedded Runge–Kutta 5(4) with adaptive step control.
///
/// The last accepted step size is carried into the next call so a stepping
/// loop does not re-discover it every tick.
#[derive(Debug, Clone)]
pub struct DormandPrince54 {
    params: SolverParams,
    last_step: Option<f64>,
}

impl DormandPrince54 {
    pub fn new(params: SolverParams) -> Self {
        Self {
            params,
            last_step: None,
        }
    }

    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    /// Step magnitude the next call will try first
    pub fn last_step(&self) -> Option<f64> {
        self.last_step
    }

    pub fn reset(&mut self) {
        self.last_step = None;
    }

    fn first_step(&self, span: f64) -> f64 {
        let h = self
            .last_step
            .or(self.params.initial_step)
            .unwrap_or(span)
            .abs();
        h.min(self.params.max_step).min(span).max(self.params.min_step.min(span))
    }

    /// RMS of the error scaled by the mixed tolerance
    fn error_norm(&self, err: &NVec, y0: &NVec, y1: &NVec) -> f64 {
        if err.is_empty() {
            return 0.0;
        }
        let sum: f64 = err
            .iter()
            .zip(y0.iter().zip(y1.iter()))
            .map(|(e, (a, b))| {
                let scale = self.params.abs_tol + self.params.rel_tol * a.abs().max(b.abs());
                (e / scale).powi(2)
            })
            .sum();
        (sum / err.len() as f64).sqrt()
    }
}

impl Default for DormandPrince54 {
    fn default() -> Self {
        DormandPrince54::new(SolverParams::default())
    }
}

/// `out = y + h * sum(c_i * k_i)`
fn combine(out: &mut NVec, y: &NVec, h: f64, terms: &[(f64, &NVec)]) {
    out.copy_from(y);
    for &(c, k) in terms {
        out.axpy(h * c, k, 1.0);
    }
}

fn all_finite(v: &NVec) -> bool {
    v.iter().all(|x| x.is_finite())
}

impl OdeSolver for DormandPrince54 {
    fn advance(
        &mut self,
        system: &mut dyn OdeSystem,
        t0: f64,
        y: &mut NVec,
        t1: f64,
    ) -> Result<SolverStats, IntegrationError> {
        let mut stats = SolverStats::default();
        if t1 == t0 {
            return Ok(stats);
        }

        let n = y.len();
        debug_assert_eq!(system.dimension(), n);
        let dir = (t1 - t0).signum();
        let mut h = self.first_step((t1 - t0).abs());

        let mut y_cur = y.clone();
        let mut y_new = NVec::zeros(n);
        let mut y_tmp = NVec::zeros(n);
        let mut err = NVec::zeros(n);
        let mut k1 = NVec::zeros(n);
        let mut k2 = NVec::zeros(n);
        let mut k3 = NVec::zeros(n);
        let mut k4 = NVec::zeros(n);
        let mut k5 = NVec::zeros(n);
        let mut k6 = NVec::zeros(n);
        let mut k7 = NVec::zeros(n);

        system.derivatives(t0, &y_cur, &mut k1);
        stats.evaluations += 1;
        if !all_finite(&k1) {
            return Err(IntegrationError::NumericOverflow { time: t0 });
        }

        let mut t = t0;
        while t != t1 {
            let remaining = (t1 - t).abs();
            let last = h >= remaining || remaining - h <= 4.0 * f64::EPSILON * t1.abs().max(1.0);
            let step = if last { remaining } else { h };
            let hs = dir * step;

            combine(&mut y_tmp, &y_cur, hs, &[(A21, &k1)]);
            system.derivatives(t + C2 * hs, &y_tmp, &mut k2);

            combine(&mut y_tmp, &y_cur, hs, &[(A31, &k1), (A32, &k2)]);
            system.derivatives(t + C3 * hs, &y_tmp, &mut k3);

            combine(&mut y_tmp, &y_cur, hs, &[(A41, &k1), (A42, &k2), (A43, &k3)]);
            system.derivatives(t + C4 * hs, &y_tmp, &mut k4);

            combine(
                &mut y_tmp,
                &y_cur,
                hs,
                &[(A51, &k1), (A52, &k2), (A53, &k3), (A54, &k4)],
            );
            system.derivatives(t + C5 * hs, &y_tmp, &mut k5);

            combine(
                &mut y_tmp,
                &y_cur,
                hs,
                &[(A61, &k1), (A62, &k2), (A63, &k3), (A64, &k4), (A65, &k5)],
            );
            system.derivatives(t + hs, &y_tmp, &mut k6);

            combine(
                &mut y_new,
                &y_cur,
                hs,
                &[(B1, &k1), (B3, &k3), (B4, &k4), (B5, &k5), (B6, &k6)],
            );
            // Evaluated at the candidate solution; reused as k1 if accepted
            system.derivatives(t + hs, &y_new, &mut k7);
            stats.evaluations += 6;

            err.fill(0.0);
            for (e, k) in [(E1, &k1), (E3, &k3), (E4, &k4), (E5, &k5), (E6, &k6), (E7, &k7)] {
                err.axpy(hs * e, k, 1.0);
            }

            if !all_finite(&y_new) || !all_finite(&k7) {
                return Err(IntegrationError::NumericOverflow { time: t });
            }

            let norm = self.error_norm(&err, &y_cur, &y_new);
            if !norm.is_finite() {
                return Err(IntegrationError::NumericOverflow { time: t });
            }

            if norm <= 1.0 {
                stats.accepted += 1;
                t = if last { t1 } else { t + hs };
                std::mem::swap(&mut y_cur, &mut y_new);
                std::mem::swap(&mut k1, &mut k7);

                let factor = if norm == 0.0 {
                    MAX_FACTOR
                } else {
                    (SAFETY * norm.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
                };
                // A clipped final step says nothing about the step size the
                // dynamics allow, so keep the unclipped proposal
                let base = if last { h.max(step) } else { step };
                h = (base * factor).min(self.params.max_step);
            } else {
                stats.rejected += 1;
                let factor = (SAFETY * norm.powf(-0.2)).max(MIN_FACTOR);
                h = step * factor;
                if h < self.params.min_step {
                    return Err(IntegrationError::StepSizeUnderflow {
                        time: t,
                        step: h,
                        min_step: self.params.min_step,
                    });
                }
            }
        }

        self.last_step = Some(h);
        y.copy_from(&y_cur);
        log::trace!(
            "advanced {} -> {}: {} accepted, {} rejected, {} evaluations",
            t0,
            t1,
            stats.accepted,
            stats.rejected,
            stats.evaluations
        );
        Ok(stats)
    }
}
