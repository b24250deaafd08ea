//! Levenberg–Marquardt over [`NllsProblem`], backed by the
//! `levenberg-marquardt` crate (MINPACK trust region, pivoted QR).
//!
//! Problems expose residuals and, optionally, a Jacobian; the default
//! Jacobian is a central finite difference.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::{trace, warn};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

/// A nonlinear least-squares problem `min ½‖r(x)‖²`.
pub trait NllsProblem {
    fn num_params(&self) -> usize;

    fn residuals(&self, x: &DVector<f64>) -> DVector<f64>;

    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        numeric_jacobian(self, x)
    }
}

/// Central-difference Jacobian of `problem` at `x`.
pub fn numeric_jacobian<P: NllsProblem + ?Sized>(problem: &P, x: &DVector<f64>) -> DMatrix<f64> {
    let r0 = problem.residuals(x);
    let mut jac = DMatrix::zeros(r0.len(), x.len());
    let mut xp = x.clone();
    for j in 0..x.len() {
        let h = 1e-6 * x[j].abs().max(1.0);
        xp[j] = x[j] + h;
        let rp = problem.residuals(&xp);
        xp[j] = x[j] - h;
        let rm = problem.residuals(&xp);
        xp[j] = x[j];
        jac.set_column(j, &((rp - rm) / (2.0 * h)));
    }
    jac
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmOptions {
    /// Patience: the solver stops after `max_iters · (n + 1)` residual
    /// evaluations for `n` parameters.
    pub max_iters: usize,
    /// Relative reduction of the cost below which the solve ends.
    pub ftol: f64,
    /// Relative step size below which the solve ends.
    pub xtol: f64,
    /// Cosine between residuals and Jacobian columns below which the solve ends.
    pub gtol: f64,
    /// Initial trust-region radius factor.
    pub stepbound: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-12,
            stepbound: 100.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Residuals are exactly zero.
    ResidualsZero,
    /// Residuals are orthogonal to the Jacobian columns (`gtol`).
    Orthogonal,
    /// The `ftol` or `xtol` test passed.
    Converged,
    /// The evaluation budget ran out.
    MaxEvaluations,
    /// Residuals or the Jacobian turned non-finite.
    Numerical,
    /// Tolerances below machine precision, empty problem or shape mismatch.
    InvalidProblem,
}

impl Termination {
    fn from_reason(reason: &TerminationReason) -> Self {
        match reason {
            TerminationReason::ResidualsZero => Self::ResidualsZero,
            TerminationReason::Orthogonal => Self::Orthogonal,
            TerminationReason::Converged { .. } => Self::Converged,
            TerminationReason::LostPatience => Self::MaxEvaluations,
            TerminationReason::Numerical(_) | TerminationReason::User(_) => Self::Numerical,
            _ => Self::InvalidProblem,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    /// Residual evaluations performed by the solver.
    pub iterations: usize,
    /// Sum of squared residuals at the start.
    pub initial_cost: f64,
    /// Sum of squared residuals at the returned parameters.
    pub final_cost: f64,
    pub termination: Termination,
    pub converged: bool,
}

struct LmAdapter<'a, P: NllsProblem + ?Sized> {
    problem: &'a P,
    params: DVector<f64>,
}

impl<P: NllsProblem + ?Sized> LeastSquaresProblem<f64, Dyn, Dyn> for LmAdapter<'_, P> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.problem.residuals(&self.params))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let jac = self.problem.jacobian(&self.params);
        jac.iter().all(|v| v.is_finite()).then_some(jac)
    }
}

/// Minimise `problem` from `x0`.
pub fn solve<P: NllsProblem + ?Sized>(
    problem: &P,
    x0: DVector<f64>,
    opts: &LmOptions,
) -> (DVector<f64>, SolveReport) {
    let initial_cost = problem.residuals(&x0).norm_squared();
    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_stepbound(opts.stepbound)
        .with_patience(opts.max_iters.max(1));

    let (adapter, report) = lm.minimize(LmAdapter {
        problem,
        params: x0,
    });
    let termination = Termination::from_reason(&report.termination);
    if report.termination.was_usage_issue() {
        warn!("levenberg-marquardt rejected the problem: {:?}", report.termination);
    }
    let x = adapter.params;
    let final_cost = problem.residuals(&x).norm_squared();
    trace!(
        "lm: cost {initial_cost:.6e} -> {final_cost:.6e} after {} evaluations ({termination:?})",
        report.number_of_evaluations
    );
    (
        x,
        SolveReport {
            iterations: report.number_of_evaluations,
            initial_cost,
            final_cost,
            termination,
            converged: report.termination.was_successful(),
        },
    )
}
