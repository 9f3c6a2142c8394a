use log::{debug, warn};
use nalgebra_sparse::CscMatrix;
use serde::{Deserialize, Serialize};

use super::{
    error::Result,
    solver::{Solve, SolveError},
    sparse::slice::{patch_zero_diagonal, select_csc},
    system::System,
};

/// Mismatch growth over the first iteration that counts as divergence.
pub const DIVERGENCE_RATIO: f64 = 1e3;
/// Iterations allowed before the divergence test applies.
pub const DIVERGENCE_GRACE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolveStatus {
    #[default]
    NotStarted,
    Iterating,
    Converged,
    Diverged,
    MaxIterExceeded,
}

/// Classifies iteration `niter` from the mismatch history.
///
/// `mismatches[0]` is the mismatch at the starting point and the last entry
/// the current one.
pub fn check_iteration(niter: usize, mismatches: &[f64], tol: f64, max_iter: usize) -> SolveStatus {
    let (Some(&first), Some(&last)) = (mismatches.first(), mismatches.last()) else {
        return SolveStatus::NotStarted;
    };
    if last < tol {
        SolveStatus::Converged
    } else if niter > DIVERGENCE_GRACE && !(last <= DIVERGENCE_RATIO * first) {
        SolveStatus::Diverged
    } else if niter >= max_iter {
        SolveStatus::MaxIterExceeded
    } else {
        SolveStatus::Iterating
    }
}

/// Infinity norm; any non-finite entry makes it infinite.
pub(crate) fn max_abs(values: impl IntoIterator<Item = f64>) -> f64 {
    values.into_iter().fold(0.0, |acc: f64, v| {
        if v.is_finite() {
            acc.max(v.abs())
        } else {
            f64::INFINITY
        }
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewtonOutcome {
    pub status: SolveStatus,
    pub iterations: usize,
    pub mismatches: Vec<f64>,
}

#[allow(non_snake_case)]
fn try_solve(solver: &mut dyn Solve, jac: &CscMatrix<f64>, rhs: &[f64]) -> std::result::Result<Vec<f64>, SolveError> {
    let mut b = rhs.to_vec();
    let (Ap, Ai, Ax) = (jac.col_offsets(), jac.row_indices(), jac.values());
    solver.solve(Ap, Ai, Ax, &mut b, jac.nrows())?;
    Ok(b)
}

/// Solves `jac * inc = -residual`.
///
/// A changed sparsity pattern triggers a fresh symbolic factorization. A
/// singular matrix is retried once with zero diagonal entries replaced by
/// one. Returns `None` when the retry fails as well.
pub(crate) fn calc_inc(solver: &mut dyn Solve, jac: &CscMatrix<f64>, residual: &[f64]) -> Option<Vec<f64>> {
    let rhs: Vec<f64> = residual.iter().map(|r| -r).collect();
    let retry = match try_solve(solver, jac, &rhs) {
        Ok(inc) => return Some(inc),
        Err(SolveError::PatternChanged) => {
            warn!("Unexpected symbolic factorization. Refactorizing...");
            solver.reset();
            try_solve(solver, jac, &rhs)
        }
        Err(err) => {
            let (patched, diag) = patch_zero_diagonal(jac, 1.0);
            warn!("{err}; setting {} zero diagonal entries to one", diag.len());
            debug!("patched diagonal positions: {diag:?}");
            solver.reset();
            let res = try_solve(solver, &patched, &rhs);
            solver.reset();
            res
        }
    };
    match retry {
        Ok(inc) => Some(inc),
        Err(err) => {
            warn!("linear solve failed after retry: {err}");
            None
        }
    }
}

/// Newton iteration on `[f; g]`, or on the rows and columns in `subset`
/// with everything else held fixed.
pub fn newton_subset(
    system: &mut System,
    solver: &mut dyn Solve,
    subset: Option<&[usize]>,
    tol: f64,
    max_iter: usize,
) -> Result<NewtonOutcome> {
    let mut outcome = NewtonOutcome::default();
    let mut niter = 0;
    loop {
        system.update_equations();
        let full = system.dae.residual();
        let residual: Vec<f64> = match subset {
            Some(rows) => rows.iter().map(|&i| full[i]).collect(),
            None => full.as_slice().to_vec(),
        };
        let mismatch = max_abs(residual.iter().copied());
        outcome.mismatches.push(mismatch);
        debug!("{niter}: |F(x)| = {mismatch:.10e}");

        outcome.status = check_iteration(niter, &outcome.mismatches, tol, max_iter);
        outcome.iterations = niter;
        if outcome.status != SolveStatus::Iterating {
            return Ok(outcome);
        }

        system.j_update();
        let jac = system.dae.jacobian()?;
        let jac = match subset {
            Some(rows) => select_csc(&jac, rows, rows),
            None => jac,
        };
        let Some(inc) = calc_inc(solver, &jac, &residual) else {
            outcome.status = SolveStatus::Diverged;
            return Ok(outcome);
        };
        match subset {
            Some(rows) => {
                let mut full_inc = vec![0.0; full.len()];
                for (&i, d) in rows.iter().zip(inc) {
                    full_inc[i] = d;
                }
                system.dae.apply_increment(&full_inc);
            }
            None => system.dae.apply_increment(&inc),
        }
        niter += 1;
    }
}
