//! Fast-decoupled power flow.
//!
//! Angles at non-slack buses are corrected with `B'` and voltage magnitudes
//! at load buses with `B''`. Both matrices are taken from `gy` at a flat
//! start and factorized once. Slack powers and generator reactive powers
//! are recovered afterwards with a Newton solve on the remaining equations.

use std::collections::{BTreeSet, HashMap};

use log::{debug, info, warn};
use nalgebra_sparse::CscMatrix;

use super::{
    config::SparseLib,
    error::{DaeError, Result},
    model::JacBlock,
    newtonpf::{NewtonOutcome, SolveStatus, check_iteration, max_abs, newton_subset},
    solver::{Solve, SolveError, make_solver},
    sparse::slice::{patch_zero_diagonal, select_csc},
    system::System,
};

/// Algebraic addresses updated by each half iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct BusPartition {
    /// Bus angles except at slack buses.
    pub p_idx: Vec<usize>,
    /// Bus voltages except at slack and PV buses.
    pub q_idx: Vec<usize>,
    /// Voltage address of the bus owning each angle address.
    v_of_a: HashMap<usize, usize>,
}

fn addresses(system: &System, model: &str, var: &str) -> Result<Vec<usize>> {
    let Some(m) = system.models.get(model) else {
        return Ok(Vec::new());
    };
    m.vars
        .get(var)
        .map(|v| v.a.clone())
        .ok_or_else(|| DaeError::Lookup {
            model: model.to_string(),
            what: format!("variable <{var}>"),
        })
}

impl BusPartition {
    pub fn new(system: &System) -> Result<Self> {
        system.model("Bus")?;
        let bus_a = addresses(system, "Bus", "a")?;
        let bus_v = addresses(system, "Bus", "v")?;
        let slack_a: BTreeSet<usize> = addresses(system, "Slack", "a")?.into_iter().collect();
        let fixed_v: BTreeSet<usize> = addresses(system, "Slack", "v")?
            .into_iter()
            .chain(addresses(system, "PV", "v")?)
            .collect();
        Ok(Self {
            p_idx: bus_a.iter().copied().filter(|a| !slack_a.contains(a)).collect(),
            q_idx: bus_v.iter().copied().filter(|v| !fixed_v.contains(v)).collect(),
            v_of_a: bus_a.into_iter().zip(bus_v).collect(),
        })
    }

    pub fn voltage_of(&self, a: usize) -> Option<usize> {
        self.v_of_a.get(&a).copied()
    }

    /// `B'` and `B''` from `gy` at `a = 0`, `v = 1`. The DAE state is
    /// restored afterwards.
    fn matrices(&self, system: &mut System) -> Result<(CscMatrix<f64>, CscMatrix<f64>)> {
        let saved = system.dae.y.clone();
        for (&a, &v) in &self.v_of_a {
            system.dae.y[a] = 0.0;
            system.dae.y[v] = 1.0;
        }
        system.update_equations();
        system.j_update();
        let gy = system.dae.build(JacBlock::Gy);
        system.dae.y = saved;
        system.update_equations();
        let gy = gy?;
        Ok((
            select_csc(&gy, &self.p_idx, &self.p_idx),
            select_csc(&gy, &self.q_idx, &self.q_idx),
        ))
    }
}

#[allow(non_snake_case)]
fn factorize_solve(
    solver: &mut dyn Solve,
    mat: &CscMatrix<f64>,
    rhs: &mut [f64],
) -> std::result::Result<(), SolveError> {
    let (Ap, Ai, Ax) = (mat.col_offsets(), mat.row_indices(), mat.values());
    solver.solve(Ap, Ai, Ax, rhs, mat.nrows())
}

/// Factorizes on the first call and reuses the factorization afterwards.
///
/// A failed solve is retried after a fresh symbolic factorization, or with
/// zero diagonal entries set to one when the matrix is singular. The
/// patched matrix replaces `mat` for later calls. Returns `false` when the
/// retry fails as well.
fn solve_fixed(
    solver: &mut dyn Solve,
    mat: &mut CscMatrix<f64>,
    factorized: &mut bool,
    rhs: &mut [f64],
) -> bool {
    if rhs.is_empty() {
        return true;
    }
    let b = rhs.to_vec();
    let first = if *factorized {
        solver.resolve(rhs)
    } else {
        factorize_solve(solver, mat, rhs)
    };
    let retry = match first {
        Ok(()) => {
            *factorized = true;
            return true;
        }
        Err(SolveError::PatternChanged | SolveError::NotFactorized) => {
            warn!("FDPF: refactorizing fixed matrix");
            solver.reset();
            rhs.copy_from_slice(&b);
            factorize_solve(solver, mat, rhs)
        }
        Err(err) => {
            let (patched, diag) = patch_zero_diagonal(mat, 1.0);
            warn!("FDPF: {err}; setting {} zero diagonal entries to one", diag.len());
            debug!("patched diagonal positions: {diag:?}");
            *mat = patched;
            solver.reset();
            rhs.copy_from_slice(&b);
            factorize_solve(solver, mat, rhs)
        }
    };
    match retry {
        Ok(()) => {
            *factorized = true;
            true
        }
        Err(err) => {
            warn!("FDPF: fixed-matrix solve failed after retry: {err}");
            *factorized = false;
            solver.reset();
            false
        }
    }
}

/// Combined status of the two half iterations.
fn combine(p: SolveStatus, q: SolveStatus) -> SolveStatus {
    use SolveStatus::*;
    match (p, q) {
        (Converged, Converged) => Converged,
        (Diverged, _) | (_, Diverged) => Diverged,
        (MaxIterExceeded, _) | (_, MaxIterExceeded) => MaxIterExceeded,
        _ => Iterating,
    }
}

pub fn fdpf(system: &mut System, lib: SparseLib, tol: f64, max_iter: usize) -> Result<NewtonOutcome> {
    let part = BusPartition::new(system)?;
    let (mut bp, mut bpp) = part.matrices(system)?;
    debug!(
        "FDPF: B' is {}x{}, B'' is {}x{}",
        bp.nrows(),
        bp.ncols(),
        bpp.nrows(),
        bpp.ncols()
    );
    let (mut bp_solver, mut bpp_solver) = (make_solver(lib)?, make_solver(lib)?);
    let (mut bp_done, mut bpp_done) = (false, false);

    let mut outcome = NewtonOutcome::default();
    let (mut p_mis, mut q_mis) = (Vec::new(), Vec::new());
    let mut niter = 0;
    loop {
        system.update_equations();
        let g = &system.dae.g;
        p_mis.push(max_abs(part.p_idx.iter().map(|&i| g[i])));
        q_mis.push(max_abs(part.q_idx.iter().map(|&i| g[i])));
        let mismatch = p_mis[niter].max(q_mis[niter]);
        outcome.mismatches.push(mismatch);
        debug!("{niter}: |P| = {:.10e}, |Q| = {:.10e}", p_mis[niter], q_mis[niter]);

        let status = combine(
            check_iteration(niter, &p_mis, tol, max_iter),
            check_iteration(niter, &q_mis, tol, max_iter),
        );
        outcome.status = status;
        outcome.iterations = niter;
        if status != SolveStatus::Iterating {
            break;
        }

        let mut dp: Vec<f64> = part
            .p_idx
            .iter()
            .map(|&i| {
                let v = part.voltage_of(i).map_or(1.0, |vi| system.dae.y[vi]);
                -system.dae.g[i] / v
            })
            .collect();
        if !solve_fixed(bp_solver.as_mut(), &mut bp, &mut bp_done, &mut dp) {
            outcome.status = SolveStatus::Diverged;
            break;
        }
        for (&i, d) in part.p_idx.iter().zip(&dp) {
            system.dae.y[i] += d;
        }

        system.update_equations();
        let mut dq: Vec<f64> = part
            .q_idx
            .iter()
            .map(|&i| -system.dae.g[i] / system.dae.y[i])
            .collect();
        if !solve_fixed(bpp_solver.as_mut(), &mut bpp, &mut bpp_done, &mut dq) {
            outcome.status = SolveStatus::Diverged;
            break;
        }
        for (&i, d) in part.q_idx.iter().zip(&dq) {
            system.dae.y[i] += d;
        }
        niter += 1;
    }

    if outcome.status != SolveStatus::Converged {
        return Ok(outcome);
    }

    // slack powers, generator reactive powers and any states
    let n = system.dae.n;
    let solved: BTreeSet<usize> = part.p_idx.iter().chain(&part.q_idx).map(|i| n + i).collect();
    let rest: Vec<usize> = (0..n + system.dae.m).filter(|i| !solved.contains(i)).collect();
    if !rest.is_empty() {
        let mut solver = make_solver(lib)?;
        let tail = newton_subset(system, solver.as_mut(), Some(&rest), tol, max_iter)?;
        info!(
            "FDPF: remaining {} equations solved in {} iterations",
            rest.len(),
            tail.iterations
        );
        if tail.status != SolveStatus::Converged {
            warn!("FDPF: remaining equations ended with {:?}", tail.status);
            outcome.status = tail.status;
        }
    }
    system.update_equations();
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_status() {
        use SolveStatus::*;
        assert_eq!(combine(Converged, Converged), Converged);
        assert_eq!(combine(Converged, Iterating), Iterating);
        assert_eq!(combine(Iterating, Diverged), Diverged);
        assert_eq!(combine(MaxIterExceeded, Converged), MaxIterExceeded);
    }

    #[test]
    fn halves_are_checked_independently() {
        use SolveStatus::*;
        let status = |p: &[f64], q: &[f64], niter| {
            combine(
                check_iteration(niter, p, 1e-6, 30),
                check_iteration(niter, q, 1e-6, 30),
            )
        };
        // P grew past 1000x its own start while the larger Q mismatch fell
        assert_eq!(status(&[1e-3, 1.5], &[10.0, 1.0], 6), Diverged);
        assert_eq!(status(&[1e-3, 1.5], &[10.0, 1.0], 5), Iterating);
        assert_eq!(status(&[1.0, 1e-9], &[1.0, 1e-3], 30), MaxIterExceeded);
    }

    #[cfg(feature = "rsparse")]
    #[test]
    fn singular_fixed_matrix_is_patched_once() {
        use nalgebra_sparse::CooMatrix;

        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, 2.0);
        let mut mat = CscMatrix::from(&coo);
        let mut solver = make_solver(SparseLib::RSparse).unwrap();
        let mut factorized = false;

        let mut rhs = [4.0, 0.0];
        assert!(solve_fixed(solver.as_mut(), &mut mat, &mut factorized, &mut rhs));
        assert!(factorized);
        assert_eq!(rhs, [2.0, 0.0]);
        assert_eq!(mat.nnz(), 2);

        // reuses the patched factorization
        let mut rhs = [2.0, 3.0];
        assert!(solve_fixed(solver.as_mut(), &mut mat, &mut factorized, &mut rhs));
        assert_eq!(rhs, [1.0, 3.0]);
    }
}
