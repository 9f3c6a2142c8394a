//! Sparse LU backends behind a common [`Solve`] trait.

use thiserror::Error;

#[cfg(feature = "faer")]
mod faer;
#[cfg(feature = "faer")]
pub use faer::*;

#[cfg(feature = "rsparse")]
mod rsparse;
#[cfg(feature = "rsparse")]
pub use rsparse::*;

use super::{
    config::SparseLib,
    error::{ConfigError, Result},
};

/// Failure of a single factorize-and-solve call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    /// The sparsity pattern differs from the one the symbolic analysis was
    /// done for. Reset and solve again.
    #[error("sparsity pattern changed since the symbolic factorization")]
    PatternChanged,
    #[error("matrix is numerically singular")]
    Singular,
    /// `resolve` called before any successful `solve`.
    #[error("no numeric factorization to reuse")]
    NotFactorized,
    #[error("{0}")]
    Backend(String),
}

#[allow(non_snake_case)]
/// A trait for solving sparse linear systems in compressed-column form.
pub trait Solve {
    /// Factorizes the matrix and solves in place; `b` holds the solution on
    /// return.
    ///
    /// The symbolic analysis is done on the first call and kept until
    /// [`Solve::reset`]. A different pattern on a later call yields
    /// [`SolveError::PatternChanged`].
    fn solve(
        &mut self,
        Ap: &[usize],
        Ai: &[usize],
        Ax: &[f64],
        b: &mut [f64],
        n: usize,
    ) -> std::result::Result<(), SolveError>;

    /// Solves with the numeric factorization of the last `solve` call.
    fn resolve(&mut self, b: &mut [f64]) -> std::result::Result<(), SolveError>;

    /// Drops symbolic and numeric factorizations.
    fn reset(&mut self);
}

/// Builds a solver for the configured backend. Fails if the backend was not
/// compiled in.
pub fn make_solver(lib: SparseLib) -> Result<Box<dyn Solve>> {
    match lib {
        #[cfg(feature = "rsparse")]
        SparseLib::RSparse => Ok(Box::new(RSparseSolver::default())),
        #[cfg(feature = "faer")]
        SparseLib::Faer => Ok(Box::new(FaerSolver::default())),
        #[allow(unreachable_patterns)]
        other => Err(ConfigError::SparseLibUnavailable(other.to_string()).into()),
    }
}

pub(crate) fn check_finite(b: &[f64]) -> std::result::Result<(), SolveError> {
    if b.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(SolveError::Singular)
    }
}
