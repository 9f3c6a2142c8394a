use faer::{
    MatMut,
    linalg::solvers::Solve,
    sparse::{
        SparseColMatRef, SymbolicSparseColMatRef,
        linalg::solvers::{Lu, SymbolicLu},
    },
};

use super::{Solve as DaeSolve, SolveError, check_finite};

#[derive(Default)]
pub struct FaerSolver {
    lu: Option<Lu<usize, f64>>,
    symbolic: Option<SymbolicLu<usize>>,
    pattern: (Vec<usize>, Vec<usize>),
    n: usize,
}

#[allow(non_snake_case)]
impl DaeSolve for FaerSolver {
    fn solve(
        &mut self,
        Ap: &[usize],
        Ai: &[usize],
        Ax: &[f64],
        b: &mut [f64],
        n: usize,
    ) -> Result<(), SolveError> {
        if self.symbolic.is_some() && (self.pattern.0 != Ap || self.pattern.1 != Ai) {
            return Err(SolveError::PatternChanged);
        }
        let s = SymbolicSparseColMatRef::new_checked(n, n, Ap, None, Ai);
        let mat = SparseColMatRef::new(s, Ax);
        let symbolic = match self.symbolic.take() {
            Some(sym) => sym,
            None => {
                self.pattern = (Ap.to_vec(), Ai.to_vec());
                SymbolicLu::try_new(s).map_err(|e| SolveError::Backend(format!("{e:?}")))?
            }
        };
        self.symbolic = Some(symbolic.clone());
        self.n = n;
        self.lu = Some(Lu::try_new_with_symbolic(symbolic, mat).map_err(|_| SolveError::Singular)?);
        self.resolve(b)
    }

    fn resolve(&mut self, b: &mut [f64]) -> Result<(), SolveError> {
        let lu = self.lu.as_ref().ok_or(SolveError::NotFactorized)?;
        let rhs = MatMut::from_column_major_slice_mut(b, self.n, 1);
        lu.solve_in_place(rhs);
        check_finite(b)
    }

    fn reset(&mut self) {
        self.symbolic = None;
        self.lu = None;
    }
}
