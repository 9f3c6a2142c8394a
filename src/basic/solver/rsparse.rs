use rsparse::{
    data::{self, Nmrc, Numeric, Symb},
    lsolve, lu, sqr, usolve,
};

use super::{Solve, SolveError, check_finite};

#[derive(Default)]
pub struct RSparseSolver {
    x: Vec<f64>,
    symbolic: Option<Symb>,
    numeric: Option<Nmrc<f64>>,
    pattern: (Vec<usize>, Vec<usize>),
}

impl RSparseSolver {
    fn substitute(&mut self, b: &mut [f64]) -> Result<(), SolveError> {
        let (Some(s), Some(num)) = (self.symbolic.as_ref(), self.numeric.as_ref()) else {
            return Err(SolveError::NotFactorized);
        };
        let x = &mut self.x;
        ipvec(&num.pinv, b, x); // x = P*b
        lsolve(&num.l, x); // x = L\x
        usolve(&num.u, x); // x = U\x
        ipvec(&s.q, &x[..], b); // b = Q*x
        check_finite(b)
    }
}

#[allow(non_snake_case)]
impl Solve for RSparseSolver {
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
        let a = data::Sprs {
            m: n,
            n,
            i: Ai.to_vec(),
            p: Ap.iter().map(|&v| v as isize).collect(),
            x: Ax.to_vec(),
            nzmax: Ax.len(),
        };
        if self.symbolic.is_none() {
            self.symbolic = Some(sqr(&a, 1, false));
            self.pattern = (Ap.to_vec(), Ai.to_vec());
            self.x = vec![0.0; n];
        }
        let Some(s) = self.symbolic.as_mut() else {
            return Err(SolveError::NotFactorized);
        };
        // numeric LU factorization
        self.numeric = Some(lu(&a, s, 1e-6).map_err(|_| SolveError::Singular)?);
        self.substitute(b)
    }

    fn resolve(&mut self, b: &mut [f64]) -> Result<(), SolveError> {
        self.substitute(b)
    }

    fn reset(&mut self) {
        self.symbolic = None;
        self.numeric = None;
    }
}

fn ipvec<T: Numeric<T>>(p: &Option<Vec<isize>>, b: &[T], x: &mut [T]) {
    match p {
        Some(pvec) => {
            for k in 0..b.len() {
                x[pvec[k] as usize] = b[k];
            }
        }
        None => x.copy_from_slice(b),
    }
}
