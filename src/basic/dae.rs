use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use super::{
    error::{DaeError, Result},
    model::JacBlock,
    sparse::stack::{csc_hstack, csc_vstack},
};

/// Global numerical state of the differential-algebraic system.
///
/// `n` states `x` with differential residuals `f`, `m` algebraics `y` with
/// algebraic residuals `g`. Jacobian blocks are collected as triplets and
/// converted to CSC on demand; duplicates are summed.
#[derive(Debug, Clone, Default)]
pub struct Dae {
    pub n: usize,
    pub m: usize,
    pub t: f64,
    pub x: DVector<f64>,
    pub y: DVector<f64>,
    pub f: DVector<f64>,
    pub g: DVector<f64>,
    /// `<Model> <var> <device idx>` per state address.
    pub x_name: Vec<String>,
    pub y_name: Vec<String>,
    triplets: [Vec<(usize, usize, f64)>; 4],
}

impl Dae {
    pub fn resize(&mut self, n: usize, m: usize) {
        self.n = n;
        self.m = m;
        self.x = DVector::zeros(n);
        self.y = DVector::zeros(m);
        self.f = DVector::zeros(n);
        self.g = DVector::zeros(m);
        self.x_name = vec![String::new(); n];
        self.y_name = vec![String::new(); m];
        self.clear_triplets();
    }

    pub fn clear_triplets(&mut self) {
        for t in self.triplets.iter_mut() {
            t.clear();
        }
    }

    pub fn push(&mut self, block: JacBlock, row: usize, col: usize, value: f64) {
        self.triplets[block.index()].push((row, col, value));
    }

    pub fn shape(&self, block: JacBlock) -> (usize, usize) {
        match block {
            JacBlock::Fx => (self.n, self.n),
            JacBlock::Fy => (self.n, self.m),
            JacBlock::Gx => (self.m, self.n),
            JacBlock::Gy => (self.m, self.m),
        }
    }

    /// Assembles one Jacobian block from its triplets.
    pub fn build(&self, block: JacBlock) -> Result<CscMatrix<f64>> {
        let (nrows, ncols) = self.shape(block);
        let triplets = &self.triplets[block.index()];
        let rows = triplets.iter().map(|t| t.0).collect();
        let cols = triplets.iter().map(|t| t.1).collect();
        let vals = triplets.iter().map(|t| t.2).collect();
        let coo = CooMatrix::try_from_triplets(nrows, ncols, rows, cols, vals).map_err(|e| {
            DaeError::Sparse(format!("{} block {nrows}x{ncols}: {e}", block.name()))
        })?;
        Ok(CscMatrix::from(&coo))
    }

    /// Full Jacobian `[[fx, fy], [gx, gy]]`.
    pub fn jacobian(&self) -> Result<CscMatrix<f64>> {
        let [fx, fy, gx, gy] = JacBlock::ALL.map(|b| self.build(b));
        let top = csc_hstack(&[&fx?, &fy?])?;
        let bottom = csc_hstack(&[&gx?, &gy?])?;
        csc_vstack(&[&top, &bottom])
    }

    /// `[f; g]`
    pub fn residual(&self) -> DVector<f64> {
        let mut r = DVector::zeros(self.n + self.m);
        r.rows_mut(0, self.n).copy_from(&self.f);
        r.rows_mut(self.n, self.m).copy_from(&self.g);
        r
    }

    /// `[x; y]`
    pub fn values(&self) -> DVector<f64> {
        let mut v = DVector::zeros(self.n + self.m);
        v.rows_mut(0, self.n).copy_from(&self.x);
        v.rows_mut(self.n, self.m).copy_from(&self.y);
        v
    }

    /// Adds `dx` to `[x; y]`.
    pub fn apply_increment(&mut self, dx: &[f64]) {
        for (x, d) in self.x.iter_mut().zip(&dx[..self.n]) {
            *x += d;
        }
        for (y, d) in self.y.iter_mut().zip(&dx[self.n..]) {
            *y += d;
        }
    }
}
