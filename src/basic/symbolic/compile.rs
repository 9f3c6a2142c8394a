use std::{fmt, sync::Arc};

use indexmap::IndexSet;

use super::expr::Expr;

type Kernel = Arc<dyn Fn(&[Vec<f64>], usize) -> f64 + Send + Sync>;

/// Column-per-symbol input buffer shared by every compiled function of a model.
///
/// The symbol order is fixed when the frame is created; compiled kernels hold
/// column indices, never names. Each column has one entry per device.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    names: IndexSet<String>,
    cols: Vec<Vec<f64>>,
    n: usize,
}

impl Frame {
    pub fn new(names: IndexSet<String>, n: usize) -> Self {
        let cols = vec![vec![0.0; n]; names.len()];
        Self { names, cols, n }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn names(&self) -> &IndexSet<String> {
        &self.names
    }

    pub fn index(&self, name: &str) -> Option<usize> {
        self.names.get_index_of(name)
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.index(name).map(|i| self.cols[i].as_slice())
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.cols
    }

    /// Copies `values` into column `i`. A single value is broadcast to all
    /// devices.
    pub fn set(&mut self, i: usize, values: &[f64]) {
        let col = &mut self.cols[i];
        if values.len() == 1 && self.n != 1 {
            col.fill(values[0]);
        } else {
            col.copy_from_slice(values);
        }
    }

    pub fn set_scalar(&mut self, i: usize, value: f64) {
        self.cols[i].fill(value);
    }

    /// Name-based write used outside of hot loops; unknown names are ignored.
    pub fn set_named(&mut self, name: &str, values: &[f64]) {
        if let Some(i) = self.index(name) {
            self.set(i, values);
        }
    }
}

/// An expression compiled into a closure over a [`Frame`] layout.
#[derive(Clone)]
pub struct Compiled {
    expr: Expr,
    kernel: Kernel,
}

impl fmt::Debug for Compiled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Compiled({})", self.expr)
    }
}

impl Compiled {
    /// Compiles `expr` against the symbol order `names`. Returns the first
    /// unknown symbol as the error.
    pub fn new(expr: Expr, names: &IndexSet<String>) -> Result<Self, String> {
        let kernel = build(&expr, names)?;
        Ok(Self { expr, kernel })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn eval_at(&self, frame: &Frame, i: usize) -> f64 {
        (self.kernel)(frame.columns(), i)
    }

    /// Evaluates for every device in the frame.
    pub fn eval(&self, frame: &Frame) -> Vec<f64> {
        let cols = frame.columns();
        (0..frame.n()).map(|i| (self.kernel)(cols, i)).collect()
    }
}

fn kernel<F>(f: F) -> Kernel
where
    F: Fn(&[Vec<f64>], usize) -> f64 + Send + Sync + 'static,
{
    Arc::new(f)
}

fn build(expr: &Expr, names: &IndexSet<String>) -> Result<Kernel, String> {
    let k: Kernel = match expr {
        Expr::Num(v) => {
            let v = *v;
            kernel(move |_, _| v)
        }
        Expr::Sym(s) => {
            let idx = names.get_index_of(s.as_str()).ok_or_else(|| s.clone())?;
            kernel(move |cols, i| cols[idx][i])
        }
        Expr::Neg(a) => {
            let a = build(a, names)?;
            kernel(move |c, i| -a(c, i))
        }
        Expr::Add(a, b) => {
            let (a, b) = (build(a, names)?, build(b, names)?);
            kernel(move |c, i| a(c, i) + b(c, i))
        }
        Expr::Sub(a, b) => {
            let (a, b) = (build(a, names)?, build(b, names)?);
            kernel(move |c, i| a(c, i) - b(c, i))
        }
        Expr::Mul(a, b) => {
            let (a, b) = (build(a, names)?, build(b, names)?);
            kernel(move |c, i| a(c, i) * b(c, i))
        }
        Expr::Div(a, b) => {
            let (a, b) = (build(a, names)?, build(b, names)?);
            kernel(move |c, i| a(c, i) / b(c, i))
        }
        Expr::Pow(a, b) => match **b {
            Expr::Num(p) if p == 2.0 => {
                let a = build(a, names)?;
                kernel(move |c, i| {
                    let x = a(c, i);
                    x * x
                })
            }
            Expr::Num(p) if p.fract() == 0.0 && p.abs() < i32::MAX as f64 => {
                let a = build(a, names)?;
                let p = p as i32;
                kernel(move |c, i| a(c, i).powi(p))
            }
            _ => {
                let (a, b) = (build(a, names)?, build(b, names)?);
                kernel(move |c, i| a(c, i).powf(b(c, i)))
            }
        },
        Expr::Call(f, a) => {
            let (f, a) = (*f, build(a, names)?);
            kernel(move |c, i| f.apply(a(c, i)))
        }
    };
    Ok(k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::symbolic::parse;
    use approx::assert_relative_eq;

    fn frame() -> Frame {
        let names: IndexSet<String> = ["a", "b", "u"].iter().map(|s| s.to_string()).collect();
        let mut f = Frame::new(names, 3);
        f.set(0, &[0.0, 1.0, 2.0]);
        f.set(1, &[2.0]);
        f.set_named("u", &[1.0, 0.0, 1.0]);
        f
    }

    #[test]
    fn test_vectorized_eval() {
        let f = frame();
        let c = Compiled::new(parse("u * (a**2 + b) - sin(0)").unwrap(), f.names()).unwrap();
        assert_eq!(c.eval(&f), vec![2.0, 0.0, 6.0]);
        let c = Compiled::new(parse("b**0.5 * cos(a - a)").unwrap(), f.names()).unwrap();
        assert_relative_eq!(c.eval_at(&f, 1), 2f64.sqrt());
    }

    #[test]
    fn test_unknown_symbol() {
        let f = frame();
        let err = Compiled::new(parse("a + missing").unwrap(), f.names()).unwrap_err();
        assert_eq!(err, "missing");
    }
}
