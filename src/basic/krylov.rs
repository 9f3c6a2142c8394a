//! Matrix-free Newton-Krylov solver used by iterative variable initialization.

use nalgebra::DVector;

/// Restarted GMRES settings.
#[derive(Debug, Clone)]
pub struct GmresConfig {
    /// Maximum number of inner iterations.
    pub max_iter: usize,
    /// Relative residual tolerance.
    pub tol: f64,
    /// Krylov subspace dimension before restart.
    pub restart: usize,
}

impl Default for GmresConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            tol: 1e-10,
            restart: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GmresResult {
    pub x: Vec<f64>,
    pub iterations: usize,
    pub residual: f64,
    pub converged: bool,
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn givens(a: f64, b: f64) -> (f64, f64) {
    if b == 0.0 {
        (1.0, 0.0)
    } else if b.abs() > a.abs() {
        let t = a / b;
        let s = 1.0 / (1.0 + t * t).sqrt();
        (s * t, s)
    } else {
        let t = b / a;
        let c = 1.0 / (1.0 + t * t).sqrt();
        (c, c * t)
    }
}

/// Solves `A x = b` where `A` is only available through `apply`.
pub fn gmres(
    apply: &mut dyn FnMut(&[f64]) -> Vec<f64>,
    b: &[f64],
    config: &GmresConfig,
) -> GmresResult {
    let n = b.len();
    let b_norm = norm(b);
    if b_norm < 1e-30 {
        return GmresResult {
            x: vec![0.0; n],
            iterations: 0,
            residual: 0.0,
            converged: true,
        };
    }

    let mut x = vec![0.0; n];
    let mut total_iter = 0;
    let mut rel_res = f64::NAN;

    while total_iter < config.max_iter {
        let ax = apply(&x);
        let mut r: Vec<f64> = b.iter().zip(&ax).map(|(bi, ai)| bi - ai).collect();
        let r_norm = norm(&r);
        rel_res = r_norm / b_norm;
        if rel_res < config.tol {
            return GmresResult {
                x,
                iterations: total_iter,
                residual: rel_res,
                converged: true,
            };
        }

        let m = config.restart.min(n).max(1);
        let mut v: Vec<Vec<f64>> = Vec::with_capacity(m + 1);
        // column-major Hessenberg: h[k][j] is row j of column k
        let mut h = vec![vec![0.0; m + 1]; m];
        r.iter_mut().for_each(|ri| *ri /= r_norm);
        v.push(r);
        let mut g = vec![0.0; m + 1];
        g[0] = r_norm;
        let mut cs = vec![0.0; m];
        let mut sn = vec![0.0; m];

        let mut k = 0;
        while k < m && total_iter < config.max_iter {
            total_iter += 1;
            let mut w = apply(&v[k]);
            for j in 0..=k {
                let hjk = dot(&v[j], &w);
                h[k][j] = hjk;
                for (wi, vi) in w.iter_mut().zip(&v[j]) {
                    *wi -= hjk * vi;
                }
            }
            let w_norm = norm(&w);
            h[k][k + 1] = w_norm;
            let breakdown = w_norm < 1e-30;
            if !breakdown {
                v.push(w.iter().map(|wi| wi / w_norm).collect());
            }

            for j in 0..k {
                let t = cs[j] * h[k][j] + sn[j] * h[k][j + 1];
                h[k][j + 1] = -sn[j] * h[k][j] + cs[j] * h[k][j + 1];
                h[k][j] = t;
            }
            let (c, s) = givens(h[k][k], h[k][k + 1]);
            cs[k] = c;
            sn[k] = s;
            h[k][k] = c * h[k][k] + s * h[k][k + 1];
            h[k][k + 1] = 0.0;
            let t = c * g[k] + s * g[k + 1];
            g[k + 1] = -s * g[k] + c * g[k + 1];
            g[k] = t;

            k += 1;
            if breakdown || g[k].abs() / b_norm < config.tol {
                break;
            }
        }

        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let mut sum = g[i];
            for j in (i + 1)..k {
                sum -= h[j][i] * y[j];
            }
            if h[i][i].abs() > 1e-30 {
                y[i] = sum / h[i][i];
            }
        }
        for (yi, vi) in y.iter().zip(&v) {
            for (xj, vij) in x.iter_mut().zip(vi) {
                *xj += yi * vij;
            }
        }
    }

    let ax = apply(&x);
    let res = norm(&b.iter().zip(&ax).map(|(bi, ai)| bi - ai).collect::<Vec<_>>());
    if res.is_finite() {
        rel_res = res / b_norm;
    }
    GmresResult {
        x,
        iterations: total_iter,
        residual: rel_res,
        converged: rel_res < config.tol,
    }
}

/// Outer Newton settings.
#[derive(Debug, Clone)]
pub struct KrylovConfig {
    /// Infinity-norm tolerance on the residual.
    pub tol: f64,
    pub max_iter: usize,
    pub gmres: GmresConfig,
}

impl Default for KrylovConfig {
    fn default() -> Self {
        Self {
            tol: 1e-10,
            max_iter: 50,
            gmres: GmresConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NkResult {
    pub x: DVector<f64>,
    pub iterations: usize,
    pub residual: f64,
}

/// Finds a root of `residual` starting from `x0`.
///
/// Jacobian-vector products are forward differences of `residual`; each step
/// is damped by halving until the residual norm decreases.
pub fn newton_krylov<F>(
    mut residual: F,
    x0: DVector<f64>,
    config: &KrylovConfig,
) -> Result<NkResult, String>
where
    F: FnMut(&DVector<f64>) -> DVector<f64>,
{
    let mut x = x0;
    let mut fx = residual(&x);
    for iter in 0..=config.max_iter {
        if fx.iter().any(|v| !v.is_finite()) {
            return Err(format!("residual is not finite at step {iter}"));
        }
        let err = fx.amax();
        if err < config.tol {
            return Ok(NkResult {
                x,
                iterations: iter,
                residual: err,
            });
        }
        if iter == config.max_iter {
            break;
        }

        let rhs: Vec<f64> = fx.iter().map(|v| -v).collect();
        let x_norm = x.norm();
        let f0 = fx.clone();
        let base = x.clone();
        let mut jv = |v: &[f64]| -> Vec<f64> {
            let v_norm = norm(v);
            if v_norm == 0.0 {
                return vec![0.0; v.len()];
            }
            let eps = f64::EPSILON.sqrt() * (1.0 + x_norm) / v_norm;
            let xp = &base + DVector::from_column_slice(v) * eps;
            let fp = residual(&xp);
            fp.iter().zip(f0.iter()).map(|(a, b)| (a - b) / eps).collect()
        };
        let inner = gmres(&mut jv, &rhs, &config.gmres);
        let dx = DVector::from_vec(inner.x);

        let f_norm = fx.norm();
        let mut alpha = 1.0;
        loop {
            let trial = &x + &dx * alpha;
            let f_trial = residual(&trial);
            if f_trial.norm() < (1.0 - 1e-4 * alpha) * f_norm || alpha < 1e-4 {
                x = trial;
                fx = f_trial;
                break;
            }
            alpha *= 0.5;
        }
    }
    Err(format!(
        "no convergence in {} steps, residual {:.3e}",
        config.max_iter,
        fx.amax()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn gmres_solves_small_dense_system() {
        let a = [[4.0, 1.0], [1.0, 3.0]];
        let mut apply = |x: &[f64]| -> Vec<f64> {
            vec![
                a[0][0] * x[0] + a[0][1] * x[1],
                a[1][0] * x[0] + a[1][1] * x[1],
            ]
        };
        let res = gmres(&mut apply, &[1.0, 2.0], &GmresConfig::default());
        assert!(res.converged);
        assert_abs_diff_eq!(res.x[0], 1.0 / 11.0, epsilon = 1e-9);
        assert_abs_diff_eq!(res.x[1], 7.0 / 11.0, epsilon = 1e-9);
    }

    #[test]
    fn scalar_root() {
        let sol = newton_krylov(
            |x: &DVector<f64>| x.map(|v| v * v - 2.0),
            DVector::from_element(1, 1.0),
            &KrylovConfig::default(),
        )
        .unwrap();
        assert_abs_diff_eq!(sol.x[0], 2f64.sqrt(), epsilon = 1e-8);
    }

    #[test]
    fn coupled_system() {
        let f = |x: &DVector<f64>| {
            DVector::from_vec(vec![x[0] * x[0] + x[1] * x[1] - 4.0, x[0] - x[1]])
        };
        let sol = newton_krylov(f, DVector::from_vec(vec![1.0, 0.5]), &KrylovConfig::default())
            .unwrap();
        assert_abs_diff_eq!(sol.x[0], 2f64.sqrt(), epsilon = 1e-8);
        assert_abs_diff_eq!(sol.x[1], 2f64.sqrt(), epsilon = 1e-8);
    }

    #[test]
    fn non_finite_residual_is_an_error() {
        let res = newton_krylov(
            |x: &DVector<f64>| x.map(|v| v.ln()),
            DVector::from_element(1, -1.0),
            &KrylovConfig::default(),
        );
        assert!(res.is_err());
    }
}
