use std::{collections::BTreeSet, fmt};

use num_traits::{One, Zero};

/// Elementary functions recognized by the equation parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Log,
    Sqrt,
    Abs,
    Sign,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" => Func::Asin,
            "acos" => Func::Acos,
            "atan" => Func::Atan,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "exp" => Func::Exp,
            "log" | "ln" => Func::Log,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            "sign" | "sgn" => Func::Sign,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Asin => "asin",
            Func::Acos => "acos",
            Func::Atan => "atan",
            Func::Sinh => "sinh",
            Func::Cosh => "cosh",
            Func::Tanh => "tanh",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Sqrt => "sqrt",
            Func::Abs => "abs",
            Func::Sign => "sign",
        }
    }

    pub fn apply(self, x: f64) -> f64 {
        match self {
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tan => x.tan(),
            Func::Asin => x.asin(),
            Func::Acos => x.acos(),
            Func::Atan => x.atan(),
            Func::Sinh => x.sinh(),
            Func::Cosh => x.cosh(),
            Func::Tanh => x.tanh(),
            Func::Exp => x.exp(),
            Func::Log => x.ln(),
            Func::Sqrt => x.sqrt(),
            Func::Abs => x.abs(),
            Func::Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Expression tree for equation strings.
///
/// Nodes are built through the folding constructors ([`Expr::add`],
/// [`Expr::mul`], ...) so that derivatives come out simplified and a
/// structurally zero derivative is exactly `Num(0.0)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Sym(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

impl Expr {
    pub fn sym(name: &str) -> Expr {
        Expr::Sym(name.to_string())
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Num(v) if v.is_zero())
    }

    fn is_one(&self) -> bool {
        matches!(self, Expr::Num(v) if v.is_one())
    }

    fn as_num(&self) -> Option<f64> {
        match self {
            Expr::Num(v) => Some(*v),
            _ => None,
        }
    }

    pub fn neg(a: Expr) -> Expr {
        match a {
            Expr::Num(v) => Expr::Num(-v),
            Expr::Neg(inner) => *inner,
            other => Expr::Neg(Box::new(other)),
        }
    }

    pub fn add(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(x + y),
            _ if a.is_zero() => b,
            _ if b.is_zero() => a,
            _ => match b {
                Expr::Neg(inner) => Expr::Sub(Box::new(a), inner),
                b => Expr::Add(Box::new(a), Box::new(b)),
            },
        }
    }

    pub fn sub(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(x - y),
            _ if b.is_zero() => a,
            _ if a.is_zero() => Expr::neg(b),
            _ => Expr::Sub(Box::new(a), Box::new(b)),
        }
    }

    pub fn mul(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(x * y),
            _ if a.is_zero() || b.is_zero() => Expr::Num(0.0),
            _ if a.is_one() => b,
            _ if b.is_one() => a,
            (Some(x), _) if x == -1.0 => Expr::neg(b),
            (_, Some(y)) if y == -1.0 => Expr::neg(a),
            _ => match (a, b) {
                // fold nested numeric coefficients: c * (k * r) -> (c*k) * r
                (Expr::Num(c), Expr::Mul(l, r)) if l.as_num().is_some() => {
                    let k = l.as_num().unwrap_or(1.0);
                    Expr::mul(Expr::Num(c * k), *r)
                }
                (a, b) => Expr::Mul(Box::new(a), Box::new(b)),
            },
        }
    }

    pub fn div(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) if y != 0.0 => Expr::Num(x / y),
            _ if a.is_zero() && !b.is_zero() => Expr::Num(0.0),
            _ if b.is_one() => a,
            _ => Expr::Div(Box::new(a), Box::new(b)),
        }
    }

    pub fn pow(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(x.powf(y)),
            (_, Some(y)) if y == 0.0 => Expr::Num(1.0),
            (_, Some(y)) if y == 1.0 => a,
            _ => Expr::Pow(Box::new(a), Box::new(b)),
        }
    }

    pub fn call(f: Func, a: Expr) -> Expr {
        match a {
            Expr::Num(v) => Expr::Num(f.apply(v)),
            a => Expr::Call(f, Box::new(a)),
        }
    }

    /// Names of all symbols appearing in the expression.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Num(_) => {}
            Expr::Sym(s) => {
                out.insert(s.clone());
            }
            Expr::Neg(a) | Expr::Call(_, a) => a.collect_symbols(out),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Pow(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
        }
    }

    pub fn depends_on(&self, var: &str) -> bool {
        match self {
            Expr::Num(_) => false,
            Expr::Sym(s) => s == var,
            Expr::Neg(a) | Expr::Call(_, a) => a.depends_on(var),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Pow(a, b) => a.depends_on(var) || b.depends_on(var),
        }
    }

    /// Value of a symbol-free expression.
    pub fn constant(&self) -> Option<f64> {
        match self {
            Expr::Num(v) => Some(*v),
            Expr::Sym(_) => None,
            Expr::Neg(a) => a.constant().map(|v| -v),
            Expr::Call(f, a) => a.constant().map(|v| f.apply(v)),
            Expr::Add(a, b) => Some(a.constant()? + b.constant()?),
            Expr::Sub(a, b) => Some(a.constant()? - b.constant()?),
            Expr::Mul(a, b) => Some(a.constant()? * b.constant()?),
            Expr::Div(a, b) => Some(a.constant()? / b.constant()?),
            Expr::Pow(a, b) => Some(a.constant()?.powf(b.constant()?)),
        }
    }

    /// Partial derivative with respect to the symbol `var`.
    pub fn diff(&self, var: &str) -> Expr {
        if !self.depends_on(var) {
            return Expr::Num(0.0);
        }
        match self {
            Expr::Num(_) => Expr::Num(0.0),
            Expr::Sym(s) => Expr::Num(if s == var { 1.0 } else { 0.0 }),
            Expr::Neg(a) => Expr::neg(a.diff(var)),
            Expr::Add(a, b) => Expr::add(a.diff(var), b.diff(var)),
            Expr::Sub(a, b) => Expr::sub(a.diff(var), b.diff(var)),
            Expr::Mul(a, b) => Expr::add(
                Expr::mul(a.diff(var), (**b).clone()),
                Expr::mul((**a).clone(), b.diff(var)),
            ),
            Expr::Div(a, b) => {
                let (a, b) = (&**a, &**b);
                if !b.depends_on(var) {
                    return Expr::div(a.diff(var), b.clone());
                }
                Expr::div(
                    Expr::sub(
                        Expr::mul(a.diff(var), b.clone()),
                        Expr::mul(a.clone(), b.diff(var)),
                    ),
                    Expr::pow(b.clone(), Expr::Num(2.0)),
                )
            }
            Expr::Pow(a, b) => {
                let (a, b) = (&**a, &**b);
                if !b.depends_on(var) {
                    // d(a^c) = c * a^(c-1) * a'
                    Expr::mul(
                        Expr::mul(
                            b.clone(),
                            Expr::pow(a.clone(), Expr::sub(b.clone(), Expr::Num(1.0))),
                        ),
                        a.diff(var),
                    )
                } else {
                    // d(a^b) = a^b * (b' ln a + b a' / a)
                    Expr::mul(
                        self.clone(),
                        Expr::add(
                            Expr::mul(b.diff(var), Expr::call(Func::Log, a.clone())),
                            Expr::div(Expr::mul(b.clone(), a.diff(var)), a.clone()),
                        ),
                    )
                }
            }
            Expr::Call(f, a) => {
                let inner = (**a).clone();
                let outer = match f {
                    Func::Sin => Expr::call(Func::Cos, inner),
                    Func::Cos => Expr::neg(Expr::call(Func::Sin, inner)),
                    Func::Tan => Expr::div(
                        Expr::Num(1.0),
                        Expr::pow(Expr::call(Func::Cos, inner), Expr::Num(2.0)),
                    ),
                    Func::Asin => Expr::div(
                        Expr::Num(1.0),
                        Expr::call(
                            Func::Sqrt,
                            Expr::sub(Expr::Num(1.0), Expr::pow(inner, Expr::Num(2.0))),
                        ),
                    ),
                    Func::Acos => Expr::div(
                        Expr::Num(-1.0),
                        Expr::call(
                            Func::Sqrt,
                            Expr::sub(Expr::Num(1.0), Expr::pow(inner, Expr::Num(2.0))),
                        ),
                    ),
                    Func::Atan => Expr::div(
                        Expr::Num(1.0),
                        Expr::add(Expr::Num(1.0), Expr::pow(inner, Expr::Num(2.0))),
                    ),
                    Func::Sinh => Expr::call(Func::Cosh, inner),
                    Func::Cosh => Expr::call(Func::Sinh, inner),
                    Func::Tanh => Expr::sub(
                        Expr::Num(1.0),
                        Expr::pow(Expr::call(Func::Tanh, inner), Expr::Num(2.0)),
                    ),
                    Func::Exp => Expr::call(Func::Exp, inner),
                    Func::Log => Expr::div(Expr::Num(1.0), inner),
                    Func::Sqrt => Expr::div(
                        Expr::Num(0.5),
                        Expr::call(Func::Sqrt, inner),
                    ),
                    Func::Abs => Expr::call(Func::Sign, inner),
                    // piecewise constant
                    Func::Sign => Expr::Num(0.0),
                };
                Expr::mul(outer, a.diff(var))
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Add(..) | Expr::Sub(..) => 1,
            Expr::Mul(..) | Expr::Div(..) => 2,
            Expr::Neg(_) => 3,
            Expr::Pow(..) => 4,
            Expr::Num(v) if *v < 0.0 => 3,
            _ => 5,
        }
    }

    fn fmt_child(&self, child: &Expr, min: u8, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if child.precedence() < min {
            write!(f, "({child})")
        } else {
            write!(f, "{child}")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.precedence();
        match self {
            Expr::Num(v) => write!(f, "{v}"),
            Expr::Sym(s) => write!(f, "{s}"),
            Expr::Neg(a) => {
                write!(f, "-")?;
                self.fmt_child(a, p + 1, f)
            }
            Expr::Add(a, b) => {
                self.fmt_child(a, p, f)?;
                write!(f, " + ")?;
                self.fmt_child(b, p + 1, f)
            }
            Expr::Sub(a, b) => {
                self.fmt_child(a, p, f)?;
                write!(f, " - ")?;
                self.fmt_child(b, p + 1, f)
            }
            Expr::Mul(a, b) => {
                self.fmt_child(a, p, f)?;
                write!(f, "*")?;
                self.fmt_child(b, p + 1, f)
            }
            Expr::Div(a, b) => {
                self.fmt_child(a, p, f)?;
                write!(f, "/")?;
                self.fmt_child(b, p + 1, f)
            }
            Expr::Pow(a, b) => {
                self.fmt_child(a, p + 1, f)?;
                write!(f, "**")?;
                self.fmt_child(b, p, f)
            }
            Expr::Call(func, a) => write!(f, "{}({a})", func.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::sym("x")
    }

    #[test]
    fn test_folding() {
        assert_eq!(Expr::mul(Expr::Num(0.0), x()), Expr::Num(0.0));
        assert_eq!(Expr::add(x(), Expr::Num(0.0)), x());
        assert_eq!(Expr::pow(x(), Expr::Num(1.0)), x());
        assert_eq!(Expr::neg(Expr::neg(x())), x());
        assert_eq!(Expr::div(Expr::Num(1.0), Expr::Num(4.0)), Expr::Num(0.25));
    }

    #[test]
    fn test_diff_polynomial() {
        // d/dx (3*x**2 + y) = 6*x
        let e = Expr::add(
            Expr::mul(Expr::Num(3.0), Expr::pow(x(), Expr::Num(2.0))),
            Expr::sym("y"),
        );
        let d = e.diff("x");
        assert_eq!(d, Expr::mul(Expr::Num(6.0), x()));
        assert!(e.diff("z").is_zero());
        assert_eq!(e.diff("y"), Expr::Num(1.0));
    }

    #[test]
    fn test_diff_trig_chain() {
        // d/dx sin(2*x) = cos(2*x)*2
        let e = Expr::call(Func::Sin, Expr::mul(Expr::Num(2.0), x()));
        let d = e.diff("x");
        assert_eq!(
            d,
            Expr::mul(
                Expr::call(Func::Cos, Expr::mul(Expr::Num(2.0), x())),
                Expr::Num(2.0)
            )
        );
    }

    #[test]
    fn test_constant_and_symbols() {
        let e = Expr::add(Expr::sym("b"), Expr::mul(Expr::sym("a"), x()));
        let names: Vec<_> = e.free_symbols().into_iter().collect();
        assert_eq!(names, vec!["a", "b", "x"]);
        assert_eq!(e.diff("x").constant(), None);
        assert_eq!(Expr::mul(Expr::Num(2.0), x()).diff("x").constant(), Some(2.0));
    }

    #[test]
    fn test_display_parenthesizes() {
        let e = Expr::mul(Expr::add(x(), Expr::Num(1.0)), Expr::sym("y"));
        assert_eq!(e.to_string(), "(x + 1)*y");
        let p = Expr::pow(x(), Expr::Num(2.0));
        assert_eq!(Expr::neg(p).to_string(), "-x**2");
    }
}
