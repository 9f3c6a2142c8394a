use std::fmt;

use super::{service::NumericFn, var::Var};

/// One of the four Jacobian blocks `d(f|g)/d(x|y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JacBlock {
    Fx,
    Fy,
    Gx,
    Gy,
}

impl JacBlock {
    pub const ALL: [JacBlock; 4] = [JacBlock::Fx, JacBlock::Fy, JacBlock::Gx, JacBlock::Gy];

    /// Block for the derivative of an equation of kind `eq_state` with
    /// respect to a variable of kind `var_state`.
    pub fn of(eq_state: bool, var_state: bool) -> Self {
        match (eq_state, var_state) {
            (true, true) => JacBlock::Fx,
            (true, false) => JacBlock::Fy,
            (false, true) => JacBlock::Gx,
            (false, false) => JacBlock::Gy,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            JacBlock::Fx => "fx",
            JacBlock::Fy => "fy",
            JacBlock::Gx => "gx",
            JacBlock::Gy => "gy",
        }
    }
}

/// User-supplied Jacobian value.
#[derive(Clone)]
pub enum NumericValue {
    Const(f64),
    Func(NumericFn),
}

impl fmt::Debug for NumericValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericValue::Const(v) => write!(f, "Const({v})"),
            NumericValue::Func(_) => write!(f, "Func"),
        }
    }
}

/// Jacobian entry between two named variables that bypasses symbolic
/// differentiation.
#[derive(Debug, Clone)]
pub struct NumericJac {
    pub block: JacBlock,
    pub row: String,
    pub col: String,
    pub value: NumericValue,
}

/// Sub-component whose variables are exported into the owning model as
/// `<block>_<var>` and whose numeric Jacobian entries are merged after the
/// model's own.
#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub info: String,
    pub vars: Vec<Var>,
    pub jacs: Vec<NumericJac>,
}

impl Block {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            info: String::new(),
            vars: Vec::new(),
            jacs: Vec::new(),
        }
    }

    pub fn info(mut self, info: &str) -> Self {
        self.info = info.to_string();
        self
    }

    /// Adds a variable; its name is prefixed with the block name. Equation
    /// strings must already use the exported names.
    pub fn var(mut self, mut var: Var) -> Self {
        var.name = format!("{}_{}", self.name, var.name);
        var.tex_name = var.name.clone();
        self.vars.push(var);
        self
    }

    /// Adds a numeric Jacobian entry between two exported names.
    pub fn jac(mut self, block: JacBlock, row: &str, col: &str, value: NumericValue) -> Self {
        self.jacs.push(NumericJac {
            block,
            row: row.to_string(),
            col: col.to_string(),
            value,
        });
        self
    }

    /// First-order lag `T dy/dt = K u - y` exporting state `<name>_y`.
    ///
    /// `input`, `gain` and `t_const` are symbol names of the owning model.
    pub fn lag(name: &str, input: &str, gain: &str, t_const: &str) -> Self {
        let y = format!("{name}_y");
        Block::new(name).info("first-order lag").var(
            Var::state("y")
                .info("lag output")
                .v_str(&format!("{gain} * {input}"))
                .e_str(&format!("({gain} * {input} - {y}) / {t_const}")),
        )
    }
}
