use crate::basic::symbolic::Compiled;

use super::block::JacBlock;

/// Value of a generated Jacobian entry.
#[derive(Debug, Clone)]
pub enum JacValue {
    /// Derivative without free symbols.
    Const(f64),
    Call(Compiled),
}

/// Generated Jacobian entry in local coordinates: `row` and `col` are
/// positions in the model's column order.
#[derive(Debug, Clone)]
pub struct JacEntry {
    pub row: usize,
    pub col: usize,
    pub value: JacValue,
}

/// Compiled functions of one model, produced at preparation time.
///
/// Equation, initializer and iteration lists hold `(var, function)` pairs
/// where `var` is the declaration-order position in `Model::vars`.
#[derive(Debug, Clone, Default)]
pub struct ModelCall {
    pub f: Vec<(usize, Compiled)>,
    pub g: Vec<(usize, Compiled)>,
    pub init: Vec<(usize, Compiled)>,
    /// `v_str - var`, zero at a consistent initial point.
    pub init_implicit: Vec<(usize, Compiled)>,
    pub iter: Vec<(usize, Compiled)>,
    /// Expression services by declaration-order position.
    pub services: Vec<(usize, Compiled)>,
    pub jacs: [Vec<JacEntry>; 4],
}

impl ModelCall {
    pub fn jac(&self, block: JacBlock) -> &[JacEntry] {
        &self.jacs[block.index()]
    }

    /// `(block, row, col)` of every generated entry, for structure checks.
    pub fn jac_pattern(&self) -> Vec<(JacBlock, usize, usize)> {
        JacBlock::ALL
            .iter()
            .flat_map(|&b| self.jac(b).iter().map(move |e| (b, e.row, e.col)))
            .collect()
    }
}
