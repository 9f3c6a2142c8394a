//! Global Jacobian triplets of one model.
//!
//! Local entries `(row, col)` from symbolic processing are expanded with the
//! address arrays of the row and column variables. Constant entries keep a
//! single value; the rest are re-evaluated on every Jacobian update.

use crate::basic::{
    error::{DaeError, Result},
    model::{JacBlock, JacValue, Model, NumericFn, NumericValue},
    symbolic::{Compiled, Frame},
};

#[derive(Debug, Clone)]
pub enum TripletSource {
    Const(f64),
    Call(Compiled),
    Numeric(NumericFnDebug),
}

/// [`NumericFn`] with a placeholder `Debug`.
#[derive(Clone)]
pub struct NumericFnDebug(pub NumericFn);

impl std::fmt::Debug for NumericFnDebug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NumericFn")
    }
}

#[derive(Debug, Clone)]
pub struct TripletEntry {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub source: TripletSource,
}

#[derive(Debug, Clone, Default)]
pub struct Triplets {
    entries: [Vec<TripletEntry>; 4],
}

fn addresses(model: &Model, row: &str, col: &str) -> Result<(Vec<usize>, Vec<usize>)> {
    let lookup = |name: &str| {
        model.vars.get(name).map(|v| v.a.clone()).ok_or_else(|| DaeError::Lookup {
            model: model.name.clone(),
            what: format!("jacobian variable <{name}>"),
        })
    };
    let (rows, cols) = (lookup(row)?, lookup(col)?);
    if rows.len() != model.n() || cols.len() != model.n() {
        return Err(DaeError::AddressMismatch {
            model: model.name.clone(),
            row: row.to_string(),
            col: col.to_string(),
            nrow: rows.len(),
            ncol: cols.len(),
        });
    }
    Ok((rows, cols))
}

impl Triplets {
    /// Expands the generated and numeric Jacobian entries of `model` into
    /// global addresses. Unused or unaddressed models yield no entries.
    pub fn build(model: &Model) -> Result<Self> {
        let mut out = Self::default();
        if !model.in_use() || !model.flags.address {
            return Ok(out);
        }
        for block in JacBlock::ALL {
            for entry in model.calls.jac(block) {
                let row = &model.vars[model.order[entry.row]].name;
                let col = &model.vars[model.order[entry.col]].name;
                let (rows, cols) = addresses(model, row, col)?;
                let source = match &entry.value {
                    JacValue::Const(v) => TripletSource::Const(*v),
                    JacValue::Call(f) => TripletSource::Call(f.clone()),
                };
                out.entries[block.index()].push(TripletEntry { rows, cols, source });
            }
        }
        let numeric = model
            .numeric_jacs
            .iter()
            .chain(model.blocks.values().flat_map(|b| b.jacs.iter()));
        for jac in numeric {
            let (rows, cols) = addresses(model, &jac.row, &jac.col)?;
            let source = match &jac.value {
                NumericValue::Const(v) => TripletSource::Const(*v),
                NumericValue::Func(f) => TripletSource::Numeric(NumericFnDebug(f.clone())),
            };
            out.entries[jac.block.index()].push(TripletEntry { rows, cols, source });
        }
        Ok(out)
    }

    pub fn entries(&self, block: JacBlock) -> &[TripletEntry] {
        &self.entries[block.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Vec::is_empty)
    }

    /// Global `(row, col)` positions of a block, without values.
    pub fn pattern(&self, block: JacBlock) -> Vec<(usize, usize)> {
        self.entries(block)
            .iter()
            .flat_map(|e| e.rows.iter().copied().zip(e.cols.iter().copied()))
            .collect()
    }

    /// Evaluates every entry of `block` at the current frame and hands the
    /// global triplets to `sink`.
    pub fn visit(&self, block: JacBlock, frame: &Frame, mut sink: impl FnMut(usize, usize, f64)) {
        for e in self.entries(block) {
            let values = match &e.source {
                TripletSource::Const(v) => vec![*v; e.rows.len()],
                TripletSource::Call(f) => f.eval(frame),
                TripletSource::Numeric(f) => (f.0)(frame),
            };
            let values = if values.len() == 1 && e.rows.len() != 1 {
                vec![values[0]; e.rows.len()]
            } else {
                values
            };
            for ((r, c), v) in e.rows.iter().zip(&e.cols).zip(values) {
                sink(*r, *c, v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::basic::model::Var;

    fn addressed() -> Model {
        let mut model = Model::new("M", "Test")
            .with(Var::algeb("x").e_str("x * y"))
            .with(Var::algeb("y").e_str("3 * y"));
        model.prepare().unwrap();
        model.add(&json!({})).unwrap();
        model.add(&json!({})).unwrap();
        model.set_arrays();
        model.vars["x"].a = vec![0, 1];
        model.vars["y"].a = vec![4, 5];
        model.flags.address = true;
        model
    }

    #[test]
    fn entries_expand_to_global_addresses() {
        let model = addressed();
        let trip = Triplets::build(&model).unwrap();
        assert_eq!(
            trip.pattern(JacBlock::Gy),
            vec![(0, 0), (1, 1), (0, 4), (1, 5), (4, 4), (5, 5)]
        );
        assert!(trip.entries(JacBlock::Fx).is_empty());
        let mut values = Vec::new();
        trip.visit(JacBlock::Gy, &model.frame, |r, c, v| values.push((r, c, v)));
        assert_eq!(values[4], (4, 4, 3.0));
    }

    #[test]
    fn numeric_jacobians_are_merged_last() {
        let mut model = addressed();
        model.add_jac(JacBlock::Gy, "x", "y", NumericValue::Const(-1.0));
        let trip = Triplets::build(&model).unwrap();
        let pattern = trip.pattern(JacBlock::Gy);
        assert_eq!(&pattern[6..], &[(0, 4), (1, 5)]);
    }

    #[test]
    fn short_address_array_is_rejected() {
        let mut model = addressed();
        model.vars["y"].a = vec![4];
        assert!(matches!(
            Triplets::build(&model),
            Err(DaeError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn unaddressed_model_has_no_entries() {
        let mut model = addressed();
        model.flags.address = false;
        assert!(Triplets::build(&model).unwrap().is_empty());
    }
}
