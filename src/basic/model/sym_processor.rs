use indexmap::IndexSet;
use log::{debug, warn};

use crate::basic::{
    error::{DaeError, Result},
    symbolic::{Compiled, Expr, parse},
};

use super::{
    Model,
    block::JacBlock,
    calls::{JacEntry, JacValue, ModelCall},
    service::ServiceKind,
};

/// Name of the simulation-time symbol visible to every model.
pub const DAE_T: &str = "dae_t";

/// Output of symbolic processing for one model.
pub(crate) struct Generated {
    pub names: IndexSet<String>,
    pub order: Vec<usize>,
    pub calls: ModelCall,
}

/// Column order of a model's variables: states, external states,
/// algebraics, external algebraics; declaration order within each group.
pub(crate) fn column_order(model: &Model) -> Vec<usize> {
    let mut order: Vec<usize> = (0..model.vars.len()).collect();
    order.sort_by_key(|&i| model.vars[i].kind.rank());
    order
}

/// Symbols visible to equation strings, in frame order.
pub(crate) fn symbol_names(model: &Model, order: &[usize]) -> IndexSet<String> {
    let mut names = IndexSet::new();
    let mut insert = |name: &str| {
        if !names.insert(name.to_string()) {
            warn!("{}: symbol <{name}> is defined more than once", model.name);
        }
    };
    for name in model.data.num_params.keys() {
        insert(name.as_str());
    }
    for name in model.ext_params.keys() {
        insert(name.as_str());
    }
    for name in model.services.keys() {
        insert(name.as_str());
    }
    for lim in model.discrete.values() {
        for flag in lim.flag_names() {
            insert(flag.as_str());
        }
    }
    for &i in order {
        insert(model.vars[i].name.as_str());
    }
    for name in model.config.keys() {
        insert(name.as_str());
    }
    insert(DAE_T);
    names
}

fn parse_checked(model: &str, src: &str, names: &IndexSet<String>) -> Result<Expr> {
    let expr = parse(src).map_err(|msg| DaeError::Parse {
        model: model.to_string(),
        expr: src.to_string(),
        msg,
    })?;
    if let Some(symbol) = expr.free_symbols().into_iter().find(|s| !names.contains(s)) {
        return Err(DaeError::UnknownSymbol {
            model: model.to_string(),
            expr: src.to_string(),
            symbol,
        });
    }
    Ok(expr)
}

fn compile(model: &str, src: &str, expr: Expr, names: &IndexSet<String>) -> Result<Compiled> {
    Compiled::new(expr, names).map_err(|symbol| DaeError::UnknownSymbol {
        model: model.to_string(),
        expr: src.to_string(),
        symbol,
    })
}

/// Parses, differentiates and compiles every expression of `model`.
///
/// Depends only on the model definition, so running it twice yields the same
/// structure.
pub(crate) fn generate(model: &Model) -> Result<Generated> {
    let name = model.name.as_str();
    let order = column_order(model);
    let names = symbol_names(model, &order);
    let mut pos_of = vec![0; order.len()];
    for (pos, &vi) in order.iter().enumerate() {
        pos_of[vi] = pos;
    }

    let mut calls = ModelCall::default();

    for lim in model.discrete.values() {
        for input in [&lim.u, &lim.lower, &lim.upper] {
            if !names.contains(input) {
                return Err(DaeError::UnknownSymbol {
                    model: name.to_string(),
                    expr: format!("{}({}, {}, {})", lim.name, lim.u, lim.lower, lim.upper),
                    symbol: input.clone(),
                });
            }
        }
    }

    for (si, svc) in model.services.values().enumerate() {
        if let ServiceKind::Const(src) = &svc.kind {
            let expr = parse_checked(name, src, &names)?;
            calls.services.push((si, compile(name, src, expr, &names)?));
        }
    }

    for (vi, var) in model.vars.values().enumerate() {
        if let Some(src) = &var.v_str {
            let expr = parse_checked(name, src, &names)?;
            let implicit = Expr::sub(expr.clone(), Expr::sym(&var.name));
            calls.init.push((vi, compile(name, src, expr, &names)?));
            calls
                .init_implicit
                .push((vi, compile(name, src, implicit, &names)?));
        }
        if let Some(src) = &var.v_iter {
            let expr = parse_checked(name, src, &names)?;
            calls.iter.push((vi, compile(name, src, expr, &names)?));
        }
    }

    for &vi in &order {
        let var = &model.vars[vi];
        let Some(src) = &var.e_str else {
            continue;
        };
        let expr = parse_checked(name, src, &names)?;
        let eq_state = var.kind.is_state();
        for (col, &ci) in order.iter().enumerate() {
            let wrt = &model.vars[ci];
            let d = expr.diff(&wrt.name);
            if d.is_zero() {
                continue;
            }
            let value = match d.constant() {
                Some(c) => JacValue::Const(c),
                None => JacValue::Call(compile(name, src, d, &names)?),
            };
            let block = JacBlock::of(eq_state, wrt.kind.is_state());
            calls.jacs[block.index()].push(JacEntry {
                row: pos_of[vi],
                col,
                value,
            });
        }
        let f = compile(name, src, expr, &names)?;
        if eq_state {
            calls.f.push((vi, f));
        } else {
            calls.g.push((vi, f));
        }
    }

    for &vi in &order {
        let var = &model.vars[vi];
        if !var.kind.is_state() && var.diag_eps != 0.0 {
            calls.jacs[JacBlock::Gy.index()].push(JacEntry {
                row: pos_of[vi],
                col: pos_of[vi],
                value: JacValue::Const(var.diag_eps),
            });
        }
    }

    debug!(
        "{name}: generated {} f, {} g, {} jacobian entries",
        calls.f.len(),
        calls.g.len(),
        calls.jacs.iter().map(Vec::len).sum::<usize>()
    );
    Ok(Generated {
        names,
        order,
        calls,
    })
}
