//! Declarative device models.
//!
//! A [`Model`] is declared once with parameters, variables, services,
//! limiters and blocks; [`Model::prepare`] turns the equation strings into
//! compiled functions and Jacobian entries. Devices are then added as
//! keyword records and evaluated as arrays.

use std::{fmt, sync::Arc};

use derive_more::From;
use indexmap::IndexMap;
use log::{debug, warn};
use nalgebra::DVector;

use super::{
    config::Config,
    error::{DaeError, Result},
    krylov::{KrylovConfig, newton_krylov},
    symbolic::Frame,
    triplet::Triplets,
};

mod block;
mod calls;
mod data;
mod discrete;
mod doc;
mod param;
mod service;
mod sym_processor;
mod var;

pub use block::{Block, JacBlock, NumericJac, NumericValue};
pub use calls::{JacEntry, JacValue, ModelCall};
pub use data::ModelData;
pub use discrete::Limiter;
pub use param::{DataParam, ExtParam, Idx, IdxParam, NumParam, ParamProp};
pub use service::{NumericFn, Service, ServiceKind};
pub use sym_processor::DAE_T;
pub use var::{ExtRef, Var, VarKind};

/// Custom numeric code run at a fixed point of the update cycle.
pub type Hook = Arc<dyn Fn(&mut Model) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    /// Runs last during initialization.
    pub v_numeric: Option<Hook>,
    /// Runs after all services are resolved.
    pub s_numeric: Option<Hook>,
    /// Runs after the compiled `f` equations.
    pub f_numeric: Option<Hook>,
    /// Runs after the compiled `g` equations.
    pub g_numeric: Option<Hook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("v_numeric", &self.v_numeric.is_some())
            .field("s_numeric", &self.s_numeric.is_some())
            .field("f_numeric", &self.f_numeric.is_some())
            .field("g_numeric", &self.g_numeric.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelFlags {
    /// Participates in power flow.
    pub pflow: bool,
    pub prepared: bool,
    /// Variables hold valid global addresses.
    pub address: bool,
    pub initialized: bool,
}

/// Anything that can be declared on a model.
#[derive(Debug, Clone, From)]
pub enum Attribute {
    Num(NumParam),
    Idx(IdxParam),
    Data(DataParam),
    Ext(ExtParam),
    Var(Var),
    Service(Service),
    Limiter(Limiter),
    Block(Block),
}

#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub group: String,
    pub info: String,
    pub data: ModelData,
    pub config: Config,
    pub ext_params: IndexMap<String, ExtParam>,
    pub vars: IndexMap<String, Var>,
    pub services: IndexMap<String, Service>,
    pub discrete: IndexMap<String, Limiter>,
    pub blocks: IndexMap<String, Block>,
    /// Model-level numeric Jacobian entries, merged after generated ones.
    pub numeric_jacs: Vec<NumericJac>,
    pub hooks: Hooks,
    pub flags: ModelFlags,
    pub(crate) calls: ModelCall,
    pub(crate) frame: Frame,
    /// Column order as positions into `vars`.
    pub(crate) order: Vec<usize>,
    /// Frame column of each variable, by `vars` position.
    var_cols: Vec<usize>,
    pub(crate) triplets: Triplets,
}

impl Model {
    pub fn new(name: &str, group: &str) -> Self {
        Self {
            name: name.to_string(),
            group: group.to_string(),
            info: String::new(),
            data: ModelData::new(name),
            config: Config::new(),
            ext_params: IndexMap::new(),
            vars: IndexMap::new(),
            services: IndexMap::new(),
            discrete: IndexMap::new(),
            blocks: IndexMap::new(),
            numeric_jacs: Vec::new(),
            hooks: Hooks::default(),
            flags: ModelFlags {
                pflow: true,
                ..Default::default()
            },
            calls: ModelCall::default(),
            frame: Frame::default(),
            order: Vec::new(),
            var_cols: Vec::new(),
            triplets: Triplets::default(),
        }
    }

    pub fn info(mut self, info: &str) -> Self {
        self.info = info.to_string();
        self
    }

    /// Builder form of [`Model::declare`].
    pub fn with(mut self, attr: impl Into<Attribute>) -> Self {
        self.declare(attr);
        self
    }

    pub fn with_config(mut self, name: &str, default: f64) -> Self {
        self.config.add(name, default);
        self
    }

    fn remove_attribute(&mut self, name: &str) -> bool {
        self.data.num_params.shift_remove(name).is_some()
            || self.data.idx_params.shift_remove(name).is_some()
            || self.data.data_params.shift_remove(name).is_some()
            || self.ext_params.shift_remove(name).is_some()
            || self.vars.shift_remove(name).is_some()
            || self.services.shift_remove(name).is_some()
            || self.discrete.shift_remove(name).is_some()
            || self.blocks.shift_remove(name).is_some()
    }

    fn replace_warn(&mut self, name: &str) {
        if self.remove_attribute(name) {
            warn!("{}: redefinition of <{name}>, the last definition is used", self.name);
        }
    }

    /// Files an attribute into the collection for its kind.
    ///
    /// Redefining an existing name logs a warning and replaces it.
    pub fn declare(&mut self, attr: impl Into<Attribute>) -> &mut Self {
        match attr.into() {
            Attribute::Num(p) => {
                self.replace_warn(&p.name);
                self.data.num_params.insert(p.name.clone(), p);
            }
            Attribute::Idx(p) => {
                self.replace_warn(&p.name);
                self.data.idx_params.insert(p.name.clone(), p);
            }
            Attribute::Data(p) => {
                self.replace_warn(&p.name);
                self.data.data_params.insert(p.name.clone(), p);
            }
            Attribute::Ext(p) => {
                self.replace_warn(&p.name);
                self.ext_params.insert(p.name.clone(), p);
            }
            Attribute::Var(v) => {
                self.replace_warn(&v.name);
                self.vars.insert(v.name.clone(), v);
            }
            Attribute::Service(s) => {
                self.replace_warn(&s.name);
                self.services.insert(s.name.clone(), s);
            }
            Attribute::Limiter(l) => {
                self.replace_warn(&l.name);
                self.discrete.insert(l.name.clone(), l);
            }
            Attribute::Block(b) => {
                self.replace_warn(&b.name);
                for v in &b.vars {
                    self.replace_warn(&v.name);
                    self.vars.insert(v.name.clone(), v.clone());
                }
                self.blocks.insert(b.name.clone(), b);
            }
        }
        self.flags.prepared = false;
        self
    }

    pub fn add_jac(&mut self, block: JacBlock, row: &str, col: &str, value: NumericValue) {
        self.numeric_jacs.push(NumericJac {
            block,
            row: row.to_string(),
            col: col.to_string(),
            value,
        });
    }

    pub fn n(&self) -> usize {
        self.data.n
    }

    pub fn in_use(&self) -> bool {
        self.data.n > 0
    }

    /// Variables in column order.
    pub fn all_vars(&self) -> impl Iterator<Item = &Var> {
        self.order.iter().map(|&i| &self.vars[i])
    }

    pub fn calls(&self) -> &ModelCall {
        &self.calls
    }

    pub fn triplets(&self) -> &Triplets {
        &self.triplets
    }

    /// Names visible to equation strings, in frame order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.frame.names().iter().map(String::as_str)
    }

    /// Generates compiled functions and Jacobian entries from the
    /// declarations. Safe to call repeatedly.
    pub fn prepare(&mut self) -> Result<()> {
        let generated = sym_processor::generate(self)?;
        self.calls = generated.calls;
        self.order = generated.order;
        self.frame = Frame::new(generated.names, self.n());
        self.var_cols = self
            .vars
            .keys()
            .map(|k| self.frame.index(k).unwrap_or(usize::MAX))
            .collect();
        self.flags.prepared = true;
        Ok(())
    }

    /// Adds a device from a keyword record.
    pub fn add(&mut self, record: &serde_json::Value) -> Result<Idx> {
        let idx = self.data.add(record)?;
        self.flags.address = false;
        self.flags.initialized = false;
        Ok(idx)
    }

    /// Sizes every per-device array to the current device count and drops
    /// global addresses.
    pub fn set_arrays(&mut self) {
        let n = self.n();
        for v in self.vars.values_mut() {
            v.set_arrays(n);
        }
        for s in self.services.values_mut() {
            s.v = vec![0.0; n];
        }
        for l in self.discrete.values_mut() {
            l.set_arrays(n);
        }
        for p in self.ext_params.values_mut() {
            p.v = vec![0.0; n];
        }
        self.frame = Frame::new(self.frame.names().clone(), n);
        self.triplets = Triplets::default();
        self.flags.address = false;
    }

    /// Converts power and impedance parameters from the device base `Sn`
    /// to the system base `mva`. Models without `Sn` are left unchanged.
    pub fn convert_pu(&mut self, mva: f64) {
        let Some(sn) = self.data.num_params.get("Sn").map(|p| p.v.clone()) else {
            return;
        };
        let power: Vec<String> = self
            .data
            .find_param(ParamProp::Power)
            .into_iter()
            .map(String::from)
            .collect();
        let z: Vec<String> = self
            .data
            .find_param(ParamProp::Impedance)
            .into_iter()
            .map(String::from)
            .collect();
        let to_sys: Vec<f64> = sn.iter().map(|s| s / mva).collect();
        let to_dev: Vec<f64> = sn.iter().map(|s| mva / s).collect();
        for name in power {
            if let Some(p) = self.data.num_params.get_mut(&name) {
                p.convert(&to_sys);
            }
        }
        for name in z {
            if let Some(p) = self.data.num_params.get_mut(&name) {
                p.convert(&to_dev);
            }
        }
    }

    /// Values of a parameter, external parameter, service or variable.
    pub fn values_of(&self, name: &str) -> Option<&[f64]> {
        if let Some(p) = self.data.num_params.get(name) {
            return Some(&p.v);
        }
        if let Some(p) = self.ext_params.get(name) {
            return Some(&p.v);
        }
        if let Some(s) = self.services.get(name) {
            return Some(&s.v);
        }
        self.vars.get(name).map(|v| v.v.as_slice())
    }

    /// Copies every input into the evaluation frame.
    pub fn refresh_inputs(&mut self, t: f64) {
        for p in self.data.num_params.values() {
            self.frame.set_named(&p.name, &p.v);
        }
        for p in self.ext_params.values() {
            self.frame.set_named(&p.name, &p.v);
        }
        for s in self.services.values() {
            self.frame.set_named(&s.name, &s.v);
        }
        self.sync_flags();
        self.sync_vars();
        for (k, v) in self.config.iter() {
            if let Some(i) = self.frame.index(k) {
                self.frame.set_scalar(i, *v);
            }
        }
        if let Some(i) = self.frame.index(DAE_T) {
            self.frame.set_scalar(i, t);
        }
    }

    /// Copies variable values into the frame.
    pub(crate) fn sync_vars(&mut self) {
        for (var, &col) in self.vars.values().zip(&self.var_cols) {
            if col != usize::MAX {
                self.frame.set(col, &var.v);
            }
        }
    }

    fn sync_flags(&mut self) {
        for lim in self.discrete.values() {
            for (name, values) in lim.flag_names().iter().zip(lim.flags()) {
                self.frame.set_named(name, values);
            }
        }
    }

    /// Resolves services in declaration order. External services must have
    /// been copied in by the system beforehand; numeric services run after
    /// every expression service, then time constants are inverted and the
    /// `s_numeric` hook runs.
    pub fn s_update(&mut self) {
        if !self.in_use() {
            return;
        }
        let n = self.n();
        let mut compiled = self.calls.services.iter().peekable();
        for si in 0..self.services.len() {
            let value = match compiled.peek() {
                Some((pos, f)) if *pos == si => {
                    let value = f.eval(&self.frame);
                    compiled.next();
                    Some(value)
                }
                _ => None,
            };
            let svc = &mut self.services[si];
            if let Some(value) = value {
                svc.set_value(value, n);
            }
            if !matches!(svc.kind, ServiceKind::Numeric(_)) {
                self.frame.set_named(&svc.name, &svc.v);
            }
        }

        for si in 0..self.services.len() {
            let ServiceKind::Numeric(f) = &self.services[si].kind else {
                continue;
            };
            let value = f(&self.frame);
            let svc = &mut self.services[si];
            svc.set_value(value, n);
            self.frame.set_named(&svc.name, &svc.v);
        }

        for svc in self.services.values_mut().filter(|s| s.inverse) {
            for v in svc.v.iter_mut() {
                *v = 1.0 / *v;
            }
            self.frame.set_named(&svc.name, &svc.v);
        }

        if let Some(hook) = self.hooks.s_numeric.clone() {
            hook(self);
            for s in self.services.values() {
                self.frame.set_named(&s.name, &s.v);
            }
        }
    }

    /// Refreshes limiter flags from the current inputs.
    pub fn l_update(&mut self) {
        for lim in self.discrete.values_mut() {
            lim.check(&self.frame, &self.config);
        }
        self.sync_flags();
    }

    /// Evaluates the residuals into each variable's `e`.
    pub fn e_update(&mut self) {
        if !self.in_use() {
            return;
        }
        for var in self.vars.values_mut().filter(|v| !v.e_inplace) {
            var.e.fill(0.0);
        }
        for (vi, f) in self.calls.f.iter().chain(self.calls.g.iter()) {
            let value = f.eval(&self.frame);
            let var = &mut self.vars[*vi];
            if var.e_inplace {
                for (e, v) in var.e.iter_mut().zip(value) {
                    *e += v;
                }
            } else {
                var.e = value;
            }
        }
        if let Some(hook) = self.hooks.f_numeric.clone() {
            hook(self);
        }
        if let Some(hook) = self.hooks.g_numeric.clone() {
            hook(self);
        }
    }

    /// Forgets all global addresses and the sparse pattern built on them.
    pub fn a_reset(&mut self) {
        for var in self.vars.values_mut() {
            var.a_reset();
        }
        self.triplets = Triplets::default();
        self.flags.address = false;
    }

    /// Rebuilds the global sparse pattern from the current addresses.
    pub fn store_sparse_pattern(&mut self) -> Result<()> {
        self.triplets = Triplets::build(self)?;
        Ok(())
    }

    /// Initializes variables: closed-form initializers in declaration order,
    /// then the iterative initializer, then the `v_numeric` hook.
    ///
    /// An initializer that evaluates to a non-finite value leaves the
    /// variable at its previous value.
    pub fn init(&mut self) -> Result<()> {
        self.flags.initialized = false;
        if !self.in_use() {
            self.flags.initialized = true;
            return Ok(());
        }
        for k in 0..self.calls.init.len() {
            let (vi, f) = &self.calls.init[k];
            let vi = *vi;
            let value = f.eval(&self.frame);
            let var = &mut self.vars[vi];
            if value.iter().all(|v| v.is_finite()) {
                var.v = value;
                let col = self.var_cols[vi];
                self.frame.set(col, &var.v);
            } else {
                debug!(
                    "{}: initializer of <{}> is not finite, keeping {:?}",
                    self.name, var.name, var.v
                );
            }
        }

        self.nr_iter()?;

        if let Some(hook) = self.hooks.v_numeric.clone() {
            hook(self);
            self.sync_vars();
        }
        self.flags.initialized = true;
        Ok(())
    }

    /// Solves the `v_iter` residuals for their variables with a
    /// Jacobian-free Newton-Krylov method, all other inputs held fixed.
    fn nr_iter(&mut self) -> Result<()> {
        if self.calls.iter.is_empty() {
            return Ok(());
        }
        let n = self.n();
        let targets: Vec<(usize, usize)> = self
            .calls
            .iter
            .iter()
            .map(|(vi, _)| (*vi, self.var_cols[*vi]))
            .collect();
        let x0: Vec<f64> = targets
            .iter()
            .flat_map(|(vi, _)| self.vars[*vi].v.iter().copied())
            .collect();

        let frame = &mut self.frame;
        let calls = &self.calls.iter;
        let residual = |z: &DVector<f64>| -> DVector<f64> {
            for (k, (_, col)) in targets.iter().enumerate() {
                frame.set(*col, &z.as_slice()[k * n..(k + 1) * n]);
            }
            let out: Vec<f64> = calls.iter().flat_map(|(_, f)| f.eval(&*frame)).collect();
            DVector::from_vec(out)
        };
        let result = newton_krylov(residual, DVector::from_vec(x0.clone()), &KrylovConfig::default());
        let sol = match result {
            Ok(sol) => sol,
            Err(msg) => {
                // drop the last trial point
                for (k, (_, col)) in targets.iter().enumerate() {
                    self.frame.set(*col, &x0[k * n..(k + 1) * n]);
                }
                return Err(DaeError::InitFailed {
                    model: self.name.clone(),
                    msg,
                });
            }
        };
        debug!("{}: iterative init converged in {} steps", self.name, sol.iterations);

        for (k, (vi, col)) in targets.iter().enumerate() {
            let value = sol.x.as_slice()[k * n..(k + 1) * n].to_vec();
            self.frame.set(*col, &value);
            self.vars[*vi].v = value;
        }
        Ok(())
    }

    /// Largest `|v_str - var|` over all closed-form initializers.
    pub fn init_mismatch(&self) -> f64 {
        self.calls
            .init_implicit
            .iter()
            .flat_map(|(_, f)| f.eval(&self.frame))
            .filter(|v| v.is_finite())
            .fold(0.0, |acc: f64, v| acc.max(v.abs()))
    }

    fn position(&self, idx: &Idx) -> Result<usize> {
        self.data.idx2uid(idx)
    }

    /// Reads `attr` (`v`, `vin`, `a` or `e`) of `src` for one device.
    pub fn get(&self, src: &str, idx: &Idx, attr: &str) -> Result<f64> {
        let uid = self.position(idx)?;
        let unknown = || DaeError::UnknownAttribute {
            model: self.name.clone(),
            attr: format!("{src}.{attr}"),
        };
        if let Some(p) = self.data.num_params.get(src) {
            return match attr {
                "v" => Ok(p.v[uid]),
                "vin" => Ok(p.vin[uid]),
                _ => Err(unknown()),
            };
        }
        if let Some(v) = self.vars.get(src) {
            return match attr {
                "v" => Ok(v.v[uid]),
                "e" => Ok(v.e[uid]),
                "a" => v.a.get(uid).map(|a| *a as f64).ok_or_else(unknown),
                _ => Err(unknown()),
            };
        }
        match attr {
            "v" => self.values_of(src).map(|v| v[uid]).ok_or_else(unknown),
            _ => Err(unknown()),
        }
    }

    /// Writes `attr` (`v` or `e`) of a variable or service for one device.
    pub fn set(&mut self, src: &str, idx: &Idx, attr: &str, value: f64) -> Result<()> {
        let uid = self.position(idx)?;
        let name = self.name.clone();
        if let Some(v) = self.vars.get_mut(src) {
            match attr {
                "v" => v.v[uid] = value,
                "e" => v.e[uid] = value,
                _ => {
                    return Err(DaeError::UnknownAttribute {
                        model: name,
                        attr: format!("{src}.{attr}"),
                    });
                }
            }
            self.sync_vars();
            return Ok(());
        }
        if let (Some(s), "v") = (self.services.get_mut(src), attr) {
            s.v[uid] = value;
            let col = self.frame.index(src);
            if let Some(col) = col {
                let v = s.v.clone();
                self.frame.set(col, &v);
            }
            return Ok(());
        }
        Err(DaeError::UnknownAttribute {
            model: name,
            attr: format!("{src}.{attr}"),
        })
    }

    /// Changes the raw input of a numeric parameter and refreshes its
    /// converted value.
    pub fn alter(&mut self, src: &str, idx: &Idx, value: f64) -> Result<()> {
        let uid = self.position(idx)?;
        let p = self
            .data
            .num_params
            .get_mut(src)
            .ok_or_else(|| DaeError::UnknownAttribute {
                model: self.name.clone(),
                attr: src.to_string(),
            })?;
        p.set_vin(uid, value);
        let v = p.v.clone();
        self.frame.set_named(src, &v);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use serde_json::json;

    use super::*;

    fn ready(mut model: Model, records: &[serde_json::Value]) -> Model {
        model.prepare().unwrap();
        for r in records {
            model.add(r).unwrap();
        }
        model.set_arrays();
        model.refresh_inputs(0.0);
        model.s_update();
        model.l_update();
        model
    }

    #[test]
    fn unknown_symbol_is_reported() {
        let mut model = Model::new("Bad", "Test").with(Var::algeb("x").e_str("x - foo"));
        match model.prepare() {
            Err(DaeError::UnknownSymbol { symbol, expr, .. }) => {
                assert_eq!(symbol, "foo");
                assert_eq!(expr, "x - foo");
            }
            other => panic!("expected UnknownSymbol, got {other:?}"),
        }
    }

    #[test]
    fn preparation_is_idempotent() {
        let mut model = Model::new("M", "Test")
            .with(NumParam::new("k").default(2.0))
            .with(Var::state("s").e_str("-k * s + y"))
            .with(Var::algeb("y").e_str("y - sin(s)"));
        model.prepare().unwrap();
        let first = model.calls().jac_pattern();
        model.prepare().unwrap();
        assert_eq!(first, model.calls().jac_pattern());
        assert_eq!(
            first,
            vec![
                (JacBlock::Fx, 0, 0),
                (JacBlock::Fy, 0, 1),
                (JacBlock::Gx, 1, 0),
                (JacBlock::Gy, 1, 1),
            ]
        );
    }

    #[test]
    fn only_nonzero_derivatives_get_entries() {
        let mut model = Model::new("M", "Test")
            .with(Var::algeb("x").e_str("x * y"))
            .with(Var::algeb("y").e_str("2 * y"))
            .with(Var::algeb("z").diag_eps(1e-8));
        model.prepare().unwrap();
        let gy = model.calls().jac(JacBlock::Gy);
        let cells: Vec<_> = gy.iter().map(|e| (e.row, e.col)).collect();
        assert_eq!(cells, vec![(0, 0), (0, 1), (1, 1), (2, 2)]);
        assert!(matches!(gy[2].value, JacValue::Const(c) if c == 2.0));
        assert!(matches!(gy[3].value, JacValue::Const(c) if c == 1e-8));
    }

    #[test]
    fn column_order_puts_states_first() {
        let mut model = Model::new("M", "Test")
            .with(Var::algeb("y"))
            .with(Var::state("x"));
        model.prepare().unwrap();
        let names: Vec<_> = model.all_vars().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
        let symbols: Vec<_> = model.symbols().collect();
        assert_eq!(symbols, vec!["u", "x", "y", DAE_T]);
    }

    #[test]
    fn forward_reference_keeps_default() {
        let model = Model::new("M", "Test")
            .with(Var::algeb("x").v_str("1 / y"))
            .with(Var::algeb("y").v_str("2"));
        let mut model = ready(model, &[json!({})]);
        model.init().unwrap();
        assert!(model.flags.initialized);
        assert_eq!(model.vars["x"].v, vec![0.0]);
        assert_eq!(model.vars["y"].v, vec![2.0]);
    }

    #[test]
    fn iterative_init_finds_root() {
        let model = Model::new("M", "Test")
            .with(NumParam::new("c").default(4.0))
            .with(Var::algeb("x").v_str("1").v_iter("x**2 - c"));
        let mut model = ready(model, &[json!({}), json!({"c": 9.0})]);
        model.init().unwrap();
        assert_abs_diff_eq!(model.vars["x"].v[0], 2.0, epsilon = 1e-8);
        assert_abs_diff_eq!(model.vars["x"].v[1], 3.0, epsilon = 1e-8);
        assert!(model.init_mismatch() > 0.0);
    }

    #[test]
    fn failed_iterative_init_restores_inputs() {
        let model = Model::new("M", "Test").with(Var::algeb("x").v_str("1").v_iter("x**2 + 1"));
        let mut model = ready(model, &[json!({}), json!({})]);
        assert!(matches!(model.init(), Err(DaeError::InitFailed { .. })));
        assert!(!model.flags.initialized);
        assert_eq!(model.vars["x"].v, vec![1.0, 1.0]);
        assert_eq!(model.frame.get("x"), Some(&[1.0, 1.0][..]));
    }

    #[test]
    fn v_numeric_hook_runs_last() {
        let mut model = Model::new("M", "Test").with(Var::algeb("x").v_str("1"));
        model.hooks.v_numeric = Some(Arc::new(|m: &mut Model| {
            for v in m.vars["x"].v.iter_mut() {
                *v += 10.0;
            }
        }));
        let mut model = ready(model, &[json!({})]);
        model.init().unwrap();
        assert_eq!(model.vars["x"].v, vec![11.0]);
    }

    #[test]
    fn services_resolve_in_order() {
        let model = Model::new("M", "Test")
            .with(NumParam::new("T").default(0.5))
            .with(Service::constant("twice", "2 * T"))
            .with(Service::numeric("sum", |f: &Frame| {
                let twice = f.get("twice").unwrap_or(&[]);
                let t = f.get("T").unwrap_or(&[]);
                twice.iter().zip(t).map(|(a, b)| a + b).collect()
            }))
            .with(Service::constant("iT", "T").time_constant())
            .with(Service::constant("one", "1"));
        let model = ready(model, &[json!({}), json!({"T": 0.25})]);
        assert_eq!(model.values_of("twice"), Some(&[1.0, 0.5][..]));
        assert_eq!(model.values_of("sum"), Some(&[1.5, 0.75][..]));
        assert_eq!(model.values_of("iT"), Some(&[2.0, 4.0][..]));
        assert_eq!(model.values_of("one"), Some(&[1.0, 1.0][..]));
    }

    #[test]
    fn limiter_flags() {
        let model = Model::new("M", "Test")
            .with_config("lim_on", 1.0)
            .with(NumParam::new("w"))
            .with(NumParam::new("lo").default(0.0))
            .with(NumParam::new("hi").default(1.0))
            .with(Limiter::new("lim", "w", "lo", "hi").enable("lim_on"));
        let mut model = ready(model, &[json!({"w": -1.0}), json!({"w": 0.5}), json!({"w": 2.0})]);
        let lim = &model.discrete["lim"];
        assert_eq!(lim.zl, vec![1.0, 0.0, 0.0]);
        assert_eq!(lim.zi, vec![0.0, 1.0, 0.0]);
        assert_eq!(lim.zu, vec![0.0, 0.0, 1.0]);

        model.config.set("lim_on", 0.0);
        model.l_update();
        assert_eq!(model.discrete["lim"].zi, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn limiter_flags_are_exclusive_at_equal_bounds() {
        let model = Model::new("M", "Test")
            .with(NumParam::new("w"))
            .with(NumParam::new("lo").default(1.0))
            .with(NumParam::new("hi").default(1.0))
            .with(Limiter::new("lim", "w", "lo", "hi"));
        let model = ready(model, &[json!({"w": 0.5}), json!({"w": 1.0}), json!({"w": 1.5})]);
        let lim = &model.discrete["lim"];
        assert_eq!(lim.zl, vec![1.0, 1.0, 0.0]);
        assert_eq!(lim.zi, vec![0.0, 0.0, 0.0]);
        assert_eq!(lim.zu, vec![0.0, 0.0, 1.0]);
        for i in 0..3 {
            assert_eq!(lim.zi[i] + lim.zl[i] + lim.zu[i], 1.0);
        }
        assert_eq!(model.frame.get("lim_zi"), Some(&[0.0, 0.0, 0.0][..]));
    }

    #[test]
    fn numeric_residual_hooks_run_after_compiled() {
        let mut model = Model::new("M", "Test")
            .with(Var::state("s").e_str("-s"))
            .with(Var::algeb("y").e_str("y - 1"));
        model.hooks.f_numeric = Some(Arc::new(|m: &mut Model| {
            for e in m.vars["s"].e.iter_mut() {
                *e += 0.5;
            }
        }));
        model.hooks.g_numeric = Some(Arc::new(|m: &mut Model| {
            for e in m.vars["y"].e.iter_mut() {
                *e *= 2.0;
            }
        }));
        let mut model = ready(model, &[json!({"idx": 1})]);
        model.set("s", &Idx::from(1i64), "v", 2.0).unwrap();
        model.set("y", &Idx::from(1i64), "v", 3.0).unwrap();
        model.e_update();
        assert_eq!(model.vars["s"].e, vec![-1.5]);
        assert_eq!(model.vars["y"].e, vec![4.0]);
    }

    #[test]
    fn lag_block_exports_state() {
        let mut model = Model::new("M", "Test")
            .with(NumParam::new("p").default(1.0))
            .with(NumParam::new("K").default(2.0))
            .with(NumParam::new("T").default(0.1))
            .with(Block::lag("lg", "p", "K", "T"));
        model.prepare().unwrap();
        assert!(model.vars.contains_key("lg_y"));
        assert!(model.blocks.contains_key("lg"));
        assert_eq!(model.calls().f.len(), 1);
        assert_eq!(model.calls().jac_pattern(), vec![(JacBlock::Fx, 0, 0)]);
    }

    #[test]
    fn redefinition_keeps_last() {
        let model = Model::new("M", "Test")
            .with(Var::algeb("x").e_str("x - 1"))
            .with(Var::algeb("x").e_str("x - 2"));
        assert_eq!(model.vars.len(), 1);
        assert_eq!(model.vars["x"].e_str.as_deref(), Some("x - 2"));
    }

    #[test]
    fn residuals_inplace_accumulate() {
        let model = Model::new("M", "Test")
            .with(Var::algeb("x").e_str("x + 1").e_inplace())
            .with(Var::algeb("y").e_str("y + 1"));
        let mut model = ready(model, &[json!({})]);
        model.e_update();
        model.e_update();
        assert_eq!(model.vars["x"].e, vec![2.0]);
        assert_eq!(model.vars["y"].e, vec![1.0]);
    }

    #[test]
    fn alter_refreshes_converted_value() {
        let model = Model::new("M", "Test")
            .with(NumParam::new("Sn").default(100.0))
            .with(NumParam::new("p").power())
            .with(NumParam::new("x").z());
        let mut model = ready(model, &[json!({"idx": "g1", "Sn": 50.0, "p": 1.0, "x": 0.1})]);
        model.convert_pu(100.0);
        let g1 = Idx::from("g1");
        assert_abs_diff_eq!(model.get("p", &g1, "v").unwrap(), 0.5);
        assert_abs_diff_eq!(model.get("x", &g1, "v").unwrap(), 0.2);
        model.alter("p", &g1, 2.0).unwrap();
        assert_abs_diff_eq!(model.get("p", &g1, "vin").unwrap(), 2.0);
        assert_abs_diff_eq!(model.get("p", &g1, "v").unwrap(), 1.0);
    }

    #[test]
    fn get_and_set_variables() {
        let model = Model::new("M", "Test").with(Var::algeb("x").e_str("2 * x"));
        let mut model = ready(model, &[json!({"idx": 7})]);
        let idx = Idx::from(7i64);
        model.set("x", &idx, "v", 3.0).unwrap();
        model.e_update();
        assert_eq!(model.get("x", &idx, "e").unwrap(), 6.0);
        assert!(matches!(
            model.get("x", &idx, "bogus"),
            Err(DaeError::UnknownAttribute { .. })
        ));
        assert!(model.get("x", &Idx::from(8i64), "v").is_err());
    }

    #[test]
    fn doc_lists_equations() {
        let doc = crate::models::pq().doc();
        assert!(doc.contains("## PQ (StaticLoad)"));
        assert!(doc.contains("p0 / vmax**2"));
        assert!(doc.contains("vcmp"));
        assert!(doc.contains("pq2z"));
    }
}
