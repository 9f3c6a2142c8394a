use indexmap::IndexMap;
use log::{debug, info, warn};
use nalgebra::DVector;
use serde_json::Value;

use super::{
    config::SystemConfig,
    dae::Dae,
    error::{DaeError, Result},
    model::{ExtRef, Idx, JacBlock, Model, ServiceKind},
};

/// Registry of models sharing one [`Dae`].
///
/// Models are kept in registration order, which is also the order of
/// address assignment, initialization and residual evaluation.
#[derive(Debug, Clone, Default)]
pub struct System {
    pub config: SystemConfig,
    pub models: IndexMap<String, Model>,
    pub dae: Dae,
    is_setup: bool,
}

/// Values to copy into one attribute of one model.
type Update = (usize, String, Vec<f64>);

impl System {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SystemConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Prepares and registers a model. A model with the same name is
    /// replaced.
    pub fn add_model(&mut self, mut model: Model) -> Result<()> {
        model.prepare()?;
        if self.models.contains_key(&model.name) {
            warn!("model <{}> registered twice, the last one is used", model.name);
        }
        self.models.insert(model.name.clone(), model);
        self.is_setup = false;
        Ok(())
    }

    /// Adds one device to a registered model. Adding to a system that was
    /// already set up drops every address until the next [`System::setup`].
    pub fn add(&mut self, model: &str, record: &Value) -> Result<Idx> {
        let idx = self.model_mut(model)?.add(record)?;
        if self.is_setup {
            debug!("device population changed, resetting addresses");
            for m in self.models.values_mut() {
                m.a_reset();
            }
            self.is_setup = false;
        }
        Ok(idx)
    }

    /// Adds devices from a JSON object mapping model names to arrays of
    /// records. Unknown model names are skipped with a warning.
    pub fn load_json(&mut self, value: &Value) -> Result<()> {
        let Some(obj) = value.as_object() else {
            return Err(DaeError::Data {
                model: "System".to_string(),
                msg: "case data must be an object of model arrays".to_string(),
            });
        };
        for (name, records) in obj {
            if !self.models.contains_key(name) {
                warn!("case data for unknown model <{name}> is skipped");
                continue;
            }
            let records = records.as_array().ok_or_else(|| DaeError::Data {
                model: name.clone(),
                msg: "records must be an array".to_string(),
            })?;
            for record in records {
                self.add(name, record)?;
            }
        }
        Ok(())
    }

    pub fn model(&self, name: &str) -> Result<&Model> {
        self.models
            .get(name)
            .ok_or_else(|| DaeError::UnknownModel(name.to_string()))
    }

    pub fn model_mut(&mut self, name: &str) -> Result<&mut Model> {
        self.models
            .get_mut(name)
            .ok_or_else(|| DaeError::UnknownModel(name.to_string()))
    }

    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    /// Positions in `src` of the devices referenced by `owner.<indexer>`.
    fn indexer_uids(&self, owner: &Model, ext: &ExtRef) -> Result<(usize, Vec<usize>)> {
        let (src_pos, _, src) =
            self.models
                .get_full(&ext.model)
                .ok_or_else(|| DaeError::Lookup {
                    model: owner.name.clone(),
                    what: format!("source model <{}>", ext.model),
                })?;
        let indexer = owner
            .data
            .idx_params
            .get(&ext.indexer)
            .ok_or_else(|| DaeError::Lookup {
                model: owner.name.clone(),
                what: format!("indexer <{}>", ext.indexer),
            })?;
        let uids = indexer
            .v
            .iter()
            .map(|idx| match idx {
                Some(idx) => src.data.idx2uid(idx),
                None => Err(DaeError::Lookup {
                    model: owner.name.clone(),
                    what: format!("empty <{}> reference", ext.indexer),
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((src_pos, uids))
    }

    /// Values of `ext.src` in the source model at the referenced devices.
    fn ext_values(&self, owner: &Model, ext: &ExtRef) -> Result<Vec<f64>> {
        let (src_pos, uids) = self.indexer_uids(owner, ext)?;
        let src = &self.models[src_pos];
        let values = src.values_of(&ext.src).ok_or_else(|| DaeError::Lookup {
            model: src.name.clone(),
            what: format!("<{}> requested by {}", ext.src, owner.name),
        })?;
        Ok(uids.iter().map(|&u| values[u]).collect())
    }

    fn ext_param_updates(&self) -> Result<Vec<Update>> {
        let mut updates = Vec::new();
        for (mi, model) in self.models.values().enumerate() {
            if !model.in_use() {
                continue;
            }
            for p in model.ext_params.values() {
                let ext = ExtRef::new(&p.model, &p.src, &p.indexer);
                updates.push((mi, p.name.clone(), self.ext_values(model, &ext)?));
            }
        }
        Ok(updates)
    }

    /// Sizes arrays, converts to per unit, links external parameters,
    /// assigns global addresses and stores the sparsity patterns.
    pub fn setup(&mut self) -> Result<()> {
        let mva = self.config.mva;
        for model in self.models.values_mut() {
            model.set_arrays();
            model.convert_pu(mva);
        }

        for (mi, name, values) in self.ext_param_updates()? {
            if let Some(p) = self.models[mi].ext_params.get_mut(&name) {
                p.v = values;
            }
        }

        let (mut n, mut m) = (0, 0);
        for model in self.models.values_mut() {
            let dn = model.n();
            if dn == 0 {
                continue;
            }
            for var in model.vars.values_mut().filter(|v| !v.kind.is_external()) {
                let next = if var.kind.is_state() { &mut n } else { &mut m };
                var.a = (*next..*next + dn).collect();
                *next += dn;
            }
        }

        let mut links = Vec::new();
        for (mi, model) in self.models.values().enumerate() {
            if !model.in_use() {
                continue;
            }
            for var in model.vars.values() {
                let Some(ext) = &var.ext else {
                    continue;
                };
                let (src_pos, uids) = self.indexer_uids(model, ext)?;
                let src = &self.models[src_pos];
                let src_var = src.vars.get(&ext.src).ok_or_else(|| DaeError::Lookup {
                    model: src.name.clone(),
                    what: format!("variable <{}> requested by {}", ext.src, model.name),
                })?;
                if src_var.kind.is_state() != var.kind.is_state() {
                    return Err(DaeError::Data {
                        model: model.name.clone(),
                        msg: format!(
                            "<{}> is {} but {}.{} is {}",
                            var.name,
                            var.kind.name(),
                            src.name,
                            src_var.name,
                            src_var.kind.name()
                        ),
                    });
                }
                let a = uids
                    .iter()
                    .map(|&u| {
                        src_var.a.get(u).copied().ok_or_else(|| DaeError::Lookup {
                            model: src.name.clone(),
                            what: format!("address of <{}>", src_var.name),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                links.push((mi, var.name.clone(), a));
            }
        }
        for (mi, name, a) in links {
            if let Some(var) = self.models[mi].vars.get_mut(&name) {
                var.a = a;
            }
        }

        self.dae.resize(n, m);
        for model in self.models.values_mut() {
            model.flags.address = true;
            model.store_sparse_pattern()?;
            for var in model.vars.values().filter(|v| !v.kind.is_external()) {
                let names = if var.kind.is_state() {
                    &mut self.dae.x_name
                } else {
                    &mut self.dae.y_name
                };
                for (&a, idx) in var.a.iter().zip(&model.data.idx) {
                    names[a] = format!("{} {} {idx}", var.name, model.name);
                }
            }
        }
        self.is_setup = true;
        info!(
            "system set up: {} models in use, {} states, {} algebraics",
            self.models.values().filter(|m| m.in_use()).count(),
            n,
            m
        );
        Ok(())
    }

    fn gather(dae: &Dae, model: &mut Model) {
        for var in model.vars.values_mut() {
            if var.a.len() != var.v.len() {
                continue;
            }
            let src = if var.kind.is_state() { &dae.x } else { &dae.y };
            for (v, &a) in var.v.iter_mut().zip(&var.a) {
                *v = src[a];
            }
        }
    }

    /// Adds non-setter residuals to `f` and `g`, then lets setters assign.
    fn scatter(dae: &mut Dae, model: &Model) {
        for setter in [false, true] {
            for var in model.vars.values().filter(|v| v.e_setter == setter) {
                if var.a.len() != var.e.len() {
                    continue;
                }
                let dst = if var.kind.is_state() {
                    &mut dae.f
                } else {
                    &mut dae.g
                };
                for (&a, e) in var.a.iter().zip(&var.e) {
                    if setter {
                        dst[a] = *e;
                    } else {
                        dst[a] += e;
                    }
                }
            }
        }
    }

    /// Evaluates every residual at the current `x` and `y`.
    pub fn update_equations(&mut self) {
        let t = self.dae.t;
        self.dae.f.fill(0.0);
        self.dae.g.fill(0.0);
        for model in self.models.values_mut().filter(|m| m.in_use()) {
            Self::gather(&self.dae, model);
            model.refresh_inputs(t);
            model.l_update();
            model.e_update();
            Self::scatter(&mut self.dae, model);
        }
    }

    /// Re-evaluates all Jacobian triplets at the state of the last
    /// [`System::update_equations`].
    pub fn j_update(&mut self) {
        self.dae.clear_triplets();
        for model in self.models.values().filter(|m| m.in_use()) {
            for block in JacBlock::ALL {
                let dae = &mut self.dae;
                model
                    .triplets
                    .visit(block, &model.frame, |r, c, v| dae.push(block, r, c, v));
            }
        }
    }

    fn ext_service_updates(&self, mi: usize) -> Result<Vec<Update>> {
        let model = &self.models[mi];
        let mut updates = Vec::new();
        for svc in model.services.values() {
            if let ServiceKind::Ext(ext) = &svc.kind {
                updates.push((mi, svc.name.clone(), self.ext_values(model, ext)?));
            }
        }
        Ok(updates)
    }

    /// Initializes models in registration order and writes their initial
    /// values into the DAE.
    pub fn init(&mut self) -> Result<()> {
        if !self.is_setup {
            self.setup()?;
        }
        self.dae.t = 0.0;
        for mi in 0..self.models.len() {
            if !self.models[mi].in_use() {
                self.models[mi].flags.initialized = true;
                continue;
            }
            let updates = self.ext_service_updates(mi)?;
            let model = &mut self.models[mi];
            Self::gather(&self.dae, model);
            let n = model.n();
            for (_, name, values) in updates {
                if let Some(svc) = model.services.get_mut(&name) {
                    svc.set_value(values, n);
                }
            }
            model.refresh_inputs(0.0);
            model.s_update();
            model.l_update();
            model.init()?;
            debug!(
                "{}: initialization mismatch {:.3e}",
                model.name,
                model.init_mismatch()
            );
            Self::write_initial(&mut self.dae, model, false);
        }
        info!("initialization done");
        Ok(())
    }

    /// Copies initialized values into `x` and `y`. Internal variables are
    /// assigned; external ones with an initializer are added, then setters
    /// assign. With `setters_only`, only external setters are written.
    fn write_initial(dae: &mut Dae, model: &Model, setters_only: bool) {
        let external_with_init = |setter: bool| {
            model
                .vars
                .values()
                .filter(move |v| v.kind.is_external() && v.v_str.is_some() && v.v_setter == setter)
        };
        let internal = model
            .vars
            .values()
            .filter(|v| !v.kind.is_external() && !setters_only);
        let adders = external_with_init(false).filter(|_| !setters_only);
        for (var, assign) in internal
            .map(|v| (v, true))
            .chain(adders.map(|v| (v, false)))
            .chain(external_with_init(true).map(|v| (v, true)))
        {
            if var.a.len() != var.v.len() {
                continue;
            }
            let dst = if var.kind.is_state() {
                &mut dae.x
            } else {
                &mut dae.y
            };
            for (&a, v) in var.a.iter().zip(&var.v) {
                if assign {
                    dst[a] = *v;
                } else {
                    dst[a] += v;
                }
            }
        }
    }

    /// Resets bus voltages to `1∠0`, keeping voltages fixed by setters such
    /// as generator set points.
    pub fn flat_start(&mut self) {
        let Some(bus) = self.models.get("Bus") else {
            return;
        };
        for (name, value) in [("a", 0.0), ("v", 1.0)] {
            if let Some(var) = bus.vars.get(name) {
                for &a in &var.a {
                    self.dae.y[a] = value;
                }
            }
        }
        for model in self.models.values() {
            Self::write_initial(&mut self.dae, model, true);
        }
    }

    /// Sums the residual contributions of `var` over all models of `group`
    /// into a vector over algebraic addresses.
    pub fn injections(&self, group: &str, var: &str) -> DVector<f64> {
        let mut out = DVector::zeros(self.dae.m);
        for model in self.models.values().filter(|m| m.group == group) {
            let Some(v) = model.vars.get(var) else {
                continue;
            };
            if v.kind.is_state() {
                continue;
            }
            for (&a, e) in v.a.iter().zip(&v.e) {
                out[a] += e;
            }
        }
        out
    }
}
