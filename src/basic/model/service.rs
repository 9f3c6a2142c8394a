use std::{fmt, sync::Arc};

use crate::basic::symbolic::Frame;

use super::var::ExtRef;

/// Custom numeric code evaluated against the model's input frame.
pub type NumericFn = Arc<dyn Fn(&Frame) -> Vec<f64> + Send + Sync>;

#[derive(Clone)]
pub enum ServiceKind {
    /// Expression over parameters, variables and earlier services.
    Const(String),
    /// Copied from another model.
    Ext(ExtRef),
    /// Evaluated after every expression service is resolved.
    Numeric(NumericFn),
}

impl fmt::Debug for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Const(s) => write!(f, "Const({s})"),
            ServiceKind::Ext(r) => write!(f, "Ext({}.{} via {})", r.model, r.src, r.indexer),
            ServiceKind::Numeric(_) => write!(f, "Numeric"),
        }
    }
}

/// Derived per-device quantity that is not a DAE variable.
#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    pub tex_name: String,
    pub info: String,
    pub kind: ServiceKind,
    /// Time constant; its inverse is taken once after resolution.
    pub inverse: bool,
    pub v: Vec<f64>,
}

impl Service {
    fn with_kind(name: &str, kind: ServiceKind) -> Self {
        Self {
            name: name.to_string(),
            tex_name: name.to_string(),
            info: String::new(),
            kind,
            inverse: false,
            v: Vec::new(),
        }
    }

    pub fn constant(name: &str, v_str: &str) -> Self {
        Self::with_kind(name, ServiceKind::Const(v_str.to_string()))
    }

    pub fn ext(name: &str, model: &str, src: &str, indexer: &str) -> Self {
        Self::with_kind(name, ServiceKind::Ext(ExtRef::new(model, src, indexer)))
    }

    pub fn numeric<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Frame) -> Vec<f64> + Send + Sync + 'static,
    {
        Self::with_kind(name, ServiceKind::Numeric(Arc::new(f)))
    }

    pub fn info(mut self, info: &str) -> Self {
        self.info = info.to_string();
        self
    }

    pub fn tex(mut self, tex_name: &str) -> Self {
        self.tex_name = tex_name.to_string();
        self
    }

    pub fn time_constant(mut self) -> Self {
        self.inverse = true;
        self
    }

    pub(crate) fn set_value(&mut self, value: Vec<f64>, n: usize) {
        self.v = if value.len() == 1 && n != 1 {
            vec![value[0]; n]
        } else {
            value
        };
    }
}
