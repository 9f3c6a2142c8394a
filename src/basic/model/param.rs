use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique device index. Input data may use integers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Idx {
    Int(i64),
    Str(String),
}

impl Idx {
    /// Converts a JSON scalar. Integral floats are accepted as integers.
    pub fn from_json(value: &Value) -> Option<Idx> {
        match value {
            Value::Number(n) => n.as_i64().map(Idx::Int).or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| Idx::Int(f as i64))
            }),
            Value::String(s) => Some(Idx::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Idx::Int(i) => Value::from(*i),
            Idx::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for Idx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Idx::Int(i) => write!(f, "{i}"),
            Idx::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Idx {
    fn from(value: i64) -> Self {
        Idx::Int(value)
    }
}

impl From<&str> for Idx {
    fn from(value: &str) -> Self {
        Idx::Str(value.to_string())
    }
}

impl From<String> for Idx {
    fn from(value: String) -> Self {
        Idx::Str(value)
    }
}

/// Properties a [`NumParam`] can be searched by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamProp {
    Mandatory,
    NonZero,
    Power,
    Impedance,
    Export,
}

/// Numeric per-device parameter.
///
/// `vin` holds the raw input, `v` the working value `vin * pu_coeff`.
#[derive(Debug, Clone)]
pub struct NumParam {
    pub name: String,
    pub tex_name: String,
    pub info: String,
    pub unit: String,
    pub default: Option<f64>,
    pub mandatory: bool,
    pub non_zero: bool,
    /// Expressed on the device power base.
    pub power: bool,
    /// Impedance on the device base.
    pub z: bool,
    pub export: bool,
    pub vin: Vec<f64>,
    pub v: Vec<f64>,
    pub pu_coeff: Vec<f64>,
}

impl NumParam {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tex_name: name.to_string(),
            info: String::new(),
            unit: String::new(),
            default: None,
            mandatory: false,
            non_zero: false,
            power: false,
            z: false,
            export: true,
            vin: Vec::new(),
            v: Vec::new(),
            pu_coeff: Vec::new(),
        }
    }

    pub fn info(mut self, info: &str) -> Self {
        self.info = info.to_string();
        self
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }

    pub fn tex(mut self, tex_name: &str) -> Self {
        self.tex_name = tex_name.to_string();
        self
    }

    pub fn default(mut self, value: f64) -> Self {
        self.default = Some(value);
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn non_zero(mut self) -> Self {
        self.non_zero = true;
        self
    }

    pub fn power(mut self) -> Self {
        self.power = true;
        self
    }

    pub fn z(mut self) -> Self {
        self.z = true;
        self
    }

    pub fn no_export(mut self) -> Self {
        self.export = false;
        self
    }

    pub fn has(&self, prop: ParamProp) -> bool {
        match prop {
            ParamProp::Mandatory => self.mandatory,
            ParamProp::NonZero => self.non_zero,
            ParamProp::Power => self.power,
            ParamProp::Impedance => self.z,
            ParamProp::Export => self.export,
        }
    }

    /// Appends one device value. Returns `false` when a mandatory value is
    /// missing; the caller reports the error with device context.
    pub(crate) fn push(&mut self, value: Option<f64>) -> bool {
        let value = match value {
            Some(v) if self.non_zero && v == 0.0 => self.default.unwrap_or(v),
            Some(v) => v,
            None if self.mandatory => return false,
            None => self.default.unwrap_or(0.0),
        };
        self.vin.push(value);
        self.v.push(value);
        self.pu_coeff.push(1.0);
        true
    }

    /// Applies per-device conversion coefficients and refreshes `v`.
    pub(crate) fn convert(&mut self, coeff: &[f64]) {
        self.pu_coeff.copy_from_slice(coeff);
        for ((v, vin), c) in self.v.iter_mut().zip(&self.vin).zip(coeff) {
            *v = vin * c;
        }
    }

    /// Rewrites the raw input of one device and refreshes its working value.
    pub fn set_vin(&mut self, pos: usize, value: f64) {
        self.vin[pos] = value;
        self.v[pos] = value * self.pu_coeff[pos];
    }
}

/// Reference to devices of another model by their idx.
#[derive(Debug, Clone)]
pub struct IdxParam {
    pub name: String,
    pub info: String,
    /// Name of the referenced model.
    pub model: Option<String>,
    pub mandatory: bool,
    pub v: Vec<Option<Idx>>,
}

impl IdxParam {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            info: String::new(),
            model: None,
            mandatory: false,
            v: Vec::new(),
        }
    }

    pub fn info(mut self, info: &str) -> Self {
        self.info = info.to_string();
        self
    }

    pub fn model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }
}

/// Free-form string data, such as device names.
#[derive(Debug, Clone)]
pub struct DataParam {
    pub name: String,
    pub info: String,
    pub default: Option<String>,
    pub v: Vec<String>,
}

impl DataParam {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            info: String::new(),
            default: None,
            v: Vec::new(),
        }
    }

    pub fn info(mut self, info: &str) -> Self {
        self.info = info.to_string();
        self
    }

    pub fn default(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }
}

/// Numeric value copied from a parameter of another model, located through
/// the local [`IdxParam`] named by `indexer`.
#[derive(Debug, Clone)]
pub struct ExtParam {
    pub name: String,
    pub tex_name: String,
    pub info: String,
    pub model: String,
    pub src: String,
    pub indexer: String,
    pub v: Vec<f64>,
}

impl ExtParam {
    pub fn new(name: &str, model: &str, src: &str, indexer: &str) -> Self {
        Self {
            name: name.to_string(),
            tex_name: name.to_string(),
            info: String::new(),
            model: model.to_string(),
            src: src.to_string(),
            indexer: indexer.to_string(),
            v: Vec::new(),
        }
    }

    pub fn info(mut self, info: &str) -> Self {
        self.info = info.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_idx_from_json() {
        assert_eq!(Idx::from_json(&json!(3)), Some(Idx::Int(3)));
        assert_eq!(Idx::from_json(&json!(3.0)), Some(Idx::Int(3)));
        assert_eq!(Idx::from_json(&json!("Bus_1")), Some(Idx::from("Bus_1")));
        assert_eq!(Idx::from_json(&json!(2.5)), None);
        assert_eq!(Idx::from_json(&json!(null)), None);
    }

    #[test]
    fn test_num_param_push_and_convert() {
        let mut p = NumParam::new("Sn").default(100.0).non_zero();
        assert!(p.push(None));
        assert!(p.push(Some(0.0)));
        assert!(p.push(Some(50.0)));
        assert_eq!(p.vin, vec![100.0, 100.0, 50.0]);

        let mut m = NumParam::new("p0").mandatory().power();
        assert!(!m.push(None));
        assert!(m.push(Some(2.0)));
        m.convert(&[0.5]);
        assert_eq!(m.v, vec![1.0]);
        m.set_vin(0, 4.0);
        assert_eq!((m.vin[0], m.v[0]), (4.0, 2.0));
        assert!(m.has(ParamProp::Power) && !m.has(ParamProp::Impedance));
    }
}
