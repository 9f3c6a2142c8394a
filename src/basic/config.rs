use std::{fmt, str::FromStr};

use derive_more::{Deref, DerefMut};
use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};

use super::error::{ConfigError, Result};

/// Per-model numeric options.
///
/// Every entry is exposed to the model's equation strings as a plain symbol,
/// so an option such as `pq2z` can toggle a term directly inside an equation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Deref, DerefMut)]
#[serde(transparent)]
pub struct Config(IndexMap<String, f64>);

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an option with its default. Existing values are kept, so options
    /// loaded before the model declared them are not overwritten.
    pub fn add(&mut self, name: &str, default: f64) -> &mut Self {
        self.0.entry(name.to_string()).or_insert(default);
        self
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    /// Boolean view of an option; nonzero is `true`, a missing key is `false`.
    pub fn flag(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(|v| *v != 0.0)
    }

    /// Overrides options from a JSON object of `name: number` pairs.
    /// Booleans are accepted and stored as `0.0` / `1.0`.
    pub fn load_json(&mut self, value: &serde_json::Value) -> Result<()> {
        let map: IndexMap<String, serde_json::Value> = serde_json::from_value(value.clone())?;
        for (k, v) in map {
            let num = match v {
                serde_json::Value::Bool(b) => f64::from(u8::from(b)),
                other => serde_json::from_value::<f64>(other)?,
            };
            self.0.insert(k, num);
        }
        Ok(())
    }

    pub fn as_dict(&self) -> &IndexMap<String, f64> {
        &self.0
    }
}

/// System-wide base quantities used for per-unit conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// System base power in MVA.
    pub mva: f64,
    /// Nominal frequency in Hz.
    pub freq: f64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            mva: 100.0,
            freq: 60.0,
        }
    }
}

/// Settings consumed by [`crate::prelude::run_powerflow`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerFlowConfig {
    /// Solution method name: `NR`/`Newton` or `FDPF`/`FDBX`/`FDXB`.
    pub method: String,
    /// Convergence tolerance on the maximum absolute mismatch.
    pub tol: f64,
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Start from `v = 1`, `a = 0` at every bus instead of the initializers.
    pub flat_start: bool,
    /// Sparse LU backend name.
    pub sparselib: String,
}

impl Default for PowerFlowConfig {
    fn default() -> Self {
        Self {
            method: "NR".to_string(),
            tol: 1e-6,
            max_iter: 30,
            flat_start: false,
            sparselib: SparseLib::default().to_string(),
        }
    }
}

/// Power-flow solution method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverMethod {
    Newton,
    FastDecoupled,
}

impl SolverMethod {
    /// Parses a method name, falling back to [`SolverMethod::Newton`] with a
    /// warning when the name is not recognized.
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            warn!("unknown power flow method <{name}>, falling back to NR");
            SolverMethod::Newton
        })
    }
}

impl FromStr for SolverMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NR" | "Newton" => Ok(SolverMethod::Newton),
            "FDPF" | "FDBX" | "FDXB" => Ok(SolverMethod::FastDecoupled),
            other => Err(ConfigError::Routine(format!("unknown method <{other}>"))),
        }
    }
}

impl fmt::Display for SolverMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverMethod::Newton => write!(f, "NR"),
            SolverMethod::FastDecoupled => write!(f, "FDPF"),
        }
    }
}

/// Sparse LU backends known to the crate. Whether a backend is usable
/// depends on the enabled cargo features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseLib {
    RSparse,
    Faer,
}

impl Default for SparseLib {
    fn default() -> Self {
        if cfg!(feature = "rsparse") {
            SparseLib::RSparse
        } else {
            SparseLib::Faer
        }
    }
}

impl FromStr for SparseLib {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsparse" => Ok(SparseLib::RSparse),
            "faer" => Ok(SparseLib::Faer),
            _ => Err(ConfigError::InvalidSparseLib(s.to_string())),
        }
    }
}

impl fmt::Display for SparseLib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SparseLib::RSparse => write!(f, "rsparse"),
            SparseLib::Faer => write!(f, "faer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names() {
        assert_eq!("NR".parse::<SolverMethod>().unwrap(), SolverMethod::Newton);
        assert_eq!("Newton".parse::<SolverMethod>().unwrap(), SolverMethod::Newton);
        for name in ["FDPF", "FDBX", "FDXB"] {
            assert_eq!(name.parse::<SolverMethod>().unwrap(), SolverMethod::FastDecoupled);
        }
        assert!("GaussSeidel".parse::<SolverMethod>().is_err());
        assert_eq!(SolverMethod::parse_or_default("GaussSeidel"), SolverMethod::Newton);
    }

    #[test]
    fn test_sparselib_names() {
        assert_eq!("RSPARSE".parse::<SparseLib>().unwrap(), SparseLib::RSparse);
        assert!(matches!(
            "umfpack".parse::<SparseLib>(),
            Err(ConfigError::InvalidSparseLib(_))
        ));
    }

    #[test]
    fn test_config_load_keeps_order() {
        let mut cfg = Config::new();
        cfg.add("pq2z", 1.0).add("allow_adjust", 0.0);
        cfg.load_json(&serde_json::json!({"pq2z": false, "extra": 2.5}))
            .unwrap();
        assert!(!cfg.flag("pq2z"));
        assert_eq!(cfg.get("extra"), Some(&2.5));
        let keys: Vec<_> = cfg.keys().cloned().collect();
        assert_eq!(keys, vec!["pq2z", "allow_adjust", "extra"]);
        // `add` does not clobber a loaded value
        cfg.add("pq2z", 1.0);
        assert!(!cfg.flag("pq2z"));
    }

    #[test]
    fn test_powerflow_config_defaults() {
        let cfg: PowerFlowConfig = serde_json::from_str(r#"{"method": "FDPF"}"#).unwrap();
        assert_eq!(cfg.method, "FDPF");
        assert_eq!(cfg.max_iter, 30);
        assert!(!cfg.flat_start);
    }
}
