use crate::basic::{config::Config, symbolic::Frame};

/// Hard limiter comparing an input symbol against two bounds.
///
/// Exposes `<name>_zi`, `<name>_zl` and `<name>_zu` as symbols: within range,
/// at or below the lower bound, at or above the upper bound. Exactly one
/// flag is set per device. When the config
/// option named by `enable` is zero the limiter reports every device in range.
#[derive(Debug, Clone)]
pub struct Limiter {
    pub name: String,
    pub info: String,
    pub u: String,
    pub lower: String,
    pub upper: String,
    pub enable: Option<String>,
    pub zi: Vec<f64>,
    pub zl: Vec<f64>,
    pub zu: Vec<f64>,
}

impl Limiter {
    pub fn new(name: &str, u: &str, lower: &str, upper: &str) -> Self {
        Self {
            name: name.to_string(),
            info: String::new(),
            u: u.to_string(),
            lower: lower.to_string(),
            upper: upper.to_string(),
            enable: None,
            zi: Vec::new(),
            zl: Vec::new(),
            zu: Vec::new(),
        }
    }

    pub fn info(mut self, info: &str) -> Self {
        self.info = info.to_string();
        self
    }

    pub fn enable(mut self, config_key: &str) -> Self {
        self.enable = Some(config_key.to_string());
        self
    }

    pub fn flag_names(&self) -> [String; 3] {
        [
            format!("{}_zi", self.name),
            format!("{}_zl", self.name),
            format!("{}_zu", self.name),
        ]
    }

    pub(crate) fn set_arrays(&mut self, n: usize) {
        self.zi = vec![1.0; n];
        self.zl = vec![0.0; n];
        self.zu = vec![0.0; n];
    }

    /// Recomputes the flags from the frame. Symbols were validated at
    /// preparation time; a missing one leaves the flags untouched.
    pub(crate) fn check(&mut self, frame: &Frame, config: &Config) {
        if let Some(key) = &self.enable {
            if !config.flag(key) {
                self.zi.fill(1.0);
                self.zl.fill(0.0);
                self.zu.fill(0.0);
                return;
            }
        }
        let (Some(u), Some(lo), Some(up)) = (
            frame.get(&self.u),
            frame.get(&self.lower),
            frame.get(&self.upper),
        ) else {
            return;
        };
        // the lower bound wins when both are hit
        for i in 0..u.len() {
            let at_lower = u[i] <= lo[i];
            let at_upper = !at_lower && u[i] >= up[i];
            self.zl[i] = f64::from(u8::from(at_lower));
            self.zu[i] = f64::from(u8::from(at_upper));
            self.zi[i] = f64::from(u8::from(!at_lower && !at_upper));
        }
    }

    pub(crate) fn flags(&self) -> [&[f64]; 3] {
        [&self.zi, &self.zl, &self.zu]
    }
}
