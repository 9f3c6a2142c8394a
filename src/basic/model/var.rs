/// Variable category. Determines the equation side (`f` or `g`) and which
/// global vector (`x` or `y`) the variable is addressed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    State,
    Algeb,
    ExtState,
    ExtAlgeb,
}

impl VarKind {
    pub fn is_state(self) -> bool {
        matches!(self, VarKind::State | VarKind::ExtState)
    }

    pub fn is_external(self) -> bool {
        matches!(self, VarKind::ExtState | VarKind::ExtAlgeb)
    }

    /// Position in the column order: states, external states, algebraics,
    /// external algebraics.
    pub(crate) fn rank(self) -> u8 {
        match self {
            VarKind::State => 0,
            VarKind::ExtState => 1,
            VarKind::Algeb => 2,
            VarKind::ExtAlgeb => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VarKind::State => "State",
            VarKind::Algeb => "Algeb",
            VarKind::ExtState => "ExtState",
            VarKind::ExtAlgeb => "ExtAlgeb",
        }
    }
}

/// Where an external variable or service takes its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtRef {
    pub model: String,
    pub src: String,
    /// Local `IdxParam` holding the idx of the source devices.
    pub indexer: String,
}

impl ExtRef {
    pub fn new(model: &str, src: &str, indexer: &str) -> Self {
        Self {
            model: model.to_string(),
            src: src.to_string(),
            indexer: indexer.to_string(),
        }
    }
}

/// A DAE variable declared by a model.
#[derive(Debug, Clone)]
pub struct Var {
    pub name: String,
    pub tex_name: String,
    pub info: String,
    pub unit: String,
    pub kind: VarKind,
    /// Closed-form initializer.
    pub v_str: Option<String>,
    /// Residual solved by the iterative initializer.
    pub v_iter: Option<String>,
    /// Equation residual.
    pub e_str: Option<String>,
    /// Add the evaluated residual onto `e` instead of overwriting it.
    pub e_inplace: bool,
    /// Assign the initial value into the global vector instead of adding it.
    pub v_setter: bool,
    /// Assign the residual into the global vector instead of adding it.
    pub e_setter: bool,
    /// Constant placed on the `gy` diagonal.
    pub diag_eps: f64,
    pub ext: Option<ExtRef>,
    /// Global address per device.
    pub a: Vec<usize>,
    pub v: Vec<f64>,
    pub e: Vec<f64>,
}

impl Var {
    fn with_kind(name: &str, kind: VarKind) -> Self {
        Self {
            name: name.to_string(),
            tex_name: name.to_string(),
            info: String::new(),
            unit: String::new(),
            kind,
            v_str: None,
            v_iter: None,
            e_str: None,
            e_inplace: false,
            v_setter: false,
            e_setter: false,
            diag_eps: 0.0,
            ext: None,
            a: Vec::new(),
            v: Vec::new(),
            e: Vec::new(),
        }
    }

    pub fn state(name: &str) -> Self {
        Self::with_kind(name, VarKind::State)
    }

    pub fn algeb(name: &str) -> Self {
        Self::with_kind(name, VarKind::Algeb)
    }

    pub fn ext_state(name: &str, model: &str, src: &str, indexer: &str) -> Self {
        let mut v = Self::with_kind(name, VarKind::ExtState);
        v.ext = Some(ExtRef::new(model, src, indexer));
        v
    }

    pub fn ext_algeb(name: &str, model: &str, src: &str, indexer: &str) -> Self {
        let mut v = Self::with_kind(name, VarKind::ExtAlgeb);
        v.ext = Some(ExtRef::new(model, src, indexer));
        v
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

    pub fn v_str(mut self, expr: &str) -> Self {
        self.v_str = Some(expr.to_string());
        self
    }

    pub fn v_iter(mut self, expr: &str) -> Self {
        self.v_iter = Some(expr.to_string());
        self
    }

    pub fn e_str(mut self, expr: &str) -> Self {
        self.e_str = Some(expr.to_string());
        self
    }

    pub fn e_inplace(mut self) -> Self {
        self.e_inplace = true;
        self
    }

    pub fn v_setter(mut self) -> Self {
        self.v_setter = true;
        self
    }

    pub fn e_setter(mut self) -> Self {
        self.e_setter = true;
        self
    }

    pub fn diag_eps(mut self, eps: f64) -> Self {
        self.diag_eps = eps;
        self
    }

    pub(crate) fn set_arrays(&mut self, n: usize) {
        self.v = vec![0.0; n];
        self.e = vec![0.0; n];
        self.a.clear();
    }

    /// Drops the global address, e.g. after the device population changed.
    pub fn a_reset(&mut self) {
        self.a.clear();
    }
}
