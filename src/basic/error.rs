use thiserror::Error;

/// Errors raised while defining, preparing, or solving device models.
///
/// Structural problems (parse failures, unknown symbols, mismatched
/// addresses) abort model preparation. Solver non-convergence is not an
/// error; it is reported through [`crate::prelude::PowerFlowResult`].
#[derive(Debug, Error)]
pub enum DaeError {
    #[error("{model} expression \"{expr}\" could not be parsed: {msg}")]
    Parse {
        model: String,
        expr: String,
        msg: String,
    },

    #[error("{model} expression \"{expr}\" contains unknown symbol \"{symbol}\"")]
    UnknownSymbol {
        model: String,
        expr: String,
        symbol: String,
    },

    #[error("{model}: jacobian entry ({row}, {col}) has {nrow} row and {ncol} col addresses")]
    AddressMismatch {
        model: String,
        row: String,
        col: String,
        nrow: usize,
        ncol: usize,
    },

    #[error("{model}: {what} not found")]
    Lookup { model: String, what: String },

    #[error("{model}: mandatory parameter <{param}> is missing for device {idx}")]
    MissingParam {
        model: String,
        param: String,
        idx: String,
    },

    #[error("model <{0}> is not registered")]
    UnknownModel(String),

    #[error("{model} has no attribute <{attr}>")]
    UnknownAttribute { model: String, attr: String },

    #[error("{model}: initialization failed: {msg}")]
    InitFailed { model: String, msg: String },

    #[error("invalid device data for {model}: {msg}")]
    Data { model: String, msg: String },

    #[error("sparse matrix error: {0}")]
    Sparse(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Problems with the solver configuration, reported before any iteration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid sparse library <{0}>")]
    InvalidSparseLib(String),

    #[error("sparse library <{0}> is not compiled in; enable the `{0}` feature")]
    SparseLibUnavailable(String),

    #[error("{0}")]
    Routine(String),
}

pub type Result<T> = std::result::Result<T, DaeError>;
