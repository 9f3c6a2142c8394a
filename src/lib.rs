mod basic;
pub mod models;
pub mod prelude {
    use crate::basic;
    pub use basic::*;

    pub use basic::{
        config::{Config, PowerFlowConfig, SolverMethod, SparseLib, SystemConfig},
        error::{ConfigError, DaeError, Result},
        model::{
            Block, DataParam, ExtParam, Idx, IdxParam, JacBlock, Limiter, Model, NumParam,
            NumericValue, Service, Var, VarKind,
        },
        system::System,
    };
    pub use crate::models::power_flow_system;
}
