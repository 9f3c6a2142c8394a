pub mod config;
pub mod dae;
pub mod error;
pub(crate) mod fdpf;
pub mod krylov;
pub mod model;
pub(crate) mod newtonpf;
pub mod powerflow;
pub mod solver;
pub(crate) mod sparse;
pub mod symbolic;
pub mod system;
pub mod triplet;

pub use fdpf::{BusPartition, fdpf};
pub use newtonpf::{NewtonOutcome, SolveStatus, check_iteration, newton_subset};
pub use powerflow::{BusResult, PowerFlowResult, run_powerflow};
