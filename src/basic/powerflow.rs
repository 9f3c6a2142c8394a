use std::{fmt, io};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tabled::{Table, Tabled, settings::Style};

use super::{
    config::{PowerFlowConfig, SolverMethod, SparseLib},
    error::Result,
    fdpf::fdpf,
    newtonpf::{SolveStatus, newton_subset},
    solver::make_solver,
    system::System,
};

/// A float that prints with a fixed number of decimals.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub(crate) struct FloatWrapper {
    value: f64,
    precision: usize,
}

impl FloatWrapper {
    pub fn new(value: f64, precision: usize) -> Self {
        FloatWrapper { value, precision }
    }
}

impl fmt::Display for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

impl fmt::Debug for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Solved quantities at one bus. Powers are in MW and MVAr.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusResult {
    pub idx: String,
    pub vm: f64,
    /// Angle in degrees.
    pub va: f64,
    pub p_load: f64,
    pub q_load: f64,
    pub p_gen: f64,
    pub q_gen: f64,
}

#[derive(Debug, Tabled)]
#[allow(non_snake_case)]
struct BusResTable {
    Bus: String,
    Vm: FloatWrapper,
    Va: FloatWrapper,
    Pl_mw: FloatWrapper,
    Ql_mvar: FloatWrapper,
    Pg_mw: FloatWrapper,
    Qg_mvar: FloatWrapper,
}

impl From<&BusResult> for BusResTable {
    fn from(r: &BusResult) -> Self {
        Self {
            Bus: r.idx.clone(),
            Vm: FloatWrapper::new(r.vm, 4),
            Va: FloatWrapper::new(r.va, 3),
            Pl_mw: FloatWrapper::new(r.p_load, 3),
            Ql_mvar: FloatWrapper::new(r.q_load, 3),
            Pg_mw: FloatWrapper::new(r.p_gen, 3),
            Qg_mvar: FloatWrapper::new(r.q_gen, 3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerFlowResult {
    pub method: SolverMethod,
    pub status: SolveStatus,
    pub converged: bool,
    pub iterations: usize,
    /// Mismatch at the start of every iteration.
    pub mismatches: Vec<f64>,
    pub buses: Vec<BusResult>,
}

impl PowerFlowResult {
    /// Markdown table of bus results.
    pub fn report(&self) -> String {
        let rows: Vec<BusResTable> = self.buses.iter().map(BusResTable::from).collect();
        format!(
            "{} power flow: {:?} after {} iterations\n\n{}",
            self.method,
            self.status,
            self.iterations,
            Table::new(rows).with(Style::markdown())
        )
    }

    pub fn write_bus_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for bus in &self.buses {
            wtr.serialize(bus)?;
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

/// Bus voltages and load and generation totals per bus.
fn bus_results(system: &System) -> Vec<BusResult> {
    let Some(bus) = system.models.get("Bus") else {
        return Vec::new();
    };
    let (Some(a), Some(v)) = (bus.vars.get("a"), bus.vars.get("v")) else {
        return Vec::new();
    };
    let mva = system.config.mva;
    let pl = system.injections("StaticLoad", "a");
    let ql = system.injections("StaticLoad", "v");
    let pg = system.injections("StaticGen", "a");
    let qg = system.injections("StaticGen", "v");
    let y = &system.dae.y;
    bus.data
        .idx
        .iter()
        .zip(a.a.iter().zip(&v.a))
        .map(|(idx, (&ai, &vi))| BusResult {
            idx: idx.to_string(),
            vm: y[vi],
            va: y[ai].to_degrees(),
            p_load: pl[ai] * mva,
            q_load: ql[vi] * mva,
            p_gen: -pg[ai] * mva,
            q_gen: -qg[vi] * mva,
        })
        .collect()
}

/// Runs a power flow on `system`.
///
/// Sets the system up if needed, initializes all models, optionally resets
/// bus voltages to a flat start and solves with the configured method. An
/// unknown method falls back to Newton; an unknown or disabled sparse
/// library is an error. Non-convergence is reported through the result.
pub fn run_powerflow(system: &mut System, config: &PowerFlowConfig) -> Result<PowerFlowResult> {
    let lib: SparseLib = config.sparselib.parse()?;
    let mut solver = make_solver(lib)?;
    let method = SolverMethod::parse_or_default(&config.method);
    info!(
        "-> Power flow calculation: method {method}, sparse solver {lib}, tol {:e}, max iter {}",
        config.tol, config.max_iter
    );

    if !system.is_setup() {
        system.setup()?;
    }
    system.init()?;
    if config.flat_start {
        system.flat_start();
    }

    let outcome = match method {
        SolverMethod::Newton => {
            newton_subset(system, solver.as_mut(), None, config.tol, config.max_iter)?
        }
        SolverMethod::FastDecoupled => fdpf(system, lib, config.tol, config.max_iter)?,
    };
    system.update_equations();

    let converged = outcome.status == SolveStatus::Converged;
    match outcome.status {
        SolveStatus::Converged => info!(
            "Converged in {} iterations, mismatch {:.3e}",
            outcome.iterations,
            outcome.mismatches.last().copied().unwrap_or_default()
        ),
        SolveStatus::Diverged => warn!("Power flow diverged after {} iterations", outcome.iterations),
        status => warn!(
            "Power flow did not converge in {} iterations ({status:?})",
            outcome.iterations
        ),
    }

    Ok(PowerFlowResult {
        method,
        status: outcome.status,
        converged,
        iterations: outcome.iterations,
        mismatches: outcome.mismatches,
        buses: bus_results(system),
    })
}
