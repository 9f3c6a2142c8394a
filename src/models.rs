//! Power-flow device library.
//!
//! Residuals at bus rows are power leaving the bus: line flows plus loads
//! minus generation.

mod bus;
mod line;
mod pq;
mod pv;
mod slack;

pub use bus::bus;
pub use line::line;
pub use pq::pq;
pub use pv::pv;
pub use slack::slack;

use crate::basic::{error::Result, system::System};

/// A system with `Bus`, `PQ`, `PV`, `Slack` and `Line` registered.
pub fn power_flow_system() -> Result<System> {
    let mut system = System::new();
    for model in [bus(), pq(), pv(), slack(), line()] {
        system.add_model(model)?;
    }
    Ok(system)
}
