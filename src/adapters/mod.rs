use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::session::SessionConnector;

pub mod local;
pub mod memory;
pub mod process;
pub mod simulated;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use process::ProcessConnector;
pub use simulated::{SimulatedConnector, SimulatedDevice};

/// Session collaborator for this run: a fabricating simulator in simulation
/// mode, the external client program otherwise.
pub fn get_connector(config: &AppConfig) -> Result<Arc<dyn SessionConnector>, regex::Error> {
    if config.simulation {
        return Ok(Arc::new(SimulatedConnector::permissive()));
    }
    Ok(Arc::new(ProcessConnector::new(&config.session)?))
}
