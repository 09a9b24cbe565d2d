//! Schema module - Gene specifications, phenotypes, configuration and run reports.

mod config;
mod gene;
mod phenotype;
mod search;

pub use config::*;
pub use gene::*;
pub use phenotype::*;
pub use search::*;
