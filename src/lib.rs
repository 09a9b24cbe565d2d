//! Morpho Search - Schema-driven genetic search over parametric design models.
//!
//! A project backend holds a schema (the tunable genes of a design) and the
//! history of designs generated so far. This crate evolves new designs
//! against that schema with a caller-supplied fitness function.
//!
//! # Architecture
//!
//! The crate is split into these modules:
//!
//! - `schema`: Gene specifications, phenotypes, run configuration and reports
//! - `evolution`: Chromosome encoding, genetic operators, populations and the
//!   search state machine
//! - `backend`: Backend connectors and fitness caches the search talks to
//! - `error`: The error taxonomy
//!
//! # Example
//!
//! ```rust
//! use morpho_search::{
//!     backend::MemoryBackend,
//!     error::FitnessError,
//!     evolution::GaSearch,
//!     schema::{Phenotype, PopulationConfig, RawGene, RawSchema, SearchConfig},
//! };
//!
//! let schema = RawSchema {
//!     id: "canopy".into(),
//!     version: 1,
//!     fields: vec![
//!         RawGene::continuous("span", 4.0, 20.0),
//!         RawGene::categorical("profile", &["flat", "arched"]),
//!     ],
//! };
//! let backend = MemoryBackend::new().with_project("canopy", schema, vec![]);
//!
//! let config = SearchConfig {
//!     project_id: "canopy".into(),
//!     population: PopulationConfig {
//!         size: 8,
//!         max_generations: 5,
//!         ..Default::default()
//!     },
//!     random_seed: Some(1),
//!     ..Default::default()
//! };
//!
//! let mut search = GaSearch::new(config, backend).unwrap();
//! let mut span = |design: &Phenotype| -> Result<f64, FitnessError> {
//!     design.get_f64("span").ok_or_else(|| FitnessError::new("no span"))
//! };
//! let result = search.run(&mut span).unwrap();
//!
//! assert_eq!(result.stats.generations, 5);
//! assert!(result.best.is_some());
//! ```

pub mod backend;
pub mod error;
pub mod evolution;
pub mod schema;

// Re-export commonly used types
pub use backend::{BackendConnector, FileBackend, LocalCache, MemoryBackend};
pub use error::SearchError;
pub use evolution::{Chromosome, FieldObjective, FitnessFunction, GaSearch, SearchRng};
pub use schema::{Phenotype, Schema, SearchConfig, StopReason};
