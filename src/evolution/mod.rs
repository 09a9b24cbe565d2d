//! Evolutionary search over schema-typed designs.
//!
//! # Overview
//!
//! The search engine consists of:
//!
//! - **Chromosome** (`chromosome`): Encoding between phenotypes and normalized genotypes
//! - **Population** (`population`): One generation of scored individuals with lineage
//! - **Genetic Operators** (`operators`): Selection, crossover and mutation
//! - **Fitness** (`fitness`): The caller-supplied scoring interface
//! - **Search** (`search`): The lifecycle state machine driving the generation loop
//!
//! Every random draw goes through an explicit [`SearchRng`], so a run with a
//! fixed `random_seed` replays exactly.
//!
//! # Example
//!
//! ```rust,no_run
//! use morpho_search::backend::FileBackend;
//! use morpho_search::evolution::{FieldObjective, GaSearch};
//! use morpho_search::schema::SearchConfig;
//!
//! let config = SearchConfig {
//!     project_id: "pavilion".into(),
//!     ..Default::default()
//! };
//! let mut search = GaSearch::new(config, FileBackend::new("projects")).unwrap();
//!
//! let result = search
//!     .run_with_callback(&mut FieldObjective::maximize("floor_area"), |progress| {
//!         println!("Generation {}: best = {:?}", progress.generation, progress.best_fitness);
//!     })
//!     .unwrap();
//! println!("Stopped: {}", result.stats.stop_reason.as_str());
//! ```
//!
//! # Selection Methods
//!
//! - `RouletteWheel`: weight `max(fitness - min_fitness, ε)` (default)
//! - `Tournament`: best of `size` uniform draws
//! - `RankBased`: weight proportional to rank

mod chromosome;
mod fitness;
mod operators;
mod population;
mod rng;
mod search;

pub use chromosome::{Chromosome, Genotype, GenotypeKey, Locus};
pub use fitness::{FieldObjective, FitnessFunction};
pub use operators::{SELECTION_EPSILON, crossover, mutate, select};
pub use population::{EvaluationReport, FITNESS_SENTINEL, FitnessFailure, Individual, Population};
pub use rng::SearchRng;
pub use search::GaSearch;
