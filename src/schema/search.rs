//! Lifecycle, progress and result types for a search run.

use serde::{Deserialize, Serialize};

use super::Phenotype;

/// Lifecycle state of a [`GaSearch`](crate::GaSearch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SearchState {
    #[default]
    Uninitialized,
    SchemaLoaded,
    PopulationReady,
    Evaluating,
    Advancing,
    Terminated,
}

/// Reason evolution stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Reached maximum generations.
    MaxGenerations,
    /// Reached target fitness.
    TargetReached,
    /// Stagnation limit hit.
    Stagnation,
    /// Stopped by the caller.
    Cancelled,
    /// Fatal error occurred.
    Error(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            StopReason::MaxGenerations => "max-generations",
            StopReason::TargetReached => "target-reached",
            StopReason::Stagnation => "stagnation",
            StopReason::Cancelled => "cancelled",
            StopReason::Error(_) => "error",
        }
    }
}

/// Serializable view of an individual, also the payload published to the
/// backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualSnapshot {
    pub id: u64,
    /// Decoded design parameters.
    #[serde(rename = "parameters")]
    pub phenotype: Phenotype,
    /// Fitness score (`None` when not evaluated; failed evaluations
    /// serialize as `null` as well).
    pub fitness: Option<f64>,
    /// Generation this individual was created in.
    pub generation: usize,
    /// Parent IDs (for genealogy).
    pub parents: Vec<u64>,
}

/// A recoverable problem recorded during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchWarning {
    pub generation: usize,
    pub individual: Option<u64>,
    pub message: String,
}

/// Per-generation statistics for plotting.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchHistory {
    /// Best fitness found so far, per generation (`None` until an
    /// evaluation succeeds).
    pub best_fitness: Vec<Option<f64>>,
    /// Average fitness per generation (failed evaluations excluded).
    pub avg_fitness: Vec<f64>,
    /// Standard deviation per generation.
    pub fitness_std: Vec<f64>,
    /// Mean pairwise genotype distance per generation.
    pub diversity: Vec<f64>,
    /// Failed fitness evaluations per generation.
    pub failures: Vec<usize>,
}

/// Progress update emitted once per evaluated generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProgress {
    /// Current generation number.
    pub generation: usize,
    /// Total generations planned.
    pub total_generations: usize,
    /// Current lifecycle state.
    pub state: SearchState,
    /// Best fitness seen so far.
    pub best_fitness: Option<f64>,
    /// Best fitness this generation.
    pub generation_best: Option<f64>,
    /// Average fitness of current population.
    pub avg_fitness: f64,
    /// Generations since last improvement.
    pub stagnation_count: usize,
    /// Best individual so far.
    pub best: Option<IndividualSnapshot>,
    /// Fitness function calls so far.
    pub evaluations: u64,
    /// Scores served from the fitness cache so far.
    pub cache_hits: u64,
}

/// Statistics from a search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStats {
    /// Total generations advanced.
    pub generations: usize,
    /// Fitness function calls.
    pub total_evaluations: u64,
    /// Scores served from the fitness cache.
    pub cache_hits: u64,
    /// Failed fitness evaluations.
    pub fitness_failures: u64,
    /// Best fitness achieved.
    pub best_fitness: Option<f64>,
    /// Average fitness of final population.
    pub final_avg_fitness: f64,
    /// Time taken (in seconds).
    pub elapsed_seconds: f64,
    /// Reason for stopping.
    pub stop_reason: StopReason,
}

/// Final result of a search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Best individual found.
    pub best: Option<IndividualSnapshot>,
    /// Final population.
    pub population: Vec<IndividualSnapshot>,
    /// Statistics from the run.
    pub stats: SearchStats,
    /// Full history for analysis.
    pub history: SearchHistory,
    /// Recoverable failures observed during the run.
    pub warnings: Vec<SearchWarning>,
}
