//! Search configuration types.
//!
//! Configuration is loaded from JSON with per-field defaults, so a config file
//! only needs to name what it changes.

use serde::{Deserialize, Serialize};

/// Top-level configuration for one genetic search run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Backend project whose schema and models seed the search.
    #[serde(default)]
    pub project_id: String,
    /// Population and termination settings.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Selection, crossover and mutation settings.
    #[serde(default)]
    pub operators: GeneticAlgorithmConfig,
    /// Gene used as fitness by the command-line runner.
    #[serde(default)]
    pub objective: Option<ObjectiveConfig>,
    /// Publish every evaluated generation to the backend.
    #[serde(default)]
    pub publish: bool,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

/// Population and generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of individuals in population.
    #[serde(default = "default_population_size")]
    pub size: usize,
    /// Maximum number of generations.
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,
    /// Target fitness to stop early.
    #[serde(default)]
    pub target_fitness: Option<f64>,
    /// Stagnation limit: stop if no improvement for N generations.
    #[serde(default)]
    pub stagnation_limit: Option<usize>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: default_population_size(),
            max_generations: default_max_generations(),
            target_fitness: None,
            stagnation_limit: None,
        }
    }
}

fn default_population_size() -> usize {
    20
}
fn default_max_generations() -> usize {
    50
}

/// Genetic operator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticAlgorithmConfig {
    /// Selection method.
    #[serde(default)]
    pub selection: SelectionMethod,
    /// Crossover method.
    #[serde(default)]
    pub crossover: CrossoverMethod,
    /// Per-locus crossover probability (0.0-1.0).
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Mutation probability per locus (0.0-1.0).
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Standard deviation of Gaussian mutation in normalized gene space.
    #[serde(default = "default_mutation_strength")]
    pub mutation_strength: f64,
    /// Elitism: number of best individuals carried over unchanged.
    #[serde(default)]
    pub elitism: usize,
    /// Extra mutation attempts for a child whose genotype already exists in
    /// the current or next generation. A child still duplicated afterwards is
    /// kept.
    #[serde(default = "default_duplicate_retries")]
    pub duplicate_retries: usize,
}

impl Default for GeneticAlgorithmConfig {
    fn default() -> Self {
        Self {
            selection: SelectionMethod::default(),
            crossover: CrossoverMethod::default(),
            crossover_rate: default_crossover_rate(),
            mutation_rate: default_mutation_rate(),
            mutation_strength: default_mutation_strength(),
            elitism: 0,
            duplicate_retries: default_duplicate_retries(),
        }
    }
}

fn default_crossover_rate() -> f64 {
    0.5
}
fn default_mutation_rate() -> f64 {
    0.1
}
fn default_mutation_strength() -> f64 {
    0.1
}
fn default_duplicate_retries() -> usize {
    5
}

/// Parent selection method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "method")]
pub enum SelectionMethod {
    /// Fitness-proportionate selection over `fitness - min_fitness`.
    #[default]
    RouletteWheel,
    /// Tournament selection with configurable size.
    Tournament {
        #[serde(default = "default_tournament_size")]
        size: usize,
    },
    /// Rank-based selection.
    RankBased,
}

fn default_tournament_size() -> usize {
    3
}

/// Crossover method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "method")]
pub enum CrossoverMethod {
    /// Swap each locus between the two children with probability `crossover_rate`.
    #[default]
    Uniform,
    /// Interpolate numeric loci along the line through both parents,
    /// extended by `alpha` on each side.
    Blend {
        #[serde(default = "default_blend_alpha")]
        alpha: f64,
    },
}

fn default_blend_alpha() -> f64 {
    0.5
}

/// Fitness read directly from a numeric gene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveConfig {
    /// Gene to rank designs by.
    pub field: String,
    /// Maximize (true) or minimize (false) the gene.
    #[serde(default = "default_maximize")]
    pub maximize: bool,
}

fn default_maximize() -> bool {
    true
}

// ============================================================================
// Validation
// ============================================================================

/// Search configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("Invalid probability for {name}: {value} (expected 0.0-1.0)")]
    InvalidRate { name: &'static str, value: f64 },
    #[error("Mutation strength must be positive, got {0}")]
    InvalidStrength(f64),
    #[error("Elitism ({elitism}) must be smaller than population size ({size})")]
    ElitismTooLarge { elitism: usize, size: usize },
    #[error("Tournament size must be at least 1")]
    InvalidTournament,
    #[error("Blend alpha must be non-negative, got {0}")]
    InvalidBlendAlpha(f64),
}

impl SearchConfig {
    /// Validate search configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population.size < 2 {
            return Err(ConfigError::PopulationTooSmall);
        }

        let ops = &self.operators;
        let check_rate = |value: f64, name: &'static str| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::InvalidRate { name, value })
            }
        };
        check_rate(ops.crossover_rate, "crossover_rate")?;
        check_rate(ops.mutation_rate, "mutation_rate")?;

        if !(ops.mutation_strength > 0.0 && ops.mutation_strength.is_finite()) {
            return Err(ConfigError::InvalidStrength(ops.mutation_strength));
        }

        if ops.elitism >= self.population.size {
            return Err(ConfigError::ElitismTooLarge {
                elitism: ops.elitism,
                size: self.population.size,
            });
        }

        if let SelectionMethod::Tournament { size: 0 } = ops.selection {
            return Err(ConfigError::InvalidTournament);
        }

        if let CrossoverMethod::Blend { alpha } = ops.crossover
            && !(alpha >= 0.0 && alpha.is_finite())
        {
            return Err(ConfigError::InvalidBlendAlpha(alpha));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.operators.selection, SelectionMethod::RouletteWheel);
        assert_eq!(config.operators.crossover, CrossoverMethod::Uniform);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "project_id": "d1445161",
            "population": {"size": 8, "stagnation_limit": 5},
            "operators": {"selection": {"method": "Tournament"}, "crossover": {"method": "Blend"}}
        }"#;
        let config: SearchConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.population.size, 8);
        assert_eq!(config.population.max_generations, 50);
        assert_eq!(config.population.stagnation_limit, Some(5));
        assert_eq!(
            config.operators.selection,
            SelectionMethod::Tournament { size: 3 }
        );
        assert_eq!(config.operators.crossover, CrossoverMethod::Blend { alpha: 0.5 });
        assert_eq!(config.operators.mutation_rate, 0.1);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = SearchConfig::default();
        config.population.size = 1;
        assert_eq!(config.validate(), Err(ConfigError::PopulationTooSmall));

        let mut config = SearchConfig::default();
        config.operators.mutation_rate = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRate {
                name: "mutation_rate",
                ..
            })
        ));

        let mut config = SearchConfig::default();
        config.operators.elitism = config.population.size;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ElitismTooLarge { .. })
        ));

        let mut config = SearchConfig::default();
        config.operators.selection = SelectionMethod::Tournament { size: 0 };
        assert_eq!(config.validate(), Err(ConfigError::InvalidTournament));
    }

    #[test]
    fn test_serialization() {
        let config = SearchConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SearchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.population.size, config.population.size);
    }
}
