//! Individuals and the generation that holds them.

use crate::error::FitnessError;
use crate::schema::{IndividualSnapshot, Phenotype};

use super::chromosome::Genotype;

/// Fitness recorded for an individual whose evaluation failed. It can still
/// be selected (with minimal weight) but never compares above a real score.
pub const FITNESS_SENTINEL: f64 = f64::NEG_INFINITY;

/// One candidate design plus its fitness and lineage.
#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
    /// Unique identifier within the run.
    pub id: u64,
    /// Normalized encoding.
    pub genotype: Genotype,
    /// Decoded design.
    pub phenotype: Phenotype,
    /// `None` until evaluated.
    pub fitness: Option<f64>,
    /// Generation created.
    pub generation: usize,
    /// Parent IDs: empty for seeds, one for mutation-only descent, two for
    /// crossover descent.
    pub parents: Vec<u64>,
}

impl Individual {
    pub fn new(
        id: u64,
        genotype: Genotype,
        phenotype: Phenotype,
        generation: usize,
        parents: Vec<u64>,
    ) -> Self {
        Self {
            id,
            genotype,
            phenotype,
            fitness: None,
            generation,
            parents,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.fitness.is_some()
    }

    /// Whether the fitness function failed for this individual.
    pub fn has_failed(&self) -> bool {
        self.fitness == Some(FITNESS_SENTINEL)
    }

    /// Convert to snapshot for serialization.
    pub fn to_snapshot(&self) -> IndividualSnapshot {
        IndividualSnapshot {
            id: self.id,
            phenotype: self.phenotype.clone(),
            fitness: self.fitness,
            generation: self.generation,
            parents: self.parents.clone(),
        }
    }

    /// Sort key: unevaluated individuals rank with failed ones.
    fn rank_key(&self) -> f64 {
        self.fitness.unwrap_or(FITNESS_SENTINEL)
    }
}

/// A fitness function failure for one individual.
#[derive(Debug, Clone, PartialEq)]
pub struct FitnessFailure {
    pub id: u64,
    pub message: String,
}

/// Outcome of [`Population::evaluate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    /// Individuals scored by this call.
    pub evaluated: usize,
    /// Individuals skipped because they already had a score.
    pub skipped: usize,
    /// Individuals whose evaluation failed and received the sentinel.
    pub failures: Vec<FitnessFailure>,
}

/// The individuals of one generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Population {
    generation: usize,
    individuals: Vec<Individual>,
}

impl Population {
    pub fn new(generation: usize, individuals: Vec<Individual>) -> Self {
        Self {
            generation,
            individuals,
        }
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    pub fn iter(&self) -> impl Iterator<Item = &Individual> {
        self.individuals.iter()
    }

    pub fn get(&self, id: u64) -> Option<&Individual> {
        self.individuals.iter().find(|i| i.id == id)
    }

    /// Whether every individual carries a fitness value.
    pub fn is_evaluated(&self) -> bool {
        self.individuals.iter().all(Individual::is_evaluated)
    }

    /// Score every individual lacking a fitness value, in population order.
    ///
    /// Already-scored individuals are never re-evaluated, so calling this
    /// twice is a no-op the second time. A failing or non-finite evaluation
    /// stores [`FITNESS_SENTINEL`] and is reported; the rest of the
    /// population is still evaluated.
    pub fn evaluate<F>(&mut self, mut fitness: F) -> EvaluationReport
    where
        F: FnMut(&Individual) -> Result<f64, FitnessError>,
    {
        let mut report = EvaluationReport::default();

        for individual in &mut self.individuals {
            if individual.is_evaluated() {
                report.skipped += 1;
                continue;
            }

            let score = match fitness(&*individual) {
                Ok(value) if value.is_finite() => value,
                Ok(value) => {
                    report.failures.push(FitnessFailure {
                        id: individual.id,
                        message: format!("fitness function returned non-finite value {value}"),
                    });
                    FITNESS_SENTINEL
                }
                Err(err) => {
                    report.failures.push(FitnessFailure {
                        id: individual.id,
                        message: err.to_string(),
                    });
                    FITNESS_SENTINEL
                }
            };
            individual.fitness = Some(score);
            report.evaluated += 1;
        }

        report
    }

    /// Highest-fitness individual; ties go to the lowest generation, then to
    /// population order.
    pub fn best(&self) -> Option<&Individual> {
        self.individuals
            .iter()
            .filter(|i| i.is_evaluated())
            .reduce(|best, candidate| {
                let (b, c) = (best.rank_key(), candidate.rank_key());
                if c > b || (c == b && candidate.generation < best.generation) {
                    candidate
                } else {
                    best
                }
            })
    }

    /// Keep the top `n` by fitness, preserving original order among ties.
    pub fn truncate(&mut self, n: usize) {
        self.individuals
            .sort_by(|a, b| b.rank_key().total_cmp(&a.rank_key()));
        self.individuals.truncate(n);
    }

    /// Mean of the successfully evaluated fitness values.
    pub fn mean_fitness(&self) -> f64 {
        let scores: Vec<f64> = self.scores().collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }

    /// Standard deviation of the successfully evaluated fitness values.
    pub fn fitness_std(&self) -> f64 {
        let scores: Vec<f64> = self.scores().collect();
        if scores.is_empty() {
            return 0.0;
        }
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let variance =
            scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
        variance.sqrt()
    }

    /// Serializable view of every individual.
    pub fn snapshot(&self) -> Vec<IndividualSnapshot> {
        self.individuals.iter().map(Individual::to_snapshot).collect()
    }

    fn scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.individuals
            .iter()
            .filter_map(|i| i.fitness)
            .filter(|f| f.is_finite())
    }
}
