//! Selection, crossover and mutation.
//!
//! Every operator is a free function over genotypes (or an evaluated
//! population) taking an explicit [`SearchRng`]; none of them touches the
//! population in place. Per-locus behavior branches on the [`Locus`] kind
//! table of the [`Chromosome`] the genotypes were encoded with.

use rand::distributions::{Distribution, WeightedIndex};

use super::chromosome::{Chromosome, Genotype, Locus};
use super::population::{Individual, Population};
use super::rng::SearchRng;
use crate::error::{OperatorError, SelectionError};
use crate::schema::{CrossoverMethod, SelectionMethod};

/// Weight floor for roulette selection, so the least-fit individual (or a
/// fully tied population) still has a non-zero chance.
pub const SELECTION_EPSILON: f64 = 1e-9;

/// Draw `k` parents (with repetition) from an evaluated population.
pub fn select<'a>(
    population: &'a Population,
    k: usize,
    method: &SelectionMethod,
    rng: &mut SearchRng,
) -> Result<Vec<&'a Individual>, SelectionError> {
    let individuals = population.individuals();
    if individuals.is_empty() {
        return Err(SelectionError::EmptyPopulation);
    }
    let fitness = individuals
        .iter()
        .map(|i| i.fitness.ok_or(SelectionError::Unevaluated { id: i.id }))
        .collect::<Result<Vec<f64>, _>>()?;

    let indices: Vec<usize> = match method {
        SelectionMethod::RouletteWheel => {
            weighted_draws(&roulette_weights(&fitness), k, rng)
        }
        SelectionMethod::Tournament { size } => (0..k)
            .map(|_| tournament(&fitness, (*size).max(1), rng))
            .collect(),
        SelectionMethod::RankBased => {
            // Best individual gets weight n, worst gets 1
            let mut order: Vec<usize> = (0..fitness.len()).collect();
            order.sort_by(|&a, &b| fitness[b].total_cmp(&fitness[a]));
            let mut weights = vec![0.0; fitness.len()];
            for (rank, &idx) in order.iter().enumerate() {
                weights[idx] = (fitness.len() - rank) as f64;
            }
            weighted_draws(&weights, k, rng)
        }
    };

    Ok(indices.into_iter().map(|i| &individuals[i]).collect())
}

/// `max(fitness - min_fitness, ε)`; failed evaluations weigh `ε`.
fn roulette_weights(fitness: &[f64]) -> Vec<f64> {
    let min = fitness
        .iter()
        .copied()
        .filter(|f| f.is_finite())
        .fold(f64::INFINITY, f64::min);

    fitness
        .iter()
        .map(|f| {
            if f.is_finite() {
                (f - min).max(SELECTION_EPSILON)
            } else {
                SELECTION_EPSILON
            }
        })
        .collect()
}

fn weighted_draws(weights: &[f64], k: usize, rng: &mut SearchRng) -> Vec<usize> {
    match WeightedIndex::new(weights) {
        Ok(dist) => (0..k).map(|_| dist.sample(rng.inner())).collect(),
        Err(err) => {
            // Only reachable when a fitness spread overflows to infinity
            log::debug!("weighted selection unavailable ({err}), drawing uniformly");
            (0..k).map(|_| rng.index(weights.len())).collect()
        }
    }
}

fn tournament(fitness: &[f64], size: usize, rng: &mut SearchRng) -> usize {
    let mut best = rng.index(fitness.len());
    for _ in 1..size {
        let idx = rng.index(fitness.len());
        if fitness[idx] > fitness[best] {
            best = idx;
        }
    }
    best
}

fn check_shape(
    chromosome: &Chromosome,
    genotype: &Genotype,
    operator: &'static str,
) -> Result<(), OperatorError> {
    if genotype.fingerprint() != chromosome.fingerprint() {
        return Err(OperatorError::ForeignGenotype { operator });
    }
    if genotype.len() != chromosome.len() {
        return Err(OperatorError::LengthMismatch {
            operator,
            expected: chromosome.len(),
            actual: genotype.len(),
        });
    }
    Ok(())
}

/// Produce two children from two parents.
///
/// Uniform crossover swaps each locus between the children with probability
/// `rate`. Blend crossover instead interpolates numeric loci with
/// `t ~ U(-alpha, 1 + alpha)` (clamped back to `[0, 1]`) and swaps
/// categorical and boolean loci. Vector genes are already flattened, so they
/// cross element by element.
pub fn crossover(
    chromosome: &Chromosome,
    parent_a: &Genotype,
    parent_b: &Genotype,
    rate: f64,
    method: &CrossoverMethod,
    rng: &mut SearchRng,
) -> Result<(Genotype, Genotype), OperatorError> {
    check_shape(chromosome, parent_a, "crossover")?;
    check_shape(chromosome, parent_b, "crossover")?;

    let mut child_a = parent_a.clone();
    let mut child_b = parent_b.clone();
    let (a, b) = (child_a.values_mut(), child_b.values_mut());

    for (i, locus) in chromosome.loci().iter().enumerate() {
        if !rng.chance(rate) {
            continue;
        }
        match method {
            CrossoverMethod::Blend { alpha } if locus.is_numeric() => {
                let t = rng.uniform(-alpha, 1.0 + alpha);
                let (x, y) = (a[i], b[i]);
                a[i] = (x + t * (y - x)).clamp(0.0, 1.0);
                b[i] = (y + t * (x - y)).clamp(0.0, 1.0);
            }
            _ => std::mem::swap(&mut a[i], &mut b[i]),
        }
    }

    Ok((child_a, child_b))
}

/// Return a mutated copy of `genotype`.
///
/// Each locus mutates independently with probability `rate`. Numeric loci
/// with a fixed step move one step up or down; other numeric loci take
/// Gaussian noise of standard deviation `strength`. Both are clamped to
/// `[0, 1]`. Categorical loci move to a different allowed value chosen
/// uniformly; boolean loci flip. Single-option categoricals never change.
pub fn mutate(
    chromosome: &Chromosome,
    genotype: &Genotype,
    rate: f64,
    strength: f64,
    rng: &mut SearchRng,
) -> Result<Genotype, OperatorError> {
    check_shape(chromosome, genotype, "mutate")?;

    let mut child = genotype.clone();
    for (locus, value) in chromosome.loci().iter().zip(child.values_mut()) {
        if !rng.chance(rate) {
            continue;
        }
        *value = match locus {
            Locus::Continuous {
                step: Some(step), ..
            }
            | Locus::Discrete {
                step: Some(step), ..
            } => {
                let delta = if rng.chance(0.5) { *step } else { -*step };
                (*value + delta).clamp(0.0, 1.0)
            }
            Locus::Continuous { .. } | Locus::Discrete { .. } => {
                rng.gaussian_mutate(*value, strength)
            }
            Locus::Categorical { options } if *options > 1 => {
                let current = value.round().clamp(0.0, (*options - 1) as f64) as usize;
                let pick = rng.index(options - 1);
                (if pick >= current { pick + 1 } else { pick }) as f64
            }
            Locus::Categorical { .. } => *value,
            Locus::Boolean => {
                if *value >= 0.5 {
                    0.0
                } else {
                    1.0
                }
            }
        };
    }

    Ok(child)
}
