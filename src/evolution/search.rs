//! The generation loop.
//!
//! [`GaSearch`] is a lifecycle state machine:
//!
//! ```text
//! Uninitialized -> SchemaLoaded -> PopulationReady -> Evaluating -> Advancing
//!                                        ^                              |
//!                                        +------------------------------+
//!                                                                       v
//!                                                                  Terminated
//! ```
//!
//! Each operation checks the state it requires and fails with
//! [`InvalidStateError`] otherwise, so a caller can drive the steps by hand or
//! hand the whole loop to [`GaSearch::run`].

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, info, warn};

use super::chromosome::{Chromosome, Genotype, GenotypeKey};
use super::fitness::FitnessFunction;
use super::operators::{crossover, mutate, select};
use super::population::{EvaluationReport, Individual, Population};
use super::rng::SearchRng;
use crate::backend::{BackendConnector, LocalCache, TransportError};
use crate::error::{InvalidStateError, SearchError};
use crate::schema::{
    Schema, SearchConfig, SearchHistory, SearchProgress, SearchResult, SearchState, SearchStats,
    SearchWarning, StopReason,
};

/// Genetic search over one project's schema.
pub struct GaSearch<B> {
    config: SearchConfig,
    backend: B,
    cache: Option<Box<dyn LocalCache>>,
    rng: SearchRng,
    state: SearchState,
    chromosome: Option<Chromosome>,
    population: Population,
    best: Option<Individual>,
    stagnation_count: usize,
    next_id: u64,
    history: SearchHistory,
    warnings: Vec<SearchWarning>,
    termination: Option<StopReason>,
    /// Current generation has been sent to the backend.
    published: bool,
    /// Current generation has been through the run loop's publish/callback step.
    reported: bool,
    evaluations: u64,
    cache_hits: u64,
    fitness_failures: u64,
    cancelled: Arc<AtomicBool>,
}

impl<B: BackendConnector> GaSearch<B> {
    /// Create a search; nothing is fetched until [`load_schema`](Self::load_schema).
    pub fn new(config: SearchConfig, backend: B) -> Result<Self, SearchError> {
        config.validate()?;

        let seed = config.random_seed.unwrap_or_else(rand::random);
        info!(
            "New search for project '{}' (random seed {seed})",
            config.project_id
        );

        Ok(Self {
            config,
            backend,
            cache: None,
            rng: SearchRng::new(seed),
            state: SearchState::Uninitialized,
            chromosome: None,
            population: Population::default(),
            best: None,
            stagnation_count: 0,
            next_id: 0,
            history: SearchHistory::default(),
            warnings: Vec::new(),
            termination: None,
            published: false,
            reported: false,
            evaluations: 0,
            cache_hits: 0,
            fitness_failures: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Serve repeated genotypes from a fitness cache.
    pub fn with_cache<C: LocalCache + 'static>(mut self, cache: C) -> Self {
        self.cache = Some(Box::new(cache));
        self
    }

    /// Get cancellation handle. Setting it stops the run at the next
    /// generation boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.chromosome.as_ref().map(Chromosome::schema)
    }

    pub fn chromosome(&self) -> Option<&Chromosome> {
        self.chromosome.as_ref()
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Current generation number.
    pub fn generation(&self) -> usize {
        self.population.generation()
    }

    /// Best individual found so far.
    pub fn best(&self) -> Option<&Individual> {
        self.best.as_ref()
    }

    pub fn history(&self) -> &SearchHistory {
        &self.history
    }

    /// Recoverable failures observed so far.
    pub fn warnings(&self) -> &[SearchWarning] {
        &self.warnings
    }

    /// Why the run ended, once it has.
    pub fn termination_reason(&self) -> Option<&StopReason> {
        self.termination.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Fetch and parse the project schema.
    ///
    /// A backend failure leaves the search `Uninitialized` so the call can be
    /// retried; a malformed schema terminates the run.
    pub fn load_schema(&mut self) -> Result<(), SearchError> {
        self.expect_state(SearchState::Uninitialized, "load schema")?;

        let raw = self
            .backend
            .fetch_schema(&self.config.project_id)
            .map_err(|source| self.transport_error(source))?;

        let schema = match Schema::parse(&raw) {
            Ok(schema) => schema,
            Err(err) => {
                self.terminate(StopReason::Error(err.to_string()));
                return Err(err.into());
            }
        };

        info!(
            "Loaded schema '{}' v{}: {} genes, {} loci",
            schema.id(),
            schema.version(),
            schema.len(),
            schema.genotype_len()
        );
        self.chromosome = Some(Chromosome::new(schema));
        self.state = SearchState::SchemaLoaded;
        Ok(())
    }

    /// Build generation 0 from the backend's prior models, topping up with
    /// random designs.
    ///
    /// At most `size` models are used, in backend order. Models that do not
    /// fit the schema are dropped with a warning, and duplicates of an
    /// already-seeded genotype are skipped.
    pub fn initialize_population(&mut self) -> Result<(), SearchError> {
        const OPERATION: &str = "initialize population";
        self.expect_state(SearchState::SchemaLoaded, OPERATION)?;

        let models = self
            .backend
            .fetch_models(&self.config.project_id)
            .map_err(|source| self.transport_error(source))?;

        let chromosome = self.chromosome.as_ref().ok_or(InvalidStateError {
            operation: OPERATION,
            state: self.state,
        })?;
        let size = self.config.population.size;
        let mut seen = HashSet::new();
        let mut individuals = Vec::with_capacity(size);

        for (index, model) in models.iter().enumerate() {
            if individuals.len() == size {
                break;
            }

            let genotype = match chromosome.encode(model) {
                Ok(genotype) => genotype,
                Err(err) => {
                    warn!("Dropping prior model #{index}: {err}");
                    self.warnings.push(SearchWarning {
                        generation: 0,
                        individual: None,
                        message: format!("prior model #{index} dropped: {err}"),
                    });
                    continue;
                }
            };
            if !seen.insert(chromosome.key(&genotype)) {
                debug!("Skipping duplicate prior model #{index}");
                continue;
            }

            let id = self.next_id;
            self.next_id += 1;
            individuals.push(spawn(chromosome, id, genotype, 0, Vec::new())?);
        }

        let seeded = individuals.len();
        while individuals.len() < size {
            let genotype = chromosome.random_genotype(&mut self.rng);
            let id = self.next_id;
            self.next_id += 1;
            individuals.push(spawn(chromosome, id, genotype, 0, Vec::new())?);
        }

        info!(
            "Initialized population of {size}: {seeded} seeded from {} prior models, {} random",
            models.len(),
            size - seeded
        );
        self.population = Population::new(0, individuals);
        self.state = SearchState::PopulationReady;
        Ok(())
    }

    /// Score every unscored individual of the current generation.
    ///
    /// Cached scores are used when a cache is attached. A failing fitness call
    /// marks only that individual (see [`FITNESS_SENTINEL`]) and is recorded
    /// as a warning; the rest of the generation is still scored.
    ///
    /// [`FITNESS_SENTINEL`]: super::FITNESS_SENTINEL
    pub fn evaluate<F>(&mut self, fitness: &mut F) -> Result<EvaluationReport, SearchError>
    where
        F: FitnessFunction + ?Sized,
    {
        const OPERATION: &str = "evaluate";
        self.expect_state(SearchState::PopulationReady, OPERATION)?;

        let chromosome = self.chromosome.as_ref().ok_or(InvalidStateError {
            operation: OPERATION,
            state: self.state,
        })?;
        self.state = SearchState::Evaluating;
        let generation = self.population.generation();

        let cache = &mut self.cache;
        let (mut calls, mut hits) = (0u64, 0u64);
        let report = self.population.evaluate(|individual| {
            let key = chromosome.key(&individual.genotype);
            if let Some(score) = cache.as_ref().and_then(|c| c.get(key)) {
                debug!("Individual {} served from cache ({key})", individual.id);
                hits += 1;
                return Ok(score);
            }

            calls += 1;
            let score = fitness.evaluate(&individual.phenotype)?;
            if score.is_finite()
                && let Some(store) = cache.as_mut()
            {
                store.put(key, score);
            }
            Ok(score)
        });
        self.evaluations += calls;
        self.cache_hits += hits;

        for failure in &report.failures {
            warn!(
                "Fitness evaluation failed for individual {} in generation {generation}: {}",
                failure.id, failure.message
            );
            self.warnings.push(SearchWarning {
                generation,
                individual: Some(failure.id),
                message: failure.message.clone(),
            });
        }
        self.fitness_failures += report.failures.len() as u64;

        if let Some(store) = self.cache.as_mut()
            && let Err(err) = store.flush()
        {
            warn!("Fitness cache flush failed: {err}");
            self.warnings.push(SearchWarning {
                generation,
                individual: None,
                message: format!("fitness cache flush failed: {err}"),
            });
        }

        // Best-so-far only moves on strict improvement
        let generation_best = self
            .population
            .best()
            .filter(|individual| !individual.has_failed())
            .cloned();
        let improved = match (&generation_best, &self.best) {
            (Some(candidate), Some(best)) => candidate.fitness > best.fitness,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if improved {
            self.best = generation_best;
            self.stagnation_count = 0;
        } else {
            self.stagnation_count += 1;
        }

        self.history
            .best_fitness
            .push(self.best.as_ref().and_then(|b| b.fitness));
        self.history.avg_fitness.push(self.population.mean_fitness());
        self.history.fitness_std.push(self.population.fitness_std());
        self.history
            .diversity
            .push(diversity(chromosome, &self.population));
        self.history.failures.push(report.failures.len());

        info!(
            "Generation {generation}: best {:?}, avg {:.4}, {} scored, {} cached, {} failed",
            self.best.as_ref().and_then(|b| b.fitness),
            self.population.mean_fitness(),
            calls,
            hits,
            report.failures.len()
        );

        self.published = false;
        self.reported = false;
        self.state = SearchState::Advancing;
        Ok(report)
    }

    /// Publish the scored generation to the backend.
    ///
    /// A failed publish leaves the search `Advancing`; calling `publish` or
    /// [`run`](Self::run) again retries it.
    pub fn publish(&mut self) -> Result<(), SearchError> {
        self.expect_state(SearchState::Advancing, "publish")?;

        let generation = self.population.generation();
        let models = self.population.snapshot();
        self.backend
            .publish_generation(&self.config.project_id, generation, &models)
            .map_err(|source| self.transport_error(source))?;

        info!("Published generation {generation} ({} models)", models.len());
        self.published = true;
        Ok(())
    }

    /// Either terminate (cancelled, generation limit, target fitness or
    /// stagnation) or breed the next generation.
    ///
    /// Operator and selection failures terminate the run with an error reason
    /// before being returned.
    pub fn advance(&mut self) -> Result<(), SearchError> {
        self.expect_state(SearchState::Advancing, "advance")?;

        if let Some(reason) = self.should_stop() {
            self.terminate(reason);
            return Ok(());
        }

        match self.breed() {
            Ok(population) => {
                debug!(
                    "Bred generation {} ({} individuals)",
                    population.generation(),
                    population.len()
                );
                self.population = population;
                self.state = SearchState::PopulationReady;
                Ok(())
            }
            Err(err) => {
                self.terminate(StopReason::Error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Stop the run now. The termination reason is `Cancelled` unless the run
    /// had already ended.
    pub fn stop(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.terminate(StopReason::Cancelled);
    }

    /// Get current progress.
    pub fn progress(&self) -> SearchProgress {
        SearchProgress {
            generation: self.population.generation(),
            total_generations: self.config.population.max_generations,
            state: self.state,
            best_fitness: self.best.as_ref().and_then(|b| b.fitness),
            generation_best: self
                .population
                .best()
                .and_then(|b| b.fitness)
                .filter(|f| f.is_finite()),
            avg_fitness: self.population.mean_fitness(),
            stagnation_count: self.stagnation_count,
            best: self.best.as_ref().map(Individual::to_snapshot),
            evaluations: self.evaluations,
            cache_hits: self.cache_hits,
        }
    }

    /// Run the remaining lifecycle to termination, reporting progress after
    /// every evaluated generation.
    ///
    /// Picks up from whatever state the search is in, so it can follow
    /// manual steps.
    pub fn run_with_callback<F, C>(
        &mut self,
        fitness: &mut F,
        mut callback: C,
    ) -> Result<SearchResult, SearchError>
    where
        F: FitnessFunction + ?Sized,
        C: FnMut(&SearchProgress),
    {
        self.expect_not_terminated("run")?;
        let start_time = Instant::now();

        if self.state == SearchState::Uninitialized {
            self.load_schema()?;
        }
        if self.state == SearchState::SchemaLoaded {
            self.initialize_population()?;
        }

        let stop_reason = loop {
            if let Some(reason) = &self.termination {
                break reason.clone();
            }
            match self.state {
                SearchState::PopulationReady => {
                    self.evaluate(fitness)?;
                }
                SearchState::Advancing => {
                    if !self.reported {
                        if self.config.publish && !self.published {
                            self.publish()?;
                        }
                        callback(&self.progress());
                        self.reported = true;
                    }
                    self.advance()?;
                }
                state => {
                    return Err(InvalidStateError {
                        operation: "run",
                        state,
                    }
                    .into());
                }
            }
        };

        Ok(self.result(stop_reason, start_time.elapsed().as_secs_f64()))
    }

    /// Run evolution (blocking).
    pub fn run<F>(&mut self, fitness: &mut F) -> Result<SearchResult, SearchError>
    where
        F: FitnessFunction + ?Sized,
    {
        self.run_with_callback(fitness, |_| {})
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn expect_state(
        &self,
        expected: SearchState,
        operation: &'static str,
    ) -> Result<(), InvalidStateError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(InvalidStateError {
                operation,
                state: self.state,
            })
        }
    }

    fn expect_not_terminated(&self, operation: &'static str) -> Result<(), InvalidStateError> {
        if self.state == SearchState::Terminated {
            Err(InvalidStateError {
                operation,
                state: self.state,
            })
        } else {
            Ok(())
        }
    }

    fn transport_error(&self, source: TransportError) -> SearchError {
        SearchError::Transport {
            state: self.state,
            generation: self.population.generation(),
            source,
        }
    }

    fn terminate(&mut self, reason: StopReason) {
        if self.termination.is_none() {
            info!(
                "Search terminated at generation {}: {}",
                self.population.generation(),
                reason.as_str()
            );
            self.termination = Some(reason);
        }
        self.state = SearchState::Terminated;
    }

    /// Check if evolution should stop.
    fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }

        let limits = &self.config.population;
        if self.population.generation() >= limits.max_generations {
            return Some(StopReason::MaxGenerations);
        }

        if let Some(target) = limits.target_fitness
            && let Some(best) = self.best.as_ref().and_then(|b| b.fitness)
            && best >= target
        {
            return Some(StopReason::TargetReached);
        }

        if let Some(limit) = limits.stagnation_limit
            && self.stagnation_count >= limit
        {
            return Some(StopReason::Stagnation);
        }

        None
    }

    /// Produce the next generation: elites first, then mutated offspring of
    /// consecutive selected pairs.
    fn breed(&mut self) -> Result<Population, SearchError> {
        let chromosome = self.chromosome.as_ref().ok_or(InvalidStateError {
            operation: "advance",
            state: self.state,
        })?;
        let ops = &self.config.operators;
        let current = self.population.generation();
        let generation = current + 1;

        let mut elites = self.population.clone();
        elites.truncate(ops.elitism);
        let mut next = elites.individuals().to_vec();
        let mut seen: HashSet<GenotypeKey> = self
            .population
            .iter()
            .map(|individual| chromosome.key(&individual.genotype))
            .collect();

        let parents = select(
            &self.population,
            self.config.population.size - next.len(),
            &ops.selection,
            &mut self.rng,
        )
        .map_err(|source| SearchError::Selection {
            generation: current,
            source,
        })?;

        for pair in parents.chunks(2) {
            let offspring: Vec<(Genotype, &Individual, Option<&Individual>)> = match pair {
                [a, b] => {
                    let (child_a, child_b) = crossover(
                        chromosome,
                        &a.genotype,
                        &b.genotype,
                        ops.crossover_rate,
                        &ops.crossover,
                        &mut self.rng,
                    )
                    .map_err(|source| SearchError::Operator {
                        generation: current,
                        individual: Some(a.id),
                        source,
                    })?;
                    vec![(child_a, *a, Some(*b)), (child_b, *b, Some(*a))]
                }
                // Odd parent out is only mutated
                [a] => vec![(a.genotype.clone(), *a, None)],
                _ => Vec::new(),
            };

            for (child, parent, mate) in offspring {
                let operator_error = |source| SearchError::Operator {
                    generation: current,
                    individual: Some(parent.id),
                    source,
                };
                let mut mutated = mutate(
                    chromosome,
                    &child,
                    ops.mutation_rate,
                    ops.mutation_strength,
                    &mut self.rng,
                )
                .map_err(operator_error)?;

                let mut retries = 0;
                while retries < ops.duplicate_retries && seen.contains(&chromosome.key(&mutated)) {
                    mutated = mutate(
                        chromosome,
                        &child,
                        ops.mutation_rate,
                        ops.mutation_strength,
                        &mut self.rng,
                    )
                    .map_err(operator_error)?;
                    retries += 1;
                }
                if !seen.insert(chromosome.key(&mutated)) {
                    debug!("Keeping duplicate child of {} after {retries} retries", parent.id);
                }

                let lineage = match mate {
                    Some(mate) if child != parent.genotype => vec![parent.id, mate.id],
                    _ => vec![parent.id],
                };

                let id = self.next_id;
                self.next_id += 1;
                let individual = match chromosome.decode(&mutated) {
                    Ok(phenotype) => Individual::new(id, mutated, phenotype, generation, lineage),
                    Err(err) => {
                        warn!("Replacing undecodable child {id} with a random design: {err}");
                        self.warnings.push(SearchWarning {
                            generation,
                            individual: Some(id),
                            message: format!("child replaced by a random design: {err}"),
                        });
                        let genotype = chromosome.random_genotype(&mut self.rng);
                        spawn(chromosome, id, genotype, generation, Vec::new())?
                    }
                };
                next.push(individual);
            }
        }

        Ok(Population::new(generation, next))
    }

    fn result(&self, stop_reason: StopReason, elapsed_seconds: f64) -> SearchResult {
        SearchResult {
            best: self.best.as_ref().map(Individual::to_snapshot),
            population: self.population.snapshot(),
            stats: SearchStats {
                generations: self.population.generation(),
                total_evaluations: self.evaluations,
                cache_hits: self.cache_hits,
                fitness_failures: self.fitness_failures,
                best_fitness: self.best.as_ref().and_then(|b| b.fitness),
                final_avg_fitness: self.population.mean_fitness(),
                elapsed_seconds,
                stop_reason,
            },
            history: self.history.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

/// Decode a genotype into a fresh individual.
fn spawn(
    chromosome: &Chromosome,
    id: u64,
    genotype: Genotype,
    generation: usize,
    parents: Vec<u64>,
) -> Result<Individual, SearchError> {
    let phenotype = chromosome
        .decode(&genotype)
        .map_err(|source| SearchError::Encoding {
            generation,
            individual: id,
            source,
        })?;
    Ok(Individual::new(id, genotype, phenotype, generation, parents))
}

/// Mean pairwise genotype distance.
fn diversity(chromosome: &Chromosome, population: &Population) -> f64 {
    let individuals = population.individuals();
    if individuals.len() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut count = 0usize;
    for (i, a) in individuals.iter().enumerate() {
        for b in &individuals[i + 1..] {
            total += chromosome.distance(&a.genotype, &b.genotype);
            count += 1;
        }
    }
    total / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, MemoryCache};
    use crate::error::{FitnessError, SchemaError};
    use crate::schema::{
        GeneticAlgorithmConfig, IndividualSnapshot, Phenotype, PopulationConfig, RawGene, RawSchema,
    };

    fn line_schema() -> RawSchema {
        RawSchema {
            id: "line".into(),
            version: 1,
            fields: vec![RawGene::continuous("x", 0.0, 10.0)],
        }
    }

    fn line_backend(models: Vec<Phenotype>) -> MemoryBackend {
        MemoryBackend::new().with_project("line", line_schema(), models)
    }

    fn line_config(size: usize, max_generations: usize) -> SearchConfig {
        SearchConfig {
            project_id: "line".into(),
            population: PopulationConfig {
                size,
                max_generations,
                ..Default::default()
            },
            random_seed: Some(42),
            ..Default::default()
        }
    }

    fn x_fitness(phenotype: &Phenotype) -> Result<f64, FitnessError> {
        phenotype
            .get_f64("x")
            .ok_or_else(|| FitnessError::new("missing x"))
    }

    fn at(x: f64) -> Phenotype {
        Phenotype::new().with("x", x)
    }

    /// Memory backend rejecting its first `failures` publishes.
    struct FlakyPublisher {
        inner: MemoryBackend,
        failures: usize,
    }

    impl BackendConnector for FlakyPublisher {
        fn fetch_schema(&mut self, project_id: &str) -> Result<RawSchema, TransportError> {
            self.inner.fetch_schema(project_id)
        }

        fn fetch_models(&mut self, project_id: &str) -> Result<Vec<Phenotype>, TransportError> {
            self.inner.fetch_models(project_id)
        }

        fn publish_generation(
            &mut self,
            project_id: &str,
            generation: usize,
            models: &[IndividualSnapshot],
        ) -> Result<(), TransportError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(TransportError::Unavailable("publish rejected".into()));
            }
            self.inner.publish_generation(project_id, generation, models)
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = GaSearch::new(line_config(1, 5), line_backend(vec![]));
        assert!(matches!(result, Err(SearchError::Config(_))));
    }

    #[test]
    fn test_single_generation_run() {
        let mut search = GaSearch::new(line_config(4, 1), line_backend(vec![])).unwrap();
        search.load_schema().unwrap();
        search.initialize_population().unwrap();

        search.evaluate(&mut x_fitness).unwrap();
        search.advance().unwrap();
        assert_eq!(search.state(), SearchState::PopulationReady);
        assert_eq!(search.generation(), 1);

        search.evaluate(&mut x_fitness).unwrap();
        search.advance().unwrap();
        assert_eq!(search.state(), SearchState::Terminated);
        assert_eq!(search.generation(), 1);
        assert_eq!(
            search.termination_reason(),
            Some(&StopReason::MaxGenerations)
        );
    }

    #[test]
    fn test_run_stops_at_max_generations() {
        let mut search = GaSearch::new(line_config(4, 1), line_backend(vec![])).unwrap();
        let result = search.run(&mut x_fitness).unwrap();

        assert_eq!(result.stats.generations, 1);
        assert_eq!(result.stats.stop_reason, StopReason::MaxGenerations);
        assert_eq!(result.history.best_fitness.len(), 2);
        assert_eq!(result.population.len(), 4);
    }

    #[test]
    fn test_best_so_far_is_monotone() {
        let mut config = line_config(4, 10);
        config.operators = GeneticAlgorithmConfig {
            crossover_rate: 0.5,
            mutation_rate: 0.5,
            mutation_strength: 0.2,
            ..Default::default()
        };
        let mut search = GaSearch::new(config, line_backend(vec![])).unwrap();

        let mut best_x = Vec::new();
        let result = search
            .run_with_callback(&mut x_fitness, |progress| {
                let best = progress.best.as_ref().unwrap();
                best_x.push(best.phenotype.get_f64("x").unwrap());
            })
            .unwrap();

        assert_eq!(best_x.len(), 11);
        assert!(best_x.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(result.stats.stop_reason, StopReason::MaxGenerations);
        assert_eq!(result.stats.best_fitness, Some(best_x[10]));
    }

    #[test]
    fn test_empty_history_fills_population() {
        let raw = RawSchema {
            id: "pavilion".into(),
            version: 3,
            fields: vec![
                RawGene::continuous("height", 2.0, 12.0),
                RawGene::discrete("floors", 1, 6),
                RawGene::categorical("roof", &["flat", "gable", "hip"]),
                RawGene::boolean("solar"),
                RawGene::vector("bays", 3, RawGene::discrete("", 0, 4)),
            ],
        };
        let backend = MemoryBackend::new().with_project("pavilion", raw, vec![]);
        let config = SearchConfig {
            project_id: "pavilion".into(),
            population: PopulationConfig {
                size: 6,
                ..Default::default()
            },
            random_seed: Some(7),
            ..Default::default()
        };

        let mut search = GaSearch::new(config, backend).unwrap();
        search.load_schema().unwrap();
        search.initialize_population().unwrap();

        let schema = search.schema().unwrap();
        let population = search.population();
        assert_eq!(population.len(), 6);
        assert_eq!(population.generation(), 0);
        for individual in population.iter() {
            assert!(schema.validate(&individual.phenotype));
            assert!(individual.parents.is_empty());
            assert!(individual.fitness.is_none());
        }
    }

    #[test]
    fn test_prior_models_seed_population() {
        let models = vec![at(2.5), at(20.0), at(2.5), at(7.5)];
        let mut search = GaSearch::new(line_config(4, 3), line_backend(models)).unwrap();
        search.load_schema().unwrap();
        search.initialize_population().unwrap();

        let population = search.population();
        assert_eq!(population.len(), 4);
        assert_eq!(population.individuals()[0].phenotype, at(2.5));
        assert_eq!(population.individuals()[1].phenotype, at(7.5));

        // Out-of-range model dropped with a warning, duplicate skipped silently
        assert_eq!(search.warnings().len(), 1);
        assert!(search.warnings()[0].message.contains("#1"));
    }

    #[test]
    fn test_prior_models_capped_at_population_size() {
        let models = (0..8).map(|i| at(i as f64)).collect();
        let mut search = GaSearch::new(line_config(3, 3), line_backend(models)).unwrap();
        search.load_schema().unwrap();
        search.initialize_population().unwrap();

        let xs: Vec<f64> = search
            .population()
            .iter()
            .map(|i| i.phenotype.get_f64("x").unwrap())
            .collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_fitness_failure_does_not_abort() {
        let models = vec![at(2.5), at(5.0), at(7.5), at(1.25)];
        let mut search = GaSearch::new(line_config(4, 3), line_backend(models)).unwrap();
        search.load_schema().unwrap();
        search.initialize_population().unwrap();

        let mut flaky = |p: &Phenotype| -> Result<f64, FitnessError> {
            let x = x_fitness(p)?;
            if x == 5.0 {
                Err(FitnessError::new("mesh failed to close"))
            } else {
                Ok(x)
            }
        };

        let report = search.evaluate(&mut flaky).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, 1);
        let scores: Vec<Option<f64>> = search.population().iter().map(|i| i.fitness).collect();
        assert_eq!(scores[0], Some(2.5));
        assert!(search.population().individuals()[1].has_failed());
        assert_eq!(scores[2], Some(7.5));
        assert_eq!(scores[3], Some(1.25));
        assert_eq!(search.best().unwrap().id, 2);

        let result = search.run(&mut flaky).unwrap();
        assert_eq!(result.stats.stop_reason, StopReason::MaxGenerations);
        assert!(result.stats.fitness_failures >= 1);
        assert_eq!(result.warnings[0].individual, Some(1));
        assert_eq!(search.state(), SearchState::Terminated);
    }

    #[test]
    fn test_operations_after_termination_fail() {
        let mut search = GaSearch::new(line_config(4, 2), line_backend(vec![])).unwrap();
        search.run(&mut x_fitness).unwrap();

        assert!(matches!(
            search.advance(),
            Err(SearchError::InvalidState(InvalidStateError {
                operation: "advance",
                state: SearchState::Terminated,
            }))
        ));
        assert!(matches!(
            search.evaluate(&mut x_fitness),
            Err(SearchError::InvalidState(_))
        ));
        assert!(matches!(
            search.run(&mut x_fitness),
            Err(SearchError::InvalidState(_))
        ));
        assert_eq!(
            search.termination_reason(),
            Some(&StopReason::MaxGenerations)
        );
    }

    #[test]
    fn test_operations_out_of_order_fail() {
        let mut search = GaSearch::new(line_config(4, 2), line_backend(vec![])).unwrap();
        assert!(matches!(
            search.initialize_population(),
            Err(SearchError::InvalidState(_))
        ));

        search.load_schema().unwrap();
        search.initialize_population().unwrap();
        assert!(matches!(
            search.advance(),
            Err(SearchError::InvalidState(InvalidStateError {
                state: SearchState::PopulationReady,
                ..
            }))
        ));
        // A call in the wrong state does not end the run
        assert_eq!(search.state(), SearchState::PopulationReady);
        assert!(search.termination_reason().is_none());
    }

    #[test]
    fn test_cancellation() {
        let mut search = GaSearch::new(line_config(4, 100), line_backend(vec![])).unwrap();
        let cancel = search.cancel_handle();

        // Cancel immediately
        cancel.store(true, Ordering::Relaxed);

        let result = search.run(&mut x_fitness).unwrap();
        assert_eq!(result.stats.stop_reason, StopReason::Cancelled);
        assert_eq!(result.stats.generations, 0);
    }

    #[test]
    fn test_cancel_from_callback() {
        let mut search = GaSearch::new(line_config(4, 100), line_backend(vec![])).unwrap();
        let cancel = search.cancel_handle();

        let result = search
            .run_with_callback(&mut x_fitness, |progress| {
                if progress.generation == 3 {
                    cancel.store(true, Ordering::Relaxed);
                }
            })
            .unwrap();
        assert_eq!(result.stats.stop_reason, StopReason::Cancelled);
        assert_eq!(result.stats.generations, 3);
    }

    #[test]
    fn test_stop_is_final() {
        let mut search = GaSearch::new(line_config(4, 10), line_backend(vec![])).unwrap();
        search.load_schema().unwrap();
        search.stop();

        assert_eq!(search.state(), SearchState::Terminated);
        assert_eq!(search.termination_reason(), Some(&StopReason::Cancelled));
        assert!(search.initialize_population().is_err());
    }

    #[test]
    fn test_stagnation() {
        let mut config = line_config(4, 50);
        config.population.stagnation_limit = Some(3);
        let mut search = GaSearch::new(config, line_backend(vec![])).unwrap();

        let mut flat = |_: &Phenotype| -> Result<f64, FitnessError> { Ok(1.0) };
        let result = search.run(&mut flat).unwrap();
        assert_eq!(result.stats.stop_reason, StopReason::Stagnation);
        assert_eq!(result.stats.generations, 3);
    }

    #[test]
    fn test_target_fitness() {
        let mut config = line_config(4, 50);
        config.population.target_fitness = Some(9.0);
        let mut search = GaSearch::new(config, line_backend(vec![at(9.5)])).unwrap();

        let result = search.run(&mut x_fitness).unwrap();
        assert_eq!(result.stats.stop_reason, StopReason::TargetReached);
        assert_eq!(result.stats.generations, 0);
        assert!(result.best.unwrap().fitness.unwrap() >= 9.5);
    }

    #[test]
    fn test_seeded_runs_replay() {
        let run = || {
            let mut search = GaSearch::new(line_config(6, 5), line_backend(vec![])).unwrap();
            search.run(&mut x_fitness).unwrap()
        };
        let (a, b) = (run(), run());

        assert_eq!(a.population, b.population);
        assert_eq!(a.history.best_fitness, b.history.best_fitness);
        assert_eq!(a.best, b.best);
    }

    #[test]
    fn test_cache_serves_repeated_genotypes() {
        let mut config = line_config(4, 2);
        config.operators.crossover_rate = 0.0;
        config.operators.mutation_rate = 0.0;
        let mut search = GaSearch::new(config, line_backend(vec![]))
            .unwrap()
            .with_cache(MemoryCache::new());

        let mut calls = 0;
        let mut counted = |p: &Phenotype| -> Result<f64, FitnessError> {
            calls += 1;
            x_fitness(p)
        };
        let result = search.run(&mut counted).unwrap();

        // Offspring are exact copies of their parents
        assert_eq!(calls, 4);
        assert_eq!(result.stats.total_evaluations, 4);
        assert_eq!(result.stats.cache_hits, 8);
    }

    #[test]
    fn test_elitism_keeps_best() {
        let mut config = line_config(4, 1);
        config.operators.elitism = 1;
        let mut search = GaSearch::new(config, line_backend(vec![at(9.0)])).unwrap();
        search.load_schema().unwrap();
        search.initialize_population().unwrap();
        search.evaluate(&mut x_fitness).unwrap();
        let best = search.best().unwrap().clone();
        assert!(best.fitness.unwrap() >= 9.0);
        search.advance().unwrap();

        let elite = &search.population().individuals()[0];
        assert_eq!(elite, &best);
        assert_eq!(elite.generation, 0);
        assert_eq!(search.population().len(), 4);
    }

    #[test]
    fn test_children_record_lineage() {
        let mut config = line_config(5, 3);
        config.operators.crossover_rate = 1.0;
        let mut search = GaSearch::new(config, line_backend(vec![])).unwrap();
        search.load_schema().unwrap();
        search.initialize_population().unwrap();
        search.evaluate(&mut x_fitness).unwrap();

        let previous: Vec<u64> = search.population().iter().map(|i| i.id).collect();
        search.advance().unwrap();

        for child in search.population().iter() {
            assert_eq!(child.generation, 1);
            assert!(!child.parents.is_empty() && child.parents.len() <= 2);
            assert!(child.parents.iter().all(|p| previous.contains(p)));
            assert!(!previous.contains(&child.id));
        }
        // Odd leftover parent descends by mutation alone
        assert_eq!(search.population().individuals()[4].parents.len(), 1);
    }

    #[test]
    fn test_transport_error_leaves_state() {
        let mut backend = line_backend(vec![]);
        backend.set_offline(true);
        let mut search = GaSearch::new(line_config(4, 2), backend).unwrap();

        let err = search.load_schema().unwrap_err();
        assert!(matches!(
            err,
            SearchError::Transport {
                state: SearchState::Uninitialized,
                generation: 0,
                ..
            }
        ));
        assert_eq!(search.state(), SearchState::Uninitialized);

        search.backend_mut().set_offline(false);
        search.load_schema().unwrap();
        assert_eq!(search.state(), SearchState::SchemaLoaded);
    }

    #[test]
    fn test_schema_error_terminates() {
        let backend = MemoryBackend::new().with_project(
            "line",
            RawSchema {
                id: "line".into(),
                version: 1,
                fields: vec![],
            },
            vec![],
        );
        let mut search = GaSearch::new(line_config(4, 2), backend).unwrap();

        assert!(matches!(
            search.load_schema(),
            Err(SearchError::Schema(SchemaError::Empty))
        ));
        assert_eq!(search.state(), SearchState::Terminated);
        assert!(matches!(
            search.termination_reason(),
            Some(StopReason::Error(_))
        ));
    }

    #[test]
    fn test_publishes_every_generation() {
        let mut config = line_config(4, 2);
        config.publish = true;
        let mut search = GaSearch::new(config, line_backend(vec![])).unwrap();
        search.run(&mut x_fitness).unwrap();

        let published = search.backend().published("line");
        let generations: Vec<usize> = published.iter().map(|g| g.generation).collect();
        assert_eq!(generations, vec![0, 1, 2]);
        assert!(published.iter().all(|g| g.models.len() == 4));
        assert!(published[0].models.iter().all(|m| m.fitness.is_some()));
    }

    #[test]
    fn test_backend_by_reference() {
        let mut backend = line_backend(vec![]);
        let mut config = line_config(4, 1);
        config.publish = true;
        {
            let mut search = GaSearch::new(config, &mut backend).unwrap();
            search.run(&mut x_fitness).unwrap();
        }
        assert_eq!(backend.published("line").len(), 2);
    }

    #[test]
    fn test_run_retries_failed_publish() {
        let mut config = line_config(4, 2);
        config.publish = true;
        let backend = FlakyPublisher {
            inner: line_backend(vec![]),
            failures: 1,
        };
        let mut search = GaSearch::new(config, backend).unwrap();

        let mut reported = Vec::new();
        let err = search
            .run_with_callback(&mut x_fitness, |p| reported.push(p.generation))
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::Transport {
                state: SearchState::Advancing,
                generation: 0,
                ..
            }
        ));
        assert_eq!(search.state(), SearchState::Advancing);

        search
            .run_with_callback(&mut x_fitness, |p| reported.push(p.generation))
            .unwrap();

        let generations: Vec<usize> = search
            .backend()
            .inner
            .published("line")
            .iter()
            .map(|g| g.generation)
            .collect();
        assert_eq!(generations, vec![0, 1, 2]);
        assert_eq!(reported, vec![0, 1, 2]);
    }

    #[test]
    fn test_manual_publish_not_repeated_by_run() {
        let mut config = line_config(4, 1);
        config.publish = true;
        let mut search = GaSearch::new(config, line_backend(vec![])).unwrap();
        search.load_schema().unwrap();
        search.initialize_population().unwrap();
        search.evaluate(&mut x_fitness).unwrap();
        search.publish().unwrap();

        search.run(&mut x_fitness).unwrap();
        let generations: Vec<usize> = search
            .backend()
            .published("line")
            .iter()
            .map(|g| g.generation)
            .collect();
        assert_eq!(generations, vec![0, 1]);
    }

    #[test]
    fn test_children_avoid_duplicate_genotypes() {
        let tones: Vec<String> = (0..16).map(|i| format!("tone-{i}")).collect();
        let tones: Vec<&str> = tones.iter().map(String::as_str).collect();
        let schema = RawSchema {
            id: "palette".into(),
            version: 1,
            fields: vec![RawGene::categorical("tone", &tones)],
        };
        let backend = MemoryBackend::new().with_project("palette", schema, vec![]);

        let mut config = line_config(4, 3);
        config.project_id = "palette".into();
        config.operators.crossover_rate = 0.0;
        config.operators.mutation_rate = 1.0;
        config.operators.duplicate_retries = 30;
        let mut search = GaSearch::new(config, backend).unwrap();
        search.load_schema().unwrap();
        search.initialize_population().unwrap();

        let mut flat = |_: &Phenotype| -> Result<f64, FitnessError> { Ok(1.0) };
        let chromosome = search.chromosome().unwrap().clone();
        for _ in 0..3 {
            search.evaluate(&mut flat).unwrap();
            let previous: HashSet<GenotypeKey> = search
                .population()
                .iter()
                .map(|i| chromosome.key(&i.genotype))
                .collect();
            search.advance().unwrap();

            let keys: Vec<GenotypeKey> = search
                .population()
                .iter()
                .map(|i| chromosome.key(&i.genotype))
                .collect();
            let unique: HashSet<GenotypeKey> = keys.iter().copied().collect();
            assert_eq!(unique.len(), keys.len());
            assert!(unique.is_disjoint(&previous));
        }
    }
}
