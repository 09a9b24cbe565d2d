//! Morpho Search CLI - Evolve designs for a project directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use morpho_search::{
    backend::{FileBackend, JsonFileCache, MODELS_FILE, SCHEMA_FILE},
    evolution::{FieldObjective, GaSearch},
    schema::{
        GeneValue, ObjectiveConfig, Phenotype, PopulationConfig, RawGene, RawSchema, SearchConfig,
    },
};

/// Run configuration file inside the project directory.
const CONFIG_FILE: &str = "search.json";
/// Fitness cache file inside the project directory.
const CACHE_FILE: &str = "fitness_cache.json";

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <project-dir> | --example", args[0]);
        eprintln!();
        eprintln!("Evolve designs for a project directory.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  project-dir  Directory holding {SCHEMA_FILE}, and optionally");
        eprintln!("               {MODELS_FILE} (prior designs) and {CONFIG_FILE}");
        eprintln!();
        eprintln!("Example project files are printed with the --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_project();
        return;
    }

    let project_dir = fs::canonicalize(&args[1]).unwrap_or_else(|e| {
        eprintln!("Error opening project directory {}: {}", args[1], e);
        std::process::exit(1);
    });
    let (root, project_id) = split_project_dir(&project_dir).unwrap_or_else(|| {
        eprintln!("Not a project directory: {}", project_dir.display());
        std::process::exit(1);
    });

    // Load configuration
    let config_path = project_dir.join(CONFIG_FILE);
    let mut config: SearchConfig = if config_path.exists() {
        let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
            eprintln!("Error reading config file: {}", e);
            std::process::exit(1);
        });
        serde_json::from_str(&config_str).unwrap_or_else(|e| {
            eprintln!("Error parsing config: {}", e);
            std::process::exit(1);
        })
    } else {
        SearchConfig::default()
    };
    config.project_id = project_id;
    config.publish = true;

    let Some(mut objective) = config.objective.as_ref().map(FieldObjective::from) else {
        eprintln!("{CONFIG_FILE} must name an objective gene, for example:");
        eprintln!(r#"  "objective": {{ "field": "floor_area", "maximize": true }}"#);
        std::process::exit(1);
    };

    let cache = JsonFileCache::open(project_dir.join(CACHE_FILE)).unwrap_or_else(|e| {
        eprintln!("Error opening fitness cache: {}", e);
        std::process::exit(1);
    });

    println!("Morpho Search");
    println!("=============");
    println!("Project: {}", project_dir.display());
    println!(
        "Population: {} x {} generations",
        config.population.size, config.population.max_generations
    );
    println!(
        "Objective: {} {}",
        if config.objective.as_ref().is_some_and(|o| o.maximize) {
            "maximize"
        } else {
            "minimize"
        },
        objective.field()
    );
    println!();

    let mut search = GaSearch::new(config, FileBackend::new(root))
        .unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        })
        .with_cache(cache);

    let start = Instant::now();
    let result = search
        .run_with_callback(&mut objective, |progress| {
            println!(
                "  Generation {}/{}: best={}, avg={:.4}, stagnant={}",
                progress.generation,
                progress.total_generations,
                progress
                    .best_fitness
                    .map_or_else(|| "-".to_string(), |f| format!("{f:.4}")),
                progress.avg_fitness,
                progress.stagnation_count
            );
        })
        .unwrap_or_else(|e| {
            eprintln!("Search failed: {}", e);
            std::process::exit(1);
        });

    println!();
    println!("Stopped: {}", result.stats.stop_reason.as_str());
    println!("Generations: {}", result.stats.generations);
    println!(
        "Evaluations: {} ({} cached, {} failed)",
        result.stats.total_evaluations, result.stats.cache_hits, result.stats.fitness_failures
    );
    for warning in &result.warnings {
        println!("Warning (generation {}): {}", warning.generation, warning.message);
    }
    if let Some(best) = &result.best {
        println!();
        println!(
            "Best design (id {}, generation {}, fitness {:?}):",
            best.id, best.generation, best.fitness
        );
        for (name, value) in best.phenotype.iter() {
            println!("  {name} = {value}");
        }
    }
    println!();
    println!("Time: {:.2}s", start.elapsed().as_secs_f32());
}

/// A project directory is addressed as `<root>/<project-id>`.
fn split_project_dir(dir: &Path) -> Option<(PathBuf, String)> {
    let project_id = dir.file_name()?.to_str()?.to_string();
    let root = dir.parent()?.to_path_buf();
    Some((root, project_id))
}

fn print_example_project() {
    let schema = RawSchema {
        id: "pavilion".into(),
        version: 1,
        fields: vec![
            RawGene::continuous("height", 3.0, 12.0).with_precision(3),
            RawGene::discrete("bays", 2, 8).with_step(1.0),
            RawGene::categorical("roof", &["flat", "gable", "vault"]),
            RawGene::boolean("canopy"),
            RawGene::vector("column_offsets", 4, RawGene::continuous("", -0.5, 0.5)),
            RawGene::continuous("floor_area", 50.0, 400.0),
        ],
    };
    let models = vec![
        Phenotype::new()
            .with("height", 6.0)
            .with("bays", 4i64)
            .with("roof", "gable")
            .with("canopy", true)
            .with(
                "column_offsets",
                [0.0, 0.1, -0.1, 0.0].map(GeneValue::Float).to_vec(),
            )
            .with("floor_area", 180.0),
    ];
    let config = SearchConfig {
        project_id: "pavilion".into(),
        population: PopulationConfig {
            stagnation_limit: Some(10),
            ..Default::default()
        },
        objective: Some(ObjectiveConfig {
            field: "floor_area".into(),
            maximize: true,
        }),
        ..Default::default()
    };

    print_json(&format!("Example schema (pavilion/{SCHEMA_FILE})"), &schema);
    println!();
    print_json(&format!("Example prior designs (pavilion/{MODELS_FILE})"), &models);
    println!();
    print_json(&format!("Example configuration (pavilion/{CONFIG_FILE})"), &config);
}

fn print_json<T: Serialize>(label: &str, value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{label}:");
            println!("{json}");
        }
        Err(e) => eprintln!("Error serializing {label}: {e}"),
    }
}
