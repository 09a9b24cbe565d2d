//! Backend connectors: where schemas and prior models come from and where
//! scored generations are published.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::schema::{IndividualSnapshot, Phenotype, RawSchema};

/// Failure talking to the backend. The engine never retries; any retry policy
/// belongs to the connector.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of a project's schema and model history, and sink for generations.
pub trait BackendConnector {
    /// Raw (unvalidated) schema of a project.
    fn fetch_schema(&mut self, project_id: &str) -> Result<RawSchema, TransportError>;

    /// Previously generated designs, in backend order.
    fn fetch_models(&mut self, project_id: &str) -> Result<Vec<Phenotype>, TransportError>;

    /// Record one scored generation.
    fn publish_generation(
        &mut self,
        project_id: &str,
        generation: usize,
        models: &[IndividualSnapshot],
    ) -> Result<(), TransportError>;
}

impl<T: BackendConnector + ?Sized> BackendConnector for &mut T {
    fn fetch_schema(&mut self, project_id: &str) -> Result<RawSchema, TransportError> {
        (**self).fetch_schema(project_id)
    }

    fn fetch_models(&mut self, project_id: &str) -> Result<Vec<Phenotype>, TransportError> {
        (**self).fetch_models(project_id)
    }

    fn publish_generation(
        &mut self,
        project_id: &str,
        generation: usize,
        models: &[IndividualSnapshot],
    ) -> Result<(), TransportError> {
        (**self).publish_generation(project_id, generation, models)
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// A generation recorded by [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedGeneration {
    pub generation: usize,
    pub models: Vec<IndividualSnapshot>,
}

#[derive(Debug, Clone)]
struct MemoryProject {
    schema: RawSchema,
    models: Vec<Phenotype>,
    published: Vec<PublishedGeneration>,
}

/// Backend held entirely in memory, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    projects: BTreeMap<String, MemoryProject>,
    offline: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project with its schema and model history.
    pub fn with_project(
        mut self,
        project_id: impl Into<String>,
        schema: RawSchema,
        models: Vec<Phenotype>,
    ) -> Self {
        self.projects.insert(
            project_id.into(),
            MemoryProject {
                schema,
                models,
                published: Vec::new(),
            },
        );
        self
    }

    /// While offline every call fails with [`TransportError::Unavailable`].
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Generations published to a project so far.
    pub fn published(&self, project_id: &str) -> &[PublishedGeneration] {
        self.projects
            .get(project_id)
            .map(|p| p.published.as_slice())
            .unwrap_or_default()
    }

    fn project(&mut self, project_id: &str) -> Result<&mut MemoryProject, TransportError> {
        if self.offline {
            return Err(TransportError::Unavailable("memory backend is offline".into()));
        }
        self.projects
            .get_mut(project_id)
            .ok_or_else(|| TransportError::ProjectNotFound(project_id.to_string()))
    }
}

impl BackendConnector for MemoryBackend {
    fn fetch_schema(&mut self, project_id: &str) -> Result<RawSchema, TransportError> {
        Ok(self.project(project_id)?.schema.clone())
    }

    fn fetch_models(&mut self, project_id: &str) -> Result<Vec<Phenotype>, TransportError> {
        Ok(self.project(project_id)?.models.clone())
    }

    fn publish_generation(
        &mut self,
        project_id: &str,
        generation: usize,
        models: &[IndividualSnapshot],
    ) -> Result<(), TransportError> {
        self.project(project_id)?.published.push(PublishedGeneration {
            generation,
            models: models.to_vec(),
        });
        Ok(())
    }
}

// ============================================================================
// File backend
// ============================================================================

/// Name of the schema file inside a project directory.
pub const SCHEMA_FILE: &str = "schema.json";
/// Name of the model history file inside a project directory.
pub const MODELS_FILE: &str = "models.json";
/// Directory receiving published generations.
pub const GENERATIONS_DIR: &str = "generations";

/// Model history entries are either bare designs or published snapshots, so a
/// generation file can be fed back in as history.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredModel {
    Published { parameters: Phenotype },
    Bare(Phenotype),
}

/// Backend over a directory of projects.
///
/// Each project is a subdirectory holding `schema.json` and an optional
/// `models.json`; published generations are written to
/// `generations/generation_NNNN.json` inside it.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a project.
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }

    /// File a given generation is published to.
    pub fn generation_path(&self, project_id: &str, generation: usize) -> PathBuf {
        self.project_dir(project_id)
            .join(GENERATIONS_DIR)
            .join(format!("generation_{generation:04}.json"))
    }

    fn existing_project(&self, project_id: &str) -> Result<PathBuf, TransportError> {
        let dir = self.project_dir(project_id);
        if project_id.is_empty() || !dir.is_dir() {
            return Err(TransportError::ProjectNotFound(project_id.to_string()));
        }
        Ok(dir)
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, TransportError> {
    let content = fs::read_to_string(path).map_err(|source| TransportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| TransportError::Json {
        path: path.to_path_buf(),
        source,
    })
}

impl BackendConnector for FileBackend {
    fn fetch_schema(&mut self, project_id: &str) -> Result<RawSchema, TransportError> {
        let dir = self.existing_project(project_id)?;
        read_json(&dir.join(SCHEMA_FILE))
    }

    fn fetch_models(&mut self, project_id: &str) -> Result<Vec<Phenotype>, TransportError> {
        let path = self.existing_project(project_id)?.join(MODELS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let stored: Vec<StoredModel> = read_json(&path)?;
        Ok(stored
            .into_iter()
            .map(|model| match model {
                StoredModel::Published { parameters } => parameters,
                StoredModel::Bare(phenotype) => phenotype,
            })
            .collect())
    }

    fn publish_generation(
        &mut self,
        project_id: &str,
        generation: usize,
        models: &[IndividualSnapshot],
    ) -> Result<(), TransportError> {
        self.existing_project(project_id)?;
        let path = self.generation_path(project_id, generation);
        let io_err = |source| TransportError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(models).map_err(|source| TransportError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(io_err)?;

        log::debug!("Published generation {generation} to {}", path.display());
        Ok(())
    }
}
