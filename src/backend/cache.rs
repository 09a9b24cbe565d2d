//! Fitness caches keyed by genotype hash.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::evolution::GenotypeKey;

/// Failure persisting or loading a fitness cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed cache file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Remembers fitness scores so identical genotypes are not re-scored.
pub trait LocalCache {
    fn get(&self, key: GenotypeKey) -> Option<f64>;

    fn put(&mut self, key: GenotypeKey, fitness: f64);

    /// Persist pending writes. The engine calls this once per evaluated
    /// generation.
    fn flush(&mut self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Process-local cache.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: HashMap<GenotypeKey, f64>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: GenotypeKey) -> Option<f64> {
        self.entries.get(&key).copied()
    }

    fn put(&mut self, key: GenotypeKey, fitness: f64) {
        self.entries.insert(key, fitness);
    }
}

/// Cache persisted as a JSON object of `key -> fitness`, one file per
/// project.
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    path: PathBuf,
    entries: BTreeMap<GenotypeKey, f64>,
    dirty: bool,
}

impl JsonFileCache {
    /// Open the cache at `path`, starting empty when the file does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| CacheError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|source| CacheError::Json {
                path: path.clone(),
                source,
            })?
        } else {
            BTreeMap::new()
        };

        log::debug!("Opened fitness cache {} ({} entries)", path.display(), entries.len());
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write every entry to disk.
    pub fn save(&mut self) -> Result<(), CacheError> {
        let io_err = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            CacheError::Json {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&self.path, json).map_err(io_err)?;
        self.dirty = false;
        Ok(())
    }
}

impl LocalCache for JsonFileCache {
    fn get(&self, key: GenotypeKey) -> Option<f64> {
        self.entries.get(&key).copied()
    }

    fn put(&mut self, key: GenotypeKey, fitness: f64) {
        self.entries.insert(key, fitness);
        self.dirty = true;
    }

    fn flush(&mut self) -> Result<(), CacheError> {
        if self.dirty { self.save() } else { Ok(()) }
    }
}
