//! On-disk artifact cache, one CSV file per pipeline stage.
//!
//! A stage's file existing is the cache-hit signal. Writes go to a sibling
//! `.tmp` file that is renamed into place, so a concurrent reader sees either
//! the previous artifact or the complete new one.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::pipeline::Stage;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no artifact for stage {stage} at {}", .path.display())]
    Missing { stage: Stage, path: PathBuf },
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("artifact {} is corrupt, regenerate it: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    /// Opens the cache rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| CacheError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.file_name())
    }

    pub fn exists(&self, stage: Stage) -> bool {
        self.path(stage).is_file()
    }

    /// Reads every row of a stage artifact. A file that does not parse as
    /// `T` is reported as [`CacheError::Corrupt`]; nothing is repaired.
    pub fn load<T: DeserializeOwned>(&self, stage: Stage) -> Result<Vec<T>, CacheError> {
        let path = self.path(stage);
        if !path.is_file() {
            return Err(CacheError::Missing { stage, path });
        }

        let file = File::open(&path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        let mut rdr = csv::Reader::from_reader(file);

        let mut rows = Vec::new();
        for result in rdr.deserialize() {
            let record: T = result.map_err(|source| CacheError::Corrupt {
                path: path.clone(),
                source,
            })?;
            rows.push(record);
        }

        debug!(stage = %stage, rows = rows.len(), "Artifact loaded");
        Ok(rows)
    }

    /// Replaces a stage artifact with `rows`.
    pub fn store<T: Serialize>(&self, stage: Stage, rows: &[T]) -> Result<(), CacheError> {
        let path = self.path(stage);
        let tmp = path.with_extension("csv.tmp");

        let file = File::create(&tmp).map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);

        for row in rows {
            writer.serialize(row).map_err(|source| CacheError::Write {
                path: tmp.clone(),
                source,
            })?;
        }
        let file = writer.into_inner().map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e.into_error(),
        })?;
        file.sync_all().map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        drop(file);

        fs::rename(&tmp, &path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(stage = %stage, rows = rows.len(), path = %path.display(), "Artifact stored");
        Ok(())
    }
}
