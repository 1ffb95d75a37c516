// Documents: a root `DataSection` bound to a file path.
//
// Documents are stored as pretty-printed JSON of the section tree. `open`
// fails when the file is missing; `open_or_create` hands back an empty
// document instead, which is what graph files want on first save. `save`
// creates missing parent directories. `remove` deletes the backing file and
// treats an already-missing file as success.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::section::DataSection;

/// Failures reading or writing a document.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed document {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl DataError {
    /// Whether the error means the file does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DataError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// A structured document on disk.
#[derive(Clone, Debug)]
pub struct Document {
    path: PathBuf,
    root: DataSection,
}

impl Document {
    /// An empty, unsaved document at `path`. The root section is named after
    /// the file stem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            root: DataSection::new(name),
        }
    }

    /// Open an existing document.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref().to_path_buf();
        let text = fs::read_to_string(&path).map_err(|source| DataError::Io {
            path: path.clone(),
            source,
        })?;
        let root = Self::parse(&path, &text)?;
        debug!(path = %path.display(), children = root.child_count(), "opened document");
        Ok(Self { path, root })
    }

    /// Open a document, or start an empty one if the file does not exist.
    /// Other I/O and parse errors are still reported.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self, DataError> {
        match Self::open(path.as_ref()) {
            Err(e) if e.is_not_found() => Ok(Self::new(path.as_ref())),
            other => other,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &DataSection {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut DataSection {
        &mut self.root
    }

    /// Write the document to its path, creating parent directories.
    pub fn save(&self) -> Result<(), DataError> {
        let io_err = |source| DataError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = self.to_json()?;
        fs::write(&self.path, text).map_err(io_err)?;
        debug!(path = %self.path.display(), children = self.root.child_count(), "saved document");
        Ok(())
    }

    /// Delete the backing file. A missing file is not an error.
    pub fn remove(&self) -> Result<(), DataError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(DataError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Serialize the section tree.
    pub fn to_json(&self) -> Result<String, DataError> {
        serde_json::to_string_pretty(&self.root).map_err(|source| DataError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Build a document from JSON text without touching the filesystem.
    pub fn from_json(path: impl Into<PathBuf>, text: &str) -> Result<Self, DataError> {
        let path = path.into();
        let root = Self::parse(&path, text)?;
        Ok(Self { path, root })
    }

    fn parse(path: &Path, text: &str) -> Result<DataSection, DataError> {
        serde_json::from_str(text).map_err(|source| DataError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
