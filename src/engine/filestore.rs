// Copyright © 2025 Flowbench

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::warn;

use super::error::{Error, Result};

/// A named directory entry owned by one node execution. Nodes put large
/// binary artifacts here instead of into table cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStore {
    name: String,
    path: PathBuf,
}

impl FileStore {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Creates file stores under one base directory and tracks their names.
/// A fresh handler is installed for every node execution; disposal of the
/// old handler removes everything the previous execution wrote.
#[derive(Debug)]
pub struct FileStoreHandler {
    base: PathBuf,
    created: Mutex<HashSet<String>>,
}

impl FileStoreHandler {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            created: Mutex::new(HashSet::new()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn create_file_store(&self, name: &str) -> Result<FileStore> {
        if name.is_empty() {
            return Err(Error::InvalidFileStoreName(
                "name must not be empty".to_owned(),
            ));
        }
        if name.starts_with('.') {
            return Err(Error::InvalidFileStoreName(format!(
                "name must not start with a dot: {name:?}"
            )));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(Error::InvalidFileStoreName(format!(
                "name must not contain path separators: {name:?}"
            )));
        }
        let mut created = self.created.lock().unwrap();
        if !created.insert(name.to_owned()) {
            return Err(Error::DuplicateFileStoreName(name.to_owned()));
        }
        drop(created);
        std::fs::create_dir_all(&self.base)?;
        Ok(FileStore {
            name: name.to_owned(),
            path: self.base.join(name),
        })
    }

    /// Removes the base directory and everything in it. Failures are logged,
    /// not propagated; disposal runs on cleanup paths that must not fail.
    pub fn dispose(&self) {
        self.created.lock().unwrap().clear();
        if self.base.exists() {
            if let Err(error) = std::fs::remove_dir_all(&self.base) {
                warn!(
                    "could not remove file store directory {}: {error}",
                    self.base.display()
                );
            }
        }
    }
}
