//! A working library: a directory of named containers ("units").
//!
//! Units are stored as `<root>/<unit>.lib`.  All handles created here share
//! the library's registry and options.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ContainerOptions;
use crate::error::{ContainerError, Result};
use crate::io_stream::{ContainerReader, ContainerWriter};
use crate::registry::Registry;

pub const UNIT_EXTENSION: &str = "lib";

#[derive(Debug)]
pub struct WorkLibrary {
    root:     PathBuf,
    options:  ContainerOptions,
    registry: Arc<Registry>,
}

impl WorkLibrary {
    pub fn new<P: Into<PathBuf>>(
        root:     P,
        options:  ContainerOptions,
        registry: &Arc<Registry>,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| ContainerError::io(&root.display().to_string(), "create directory", e))?;
        Ok(Self { root, options, registry: Arc::clone(registry) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    pub fn path_of(&self, unit: &str) -> Result<PathBuf> {
        let valid = !unit.is_empty()
            && unit != "."
            && !unit.contains("..")
            && !unit.contains(['/', '\\', '\0']);
        if !valid {
            return Err(ContainerError::InvalidUnit { root: self.root.clone(), unit: unit.to_owned() });
        }
        Ok(self.root.join(format!("{unit}.{UNIT_EXTENSION}")))
    }

    pub fn contains(&self, unit: &str) -> Result<bool> {
        Ok(self.path_of(unit)?.is_file())
    }

    pub fn create(&self, unit: &str) -> Result<ContainerWriter> {
        let path = self.path_of(unit)?;
        ContainerWriter::create(path, self.options, &self.registry)
    }

    /// Open `unit`, or `Ok(None)` if the library has no such unit.
    pub fn open(&self, unit: &str) -> Result<Option<ContainerReader>> {
        let path = self.path_of(unit)?;
        match ContainerReader::open(&path, self.options, &self.registry) {
            Ok(reader) => Ok(Some(reader)),
            Err(ContainerError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns `false` if there was nothing to remove.
    pub fn remove(&self, unit: &str) -> Result<bool> {
        let path = self.path_of(unit)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ContainerError::io(&path.display().to_string(), "remove", e)),
        }
    }

    /// Names of the units currently stored, sorted.
    pub fn units(&self) -> Result<Vec<String>> {
        let name = self.root.display().to_string();
        let mut units = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| ContainerError::io(&name, "read directory", e))? {
            let path = entry.map_err(|e| ContainerError::io(&name, "read directory", e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(UNIT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                units.push(stem.to_owned());
            }
        }
        units.sort();
        Ok(units)
    }
}
