//! Bookkeeping of open container handles for emergency cleanup.
//!
//! Every [`ContainerWriter`] and [`ContainerReader`] registers itself with a
//! [`Registry`] on creation and leaves it on close (or drop).  The registry
//! never decides lifetimes; it only matters when the process is going down
//! abnormally, at which point [`Registry::shutdown`]:
//!
//! 1. releases the transport of every handle still registered, closing the
//!    underlying file or stream;
//! 2. removes the target path of every handle still open for writing, since
//!    an unfinalized container is incomplete by construction.
//!
//! [`ContainerWriter`]: crate::io_stream::ContainerWriter
//! [`ContainerReader`]: crate::io_stream::ContainerReader

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::transport::Release;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

struct Entry {
    name:     String,
    mode:     Mode,
    path:     Option<PathBuf>,
    resource: Weak<dyn Release>,
}

#[derive(Default)]
struct Table {
    next_id: u64,
    open:    HashMap<HandleId, Entry>,
}

/// What a [`Registry::shutdown`] call did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Handles whose transport was still live and got released.
    pub released: usize,
    /// Write targets deleted from disk.
    pub removed:  Vec<PathBuf>,
}

#[derive(Default)]
pub struct Registry {
    table: Mutex<Table>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // A panic while the lock was held must not stop cleanup.
    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(
        &self,
        name:     &str,
        mode:     Mode,
        path:     Option<PathBuf>,
        resource: Weak<dyn Release>,
    ) -> HandleId {
        let mut table = self.table();
        let id = HandleId(table.next_id);
        table.next_id += 1;
        table.open.insert(id, Entry { name: name.to_owned(), mode, path, resource });
        tracing::trace!(%id, name, ?mode, "handle registered");
        id
    }

    /// Returns `false` if `id` was not registered (already closed or swept).
    pub(crate) fn deregister(&self, id: HandleId) -> bool {
        self.table().open.remove(&id).is_some()
    }

    pub fn is_registered(&self, id: HandleId) -> bool {
        self.table().open.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.table().open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of every open handle, for diagnostics.
    pub fn open_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table().open.values().map(|e| e.name.clone()).collect();
        names.sort();
        names
    }

    /// Release every registered handle and delete unfinished outputs.
    ///
    /// Idempotent: a second call finds the table empty and does nothing.
    pub fn shutdown(&self) -> ShutdownReport {
        let drained: Vec<Entry> = self.table().open.drain().map(|(_, e)| e).collect();

        let mut report = ShutdownReport::default();
        for entry in drained {
            if entry.resource.upgrade().is_some_and(|r| r.release()) {
                report.released += 1;
            }
            if entry.mode != Mode::Write {
                continue;
            }
            let Some(path) = entry.path else { continue };
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::warn!(name = %entry.name, "removed unfinished output");
                    report.removed.push(path);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(name = %entry.name, error = %e, "could not remove unfinished output"),
            }
        }
        report
    }

    /// Guard that calls [`shutdown`](Registry::shutdown) when dropped.
    pub fn shutdown_guard(self: &Arc<Self>) -> ShutdownGuard {
        ShutdownGuard { registry: Arc::clone(self) }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("open", &self.len()).finish()
    }
}

/// Runs [`Registry::shutdown`] on drop, including during unwinding.
#[must_use = "the registry is swept when the guard is dropped"]
pub struct ShutdownGuard {
    registry: Arc<Registry>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let report = self.registry.shutdown();
        if report.released > 0 {
            tracing::debug!(released = report.released, removed = report.removed.len(), "registry swept");
        }
    }
}
