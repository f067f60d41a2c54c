//! Durable symbol storage for QuickGrail workspaces
//!
//! The resolver's environment persists two things between sessions: a
//! `(name, value)` symbol table and the set of backing tables the executor
//! has materialized for graph handles. `SymbolStore` is the repository
//! interface over both; callers never hand the store raw query strings.
//!
//! Two implementations:
//! - `MemoryStore` for tests and fully in-process embedding
//! - `JsonFileStore`, a single JSON document rewritten atomically on every
//!   mutation (write to a temp file, then rename over the target), so a
//!   mutation that returned `Ok` is visible after re-open
//!
//! Table registration is an executor-side hook, so it lives on the concrete
//! stores rather than on the trait.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("symbol store I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("symbol store file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize symbol store state: {0}")]
    Serialize(#[source] serde_json::Error),
}

// ============================================================================
// Repository interface
// ============================================================================

/// Durable `(name, value)` symbol table plus raw table bookkeeping for
/// garbage collection. Every mutation is synchronous: when a method returns
/// `Ok`, the change is durable for this store's durability class.
pub trait SymbolStore {
    /// Load the complete symbol table.
    fn load_symbols(&mut self) -> Result<BTreeMap<String, String>, StoreError>;

    /// Insert or update one symbol.
    fn put_symbol(&mut self, name: &str, value: &str) -> Result<(), StoreError>;

    /// Delete one symbol. Deleting an absent symbol is a no-op.
    fn delete_symbol(&mut self, name: &str) -> Result<(), StoreError>;

    /// Drop the whole symbol table and recreate it empty.
    fn reset_symbols(&mut self) -> Result<(), StoreError>;

    /// Enumerate every materialized backing table.
    fn list_tables(&self) -> Result<Vec<String>, StoreError>;

    /// Drop the named tables in one batch. Unknown names are ignored.
    fn drop_tables(&mut self, tables: &[String]) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    symbols: BTreeMap<String, String>,
    tables: BTreeSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a table the executor has materialized.
    pub fn register_table(&mut self, name: impl Into<String>) {
        self.tables.insert(name.into());
    }
}

impl SymbolStore for MemoryStore {
    fn load_symbols(&mut self) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.symbols.clone())
    }

    fn put_symbol(&mut self, name: &str, value: &str) -> Result<(), StoreError> {
        self.symbols.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete_symbol(&mut self, name: &str) -> Result<(), StoreError> {
        self.symbols.remove(name);
        Ok(())
    }

    fn reset_symbols(&mut self) -> Result<(), StoreError> {
        self.symbols.clear();
        Ok(())
    }

    fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.tables.iter().cloned().collect())
    }

    fn drop_tables(&mut self, tables: &[String]) -> Result<(), StoreError> {
        for table in tables {
            self.tables.remove(table);
        }
        Ok(())
    }
}

// ============================================================================
// JSON-file store
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkspaceState {
    symbols: BTreeMap<String, String>,
    tables: BTreeSet<String>,
}

/// File-backed store. The whole workspace state lives in one JSON document;
/// each mutation rewrites it through a temp file and an atomic rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: WorkspaceState,
}

impl JsonFileStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let text = fs::read_to_string(&path)?;
            serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                path: path.display().to_string(),
                source,
            })?
        } else {
            WorkspaceState::default()
        };
        debug!(path = %path.display(), symbols = state.symbols.len(), "opened symbol store");
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a table the executor has materialized.
    pub fn register_table(&mut self, name: impl Into<String>) -> Result<(), StoreError> {
        self.state.tables.insert(name.into());
        self.persist()
    }

    fn persist(&self) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(&self.state).map_err(StoreError::Serialize)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SymbolStore for JsonFileStore {
    fn load_symbols(&mut self) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.state.symbols.clone())
    }

    fn put_symbol(&mut self, name: &str, value: &str) -> Result<(), StoreError> {
        self.state.symbols.insert(name.to_string(), value.to_string());
        self.persist()
    }

    fn delete_symbol(&mut self, name: &str) -> Result<(), StoreError> {
        if self.state.symbols.remove(name).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    fn reset_symbols(&mut self) -> Result<(), StoreError> {
        self.state.symbols.clear();
        self.persist()
    }

    fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state.tables.iter().cloned().collect())
    }

    fn drop_tables(&mut self, tables: &[String]) -> Result<(), StoreError> {
        let mut changed = false;
        for table in tables {
            changed |= self.state.tables.remove(table);
        }
        if changed {
            self.persist()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_basic_lifecycle() {
        let mut store = MemoryStore::new();
        store.put_symbol("$a", "trace_1").unwrap();
        store.put_symbol("$a", "trace_2").unwrap();
        store.put_symbol("%p", "encoded").unwrap();
        assert_eq!(store.load_symbols().unwrap().len(), 2);
        assert_eq!(
            store.load_symbols().unwrap().get("$a"),
            Some(&"trace_2".to_string())
        );

        store.delete_symbol("$a").unwrap();
        store.delete_symbol("$missing").unwrap();
        assert_eq!(store.load_symbols().unwrap().len(), 1);

        store.reset_symbols().unwrap();
        assert!(store.load_symbols().unwrap().is_empty());
    }

    #[test]
    fn memory_store_tracks_tables() {
        let mut store = MemoryStore::new();
        store.register_table("trace_1_vertex");
        store.register_table("trace_1_edge");
        store.register_table("m_scratch");
        assert_eq!(store.list_tables().unwrap().len(), 3);

        store
            .drop_tables(&["m_scratch".to_string(), "no_such_table".to_string()])
            .unwrap();
        assert_eq!(
            store.list_tables().unwrap(),
            vec!["trace_1_edge".to_string(), "trace_1_vertex".to_string()]
        );
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");

        {
            let mut store = JsonFileStore::open(&path).unwrap();
            store.put_symbol("$a", "trace_7").unwrap();
            store.put_symbol("id_counter", "7").unwrap();
            store.register_table("trace_7_vertex").unwrap();
        }

        let mut store = JsonFileStore::open(&path).unwrap();
        let symbols = store.load_symbols().unwrap();
        assert_eq!(symbols.get("$a"), Some(&"trace_7".to_string()));
        assert_eq!(symbols.get("id_counter"), Some(&"7".to_string()));
        assert_eq!(store.list_tables().unwrap(), vec!["trace_7_vertex".to_string()]);
    }

    #[test]
    fn json_store_reset_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");

        {
            let mut store = JsonFileStore::open(&path).unwrap();
            store.put_symbol("$a", "trace_1").unwrap();
            store.reset_symbols().unwrap();
        }

        let mut store = JsonFileStore::open(&path).unwrap();
        assert!(store.load_symbols().unwrap().is_empty());
    }

    #[test]
    fn json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        fs::write(&path, "not json at all").unwrap();

        match JsonFileStore::open(&path) {
            Err(StoreError::Corrupt { .. }) => {}
            other => panic!("expected corrupt-store error, got {other:?}"),
        }
    }
}
