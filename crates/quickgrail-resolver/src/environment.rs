//! Persistent symbol environment
//!
//! One environment per workspace. It keeps an in-memory cache of the
//! store's symbol table, hands out fresh graph/metadata handles from a
//! durable counter, and garbage-collects backing tables no bound symbol can
//! reach.
//!
//! Durability notes:
//! - the counter is persisted under the reserved store key `id_counter`
//!   **before** a new handle is returned, so handle names never repeat
//!   across restarts even if the process dies right after allocation
//! - symbol mutations write the store first and the cache second, so a
//!   failed write surfaces as an error and leaves the cache untouched

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Context, Result};
use quickgrail_storage::SymbolStore;
use tracing::debug;

use crate::entity::{Graph, GraphMetadata, BASE_GRAPH_NAME, BASE_GRAPH_SYMBOL};
use crate::predicate::PredicateNode;

/// Reserved store key for the handle allocator. Never enters the cache.
const ID_COUNTER_KEY: &str = "id_counter";

const GRAPH_HANDLE_PREFIX: &str = "trace_";
const METADATA_HANDLE_PREFIX: &str = "meta_";

/// Tables with this prefix are always transient scratch space.
const TRANSIENT_TABLE_PREFIX: &str = "m_";

pub struct Environment<S: SymbolStore> {
    store: S,
    symbols: BTreeMap<String, String>,
    id_counter: u64,
}

impl<S: SymbolStore> Environment<S> {
    /// Load the symbol table and allocator state from `store`.
    pub fn open(mut store: S) -> Result<Self> {
        let mut symbols = store
            .load_symbols()
            .context("failed to load workspace symbols")?;
        let id_counter = match symbols.remove(ID_COUNTER_KEY) {
            Some(text) => text
                .parse::<u64>()
                .with_context(|| format!("corrupt {ID_COUNTER_KEY} value \"{text}\""))?,
            None => 0,
        };
        debug!(symbols = symbols.len(), id_counter, "opened environment");
        Ok(Self {
            store,
            symbols,
            id_counter,
        })
    }

    /// Tear down the environment and recover the store.
    pub fn into_store(self) -> S {
        self.store
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// Raw symbol lookup. `$base` always resolves to the base graph handle.
    pub fn lookup(&self, symbol: &str) -> Option<String> {
        if symbol == BASE_GRAPH_SYMBOL {
            return Some(BASE_GRAPH_NAME.to_string());
        }
        self.symbols.get(symbol).cloned()
    }

    pub fn graph_symbol(&self, symbol: &str) -> Option<Graph> {
        self.lookup(symbol).map(Graph::new)
    }

    pub fn metadata_symbol(&self, symbol: &str) -> Option<GraphMetadata> {
        self.lookup(symbol).map(GraphMetadata::new)
    }

    /// Look up and decode a stored predicate. Decoding failure is an error,
    /// not an absent binding.
    pub fn predicate_symbol(&self, symbol: &str) -> Result<Option<PredicateNode>> {
        match self.symbols.get(symbol) {
            Some(encoded) => {
                let node = PredicateNode::decode(encoded)
                    .with_context(|| format!("stored predicate {symbol} is corrupt"))?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    /// Snapshot of the symbol table, for embedding into a resolved program.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.symbols.clone()
    }

    #[cfg(test)]
    pub(crate) fn id_counter(&self) -> u64 {
        self.id_counter
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Bind `symbol` to `value`, durably. Rebinding `$base` is refused.
    pub fn set_value(&mut self, symbol: &str, value: &str) -> Result<()> {
        if symbol == BASE_GRAPH_SYMBOL {
            bail!("Cannot reassign reserved variable {BASE_GRAPH_SYMBOL}");
        }
        self.store
            .put_symbol(symbol, value)
            .with_context(|| format!("failed to persist symbol {symbol}"))?;
        self.symbols.insert(symbol.to_string(), value.to_string());
        debug!(symbol, value, "bound symbol");
        Ok(())
    }

    /// Bind a predicate symbol through the persistence codec.
    pub fn set_predicate_symbol(&mut self, symbol: &str, node: &PredicateNode) -> Result<()> {
        self.set_value(symbol, &node.encode())
    }

    /// Remove a binding. Erasing `$base` is refused; erasing an unbound
    /// symbol is a no-op.
    pub fn erase_symbol(&mut self, symbol: &str) -> Result<()> {
        if symbol == BASE_GRAPH_SYMBOL {
            bail!("Cannot erase reserved variable {BASE_GRAPH_SYMBOL}");
        }
        if !self.symbols.contains_key(symbol) {
            return Ok(());
        }
        self.store
            .delete_symbol(symbol)
            .with_context(|| format!("failed to erase symbol {symbol}"))?;
        self.symbols.remove(symbol);
        debug!(symbol, "erased symbol");
        Ok(())
    }

    /// Drop every binding, zero the allocator, and collect garbage.
    pub fn clear(&mut self) -> Result<()> {
        self.store
            .reset_symbols()
            .context("failed to reset workspace symbols")?;
        self.symbols.clear();
        self.id_counter = 0;
        self.gc()
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Mint a fresh graph handle. The incremented counter is persisted
    /// before the handle is returned.
    pub fn allocate_graph(&mut self) -> Result<Graph> {
        let id = self.next_id()?;
        Ok(Graph::new(format!("{GRAPH_HANDLE_PREFIX}{id}")))
    }

    /// Mint a fresh metadata handle.
    pub fn allocate_graph_metadata(&mut self) -> Result<GraphMetadata> {
        let id = self.next_id()?;
        Ok(GraphMetadata::new(format!("{METADATA_HANDLE_PREFIX}{id}")))
    }

    fn next_id(&mut self) -> Result<u64> {
        let next = self.id_counter + 1;
        self.store
            .put_symbol(ID_COUNTER_KEY, &next.to_string())
            .context("failed to persist handle counter")?;
        self.id_counter = next;
        Ok(next)
    }

    // ------------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------------

    /// Drop backing tables no bound symbol can reach. The base graph's
    /// tables are always reachable; `m_`-prefixed tables are always
    /// garbage.
    pub fn gc(&mut self) -> Result<()> {
        let mut referenced: BTreeSet<String> = BTreeSet::new();
        let base = Graph::base();
        referenced.insert(base.vertex_table());
        referenced.insert(base.edge_table());
        for (symbol, value) in &self.symbols {
            if symbol.starts_with('$') {
                let graph = Graph::new(value.clone());
                referenced.insert(graph.vertex_table());
                referenced.insert(graph.edge_table());
            } else if symbol.starts_with('@') {
                referenced.insert(GraphMetadata::new(value.clone()).table());
            }
        }

        let garbage: Vec<String> = self
            .store
            .list_tables()
            .context("failed to enumerate workspace tables")?
            .into_iter()
            .filter(|table| is_garbage_table(table, &referenced))
            .collect();
        if garbage.is_empty() {
            return Ok(());
        }
        debug!(count = garbage.len(), "dropping unreachable tables");
        self.store
            .drop_tables(&garbage)
            .context("failed to drop unreachable tables")?;
        Ok(())
    }
}

fn is_garbage_table(table: &str, referenced: &BTreeSet<String>) -> bool {
    if table.starts_with(TRANSIENT_TABLE_PREFIX) {
        return true;
    }
    let collectable =
        table.starts_with(GRAPH_HANDLE_PREFIX) || table.starts_with(METADATA_HANDLE_PREFIX);
    collectable && !referenced.contains(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Comparator;
    use quickgrail_storage::{JsonFileStore, MemoryStore};

    fn env() -> Environment<MemoryStore> {
        Environment::open(MemoryStore::new()).unwrap()
    }

    #[test]
    fn base_symbol_is_reserved() {
        let mut env = env();
        assert_eq!(env.lookup("$base"), Some("trace_base".to_string()));
        assert!(env.graph_symbol("$base").unwrap().is_base());

        let err = env.set_value("$base", "trace_9").unwrap_err();
        assert!(err.to_string().contains("reserved"));
        let err = env.erase_symbol("$base").unwrap_err();
        assert!(err.to_string().contains("reserved"));
        // still resolvable after the refused mutations
        assert_eq!(env.lookup("$base"), Some("trace_base".to_string()));
    }

    #[test]
    fn erase_unbound_symbol_is_noop() {
        let mut env = env();
        env.erase_symbol("$nope").unwrap();
        env.set_value("$a", "trace_1").unwrap();
        env.erase_symbol("$a").unwrap();
        assert_eq!(env.lookup("$a"), None);
        env.erase_symbol("$a").unwrap();
    }

    #[test]
    fn allocator_is_monotonic_and_durable() {
        let mut env = env();
        let g1 = env.allocate_graph().unwrap();
        let m2 = env.allocate_graph_metadata().unwrap();
        assert_eq!(g1.name(), "trace_1");
        assert_eq!(m2.name(), "meta_2");

        // simulated restart: reopen from the same store
        let store = env.into_store();
        let mut env = Environment::open(store).unwrap();
        assert_eq!(env.id_counter(), 2);
        assert_eq!(env.allocate_graph().unwrap().name(), "trace_3");
        // the counter key never leaks into the symbol snapshot
        assert!(!env.snapshot().contains_key("id_counter"));
    }

    #[test]
    fn allocator_survives_restart_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            let mut env = Environment::open(store).unwrap();
            env.allocate_graph().unwrap();
            env.set_value("$a", "trace_1").unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        let mut env = Environment::open(store).unwrap();
        assert_eq!(env.graph_symbol("$a").unwrap().name(), "trace_1");
        assert_eq!(env.allocate_graph().unwrap().name(), "trace_2");
    }

    #[test]
    fn predicate_symbols_round_trip_through_store() {
        let mut env = env();
        let node = PredicateNode::and(
            PredicateNode::compare("type", Comparator::Equal, "Process"),
            PredicateNode::compare("*", Comparator::Like, "%x%"),
        );
        env.set_predicate_symbol("%p", &node).unwrap();

        let store = env.into_store();
        let env = Environment::open(store).unwrap();
        assert_eq!(env.predicate_symbol("%p").unwrap(), Some(node));
        assert_eq!(env.predicate_symbol("%missing").unwrap(), None);
    }

    #[test]
    fn corrupt_stored_predicate_is_an_error() {
        let mut env = env();
        env.set_value("%p", "not a predicate").unwrap();
        assert!(env.predicate_symbol("%p").is_err());
    }

    #[test]
    fn gc_keeps_reachable_tables_only() {
        let mut env = env();
        env.set_value("$a", "trace_5").unwrap();
        env.set_value("@m", "meta_6").unwrap();
        for table in [
            "trace_base_vertex",
            "trace_base_edge",
            "trace_5_vertex",
            "trace_5_edge",
            "trace_9_vertex",
            "trace_9_edge",
            "meta_6",
            "meta_7",
            "m_scratch",
            "audit_log",
        ] {
            env.store_mut().register_table(table);
        }

        env.gc().unwrap();
        assert_eq!(
            env.store().list_tables().unwrap(),
            vec![
                "audit_log".to_string(),
                "meta_6".to_string(),
                "trace_5_edge".to_string(),
                "trace_5_vertex".to_string(),
                "trace_base_edge".to_string(),
                "trace_base_vertex".to_string(),
            ]
        );
    }

    #[test]
    fn clear_resets_bindings_counter_and_tables() {
        let mut env = env();
        env.allocate_graph().unwrap();
        env.set_value("$a", "trace_1").unwrap();
        env.store_mut().register_table("trace_1_vertex");
        env.store_mut().register_table("trace_base_vertex");

        env.clear().unwrap();
        assert_eq!(env.lookup("$a"), None);
        assert_eq!(env.id_counter(), 0);
        assert_eq!(env.allocate_graph().unwrap().name(), "trace_1");
        assert_eq!(
            env.store().list_tables().unwrap(),
            vec!["trace_base_vertex".to_string()]
        );
    }
}
