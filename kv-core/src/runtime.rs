//! Runtime singletons: the object store, Select query engine, result cache,
//! and task dispatcher, bundled behind one handle.
//!
//! A process embedding this crate constructs exactly one [`KvRuntime`] and
//! shares it between every bus/namespace it emulates — the store, cache, and
//! dispatcher are already internally sharded/synchronized by bus/namespace,
//! so there is nothing namespace-specific to instantiate per bus.

use std::sync::Arc;

use crate::cache::SelectCache;
use crate::config::Config;
use crate::dispatcher::{TaskDispatcher, TaskRequest, TaskResult};
use crate::path::PathMapper;
use crate::query::QueryEngine;
use crate::store::ObjectStore;

/// Owns the object store, query engine, select cache, and worker pool for
/// one emulated controller instance.
pub struct KvRuntime {
    store: Arc<ObjectStore>,
    query: Arc<QueryEngine>,
    select_cache: Arc<SelectCache>,
    dispatcher: TaskDispatcher,
}

impl KvRuntime {
    /// Build a runtime from resolved [`Config`]. Spawns the worker pool
    /// immediately; there is no deferred-start mode.
    pub fn new(config: &Config) -> Self {
        let paths = PathMapper::new(config.base_dir.clone());
        let store = Arc::new(ObjectStore::new(paths.clone()));
        let query = Arc::new(QueryEngine::new(paths, config.num_db_conns));
        let select_cache = Arc::new(SelectCache::new());
        let dispatcher = TaskDispatcher::new(
            config.num_threads,
            Arc::clone(&store),
            Arc::clone(&query),
            Arc::clone(&select_cache),
        );

        KvRuntime {
            store,
            query,
            select_cache,
            dispatcher,
        }
    }

    /// Convenience constructor reading `KV_BASE_DIR`/`KV_NUM_THREADS`/
    /// `KV_NUM_DB_CONNS` from the process environment.
    pub fn from_env() -> Self {
        Self::new(&Config::from_env())
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    pub fn query(&self) -> &Arc<QueryEngine> {
        &self.query
    }

    pub fn select_cache(&self) -> &Arc<SelectCache> {
        &self.select_cache
    }

    /// Enqueue a task for asynchronous worker execution.
    pub fn submit(&self, request: TaskRequest) {
        self.dispatcher.submit(request);
    }

    /// Non-blocking poll of completed tasks.
    pub fn drain_results(&self) -> Vec<TaskResult> {
        self.dispatcher.drain_results()
    }

    /// Block until at least one task has completed, then drain all that
    /// have.
    pub fn drain_results_blocking(&self) -> Vec<TaskResult> {
        self.dispatcher.drain_results_blocking()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{StoreFlags, TaskKind};
    use crate::key::Key;
    use crate::query::SelectFormat;
    use tempfile::tempdir;

    #[test]
    fn runtime_round_trips_a_store_task() {
        let dir = tempdir().unwrap();
        let runtime = KvRuntime::new(&Config::for_base_dir(dir.path()));

        runtime.submit(TaskRequest {
            kind: TaskKind::Store,
            bus: 0,
            ns: 0,
            key: Key::new(b"k").unwrap(),
            data: Some(b"v".to_vec()),
            max_len: 0,
            flags: StoreFlags::default(),
            offset: 0,
            select_in_fmt: SelectFormat::Csv,
            select_out_fmt: SelectFormat::Csv,
            in_header: false,
            out_header: false,
            cmd_handle: 42,
        });

        let results = runtime.drain_results_blocking();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].cmd_handle, 42);
        assert_eq!(results[0].status, 1);
        assert!(runtime.store().exists(0, 0, &Key::new(b"k").unwrap()));
    }
}
