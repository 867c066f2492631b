//! Device-side backend for an emulated NVMe Key-Value command set: a
//! content-addressed object store, a DuckDB-backed Select/SQL adapter, a
//! fixed-size result cache for paginated Select retrieval, and a bounded
//! worker pool that executes KV tasks off the command-submission path.
//!
//! [`runtime::KvRuntime`] is the crate's single entry point for an embedder:
//! it owns the store, query engine, cache, and dispatcher, and
//! [`controller::Controller`] sits in front of it translating decoded wire
//! submissions into task requests and worker completions into NVMe
//! completion statuses.

pub mod cache;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod key;
pub mod list;
pub mod path;
pub mod query;
pub mod runtime;
pub mod store;

pub use cache::SelectCache;
pub use config::Config;
pub use controller::{Controller, CompletionSink, DispatchOutcome, KvOpcode, Submission};
pub use error::{KvError, NvmeStatus};
pub use key::Key;
pub use runtime::KvRuntime;
pub use store::ObjectStore;
