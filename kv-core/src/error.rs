//! Error taxonomy for the object store and query layers, and the NVMe-visible
//! status codes the dispatcher/controller boundary translates them into.
//!
//! The two types are kept separate on purpose: `KvError` is what the
//! blocking worker phase produces (store, query, select-cache failures);
//! `NvmeStatus` is what the command thread is allowed to hand back to the
//! surrounding controller. Decoder-local validation never goes through
//! `KvError` — it fails synchronously and returns a `NvmeStatus` directly.

use std::path::PathBuf;

/// Internal error taxonomy surfaced by [`crate::store::ObjectStore`] and
/// [`crate::query::QueryEngine`].
#[derive(thiserror::Error, Debug)]
pub enum KvError {
    #[error("invalid parameter")]
    InvalidParameter,

    #[error("invalid path for {bus}/{ns}: {source}")]
    FilePath {
        bus: u32,
        ns: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("object already exists")]
    FileExists,

    #[error("object not found")]
    FileNotFound,

    #[error("cannot open object: {0}")]
    CannotOpen(#[source] std::io::Error),

    #[error("short write: wrote {written} of {requested} bytes")]
    FileWrite { written: usize, requested: usize },

    #[error("seek offset {offset} past end of object ({size} bytes)")]
    FileOffset { offset: u64, size: u64 },

    #[error("SQL query failed: {0}")]
    Query(String),

    #[error("failed to read query result file {path:?}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("memory allocation failed")]
    MemoryAllocation,

    #[error("failed to remove object: {0}")]
    Remove(#[source] std::io::Error),

    #[error("key too long: {0} bytes (max 16)")]
    KeyTooLong(usize),
}

impl KvError {
    /// Negative status code matching the original `KV_ERROR_*` defines, kept
    /// around for parity with the source's `ssize_t status < 0` convention
    /// and for log messages that want a compact code rather than a string.
    pub fn code(&self) -> i64 {
        match self {
            KvError::InvalidParameter => -1,
            KvError::FilePath { .. } => -2,
            KvError::FileExists => -3,
            KvError::FileNotFound => -4,
            KvError::CannotOpen(_) => -5,
            KvError::FileWrite { .. } => -6,
            KvError::FileOffset { .. } => -7,
            KvError::Query(_) => -8,
            KvError::FileRead { .. } => -9,
            KvError::MemoryAllocation => -10,
            KvError::Remove(_) => -14,
            KvError::KeyTooLong(_) => -15,
        }
    }
}

/// NVMe-visible completion status. Each non-success value is
/// OR-ed with [`NvmeStatus::DNR`] (do not retry) by
/// [`NvmeStatus::with_dnr`] before being handed to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NvmeStatus {
    Success = 0x0000,
    KvNotFound = 0x0100,
    KvExists = 0x0101,
    KvError = 0x0102,
    InvalidKvSize = 0x0103,
    KvInvalidParameter = 0x0104,
    CmdSizeLimit = 0x0105,
}

impl NvmeStatus {
    /// The "do not retry" marker OR-ed into non-success completions.
    pub const DNR: u16 = 1 << 15;

    /// Raw 16-bit completion status word, with `DNR` set on every
    /// non-success variant.
    pub fn raw(self) -> u16 {
        if self == NvmeStatus::Success {
            self as u16
        } else {
            self as u16 | Self::DNR
        }
    }
}
