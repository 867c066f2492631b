//! Command decode, opcode dispatch, and completion shaping, grounded in `nvme_kv_*` command handlers (`ctrl_kv.c`).
//!
//! This is the seam between the wire-level NVMe submission and the
//! dispatcher/runtime: [`Controller::opcode_dispatch`] decodes a submission
//! into a [`TaskRequest`] and hands it to the [`KvRuntime`], except for
//! SELECT RETRIEVE, which never touches a worker thread — it is served
//! synchronously out of the [`crate::cache::SelectCache`] on the calling
//! thread, matching `kv_select_results_retrieve`'s direct-call shape in the
//! source. A background thread pumps worker completions back out through a
//! [`CompletionSink`] the embedder supplies.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::decoder::{self, RetrieveSelectOptions, SendSelectOptions, StoreOptions};
use crate::dispatcher::{StoreFlags, TaskKind, TaskRequest};
use crate::error::NvmeStatus;
use crate::key::Key;
use crate::query::SelectFormat;
use crate::runtime::KvRuntime;

/// KV command-set opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvOpcode {
    Store,
    Retrieve,
    Delete,
    Exists,
    List,
    SendSelect,
    RetrieveSelect,
}

/// A decoded-but-unexecuted submission. Key bytes are passed as the four
/// reverse-order wire words so callers don't need to replicate
/// the byte-extraction logic in [`crate::decoder`].
pub struct Submission {
    pub opcode: KvOpcode,
    pub bus: u32,
    pub ns: u32,
    pub key_words: [u32; 4],
    pub key_length: u8,
    pub options: u32,
    /// `dptr`/host buffer contents for STORE and SELECT SEND; ignored
    /// otherwise.
    pub write_data: Option<Vec<u8>>,
    /// Host buffer capacity: bounds RETRIEVE, LIST, and SELECT RETRIEVE
    /// response sizes.
    pub host_buffer_size: usize,
    /// RETRIEVE byte offset into the stored object.
    pub offset: u64,
    /// SELECT RETRIEVE cache handle.
    pub select_id: u32,
    /// Opaque handle the completion carries back to the caller.
    pub cmd_handle: u64,
}

/// Outcome of dispatching one [`Submission`].
pub enum DispatchOutcome {
    /// Queued for asynchronous execution; completion arrives later via the
    /// [`CompletionSink`] passed to [`Controller::new`].
    Queued,
    /// Resolved synchronously (SELECT RETRIEVE, or a decode-time rejection).
    Completed {
        status: NvmeStatus,
        result_word: u32,
        data: Option<Vec<u8>>,
    },
}

/// Receives completions for queued submissions. The dispatcher-side
/// completion pump calls this off the worker threads that produced the
/// result, never inline with `opcode_dispatch`.
pub trait CompletionSink: Send + Sync {
    fn complete(&self, cmd_handle: u64, status: u16, result_word: u32, data: Option<Vec<u8>>);
}

/// Ties [`KvRuntime`] to a [`CompletionSink`], decoding submissions and
/// shaping completions .
pub struct Controller {
    runtime: Arc<KvRuntime>,
    pump: Option<JoinHandle<()>>,
}

impl Controller {
    /// Spawn the completion pump and return a ready controller. The pump
    /// thread runs until the controller is dropped, at which point (like
    /// the dispatcher's own workers) it is simply abandoned rather than
    /// joined — there is no cancellation contract.
    pub fn new(runtime: Arc<KvRuntime>, sink: Arc<dyn CompletionSink>) -> Self {
        let pump_runtime = Arc::clone(&runtime);
        let pump = std::thread::Builder::new()
            .name("kv-completion-pump".into())
            .spawn(move || loop {
                for result in pump_runtime.drain_results_blocking() {
                    let status = shape_status(&result);
                    sink.complete(result.cmd_handle, status.raw(), result.max_len as u32, result.result);
                }
            })
            .expect("failed to spawn completion pump");

        Controller {
            runtime,
            pump: Some(pump),
        }
    }

    /// Decode and dispatch one submission.
    pub fn opcode_dispatch(&self, submission: Submission) -> DispatchOutcome {
        match submission.opcode {
            KvOpcode::RetrieveSelect => self.retrieve_select(submission),
            _ => self.dispatch_async(submission),
        }
    }

    fn dispatch_async(&self, submission: Submission) -> DispatchOutcome {
        let empty_key_allowed = submission.opcode == KvOpcode::List;
        let key = match decoder::decode_key(submission.key_words, submission.key_length, empty_key_allowed) {
            Ok(key) => key,
            Err(_) => {
                return DispatchOutcome::Completed {
                    status: NvmeStatus::KvInvalidParameter,
                    result_word: 0,
                    data: None,
                }
            }
        };

        let kind = match submission.opcode {
            KvOpcode::Store => TaskKind::Store,
            KvOpcode::Retrieve => TaskKind::Retrieve,
            KvOpcode::Delete => TaskKind::Delete,
            KvOpcode::Exists => TaskKind::Exists,
            KvOpcode::List => TaskKind::List,
            KvOpcode::SendSelect => TaskKind::SendSelect,
            KvOpcode::RetrieveSelect => unreachable!("handled by retrieve_select"),
        };

        let flags = if kind == TaskKind::Store {
            let opts = StoreOptions::decode(submission.options);
            if !opts.is_valid() {
                return DispatchOutcome::Completed {
                    status: NvmeStatus::KvInvalidParameter,
                    result_word: 0,
                    data: None,
                };
            }
            StoreFlags {
                must_exist: opts.must_exist,
                must_not_exist: opts.must_not_exist,
                append: opts.append,
            }
        } else {
            StoreFlags::default()
        };

        if kind == TaskKind::List && submission.host_buffer_size < 4 {
            return DispatchOutcome::Completed {
                status: NvmeStatus::CmdSizeLimit,
                result_word: 0,
                data: None,
            };
        }

        let (select_in_fmt, select_out_fmt, in_header, out_header) = if kind == TaskKind::SendSelect {
            let opts = SendSelectOptions::decode(submission.options);
            let in_fmt = match SelectFormat::from_wire(opts.input_type) {
                Some(f) => f,
                None => {
                    return DispatchOutcome::Completed {
                        status: NvmeStatus::KvInvalidParameter,
                        result_word: 0,
                        data: None,
                    }
                }
            };
            let out_fmt = match SelectFormat::from_wire(opts.output_type) {
                Some(f) => f,
                None => {
                    return DispatchOutcome::Completed {
                        status: NvmeStatus::KvInvalidParameter,
                        result_word: 0,
                        data: None,
                    }
                }
            };
            (
                in_fmt,
                out_fmt,
                opts.use_csv_headers_input,
                opts.use_csv_headers_output,
            )
        } else {
            (SelectFormat::Csv, SelectFormat::Csv, false, false)
        };

        self.runtime.submit(TaskRequest {
            kind,
            bus: submission.bus,
            ns: submission.ns,
            key,
            data: submission.write_data,
            max_len: submission.host_buffer_size,
            flags,
            offset: submission.offset,
            select_in_fmt,
            select_out_fmt,
            in_header,
            out_header,
            cmd_handle: submission.cmd_handle,
        });

        DispatchOutcome::Queued
    }

    /// SELECT RETRIEVE is served directly from the select cache on the
    /// calling thread — there is no store or query work left to do, so
    /// routing it through a worker would only add latency.
    fn retrieve_select(&self, submission: Submission) -> DispatchOutcome {
        let opts = RetrieveSelectOptions::decode(submission.options);
        // The pin/evict size check and the returned slice both account for
        // `read_offset`: a paginated host walks the cached result in
        // `host_buffer_size`-sized windows starting at successive offsets,
        // and the entry must stay pinned until a request's window reaches
        // the end of the data (`size_check = host_buffer_size + offset`).
        let size_check = submission
            .host_buffer_size
            .saturating_add(submission.offset as usize);
        let cached = self.runtime.select_cache().retrieve(
            submission.select_id,
            opts.do_not_free,
            opts.do_not_free_if_not_all_data_fetched,
            size_check,
        );

        match cached {
            None => DispatchOutcome::Completed {
                status: NvmeStatus::KvNotFound,
                result_word: 0,
                data: None,
            },
            Some(data) => {
                let total = data.len();
                let offset = (submission.offset as usize).min(total);
                let available = total - offset;
                let take = available.min(submission.host_buffer_size);
                DispatchOutcome::Completed {
                    status: NvmeStatus::Success,
                    result_word: total as u32,
                    data: Some(data[offset..offset + take].to_vec()),
                }
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            drop(pump);
        }
    }
}

/// Translate a completed [`crate::dispatcher::TaskResult`] into its
/// completion status. STORE and DELETE distinguish not-found/exists from a
/// generic error; EXISTS maps its own `0`/`1` result rather than a sign
/// check (the worker's `status` is never negative for EXISTS); RETRIEVE
/// treats a missing object as not-found; LIST and SELECT SEND only
/// distinguish success from a generic error.
fn shape_status(result: &crate::dispatcher::TaskResult) -> NvmeStatus {
    match result.kind {
        TaskKind::Exists => {
            if result.status == 1 {
                NvmeStatus::Success
            } else {
                NvmeStatus::KvNotFound
            }
        }
        TaskKind::Retrieve if result.status < 0 => retrieve_status_from_code(result.status),
        _ if result.status >= 0 => NvmeStatus::Success,
        TaskKind::Store => status_from_code(result.status),
        TaskKind::Delete => status_from_code(result.status),
        _ => NvmeStatus::KvError,
    }
}

/// `TaskResult` only carries the numeric error code, not the original
/// `KvError`, so the `FileNotFound`/`FileExists` distinction from
/// [`crate::error::KvError::code`] is re-expressed here directly against the
/// codes rather than reconstructing a `KvError` to match against.
fn status_from_code(code: i64) -> NvmeStatus {
    match code {
        -4 => NvmeStatus::KvNotFound,
        -3 => NvmeStatus::KvExists,
        _ => NvmeStatus::KvError,
    }
}

/// RETRIEVE-specific error translation: a missing object surfaces as
/// [`crate::error::KvError::CannotOpen`] (code `-5`) rather than
/// `FileNotFound`, since `ObjectStore::read` only learns the key is absent
/// when it tries to open the file. `nvme_kv_notifier` reports that case as
/// not-found rather than a generic error.
fn retrieve_status_from_code(code: i64) -> NvmeStatus {
    match code {
        -5 => NvmeStatus::KvNotFound,
        _ => NvmeStatus::KvError,
    }
}
