//! Select query engine adapter: builds and runs a CSV/JSON/Parquet ->
//! CSV/JSON/Parquet SQL export through a pooled DuckDB connection, grounded
//! in `query.c`'s `run_query`.
//!
//! The command text this module builds is DuckDB SQL directly —
//! `read_csv_auto`/`read_json_auto`/`read_parquet` and `COPY ... TO ...`
//! are DuckDB builtins, which is what lets the `query(path, sql, ...)`
//! primitive be realized with the `duckdb` crate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::KvError;
use crate::key::Key;
use crate::path::PathMapper;

/// Input/output format for a Select query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectFormat {
    Csv,
    Json,
    Parquet,
}

impl SelectFormat {
    /// Decode the 2-bit wire encoding. `None` on an unknown code,
    /// which the decoder turns into `KV_INVALID_PARAMETER`.
    pub fn from_wire(code: u8) -> Option<Self> {
        match code {
            0 => Some(SelectFormat::Csv),
            1 => Some(SelectFormat::Json),
            2 => Some(SelectFormat::Parquet),
            _ => None,
        }
    }

    fn reader_fn(self) -> &'static str {
        match self {
            SelectFormat::Csv => "read_csv_auto",
            SelectFormat::Json => "read_json_auto",
            SelectFormat::Parquet => "read_parquet",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            SelectFormat::Csv => "csv",
            SelectFormat::Json => "json",
            SelectFormat::Parquet => "parquet",
        }
    }
}

/// A pool of DuckDB connections sharing one in-process database, guarded
/// by a `busy` flag array under one mutex — the acquisition discipline is
/// deliberately lock/scan/release/backoff rather than a semaphore, to keep
/// the documented busy-wait behavior observable.
struct ConnectionPool {
    _db: duckdb::Connection,
    conns: Vec<Mutex<duckdb::Connection>>,
    busy: Mutex<Vec<bool>>,
}

impl ConnectionPool {
    fn new(num_connections: usize) -> Result<Self, KvError> {
        let db = duckdb::Connection::open_in_memory()
            .map_err(|e| KvError::Query(format!("cannot open DuckDB: {e}")))?;
        let mut conns = Vec::with_capacity(num_connections);
        for _ in 0..num_connections {
            let conn = db
                .try_clone()
                .map_err(|e| KvError::Query(format!("cannot open DuckDB connection: {e}")))?;
            conns.push(Mutex::new(conn));
        }
        Ok(ConnectionPool {
            _db: db,
            conns,
            busy: Mutex::new(vec![false; num_connections]),
        })
    }

    /// Acquire an idle connection index, busy-waiting 100ms between scans
    /// when the pool is saturated (matches `query.c`'s `usleep(100000)`
    /// compromise).
    fn acquire(&self) -> usize {
        loop {
            {
                let mut busy = self.busy.lock().expect("connection pool mutex poisoned");
                if let Some(idx) = busy.iter().position(|b| !b) {
                    busy[idx] = true;
                    return idx;
                }
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    fn release(&self, idx: usize) {
        let mut busy = self.busy.lock().expect("connection pool mutex poisoned");
        busy[idx] = false;
    }
}

/// Builds and executes Select queries against stored objects.
pub struct QueryEngine {
    paths: PathMapper,
    pool: ConnectionPool,
    result_counter: AtomicU32,
}

impl QueryEngine {
    pub fn new(paths: PathMapper, num_connections: usize) -> Self {
        let pool = ConnectionPool::new(num_connections)
            .expect("failed to initialize DuckDB connection pool");
        QueryEngine {
            paths,
            pool,
            result_counter: AtomicU32::new(0),
        }
    }

    /// Run `sql` (a `select ... from s3object ...`-shaped query) against
    /// the object at `(bus, ns, key)`, returning the rendered output bytes.
    pub fn run(
        &self,
        bus: u32,
        ns: u32,
        key: &Key,
        sql: &str,
        in_fmt: SelectFormat,
        out_fmt: SelectFormat,
        in_header: bool,
        out_header: bool,
    ) -> Result<Vec<u8>, KvError> {
        let input_path = self.paths.object_path(bus, ns, key);
        let command = build_copy_command(
            &input_path,
            sql,
            in_fmt,
            out_fmt,
            in_header,
            out_header,
            self.result_counter.fetch_add(1, Ordering::Relaxed),
        )?;

        let idx = self.pool.acquire();
        let exec_result = {
            let conn = self.pool.conns[idx]
                .lock()
                .expect("connection mutex poisoned");
            conn.execute_batch(&command.sql)
        };
        self.pool.release(idx);
        exec_result.map_err(|e| KvError::Query(e.to_string()))?;

        let bytes = std::fs::read(&command.result_path).map_err(|source| KvError::FileRead {
            path: command.result_path.clone(),
            source,
        })?;
        let _ = std::fs::remove_file(&command.result_path);
        Ok(bytes)
    }
}

struct CopyCommand {
    sql: String,
    result_path: PathBuf,
}

/// Build the `COPY (...) TO '...'` command text, grounded in
/// `run_query`'s manual string assembly.
fn build_copy_command(
    input_path: &std::path::Path,
    sql: &str,
    in_fmt: SelectFormat,
    out_fmt: SelectFormat,
    in_header: bool,
    out_header: bool,
    counter: u32,
) -> Result<CopyCommand, KvError> {
    let sql = sql.trim_end_matches(';');
    let lower = sql.to_ascii_lowercase();
    let from_pos = lower
        .find("from")
        .ok_or(KvError::InvalidParameter)?;
    // split1 is the offset right after the "FROM" token itself (not
    // including whatever whitespace follows it in the source text); the
    // command below inserts its own single space before the reader call
    // rather than relying on `sql` containing exactly one space there.
    let split1 = from_pos + "from".len();

    // Skip past the whitespace separating "FROM" from the table token,
    // then find the whitespace (or end of string) that ends the table
    // token — that span is what gets replaced by the reader function call.
    let after_from = &sql[split1..];
    let table_start = split1
        + after_from
            .find(|c: char| !c.is_whitespace())
            .unwrap_or(after_from.len());
    let split2 = sql[table_start..]
        .find(char::is_whitespace)
        .map(|i| table_start + i)
        .unwrap_or(sql.len());

    let header_clause = if in_fmt == SelectFormat::Csv {
        if in_header {
            ", HEADER=TRUE"
        } else {
            ", HEADER=FALSE"
        }
    } else {
        ""
    };

    let result_path = input_path
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join(format!("{counter}.{}", out_fmt.extension()));

    let output_opts = match (out_fmt, out_header) {
        (SelectFormat::Csv, true) => " ( header )",
        (SelectFormat::Parquet, _) => " ( format parquet )",
        _ => "",
    };

    let command = format!(
        "COPY ({} {}('{}'{}){}) TO '{}'{}",
        &sql[..split1],
        in_fmt.reader_fn(),
        input_path.display(),
        header_clause,
        &sql[split2..],
        result_path.display(),
        output_opts,
    );

    Ok(CopyCommand {
        sql: command,
        result_path,
    })
}
