use clap::{Parser, Subcommand, ValueEnum};

/// CLI harness exercising the kv-core NVMe KV controller end to end.
#[derive(Parser, Debug)]
#[command(name = "kv-sim", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Base directory backing the emulated object store.
    #[arg(long, global = true, default_value = ".")]
    pub base_dir: std::path::PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub output: OutputFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    #[default]
    Human,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store a value under a key (STORE).
    Store(StoreArgs),

    /// Read a value back (RETRIEVE).
    Retrieve(RetrieveArgs),

    /// Remove a key (DELETE).
    Delete(KeyArgs),

    /// Check whether a key exists (EXISTS).
    Exists(KeyArgs),

    /// Enumerate keys with an optional hex prefix (LIST).
    List(ListArgs),

    /// Run a Select query against a stored object (SELECT SEND).
    SelectSend(SelectSendArgs),

    /// Fetch a previously queried Select result (SELECT RETRIEVE).
    SelectRetrieve(SelectRetrieveArgs),
}

#[derive(clap::Args, Debug)]
pub struct BusNs {
    #[arg(long, default_value_t = 0)]
    pub bus: u32,
    #[arg(long, default_value_t = 0)]
    pub ns: u32,
}

#[derive(clap::Args, Debug)]
pub struct KeyArgs {
    #[command(flatten)]
    pub bus_ns: BusNs,

    /// Key, as a UTF-8 string (use --key-hex for raw bytes).
    #[arg(long, conflicts_with = "key_hex")]
    pub key: Option<String>,

    /// Key, as hex (e.g. `E1E2E3`).
    #[arg(long)]
    pub key_hex: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct StoreArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    /// Value to store, as a UTF-8 string (use --value-file for binary data).
    #[arg(long, conflicts_with = "value_file")]
    pub value: Option<String>,

    /// Path to a file whose contents become the stored value.
    #[arg(long)]
    pub value_file: Option<std::path::PathBuf>,

    /// Append to the existing object instead of overwriting it.
    #[arg(long)]
    pub append: bool,

    /// Fail unless the key already exists.
    #[arg(long)]
    pub must_exist: bool,

    /// Fail if the key already exists.
    #[arg(long)]
    pub must_not_exist: bool,
}

#[derive(clap::Args, Debug)]
pub struct RetrieveArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Host buffer size in bytes.
    #[arg(long, default_value_t = 65536)]
    pub max_len: usize,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub bus_ns: BusNs,

    /// Hex-encoded key prefix to start from; omit for no prefix.
    #[arg(long)]
    pub prefix_hex: Option<String>,

    /// Host buffer size in bytes.
    #[arg(long, default_value_t = 65536)]
    pub max_len: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SelectFormatArg {
    Csv,
    Json,
    Parquet,
}

#[derive(clap::Args, Debug)]
pub struct SelectSendArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    /// SQL query text (e.g. `select name, age from s3object`).
    #[arg(long)]
    pub sql: String,

    #[arg(long, value_enum, default_value = "csv")]
    pub in_format: SelectFormatArg,

    #[arg(long, value_enum, default_value = "csv")]
    pub out_format: SelectFormatArg,

    #[arg(long)]
    pub in_header: bool,

    #[arg(long)]
    pub out_header: bool,
}

#[derive(clap::Args, Debug)]
pub struct SelectRetrieveArgs {
    /// Handle returned by a prior `select-send`.
    #[arg(long)]
    pub id: u32,

    /// Host buffer size in bytes.
    #[arg(long, default_value_t = 65536)]
    pub max_len: usize,

    /// Keep the cached result instead of evicting it after this read.
    #[arg(long)]
    pub do_not_free: bool,

    /// Keep the cached result if it's larger than the host buffer.
    #[arg(long)]
    pub do_not_free_if_not_all_data_fetched: bool,
}
