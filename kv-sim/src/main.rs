mod cli;
mod error;
mod sink;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;

use kv_core::config::Config;
use kv_core::controller::{CompletionSink, Controller, DispatchOutcome, KvOpcode, Submission};
use kv_core::key::hex_decode;
use kv_core::runtime::KvRuntime;

use cli::{Cli, Command, KeyArgs, OutputFormat, SelectFormatArg};
use error::SimError;
use sink::BlockingSink;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(output) => {
            emit(cli.output, &output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

#[derive(Debug, Serialize)]
struct CommandOutput {
    status: u16,
    result_word: u32,
    data_utf8: Option<String>,
    data_len: usize,
}

fn emit(format: OutputFormat, output: &CommandOutput) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(output).unwrap()),
        OutputFormat::Human => println!("{}", serde_json::to_string_pretty(output).unwrap()),
    }
}

fn run(cli: &Cli) -> Result<CommandOutput, SimError> {
    let config = Config::for_base_dir(&cli.base_dir);
    let runtime = Arc::new(KvRuntime::new(&config));
    let sink = Arc::new(BlockingSink::new());
    let controller = Controller::new(Arc::clone(&runtime), Arc::clone(&sink) as Arc<dyn CompletionSink>);

    let submission = match &cli.command {
        Command::Store(args) => {
            let (words, len) = encode_key(&args.key)?;
            let value = resolve_value(args)?;
            Submission {
                opcode: KvOpcode::Store,
                bus: args.key.bus_ns.bus,
                ns: args.key.bus_ns.ns,
                key_words: words,
                key_length: len,
                options: encode_store_options(args.must_exist, args.must_not_exist, args.append),
                write_data: Some(value),
                host_buffer_size: 0,
                offset: 0,
                select_id: 0,
                cmd_handle: 1,
            }
        }
        Command::Retrieve(args) => {
            let (words, len) = encode_key(&args.key)?;
            Submission {
                opcode: KvOpcode::Retrieve,
                bus: args.key.bus_ns.bus,
                ns: args.key.bus_ns.ns,
                key_words: words,
                key_length: len,
                options: 0,
                write_data: None,
                host_buffer_size: args.max_len,
                offset: args.offset,
                select_id: 0,
                cmd_handle: 1,
            }
        }
        Command::Delete(args) => {
            let (words, len) = encode_key(args)?;
            Submission {
                opcode: KvOpcode::Delete,
                bus: args.bus_ns.bus,
                ns: args.bus_ns.ns,
                key_words: words,
                key_length: len,
                options: 0,
                write_data: None,
                host_buffer_size: 0,
                offset: 0,
                select_id: 0,
                cmd_handle: 1,
            }
        }
        Command::Exists(args) => {
            let (words, len) = encode_key(args)?;
            Submission {
                opcode: KvOpcode::Exists,
                bus: args.bus_ns.bus,
                ns: args.bus_ns.ns,
                key_words: words,
                key_length: len,
                options: 0,
                write_data: None,
                host_buffer_size: 0,
                offset: 0,
                select_id: 0,
                cmd_handle: 1,
            }
        }
        Command::List(args) => {
            let prefix = match &args.prefix_hex {
                Some(hex) => hex_decode(hex).map_err(|_| SimError::BadKeyHex(hex.clone()))?,
                None => Vec::new(),
            };
            let words = encode_key_words(&prefix);
            Submission {
                opcode: KvOpcode::List,
                bus: args.bus_ns.bus,
                ns: args.bus_ns.ns,
                key_words: words,
                key_length: prefix.len() as u8,
                options: 0,
                write_data: None,
                host_buffer_size: args.max_len,
                offset: 0,
                select_id: 0,
                cmd_handle: 1,
            }
        }
        Command::SelectSend(args) => {
            let (words, len) = encode_key(&args.key)?;
            Submission {
                opcode: KvOpcode::SendSelect,
                bus: args.key.bus_ns.bus,
                ns: args.key.bus_ns.ns,
                key_words: words,
                key_length: len,
                options: encode_send_select_options(args),
                write_data: Some(args.sql.clone().into_bytes()),
                host_buffer_size: 0,
                offset: 0,
                select_id: 0,
                cmd_handle: 1,
            }
        }
        Command::SelectRetrieve(args) => Submission {
            opcode: KvOpcode::RetrieveSelect,
            bus: 0,
            ns: 0,
            key_words: [0; 4],
            key_length: 0,
            options: encode_retrieve_select_options(args.do_not_free, args.do_not_free_if_not_all_data_fetched),
            write_data: None,
            host_buffer_size: args.max_len,
            offset: 0,
            select_id: args.id,
            cmd_handle: 1,
        },
    };

    let (status, result_word, data) = match controller.opcode_dispatch(submission) {
        DispatchOutcome::Queued => {
            let completion = sink.wait()?;
            (completion.status, completion.result_word, completion.data)
        }
        DispatchOutcome::Completed {
            status,
            result_word,
            data,
        } => (status.raw(), result_word, data),
    };

    if status & !kv_core::error::NvmeStatus::DNR != 0 {
        return Err(SimError::CommandFailed(status));
    }

    Ok(CommandOutput {
        status,
        result_word,
        data_len: data.as_ref().map(Vec::len).unwrap_or(0),
        data_utf8: data.map(|d| String::from_utf8_lossy(&d).into_owned()),
    })
}

fn resolve_value(args: &cli::StoreArgs) -> Result<Vec<u8>, SimError> {
    if let Some(path) = &args.value_file {
        return Ok(std::fs::read(path)?);
    }
    Ok(args.value.clone().unwrap_or_default().into_bytes())
}

fn encode_key(args: &KeyArgs) -> Result<([u32; 4], u8), SimError> {
    let raw = if let Some(hex) = &args.key_hex {
        hex_decode(hex).map_err(|_| SimError::BadKeyHex(hex.clone()))?
    } else {
        args.key.clone().unwrap_or_default().into_bytes()
    };
    if raw.len() > kv_core::key::MAX_KEY_LEN {
        return Err(SimError::Key(kv_core::key::KeyError::TooLong(raw.len())));
    }
    Ok((encode_key_words(&raw), raw.len() as u8))
}

/// Inverse of `kv_core::decoder::decode_key`: pack raw key bytes into the
/// four reverse-order, big-endian-within-word wire words.
fn encode_key_words(bytes: &[u8]) -> [u32; 4] {
    let mut words = [0u32; 4];
    for (i, &b) in bytes.iter().enumerate() {
        let word_idx = i / 4;
        let shift = 24 - (i % 4) * 8;
        words[word_idx] |= (b as u32) << shift;
    }
    words
}

fn encode_store_options(must_exist: bool, must_not_exist: bool, append: bool) -> u32 {
    (must_exist as u32) | ((must_not_exist as u32) << 1) | ((append as u32) << 2)
}

fn select_format_code(fmt: SelectFormatArg) -> u32 {
    match fmt {
        SelectFormatArg::Csv => 0,
        SelectFormatArg::Json => 1,
        SelectFormatArg::Parquet => 2,
    }
}

fn encode_send_select_options(args: &cli::SelectSendArgs) -> u32 {
    select_format_code(args.in_format)
        | (select_format_code(args.out_format) << 2)
        | ((args.in_header as u32) << 4)
        | ((args.out_header as u32) << 5)
}

fn encode_retrieve_select_options(do_not_free: bool, do_not_free_if_size: bool) -> u32 {
    (do_not_free as u32) | ((do_not_free_if_size as u32) << 1)
}
