//! End-to-end tests driving the full decode -> dispatch -> complete pipeline
//! through `kv_core::controller::Controller`, plus the SQL projection
//! scenario the unit tests in `query.rs` don't cover.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kv_core::config::Config;
use kv_core::controller::{CompletionSink, Controller, DispatchOutcome, KvOpcode, Submission};
use kv_core::error::NvmeStatus;
use kv_core::query::{QueryEngine, SelectFormat};
use kv_core::runtime::KvRuntime;
use kv_core::path::PathMapper;
use tempfile::tempdir;

struct RecordingSink {
    completions: Mutex<Vec<(u64, u16, u32, Option<Vec<u8>>)>>,
}

impl RecordingSink {
    fn new() -> Self {
        RecordingSink {
            completions: Mutex::new(Vec::new()),
        }
    }

    fn wait_for(&self, cmd_handle: u64) -> (u16, u32, Option<Vec<u8>>) {
        for _ in 0..500 {
            if let Some(entry) = self
                .completions
                .lock()
                .unwrap()
                .iter()
                .find(|(h, ..)| *h == cmd_handle)
            {
                return (entry.1, entry.2, entry.3.clone());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("no completion for cmd_handle {cmd_handle} within timeout");
    }
}

impl CompletionSink for RecordingSink {
    fn complete(&self, cmd_handle: u64, status: u16, result_word: u32, data: Option<Vec<u8>>) {
        self.completions
            .lock()
            .unwrap()
            .push((cmd_handle, status, result_word, data));
    }
}

fn key_words(bytes: &[u8]) -> [u32; 4] {
    let mut words = [0u32; 4];
    for (i, &b) in bytes.iter().enumerate() {
        let word_idx = i / 4;
        let shift = 24 - (i % 4) * 8;
        words[word_idx] |= (b as u32) << shift;
    }
    words
}

/// Scenario S1, driven through the controller rather than `ObjectStore`
/// directly: STORE then two RETRIEVEs, one full and one offset.
#[test]
fn store_then_retrieve_round_trip_through_controller() {
    let dir = tempdir().unwrap();
    let runtime = Arc::new(KvRuntime::new(&Config::for_base_dir(dir.path())));
    let sink = Arc::new(RecordingSink::new());
    let controller = Controller::new(Arc::clone(&runtime), Arc::clone(&sink) as Arc<dyn CompletionSink>);

    let key = b"key";
    let value = b"value\nvalue";

    let store_submission = Submission {
        opcode: KvOpcode::Store,
        bus: 0xFFFFFFFF,
        ns: 0xFFFFFFFF,
        key_words: key_words(key),
        key_length: key.len() as u8,
        options: 0b010, // must_not_exist
        write_data: Some(value.to_vec()),
        host_buffer_size: 0,
        offset: 0,
        select_id: 0,
        cmd_handle: 1,
    };
    assert!(matches!(
        controller.opcode_dispatch(store_submission),
        DispatchOutcome::Queued
    ));
    let (status, result_word, _) = sink.wait_for(1);
    assert_eq!(status, NvmeStatus::Success.raw());
    assert_eq!(result_word, 0);

    let retrieve_submission = Submission {
        opcode: KvOpcode::Retrieve,
        bus: 0xFFFFFFFF,
        ns: 0xFFFFFFFF,
        key_words: key_words(key),
        key_length: key.len() as u8,
        options: 0,
        write_data: None,
        host_buffer_size: 12,
        offset: 0,
        select_id: 0,
        cmd_handle: 2,
    };
    controller.opcode_dispatch(retrieve_submission);
    let (status, total, data) = sink.wait_for(2);
    assert_eq!(status, NvmeStatus::Success.raw());
    assert_eq!(total, value.len() as u32);
    assert_eq!(data.unwrap(), value.to_vec());

    let offset_retrieve = Submission {
        opcode: KvOpcode::Retrieve,
        bus: 0xFFFFFFFF,
        ns: 0xFFFFFFFF,
        key_words: key_words(key),
        key_length: key.len() as u8,
        options: 0,
        write_data: None,
        host_buffer_size: 12,
        offset: 6,
        select_id: 0,
        cmd_handle: 3,
    };
    controller.opcode_dispatch(offset_retrieve);
    let (_, _, data) = sink.wait_for(3);
    assert_eq!(data.unwrap(), b"value".to_vec());
}

/// SELECT SEND through the controller, then SELECT RETRIEVE served
/// synchronously from the cache (scenario S4's transport, not just the
/// DuckDB command text).
#[test]
fn select_send_then_retrieve_through_controller() {
    let dir = tempdir().unwrap();
    let runtime = Arc::new(KvRuntime::new(&Config::for_base_dir(dir.path())));
    let sink = Arc::new(RecordingSink::new());
    let controller = Controller::new(Arc::clone(&runtime), Arc::clone(&sink) as Arc<dyn CompletionSink>);

    let csv_key = b"test_with_header.csv";
    std::fs::create_dir_all(dir.path().join("0").join("0")).unwrap();
    let object_path = PathMapper::new(dir.path()).object_path(0, 0, &kv_core::key::Key::new(csv_key).unwrap());
    std::fs::write(&object_path, "name,age,hobby,status\nBob,18,hiking,active\n").unwrap();

    let send = Submission {
        opcode: KvOpcode::SendSelect,
        bus: 0,
        ns: 0,
        key_words: key_words(csv_key),
        key_length: csv_key.len() as u8,
        options: 0b11_0000, // csv/csv + both headers
        write_data: Some(b"select name,age from s3object".to_vec()),
        host_buffer_size: 0,
        offset: 0,
        select_id: 0,
        cmd_handle: 1,
    };
    controller.opcode_dispatch(send);
    let (status, _, data) = sink.wait_for(1);
    assert_eq!(status, NvmeStatus::Success.raw());
    let id = u32::from_le_bytes(data.unwrap().try_into().unwrap());

    let retrieve = Submission {
        opcode: KvOpcode::RetrieveSelect,
        bus: 0,
        ns: 0,
        key_words: [0; 4],
        key_length: 0,
        options: 0,
        write_data: None,
        host_buffer_size: 4096,
        offset: 0,
        select_id: id,
        cmd_handle: 2,
    };
    match controller.opcode_dispatch(retrieve) {
        DispatchOutcome::Completed { status, data, .. } => {
            assert_eq!(status, NvmeStatus::Success);
            assert_eq!(String::from_utf8(data.unwrap()).unwrap(), "name,age\nBob,18\n");
        }
        DispatchOutcome::Queued => panic!("SELECT RETRIEVE must complete synchronously"),
    }

    // A second retrieve without do_not_remove finds nothing: the first
    // retrieve above freed the slot.
    let retrieve_again = Submission {
        opcode: KvOpcode::RetrieveSelect,
        bus: 0,
        ns: 0,
        key_words: [0; 4],
        key_length: 0,
        options: 0,
        write_data: None,
        host_buffer_size: 4096,
        offset: 0,
        select_id: id,
        cmd_handle: 3,
    };
    match controller.opcode_dispatch(retrieve_again) {
        DispatchOutcome::Completed { status, .. } => assert_eq!(status, NvmeStatus::KvNotFound),
        DispatchOutcome::Queued => panic!("SELECT RETRIEVE must complete synchronously"),
    }
}

/// Scenario S5: JSON -> JSON Select with a field projection, including a
/// nested-path projection (`status.city`).
#[test]
fn json_projection_roundtrip() {
    let dir = tempdir().unwrap();
    let engine = QueryEngine::new(PathMapper::new(dir.path()), 2);
    let key = kv_core::key::Key::new(b"test.json").unwrap();

    std::fs::create_dir_all(dir.path().join("0").join("0")).unwrap();
    let object_path = PathMapper::new(dir.path()).object_path(0, 0, &key);
    std::fs::write(
        &object_path,
        concat!(
            r#"{"hobby":"hiking","status":{"city":"Seattle"}}"#,
            "\n",
            r#"{"hobby":"skiing","status":{"city":"Seattle"}}"#,
            "\n",
        ),
    )
    .unwrap();

    let out = engine
        .run(
            0,
            0,
            &key,
            "select hobby, status.city from s3object",
            SelectFormat::Json,
            SelectFormat::Json,
            false,
            false,
        )
        .unwrap();

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("hiking"));
    assert!(text.contains("skiing"));
    assert!(text.contains("Seattle"));
}

/// LIST served through the controller: the response is a wire-encoded
/// record list, not the raw `ObjectStore::list` vector.
#[test]
fn list_through_controller_yields_wire_encoded_response() {
    let dir = tempdir().unwrap();
    let runtime = Arc::new(KvRuntime::new(&Config::for_base_dir(dir.path())));
    let sink = Arc::new(RecordingSink::new());
    let controller = Controller::new(Arc::clone(&runtime), Arc::clone(&sink) as Arc<dyn CompletionSink>);

    for name in ["Alice", "Bob", "Connor"] {
        let store = Submission {
            opcode: KvOpcode::Store,
            bus: 0,
            ns: 0,
            key_words: key_words(name.as_bytes()),
            key_length: name.len() as u8,
            options: 0,
            write_data: Some(b"x".to_vec()),
            host_buffer_size: 0,
            offset: 0,
            select_id: 0,
            cmd_handle: 100,
        };
        controller.opcode_dispatch(store);
        sink.wait_for(100);
        sink.completions.lock().unwrap().clear();
    }

    let list = Submission {
        opcode: KvOpcode::List,
        bus: 0,
        ns: 0,
        key_words: [0; 4],
        key_length: 0,
        options: 0,
        write_data: None,
        host_buffer_size: 4096,
        offset: 0,
        select_id: 0,
        cmd_handle: 200,
    };
    controller.opcode_dispatch(list);
    let (status, count, data) = sink.wait_for(200);
    assert_eq!(status, NvmeStatus::Success.raw());
    assert_eq!(count, 3);
    let bytes = data.unwrap();
    assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 3);
}
