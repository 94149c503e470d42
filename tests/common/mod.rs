#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use ghidra_context::config::ServiceConfig;
use ghidra_context::engine::{EngineInvocation, EngineRun, EngineRunner};
use ghidra_context::errors::Result;
use ghidra_context::extraction::{FunctionInfo, ProgramSnapshot, SnapshotFunction};
use ghidra_context::service::ContextService;
use serde_json::json;
use tempfile::TempDir;

/// What the fake engine does on one run.
pub enum FakeRun {
    /// Exit 0 after writing this snapshot.
    Write(ProgramSnapshot),
    /// Signal `started`, wait for `release`, then write the snapshot.
    Gated {
        started: Sender<()>,
        release: Receiver<()>,
        snapshot: ProgramSnapshot,
    },
    /// Exit 0 after writing these raw bytes.
    WriteRaw(String),
    /// Exit 0 without writing anything.
    NoOutput,
    /// Exit with this code and output.
    Fail(i32, String),
}

/// Engine runner that replays scripted runs in order.
pub struct FakeEngine {
    runs: Mutex<VecDeque<FakeRun>>,
    calls: Arc<AtomicUsize>,
}

impl FakeEngine {
    pub fn new(runs: Vec<FakeRun>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                runs: Mutex::new(runs.into()),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl EngineRunner for FakeEngine {
    fn run(&self, invocation: &EngineInvocation) -> Result<EngineRun> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .runs
            .lock()
            .unwrap()
            .pop_front()
            .expect("fake engine ran more times than scripted");
        let ok = EngineRun {
            success: true,
            exit_code: Some(0),
            output: "INFO  ANALYZING all memory and code".to_string(),
        };
        match next {
            FakeRun::Write(snapshot) => {
                write_snapshot(invocation, &snapshot)?;
                Ok(ok)
            }
            FakeRun::Gated {
                started,
                release,
                snapshot,
            } => {
                started.send(()).unwrap();
                release.recv().unwrap();
                write_snapshot(invocation, &snapshot)?;
                Ok(ok)
            }
            FakeRun::WriteRaw(raw) => {
                fs::write(&invocation.snapshot_path, raw)?;
                Ok(ok)
            }
            FakeRun::NoOutput => Ok(ok),
            FakeRun::Fail(code, output) => Ok(EngineRun {
                success: false,
                exit_code: Some(code),
                output,
            }),
        }
    }
}

fn write_snapshot(invocation: &EngineInvocation, snapshot: &ProgramSnapshot) -> Result<()> {
    fs::write(
        &invocation.snapshot_path,
        serde_json::to_string_pretty(snapshot)?,
    )?;
    Ok(())
}

/// A temp workspace with a fake Ghidra install directory and target binaries.
pub struct Workspace {
    pub dir: TempDir,
    pub engine: PathBuf,
    pub config: ServiceConfig,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let engine = dir.path().join("ghidra");
        fs::create_dir_all(engine.join("support")).unwrap();
        let config = ServiceConfig::default().resolved(dir.path());
        fs::create_dir_all(config.context_path.parent().unwrap()).unwrap();
        Self {
            dir,
            engine,
            config,
        }
    }

    /// Creates a dummy binary file and returns its path.
    pub fn binary(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, b"\x7fELF").unwrap();
        path
    }

    pub fn service(&self, runs: Vec<FakeRun>) -> (ContextService, Arc<AtomicUsize>) {
        let (engine, calls) = FakeEngine::new(runs);
        (
            ContextService::with_runner(self.config.clone(), Box::new(engine)),
            calls,
        )
    }
}

/// A function with no body, decompiled to `pseudocode`.
pub fn snapshot_function(name: &str, entry: u64, pseudocode: &str) -> SnapshotFunction {
    SnapshotFunction {
        info: FunctionInfo {
            name: name.to_string(),
            entry,
            prototype: String::new(),
            parameters: vec![],
            locals: vec![],
            body: vec![],
        },
        pseudocode: Some(pseudocode.to_string()),
    }
}

/// The `main` / `User` program used throughout the tests.
///
/// `main` reads the global `g_secret`, references the string "password" and
/// carries a plate comment. One pointer type sits among the data types.
pub fn sample_snapshot() -> ProgramSnapshot {
    serde_json::from_value(json!({
        "program": "mock.bin",
        "functions": [
            {
                "name": "main",
                "entry": 4096,
                "prototype": "int main()",
                "locals": [
                    {"name": "local_c", "datatype": "int", "storage": "Stack[-0xc]:4"}
                ],
                "body": [{"start": 4096, "end": 4111}],
                "pseudocode": "int main() { return 0; }"
            }
        ],
        "references": [
            {"from": 4100, "to": 16384, "kind": "read"},
            {"from": 4104, "to": 16388, "kind": "write"}
        ],
        "symbols": [
            {"address": 16384, "name": "g_secret", "global": true},
            {"address": 16388, "name": "g_counter", "global": true}
        ],
        "strings": [{"address": 4108, "value": "password"}],
        "plate_comments": [{"address": 4096, "comment": "entry point"}],
        "data_types": [
            {"kind": "pointer", "name": "char *"},
            {
                "kind": "structure",
                "name": "User",
                "length": 12,
                "components": [
                    {"field_name": "id", "datatype": "int", "offset": 0},
                    {"field_name": "age", "datatype": "int", "offset": 4}
                ]
            }
        ]
    }))
    .unwrap()
}

/// A program for a second, unrelated binary.
pub fn other_snapshot() -> ProgramSnapshot {
    serde_json::from_value(json!({
        "program": "other.bin",
        "functions": [
            {
                "name": "entry",
                "entry": 8192,
                "prototype": "void entry(void)",
                "pseudocode": "void entry(void) { }"
            },
            {
                "name": "check_key",
                "entry": 8256,
                "prototype": "bool check_key(char * k)",
                "pseudocode": "bool check_key(char *k) { return false; }"
            }
        ],
        "data_types": [
            {"kind": "enum", "name": "Color", "length": 4, "enumerators": [
                {"name": "RED", "value": 0},
                {"name": "GREEN", "value": 1}
            ]},
            {"kind": "function_definition", "name": "callback_t", "return_type": "void", "arguments": [
                {"name": "ctx", "datatype": "void *"}
            ]}
        ]
    }))
    .unwrap()
}
