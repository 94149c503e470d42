use std::ffi::OsString;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread;

use crate::config::{ServiceConfig, DECOMPILE_TIMEOUT_ENV, SNAPSHOT_PATH_ENV};
use crate::errors::{ContextError, Result};

/// Number of trailing output lines attached to a failed run.
const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// The post-script shipped with the crate.
pub const EXPORT_SCRIPT: &str = include_str!("../scripts/export_context.py");

/// Everything needed to run one headless extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    /// Ghidra installation directory.
    pub engine_path: PathBuf,
    /// Binary to import and analyze.
    pub binary_path: PathBuf,
    /// Where the post-script must write the program snapshot.
    pub snapshot_path: PathBuf,
    pub project_dir: PathBuf,
    pub project_name: String,
    pub script_dir: PathBuf,
    pub script_name: String,
    pub delete_project: bool,
    /// Per-function decompile budget handed to the post-script.
    pub decompile_timeout_secs: u64,
}

impl EngineInvocation {
    /// Builds an invocation from the service configuration.
    pub fn new(config: &ServiceConfig, engine_path: &Path, binary_path: &Path) -> Self {
        Self {
            engine_path: engine_path.to_path_buf(),
            binary_path: binary_path.to_path_buf(),
            snapshot_path: config.snapshot_path.clone(),
            project_dir: config.project_dir.clone(),
            project_name: config.project_name.clone(),
            script_dir: config.script_dir.clone(),
            script_name: config.script_name.clone(),
            delete_project: config.delete_project,
            decompile_timeout_secs: config.decompile_timeout_secs,
        }
    }

    /// Path of the `analyzeHeadless` launcher inside the installation.
    pub fn headless_path(&self) -> PathBuf {
        let support = self.engine_path.join("support");
        if cfg!(windows) {
            support.join("analyzeHeadless.bat")
        } else {
            support.join("analyzeHeadless")
        }
    }

    pub fn script_path(&self) -> PathBuf {
        self.script_dir.join(&self.script_name)
    }

    /// Command-line arguments passed to `analyzeHeadless`.
    pub fn arguments(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.project_dir.clone().into(),
            self.project_name.clone().into(),
            "-import".into(),
            self.binary_path.clone().into(),
            "-overwrite".into(),
            "-scriptPath".into(),
            self.script_dir.clone().into(),
            "-postScript".into(),
            self.script_name.clone().into(),
        ];
        if self.delete_project {
            args.push("-deleteProject".into());
        }
        args
    }

    /// Environment handed to the engine process.
    pub fn environment(&self) -> Vec<(&'static str, OsString)> {
        vec![
            (SNAPSHOT_PATH_ENV, self.snapshot_path.clone().into()),
            (
                DECOMPILE_TIMEOUT_ENV,
                self.decompile_timeout_secs.to_string().into(),
            ),
        ]
    }
}

/// Writes the bundled post-script to `<script_dir>/<script_name>` unless a
/// script already exists there. Returns `true` when it was written.
pub fn install_script(invocation: &EngineInvocation) -> Result<bool> {
    let path = invocation.script_path();
    if path.exists() {
        return Ok(false);
    }
    fs::create_dir_all(&invocation.script_dir)?;
    fs::write(&path, EXPORT_SCRIPT)?;
    tracing::info!("installed post-script at {}", path.display());
    Ok(true)
}

/// Completion report of an engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRun {
    pub success: bool,
    /// Exit code, `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr, in arrival order.
    pub output: String,
}

impl EngineRun {
    /// The last lines of output, for attaching to an error.
    pub fn diagnostics(&self) -> String {
        let lines: Vec<&str> = self.output.lines().collect();
        let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
        lines[start..].join("\n")
    }
}

/// Runs the external analysis engine.
pub trait EngineRunner: Send + Sync {
    /// Runs one extraction to completion. Returns `Err` only when the
    /// engine could not be started at all.
    fn run(&self, invocation: &EngineInvocation) -> Result<EngineRun>;
}

/// Runs Ghidra's `analyzeHeadless` as a blocking subprocess.
pub struct HeadlessEngine;

impl EngineRunner for HeadlessEngine {
    fn run(&self, invocation: &EngineInvocation) -> Result<EngineRun> {
        let headless = invocation.headless_path();
        fs::create_dir_all(&invocation.project_dir)?;
        install_script(invocation)?;

        tracing::info!(
            "running {} on '{}'",
            headless.display(),
            invocation.binary_path.display()
        );

        let mut child = Command::new(&headless)
            .args(invocation.arguments())
            .envs(invocation.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ContextError::EngineLaunch {
                path: headless.clone(),
                message: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            readers.push(thread::spawn(move || forward_lines(stdout, tx)));
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            readers.push(thread::spawn(move || forward_lines(stderr, tx)));
        }
        drop(tx);

        // Ends once both pipes are closed.
        let lines: Vec<String> = rx.iter().collect();
        for reader in readers {
            let _ = reader.join();
        }
        let status = child.wait()?;

        tracing::info!("analyzeHeadless exited with {}", status);

        Ok(EngineRun {
            success: status.success(),
            exit_code: status.code(),
            output: lines.join("\n"),
        })
    }
}

/// Logs each line of `stream` as it arrives and passes it on to `tx`.
fn forward_lines(stream: impl Read, tx: Sender<String>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                tracing::debug!(target: "ghidra", "{}", line);
                let _ = tx.send(line);
            }
            Err(e) => {
                tracing::debug!("stopped reading engine output: {}", e);
                break;
            }
        }
    }
}
