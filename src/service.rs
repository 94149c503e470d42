//! The stateful query service over one loaded context document.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::document::{load_document, write_document};
use crate::engine::{EngineInvocation, EngineRunner, HeadlessEngine};
use crate::errors::{ContextError, Result};
use crate::extraction::{ContextExtractor, SnapshotProgram};
use crate::types::{
    ContextDocument, DocumentStats, EntityKind, Enum, Function, FunctionDefinition, Structure,
};

/// A document that has been loaded and is being served.
#[derive(Debug)]
pub struct LoadedContext {
    pub document: ContextDocument,
    /// Display name of the analyzed binary (its file name).
    pub binary_name: String,
    /// SHA-256 of the document bytes as read from disk.
    pub content_hash: String,
    pub source_path: PathBuf,
}

/// Lifecycle state of the service.
#[derive(Debug, Clone, Default)]
pub enum Session {
    #[default]
    NotReady,
    Ready(Arc<LoadedContext>),
}

/// Returned by a successful [`ContextService::setup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupSummary {
    pub binary_name: String,
    pub program: String,
    pub stats: DocumentStats,
    /// Functions left without pseudocode.
    pub decompile_failures: usize,
    /// Data types of kinds the document does not model.
    pub skipped_types: usize,
    pub duration_ms: u64,
}

/// Snapshot of the service state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub ready: bool,
    pub binary_name: Option<String>,
    pub program: Option<String>,
    pub content_hash: Option<String>,
    pub context_path: PathBuf,
    pub stats: Option<DocumentStats>,
}

/// Serves lookups over at most one context document.
///
/// `setup` calls are serialized by a gate. The new document is installed
/// with a single swap under the session write lock, so a query sees either
/// the previous document or the new one. A failed `setup` leaves the
/// session as it was.
pub struct ContextService {
    config: ServiceConfig,
    runner: Box<dyn EngineRunner>,
    session: RwLock<Session>,
    setup_gate: Mutex<()>,
}

impl ContextService {
    /// Creates a service that runs Ghidra's `analyzeHeadless`.
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_runner(config, Box::new(HeadlessEngine))
    }

    /// Creates a service with a custom engine runner.
    pub fn with_runner(config: ServiceConfig, runner: Box<dyn EngineRunner>) -> Self {
        Self {
            config,
            runner,
            session: RwLock::new(Session::NotReady),
            setup_gate: Mutex::new(()),
        }
    }

    /// Returns a reference to the current configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Returns a clone of the current session.
    pub fn session(&self) -> Session {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.session(), Session::Ready(_))
    }

    /// The loaded context, or `NotReady`.
    fn current(&self) -> Result<Arc<LoadedContext>> {
        match self.session() {
            Session::Ready(ctx) => Ok(ctx),
            Session::NotReady => Err(ContextError::NotReady),
        }
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

impl ContextService {
    /// Runs the headless extraction for `binary_path`, turns the snapshot it
    /// produces into a context document and, on success, replaces the served
    /// document.
    pub fn setup(&self, engine_path: &Path, binary_path: &Path) -> Result<SetupSummary> {
        if !engine_path.is_dir() {
            return Err(ContextError::InvalidEnginePath(engine_path.to_path_buf()));
        }
        if !binary_path.is_file() {
            return Err(ContextError::MissingBinary(binary_path.to_path_buf()));
        }

        let _gate = self
            .setup_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let start = Instant::now();

        let invocation = EngineInvocation::new(&self.config, engine_path, binary_path);
        remove_stale_file(&invocation.snapshot_path)?;
        remove_stale_file(&self.config.context_path)?;

        let run = self.runner.run(&invocation)?;
        if !run.success {
            tracing::warn!("extraction of '{}' failed", binary_path.display());
            return Err(ContextError::EngineFailed {
                code: run.exit_code,
                diagnostics: run.diagnostics(),
            });
        }

        if !invocation.snapshot_path.exists() {
            return Err(ContextError::MissingOutput(invocation.snapshot_path));
        }

        let program = SnapshotProgram::open(&invocation.snapshot_path)?;
        let extractor = ContextExtractor::new(self.config.decompile_timeout());
        let extraction = extractor.extract(&program);
        write_document(&self.config.context_path, &extraction.document)?;

        let (document, content_hash) = load_document(&self.config.context_path)?;
        let binary_name = binary_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| binary_path.to_string_lossy().into_owned());

        let summary = SetupSummary {
            binary_name: binary_name.clone(),
            program: document.program.clone(),
            stats: document.stats(),
            decompile_failures: extraction.decompile_failures,
            skipped_types: extraction.skipped_types,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        let loaded = Arc::new(LoadedContext {
            document,
            binary_name,
            content_hash,
            source_path: self.config.context_path.clone(),
        });
        *self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Session::Ready(loaded);

        tracing::info!(
            "context loaded for '{}': {} functions, {} structures, {} enums, {} function definitions",
            summary.binary_name,
            summary.stats.function_count,
            summary.stats.structure_count,
            summary.stats.enum_count,
            summary.stats.function_definition_count
        );

        Ok(summary)
    }
}

/// Removes a file left by an earlier run so that it cannot be mistaken for
/// this run's output.
fn remove_stale_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("removed stale file '{}'", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl ContextService {
    /// Names of all functions in document order, duplicates included.
    pub fn list_functions(&self) -> Result<Vec<String>> {
        Ok(self.current()?.document.function_names())
    }

    /// Full record of the first function named `name`.
    pub fn get_function(&self, name: &str) -> Result<Function> {
        self.current()?
            .document
            .find_function(name)
            .cloned()
            .ok_or_else(|| not_found(EntityKind::Function, name))
    }

    /// Pseudocode of the first function named `name`.
    pub fn get_pseudocode(&self, name: &str) -> Result<String> {
        self.current()?
            .document
            .find_function(name)
            .map(|f| f.pseudocode.clone())
            .ok_or_else(|| not_found(EntityKind::Function, name))
    }

    pub fn list_structures(&self) -> Result<Vec<String>> {
        Ok(self.current()?.document.structure_names())
    }

    pub fn get_structure(&self, name: &str) -> Result<Structure> {
        self.current()?
            .document
            .find_structure(name)
            .cloned()
            .ok_or_else(|| not_found(EntityKind::Structure, name))
    }

    pub fn list_enums(&self) -> Result<Vec<String>> {
        Ok(self.current()?.document.enum_names())
    }

    pub fn get_enum(&self, name: &str) -> Result<Enum> {
        self.current()?
            .document
            .find_enum(name)
            .cloned()
            .ok_or_else(|| not_found(EntityKind::Enum, name))
    }

    pub fn list_function_definitions(&self) -> Result<Vec<String>> {
        Ok(self.current()?.document.function_definition_names())
    }

    pub fn get_function_definition(&self, name: &str) -> Result<FunctionDefinition> {
        self.current()?
            .document
            .find_function_definition(name)
            .cloned()
            .ok_or_else(|| not_found(EntityKind::FunctionDefinition, name))
    }

    /// Reports readiness and, when ready, what is loaded.
    pub fn status(&self) -> ServiceStatus {
        match self.session() {
            Session::Ready(ctx) => ServiceStatus {
                ready: true,
                binary_name: Some(ctx.binary_name.clone()),
                program: Some(ctx.document.program.clone()),
                content_hash: Some(ctx.content_hash.clone()),
                context_path: ctx.source_path.clone(),
                stats: Some(ctx.document.stats()),
            },
            Session::NotReady => ServiceStatus {
                ready: false,
                binary_name: None,
                program: None,
                content_hash: None,
                context_path: self.config.context_path.clone(),
                stats: None,
            },
        }
    }
}

fn not_found(kind: EntityKind, name: &str) -> ContextError {
    ContextError::NotFound {
        kind,
        name: name.to_string(),
    }
}
