//! A [`ProgramModel`] served from a raw program snapshot.
//!
//! A snapshot is a JSON dump of the listing facts the engine resolved:
//! functions with their bodies, cross-references, primary symbols, string
//! data, plate comments, data types, and the decompiler output obtained
//! for each function (absent when decompilation did not complete).

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ContextError, Result};

use super::model::{
    DataTypeInfo, DecompileOutcome, FunctionInfo, ProgramModel, Reference, SymbolInfo,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFunction {
    #[serde(flatten)]
    pub info: FunctionInfo,
    /// Decompiler output, `None` when decompilation did not complete.
    #[serde(default)]
    pub pseudocode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSymbol {
    pub address: u64,
    #[serde(flatten)]
    pub symbol: SymbolInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotString {
    pub address: u64,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotComment {
    pub address: u64,
    pub comment: String,
}

/// Serialized listing facts for one program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramSnapshot {
    pub program: String,
    pub functions: Vec<SnapshotFunction>,
    pub references: Vec<Reference>,
    /// Primary symbols only; the first entry for an address wins.
    pub symbols: Vec<SnapshotSymbol>,
    pub strings: Vec<SnapshotString>,
    pub plate_comments: Vec<SnapshotComment>,
    pub data_types: Vec<DataTypeInfo>,
}

impl ProgramSnapshot {
    /// Reads a snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| ContextError::Document {
            message: format!("failed to read program snapshot: {}", e),
            path: path.to_path_buf(),
        })?;
        serde_json::from_str(&contents).map_err(|e| ContextError::Document {
            message: format!("failed to parse program snapshot: {}", e),
            path: path.to_path_buf(),
        })
    }
}

/// A snapshot indexed by address for the extraction walk.
pub struct SnapshotProgram {
    snapshot: ProgramSnapshot,
    pseudocode_by_entry: HashMap<u64, Option<String>>,
    references_by_source: HashMap<u64, Vec<Reference>>,
    symbols_by_address: HashMap<u64, SymbolInfo>,
    strings_by_address: HashMap<u64, String>,
    comments_by_address: HashMap<u64, String>,
}

impl SnapshotProgram {
    pub fn new(snapshot: ProgramSnapshot) -> Self {
        let pseudocode_by_entry = snapshot
            .functions
            .iter()
            .map(|f| (f.info.entry, f.pseudocode.clone()))
            .collect();

        let mut references_by_source: HashMap<u64, Vec<Reference>> = HashMap::new();
        for reference in &snapshot.references {
            references_by_source
                .entry(reference.from)
                .or_default()
                .push(*reference);
        }

        let mut symbols_by_address = HashMap::new();
        for s in &snapshot.symbols {
            symbols_by_address
                .entry(s.address)
                .or_insert_with(|| s.symbol.clone());
        }

        let strings_by_address = snapshot
            .strings
            .iter()
            .map(|s| (s.address, s.value.clone()))
            .collect();
        let comments_by_address = snapshot
            .plate_comments
            .iter()
            .map(|c| (c.address, c.comment.clone()))
            .collect();

        Self {
            snapshot,
            pseudocode_by_entry,
            references_by_source,
            symbols_by_address,
            strings_by_address,
            comments_by_address,
        }
    }

    /// Loads and indexes a snapshot file.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(ProgramSnapshot::load(path)?))
    }
}

impl ProgramModel for SnapshotProgram {
    fn program_name(&self) -> String {
        self.snapshot.program.clone()
    }

    fn functions(&self) -> Vec<FunctionInfo> {
        self.snapshot
            .functions
            .iter()
            .map(|f| f.info.clone())
            .collect()
    }

    // The snapshot carries finished decompiler output, so the budget was
    // already spent when it was taken.
    fn decompile(&self, function: &FunctionInfo, _timeout: Duration) -> DecompileOutcome {
        match self.pseudocode_by_entry.get(&function.entry) {
            Some(Some(code)) => DecompileOutcome::Completed(code.clone()),
            Some(None) => DecompileOutcome::TimedOut,
            None => DecompileOutcome::Failed(format!(
                "no function recorded at entry {:#x}",
                function.entry
            )),
        }
    }

    fn references_from(&self, address: u64) -> Vec<Reference> {
        self.references_by_source
            .get(&address)
            .cloned()
            .unwrap_or_default()
    }

    fn primary_symbol(&self, address: u64) -> Option<SymbolInfo> {
        self.symbols_by_address.get(&address).cloned()
    }

    fn string_at(&self, address: u64) -> Option<String> {
        self.strings_by_address.get(&address).cloned()
    }

    fn plate_comment(&self, address: u64) -> Option<String> {
        self.comments_by_address.get(&address).cloned()
    }

    fn data_types(&self) -> Vec<DataTypeInfo> {
        self.snapshot.data_types.clone()
    }
}
