//! The analyzed program as the extractor sees it.
//!
//! [`ProgramModel`] is the seam between the extraction walk and whatever
//! holds the engine's analysis results. Every piece of information the walk
//! needs is asked for through this trait, already resolved by the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An inclusive range of addresses belonging to a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: u64,
    pub end: u64,
}

impl AddressRange {
    /// Iterates every address in the range, in ascending order.
    pub fn addresses(&self) -> impl Iterator<Item = u64> {
        self.start..=self.end
    }
}

/// A declared parameter or local variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub datatype: String,
    pub storage: String,
}

/// A defined function in the program listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub entry: u64,
    /// Prototype rendered by the engine.
    pub prototype: String,
    #[serde(default)]
    pub parameters: Vec<VariableInfo>,
    #[serde(default)]
    pub locals: Vec<VariableInfo>,
    #[serde(default)]
    pub body: Vec<AddressRange>,
}

impl FunctionInfo {
    /// Iterates every address in the function body, range by range.
    pub fn body_addresses(&self) -> impl Iterator<Item = u64> + '_ {
        self.body.iter().flat_map(|r| r.addresses())
    }
}

/// Outcome of one bounded decompile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecompileOutcome {
    Completed(String),
    TimedOut,
    Failed(String),
}

/// Classification of a cross-reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Read,
    Write,
    ReadWrite,
    Data,
    Call,
    Jump,
    Other,
}

/// A reference leaving an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub from: u64,
    pub to: u64,
    pub kind: RefKind,
}

/// The primary symbol at an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    #[serde(default)]
    pub global: bool,
}

/// Structural kind of a data type known to the type manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataTypeKind {
    Structure,
    Enum,
    FunctionDefinition,
    Union,
    Pointer,
    Array,
    Typedef,
    Builtin,
    Other,
}

/// Data type kinds the extractor deliberately leaves out of the document.
pub const IGNORED_KINDS: &[DataTypeKind] = &[
    DataTypeKind::Union,
    DataTypeKind::Pointer,
    DataTypeKind::Array,
    DataTypeKind::Typedef,
    DataTypeKind::Builtin,
    DataTypeKind::Other,
];

/// One component of a structure, in component-index order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    #[serde(default)]
    pub field_name: Option<String>,
    pub datatype: String,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumeratorInfo {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentInfo {
    pub name: String,
    pub datatype: String,
}

/// A data type as reported by the type manager, tagged by structural kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataTypeInfo {
    Structure {
        name: String,
        length: u64,
        #[serde(default)]
        components: Vec<ComponentInfo>,
    },
    Enum {
        name: String,
        length: u64,
        #[serde(default)]
        enumerators: Vec<EnumeratorInfo>,
    },
    FunctionDefinition {
        name: String,
        return_type: String,
        #[serde(default)]
        arguments: Vec<ArgumentInfo>,
    },
    Union {
        name: String,
    },
    Pointer {
        name: String,
    },
    Array {
        name: String,
    },
    Typedef {
        name: String,
    },
    Builtin {
        name: String,
    },
    #[serde(other)]
    Other,
}

impl DataTypeInfo {
    pub fn kind(&self) -> DataTypeKind {
        match self {
            DataTypeInfo::Structure { .. } => DataTypeKind::Structure,
            DataTypeInfo::Enum { .. } => DataTypeKind::Enum,
            DataTypeInfo::FunctionDefinition { .. } => DataTypeKind::FunctionDefinition,
            DataTypeInfo::Union { .. } => DataTypeKind::Union,
            DataTypeInfo::Pointer { .. } => DataTypeKind::Pointer,
            DataTypeInfo::Array { .. } => DataTypeKind::Array,
            DataTypeInfo::Typedef { .. } => DataTypeKind::Typedef,
            DataTypeInfo::Builtin { .. } => DataTypeKind::Builtin,
            DataTypeInfo::Other => DataTypeKind::Other,
        }
    }

    /// Returns the type's name, or `None` for unclassified types.
    pub fn name(&self) -> Option<&str> {
        match self {
            DataTypeInfo::Structure { name, .. }
            | DataTypeInfo::Enum { name, .. }
            | DataTypeInfo::FunctionDefinition { name, .. }
            | DataTypeInfo::Union { name }
            | DataTypeInfo::Pointer { name }
            | DataTypeInfo::Array { name }
            | DataTypeInfo::Typedef { name }
            | DataTypeInfo::Builtin { name } => Some(name),
            DataTypeInfo::Other => None,
        }
    }
}

/// Read access to an already-analyzed program.
///
/// Implementations answer from the engine's resolved model; the extractor
/// never asks them to analyze anything.
pub trait ProgramModel {
    /// Name of the program (usually the imported binary's file name).
    fn program_name(&self) -> String;

    /// All defined functions in the engine's natural enumeration order.
    fn functions(&self) -> Vec<FunctionInfo>;

    /// Decompiles one function, giving up after `timeout`.
    fn decompile(&self, function: &FunctionInfo, timeout: Duration) -> DecompileOutcome;

    /// References originating at `address`.
    fn references_from(&self, address: u64) -> Vec<Reference>;

    /// The primary symbol at `address`, if any.
    fn primary_symbol(&self, address: u64) -> Option<SymbolInfo>;

    /// The string value of the data item defined at `address`, if it has one.
    fn string_at(&self, address: u64) -> Option<String>;

    /// The plate comment at `address`, if any.
    fn plate_comment(&self, address: u64) -> Option<String>;

    /// All data types known to the program's type manager.
    fn data_types(&self) -> Vec<DataTypeInfo>;
}
