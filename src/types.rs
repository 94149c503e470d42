use serde::{Deserialize, Serialize};

/// Kinds of named entities that can be looked up in a context document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Function,
    Structure,
    Enum,
    FunctionDefinition,
}

impl EntityKind {
    /// Returns the string representation of this entity kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Function => "function",
            EntityKind::Structure => "structure",
            EntityKind::Enum => "enum",
            EntityKind::FunctionDefinition => "function definition",
        }
    }
}

/// The persisted snapshot of one binary's functions and data types.
///
/// Field names are a compatibility surface shared with every consumer of the
/// document, so they must not be renamed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextDocument {
    /// Name of the analyzed program.
    pub program: String,
    /// Functions in the engine's enumeration order.
    pub functions: Vec<Function>,
    /// Structures, enums and function definitions.
    pub data_types: DataTypes,
}

/// A function instance found in the program listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Function {
    pub name: String,
    /// Entry point, `0x`-prefixed lowercase hex.
    pub entry: String,
    /// Rendered prototype.
    pub signature: String,
    pub parameters: Vec<Variable>,
    pub local_variables: Vec<Variable>,
    /// Globals read from within the body. Repeated reads appear repeatedly.
    pub global_variables: Vec<GlobalReference>,
    pub strings: Vec<String>,
    pub comments: Vec<Comment>,
    /// Decompiled source, empty when decompilation did not complete.
    pub pseudocode: String,
}

/// A parameter or local variable, rendered exactly as the engine reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Variable {
    pub name: String,
    pub datatype: String,
    pub storage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalReference {
    pub name: String,
    pub address: String,
}

/// A plate comment attached to an address inside a function body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Comment {
    pub address: String,
    pub comment: String,
}

/// The three categories of named data types recorded from the program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataTypes {
    pub structures: Vec<Structure>,
    pub enums: Vec<Enum>,
    pub function_definitions: Vec<FunctionDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Structure {
    pub name: String,
    /// Size in bytes.
    pub length: u64,
    /// Components in index order. Offsets are stored, not validated.
    pub members: Vec<StructureMember>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureMember {
    /// `None` for unnamed components.
    pub name: Option<String>,
    pub datatype: String,
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Enum {
    pub name: String,
    pub length: u64,
    pub values: Vec<EnumValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumValue {
    pub name: String,
    pub value: i64,
}

/// A type-level function signature, distinct from a [`Function`] instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionDefinition {
    pub name: String,
    pub return_type: String,
    pub parameters: Vec<DefinitionParameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionParameter {
    pub name: String,
    pub datatype: String,
}

/// Aggregate entity counts for a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub function_count: usize,
    pub structure_count: usize,
    pub enum_count: usize,
    pub function_definition_count: usize,
}

// ---------------------------------------------------------------------------
// Lookups
//
// Names are not unique. Every lookup returns the first entry in document
// order whose name matches.
// ---------------------------------------------------------------------------

impl ContextDocument {
    pub fn function_names(&self) -> Vec<String> {
        self.functions.iter().map(|f| f.name.clone()).collect()
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn structure_names(&self) -> Vec<String> {
        self.data_types
            .structures
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn find_structure(&self, name: &str) -> Option<&Structure> {
        self.data_types.structures.iter().find(|s| s.name == name)
    }

    pub fn enum_names(&self) -> Vec<String> {
        self.data_types.enums.iter().map(|e| e.name.clone()).collect()
    }

    pub fn find_enum(&self, name: &str) -> Option<&Enum> {
        self.data_types.enums.iter().find(|e| e.name == name)
    }

    pub fn function_definition_names(&self) -> Vec<String> {
        self.data_types
            .function_definitions
            .iter()
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn find_function_definition(&self, name: &str) -> Option<&FunctionDefinition> {
        self.data_types
            .function_definitions
            .iter()
            .find(|d| d.name == name)
    }

    /// Returns entity counts for this document.
    pub fn stats(&self) -> DocumentStats {
        DocumentStats {
            function_count: self.functions.len(),
            structure_count: self.data_types.structures.len(),
            enum_count: self.data_types.enums.len(),
            function_definition_count: self.data_types.function_definitions.len(),
        }
    }
}

/// Renders a function entry point the way the document stores it (`0x401000`).
pub fn format_entry(address: u64) -> String {
    format!("{:#x}", address)
}

/// Renders an address the way the engine prints it (`00401000`).
pub fn format_address(address: u64) -> String {
    format!("{:08x}", address)
}
