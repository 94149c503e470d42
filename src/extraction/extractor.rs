use std::time::{Duration, Instant};

use crate::config::DEFAULT_DECOMPILE_TIMEOUT_SECS;
use crate::types::{
    format_address, format_entry, Comment, ContextDocument, DataTypes, DefinitionParameter, Enum,
    EnumValue, Function, FunctionDefinition, GlobalReference, Structure, StructureMember,
    Variable,
};

use super::model::{
    DataTypeInfo, DecompileOutcome, FunctionInfo, ProgramModel, RefKind, VariableInfo,
    IGNORED_KINDS,
};

/// Result of one extraction walk.
pub struct ExtractionResult {
    /// The assembled document.
    pub document: ContextDocument,
    /// Functions whose decompilation timed out or failed.
    pub decompile_failures: usize,
    /// Data types skipped because their kind is not modeled.
    pub skipped_types: usize,
    /// Time taken in milliseconds.
    pub duration_ms: u64,
}

/// Flattens an analyzed [`ProgramModel`] into a [`ContextDocument`].
pub struct ContextExtractor {
    decompile_timeout: Duration,
}

impl Default for ContextExtractor {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_DECOMPILE_TIMEOUT_SECS))
    }
}

impl ContextExtractor {
    /// Creates an extractor giving each function `decompile_timeout` to decompile.
    pub fn new(decompile_timeout: Duration) -> Self {
        Self { decompile_timeout }
    }

    /// Walks functions and data types of `program` and assembles the document.
    pub fn extract(&self, program: &dyn ProgramModel) -> ExtractionResult {
        let start = Instant::now();
        let mut decompile_failures = 0;

        let mut functions = Vec::new();
        for info in program.functions() {
            let (function, decompiled) = self.extract_function(program, &info);
            if !decompiled {
                decompile_failures += 1;
            }
            functions.push(function);
        }

        let (data_types, skipped_types) = extract_data_types(program);

        let document = ContextDocument {
            program: program.program_name(),
            functions,
            data_types,
        };

        tracing::info!(
            "extracted {} functions, {} structures, {} enums, {} function definitions from '{}'",
            document.functions.len(),
            document.data_types.structures.len(),
            document.data_types.enums.len(),
            document.data_types.function_definitions.len(),
            document.program
        );

        ExtractionResult {
            document,
            decompile_failures,
            skipped_types,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Builds one function record. The flag is `false` when decompilation
    /// did not complete.
    fn extract_function(&self, program: &dyn ProgramModel, info: &FunctionInfo) -> (Function, bool) {
        let (pseudocode, decompiled) = match program.decompile(info, self.decompile_timeout) {
            DecompileOutcome::Completed(code) => (code, true),
            DecompileOutcome::TimedOut => {
                tracing::warn!(
                    "decompiling '{}' did not finish within {:?}; pseudocode left empty",
                    info.name,
                    self.decompile_timeout
                );
                (String::new(), false)
            }
            DecompileOutcome::Failed(message) => {
                tracing::warn!("decompiling '{}' failed: {}", info.name, message);
                (String::new(), false)
            }
        };

        let mut global_variables = Vec::new();
        let mut strings = Vec::new();
        let mut comments = Vec::new();

        for address in info.body_addresses() {
            for reference in program.references_from(address) {
                if reference.kind != RefKind::Read {
                    continue;
                }
                if let Some(symbol) = program.primary_symbol(reference.to) {
                    if symbol.global {
                        global_variables.push(GlobalReference {
                            name: symbol.name,
                            address: format_address(reference.to),
                        });
                    }
                }
            }

            if let Some(value) = program.string_at(address) {
                strings.push(value);
            }

            if let Some(comment) = program.plate_comment(address) {
                if !comment.is_empty() {
                    comments.push(Comment {
                        address: format_address(address),
                        comment,
                    });
                }
            }
        }

        let function = Function {
            name: info.name.clone(),
            entry: format_entry(info.entry),
            signature: info.prototype.clone(),
            parameters: info.parameters.iter().map(to_variable).collect(),
            local_variables: info.locals.iter().map(to_variable).collect(),
            global_variables,
            strings,
            comments,
            pseudocode,
        };
        (function, decompiled)
    }
}

fn to_variable(info: &VariableInfo) -> Variable {
    Variable {
        name: info.name.clone(),
        datatype: info.datatype.clone(),
        storage: info.storage.clone(),
    }
}

/// Sorts every known data type into the three modeled categories. Returns
/// the categories and the number of types skipped for being in
/// [`IGNORED_KINDS`].
fn extract_data_types(program: &dyn ProgramModel) -> (DataTypes, usize) {
    let mut data_types = DataTypes::default();
    let mut skipped = 0;

    for data_type in program.data_types() {
        match data_type {
            DataTypeInfo::Structure {
                name,
                length,
                components,
            } => {
                let members = components
                    .into_iter()
                    .map(|c| StructureMember {
                        name: c.field_name,
                        datatype: c.datatype,
                        offset: c.offset,
                    })
                    .collect();
                data_types.structures.push(Structure {
                    name,
                    length,
                    members,
                });
            }
            DataTypeInfo::Enum {
                name,
                length,
                enumerators,
            } => {
                let values = enumerators
                    .into_iter()
                    .map(|e| EnumValue {
                        name: e.name,
                        value: e.value,
                    })
                    .collect();
                data_types.enums.push(Enum {
                    name,
                    length,
                    values,
                });
            }
            DataTypeInfo::FunctionDefinition {
                name,
                return_type,
                arguments,
            } => {
                let parameters = arguments
                    .into_iter()
                    .map(|a| DefinitionParameter {
                        name: a.name,
                        datatype: a.datatype,
                    })
                    .collect();
                data_types.function_definitions.push(FunctionDefinition {
                    name,
                    return_type,
                    parameters,
                });
            }
            other => {
                debug_assert!(IGNORED_KINDS.contains(&other.kind()));
                tracing::debug!(
                    "skipping data type '{}' of ignored kind {:?}",
                    other.name().unwrap_or("<unnamed>"),
                    other.kind()
                );
                skipped += 1;
            }
        }
    }

    (data_types, skipped)
}
