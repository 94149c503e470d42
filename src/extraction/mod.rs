/// Extraction stage: flattens an analyzed program into a context document.
///
/// The walk only reads from a [`ProgramModel`]; the engine has already done
/// all analysis by the time it runs.
mod extractor;
pub mod model;
mod snapshot;

pub use extractor::{ContextExtractor, ExtractionResult};
pub use model::{
    AddressRange, ArgumentInfo, ComponentInfo, DataTypeInfo, DataTypeKind, DecompileOutcome,
    EnumeratorInfo, FunctionInfo, ProgramModel, RefKind, Reference, SymbolInfo, VariableInfo,
    IGNORED_KINDS,
};
pub use snapshot::{
    ProgramSnapshot, SnapshotComment, SnapshotFunction, SnapshotProgram, SnapshotString,
    SnapshotSymbol,
};
