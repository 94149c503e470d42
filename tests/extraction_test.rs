use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use ghidra_context::document::{load_document, write_document};
use ghidra_context::extraction::*;
use serde_json::json;
use tempfile::TempDir;

/// In-memory program model with explicit per-address facts.
#[derive(Default)]
struct FakeProgram {
    name: String,
    functions: Vec<FunctionInfo>,
    decompiled: HashMap<u64, DecompileOutcome>,
    references: HashMap<u64, Vec<Reference>>,
    symbols: HashMap<u64, SymbolInfo>,
    strings: HashMap<u64, String>,
    comments: HashMap<u64, String>,
    types: Vec<DataTypeInfo>,
    timeouts_seen: Mutex<Vec<Duration>>,
}

impl ProgramModel for FakeProgram {
    fn program_name(&self) -> String {
        self.name.clone()
    }

    fn functions(&self) -> Vec<FunctionInfo> {
        self.functions.clone()
    }

    fn decompile(&self, function: &FunctionInfo, timeout: Duration) -> DecompileOutcome {
        self.timeouts_seen.lock().unwrap().push(timeout);
        self.decompiled
            .get(&function.entry)
            .cloned()
            .unwrap_or(DecompileOutcome::TimedOut)
    }

    fn references_from(&self, address: u64) -> Vec<Reference> {
        self.references.get(&address).cloned().unwrap_or_default()
    }

    fn primary_symbol(&self, address: u64) -> Option<SymbolInfo> {
        self.symbols.get(&address).cloned()
    }

    fn string_at(&self, address: u64) -> Option<String> {
        self.strings.get(&address).cloned()
    }

    fn plate_comment(&self, address: u64) -> Option<String> {
        self.comments.get(&address).cloned()
    }

    fn data_types(&self) -> Vec<DataTypeInfo> {
        self.types.clone()
    }
}

fn function(name: &str, entry: u64, len: u64) -> FunctionInfo {
    FunctionInfo {
        name: name.to_string(),
        entry,
        prototype: format!("undefined {}(void)", name),
        parameters: vec![],
        locals: vec![],
        body: vec![AddressRange {
            start: entry,
            end: entry + len - 1,
        }],
    }
}

fn read(from: u64, to: u64) -> Reference {
    Reference {
        from,
        to,
        kind: RefKind::Read,
    }
}

fn global(name: &str) -> SymbolInfo {
    SymbolInfo {
        name: name.to_string(),
        global: true,
    }
}

#[test]
fn test_functions_keep_enumeration_order() {
    let program = FakeProgram {
        name: "order".to_string(),
        functions: vec![
            function("zeta", 0x3000, 4),
            function("alpha", 0x1000, 4),
            function("mid", 0x2000, 4),
        ],
        ..Default::default()
    };
    let result = ContextExtractor::default().extract(&program);
    let names: Vec<&str> = result
        .document
        .functions
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    assert_eq!(result.document.program, "order");
    assert_eq!(result.document.functions[0].entry, "0x3000");
}

#[test]
fn test_decompile_timeout_leaves_empty_pseudocode() {
    let mut decompiled = HashMap::new();
    decompiled.insert(
        0x1000,
        DecompileOutcome::Completed("int main(void) { return 0; }".to_string()),
    );
    decompiled.insert(0x2000, DecompileOutcome::TimedOut);
    decompiled.insert(0x3000, DecompileOutcome::Failed("bad instruction".to_string()));

    let program = FakeProgram {
        functions: vec![
            function("main", 0x1000, 8),
            function("slow", 0x2000, 8),
            function("broken", 0x3000, 8),
        ],
        decompiled,
        ..Default::default()
    };
    let extractor = ContextExtractor::new(Duration::from_secs(5));
    let result = extractor.extract(&program);

    assert_eq!(result.document.functions.len(), 3);
    assert_eq!(
        result.document.functions[0].pseudocode,
        "int main(void) { return 0; }"
    );
    assert_eq!(result.document.functions[1].pseudocode, "");
    assert_eq!(result.document.functions[2].pseudocode, "");
    assert_eq!(result.decompile_failures, 2);

    let seen = program.timeouts_seen.lock().unwrap();
    assert!(seen.iter().all(|t| *t == Duration::from_secs(5)));
}

#[test]
fn test_variables_copied_verbatim() {
    let mut main = function("main", 0x1000, 4);
    main.parameters = vec![VariableInfo {
        name: "argc".to_string(),
        datatype: "int".to_string(),
        storage: "EDI:4".to_string(),
    }];
    main.locals = vec![VariableInfo {
        name: "local_10".to_string(),
        datatype: "char *".to_string(),
        storage: "Stack[-0x10]:8".to_string(),
    }];
    let program = FakeProgram {
        functions: vec![main],
        ..Default::default()
    };
    let doc = ContextExtractor::default().extract(&program).document;
    let f = &doc.functions[0];
    assert_eq!(f.parameters[0].storage, "EDI:4");
    assert_eq!(f.local_variables[0].datatype, "char *");
    assert_eq!(f.local_variables[0].storage, "Stack[-0x10]:8");
    assert_eq!(f.signature, "undefined main(void)");
}

#[test]
fn test_only_global_read_references_are_recorded() {
    let mut references = HashMap::new();
    references.insert(0x1000, vec![read(0x1000, 0x8000)]);
    references.insert(
        0x1001,
        vec![
            Reference {
                from: 0x1001,
                to: 0x8000,
                kind: RefKind::Write,
            },
            Reference {
                from: 0x1001,
                to: 0x8004,
                kind: RefKind::Call,
            },
            read(0x1001, 0x7ff0),
        ],
    );
    // Read twice, recorded twice.
    references.insert(0x1003, vec![read(0x1003, 0x8000)]);
    // Reference outside the body is not scanned.
    references.insert(0x2000, vec![read(0x2000, 0x8000)]);

    let mut symbols = HashMap::new();
    symbols.insert(0x8000, global("g_key"));
    symbols.insert(0x8004, global("puts"));
    symbols.insert(
        0x7ff0,
        SymbolInfo {
            name: "local_label".to_string(),
            global: false,
        },
    );

    let program = FakeProgram {
        functions: vec![function("check", 0x1000, 4)],
        references,
        symbols,
        ..Default::default()
    };
    let doc = ContextExtractor::default().extract(&program).document;
    let globals = &doc.functions[0].global_variables;
    assert_eq!(globals.len(), 2);
    assert!(globals.iter().all(|g| g.name == "g_key"));
    assert_eq!(globals[0].address, "00008000");
}

#[test]
fn test_strings_and_plate_comments_in_body_range() {
    let mut strings = HashMap::new();
    strings.insert(0x1002, "Enter password:".to_string());
    strings.insert(0x9000, "outside".to_string());

    let mut comments = HashMap::new();
    comments.insert(0x1000, "Checks the license key".to_string());
    comments.insert(0x1001, String::new());

    let mut f = function("check", 0x1000, 4);
    f.body.push(AddressRange {
        start: 0x1010,
        end: 0x1011,
    });
    comments.insert(0x1011, "second range".to_string());

    let program = FakeProgram {
        functions: vec![f],
        strings,
        comments,
        ..Default::default()
    };
    let doc = ContextExtractor::default().extract(&program).document;
    let f = &doc.functions[0];
    assert_eq!(f.strings, vec!["Enter password:"]);
    assert_eq!(f.comments.len(), 2);
    assert_eq!(f.comments[0].address, "00001000");
    assert_eq!(f.comments[0].comment, "Checks the license key");
    assert_eq!(f.comments[1].comment, "second range");
}

#[test]
fn test_data_types_classified_and_ignored_kinds_skipped() {
    let program = FakeProgram {
        types: vec![
            DataTypeInfo::Pointer {
                name: "char *".to_string(),
            },
            DataTypeInfo::Structure {
                name: "Packet".to_string(),
                length: 16,
                components: vec![
                    ComponentInfo {
                        field_name: Some("len".to_string()),
                        datatype: "uint".to_string(),
                        offset: 8,
                    },
                    ComponentInfo {
                        field_name: None,
                        datatype: "undefined4".to_string(),
                        offset: 0,
                    },
                ],
            },
            DataTypeInfo::Union {
                name: "Value".to_string(),
            },
            DataTypeInfo::Enum {
                name: "Mode".to_string(),
                length: 4,
                enumerators: vec![
                    EnumeratorInfo {
                        name: "OFF".to_string(),
                        value: 0,
                    },
                    EnumeratorInfo {
                        name: "NEG".to_string(),
                        value: -1,
                    },
                ],
            },
            DataTypeInfo::Typedef {
                name: "size_t".to_string(),
            },
            DataTypeInfo::FunctionDefinition {
                name: "handler_t".to_string(),
                return_type: "int".to_string(),
                arguments: vec![ArgumentInfo {
                    name: "sig".to_string(),
                    datatype: "int".to_string(),
                }],
            },
            DataTypeInfo::Other,
        ],
        ..Default::default()
    };
    let result = ContextExtractor::default().extract(&program);
    let types = &result.document.data_types;

    assert_eq!(result.skipped_types, 4);
    assert_eq!(types.structures.len(), 1);
    assert_eq!(types.enums.len(), 1);
    assert_eq!(types.function_definitions.len(), 1);

    // Component order is index order, not offset order.
    let packet = &types.structures[0];
    assert_eq!(packet.members[0].offset, 8);
    assert_eq!(packet.members[1].name, None);
    assert_eq!(types.enums[0].values[1].value, -1);
    assert_eq!(types.function_definitions[0].parameters[0].name, "sig");
}

#[test]
fn test_ignored_kinds_list() {
    for kind in [
        DataTypeKind::Structure,
        DataTypeKind::Enum,
        DataTypeKind::FunctionDefinition,
    ] {
        assert!(!IGNORED_KINDS.contains(&kind));
    }
    assert!(IGNORED_KINDS.contains(&DataTypeKind::Union));
    assert!(IGNORED_KINDS.contains(&DataTypeKind::Typedef));
}

#[test]
fn test_snapshot_extract_and_persist() {
    let dir = TempDir::new().unwrap();
    let snapshot_path = dir.path().join("snapshot.json");
    let snapshot = json!({
        "program": "crackme",
        "functions": [
            {
                "name": "main",
                "entry": 4096,
                "prototype": "int main(void)",
                "parameters": [],
                "locals": [{"name": "buf", "datatype": "char[32]", "storage": "Stack[-0x28]:32"}],
                "body": [{"start": 4096, "end": 4111}],
                "pseudocode": "int main(void) {\n  check(buf);\n}"
            },
            {
                "name": "check",
                "entry": 4112,
                "prototype": "bool check(char *key)",
                "body": [{"start": 4112, "end": 4127}]
            }
        ],
        "references": [
            {"from": 4100, "to": 16384, "kind": "read"},
            {"from": 4104, "to": 4112, "kind": "call"}
        ],
        "symbols": [
            {"address": 16384, "name": "g_secret", "global": true},
            {"address": 4112, "name": "check", "global": true}
        ],
        "strings": [{"address": 4120, "value": "Correct!"}],
        "plate_comments": [{"address": 4112, "comment": "FUNCTION"}],
        "data_types": [
            {"kind": "structure", "name": "User", "length": 12, "components": [
                {"field_name": "id", "datatype": "int", "offset": 0},
                {"field_name": "age", "datatype": "int", "offset": 4}
            ]},
            {"kind": "builtin", "name": "int"}
        ]
    });
    std::fs::write(&snapshot_path, snapshot.to_string()).unwrap();

    let program = SnapshotProgram::open(&snapshot_path).unwrap();
    let result = ContextExtractor::default().extract(&program);
    assert_eq!(result.decompile_failures, 1);
    assert_eq!(result.skipped_types, 1);

    let out = dir.path().join("ghidra_context.json");
    write_document(&out, &result.document).unwrap();
    let (doc, _) = load_document(&out).unwrap();

    assert_eq!(doc.program, "crackme");
    let main = doc.find_function("main").unwrap();
    assert_eq!(main.entry, "0x1000");
    assert_eq!(main.global_variables.len(), 1);
    assert_eq!(main.global_variables[0].name, "g_secret");
    assert_eq!(main.local_variables[0].name, "buf");

    let check = doc.find_function("check").unwrap();
    assert_eq!(check.pseudocode, "");
    assert_eq!(check.strings, vec!["Correct!"]);
    assert_eq!(check.comments[0].comment, "FUNCTION");
    assert_eq!(doc.find_structure("User").unwrap().members.len(), 2);
}

#[test]
fn test_document_uses_exact_keys() {
    let program = FakeProgram {
        name: "keys".to_string(),
        functions: vec![function("main", 0x1000, 1)],
        ..Default::default()
    };
    let doc = ContextExtractor::default().extract(&program).document;
    let value = serde_json::to_value(&doc).unwrap();

    for key in ["program", "functions", "data_types"] {
        assert!(value.get(key).is_some(), "missing top-level key {}", key);
    }
    for key in ["structures", "enums", "function_definitions"] {
        assert!(value["data_types"].get(key).is_some(), "missing {}", key);
    }
    let f = &value["functions"][0];
    for key in [
        "name",
        "entry",
        "signature",
        "parameters",
        "local_variables",
        "global_variables",
        "strings",
        "comments",
        "pseudocode",
    ] {
        assert!(f.get(key).is_some(), "missing function key {}", key);
    }
}
