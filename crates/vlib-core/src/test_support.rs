//! Fixtures shared by unit tests: the demo bundle written into temp dirs.

use crate::fetch::LogicDir;
use crate::io::atomic_write;
use crate::paths;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MANIFEST: &str = include_str!("../../../demo/logic/business-config.yaml");
pub const README: &str = include_str!("../../../demo/logic/README.md");
pub const RULE_001: &str = include_str!("../../../demo/logic/rules/loan/rule_001_v1.yaml");
pub const RULE_002: &str = include_str!("../../../demo/logic/rules/loan/rule_002_v1.yaml");
pub const RULE_003: &str = include_str!("../../../demo/logic/rules/loan/rule_003_v1.yaml");
pub const RULE_004: &str = include_str!("../../../demo/logic/rules/loan/rule_004_v1.yaml");
pub const RULE_005: &str = include_str!("../../../demo/logic/rules/loan/rule_005_v1.yaml");
pub const HELPER_V1: &str = include_str!("../../../demo/logic/entity_helpers/loan_v1.yaml");
pub const HELPER_V2: &str = include_str!("../../../demo/logic/entity_helpers/loan_v2.yaml");
pub const SCHEMA_V1: &str = include_str!("../../../demo/logic/schemas/loan.v1.0.0.json");
pub const SCHEMA_V2: &str = include_str!("../../../demo/logic/schemas/loan.v2.0.0.json");

pub const LOAN_OK: &str = include_str!("../../../demo/entities/loan_ok.json");
pub const LOAN_V2: &str = include_str!("../../../demo/entities/loan_v2.json");
pub const LOANS: &str = include_str!("../../../demo/entities/loans.json");

pub const V1: &str = "https://schemas.example.com/schemas/loan/v1.0.0";
pub const V2: &str = "https://schemas.example.com/schemas/loan/v2.0.0";

/// Bundle-relative path and content of every demo bundle file.
pub const BUNDLE_FILES: &[(&str, &str)] = &[
    ("business-config.yaml", MANIFEST),
    ("README.md", README),
    ("rules/loan/rule_001_v1.yaml", RULE_001),
    ("rules/loan/rule_002_v1.yaml", RULE_002),
    ("rules/loan/rule_003_v1.yaml", RULE_003),
    ("rules/loan/rule_004_v1.yaml", RULE_004),
    ("rules/loan/rule_005_v1.yaml", RULE_005),
    ("entity_helpers/loan_v1.yaml", HELPER_V1),
    ("entity_helpers/loan_v2.yaml", HELPER_V2),
    ("schemas/loan.v1.0.0.json", SCHEMA_V1),
    ("schemas/loan.v2.0.0.json", SCHEMA_V2),
];

/// Write the demo bundle under `<root>/logic`.
pub fn write_bundle(root: &Path) -> LogicDir {
    let logic = root.join("logic");
    for (rel, body) in BUNDLE_FILES {
        atomic_write(&logic.join(rel), body.as_bytes()).unwrap();
    }
    LogicDir {
        root: logic,
        manifest_file: paths::DEFAULT_MANIFEST_FILE.to_string(),
        remote: false,
    }
}

/// Replace the manifest of a written bundle.
pub fn write_manifest(dir: &LogicDir, text: &str) {
    atomic_write(&dir.manifest_path(), text.as_bytes()).unwrap();
}

/// Write the bundle plus a `vlib.yaml` pointing at it. `extra` is appended
/// to the deployment config.
pub fn write_deployment(root: &Path, extra: &str) -> PathBuf {
    write_bundle(root);
    let path = root.join(paths::DEFAULT_CONFIG_FILE);
    let text = format!("business_config_uri: logic/business-config.yaml\n{extra}");
    std::fs::write(&path, text).unwrap();
    path
}

/// File contents keyed by relative path, ignoring the fetch stamp.
pub fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(base: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(base, &path, out);
            } else if path.file_name().and_then(|n| n.to_str()) != Some(paths::FETCHED_AT_FILE) {
                let rel = path.strip_prefix(base).unwrap().to_string_lossy().into_owned();
                out.insert(rel, std::fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(dir, dir, &mut out);
    out
}

pub fn loan_ok() -> Value {
    serde_json::from_str(LOAN_OK).unwrap()
}

pub fn loan_v2() -> Value {
    serde_json::from_str(LOAN_V2).unwrap()
}

pub fn loans() -> Vec<Value> {
    serde_json::from_str(LOANS).unwrap()
}
