use crate::error::{Result, VlibError};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Layout constants
// ---------------------------------------------------------------------------

pub const DEFAULT_CONFIG_FILE: &str = "vlib.yaml";
pub const DEFAULT_MANIFEST_FILE: &str = "business-config.yaml";

pub const RULES_DIR: &str = "rules";
pub const HELPERS_DIR: &str = "entity_helpers";

/// Cache root subdirectories.
pub const LOGIC_MIRROR_DIR: &str = "logic";
pub const CONFIG_CACHE_DIR: &str = "config";
pub const FETCHED_AT_FILE: &str = ".fetched_at";

/// Relative to the home directory.
pub const DEFAULT_CACHE_DIR: &str = ".cache/vlib";

// ---------------------------------------------------------------------------
// Bundle-relative paths
// ---------------------------------------------------------------------------

pub fn rule_relpath(entity_type: &str, rule_id: &str) -> String {
    format!("{RULES_DIR}/{entity_type}/{rule_id}.yaml")
}

pub fn helper_relpath(helper_id: &str) -> String {
    format!("{HELPERS_DIR}/{helper_id}.yaml")
}

pub fn rule_path(logic_dir: &Path, entity_type: &str, rule_id: &str) -> PathBuf {
    logic_dir.join(RULES_DIR).join(entity_type).join(format!("{rule_id}.yaml"))
}

pub fn helper_path(logic_dir: &Path, helper_id: &str) -> PathBuf {
    logic_dir.join(HELPERS_DIR).join(format!("{helper_id}.yaml"))
}

// ---------------------------------------------------------------------------
// Cache-root paths
// ---------------------------------------------------------------------------

pub fn default_cache_root() -> Result<PathBuf> {
    let home = home::home_dir().ok_or(VlibError::HomeNotFound)?;
    Ok(home.join(DEFAULT_CACHE_DIR))
}

pub fn mirror_dir(cache_root: &Path) -> PathBuf {
    cache_root.join(LOGIC_MIRROR_DIR)
}

pub fn fetched_at_path(cache_root: &Path) -> PathBuf {
    mirror_dir(cache_root).join(FETCHED_AT_FILE)
}

/// Remote config documents are keyed by a hash of their locator so that
/// distinct sources never share a cache file.
pub fn config_cache_path(cache_root: &Path, locator: &str) -> PathBuf {
    cache_root
        .join(CONFIG_CACHE_DIR)
        .join(format!("config_{}.yaml", locator_hash(locator)))
}

pub fn locator_hash(locator: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(locator.as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").unwrap())
}

/// Rule, helper and entity-type ids become path segments; reject anything
/// that could escape the bundle directory.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 || id.contains("..") || !id_re().is_match(id) {
        return Err(VlibError::InvalidConfig(format!("invalid {kind} id '{id}'")));
    }
    Ok(())
}

/// Bundle-relative file paths must stay inside the bundle.
pub fn validate_relative(path: &str) -> Result<()> {
    let p = Path::new(path);
    let escapes = p.is_absolute()
        || p.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
    if path.is_empty() || escapes {
        return Err(VlibError::InvalidConfig(format!(
            "bundle path '{path}' must be relative and stay inside the bundle"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
