use crate::checks::CheckRegistry;
use crate::error::{Result, VlibError};
use crate::fetch::LogicDir;
use crate::helper::FieldMappingHelper;
use crate::loader::RuleLoader;
use crate::manifest::BusinessConfig;
use crate::registry::VersionRegistry;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// SchemaStore
// ---------------------------------------------------------------------------

/// JSON Schema documents shipped with a bundle, compiled once at load.
#[derive(Default)]
pub struct SchemaStore {
    compiled: BTreeMap<String, std::result::Result<jsonschema::Validator, String>>,
}

impl SchemaStore {
    pub fn insert(&mut self, identity: &str, document: Value) {
        let compiled = jsonschema::validator_for(&document).map_err(|e| e.to_string());
        if let Err(e) = &compiled {
            warn!(schema = identity, error = %e, "schema does not compile");
        }
        self.compiled.insert(identity.to_string(), compiled);
    }

    /// `None` when the bundle ships no schema for this identity.
    pub fn validator(&self, identity: &str) -> Option<std::result::Result<&jsonschema::Validator, &str>> {
        self.compiled
            .get(identity)
            .map(|c| c.as_ref().map_err(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

impl fmt::Debug for SchemaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.compiled.keys()).finish()
    }
}

// ---------------------------------------------------------------------------
// LogicBundle
// ---------------------------------------------------------------------------

/// An opened logic directory: manifest, helpers, schemas, version registry
/// and rule loader. Immutable until the owning engine is rebuilt.
#[derive(Debug)]
pub struct LogicBundle {
    pub dir: LogicDir,
    pub manifest: BusinessConfig,
    pub helpers: BTreeMap<String, Arc<FieldMappingHelper>>,
    pub schemas: SchemaStore,
    pub registry: VersionRegistry,
    pub loader: RuleLoader,
}

impl LogicBundle {
    pub fn open(dir: &LogicDir, checks: Arc<CheckRegistry>) -> Result<Self> {
        let manifest_path = dir.manifest_path();
        let text = std::fs::read_to_string(&manifest_path).map_err(|e| VlibError::Fetch {
            locator: manifest_path.display().to_string(),
            reason: e.to_string(),
        })?;
        let manifest = BusinessConfig::parse(&text)?;

        let mut helpers = BTreeMap::new();
        for id in manifest.helper_ids() {
            let helper = FieldMappingHelper::load(&dir.root, &id)?;
            helpers.insert(id, Arc::new(helper));
        }

        let mut schemas = SchemaStore::default();
        for (identity, rel) in &manifest.schemas {
            let path = dir.root.join(rel);
            let raw = std::fs::read_to_string(&path).map_err(|e| VlibError::Fetch {
                locator: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let doc: Value = serde_json::from_str(&raw)?;
            schemas.insert(identity, doc);
        }

        let registry = VersionRegistry::build(&manifest, &helpers)?;
        let loader = RuleLoader::new(dir.root.clone(), checks);
        info!(
            dir = %dir.root.display(),
            rulesets = manifest.rulesets.len(),
            helpers = helpers.len(),
            schemas = schemas.len(),
            "logic bundle opened"
        );
        Ok(Self {
            dir: dir.clone(),
            manifest,
            helpers,
            schemas,
            registry,
            loader,
        })
    }
}
