//! Rule loader: `(entity_type, rule_id)` -> [`RuleUnit`] by the
//! `rules/<entity_type>/<rule_id>.yaml` convention, cached per bundle.

use crate::checks::CheckRegistry;
use crate::error::{Result, VlibError};
use crate::manifest::{for_each_row, RuleRow};
use crate::paths;
use crate::rule::RuleUnit;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RuleDescriptor {
    implementation: String,
    validates: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    required_data: Vec<String>,
}

type CacheKey = (String, String);

#[derive(Debug)]
pub struct RuleLoader {
    logic_dir: PathBuf,
    checks: Arc<CheckRegistry>,
    cache: RwLock<HashMap<CacheKey, Arc<RuleUnit>>>,
}

impl RuleLoader {
    pub fn new(logic_dir: PathBuf, checks: Arc<CheckRegistry>) -> Self {
        Self {
            logic_dir,
            checks,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn load(&self, entity_type: &str, rule_id: &str) -> Result<Arc<RuleUnit>> {
        let key = (entity_type.to_string(), rule_id.to_string());
        if let Some(unit) = self
            .cache
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&key)
        {
            return Ok(Arc::clone(unit));
        }

        let unit = Arc::new(self.read_unit(entity_type, rule_id)?);
        debug!(rule_id, entity_type, implementation = %unit.implementation, "rule loaded");
        let mut cache = self.cache.write().unwrap_or_else(|p| p.into_inner());
        Ok(Arc::clone(cache.entry(key).or_insert(unit)))
    }

    fn read_unit(&self, entity_type: &str, rule_id: &str) -> Result<RuleUnit> {
        paths::validate_id("rule", rule_id)?;
        paths::validate_id("entity type", entity_type)?;
        let path = paths::rule_path(&self.logic_dir, entity_type, rule_id);
        if !path.exists() {
            return Err(VlibError::RuleNotFound {
                rule_id: rule_id.to_string(),
                path,
            });
        }
        let load_err = |reason: String| VlibError::RuleLoad {
            rule_id: rule_id.to_string(),
            reason,
        };
        let text = std::fs::read_to_string(&path).map_err(|e| load_err(e.to_string()))?;
        let desc: RuleDescriptor =
            serde_yaml::from_str(&text).map_err(|e| load_err(e.to_string()))?;
        if desc.validates != entity_type {
            return Err(load_err(format!(
                "declares entity type '{}' but is filed under '{entity_type}'",
                desc.validates
            )));
        }
        let check = self
            .checks
            .get(&desc.implementation)
            .ok_or_else(|| VlibError::UnknownCheck {
                rule_id: rule_id.to_string(),
                implementation: desc.implementation.clone(),
            })?;
        Ok(RuleUnit {
            id: rule_id.to_string(),
            entity_type: desc.validates,
            description: desc.description,
            required_data: desc.required_data,
            implementation: desc.implementation,
            check,
        })
    }

    /// Load every rule in a row tree. Any unresolvable row fails the whole call.
    pub fn load_rows(&self, entity_type: &str, rows: &[RuleRow]) -> Result<HashMap<String, Arc<RuleUnit>>> {
        let mut units = HashMap::new();
        for_each_row(rows, &mut |row: &RuleRow| {
            if !units.contains_key(&row.rule_id) {
                let unit = self.load(entity_type, &row.rule_id)?;
                units.insert(row.rule_id.clone(), unit);
            }
            Ok(())
        })?;
        Ok(units)
    }

    /// Drop every cached unit; the next load re-reads descriptors.
    pub fn reload(&self) {
        self.cache.write().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.read().unwrap_or_else(|p| p.into_inner()).len()
    }
}
