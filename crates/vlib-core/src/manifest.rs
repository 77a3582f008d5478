use crate::error::{Result, VlibError};
use crate::paths;
use crate::schema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// BusinessConfig
// ---------------------------------------------------------------------------

/// The bundle manifest: rulesets, helper routing, shipped schemas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessConfig {
    #[serde(default)]
    pub structural_files: Vec<String>,
    #[serde(default)]
    pub rulesets: BTreeMap<String, RulesetDefinition>,
    #[serde(default)]
    pub schema_to_helper_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub default_helpers: BTreeMap<String, String>,
    #[serde(default)]
    pub version_compatibility: VersionCompatibility,
    /// Schema identity URL -> bundle-relative JSON Schema file.
    #[serde(default)]
    pub schemas: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesetDefinition {
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Routing key (schema URL or entity type) -> ordered rows.
    #[serde(default)]
    pub rules: BTreeMap<String, Vec<RuleRow>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRow {
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RuleRow>,
}

impl RuleRow {
    pub fn new(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            children: Vec::new(),
        }
    }

    pub fn with_children(rule_id: &str, children: Vec<RuleRow>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            children,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionCompatibility {
    #[serde(default)]
    pub allow_minor_version_fallback: bool,
    #[serde(default = "default_strict_major")]
    pub strict_major_version: bool,
}

fn default_strict_major() -> bool {
    true
}

impl Default for VersionCompatibility {
    fn default() -> Self {
        Self {
            allow_minor_version_fallback: false,
            strict_major_version: default_strict_major(),
        }
    }
}

impl BusinessConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let cfg: BusinessConfig = serde_yaml::from_str(text)?;
        cfg.check()?;
        Ok(cfg)
    }

    /// Reject ids and paths that cannot be mapped onto the bundle layout.
    fn check(&self) -> Result<()> {
        for path in self.structural_files.iter().chain(self.schemas.values()) {
            paths::validate_relative(path)?;
        }
        for helper in self.helper_ids() {
            paths::validate_id("helper", &helper)?;
        }
        for ruleset in self.rulesets.values() {
            for (key, rows) in &ruleset.rules {
                paths::validate_id("entity type", &schema::entity_type_of(key))?;
                for_each_row(rows, &mut |row| paths::validate_id("rule", &row.rule_id))?;
            }
        }
        Ok(())
    }

    pub fn ruleset(&self, name: &str) -> Result<&RulesetDefinition> {
        self.rulesets
            .get(name)
            .ok_or_else(|| VlibError::RulesetNotFound(name.to_string()))
    }

    /// Every helper id the manifest references, deduplicated.
    pub fn helper_ids(&self) -> BTreeSet<String> {
        self.schema_to_helper_mapping
            .values()
            .chain(self.default_helpers.values())
            .cloned()
            .collect()
    }

    /// `(entity_type, rule_id)` for every row of every ruleset.
    pub fn rule_refs(&self) -> BTreeSet<(String, String)> {
        let mut refs = BTreeSet::new();
        for ruleset in self.rulesets.values() {
            for (key, rows) in &ruleset.rules {
                let entity = schema::entity_type_of(key);
                let _ = for_each_row(rows, &mut |row| {
                    refs.insert((entity.clone(), row.rule_id.clone()));
                    Ok(())
                });
            }
        }
        refs
    }
}

// ---------------------------------------------------------------------------
// Row tree helpers
// ---------------------------------------------------------------------------

/// Depth-first, parents before children.
pub fn for_each_row<F>(rows: &[RuleRow], f: &mut F) -> Result<()>
where
    F: FnMut(&RuleRow) -> Result<()>,
{
    for row in rows {
        f(row)?;
        for_each_row(&row.children, f)?;
    }
    Ok(())
}

pub fn count_rows(rows: &[RuleRow]) -> usize {
    rows.iter().map(|r| 1 + count_rows(&r.children)).sum()
}

pub fn contains_rule(rows: &[RuleRow], rule_id: &str) -> bool {
    rows.iter()
        .any(|r| r.rule_id == rule_id || contains_rule(&r.children, rule_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
structural_files: [README.md]
rulesets:
  quick:
    metadata:
      description: Fast checks
    rules:
      "https://schemas.example.com/schemas/loan/v1.0.0":
        - rule_id: rule_001_v1
        - rule_id: rule_003_v1
          children:
            - rule_id: rule_004_v1
      loan:
        - rule_id: rule_003_v1
schema_to_helper_mapping:
  "https://schemas.example.com/schemas/loan/v1.0.0": loan_v1
default_helpers:
  loan: loan_v1
"#;

    #[test]
    fn parses_rows_and_defaults() {
        let cfg = BusinessConfig::parse(MANIFEST).unwrap();
        let quick = cfg.ruleset("quick").unwrap();
        let rows = &quick.rules["https://schemas.example.com/schemas/loan/v1.0.0"];
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].children, vec![RuleRow::new("rule_004_v1")]);
        assert!(!cfg.version_compatibility.allow_minor_version_fallback);
        assert!(cfg.version_compatibility.strict_major_version);
        assert_eq!(quick.metadata["description"], "Fast checks");
    }

    #[test]
    fn missing_ruleset_is_an_error() {
        let cfg = BusinessConfig::parse(MANIFEST).unwrap();
        let err = cfg.ruleset("nightly").unwrap_err();
        assert!(matches!(err, VlibError::RulesetNotFound(ref n) if n == "nightly"));
    }

    #[test]
    fn rule_refs_use_entity_of_routing_key() {
        let cfg = BusinessConfig::parse(MANIFEST).unwrap();
        let refs: Vec<_> = cfg.rule_refs().into_iter().collect();
        assert_eq!(
            refs,
            vec![
                ("loan".to_string(), "rule_001_v1".to_string()),
                ("loan".to_string(), "rule_003_v1".to_string()),
                ("loan".to_string(), "rule_004_v1".to_string()),
            ]
        );
        assert_eq!(cfg.helper_ids().into_iter().collect::<Vec<_>>(), vec!["loan_v1"]);
    }

    #[test]
    fn loosely_versioned_schema_keys_route_to_their_entity() {
        let text = r#"
rulesets:
  quick:
    rules:
      "https://schemas.example.com/schemas/loan/v1":
        - rule_id: rule_001_v1
"#;
        let cfg = BusinessConfig::parse(text).unwrap();
        let refs: Vec<_> = cfg.rule_refs().into_iter().collect();
        assert_eq!(refs, vec![("loan".to_string(), "rule_001_v1".to_string())]);
    }

    #[test]
    fn counts_nested_rows() {
        let rows = vec![
            RuleRow::new("a"),
            RuleRow::with_children("b", vec![RuleRow::with_children("c", vec![RuleRow::new("d")])]),
        ];
        assert_eq!(count_rows(&rows), 4);
        assert!(contains_rule(&rows, "d"));
        assert!(!contains_rule(&rows, "e"));
    }

    #[test]
    fn rejects_escaping_rule_ids() {
        let bad = r#"
rulesets:
  quick:
    rules:
      loan:
        - rule_id: ../../etc/passwd
"#;
        assert!(BusinessConfig::parse(bad).is_err());
    }
}
