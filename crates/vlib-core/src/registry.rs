//! Version registry: schema identity (or bare entity type) -> field-mapping
//! helper. Built once per bundle, read-only afterwards.

use crate::error::{Result, VlibError};
use crate::helper::FieldMappingHelper;
use crate::manifest::{BusinessConfig, VersionCompatibility};
use crate::schema::SchemaIdentity;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct VersionRegistry {
    exact: BTreeMap<String, Arc<FieldMappingHelper>>,
    /// Parseable mapped identities, for minor-version fallback.
    versioned: Vec<(SchemaIdentity, Arc<FieldMappingHelper>)>,
    defaults: BTreeMap<String, Arc<FieldMappingHelper>>,
    compat: VersionCompatibility,
}

impl VersionRegistry {
    pub fn build(
        manifest: &BusinessConfig,
        helpers: &BTreeMap<String, Arc<FieldMappingHelper>>,
    ) -> Result<Self> {
        let lookup = |id: &str| {
            helpers
                .get(id)
                .cloned()
                .ok_or_else(|| VlibError::HelperNotFound(id.to_string()))
        };

        let mut exact = BTreeMap::new();
        let mut versioned = Vec::new();
        for (url, helper_id) in &manifest.schema_to_helper_mapping {
            let helper = lookup(helper_id)?;
            if let Some(identity) = SchemaIdentity::parse(url) {
                versioned.push((identity, Arc::clone(&helper)));
            }
            exact.insert(url.clone(), helper);
        }
        let mut defaults = BTreeMap::new();
        for (entity, helper_id) in &manifest.default_helpers {
            defaults.insert(entity.clone(), lookup(helper_id)?);
        }
        Ok(Self {
            exact,
            versioned,
            defaults,
            compat: manifest.version_compatibility.clone(),
        })
    }

    /// Resolve the helper for an entity.
    ///
    /// 1. Exact schema-identity match.
    /// 2. With minor fallback enabled: same entity and major, highest
    ///    `(minor, patch)` not above the requested version.
    /// 3. Without a schema identity: the entity type's default helper.
    /// 4. Otherwise a no-match error. Major versions never fall back onto
    ///    each other.
    pub fn resolve(&self, schema: Option<&str>, entity_type: &str) -> Result<Arc<FieldMappingHelper>> {
        let Some(url) = schema else {
            return self.defaults.get(entity_type).cloned().ok_or_else(|| VlibError::NoHelper {
                key: entity_type.to_string(),
                reason: "entity carries no schema identity and the entity type has no default helper"
                    .to_string(),
            });
        };
        if let Some(helper) = self.exact.get(url) {
            return Ok(Arc::clone(helper));
        }
        let no_match = |reason: String| VlibError::NoHelper {
            key: url.to_string(),
            reason,
        };
        let Some(wanted) = SchemaIdentity::parse(url) else {
            return Err(no_match(
                "schema identity is not mapped and carries no parseable version".to_string(),
            ));
        };

        let same_entity: Vec<&(SchemaIdentity, Arc<FieldMappingHelper>)> = self
            .versioned
            .iter()
            .filter(|(id, _)| id.entity == wanted.entity)
            .collect();
        if same_entity.is_empty() {
            return Err(no_match(format!(
                "no schema version of entity '{}' is mapped",
                wanted.entity
            )));
        }
        let same_major: Vec<_> = same_entity
            .iter()
            .filter(|(id, _)| id.major == wanted.major)
            .collect();
        if same_major.is_empty() {
            let mut majors: Vec<u32> = same_entity.iter().map(|(id, _)| id.major).collect();
            majors.sort_unstable();
            majors.dedup();
            let mode = if self.compat.strict_major_version {
                "strict major-version enforcement"
            } else {
                "major versions are never interchangeable"
            };
            return Err(no_match(format!(
                "major-version mismatch: v{} requested, mapped majors {majors:?} ({mode})",
                wanted.major
            )));
        }
        if !self.compat.allow_minor_version_fallback {
            return Err(no_match(format!(
                "{wanted} is not mapped and minor-version fallback is disabled"
            )));
        }
        same_major
            .into_iter()
            .filter(|(id, _)| (id.minor, id.patch) <= (wanted.minor, wanted.patch))
            .max_by_key(|(id, _)| (id.minor, id.patch))
            .map(|(_, helper)| Arc::clone(helper))
            .ok_or_else(|| {
                no_match(format!(
                    "no mapped minor version of {} v{} at or below {wanted}",
                    wanted.entity, wanted.major
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::BusinessConfig;

    fn helper(id: &str) -> Arc<FieldMappingHelper> {
        Arc::new(FieldMappingHelper {
            id: id.to_string(),
            entity_type: "loan".into(),
            schema_versions: vec![],
            fields: BTreeMap::new(),
        })
    }

    fn registry(fallback: bool, strict: bool) -> VersionRegistry {
        let manifest = BusinessConfig::parse(&format!(
            r#"
schema_to_helper_mapping:
  "https://s.example.com/schemas/loan/v1.0.0": loan_v1
  "https://s.example.com/schemas/loan/v1.4.0": loan_v1_4
default_helpers:
  loan: loan_v1
version_compatibility:
  allow_minor_version_fallback: {fallback}
  strict_major_version: {strict}
"#
        ))
        .unwrap();
        let helpers = ["loan_v1", "loan_v1_4"]
            .iter()
            .map(|id| (id.to_string(), helper(id)))
            .collect();
        VersionRegistry::build(&manifest, &helpers).unwrap()
    }

    fn resolve(reg: &VersionRegistry, url: &str) -> Result<String> {
        reg.resolve(Some(url), "loan").map(|h| h.id.clone())
    }

    #[test]
    fn exact_match_wins() {
        let reg = registry(false, true);
        assert_eq!(resolve(&reg, "https://s.example.com/schemas/loan/v1.4.0").unwrap(), "loan_v1_4");
    }

    #[test]
    fn minor_fallback_picks_highest_not_above() {
        let reg = registry(true, true);
        assert_eq!(resolve(&reg, "https://s.example.com/schemas/loan/v1.2.0").unwrap(), "loan_v1");
        assert_eq!(resolve(&reg, "https://s.example.com/schemas/loan/v1.9.3").unwrap(), "loan_v1_4");
    }

    #[test]
    fn fallback_disabled_is_no_match() {
        let reg = registry(false, true);
        let err = resolve(&reg, "https://s.example.com/schemas/loan/v1.2.0").unwrap_err();
        assert!(matches!(err, VlibError::NoHelper { .. }));
        assert!(err.to_string().contains("fallback is disabled"));
    }

    #[test]
    fn major_mismatch_fails_under_every_setting() {
        for (fallback, strict) in [(true, true), (true, false), (false, true), (false, false)] {
            let reg = registry(fallback, strict);
            let err = resolve(&reg, "https://s.example.com/schemas/loan/v2.0.0").unwrap_err();
            assert!(err.to_string().contains("major-version mismatch"), "{fallback} {strict}");
            assert!(err.to_string().contains("loan/v2.0.0"));
        }
    }

    #[test]
    fn default_helper_only_without_schema() {
        let reg = registry(true, true);
        assert_eq!(reg.resolve(None, "loan").unwrap().id, "loan_v1");
        let err = reg.resolve(None, "deal").unwrap_err();
        assert!(matches!(err, VlibError::NoHelper { ref key, .. } if key == "deal"));
    }

    #[test]
    fn never_seen_entity_is_no_match() {
        let reg = registry(true, true);
        let err = reg
            .resolve(Some("https://s.example.com/schemas/deal/v1.0.0"), "deal")
            .unwrap_err();
        assert!(matches!(err, VlibError::NoHelper { .. }));
        assert!(err.to_string().contains("entity 'deal'"));
    }

    #[test]
    fn resolution_is_repeatable() {
        let reg = registry(true, true);
        let url = "https://s.example.com/schemas/loan/v1.3.1";
        assert_eq!(resolve(&reg, url).unwrap(), resolve(&reg, url).unwrap());
    }

    #[test]
    fn unknown_helper_id_fails_build() {
        let manifest = BusinessConfig::parse("default_helpers:\n  loan: loan_v7\n").unwrap();
        let err = VersionRegistry::build(&manifest, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, VlibError::HelperNotFound(ref id) if id == "loan_v7"));
    }
}
