//! Validation engine: routing (ruleset + routing key -> rows, helper, units)
//! and execution. Read-only once opened; workers each own one.

use crate::bundle::LogicBundle;
use crate::checks::CheckRegistry;
use crate::coordination::{CoordinationProvider, DisabledProvider};
use crate::error::{Result, VlibError};
use crate::executor::{invoke, RuleExecutor};
use crate::fetch::LogicDir;
use crate::helper::FieldMappingHelper;
use crate::manifest::{contains_rule, count_rows, for_each_row, RuleRow};
use crate::rule::{RuleContext, RuleResult, RuleUnit};
use crate::schema;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// The entity field holding its schema identity.
pub const SCHEMA_FIELD: &str = "$schema";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleDiscovery {
    pub rule_id: String,
    pub entity_type: String,
    pub description: String,
    pub required_data: Vec<String>,
    /// `(logical, physical)` pairs in first-access order.
    pub field_dependencies: Vec<(String, String)>,
    pub applicable_schemas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RulesetStats {
    pub rules_by_schema: BTreeMap<String, usize>,
    pub total_rules: usize,
    pub supported_entities: Vec<String>,
    pub supported_schemas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RulesetSummary {
    pub metadata: BTreeMap<String, Value>,
    pub stats: RulesetStats,
}

/// Everything routing decided for one entity.
struct Route<'e> {
    rows: &'e [RuleRow],
    helper: Arc<FieldMappingHelper>,
    units: HashMap<String, Arc<RuleUnit>>,
}

pub struct Engine {
    bundle: LogicBundle,
    coordination: Arc<dyn CoordinationProvider>,
}

impl Engine {
    pub fn open(
        dir: &LogicDir,
        checks: Arc<CheckRegistry>,
        coordination: Arc<dyn CoordinationProvider>,
    ) -> Result<Self> {
        let bundle = LogicBundle::open(dir, checks)?;
        Ok(Self {
            bundle,
            coordination,
        })
    }

    /// An engine with coordination disabled.
    pub fn offline(dir: &LogicDir, checks: Arc<CheckRegistry>) -> Result<Self> {
        Self::open(dir, checks, Arc::new(DisabledProvider))
    }

    pub fn bundle(&self) -> &LogicBundle {
        &self.bundle
    }

    pub fn logic_dir(&self) -> &LogicDir {
        &self.bundle.dir
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    fn route(&self, entity_type: &str, entity: &Value, ruleset_name: &str) -> Result<Route<'_>> {
        let ruleset = self.bundle.manifest.ruleset(ruleset_name)?;
        let schema_id = schema_identity(entity);
        let routing_key = schema_id.unwrap_or(entity_type);

        let (matched_key, rows) = ruleset
            .rules
            .get_key_value(routing_key)
            .or_else(|| ruleset.rules.get_key_value(entity_type))
            .ok_or_else(|| VlibError::NoRules {
                ruleset: ruleset_name.to_string(),
                entity_type: entity_type.to_string(),
                routing_key: routing_key.to_string(),
            })?;

        let helper = self.bundle.registry.resolve(schema_id, entity_type)?;
        let rule_entity = schema::entity_type_of(matched_key);
        let units = self.bundle.loader.load_rows(&rule_entity, rows)?;
        debug!(
            ruleset = ruleset_name,
            routing_key = matched_key.as_str(),
            helper = helper.id.as_str(),
            rules = units.len(),
            "entity routed"
        );
        Ok(Route {
            rows,
            helper,
            units,
        })
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Vocabulary terms the resolved rules need, sorted and deduplicated.
    pub fn required_terms(&self, entity_type: &str, entity: &Value, ruleset_name: &str) -> Result<Vec<String>> {
        let route = self.route(entity_type, entity, ruleset_name)?;
        Ok(terms_of(&route.units))
    }

    /// Fetch coordination data for the resolved rules, then execute.
    pub fn validate(&self, entity_type: &str, entity: &Value, ruleset_name: &str) -> Result<Vec<RuleResult>> {
        let route = self.route(entity_type, entity, ruleset_name)?;
        let terms = terms_of(&route.units);
        let required = if terms.is_empty() {
            Map::new()
        } else {
            self.coordination.fetch(entity_type, entity, &terms)
        };
        Ok(self.execute(&route, entity, &required))
    }

    /// Execute with externally supplied coordination data.
    pub fn validate_with_data(
        &self,
        entity_type: &str,
        entity: &Value,
        ruleset_name: &str,
        required: &Map<String, Value>,
    ) -> Result<Vec<RuleResult>> {
        let route = self.route(entity_type, entity, ruleset_name)?;
        Ok(self.execute(&route, entity, required))
    }

    fn execute(&self, route: &Route<'_>, entity: &Value, required: &Map<String, Value>) -> Vec<RuleResult> {
        let view = route.helper.bind(entity);
        RuleExecutor::new(&route.units, &view, required, &self.bundle.schemas).execute(route.rows)
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    /// Run every reachable rule once against a recording view and report
    /// which logical fields it dereferenced. Statuses are discarded.
    pub fn discover_rules(
        &self,
        entity_type: &str,
        entity: &Value,
        ruleset_name: &str,
    ) -> Result<BTreeMap<String, RuleDiscovery>> {
        let route = self.route(entity_type, entity, ruleset_name)?;
        let ruleset = self.bundle.manifest.ruleset(ruleset_name)?;
        let empty = Map::new();

        let mut out = BTreeMap::new();
        for_each_row(route.rows, &mut |row: &RuleRow| {
            if out.contains_key(&row.rule_id) {
                return Ok(());
            }
            let Some(unit) = route.units.get(&row.rule_id) else {
                return Ok(());
            };
            let view = route.helper.bind_recording(entity);
            let ctx = RuleContext {
                entity: &view,
                required: &empty,
                schemas: &self.bundle.schemas,
            };
            let _ = invoke(unit, &ctx);
            let applicable_schemas = ruleset
                .rules
                .iter()
                .filter(|(key, rows)| key.contains("://") && contains_rule(rows, &unit.id))
                .map(|(key, _)| key.clone())
                .collect();
            out.insert(
                unit.id.clone(),
                RuleDiscovery {
                    rule_id: unit.id.clone(),
                    entity_type: unit.entity_type.clone(),
                    description: unit.description.clone(),
                    required_data: unit.required_data.clone(),
                    field_dependencies: view.accesses(),
                    applicable_schemas,
                },
            );
            Ok(())
        })?;
        Ok(out)
    }

    /// Configured rulesets with metadata and row statistics. Executes nothing.
    pub fn discover_rulesets(&self) -> BTreeMap<String, RulesetSummary> {
        self.bundle
            .manifest
            .rulesets
            .iter()
            .map(|(name, def)| {
                let rules_by_schema: BTreeMap<String, usize> = def
                    .rules
                    .iter()
                    .map(|(key, rows)| (key.clone(), count_rows(rows)))
                    .collect();
                let supported_entities: BTreeSet<String> =
                    def.rules.keys().map(|k| schema::entity_type_of(k)).collect();
                let stats = RulesetStats {
                    total_rules: rules_by_schema.values().sum(),
                    supported_schemas: def.rules.keys().cloned().collect(),
                    supported_entities: supported_entities.into_iter().collect(),
                    rules_by_schema,
                };
                (
                    name.clone(),
                    RulesetSummary {
                        metadata: def.metadata.clone(),
                        stats,
                    },
                )
            })
            .collect()
    }
}

/// The entity's self-declared schema identity, if any.
pub fn schema_identity(entity: &Value) -> Option<&str> {
    entity
        .get(SCHEMA_FIELD)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn terms_of(units: &HashMap<String, Arc<RuleUnit>>) -> Vec<String> {
    let terms: BTreeSet<&String> = units.values().flat_map(|u| &u.required_data).collect();
    terms.into_iter().cloned().collect()
}
