//! Hierarchical rule execution with parent -> child skip propagation.

use crate::bundle::SchemaStore;
use crate::helper::EntityView;
use crate::manifest::RuleRow;
use crate::rule::{FaultKind, RuleContext, RuleFault, RuleResult, RuleUnit, Status, Verdict};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

pub const SKIPPED_MESSAGE: &str = "parent did not pass";

pub struct RuleExecutor<'a> {
    units: &'a HashMap<String, Arc<RuleUnit>>,
    entity: &'a EntityView<'a>,
    required: &'a Map<String, Value>,
    schemas: &'a SchemaStore,
}

impl<'a> RuleExecutor<'a> {
    pub fn new(
        units: &'a HashMap<String, Arc<RuleUnit>>,
        entity: &'a EntityView<'a>,
        required: &'a Map<String, Value>,
        schemas: &'a SchemaStore,
    ) -> Self {
        Self {
            units,
            entity,
            required,
            schemas,
        }
    }

    /// One result per row, children nested, declared order preserved.
    pub fn execute(&self, rows: &[RuleRow]) -> Vec<RuleResult> {
        rows.iter().map(|row| self.run_row(row)).collect()
    }

    fn run_row(&self, row: &RuleRow) -> RuleResult {
        let Some(unit) = self.units.get(&row.rule_id) else {
            let mut result = RuleResult {
                rule_id: row.rule_id.clone(),
                description: String::new(),
                status: Status::Error,
                message: format!("rule '{}' was not loaded", row.rule_id),
                duration_ms: 0.0,
                children: Vec::new(),
            };
            result.children = row.children.iter().map(|c| self.skip_row(c)).collect();
            return result;
        };

        let required = self.required_for(unit);
        let ctx = RuleContext {
            entity: self.entity,
            required: &required,
            schemas: self.schemas,
        };
        let start = Instant::now();
        let verdict = match invoke(unit, &ctx) {
            Ok(v) => v,
            Err(fault) => Verdict {
                status: Status::Error,
                message: fault.to_string(),
            },
        };
        let duration_ms = round_ms(start.elapsed().as_secs_f64() * 1000.0);

        let children = if verdict.status.is_passing() {
            self.execute(&row.children)
        } else {
            row.children.iter().map(|c| self.skip_row(c)).collect()
        };
        RuleResult {
            rule_id: row.rule_id.clone(),
            description: unit.description.clone(),
            status: verdict.status,
            message: verdict.message,
            duration_ms,
            children,
        }
    }

    fn skip_row(&self, row: &RuleRow) -> RuleResult {
        RuleResult {
            rule_id: row.rule_id.clone(),
            description: self
                .units
                .get(&row.rule_id)
                .map(|u| u.description.clone())
                .unwrap_or_default(),
            status: Status::Norun,
            message: SKIPPED_MESSAGE.to_string(),
            duration_ms: 0.0,
            children: row.children.iter().map(|c| self.skip_row(c)).collect(),
        }
    }

    /// Coordination data restricted to the terms the rule declared.
    fn required_for(&self, unit: &RuleUnit) -> Map<String, Value> {
        unit.required_data
            .iter()
            .filter_map(|term| self.required.get(term).map(|v| (term.clone(), v.clone())))
            .collect()
    }
}

/// Run a check; panics become faults.
pub fn invoke(unit: &RuleUnit, ctx: &RuleContext<'_>) -> Result<Verdict, RuleFault> {
    match catch_unwind(AssertUnwindSafe(|| (unit.check)(ctx))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(RuleFault::new(FaultKind::Panic, msg))
        }
    }
}

fn round_ms(ms: f64) -> f64 {
    (ms * 1000.0).round() / 1000.0
}
