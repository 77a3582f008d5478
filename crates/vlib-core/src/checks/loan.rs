use super::CheckRegistry;
use crate::rule::{RuleContext, RuleFault, Verdict};
use serde_json::Value;

pub const VALID_STATUSES: [&str; 4] = ["active", "paid_off", "defaulted", "written_off"];

/// Share of the parent facility limit above which a loan is flagged WARN.
const LIMIT_WARN_RATIO: f64 = 0.9;

pub fn register(reg: &mut CheckRegistry) {
    reg.register("loan.schema_conformance", schema_conformance)
        .register("loan.financial_soundness", financial_soundness)
        .register("loan.status_valid", status_valid)
        .register("loan.balance_constraints", balance_constraints)
        .register("loan.parent_facility_limit", parent_facility_limit);
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

fn schema_conformance(ctx: &RuleContext<'_>) -> Result<Verdict, RuleFault> {
    let data = ctx.entity.data();
    let Some(url) = data.get("$schema").and_then(Value::as_str) else {
        return Ok(Verdict::fail("Entity data missing required $schema field"));
    };
    let validator = match ctx.schemas.validator(url) {
        None => {
            return Ok(Verdict::norun(format!(
                "Schema {url} is not shipped with the logic bundle"
            )))
        }
        Some(Err(e)) => {
            return Ok(Verdict::norun(format!("Schema {url} could not be compiled: {e}")))
        }
        Some(Ok(v)) => v,
    };
    let errors: Vec<String> = validator.iter_errors(data).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(Verdict::pass())
    } else {
        Ok(Verdict::fail(format!(
            "Schema validation failed: {}",
            errors.join("; ")
        )))
    }
}

fn financial_soundness(ctx: &RuleContext<'_>) -> Result<Verdict, RuleFault> {
    let e = ctx.entity;
    let Some(principal) = e.number("principal")? else {
        return Ok(Verdict::norun("Cannot access principal amount: field is missing"));
    };

    let mut errors = Vec::new();
    if principal <= 0.0 {
        errors.push(format!("Principal amount must be positive, got {principal}"));
    }
    if let Some(rate) = e.number("rate")? {
        if rate < 0.0 {
            errors.push(format!("Interest rate cannot be negative, got {rate}"));
        }
    }
    match (e.date("inception")?, e.date("maturity")?) {
        (Some(inception), Some(maturity)) if maturity <= inception => errors.push(format!(
            "Maturity date ({maturity}) must be after inception date ({inception})"
        )),
        (Some(_), Some(_)) => {}
        _ => errors.push("Missing required date fields (inception or maturity)".to_string()),
    }
    if let Some(balance) = e.number("balance")? {
        if balance > principal {
            errors.push(format!(
                "Outstanding balance ({balance}) exceeds original principal ({principal})"
            ));
        }
    }

    if errors.is_empty() {
        Ok(Verdict::pass())
    } else {
        Ok(Verdict::fail(errors.join("; ")))
    }
}

fn status_valid(ctx: &RuleContext<'_>) -> Result<Verdict, RuleFault> {
    match ctx.entity.text("status")? {
        None => Ok(Verdict::fail("Loan status is missing")),
        Some(s) if !VALID_STATUSES.contains(&s.as_str()) => Ok(Verdict::fail(format!(
            "Invalid loan status '{s}'. Must be one of: {}",
            VALID_STATUSES.join(", ")
        ))),
        Some(_) => Ok(Verdict::pass()),
    }
}

fn balance_constraints(ctx: &RuleContext<'_>) -> Result<Verdict, RuleFault> {
    let e = ctx.entity;
    let status = e.text("status")?.unwrap_or_default();
    let Some(principal) = e.number("principal")? else {
        return Ok(Verdict::norun("Cannot access principal amount: field is missing"));
    };
    let balance = e.number("balance")?.unwrap_or(0.0);

    if balance > principal {
        return Ok(Verdict::fail(format!(
            "Outstanding balance ({balance}) exceeds principal amount ({principal})"
        )));
    }
    match status.as_str() {
        "paid_off" if balance != 0.0 => Ok(Verdict::fail(format!(
            "Paid-off loan must have zero balance, got {balance}"
        ))),
        "active" if balance == 0.0 => Ok(Verdict::fail(
            "Active loan cannot have zero outstanding balance",
        )),
        _ => Ok(Verdict::pass()),
    }
}

fn parent_facility_limit(ctx: &RuleContext<'_>) -> Result<Verdict, RuleFault> {
    let Some(parent) = ctx.required("parent") else {
        return Ok(Verdict::norun("Parent facility data not available"));
    };
    let limit = parent
        .get("limit")
        .or_else(|| parent.pointer("/financial/limit"))
        .and_then(Value::as_f64);
    let Some(limit) = limit else {
        return Ok(Verdict::norun("Parent facility data has no limit"));
    };
    let Some(principal) = ctx.entity.number("principal")? else {
        return Ok(Verdict::norun("Cannot access principal amount: field is missing"));
    };

    if principal > limit {
        Ok(Verdict::fail(format!(
            "Principal ({principal}) exceeds parent facility limit ({limit})"
        )))
    } else if limit > 0.0 && principal > limit * LIMIT_WARN_RATIO {
        Ok(Verdict::warn(format!(
            "Principal uses {:.0}% of parent facility limit ({limit})",
            principal / limit * 100.0
        )))
    } else {
        Ok(Verdict::pass())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::SchemaStore;
    use crate::helper::FieldMappingHelper;
    use crate::rule::{FaultKind, Status};
    use crate::test_support;
    use serde_json::{json, Map};

    fn schemas() -> SchemaStore {
        let mut store = SchemaStore::default();
        store.insert(test_support::V1, serde_json::from_str(test_support::SCHEMA_V1).unwrap());
        store
    }

    fn run(check: crate::rule::CheckFn, data: &Value, required: &Map<String, Value>) -> Result<Verdict, RuleFault> {
        let helper = FieldMappingHelper::parse("loan_v1", test_support::HELPER_V1).unwrap();
        let view = helper.bind(data);
        let store = schemas();
        let ctx = RuleContext {
            entity: &view,
            required,
            schemas: &store,
        };
        check(&ctx)
    }

    fn loan() -> Value {
        test_support::loan_ok()
    }

    #[test]
    fn schema_conformance_passes_valid_loan() {
        let v = run(schema_conformance, &loan(), &Map::new()).unwrap();
        assert_eq!(v, Verdict::pass());
    }

    #[test]
    fn schema_conformance_requires_schema_field() {
        let v = run(schema_conformance, &json!({"id": "LOAN-1"}), &Map::new()).unwrap();
        assert_eq!(v.status, Status::Fail);
        assert_eq!(v.message, "Entity data missing required $schema field");
    }

    #[test]
    fn schema_conformance_rejects_string_notes() {
        let mut data = loan();
        data["notes"] = json!("Some old-style freeform note");
        let v = run(schema_conformance, &data, &Map::new()).unwrap();
        assert_eq!(v.status, Status::Fail);
        assert!(v.message.starts_with("Schema validation failed"));
    }

    #[test]
    fn schema_conformance_accepts_notes_without_operation_type() {
        let mut data = loan();
        data["notes"] = json!([{"datetime": "2024-06-01T10:00:00Z", "text": "Review"}]);
        assert_eq!(run(schema_conformance, &data, &Map::new()).unwrap().status, Status::Pass);
    }

    #[test]
    fn schema_conformance_norun_for_unknown_schema() {
        let mut data = loan();
        data["$schema"] = json!("https://schemas.example.com/schemas/loan/v1.7.0");
        let v = run(schema_conformance, &data, &Map::new()).unwrap();
        assert_eq!(v.status, Status::Norun);
        assert!(v.message.contains("v1.7.0"));
    }

    #[test]
    fn financial_soundness_collects_every_error() {
        let mut data = loan();
        data["financial"]["principal_amount"] = json!(-5.0);
        data["financial"]["interest_rate"] = json!(-0.01);
        data["dates"]["maturity_date"] = json!("2020-01-01");
        let v = run(financial_soundness, &data, &Map::new()).unwrap();
        assert_eq!(v.status, Status::Fail);
        assert_eq!(v.message.matches("; ").count(), 3);
        assert!(v.message.contains("Principal amount must be positive, got -5"));
        assert!(v.message.contains("Interest rate cannot be negative"));
        assert!(v.message.contains("Maturity date (2020-01-01) must be after inception date (2024-01-15)"));
    }

    #[test]
    fn financial_soundness_passes_sound_loan() {
        assert_eq!(run(financial_soundness, &loan(), &Map::new()).unwrap(), Verdict::pass());
    }

    #[test]
    fn financial_soundness_bad_date_is_fault() {
        let mut data = loan();
        data["dates"]["origination_date"] = json!(20240115);
        let fault = run(financial_soundness, &data, &Map::new()).unwrap_err();
        assert_eq!(fault.kind, FaultKind::Coercion);
    }

    #[test]
    fn status_valid_rejects_unknown_status() {
        let mut data = loan();
        data["status"] = json!("pending");
        let v = run(status_valid, &data, &Map::new()).unwrap();
        assert_eq!(
            v.message,
            "Invalid loan status 'pending'. Must be one of: active, paid_off, defaulted, written_off"
        );
        data["status"] = Value::Null;
        assert_eq!(run(status_valid, &data, &Map::new()).unwrap().message, "Loan status is missing");
    }

    #[test]
    fn balance_constraints_by_status() {
        let mut data = loan();
        assert_eq!(run(balance_constraints, &data, &Map::new()).unwrap(), Verdict::pass());

        data["status"] = json!("paid_off");
        let v = run(balance_constraints, &data, &Map::new()).unwrap();
        assert_eq!(v.message, "Paid-off loan must have zero balance, got 180000");

        data["status"] = json!("active");
        data["financial"]["outstanding_balance"] = json!(0.0);
        let v = run(balance_constraints, &data, &Map::new()).unwrap();
        assert_eq!(v.message, "Active loan cannot have zero outstanding balance");

        data["financial"]["outstanding_balance"] = json!(300000.0);
        let v = run(balance_constraints, &data, &Map::new()).unwrap();
        assert_eq!(v.status, Status::Fail);
        assert!(v.message.contains("exceeds principal amount"));
    }

    #[test]
    fn parent_limit_needs_coordination_data() {
        let v = run(parent_facility_limit, &loan(), &Map::new()).unwrap();
        assert_eq!(v.status, Status::Norun);

        let mut required = Map::new();
        required.insert("parent".into(), json!({"limit": 1_000_000.0}));
        assert_eq!(run(parent_facility_limit, &loan(), &required).unwrap(), Verdict::pass());

        required.insert("parent".into(), json!({"financial": {"limit": 260_000.0}}));
        assert_eq!(run(parent_facility_limit, &loan(), &required).unwrap().status, Status::Warn);

        required.insert("parent".into(), json!({"limit": 100_000.0}));
        assert_eq!(run(parent_facility_limit, &loan(), &required).unwrap().status, Status::Fail);
    }
}
