use crate::output::{count_failures, print_json, print_table};
use anyhow::Context;
use std::path::Path;
use vlib_core::batch::EntityReport;

pub fn run(
    config: &Path,
    input: &str,
    id_fields: &[String],
    ruleset: &str,
    json: bool,
) -> anyhow::Result<()> {
    let locator = to_locator(input)?;
    let mut service = super::open_service(config)?;
    let reports = service.batch_file_validate(&locator, id_fields, ruleset)?;
    service.close();

    if json {
        return print_json(&reports);
    }
    let rows = reports.iter().map(summary_row).collect();
    print_table(&["ENTITY", "TYPE", "OUTCOME"], rows);
    let errored = reports.iter().filter(|r| r.error.is_some()).count();
    println!("\n{} entities, {errored} not validated", reports.len());
    Ok(())
}

/// Plain paths become absolute `file://` locators.
fn to_locator(input: &str) -> anyhow::Result<String> {
    if input.contains("://") {
        return Ok(input.to_string());
    }
    let path = std::fs::canonicalize(input).with_context(|| format!("cannot read {input}"))?;
    Ok(format!("file://{}", path.display()))
}

fn summary_row(report: &EntityReport) -> Vec<String> {
    let outcome = match (&report.results, &report.error) {
        (_, Some(error)) => format!("error: {error}"),
        (Some(results), None) => match count_failures(results) {
            0 => "ok".to_string(),
            n => format!("{n} failing"),
        },
        (None, None) => String::new(),
    };
    vec![report.entity_id.clone(), report.entity_type.clone(), outcome]
}
