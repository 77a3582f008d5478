use crate::output::{print_json, print_table};
use std::path::Path;

pub fn rules(
    config: &Path,
    file: &Path,
    entity_type: Option<&str>,
    ruleset: &str,
    json: bool,
) -> anyhow::Result<()> {
    let (entity, entity_type) = super::read_entity(file, entity_type)?;
    let mut service = super::open_service(config)?;
    let found = service.discover_rules(&entity_type, &entity, ruleset)?;
    service.close();

    if json {
        return print_json(&found);
    }
    let rows = found
        .values()
        .map(|d| {
            let fields: Vec<&str> = d.field_dependencies.iter().map(|(l, _)| l.as_str()).collect();
            vec![
                d.rule_id.clone(),
                d.entity_type.clone(),
                d.required_data.join(","),
                fields.join(","),
            ]
        })
        .collect();
    print_table(&["RULE", "ENTITY", "REQUIRES", "FIELDS"], rows);
    Ok(())
}

pub fn rulesets(config: &Path, json: bool) -> anyhow::Result<()> {
    let mut service = super::open_service(config)?;
    let sets = service.discover_rulesets()?;
    service.close();

    if json {
        return print_json(&sets);
    }
    let rows = sets
        .iter()
        .map(|(name, s)| {
            vec![
                name.clone(),
                s.stats.total_rules.to_string(),
                s.stats.supported_entities.join(","),
                s.metadata
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            ]
        })
        .collect();
    print_table(&["RULESET", "RULES", "ENTITIES", "DESCRIPTION"], rows);
    Ok(())
}
