use crate::output::{count_failures, print_json, print_table, result_rows};
use std::path::Path;

pub fn run(
    config: &Path,
    file: &Path,
    entity_type: Option<&str>,
    ruleset: &str,
    json: bool,
) -> anyhow::Result<()> {
    let (entity, entity_type) = super::read_entity(file, entity_type)?;
    let mut service = super::open_service(config)?;
    let results = service.validate(&entity_type, &entity, ruleset)?;
    service.close();

    if json {
        print_json(&results)?;
    } else {
        print_table(&["RULE", "STATUS", "MESSAGE"], result_rows(&results));
    }

    let failed = count_failures(&results);
    if failed > 0 {
        anyhow::bail!("{failed} rule(s) failed or errored");
    }
    Ok(())
}
