pub mod batch;
pub mod config;
pub mod discover;
pub mod lifecycle;
pub mod serve;
pub mod validate;

use anyhow::Context;
use serde_json::Value;
use std::path::Path;
use vlib_core::batch::determine_entity_type;
use vlib_core::ValidationService;

pub(crate) fn open_service(config: &Path) -> anyhow::Result<ValidationService> {
    ValidationService::open(config)
        .with_context(|| format!("failed to open validation service from {}", config.display()))
}

/// Read an entity record and settle its type: the explicit one, else the
/// one its `$schema` names.
pub(crate) fn read_entity(file: &Path, entity_type: Option<&str>) -> anyhow::Result<(Value, String)> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let entity: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    let entity_type = match entity_type {
        Some(t) => t.to_string(),
        None => determine_entity_type(&entity).context("pass --entity-type")?,
    };
    Ok((entity, entity_type))
}
