use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use vlib_core::config::{DeploymentConfig, WarnLevel};

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the resolved deployment config
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(config: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(config, json),
        ConfigSubcommand::Validate => validate(config, json),
    }
}

fn load(path: &Path) -> anyhow::Result<DeploymentConfig> {
    DeploymentConfig::load(path).context("failed to load config")
}

fn show(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load(path)?;
    if json {
        return print_json(&config);
    }
    println!("# {}", path.display());
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn validate(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load(path)?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    let has_errors = warnings.iter().any(|w| w.level == WarnLevel::Error);
    if has_errors {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}
