mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "vlib",
    about = "Config-driven rule validation against versioned logic bundles",
    version,
    propagate_version = true
)]
struct Cli {
    /// Deployment config (default: nearest vlib.yaml upward from cwd)
    #[arg(long, global = true, env = "VLIB_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one entity; exits 1 when any rule fails or errors
    Validate {
        /// JSON file holding the entity record
        file: PathBuf,
        /// Entity type (default: derived from the record's $schema)
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long, default_value = "quick")]
        ruleset: String,
    },

    /// Validate a JSON list of entities from a path or file:// / http(s):// locator
    Batch {
        input: String,
        #[arg(long, default_value = "quick")]
        ruleset: String,
        /// Fields joined into the entity id (repeatable)
        #[arg(long = "id-field", value_name = "FIELD")]
        id_fields: Vec<String>,
    },

    /// Show which fields and reference data each rule touches
    DiscoverRules {
        file: PathBuf,
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long, default_value = "quick")]
        ruleset: String,
    },

    /// List configured rulesets with row statistics
    DiscoverRulesets,

    /// Force a fresh fetch of the logic bundle
    Reload,

    /// Seconds since the logic bundle was fetched
    CacheAge,

    /// Serve JSON-RPC 2.0 over stdin/stdout
    Serve,

    /// Inspect the deployment config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = root::resolve_config(cli.config.as_deref());

    let result = match cli.command {
        Commands::Validate {
            file,
            entity_type,
            ruleset,
        } => cmd::validate::run(&config, &file, entity_type.as_deref(), &ruleset, cli.json),
        Commands::Batch {
            input,
            ruleset,
            id_fields,
        } => cmd::batch::run(&config, &input, &id_fields, &ruleset, cli.json),
        Commands::DiscoverRules {
            file,
            entity_type,
            ruleset,
        } => cmd::discover::rules(&config, &file, entity_type.as_deref(), &ruleset, cli.json),
        Commands::DiscoverRulesets => cmd::discover::rulesets(&config, cli.json),
        Commands::Reload => cmd::lifecycle::reload(&config, cli.json),
        Commands::CacheAge => cmd::lifecycle::cache_age(&config, cli.json),
        Commands::Serve => cmd::serve::run(&config),
        Commands::Config { subcommand } => cmd::config::run(&config, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
