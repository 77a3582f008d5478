use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VlibError {
    #[error("fetch failed for '{locator}': {reason}")]
    Fetch { locator: String, reason: String },

    #[error("unsupported locator '{0}': expected a relative path, file://, http:// or https://")]
    UnsupportedLocator(String),

    #[error("deployment config not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("ruleset not found: {0}")]
    RulesetNotFound(String),

    #[error("no rules in ruleset '{ruleset}' for routing key '{routing_key}' or entity type '{entity_type}'")]
    NoRules {
        ruleset: String,
        entity_type: String,
        routing_key: String,
    },

    #[error("no field-mapping helper for '{key}': {reason}")]
    NoHelper { key: String, reason: String },

    #[error("rule '{rule_id}' not found at {}", path.display())]
    RuleNotFound { rule_id: String, path: PathBuf },

    #[error("rule '{rule_id}' failed to load: {reason}")]
    RuleLoad { rule_id: String, reason: String },

    #[error("rule '{rule_id}' names unknown check implementation '{implementation}'")]
    UnknownCheck {
        rule_id: String,
        implementation: String,
    },

    #[error("helper not found: {0}")]
    HelperNotFound(String),

    #[error("cannot determine entity type: {0}")]
    EntityType(String),

    #[error("entities file '{locator}': {reason}")]
    EntitiesFile { locator: String, reason: String },

    #[error("worker pool: {0}")]
    WorkerPool(String),

    #[error("home directory not found: set HOME or logic_cache_dir")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl VlibError {
    /// Routing, resolution and load failures: the rule list for an entity
    /// could not be determined.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            VlibError::RulesetNotFound(_)
                | VlibError::NoRules { .. }
                | VlibError::NoHelper { .. }
                | VlibError::RuleNotFound { .. }
                | VlibError::RuleLoad { .. }
                | VlibError::UnknownCheck { .. }
                | VlibError::HelperNotFound(_)
                | VlibError::EntityType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VlibError>;
