//! The façade hosts embed: owns the fetcher, the engine and the worker
//! pool, and is the only place a bundle is ever refreshed.

use crate::batch::{self, default_id_fields, EntityReport, WorkerPool, WorkerSeed};
use crate::checks::CheckRegistry;
use crate::config::{ConfigResolver, CoordinationConfig, DeploymentConfig};
use crate::coordination::provider_for;
use crate::engine::{Engine, RuleDiscovery, RulesetSummary};
use crate::error::{Result, VlibError};
use crate::fetch::{LogicDir, LogicFetcher};
use crate::locator::{self, HttpClient, Locator};
use crate::rule::RuleResult;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Upper bound on an entities document fetched for `batch_file_validate`.
pub const MAX_ENTITIES_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReloadAck {
    pub status: String,
    pub message: String,
}

impl ReloadAck {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            message: "Logic reloaded successfully".to_string(),
        }
    }
}

/// Everything rebuilt from the deployment config on open and reload.
struct Loaded {
    config: DeploymentConfig,
    http: HttpClient,
    fetcher: LogicFetcher,
    coordination: CoordinationConfig,
    engine: Engine,
    loaded_at: Instant,
}

pub struct ValidationService {
    config_path: PathBuf,
    checks: Arc<CheckRegistry>,
    config: DeploymentConfig,
    http: HttpClient,
    fetcher: LogicFetcher,
    coordination: CoordinationConfig,
    engine: Engine,
    pool: Option<WorkerPool>,
    /// When the business and coordination configs were last read.
    loaded_at: Instant,
    last_check: Instant,
}

impl ValidationService {
    /// Open with the built-in checks.
    pub fn open(config_path: &Path) -> Result<Self> {
        Self::with_checks(config_path, CheckRegistry::builtin())
    }

    pub fn with_checks(config_path: &Path, checks: CheckRegistry) -> Result<Self> {
        let checks = Arc::new(checks);
        let loaded = load(config_path, &checks, false)?;
        let mut service = Self {
            config_path: config_path.to_path_buf(),
            checks,
            config: loaded.config,
            http: loaded.http,
            fetcher: loaded.fetcher,
            coordination: loaded.coordination,
            engine: loaded.engine,
            pool: None,
            loaded_at: loaded.loaded_at,
            last_check: Instant::now(),
        };
        service.pool = service.start_pool()?;
        info!(
            config = %service.config_path.display(),
            source = %service.fetcher.manifest_locator(),
            workers = service.pool.as_ref().map_or(0, WorkerPool::size),
            "validation service ready"
        );
        Ok(service)
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn logic_dir(&self) -> &LogicDir {
        self.engine.logic_dir()
    }

    fn start_pool(&self) -> Result<Option<WorkerPool>> {
        if !self.config.batch_parallelism {
            return Ok(None);
        }
        let seed = WorkerSeed {
            logic_dir: self.engine.logic_dir().clone(),
            checks: Arc::clone(&self.checks),
            coordination: self.coordination.clone(),
        };
        WorkerPool::start(&seed, self.config.worker_count()).map(Some)
    }

    /// Reload when the interval has elapsed and either the remote mirror or
    /// the config documents loaded into this service are older than the
    /// configured max age, whatever their source.
    fn check_staleness(&mut self) -> Result<()> {
        if self.last_check.elapsed() < self.config.check_interval() {
            return Ok(());
        }
        self.last_check = Instant::now();
        let max_age = self.config.max_age();
        if self.fetcher.is_stale(max_age) || self.loaded_at.elapsed() > max_age {
            info!(
                mirror_age = ?self.fetcher.cache_age(),
                loaded_secs_ago = self.loaded_at.elapsed().as_secs(),
                max_age = self.config.logic_cache_max_age_seconds,
                "logic is stale"
            );
            self.reload()?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&mut self, entity_type: &str, entity: &Value, ruleset: &str) -> Result<Vec<RuleResult>> {
        self.check_staleness()?;
        self.engine.validate(entity_type, entity, ruleset)
    }

    pub fn validate_with_data(
        &mut self,
        entity_type: &str,
        entity: &Value,
        ruleset: &str,
        required: &Map<String, Value>,
    ) -> Result<Vec<RuleResult>> {
        self.check_staleness()?;
        self.engine.validate_with_data(entity_type, entity, ruleset, required)
    }

    pub fn required_terms(&mut self, entity_type: &str, entity: &Value, ruleset: &str) -> Result<Vec<String>> {
        self.check_staleness()?;
        self.engine.required_terms(entity_type, entity, ruleset)
    }

    pub fn discover_rules(
        &mut self,
        entity_type: &str,
        entity: &Value,
        ruleset: &str,
    ) -> Result<BTreeMap<String, RuleDiscovery>> {
        self.check_staleness()?;
        self.engine.discover_rules(entity_type, entity, ruleset)
    }

    pub fn discover_rulesets(&mut self) -> Result<BTreeMap<String, RulesetSummary>> {
        self.check_staleness()?;
        Ok(self.engine.discover_rulesets())
    }

    /// Empty `id_fields` means `["id"]`. A pool that failed to start on
    /// reload is started again here; if that fails the batch fails.
    pub fn batch_validate(
        &mut self,
        entities: Vec<Value>,
        id_fields: &[String],
        ruleset: &str,
    ) -> Result<Vec<EntityReport>> {
        self.check_staleness()?;
        if self.config.batch_parallelism && self.pool.is_none() {
            self.pool = self.start_pool()?;
        }
        let defaults;
        let id_fields = if id_fields.is_empty() {
            defaults = default_id_fields();
            &defaults[..]
        } else {
            id_fields
        };
        info!(
            entities = entities.len(),
            ruleset,
            parallel = self.pool.is_some(),
            "batch validation"
        );
        batch::batch(&self.engine, self.pool.as_ref(), entities, id_fields, ruleset)
    }

    /// Batch-validate a JSON document (a list of records or one record)
    /// named by a `file://` or `http(s)://` locator.
    pub fn batch_file_validate(
        &mut self,
        file_uri: &str,
        id_fields: &[String],
        ruleset: &str,
    ) -> Result<Vec<EntityReport>> {
        let entities = self.read_entities(file_uri)?;
        self.batch_validate(entities, id_fields, ruleset)
    }

    fn read_entities(&self, file_uri: &str) -> Result<Vec<Value>> {
        let fail = |reason: String| VlibError::EntitiesFile {
            locator: file_uri.to_string(),
            reason,
        };
        let uri = file_uri.trim();
        if !(uri.starts_with("file://") || uri.starts_with("http://") || uri.starts_with("https://")) {
            return Err(fail("expected a file://, http:// or https:// locator".to_string()));
        }
        let loc = Locator::parse(uri, &config_dir(&self.config_path))?;
        let bytes = locator::read(&loc, &self.http, Some(MAX_ENTITIES_BYTES)).map_err(|e| fail(e.to_string()))?;
        match serde_json::from_slice::<Value>(&bytes).map_err(|e| fail(e.to_string()))? {
            Value::Array(items) => Ok(items),
            obj @ Value::Object(_) => Ok(vec![obj]),
            _ => Err(fail("expected a JSON list of records or a single record".to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Re-read config, force-refresh the bundle and rebuild the engine. The
    /// running pool is replaced only once the new bundle has loaded; on
    /// failure the previous engine and pool stay in service together.
    pub fn reload(&mut self) -> Result<ReloadAck> {
        let loaded = match load(&self.config_path, &self.checks, true) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "reload failed; keeping previous logic bundle");
                return Err(e);
            }
        };
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
        self.config = loaded.config;
        self.http = loaded.http;
        self.fetcher = loaded.fetcher;
        self.coordination = loaded.coordination;
        self.engine = loaded.engine;
        self.loaded_at = loaded.loaded_at;
        self.last_check = Instant::now();
        match self.start_pool() {
            Ok(pool) => self.pool = pool,
            Err(e) => warn!(error = %e, "worker pool did not restart; next batch retries"),
        }
        info!(dir = %self.logic_dir().root.display(), "logic reloaded");
        Ok(ReloadAck::ok())
    }

    /// Seconds since the bundle was fetched; `None` for local sources.
    pub fn cache_age(&self) -> Option<u64> {
        self.fetcher.cache_age()
    }

    pub fn close(mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
        info!("validation service closed");
    }
}

fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn load(config_path: &Path, checks: &Arc<CheckRegistry>, refresh: bool) -> Result<Loaded> {
    let config = DeploymentConfig::load(config_path)?;
    let dir = config_dir(config_path);
    let manifest = config.manifest_locator(&dir)?;
    let http = HttpClient::new(config.fetch_timeout())?;
    let resolver = ConfigResolver::new(config.cache_root(&dir)?, http.clone());

    let coordination_loc = config
        .coordination_service_config_uri
        .as_deref()
        .map(|uri| Locator::parse(uri, &dir))
        .transpose()?;
    let coordination = resolver.load_coordination(coordination_loc.as_ref(), refresh)?;

    let fetcher = LogicFetcher::new(manifest, resolver);
    let logic_dir = if refresh {
        fetcher.refresh()?
    } else {
        fetcher.ensure(config.max_age())?
    };
    let engine = Engine::open(
        &logic_dir,
        Arc::clone(checks),
        Arc::from(provider_for(&coordination)),
    )?;
    Ok(Loaded {
        config,
        http,
        fetcher,
        coordination,
        engine,
        loaded_at: Instant::now(),
    })
}
