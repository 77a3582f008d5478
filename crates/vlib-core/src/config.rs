use crate::error::{Result, VlibError};
use crate::io::atomic_write;
use crate::locator::{self, HttpClient, Locator};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// DeploymentConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_config_uri: Option<String>,

    /// Legacy: directory (path or URL) holding the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic_directory_location: Option<String>,
    /// Legacy: manifest file name inside `logic_directory_location`.
    #[serde(default = "default_manifest_file")]
    pub business_config_filename: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordination_service_config_uri: Option<String>,

    #[serde(default = "default_max_age")]
    pub logic_cache_max_age_seconds: u64,
    #[serde(default = "default_check_interval")]
    pub staleness_check_interval_seconds: u64,

    #[serde(default)]
    pub batch_parallelism: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_max_workers: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic_cache_dir: Option<PathBuf>,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
}

fn default_manifest_file() -> String {
    paths::DEFAULT_MANIFEST_FILE.to_string()
}

fn default_max_age() -> u64 {
    1800
}

fn default_check_interval() -> u64 {
    300
}

fn default_fetch_timeout() -> u64 {
    10
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            business_config_uri: None,
            logic_directory_location: None,
            business_config_filename: default_manifest_file(),
            coordination_service_config_uri: None,
            logic_cache_max_age_seconds: default_max_age(),
            staleness_check_interval_seconds: default_check_interval(),
            batch_parallelism: false,
            batch_max_workers: None,
            logic_cache_dir: None,
            fetch_timeout_seconds: default_fetch_timeout(),
        }
    }
}

impl DeploymentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VlibError::ConfigNotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: DeploymentConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// The manifest locator string: `business_config_uri`, else the legacy
    /// directory + file name pair.
    pub fn manifest_uri(&self) -> Option<String> {
        if let Some(uri) = &self.business_config_uri {
            return Some(uri.clone());
        }
        let dir = self.logic_directory_location.as_ref()?;
        let sep = if dir.ends_with('/') { "" } else { "/" };
        Some(format!("{dir}{sep}{}", self.business_config_filename))
    }

    /// Relative locators resolve against the directory holding this config.
    pub fn manifest_locator(&self, config_dir: &Path) -> Result<Locator> {
        let uri = self.manifest_uri().ok_or_else(|| {
            VlibError::InvalidConfig(
                "business_config_uri (or logic_directory_location) is not set".to_string(),
            )
        })?;
        Locator::parse(&uri, config_dir)
    }

    pub fn cache_root(&self, config_dir: &Path) -> Result<PathBuf> {
        match &self.logic_cache_dir {
            Some(dir) if dir.is_absolute() => Ok(dir.clone()),
            Some(dir) => Ok(config_dir.join(dir)),
            None => paths::default_cache_root(),
        }
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.logic_cache_max_age_seconds)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.staleness_check_interval_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    /// Worker count for parallel batches; unset means available CPUs.
    pub fn worker_count(&self) -> usize {
        match self.batch_max_workers {
            Some(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        match self.manifest_uri() {
            None => warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "business_config_uri is not set".to_string(),
            }),
            Some(uri) => match Locator::parse(&uri, Path::new(".")) {
                Err(e) => warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: e.to_string(),
                }),
                Ok(loc) if loc.is_remote() && self.logic_cache_dir.is_none() => {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "remote business config '{uri}' uses the shared default cache root; \
                             set logic_cache_dir to a directory unique to this source"
                        ),
                    })
                }
                Ok(_) => {}
            },
        }

        if self.business_config_uri.is_some() && self.logic_directory_location.is_some() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "logic_directory_location is ignored when business_config_uri is set"
                    .to_string(),
            });
        }

        if let Some(uri) = &self.coordination_service_config_uri {
            if let Err(e) = Locator::parse(uri, Path::new(".")) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: e.to_string(),
                });
            }
        }

        match self.batch_max_workers {
            Some(0) => warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "batch_max_workers=0 falls back to the CPU count".to_string(),
            }),
            Some(n) if n > 64 => warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("batch_max_workers={n} (>64 is unusual)"),
            }),
            _ => {}
        }

        if self.staleness_check_interval_seconds > self.logic_cache_max_age_seconds {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "staleness_check_interval_seconds ({}) exceeds logic_cache_max_age_seconds ({}); \
                     stale bundles may be served past their max age",
                    self.staleness_check_interval_seconds, self.logic_cache_max_age_seconds
                ),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// CoordinationConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_retry_attempts() -> u32 {
    3
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigResolver
// ---------------------------------------------------------------------------

/// Resolves config documents from local paths or remote URLs. Remote
/// documents are cached under `<cache_root>/config/`, keyed by a hash of the
/// locator, separately from the bundle mirror.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    cache_root: PathBuf,
    http: HttpClient,
}

impl ConfigResolver {
    pub fn new(cache_root: PathBuf, http: HttpClient) -> Self {
        Self { cache_root, http }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Local documents are always read live. Remote documents come from the
    /// cache unless `refresh` is set or no cached copy exists.
    pub fn load_text(&self, locator: &Locator, refresh: bool) -> Result<String> {
        let url = match locator {
            Locator::Path(_) => return locator::read_to_string(locator, &self.http),
            Locator::Http(url) => url,
        };
        let cached = paths::config_cache_path(&self.cache_root, url);
        if !refresh && cached.exists() {
            debug!(locator = %url, "config cache hit");
            return Ok(std::fs::read_to_string(&cached)?);
        }
        info!(locator = %url, "fetching remote config");
        let text = locator::read_to_string(locator, &self.http)?;
        atomic_write(&cached, text.as_bytes())?;
        Ok(text)
    }

    /// Unset locator means coordination is disabled.
    pub fn load_coordination(&self, locator: Option<&Locator>, refresh: bool) -> Result<CoordinationConfig> {
        let Some(locator) = locator else {
            return Ok(CoordinationConfig::default());
        };
        let text = self.load_text(locator, refresh)?;
        // YAML is a superset of JSON; either document format parses.
        let cfg: CoordinationConfig = serde_yaml::from_str(&text)?;
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
