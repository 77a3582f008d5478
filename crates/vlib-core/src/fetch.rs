//! Logic bundle fetcher: resolves a manifest locator into a local logic
//! directory. Local sources pass through live; remote sources are mirrored
//! under `<cache_root>/logic/`.

use crate::config::ConfigResolver;
use crate::error::Result;
use crate::io::{atomic_write, ensure_dir, write_if_missing};
use crate::locator::{self, Locator};
use crate::manifest::BusinessConfig;
use crate::paths;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// A resolved logic directory ready to be opened as a bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicDir {
    pub root: PathBuf,
    pub manifest_file: String,
    pub remote: bool,
}

impl LogicDir {
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.manifest_file)
    }
}

/// Files a bundle needs, split by cache policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequiredFiles {
    /// Re-fetched on every refresh.
    pub structural: BTreeSet<String>,
    /// Immutable once published: fetched only when missing.
    pub content: BTreeSet<String>,
}

/// Structural files plus every rule, helper and schema the manifest references.
pub fn derive_required_files(manifest: &BusinessConfig) -> RequiredFiles {
    let structural = manifest.structural_files.iter().cloned().collect();
    let mut content = BTreeSet::new();
    for (entity, rule_id) in manifest.rule_refs() {
        content.insert(paths::rule_relpath(&entity, &rule_id));
    }
    for helper in manifest.helper_ids() {
        content.insert(paths::helper_relpath(&helper));
    }
    content.extend(manifest.schemas.values().cloned());
    RequiredFiles {
        structural,
        content,
    }
}

pub struct LogicFetcher {
    manifest: Locator,
    resolver: ConfigResolver,
}

impl LogicFetcher {
    pub fn new(manifest: Locator, resolver: ConfigResolver) -> Self {
        Self { manifest, resolver }
    }

    pub fn manifest_locator(&self) -> &Locator {
        &self.manifest
    }

    pub fn is_remote(&self) -> bool {
        self.manifest.is_remote()
    }

    fn mirror(&self) -> PathBuf {
        paths::mirror_dir(self.resolver.cache_root())
    }

    fn manifest_file(&self) -> String {
        self.manifest
            .file_name()
            .unwrap_or_else(|| paths::DEFAULT_MANIFEST_FILE.to_string())
    }

    /// Local mode returns the source directory. Remote mode reuses the mirror
    /// while it is younger than `max_age`, otherwise refreshes it.
    pub fn ensure(&self, max_age: Duration) -> Result<LogicDir> {
        match &self.manifest {
            Locator::Path(path) => Ok(local_dir(path)),
            Locator::Http(_) => {
                if self.is_stale(max_age) {
                    self.refresh()
                } else {
                    debug!(locator = %self.manifest, "using cached logic mirror");
                    Ok(self.mirror_dir())
                }
            }
        }
    }

    /// Force a fetch. In local mode this only re-resolves the directory.
    pub fn refresh(&self) -> Result<LogicDir> {
        let url = match &self.manifest {
            Locator::Path(path) => return Ok(local_dir(path)),
            Locator::Http(url) => url,
        };
        info!(locator = %url, "refreshing logic bundle");

        let text = self.resolver.load_text(&self.manifest, true)?;
        let manifest = BusinessConfig::parse(&text)?;
        let mirror = self.mirror();
        let files = derive_required_files(&manifest);

        // Nothing touches the mirror until every file is in hand.
        let mut structural = Vec::with_capacity(files.structural.len());
        for rel in &files.structural {
            structural.push((rel, self.fetch_file(rel)?));
        }
        let mut content = Vec::new();
        for rel in &files.content {
            if !mirror.join(rel).exists() {
                content.push((rel, self.fetch_file(rel)?));
            }
        }

        // Content first, then structural files; manifest and stamp last.
        ensure_dir(&mirror)?;
        for (rel, bytes) in &content {
            write_if_missing(&mirror.join(rel), bytes)?;
        }
        for (rel, bytes) in &structural {
            atomic_write(&mirror.join(rel), bytes)?;
        }
        atomic_write(&mirror.join(self.manifest_file()), text.as_bytes())?;
        let stamp = Utc::now().to_rfc3339();
        atomic_write(&paths::fetched_at_path(self.resolver.cache_root()), stamp.as_bytes())?;

        info!(
            structural = files.structural.len(),
            content_fetched = content.len(),
            content_cached = files.content.len() - content.len(),
            "logic bundle refreshed"
        );
        Ok(self.mirror_dir())
    }

    fn fetch_file(&self, relative: &str) -> Result<Vec<u8>> {
        let loc = self.manifest.sibling(relative)?;
        locator::read(&loc, self.resolver.http(), None)
    }

    fn mirror_dir(&self) -> LogicDir {
        LogicDir {
            root: self.mirror(),
            manifest_file: self.manifest_file(),
            remote: true,
        }
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        if !self.is_remote() {
            return None;
        }
        let raw = std::fs::read_to_string(paths::fetched_at_path(self.resolver.cache_root())).ok()?;
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Seconds since the mirror was fetched; `None` in local mode or before
    /// the first fetch.
    pub fn cache_age(&self) -> Option<u64> {
        let fetched = self.fetched_at()?;
        let age = Utc::now().signed_duration_since(fetched).num_seconds();
        Some(age.max(0) as u64)
    }

    /// Local sources are never stale. A mirror without a stamp or with a
    /// missing manifest always is.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        if !self.is_remote() {
            return false;
        }
        if !self.mirror().join(self.manifest_file()).exists() {
            return true;
        }
        match self.cache_age() {
            Some(age) => age > max_age.as_secs(),
            None => true,
        }
    }
}

fn local_dir(manifest: &Path) -> LogicDir {
    LogicDir {
        root: manifest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
        manifest_file: manifest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| paths::DEFAULT_MANIFEST_FILE.to_string()),
        remote: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VlibError;
    use crate::locator::HttpClient;
    use crate::test_support;
    use tempfile::TempDir;

    fn fetcher_for(server_url: &str, cache: &Path) -> LogicFetcher {
        let http = HttpClient::new(Duration::from_secs(5)).unwrap();
        let resolver = ConfigResolver::new(cache.to_path_buf(), http);
        let loc = Locator::Http(format!("{server_url}/logic/business-config.yaml"));
        LogicFetcher::new(loc, resolver)
    }

    /// Serve every demo bundle file from the mock server.
    fn serve_bundle(server: &mut mockito::ServerGuard) -> Vec<mockito::Mock> {
        test_support::BUNDLE_FILES
            .iter()
            .map(|(rel, body)| {
                server
                    .mock("GET", format!("/logic/{rel}").as_str())
                    .with_status(200)
                    .with_body(*body)
                    .create()
            })
            .collect()
    }

    #[test]
    fn derive_required_files_covers_rules_helpers_schemas() {
        let manifest = BusinessConfig::parse(test_support::MANIFEST).unwrap();
        let files = derive_required_files(&manifest);
        assert!(files.structural.contains("README.md"));
        assert!(files.content.contains("rules/loan/rule_001_v1.yaml"));
        assert!(files.content.contains("rules/loan/rule_004_v1.yaml"));
        assert!(files.content.contains("entity_helpers/loan_v1.yaml"));
        assert!(files.content.contains("entity_helpers/loan_v2.yaml"));
        assert!(files.content.contains("schemas/loan.v1.0.0.json"));
    }

    #[test]
    fn local_mode_passes_through_without_cache() {
        let dir = TempDir::new().unwrap();
        let logic = test_support::write_bundle(dir.path());
        let http = HttpClient::new(Duration::from_secs(1)).unwrap();
        let resolver = ConfigResolver::new(dir.path().join("cache"), http);
        let fetcher = LogicFetcher::new(Locator::Path(logic.manifest_path()), resolver);

        let got = fetcher.ensure(Duration::from_secs(0)).unwrap();
        assert_eq!(got, logic);
        assert!(!got.remote);
        assert_eq!(fetcher.cache_age(), None);
        assert!(!fetcher.is_stale(Duration::from_secs(0)));
        assert!(!dir.path().join("cache").exists());
    }

    #[test]
    fn remote_mode_mirrors_bundle_and_stamps() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new();
        let _mocks = serve_bundle(&mut server);
        let fetcher = fetcher_for(&server.url(), dir.path());

        let logic = fetcher.ensure(Duration::from_secs(1800)).unwrap();
        assert!(logic.remote);
        assert!(logic.manifest_path().exists());
        assert!(logic.root.join("rules/loan/rule_003_v1.yaml").exists());
        assert!(logic.root.join("entity_helpers/loan_v1.yaml").exists());
        assert!(logic.root.join("schemas/loan.v1.0.0.json").exists());
        assert!(logic.root.join("README.md").exists());
        assert!(fetcher.cache_age().unwrap() < 60);
        assert!(!fetcher.is_stale(Duration::from_secs(1800)));
    }

    #[test]
    fn fresh_mirror_is_reused_without_network() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new();
        let manifest_mock = server
            .mock("GET", "/logic/business-config.yaml")
            .with_status(200)
            .with_body(test_support::MANIFEST)
            .expect(1)
            .create();
        let _rest: Vec<_> = test_support::BUNDLE_FILES
            .iter()
            .filter(|(rel, _)| *rel != "business-config.yaml")
            .map(|(rel, body)| {
                server
                    .mock("GET", format!("/logic/{rel}").as_str())
                    .with_body(*body)
                    .create()
            })
            .collect();
        let fetcher = fetcher_for(&server.url(), dir.path());

        fetcher.ensure(Duration::from_secs(1800)).unwrap();
        fetcher.ensure(Duration::from_secs(1800)).unwrap();
        manifest_mock.assert();
    }

    #[test]
    fn content_files_are_not_refetched() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new();
        let rule_mock = server
            .mock("GET", "/logic/rules/loan/rule_001_v1.yaml")
            .with_body(test_support::RULE_001)
            .expect(1)
            .create();
        let readme_mock = server
            .mock("GET", "/logic/README.md")
            .with_body(test_support::README)
            .expect(2)
            .create();
        let _rest: Vec<_> = test_support::BUNDLE_FILES
            .iter()
            .filter(|(rel, _)| *rel != "rules/loan/rule_001_v1.yaml" && *rel != "README.md")
            .map(|(rel, body)| {
                server
                    .mock("GET", format!("/logic/{rel}").as_str())
                    .with_body(*body)
                    .create()
            })
            .collect();
        let fetcher = fetcher_for(&server.url(), dir.path());

        let first = fetcher.refresh().unwrap();
        let before = test_support::snapshot(&first.root);
        let second = fetcher.refresh().unwrap();
        assert_eq!(test_support::snapshot(&second.root), before);
        rule_mock.assert();
        readme_mock.assert();
    }

    #[test]
    fn missing_remote_file_is_a_fetch_error() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new();
        let _manifest = server
            .mock("GET", "/logic/business-config.yaml")
            .with_body(test_support::MANIFEST)
            .create();
        let fetcher = fetcher_for(&server.url(), dir.path());

        let err = fetcher.refresh().unwrap_err();
        assert!(matches!(err, VlibError::Fetch { .. }));
        assert!(err.to_string().contains("/logic/"));
    }

    #[test]
    fn failed_refresh_leaves_mirror_untouched() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new();
        let _mocks = serve_bundle(&mut server);
        fetcher_for(&server.url(), dir.path()).refresh().unwrap();
        let mirror = paths::mirror_dir(dir.path());
        let before = test_support::snapshot(&mirror);

        // A republished manifest naming a rule the server cannot deliver.
        let republished = test_support::MANIFEST.replacen(
            "        - rule_id: rule_001_v1\n",
            "        - rule_id: rule_001_v1\n        - rule_id: rule_006_v1\n",
            1,
        );
        let _next = server
            .mock("GET", "/next/business-config.yaml")
            .with_body(republished)
            .create();
        let _readme = server
            .mock("GET", "/next/README.md")
            .with_body("changed readme\n")
            .create();
        let http = HttpClient::new(Duration::from_secs(5)).unwrap();
        let resolver = ConfigResolver::new(dir.path().to_path_buf(), http);
        let next = LogicFetcher::new(
            Locator::Http(format!("{}/next/business-config.yaml", server.url())),
            resolver,
        );

        let err = next.refresh().unwrap_err();
        assert!(err.to_string().contains("rule_006_v1"));
        assert_eq!(test_support::snapshot(&mirror), before);
    }
}
