use crate::error::{Result, VlibError};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a config document or bundle file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Path(PathBuf),
    Http(String),
}

impl Locator {
    /// Resolution order: http(s) URL, `file://` URL, then a plain path.
    /// Relative paths (including relative `file://` paths) resolve against
    /// `base_dir`. Any other scheme is rejected.
    pub fn parse(raw: &str, base_dir: &Path) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(VlibError::UnsupportedLocator(raw.to_string()));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Locator::Http(raw.to_string()));
        }
        let path = match raw.strip_prefix("file://") {
            Some(rest) => PathBuf::from(rest),
            None if raw.contains("://") => {
                return Err(VlibError::UnsupportedLocator(raw.to_string()))
            }
            None => PathBuf::from(raw),
        };
        if path.is_absolute() {
            Ok(Locator::Path(path))
        } else {
            Ok(Locator::Path(base_dir.join(path)))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Locator::Http(_))
    }

    /// Resolve `relative` against the directory containing this locator.
    pub fn sibling(&self, relative: &str) -> Result<Locator> {
        match self {
            Locator::Path(p) => {
                let dir = p.parent().unwrap_or(Path::new("."));
                Ok(Locator::Path(dir.join(relative)))
            }
            Locator::Http(url) => {
                let base = reqwest::Url::parse(url).map_err(|e| VlibError::Fetch {
                    locator: url.clone(),
                    reason: e.to_string(),
                })?;
                let joined = base.join(relative).map_err(|e| VlibError::Fetch {
                    locator: format!("{url} + {relative}"),
                    reason: e.to_string(),
                })?;
                Ok(Locator::Http(joined.to_string()))
            }
        }
    }

    /// Last path segment, used to name the manifest inside a mirror.
    pub fn file_name(&self) -> Option<String> {
        match self {
            Locator::Path(p) => p.file_name().map(|n| n.to_string_lossy().into_owned()),
            Locator::Http(url) => reqwest::Url::parse(url)
                .ok()?
                .path_segments()?
                .filter(|s| !s.is_empty())
                .next_back()
                .map(str::to_string),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Path(p) => write!(f, "{}", p.display()),
            Locator::Http(url) => f.write_str(url),
        }
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Blocking HTTP client shared by the config resolver and bundle fetcher.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VlibError::Fetch {
                locator: "<http client>".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    pub fn get(&self, url: &str, max_bytes: Option<u64>) -> Result<Vec<u8>> {
        let fail = |reason: String| VlibError::Fetch {
            locator: url.to_string(),
            reason,
        };
        let resp = self.client.get(url).send().map_err(|e| fail(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {}", status.as_u16())));
        }
        let Some(limit) = max_bytes else {
            let body = resp.bytes().map_err(|e| fail(e.to_string()))?;
            return Ok(body.to_vec());
        };
        if let Some(len) = resp.content_length() {
            if len > limit {
                return Err(fail(format!("{len} bytes exceeds limit of {limit}")));
            }
        }
        read_capped(resp, limit).map_err(fail)
    }
}

/// Read the document a locator points at. `max_bytes` caps the size.
pub fn read(locator: &Locator, http: &HttpClient, max_bytes: Option<u64>) -> Result<Vec<u8>> {
    match locator {
        Locator::Http(url) => http.get(url, max_bytes),
        Locator::Path(path) => {
            let fail = |reason: String| VlibError::Fetch {
                locator: path.display().to_string(),
                reason,
            };
            let mut file = std::fs::File::open(path).map_err(|e| fail(e.to_string()))?;
            match max_bytes {
                Some(limit) => read_capped(file, limit).map_err(fail),
                None => {
                    let mut buf = Vec::new();
                    file.read_to_end(&mut buf).map_err(|e| fail(e.to_string()))?;
                    Ok(buf)
                }
            }
        }
    }
}

/// Read at most `limit + 1` bytes; anything past `limit` is rejected.
fn read_capped(reader: impl Read, limit: u64) -> std::result::Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut buf)
        .map_err(|e| e.to_string())?;
    if buf.len() as u64 > limit {
        return Err(format!("body exceeds limit of {limit} bytes"));
    }
    Ok(buf)
}

pub fn read_to_string(locator: &Locator, http: &HttpClient) -> Result<String> {
    let bytes = read(locator, http, None)?;
    String::from_utf8(bytes).map_err(|e| VlibError::Fetch {
        locator: locator.to_string(),
        reason: format!("not valid UTF-8: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
