use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// `(entity, major, minor, patch)` parsed from a schema identity URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaIdentity {
    pub entity: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

static PATH_FORM: OnceLock<Regex> = OnceLock::new();
static FILE_FORM: OnceLock<Regex> = OnceLock::new();

// .../loan/v1.2.0 or loan/v1.2
fn path_form() -> &'static Regex {
    PATH_FORM.get_or_init(|| {
        Regex::new(r"(?:^|/)([A-Za-z0-9_\-]+)/v(\d+)\.(\d+)(?:\.(\d+))?/?$").unwrap()
    })
}

// .../loan.schema.v1.2.0.json
fn file_form() -> &'static Regex {
    FILE_FORM.get_or_init(|| {
        Regex::new(r"(?:^|/)([A-Za-z0-9_\-]+)\.schema\.v(\d+)\.(\d+)(?:\.(\d+))?\.json$").unwrap()
    })
}

impl SchemaIdentity {
    pub fn parse(identity: &str) -> Option<Self> {
        let caps = path_form()
            .captures(identity)
            .or_else(|| file_form().captures(identity))?;
        let num = |i: usize| -> Option<u32> {
            match caps.get(i) {
                Some(m) => m.as_str().parse().ok(),
                None => Some(0),
            }
        };
        Some(Self {
            entity: caps.get(1)?.as_str().to_string(),
            major: num(2)?,
            minor: num(3)?,
            patch: num(4)?,
        })
    }
}

impl fmt::Display for SchemaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/v{}.{}.{}", self.entity, self.major, self.minor, self.patch)
    }
}

/// Entity type a routing key belongs to: the entity of a parseable schema
/// identity, a best guess from the path of any other schema URL, otherwise
/// the key itself.
pub fn entity_type_of(routing_key: &str) -> String {
    if let Some(id) = SchemaIdentity::parse(routing_key) {
        return id.entity;
    }
    if routing_key.starts_with("http://") || routing_key.starts_with("https://") {
        if let Some(entity) = entity_from_url_path(routing_key) {
            return entity;
        }
    }
    routing_key.to_string()
}

/// `loan.schema.json` gives `loan`; `.../loan/v1.x/...` gives the segment
/// before the version; otherwise the second-to-last segment.
fn entity_from_url_path(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    let last = *segments.last()?;
    if last.ends_with(".json") {
        if let Some(stem) = last.split('.').next().filter(|s| !s.is_empty()) {
            return Some(stem.to_string());
        }
    }
    let versioned = segments
        .iter()
        .position(|s| s.starts_with('v') && s.contains('.'))
        .filter(|&i| i > 0);
    let entity = match versioned {
        Some(i) => segments[i - 1],
        None if segments.len() >= 2 => segments[segments.len() - 2],
        None => last,
    };
    Some(entity.to_string())
}
