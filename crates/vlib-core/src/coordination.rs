//! Coordination data providers: cross-entity reference data keyed by
//! vocabulary term. Failures never surface as errors; they yield an empty
//! map and the rules that needed the data report NORUN.

use crate::config::CoordinationConfig;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub trait CoordinationProvider: Send + Sync {
    fn fetch(&self, entity_type: &str, entity: &Value, terms: &[String]) -> Map<String, Value>;
}

/// Always empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledProvider;

impl CoordinationProvider for DisabledProvider {
    fn fetch(&self, _: &str, _: &Value, _: &[String]) -> Map<String, Value> {
        Map::new()
    }
}

/// Fixed data, for tests and embedding hosts that already hold the data.
#[derive(Debug, Default, Clone)]
pub struct StaticProvider {
    pub data: Map<String, Value>,
}

impl CoordinationProvider for StaticProvider {
    fn fetch(&self, _: &str, _: &Value, terms: &[String]) -> Map<String, Value> {
        terms
            .iter()
            .filter_map(|t| self.data.get(t).map(|v| (t.clone(), v.clone())))
            .collect()
    }
}

/// `POST {base_url}/fetch-data` with retries.
#[derive(Debug, Clone)]
pub struct HttpCoordinationProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    attempts: u32,
}

const RETRY_BACKOFF: Duration = Duration::from_millis(100);

impl HttpCoordinationProvider {
    pub fn new(base_url: &str, timeout: Duration, attempts: u32) -> Option<Self> {
        let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "coordination client could not be built; coordination disabled");
                return None;
            }
        };
        Some(Self {
            client,
            endpoint: format!("{}/fetch-data", base_url.trim_end_matches('/')),
            attempts: attempts.max(1),
        })
    }

    fn attempt(&self, body: &Value) -> Result<Map<String, Value>, String> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(body)
            .send()
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status().as_u16()));
        }
        match resp.json::<Value>().map_err(|e| e.to_string())? {
            Value::Object(map) => Ok(map),
            other => Err(format!("expected a JSON object, got {other}")),
        }
    }
}

impl CoordinationProvider for HttpCoordinationProvider {
    fn fetch(&self, entity_type: &str, entity: &Value, terms: &[String]) -> Map<String, Value> {
        if terms.is_empty() {
            return Map::new();
        }
        let body = json!({
            "entity_type": entity_type,
            "entity_data": entity,
            "vocabulary_terms": terms,
        });
        for attempt in 1..=self.attempts {
            match self.attempt(&body) {
                Ok(data) => {
                    debug!(entity_type, terms = terms.len(), "coordination data fetched");
                    return data;
                }
                Err(e) => {
                    warn!(
                        endpoint = %self.endpoint,
                        attempt,
                        max_attempts = self.attempts,
                        error = %e,
                        "coordination fetch failed"
                    );
                    if attempt < self.attempts {
                        std::thread::sleep(RETRY_BACKOFF * attempt);
                    }
                }
            }
        }
        Map::new()
    }
}

/// Build the provider a coordination config describes.
pub fn provider_for(config: &CoordinationConfig) -> Box<dyn CoordinationProvider> {
    match (&config.enabled, &config.base_url) {
        (true, Some(url)) => {
            match HttpCoordinationProvider::new(
                url,
                Duration::from_millis(config.timeout_ms),
                config.retry_attempts,
            ) {
                Some(p) => Box::new(p),
                None => Box::new(DisabledProvider),
            }
        }
        (true, None) => {
            warn!("coordination enabled without base_url; coordination disabled");
            Box::new(DisabledProvider)
        }
        _ => Box::new(DisabledProvider),
    }
}
