use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};
use std::path::Path;
use tracing::{debug, info};
use vlib_core::{ValidationService, VlibError};

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32000;
pub const VALIDATION_FAILURE: i32 = -32001;

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

// ---------------------------------------------------------------------------
// Method params
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EntityParams {
    entity_type: String,
    entity_data: Value,
    ruleset_name: String,
}

#[derive(Debug, Deserialize)]
struct BatchParams {
    entities: Vec<Value>,
    #[serde(default)]
    id_fields: Vec<String>,
    ruleset_name: String,
}

#[derive(Debug, Deserialize)]
struct BatchFileParams {
    file_uri: String,
    #[serde(default)]
    id_fields: Vec<String>,
    ruleset_name: String,
}

/// Method outcome before it is wrapped in a response.
enum Failure {
    Params(String),
    Service(VlibError),
    Encode(serde_json::Error),
}

impl From<VlibError> for Failure {
    fn from(e: VlibError) -> Self {
        Failure::Service(e)
    }
}

impl From<serde_json::Error> for Failure {
    fn from(e: serde_json::Error) -> Self {
        Failure::Encode(e)
    }
}

// ---------------------------------------------------------------------------
// Server loop
// ---------------------------------------------------------------------------

pub fn run(config: &Path) -> anyhow::Result<()> {
    let mut service = super::open_service(config)?;
    info!(config = %config.display(), "serving JSON-RPC on stdio");

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Some(response) = handle_line(&line, &mut service) else {
            continue;
        };
        let mut out = stdout.lock();
        serde_json::to_writer(&mut out, &response)?;
        writeln!(out)?;
        out.flush()?;
    }

    service.close();
    Ok(())
}

/// One input line to at most one response. Objects without an `id` are
/// notifications and get none; any other non-object value is invalid.
pub fn handle_line(line: &str, service: &mut ValidationService) -> Option<JsonRpcResponse> {
    let raw: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Some(JsonRpcResponse::err(None, PARSE_ERROR, format!("parse error: {e}")));
        }
    };

    let Some(object) = raw.as_object() else {
        return Some(JsonRpcResponse::err(
            None,
            INVALID_REQUEST,
            "invalid request: expected a JSON object".to_string(),
        ));
    };
    let Some(id) = object.get("id").cloned() else {
        debug!("notification ignored");
        return None;
    };

    match serde_json::from_value::<JsonRpcRequest>(raw) {
        Ok(request) => Some(handle_request(&request, service)),
        Err(e) => Some(JsonRpcResponse::err(
            Some(id),
            INVALID_REQUEST,
            format!("invalid request: {e}"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Request dispatch (pub for unit tests)
// ---------------------------------------------------------------------------

pub fn handle_request(req: &JsonRpcRequest, service: &mut ValidationService) -> JsonRpcResponse {
    let id = req.id.clone();
    if req.jsonrpc != "2.0" {
        return JsonRpcResponse::err(
            id,
            INVALID_REQUEST,
            format!("invalid request: unsupported jsonrpc version '{}'", req.jsonrpc),
        );
    }
    let outcome = match req.method.as_str() {
        "validate" => params::<EntityParams>(req).and_then(|p| {
            let results = service.validate(&p.entity_type, &p.entity_data, &p.ruleset_name)?;
            Ok(serde_json::to_value(results)?)
        }),
        "discover_rules" => params::<EntityParams>(req).and_then(|p| {
            let found = service.discover_rules(&p.entity_type, &p.entity_data, &p.ruleset_name)?;
            Ok(serde_json::to_value(found)?)
        }),
        "discover_rulesets" => service
            .discover_rulesets()
            .map_err(Failure::from)
            .and_then(|sets| Ok(serde_json::to_value(sets)?)),
        "batch_validate" => params::<BatchParams>(req).and_then(|p| {
            let reports = service.batch_validate(p.entities, &p.id_fields, &p.ruleset_name)?;
            Ok(serde_json::to_value(reports)?)
        }),
        "batch_file_validate" => params::<BatchFileParams>(req).and_then(|p| {
            let reports = service.batch_file_validate(&p.file_uri, &p.id_fields, &p.ruleset_name)?;
            Ok(serde_json::to_value(reports)?)
        }),
        "reload_logic" => service
            .reload()
            .map_err(Failure::from)
            .and_then(|ack| Ok(serde_json::to_value(ack)?)),
        "get_cache_age" => Ok(serde_json::json!({ "cache_age": service.cache_age() })),
        other => {
            return JsonRpcResponse::err(id, METHOD_NOT_FOUND, format!("method not found: {other}"));
        }
    };

    match outcome {
        Ok(result) => JsonRpcResponse::ok(id, result),
        Err(Failure::Params(message)) => JsonRpcResponse::err(id, INVALID_PARAMS, message),
        Err(Failure::Service(e)) => {
            let code = if e.is_validation_failure() {
                VALIDATION_FAILURE
            } else {
                INTERNAL_ERROR
            };
            JsonRpcResponse::err(id, code, e.to_string())
        }
        Err(Failure::Encode(e)) => {
            JsonRpcResponse::err(id, INTERNAL_ERROR, format!("serialization error: {e}"))
        }
    }
}

fn params<T: DeserializeOwned>(req: &JsonRpcRequest) -> Result<T, Failure> {
    let Some(p) = &req.params else {
        return Err(Failure::Params("missing params".to_string()));
    };
    serde_json::from_value(p.clone()).map_err(|e| Failure::Params(format!("invalid params: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
