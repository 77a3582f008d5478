//! Field-mapping helpers: per-schema-version tables from logical field names
//! to physical paths in the raw entity, and the entity view checks read
//! through.

use crate::error::{Result, VlibError};
use crate::paths;
use crate::rule::{FaultKind, RuleFault};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coerce {
    #[default]
    Raw,
    String,
    Number,
    Integer,
    Boolean,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMapping {
    /// Dotted path into the raw record, e.g. `financial.principal_amount`.
    pub path: String,
    pub coerce: Coerce,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldSpec {
    Path(String),
    Full {
        path: String,
        #[serde(default)]
        coerce: Coerce,
    },
}

#[derive(Deserialize)]
struct HelperDescriptor {
    entity_type: String,
    #[serde(default)]
    schema_versions: Vec<String>,
    fields: BTreeMap<String, FieldSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMappingHelper {
    pub id: String,
    pub entity_type: String,
    pub schema_versions: Vec<String>,
    pub fields: BTreeMap<String, FieldMapping>,
}

impl FieldMappingHelper {
    pub fn parse(id: &str, text: &str) -> Result<Self> {
        let desc: HelperDescriptor = serde_yaml::from_str(text)
            .map_err(|e| VlibError::InvalidConfig(format!("helper '{id}': {e}")))?;
        let fields = desc
            .fields
            .into_iter()
            .map(|(logical, spec)| {
                let mapping = match spec {
                    FieldSpec::Path(path) => FieldMapping {
                        path,
                        coerce: Coerce::Raw,
                    },
                    FieldSpec::Full { path, coerce } => FieldMapping { path, coerce },
                };
                (logical, mapping)
            })
            .collect();
        Ok(Self {
            id: id.to_string(),
            entity_type: desc.entity_type,
            schema_versions: desc.schema_versions,
            fields,
        })
    }

    pub fn load(logic_dir: &Path, id: &str) -> Result<Self> {
        paths::validate_id("helper", id)?;
        let path = paths::helper_path(logic_dir, id);
        if !path.exists() {
            return Err(VlibError::HelperNotFound(format!("{id} ({})", path.display())));
        }
        let text = std::fs::read_to_string(&path)?;
        Self::parse(id, &text)
    }

    pub fn bind<'a>(&'a self, data: &'a Value) -> EntityView<'a> {
        EntityView {
            helper: self,
            data,
            accesses: None,
        }
    }

    /// A view that records every `(logical, physical)` field dereference.
    pub fn bind_recording<'a>(&'a self, data: &'a Value) -> EntityView<'a> {
        EntityView {
            helper: self,
            data,
            accesses: Some(RefCell::new(Vec::new())),
        }
    }
}

// ---------------------------------------------------------------------------
// EntityView
// ---------------------------------------------------------------------------

pub struct EntityView<'a> {
    helper: &'a FieldMappingHelper,
    data: &'a Value,
    accesses: Option<RefCell<Vec<(String, String)>>>,
}

impl<'a> EntityView<'a> {
    /// The raw record, for checks that need it whole (schema conformance).
    pub fn data(&self) -> &'a Value {
        self.data
    }

    pub fn helper_id(&self) -> &str {
        &self.helper.id
    }

    /// Recorded accesses in first-access order. Empty unless recording.
    pub fn accesses(&self) -> Vec<(String, String)> {
        self.accesses
            .as_ref()
            .map(|a| a.borrow().clone())
            .unwrap_or_default()
    }

    fn resolve(&self, logical: &str) -> std::result::Result<(Option<&'a Value>, &'a FieldMapping), RuleFault> {
        let helper: &'a FieldMappingHelper = self.helper;
        let mapping = helper.fields.get(logical).ok_or_else(|| {
            RuleFault::new(
                FaultKind::UnmappedField,
                format!("field '{logical}' is not mapped by helper '{}'", helper.id),
            )
        })?;
        if let Some(acc) = &self.accesses {
            let mut acc = acc.borrow_mut();
            if !acc.iter().any(|(l, _)| l == logical) {
                acc.push((logical.to_string(), mapping.path.clone()));
            }
        }
        let mut cur = self.data;
        for seg in mapping.path.split('.') {
            match cur.get(seg) {
                Some(next) => cur = next,
                None => return Ok((None, mapping)),
            }
        }
        Ok((if cur.is_null() { None } else { Some(cur) }, mapping))
    }

    fn mismatch(&self, logical: &str, mapping: &FieldMapping, want: &str, got: &Value) -> RuleFault {
        RuleFault::new(
            FaultKind::Coercion,
            format!(
                "field '{logical}' ({}) expected {want}, got {}",
                mapping.path,
                kind_of(got)
            ),
        )
    }

    pub fn raw(&self, logical: &str) -> std::result::Result<Option<&'a Value>, RuleFault> {
        Ok(self.resolve(logical)?.0)
    }

    pub fn text(&self, logical: &str) -> std::result::Result<Option<String>, RuleFault> {
        let (value, mapping) = self.resolve(logical)?;
        let Some(value) = value else { return Ok(None) };
        match value {
            Value::String(s) => Ok(Some(s.clone())),
            Value::Number(_) | Value::Bool(_) if mapping.coerce == Coerce::String => {
                Ok(Some(value.to_string()))
            }
            other => Err(self.mismatch(logical, mapping, "text", other)),
        }
    }

    pub fn number(&self, logical: &str) -> std::result::Result<Option<f64>, RuleFault> {
        let (value, mapping) = self.resolve(logical)?;
        let Some(value) = value else { return Ok(None) };
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.mismatch(logical, mapping, "a finite number", value)),
            Value::String(s) if mapping.coerce == Coerce::Number => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.mismatch(logical, mapping, "a numeric string", value)),
            other => Err(self.mismatch(logical, mapping, "a number", other)),
        }
    }

    pub fn integer(&self, logical: &str) -> std::result::Result<Option<i64>, RuleFault> {
        let (value, mapping) = self.resolve(logical)?;
        let Some(value) = value else { return Ok(None) };
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Some)
                .ok_or_else(|| self.mismatch(logical, mapping, "an integer", value)),
            Value::String(s) if mapping.coerce == Coerce::Integer => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| self.mismatch(logical, mapping, "an integer string", value)),
            other => Err(self.mismatch(logical, mapping, "an integer", other)),
        }
    }

    pub fn boolean(&self, logical: &str) -> std::result::Result<Option<bool>, RuleFault> {
        let (value, mapping) = self.resolve(logical)?;
        let Some(value) = value else { return Ok(None) };
        match value {
            Value::Bool(b) => Ok(Some(*b)),
            Value::String(s) if mapping.coerce == Coerce::Boolean => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => Ok(Some(true)),
                    "false" | "no" | "0" => Ok(Some(false)),
                    _ => Err(self.mismatch(logical, mapping, "a boolean string", value)),
                }
            }
            other => Err(self.mismatch(logical, mapping, "a boolean", other)),
        }
    }

    /// ISO dates; a datetime string yields its date part.
    pub fn date(&self, logical: &str) -> std::result::Result<Option<NaiveDate>, RuleFault> {
        let (value, mapping) = self.resolve(logical)?;
        let Some(value) = value else { return Ok(None) };
        let Value::String(s) = value else {
            return Err(self.mismatch(logical, mapping, "an ISO date", value));
        };
        let day = s.get(..10).unwrap_or(s.as_str());
        NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| self.mismatch(logical, mapping, "an ISO date", value))
    }
}

fn kind_of(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}
