use crate::bundle::SchemaStore;
use crate::helper::EntityView;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Warn,
    Fail,
    Norun,
    Error,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Warn => "WARN",
            Status::Fail => "FAIL",
            Status::Norun => "NORUN",
            Status::Error => "ERROR",
        }
    }

    /// PASS and WARN let children run.
    pub fn is_passing(self) -> bool {
        matches!(self, Status::Pass | Status::Warn)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(Status::Pass),
            "WARN" => Ok(Status::Warn),
            "FAIL" => Ok(Status::Fail),
            "NORUN" => Ok(Status::Norun),
            "ERROR" => Ok(Status::Error),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict / RuleFault
// ---------------------------------------------------------------------------

/// What a check decided.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: Status,
    pub message: String,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            status: Status::Pass,
            message: String::new(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            status: Status::Warn,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: Status::Fail,
            message: message.into(),
        }
    }

    pub fn norun(message: impl Into<String>) -> Self {
        Self {
            status: Status::Norun,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    UnmappedField,
    Coercion,
    Check,
    Panic,
}

impl FaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::UnmappedField => "UnmappedField",
            FaultKind::Coercion => "CoercionError",
            FaultKind::Check => "CheckError",
            FaultKind::Panic => "panic",
        }
    }
}

/// A fault raised while a check runs. Recorded as an ERROR row, never
/// propagated past the row.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleFault {
    pub kind: FaultKind,
    pub message: String,
}

impl RuleFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn check(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Check, message)
    }
}

impl fmt::Display for RuleFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

// ---------------------------------------------------------------------------
// RuleContext / RuleUnit
// ---------------------------------------------------------------------------

/// Everything a check may look at.
pub struct RuleContext<'a> {
    pub entity: &'a EntityView<'a>,
    /// Coordination data for the terms this rule declared.
    pub required: &'a Map<String, Value>,
    pub schemas: &'a SchemaStore,
}

impl<'a> RuleContext<'a> {
    /// `None` when coordination did not supply the term or supplied null.
    pub fn required(&self, term: &str) -> Option<&'a Value> {
        self.required.get(term).filter(|v| !v.is_null())
    }
}

pub type CheckFn = fn(&RuleContext<'_>) -> Result<Verdict, RuleFault>;

/// A loaded rule: descriptor metadata plus the compiled check it names.
#[derive(Clone)]
pub struct RuleUnit {
    pub id: String,
    pub entity_type: String,
    pub description: String,
    pub required_data: Vec<String>,
    pub implementation: String,
    pub check: CheckFn,
}

impl fmt::Debug for RuleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleUnit")
            .field("id", &self.id)
            .field("entity_type", &self.entity_type)
            .field("implementation", &self.implementation)
            .field("required_data", &self.required_data)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RuleResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_id: String,
    pub description: String,
    pub status: Status,
    pub message: String,
    pub duration_ms: f64,
    #[serde(default)]
    pub children: Vec<RuleResult>,
}

impl RuleResult {
    /// Copy of the tree with every duration zeroed, for comparing runs.
    pub fn without_timing(&self) -> RuleResult {
        RuleResult {
            duration_ms: 0.0,
            children: self.children.iter().map(RuleResult::without_timing).collect(),
            ..self.clone()
        }
    }

    /// Depth-first walk over this node and its descendants.
    pub fn walk<'a>(&'a self, out: &mut Vec<&'a RuleResult>) {
        out.push(self);
        for child in &self.children {
            child.walk(out);
        }
    }
}
