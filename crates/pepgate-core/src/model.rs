//! Wire data model shared between the enforcement engine and PDP clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verdict carried by a PDP decision.
///
/// Anything the PDP sends that is not a known verdict decodes as
/// [`Verdict::Indeterminate`], which the enforcer treats as a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Permit,
    Deny,
    Indeterminate,
    NotApplicable,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permit => "PERMIT",
            Self::Deny => "DENY",
            Self::Indeterminate => "INDETERMINATE",
            Self::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

impl Serialize for Verdict {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "PERMIT" => Self::Permit,
            "DENY" => Self::Deny,
            "NOT_APPLICABLE" => Self::NotApplicable,
            _ => Self::Indeterminate,
        })
    }
}

/// Opaque constraint supplied by the PDP.
///
/// The engine never inspects a constraint itself; only handler providers
/// interpret it via their responsibility predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Constraint(pub Value);

impl Constraint {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// One decision message from a PDP decision stream.
///
/// A subscription may yield many decisions over time; the most recently
/// received one is authoritative at the instant it is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// The PDP verdict.
    #[serde(rename = "decision")]
    pub verdict: Verdict,

    /// Mandatory constraints. Every obligation must be handled successfully
    /// or the overall outcome is a denial regardless of the verdict.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<Constraint>,

    /// Optional constraints. Handling failures are logged and ignored.
    #[serde(default, alias = "advices", rename = "advice", skip_serializing_if = "Vec::is_empty")]
    pub advices: Vec<Constraint>,

    /// Replacement resource: when present on a PERMIT, the enforcer returns
    /// this value instead of the wrapped call's result.
    #[serde(default, rename = "resource", skip_serializing_if = "Option::is_none")]
    pub resource_override: Option<Value>,
}

impl Decision {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            obligations: Vec::new(),
            advices: Vec::new(),
            resource_override: None,
        }
    }

    /// A bare PERMIT with no constraints.
    pub fn permit() -> Self {
        Self::new(Verdict::Permit)
    }

    /// A bare DENY.
    pub fn deny() -> Self {
        Self::new(Verdict::Deny)
    }

    pub fn with_obligation(mut self, constraint: impl Into<Value>) -> Self {
        self.obligations.push(Constraint::new(constraint.into()));
        self
    }

    pub fn with_advice(mut self, constraint: impl Into<Value>) -> Self {
        self.advices.push(Constraint::new(constraint.into()));
        self
    }

    pub fn with_resource_override(mut self, resource: impl Into<Value>) -> Self {
        self.resource_override = Some(resource.into());
        self
    }
}

/// The (subject, action, resource) triple sent to the PDP.
///
/// Built once per enforced invocation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationSubscription {
    pub subject: Value,
    pub action: Value,
    pub resource: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Value>,
}

impl AuthorizationSubscription {
    pub fn new(subject: Value, action: Value, resource: Value) -> Self {
        Self {
            subject,
            action,
            resource,
            environment: None,
        }
    }
}
