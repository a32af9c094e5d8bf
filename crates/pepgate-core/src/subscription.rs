//! Assembling the authorization subscription for one enforced call.
//!
//! The builder merges externally supplied subject functions and applies
//! decorator-level overrides; `action` and `resource` otherwise default to a
//! structure combining function identity and request metadata.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::error::EnforcementError;
use crate::model::AuthorizationSubscription;

/// Subject sentinel when no subject functions are configured.
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

/// Context handed to each subject function.
pub struct SubjectContext<'a> {
    /// Identity of the enforced function.
    pub function_name: &'a str,
    /// Named call arguments.
    pub args: &'a Map<String, Value>,
}

/// Produces a partial subject mapping for one enforced call.
pub type SubjectFn =
    Arc<dyn Fn(&SubjectContext<'_>) -> anyhow::Result<Map<String, Value>> + Send + Sync>;

/// Provider form of a field override.
pub type OverrideFn = Arc<dyn Fn() -> anyhow::Result<Value> + Send + Sync>;

/// Decorator-level override for one subscription field.
///
/// A literal replaces the field's default entirely; a provider is invoked at
/// subscription build time and its output replaces the default.
#[derive(Clone)]
pub enum FieldOverride {
    Literal(Value),
    Provider(OverrideFn),
}

impl FieldOverride {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn provider<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Provider(Arc::new(f))
    }

    fn evaluate(&self) -> anyhow::Result<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Provider(f) => f(),
        }
    }
}

impl fmt::Debug for FieldOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Provider(_) => f.debug_tuple("Provider").finish(),
        }
    }
}

/// Optional overrides for the subscription fields.
///
/// `environment` has no default; the field is omitted from the subscription
/// unless an override supplies it.
#[derive(Debug, Clone, Default)]
pub struct FieldOverrides {
    pub subject: Option<FieldOverride>,
    pub action: Option<FieldOverride>,
    pub resource: Option<FieldOverride>,
    pub environment: Option<FieldOverride>,
}

/// Snapshot of ambient request metadata, supplied by the web-framework
/// integration. All fields are optional; absent ones are omitted from the
/// subscription.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub path: Option<String>,
    pub method: Option<String>,
    pub endpoint: Option<String>,
    pub route: Option<String>,
    pub blueprint: Option<String>,
    /// Query parameters.
    pub get: Map<String, Value>,
    /// Form/body parameters.
    pub post: Map<String, Value>,
}

impl RequestMetadata {
    fn action_fragment(&self) -> Value {
        let mut request = Map::new();
        for (key, value) in [
            ("path", &self.path),
            ("method", &self.method),
            ("endpoint", &self.endpoint),
            ("route", &self.route),
            ("blueprint", &self.blueprint),
        ] {
            if let Some(value) = value {
                request.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        Value::Object(request)
    }

    fn resource_fragment(&self) -> Value {
        let mut request = Map::new();
        if !self.get.is_empty() {
            request.insert("GET".to_string(), Value::Object(self.get.clone()));
        }
        if !self.post.is_empty() {
            request.insert("POST".to_string(), Value::Object(self.post.clone()));
        }
        Value::Object(request)
    }
}

/// Builds one immutable [`AuthorizationSubscription`] per enforced call.
#[derive(Clone, Default)]
pub struct SubscriptionBuilder {
    subject_fns: Vec<SubjectFn>,
}

impl SubscriptionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subject function. Functions are invoked in registration order
    /// and their outputs merged key-by-key; on a key collision the later
    /// function wins. This last-writer-wins merge is deliberate — callers
    /// supplying several subject functions must keep their keys disjoint or
    /// accept the overwrite.
    pub fn with_subject_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&SubjectContext<'_>) -> anyhow::Result<Map<String, Value>> + Send + Sync + 'static,
    {
        self.subject_fns.push(Arc::new(f));
        self
    }

    /// Build the subscription for one invocation.
    ///
    /// A failing subject or override function is a configuration error for
    /// that call; the enforcer fails closed on it.
    pub fn build(
        &self,
        function_name: &str,
        args: &Map<String, Value>,
        request: Option<&RequestMetadata>,
        overrides: &FieldOverrides,
        return_value: Option<&Value>,
    ) -> Result<AuthorizationSubscription, EnforcementError> {
        let subject = match &overrides.subject {
            Some(ov) => ov.evaluate().map_err(EnforcementError::Configuration)?,
            None => self.default_subject(function_name, args)?,
        };
        let action = match &overrides.action {
            Some(ov) => ov.evaluate().map_err(EnforcementError::Configuration)?,
            None => default_action(function_name, request),
        };
        let resource = match &overrides.resource {
            Some(ov) => ov.evaluate().map_err(EnforcementError::Configuration)?,
            None => default_resource(args, request, return_value),
        };
        let environment = overrides
            .environment
            .as_ref()
            .map(|ov| ov.evaluate().map_err(EnforcementError::Configuration))
            .transpose()?;

        let mut subscription = AuthorizationSubscription::new(subject, action, resource);
        subscription.environment = environment;
        Ok(subscription)
    }

    fn default_subject(
        &self,
        function_name: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, EnforcementError> {
        if self.subject_fns.is_empty() {
            return Ok(Value::String(ANONYMOUS_SUBJECT.to_string()));
        }

        let ctx = SubjectContext {
            function_name,
            args,
        };
        let mut merged = Map::new();
        for f in &self.subject_fns {
            let partial = f(&ctx).map_err(EnforcementError::Configuration)?;
            // Last writer wins on key collisions.
            merged.extend(partial);
        }
        Ok(Value::Object(merged))
    }
}

fn default_action(function_name: &str, request: Option<&RequestMetadata>) -> Value {
    let mut action = Map::new();
    action.insert(
        "function".to_string(),
        json!({ "function_name": function_name }),
    );
    if let Some(request) = request {
        let fragment = request.action_fragment();
        if fragment.as_object().is_some_and(|m| !m.is_empty()) {
            action.insert("request".to_string(), fragment);
        }
    }
    Value::Object(action)
}

fn default_resource(
    args: &Map<String, Value>,
    request: Option<&RequestMetadata>,
    return_value: Option<&Value>,
) -> Value {
    let mut resource = Map::new();
    resource.insert("function".to_string(), json!({ "kwargs": args }));
    if let Some(request) = request {
        let fragment = request.resource_fragment();
        if fragment.as_object().is_some_and(|m| !m.is_empty()) {
            resource.insert("request".to_string(), fragment);
        }
    }
    if let Some(value) = return_value {
        resource.insert("return_value".to_string(), value.clone());
    }
    Value::Object(resource)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn no_subject_fns_yields_anonymous() {
        let builder = SubscriptionBuilder::new();
        let sub = builder
            .build("lookup", &Map::new(), None, &FieldOverrides::default(), None)
            .unwrap();
        assert_eq!(sub.subject, json!("anonymous"));
    }

    #[test]
    fn subject_merge_is_last_writer_wins() {
        let builder = SubscriptionBuilder::new()
            .with_subject_fn(|_ctx| Ok(args(&[("a", json!(1))])))
            .with_subject_fn(|_ctx| Ok(args(&[("a", json!(2)), ("b", json!(3))])));

        let sub = builder
            .build("lookup", &Map::new(), None, &FieldOverrides::default(), None)
            .unwrap();
        assert_eq!(sub.subject, json!({"a": 2, "b": 3}));
    }

    #[test]
    fn subject_fn_sees_function_and_args() {
        let builder = SubscriptionBuilder::new().with_subject_fn(|ctx| {
            Ok(args(&[
                ("fn", json!(ctx.function_name)),
                ("x", ctx.args["x"].clone()),
            ]))
        });

        let call_args = args(&[("x", json!(42))]);
        let sub = builder
            .build("lookup", &call_args, None, &FieldOverrides::default(), None)
            .unwrap();
        assert_eq!(sub.subject, json!({"fn": "lookup", "x": 42}));
    }

    #[test]
    fn failing_subject_fn_is_a_configuration_error() {
        let builder =
            SubscriptionBuilder::new().with_subject_fn(|_ctx| anyhow::bail!("token store down"));

        let err = builder
            .build("lookup", &Map::new(), None, &FieldOverrides::default(), None)
            .unwrap_err();
        assert!(matches!(err, EnforcementError::Configuration(_)));
    }

    #[test]
    fn default_action_and_resource_carry_call_and_request_shape() {
        let builder = SubscriptionBuilder::new();
        let request = RequestMetadata {
            path: Some("/patients/7".to_string()),
            method: Some("GET".to_string()),
            endpoint: Some("patients.detail".to_string()),
            route: Some("/patients/<id>".to_string()),
            blueprint: Some("patients".to_string()),
            get: args(&[("verbose", json!("1"))]),
            post: Map::new(),
        };
        let call_args = args(&[("id", json!(7))]);

        let sub = builder
            .build(
                "fetch_patient",
                &call_args,
                Some(&request),
                &FieldOverrides::default(),
                None,
            )
            .unwrap();

        assert_eq!(
            sub.action,
            json!({
                "function": {"function_name": "fetch_patient"},
                "request": {
                    "path": "/patients/7",
                    "method": "GET",
                    "endpoint": "patients.detail",
                    "route": "/patients/<id>",
                    "blueprint": "patients"
                }
            })
        );
        assert_eq!(
            sub.resource,
            json!({
                "function": {"kwargs": {"id": 7}},
                "request": {"GET": {"verbose": "1"}}
            })
        );
    }

    #[test]
    fn return_value_is_embedded_in_resource() {
        let builder = SubscriptionBuilder::new();
        let sub = builder
            .build(
                "fetch_patient",
                &Map::new(),
                None,
                &FieldOverrides::default(),
                Some(&json!({"name": "Ada"})),
            )
            .unwrap();
        assert_eq!(sub.resource["return_value"], json!({"name": "Ada"}));
    }

    #[test]
    fn environment_is_absent_without_an_override() {
        let builder = SubscriptionBuilder::new();
        let sub = builder
            .build("lookup", &Map::new(), None, &FieldOverrides::default(), None)
            .unwrap();
        assert!(sub.environment.is_none());
    }

    #[test]
    fn environment_override_populates_the_field() {
        let builder = SubscriptionBuilder::new();
        let overrides = FieldOverrides {
            environment: Some(FieldOverride::literal(json!({"tenant": "clinic-2"}))),
            ..Default::default()
        };
        let sub = builder
            .build("lookup", &Map::new(), None, &overrides, None)
            .unwrap();
        assert_eq!(sub.environment, Some(json!({"tenant": "clinic-2"})));
    }

    #[test]
    fn literal_override_replaces_default_entirely() {
        let builder = SubscriptionBuilder::new();
        let overrides = FieldOverrides {
            action: Some(FieldOverride::literal(json!("read"))),
            ..Default::default()
        };
        let sub = builder
            .build("lookup", &Map::new(), None, &overrides, None)
            .unwrap();
        assert_eq!(sub.action, json!("read"));
    }

    #[test]
    fn provider_override_is_invoked_at_build_time() {
        let builder = SubscriptionBuilder::new();
        let overrides = FieldOverrides {
            resource: Some(FieldOverride::provider(|| Ok(json!({"scope": "ward-3"})))),
            ..Default::default()
        };
        let sub = builder
            .build("lookup", &Map::new(), None, &overrides, None)
            .unwrap();
        assert_eq!(sub.resource, json!({"scope": "ward-3"}));
    }

    #[test]
    fn failing_override_provider_is_a_configuration_error() {
        let builder = SubscriptionBuilder::new();
        let overrides = FieldOverrides {
            subject: Some(FieldOverride::provider(|| anyhow::bail!("no session"))),
            ..Default::default()
        };
        let err = builder
            .build("lookup", &Map::new(), None, &overrides, None)
            .unwrap_err();
        assert!(matches!(err, EnforcementError::Configuration(_)));
    }
}
