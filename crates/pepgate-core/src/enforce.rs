//! Enforcement of one decorated call against a live PDP decision.
//!
//! Flow per invocation:
//! 1. Build the authorization subscription from call context
//! 2. Subscribe and obtain decisions at the variant's check points
//! 3. Resolve and run constraint handler bundles per check
//! 4. Permit, deny, or replace the call's outcome
//!
//! Obligations deny on any failure or missing coverage; advices never change
//! the verdict. Every exit path releases the decision subscription (the
//! handle closes on drop).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::client::{DecisionClient, DecisionHandle};
use crate::error::EnforcementError;
use crate::handlers::ErrorDisposition;
use crate::model::{Decision, Verdict};
use crate::registry::ConstraintHandlerRegistry;
use crate::resolve::{CheckPoint, ConstraintKind};
use crate::subscription::{FieldOverride, FieldOverrides, RequestMetadata, SubscriptionBuilder};

/// Default bound on waiting for the first decision of a subscription.
pub const DEFAULT_DECISION_WAIT: Duration = Duration::from_secs(5);

/// Transient context for one decorated call.
#[derive(Debug, Clone, Default)]
pub struct EnforcementContext {
    pub(crate) function_name: String,
    pub(crate) args: Map<String, Value>,
    pub(crate) request: Option<RequestMetadata>,
    pub(crate) overrides: FieldOverrides,
}

impl EnforcementContext {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    pub fn request(mut self, request: RequestMetadata) -> Self {
        self.request = Some(request);
        self
    }

    pub fn subject(mut self, value: FieldOverride) -> Self {
        self.overrides.subject = Some(value);
        self
    }

    pub fn action(mut self, value: FieldOverride) -> Self {
        self.overrides.action = Some(value);
        self
    }

    pub fn resource(mut self, value: FieldOverride) -> Self {
        self.overrides.resource = Some(value);
        self
    }

    pub fn environment(mut self, value: FieldOverride) -> Self {
        self.overrides.environment = Some(value);
        self
    }
}

/// Per-invocation enforcement states. Granted and Denied are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvocationState {
    Built,
    PreChecked,
    Executed,
    PostChecked,
    Granted,
    Denied,
}

struct Invocation {
    function_name: String,
    state: InvocationState,
}

impl Invocation {
    fn new(function_name: &str) -> Self {
        Self {
            function_name: function_name.to_string(),
            state: InvocationState::Built,
        }
    }

    fn advance(&mut self, to: InvocationState) {
        debug!(
            function = %self.function_name,
            from = ?self.state,
            to = ?to,
            "enforcement state"
        );
        self.state = to;
    }
}

/// Why a check denied; logged, never exposed to the caller.
#[derive(Debug, thiserror::Error)]
enum DenyReason {
    #[error("verdict {0}")]
    Verdict(&'static str),

    #[error("no responsible handler for obligation {0}")]
    UnhandledObligation(Value),

    #[error("obligation handler failed: {0}")]
    ObligationHandler(anyhow::Error),
}

/// Orchestrates decorated calls: builds subscriptions, reads decisions, runs
/// constraint handler bundles, and gates execution.
pub struct Enforcer {
    client: Arc<dyn DecisionClient>,
    registry: Arc<ConstraintHandlerRegistry>,
    subscriptions: SubscriptionBuilder,
    decision_wait: Duration,
}

impl Enforcer {
    pub fn new(client: Arc<dyn DecisionClient>, registry: Arc<ConstraintHandlerRegistry>) -> Self {
        Self {
            client,
            registry,
            subscriptions: SubscriptionBuilder::new(),
            decision_wait: DEFAULT_DECISION_WAIT,
        }
    }

    /// Replace the subscription builder (subject functions live there).
    pub fn with_subscriptions(mut self, subscriptions: SubscriptionBuilder) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Bound the wait for a subscription's first decision. Should match the
    /// PDP client's retry budget.
    pub fn with_decision_wait(mut self, wait: Duration) -> Self {
        self.decision_wait = wait;
        self
    }

    /// Enforce before the call: the verdict gates whether the wrapped
    /// function runs at all.
    pub async fn pre_enforce<F, Fut>(
        &self,
        ctx: EnforcementContext,
        call: F,
    ) -> Result<Value, EnforcementError>
    where
        F: FnOnce(Map<String, Value>) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Value>> + Send,
    {
        let mut inv = Invocation::new(&ctx.function_name);
        let mut args = ctx.args.clone();

        let subscription = self.subscriptions.build(
            &ctx.function_name,
            &args,
            ctx.request.as_ref(),
            &ctx.overrides,
            None,
        )?;
        let mut handle = self.open(&mut inv, &subscription).await?;
        let decision = self.first(&mut inv, &mut handle).await?;

        if let Err(reason) = self.run_pre_check(&decision, &mut args) {
            return Err(self.deny(&mut inv, CheckPoint::Pre, reason));
        }
        inv.advance(InvocationState::PreChecked);

        let value = match call(args).await {
            Ok(value) => {
                inv.advance(InvocationState::Executed);
                value
            }
            Err(error) => {
                inv.advance(InvocationState::Executed);
                let current = handle.current().unwrap_or_else(|| decision.clone());
                self.route_error(&mut inv, &current, error)?
            }
        };

        let value = decision.resource_override.clone().unwrap_or(value);
        inv.advance(InvocationState::Granted);
        handle.close();
        Ok(value)
    }

    /// Enforce after the call: the wrapped function always runs; its result
    /// is embedded in `resource` before the decision is requested.
    pub async fn post_enforce<F, Fut>(
        &self,
        ctx: EnforcementContext,
        call: F,
    ) -> Result<Value, EnforcementError>
    where
        F: FnOnce(Map<String, Value>) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Value>> + Send,
    {
        let mut inv = Invocation::new(&ctx.function_name);

        let mut value = match call(ctx.args.clone()).await {
            Ok(value) => value,
            Err(error) => {
                // No decision is in flight yet, so there are no resolved
                // error handlers to consult.
                debug!(
                    function = %ctx.function_name,
                    "wrapped call failed before post-check, propagating"
                );
                return Err(EnforcementError::Application(error));
            }
        };
        inv.advance(InvocationState::Executed);

        let subscription = self.subscriptions.build(
            &ctx.function_name,
            &ctx.args,
            ctx.request.as_ref(),
            &ctx.overrides,
            Some(&value),
        )?;
        let mut handle = self.open(&mut inv, &subscription).await?;
        let decision = self.first(&mut inv, &mut handle).await?;

        if let Err(reason) = self.run_post_check(&decision, &mut value) {
            return Err(self.deny(&mut inv, CheckPoint::Post, reason));
        }
        inv.advance(InvocationState::PostChecked);

        let value = decision.resource_override.clone().unwrap_or(value);
        inv.advance(InvocationState::Granted);
        handle.close();
        Ok(value)
    }

    /// Enforce around the call: the pre-check gates execution, and the
    /// post-check re-evaluates with the most recent decision on the same
    /// subscription, which may have advanced while the function ran.
    pub async fn pre_and_post_enforce<F, Fut>(
        &self,
        ctx: EnforcementContext,
        call: F,
    ) -> Result<Value, EnforcementError>
    where
        F: FnOnce(Map<String, Value>) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Value>> + Send,
    {
        let mut inv = Invocation::new(&ctx.function_name);
        let mut args = ctx.args.clone();

        let subscription = self.subscriptions.build(
            &ctx.function_name,
            &args,
            ctx.request.as_ref(),
            &ctx.overrides,
            None,
        )?;
        let mut handle = self.open(&mut inv, &subscription).await?;
        let pre_decision = self.first(&mut inv, &mut handle).await?;

        if let Err(reason) = self.run_pre_check(&pre_decision, &mut args) {
            return Err(self.deny(&mut inv, CheckPoint::Pre, reason));
        }
        inv.advance(InvocationState::PreChecked);

        let mut value = match call(args).await {
            Ok(value) => {
                inv.advance(InvocationState::Executed);
                value
            }
            Err(error) => {
                inv.advance(InvocationState::Executed);
                let current = handle.current().unwrap_or_else(|| pre_decision.clone());
                self.route_error(&mut inv, &current, error)?
            }
        };

        // The stream may have advanced while the function ran; the latest
        // decision is authoritative for the post-check.
        let post_decision = handle.current().unwrap_or(pre_decision);

        if let Err(reason) = self.run_post_check(&post_decision, &mut value) {
            return Err(self.deny(&mut inv, CheckPoint::Post, reason));
        }
        inv.advance(InvocationState::PostChecked);

        let value = post_decision.resource_override.clone().unwrap_or(value);
        inv.advance(InvocationState::Granted);
        handle.close();
        Ok(value)
    }

    async fn open(
        &self,
        inv: &mut Invocation,
        subscription: &crate::model::AuthorizationSubscription,
    ) -> Result<DecisionHandle, EnforcementError> {
        match self.client.subscribe(subscription).await {
            Ok(handle) => Ok(handle),
            Err(error) => {
                warn!(
                    function = %inv.function_name,
                    error = %error,
                    "decision subscription failed, denying"
                );
                inv.advance(InvocationState::Denied);
                Err(EnforcementError::AccessDenied)
            }
        }
    }

    async fn first(
        &self,
        inv: &mut Invocation,
        handle: &mut DecisionHandle,
    ) -> Result<Decision, EnforcementError> {
        match handle.first_decision(self.decision_wait).await {
            Ok(decision) => {
                debug!(
                    function = %inv.function_name,
                    verdict = decision.verdict.as_str(),
                    "decision received"
                );
                Ok(decision)
            }
            Err(error) => {
                warn!(
                    function = %inv.function_name,
                    error = %error,
                    "no decision obtained, denying"
                );
                inv.advance(InvocationState::Denied);
                Err(EnforcementError::AccessDenied)
            }
        }
    }

    fn deny(&self, inv: &mut Invocation, point: CheckPoint, reason: DenyReason) -> EnforcementError {
        debug!(
            function = %inv.function_name,
            check = ?point,
            reason = %reason,
            "enforcement denied"
        );
        inv.advance(InvocationState::Denied);
        EnforcementError::AccessDenied
    }

    fn run_pre_check(
        &self,
        decision: &Decision,
        args: &mut Map<String, Value>,
    ) -> Result<(), DenyReason> {
        if let Some(constraint) = self
            .registry
            .uncovered_obligation(decision, CheckPoint::Pre)
        {
            return Err(DenyReason::UnhandledObligation(constraint.0));
        }

        let bundle = self.registry.resolve_function_arguments(decision);
        for entry in bundle.entries() {
            match entry.handler.handle(&entry.constraint, args.clone()) {
                Ok(next) => *args = next,
                Err(error) => match entry.kind {
                    ConstraintKind::Obligation => {
                        return Err(DenyReason::ObligationHandler(error));
                    }
                    ConstraintKind::Advice => {
                        warn!(error = %error, "advice argument handler failed, ignoring");
                    }
                },
            }
        }

        self.finish_check(decision)
    }

    fn run_post_check(&self, decision: &Decision, value: &mut Value) -> Result<(), DenyReason> {
        if let Some(constraint) = self
            .registry
            .uncovered_obligation(decision, CheckPoint::Post)
        {
            return Err(DenyReason::UnhandledObligation(constraint.0));
        }

        let bundle = self.registry.resolve_result(decision);
        for entry in bundle.entries() {
            match entry.handler.handle(&entry.constraint, value.clone()) {
                Ok(next) => *value = next,
                Err(error) => match entry.kind {
                    ConstraintKind::Obligation => {
                        return Err(DenyReason::ObligationHandler(error));
                    }
                    ConstraintKind::Advice => {
                        warn!(error = %error, "advice result handler failed, ignoring");
                    }
                },
            }
        }

        self.finish_check(decision)
    }

    /// On-decision handlers run for every check, independent of verdict;
    /// the verdict itself is evaluated last.
    fn finish_check(&self, decision: &Decision) -> Result<(), DenyReason> {
        let bundle = self.registry.resolve_on_decision(decision);
        for entry in bundle.entries() {
            if let Err(error) = entry.handler.handle(decision) {
                match entry.kind {
                    ConstraintKind::Obligation => {
                        return Err(DenyReason::ObligationHandler(error));
                    }
                    ConstraintKind::Advice => {
                        warn!(error = %error, "advice decision handler failed, ignoring");
                    }
                }
            }
        }

        if decision.verdict != Verdict::Permit {
            return Err(DenyReason::Verdict(decision.verdict.as_str()));
        }
        Ok(())
    }

    /// Route a wrapped-call error through resolved error handlers. The first
    /// handler that replaces the error decides the call's output.
    fn route_error(
        &self,
        inv: &mut Invocation,
        decision: &Decision,
        error: anyhow::Error,
    ) -> Result<Value, EnforcementError> {
        let bundle = self.registry.resolve_error(decision);
        for entry in bundle.entries() {
            match entry.handler.handle(&entry.constraint, &error) {
                ErrorDisposition::Replace(value) => {
                    debug!(
                        function = %inv.function_name,
                        "error handler substituted a result"
                    );
                    return Ok(value);
                }
                ErrorDisposition::Propagate => {}
            }
        }
        Err(EnforcementError::Application(error))
    }
}
