//! Always-PERMIT stand-in client for development and tests.

use async_trait::async_trait;
use tracing::warn;

use pepgate_core::{
    AuthorizationSubscription, Decision, DecisionClient, DecisionError, DecisionHandle,
};

/// Decision client that grants every subscription without contacting a PDP.
///
/// Every subscription yields a single PERMIT with no constraints. Use this to
/// run an application without PDP infrastructure; never deploy it.
#[derive(Debug, Default)]
pub struct DummyPdpClient;

impl DummyPdpClient {
    pub fn new() -> Self {
        warn!("dummy PDP client in use, every request is permitted; not for production");
        Self
    }
}

#[async_trait]
impl DecisionClient for DummyPdpClient {
    async fn subscribe(
        &self,
        _subscription: &AuthorizationSubscription,
    ) -> Result<DecisionHandle, DecisionError> {
        Ok(DecisionHandle::immediate(Decision::permit()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pepgate_core::{
        Constraint, ConstraintHandler, ConstraintHandlerRegistry, Enforcer, EnforcementContext,
        OnDecisionHandler, Verdict,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn always_permits_without_constraints() {
        let client = DummyPdpClient::new();
        let subscription =
            AuthorizationSubscription::new(json!("anonymous"), json!({}), json!({}));

        let mut handle = client.subscribe(&subscription).await.unwrap();
        let decision = handle
            .first_decision(Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(decision.verdict, Verdict::Permit);
        assert!(decision.obligations.is_empty());
        assert!(decision.advices.is_empty());
        assert!(decision.resource_override.is_none());
    }

    struct CountingHandler(AtomicUsize);

    impl ConstraintHandler for CountingHandler {
        fn is_responsible(&self, _constraint: &Constraint) -> bool {
            true
        }
    }

    impl OnDecisionHandler for CountingHandler {
        fn handle(&self, _decision: &pepgate_core::Decision) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn enforced_call_is_granted_with_no_handler_runs() {
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        let registry = Arc::new(ConstraintHandlerRegistry::new());
        registry.register_on_decision(Arc::clone(&handler) as Arc<dyn OnDecisionHandler>);

        let enforcer = Enforcer::new(Arc::new(DummyPdpClient::new()), registry);
        let value = enforcer
            .pre_enforce(EnforcementContext::new("lookup"), |_args| async move {
                Ok(json!("ok"))
            })
            .await
            .unwrap();

        assert_eq!(value, json!("ok"));
        assert_eq!(handler.0.load(Ordering::SeqCst), 0);
    }
}
