//! Policy enforcement engine gating function calls on streamed PDP decisions.
//!
//! This crate implements the enforcement core:
//!
//! - Authorization subscription assembly from call context
//! - The abstract decision-client contract and live decision handle
//! - Constraint handler registration, resolution, and execution
//! - The per-invocation enforcement state machine (pre / post / both)
//!
//! PDP client implementations (remote and dummy) live in `pepgate-pdp`.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use pepgate_core::{ConstraintHandlerRegistry, Enforcer, EnforcementContext};
//!
//! # async fn example(client: Arc<dyn pepgate_core::DecisionClient>) -> anyhow::Result<()> {
//! let registry = Arc::new(ConstraintHandlerRegistry::new());
//! let enforcer = Enforcer::new(client, registry);
//!
//! let result = enforcer
//!     .pre_enforce(
//!         EnforcementContext::new("fetch_patient").arg("id", 7),
//!         |args| async move { Ok(serde_json::json!({"id": args["id"]})) },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod enforce;
pub mod error;
pub mod handlers;
pub mod model;
pub mod registry;
pub mod resolve;
pub mod subscription;

pub use client::{DecisionClient, DecisionError, DecisionHandle};
pub use enforce::{Enforcer, EnforcementContext, DEFAULT_DECISION_WAIT};
pub use error::EnforcementError;
pub use handlers::{
    ArgumentMap, ConstraintHandler, ErrorDisposition, ErrorHandler, FunctionArgumentsHandler,
    OnDecisionHandler, ResultHandler,
};
pub use model::{AuthorizationSubscription, Constraint, Decision, Verdict};
pub use registry::ConstraintHandlerRegistry;
pub use resolve::{BundleEntry, CheckPoint, ConstraintHandlerBundle, ConstraintKind};
pub use subscription::{
    FieldOverride, FieldOverrides, RequestMetadata, SubjectContext, SubjectFn,
    SubscriptionBuilder, ANONYMOUS_SUBJECT,
};
