//! Constraint handler provider interfaces.
//!
//! Providers are registered once at startup and dispatched per decision by
//! their responsibility predicate. There is one trait per capability
//! category rather than a shared type-erased base, so each category keeps a
//! precise input/output signature.

use serde_json::{Map, Value};

use crate::model::{Constraint, Decision};

/// Call arguments as a named map, rewritable by argument handlers.
pub type ArgumentMap = Map<String, Value>;

/// Common surface of every constraint handler provider.
///
/// `priority` orders execution within a resolved bundle (ascending; ties
/// preserve registration order). `is_responsible` decides whether this
/// provider services a given constraint.
pub trait ConstraintHandler: Send + Sync {
    fn priority(&self) -> i32 {
        0
    }

    fn is_responsible(&self, constraint: &Constraint) -> bool;
}

/// Reacts to the whole decision, independent of verdict.
///
/// Typical use: audit logging, notification side effects. An error from an
/// obligation-matched handler denies the invocation.
pub trait OnDecisionHandler: ConstraintHandler {
    fn handle(&self, decision: &Decision) -> anyhow::Result<()>;
}

/// May transform the call's arguments before the wrapped function runs.
///
/// Handlers chain: each receives the output of the previous one.
pub trait FunctionArgumentsHandler: ConstraintHandler {
    fn handle(&self, constraint: &Constraint, args: ArgumentMap) -> anyhow::Result<ArgumentMap>;
}

/// May transform or replace the wrapped function's return value.
pub trait ResultHandler: ConstraintHandler {
    fn handle(&self, constraint: &Constraint, value: Value) -> anyhow::Result<Value>;
}

/// What an error handler decided to do with a wrapped-call failure.
#[derive(Debug)]
pub enum ErrorDisposition {
    /// Let the error continue to the next handler (or the caller).
    Propagate,
    /// Swallow the error and use this value as the call's output.
    Replace(Value),
}

/// Handles an error raised by the wrapped function.
///
/// Handlers run in priority order until one returns
/// [`ErrorDisposition::Replace`]; otherwise the error is re-raised.
pub trait ErrorHandler: ConstraintHandler {
    fn handle(&self, constraint: &Constraint, error: &anyhow::Error) -> ErrorDisposition;
}
