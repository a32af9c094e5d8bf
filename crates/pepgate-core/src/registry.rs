//! Process-wide constraint handler registry.
//!
//! The registry is constructed at the composition root and handed to the
//! enforcer explicitly (usually behind an `Arc`); there is no hidden global.
//! Registration is additive only. Registering an equivalent provider twice
//! is allowed and means it runs twice — callers own that tradeoff.

use std::sync::{Arc, RwLock};

use crate::handlers::{
    ConstraintHandler, ErrorHandler, FunctionArgumentsHandler, OnDecisionHandler, ResultHandler,
};
use crate::model::{Constraint, Decision};
use crate::resolve::{resolve_bundle, CheckPoint, ConstraintHandlerBundle};

/// Registered handler providers, grouped by capability category.
///
/// Reads (resolution) and writes (registration) may interleave; readers
/// always observe a fully applied registration.
#[derive(Default)]
pub struct ConstraintHandlerRegistry {
    on_decision: RwLock<Vec<Arc<dyn OnDecisionHandler>>>,
    function_arguments: RwLock<Vec<Arc<dyn FunctionArgumentsHandler>>>,
    result: RwLock<Vec<Arc<dyn ResultHandler>>>,
    error: RwLock<Vec<Arc<dyn ErrorHandler>>>,
}

impl ConstraintHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_on_decision(&self, provider: Arc<dyn OnDecisionHandler>) {
        self.on_decision.write().expect("registry lock poisoned").push(provider);
    }

    pub fn register_on_decision_many(
        &self,
        providers: impl IntoIterator<Item = Arc<dyn OnDecisionHandler>>,
    ) {
        self.on_decision
            .write()
            .expect("registry lock poisoned")
            .extend(providers);
    }

    pub fn register_function_arguments(&self, provider: Arc<dyn FunctionArgumentsHandler>) {
        self.function_arguments
            .write()
            .expect("registry lock poisoned")
            .push(provider);
    }

    pub fn register_function_arguments_many(
        &self,
        providers: impl IntoIterator<Item = Arc<dyn FunctionArgumentsHandler>>,
    ) {
        self.function_arguments
            .write()
            .expect("registry lock poisoned")
            .extend(providers);
    }

    pub fn register_result(&self, provider: Arc<dyn ResultHandler>) {
        self.result.write().expect("registry lock poisoned").push(provider);
    }

    pub fn register_result_many(&self, providers: impl IntoIterator<Item = Arc<dyn ResultHandler>>) {
        self.result
            .write()
            .expect("registry lock poisoned")
            .extend(providers);
    }

    pub fn register_error(&self, provider: Arc<dyn ErrorHandler>) {
        self.error.write().expect("registry lock poisoned").push(provider);
    }

    pub fn register_error_many(&self, providers: impl IntoIterator<Item = Arc<dyn ErrorHandler>>) {
        self.error
            .write()
            .expect("registry lock poisoned")
            .extend(providers);
    }

    pub fn resolve_on_decision(
        &self,
        decision: &Decision,
    ) -> ConstraintHandlerBundle<dyn OnDecisionHandler> {
        let providers = self.on_decision.read().expect("registry lock poisoned");
        resolve_bundle(&providers, decision)
    }

    pub fn resolve_function_arguments(
        &self,
        decision: &Decision,
    ) -> ConstraintHandlerBundle<dyn FunctionArgumentsHandler> {
        let providers = self
            .function_arguments
            .read()
            .expect("registry lock poisoned");
        resolve_bundle(&providers, decision)
    }

    pub fn resolve_result(&self, decision: &Decision) -> ConstraintHandlerBundle<dyn ResultHandler> {
        let providers = self.result.read().expect("registry lock poisoned");
        resolve_bundle(&providers, decision)
    }

    pub fn resolve_error(&self, decision: &Decision) -> ConstraintHandlerBundle<dyn ErrorHandler> {
        let providers = self.error.read().expect("registry lock poisoned");
        resolve_bundle(&providers, decision)
    }

    /// First obligation constraint of the decision with no responsible
    /// provider for the given check point, if any.
    ///
    /// Coverage counts `OnDecision` providers plus the category whose
    /// handlers act at that check point (arguments pre, result post).
    pub fn uncovered_obligation(
        &self,
        decision: &Decision,
        point: CheckPoint,
    ) -> Option<Constraint> {
        let on_decision = self.on_decision.read().expect("registry lock poisoned");
        match point {
            CheckPoint::Pre => {
                let mutating = self
                    .function_arguments
                    .read()
                    .expect("registry lock poisoned");
                first_uncovered(decision, &on_decision, &mutating)
            }
            CheckPoint::Post => {
                let mutating = self.result.read().expect("registry lock poisoned");
                first_uncovered(decision, &on_decision, &mutating)
            }
        }
    }
}

fn first_uncovered<A, B>(
    decision: &Decision,
    primary: &[Arc<A>],
    secondary: &[Arc<B>],
) -> Option<Constraint>
where
    A: ConstraintHandler + ?Sized,
    B: ConstraintHandler + ?Sized,
{
    decision
        .obligations
        .iter()
        .find(|c| !crate::resolve::constraint_covered(c, primary, secondary))
        .cloned()
}
