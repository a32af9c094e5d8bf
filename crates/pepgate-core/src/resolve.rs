//! Per-decision handler resolution.
//!
//! A bundle is the ordered set of providers responsible for one decision's
//! constraints, scoped to a single enforcement check. Bundles are created
//! fresh per check and owned by their invocation; nothing here is shared.

use std::sync::Arc;

use crate::handlers::ConstraintHandler;
use crate::model::{Constraint, Decision};

/// Which enforcement check a bundle is being resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPoint {
    /// Before the wrapped call; obligations act on arguments.
    Pre,
    /// After the wrapped call; obligations act on the result.
    Post,
}

/// Whether an entry was matched against a mandatory or an optional
/// constraint. Failure semantics differ: obligations deny, advices log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Obligation,
    Advice,
}

/// One selected provider together with the constraint it matched.
pub struct BundleEntry<H: ?Sized> {
    pub handler: Arc<H>,
    pub constraint: Constraint,
    pub kind: ConstraintKind,
}

/// Resolved, ordered providers for one decision and one category.
pub struct ConstraintHandlerBundle<H: ?Sized> {
    entries: Vec<BundleEntry<H>>,
}

impl<H: ?Sized> ConstraintHandlerBundle<H> {
    pub fn entries(&self) -> &[BundleEntry<H>] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Select every responsible provider for the decision's obligations and
/// advices, ordered by ascending priority.
///
/// Selection walks obligations first, then advices; the stable sort keeps
/// that walk order for equal priorities, which in turn preserves
/// registration order per constraint.
pub(crate) fn resolve_bundle<H: ConstraintHandler + ?Sized>(
    providers: &[Arc<H>],
    decision: &Decision,
) -> ConstraintHandlerBundle<H> {
    let mut entries = Vec::new();

    for (constraints, kind) in [
        (&decision.obligations, ConstraintKind::Obligation),
        (&decision.advices, ConstraintKind::Advice),
    ] {
        for constraint in constraints {
            for provider in providers {
                if provider.is_responsible(constraint) {
                    entries.push(BundleEntry {
                        handler: Arc::clone(provider),
                        constraint: constraint.clone(),
                        kind,
                    });
                }
            }
        }
    }

    entries.sort_by_key(|entry| entry.handler.priority());
    ConstraintHandlerBundle { entries }
}

/// True when at least one provider in any of the given categories claims the
/// constraint.
pub(crate) fn constraint_covered<A, B>(
    constraint: &Constraint,
    primary: &[Arc<A>],
    secondary: &[Arc<B>],
) -> bool
where
    A: ConstraintHandler + ?Sized,
    B: ConstraintHandler + ?Sized,
{
    primary.iter().any(|p| p.is_responsible(constraint))
        || secondary.iter().any(|p| p.is_responsible(constraint))
}
