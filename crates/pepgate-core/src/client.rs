//! Abstract PDP connection contract.
//!
//! A [`DecisionClient`] turns one [`AuthorizationSubscription`] into a
//! [`DecisionHandle`]: a live view of the decision stream for that
//! subscription. Implementations live in the `pepgate-pdp` crate; the
//! enforcer only depends on this contract.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::model::{AuthorizationSubscription, Decision};

/// Errors surfaced by the decision client contract.
///
/// Inside the enforcer all of these converge to a denial; the variants exist
/// for logging and for callers that talk to a client directly.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// The PDP stayed unreachable beyond the retry bound without delivering
    /// a first decision.
    #[error("connection exhausted: no decision within {waited:?}")]
    ConnectionExhausted { waited: Duration },

    /// Opening the subscription failed outright (bad config, encode error).
    #[error("subscription failed: {message}")]
    Subscription { message: String },

    /// The stream terminated and no further decisions will arrive.
    #[error("decision stream closed")]
    StreamClosed,
}

/// Connection to a Policy Decision Point.
#[async_trait]
pub trait DecisionClient: Send + Sync {
    /// Open a decision subscription for `subscription`.
    ///
    /// The returned handle tracks the live decision stream; callers must
    /// close it (or drop it) when the enforced invocation ends.
    async fn subscribe(
        &self,
        subscription: &AuthorizationSubscription,
    ) -> Result<DecisionHandle, DecisionError>;
}

/// Live view of one decision subscription.
///
/// The handle always exposes the most recently received decision. Closing is
/// idempotent and also happens on drop, so the underlying connection is
/// released on every exit path of an invocation.
#[derive(Debug)]
pub struct DecisionHandle {
    rx: watch::Receiver<Option<Decision>>,
    close: Option<oneshot::Sender<()>>,
}

impl DecisionHandle {
    /// Build a handle over a decision channel fed by a background task.
    ///
    /// The task should stop when `close` fires or its receiver is dropped.
    pub fn from_channel(rx: watch::Receiver<Option<Decision>>, close: oneshot::Sender<()>) -> Self {
        Self {
            rx,
            close: Some(close),
        }
    }

    /// Build a handle that already holds its one and only decision.
    pub fn immediate(decision: Decision) -> Self {
        let (_tx, rx) = watch::channel(Some(decision));
        Self { rx, close: None }
    }

    /// Await the first decision of the subscription, waiting at most
    /// `max_wait`.
    ///
    /// Returns [`DecisionError::ConnectionExhausted`] when the wait elapses
    /// or the stream ends before any decision arrives.
    pub async fn first_decision(&mut self, max_wait: Duration) -> Result<Decision, DecisionError> {
        if let Some(decision) = self.rx.borrow().clone() {
            return Ok(decision);
        }

        let started = Instant::now();
        let wait = async {
            loop {
                if self.rx.changed().await.is_err() {
                    // Producer gave up without ever delivering a decision.
                    return Err(DecisionError::ConnectionExhausted {
                        waited: started.elapsed(),
                    });
                }
                if let Some(decision) = self.rx.borrow().clone() {
                    return Ok(decision);
                }
            }
        };

        match tokio::time::timeout(max_wait, wait).await {
            Ok(result) => result,
            Err(_) => Err(DecisionError::ConnectionExhausted { waited: max_wait }),
        }
    }

    /// The most recently received decision, without blocking.
    pub fn current(&self) -> Option<Decision> {
        self.rx.borrow().clone()
    }

    /// Close the subscription, releasing the underlying connection.
    ///
    /// Safe to call more than once and after the stream already terminated.
    pub fn close(&mut self) {
        if let Some(close) = self.close.take() {
            debug!("closing decision subscription");
            let _ = close.send(());
        }
    }
}

impl Drop for DecisionHandle {
    fn drop(&mut self) {
        self.close();
    }
}
