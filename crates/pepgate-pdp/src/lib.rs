//! PDP decision clients for the enforcement engine.
//!
//! Two implementations of [`pepgate_core::DecisionClient`]:
//!
//! - [`RemotePdpClient`] subscribes to a remote PDP's decide endpoint over an
//!   SSE stream, with basic-auth credentials and bounded constant-interval
//!   reconnection.
//! - [`DummyPdpClient`] grants everything locally; development only.
//!
//! [`client_from_config`] selects between them from a [`PdpConfig`].

use std::sync::Arc;

use pepgate_core::DecisionClient;

pub mod config;
pub mod dummy;
pub mod error;
pub mod remote;
mod sse;

pub use config::PdpConfig;
pub use dummy::DummyPdpClient;
pub use error::PdpError;
pub use remote::RemotePdpClient;

/// Build the decision client the configuration asks for.
pub fn client_from_config(config: &PdpConfig) -> Result<Arc<dyn DecisionClient>, PdpError> {
    if config.dummy {
        Ok(Arc::new(DummyPdpClient::new()))
    } else {
        Ok(Arc::new(RemotePdpClient::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pepgate_core::{AuthorizationSubscription, Verdict};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn dummy_flag_selects_the_dummy_client() {
        let config = PdpConfig::default().with_dummy(true);
        let client = client_from_config(&config).unwrap();

        let subscription =
            AuthorizationSubscription::new(json!("anonymous"), json!({}), json!({}));
        let mut handle = client.subscribe(&subscription).await.unwrap();
        let decision = handle
            .first_decision(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::Permit);
    }

    #[test]
    fn remote_is_the_default_selection() {
        let config = PdpConfig::default();
        assert!(client_from_config(&config).is_ok());
    }
}
