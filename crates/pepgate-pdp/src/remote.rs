//! Remote PDP client: subscription over an SSE decision stream.
//!
//! Each subscription POSTs to the PDP's decide endpoint and reads decision
//! frames on a background task. Connection and stream failures before the
//! first decision are retried with a constant backoff, bounded by the
//! configured maximum total retry duration; a stream that fails after
//! delivering a decision is a terminal close and the last decision remains
//! readable.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use pepgate_core::{AuthorizationSubscription, Decision, DecisionClient, DecisionError, DecisionHandle};

use crate::config::PdpConfig;
use crate::error::PdpError;
use crate::sse::SseFrameParser;

/// Constant delay between reconnect attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Connection setup timeout; the stream itself is long-lived and untimed.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
enum StreamError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),
}

/// Client for a remote Policy Decision Point.
#[derive(Debug, Clone)]
pub struct RemotePdpClient {
    http: reqwest::Client,
    decide_url: String,
    auth_header: Option<String>,
    backoff_max: Duration,
}

impl RemotePdpClient {
    /// Build a client from configuration.
    ///
    /// Fails when the base URL is missing or unparseable; credentials are
    /// optional (no Authorization header is sent without a key).
    pub fn new(config: &PdpConfig) -> Result<Self, PdpError> {
        url::Url::parse(&config.base_url)
            .map_err(|e| PdpError::Config(format!("invalid PDP base url: {}", e)))?;

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify)
            .build()
            .map_err(|e| PdpError::Config(format!("failed to create HTTP client: {}", e)))?;

        let auth_header = config.key.as_ref().map(|key| {
            let secret = config.secret.as_deref().unwrap_or_default();
            format!("Basic {}", BASE64.encode(format!("{}:{}", key, secret)))
        });

        Ok(Self {
            http,
            decide_url: format!("{}/decide", config.base_url.trim_end_matches('/')),
            auth_header,
            backoff_max: config.backoff_max(),
        })
    }

    /// The decide endpoint this client talks to.
    pub fn decide_url(&self) -> &str {
        &self.decide_url
    }
}

#[async_trait]
impl DecisionClient for RemotePdpClient {
    async fn subscribe(
        &self,
        subscription: &AuthorizationSubscription,
    ) -> Result<DecisionHandle, DecisionError> {
        let body = serde_json::to_value(subscription).map_err(|e| DecisionError::Subscription {
            message: format!("failed to encode subscription: {}", e),
        })?;

        let (tx, rx) = watch::channel(None);
        let (close_tx, close_rx) = oneshot::channel();

        let client = self.clone();
        tokio::spawn(async move {
            client.run_subscription(body, tx, close_rx).await;
        });

        Ok(DecisionHandle::from_channel(rx, close_tx))
    }
}

impl RemotePdpClient {
    /// Background read loop for one subscription. Exits when the caller
    /// closes the handle, the retry budget runs out, or the stream
    /// terminates after delivering at least one decision.
    async fn run_subscription(
        self,
        body: Value,
        tx: watch::Sender<Option<Decision>>,
        close_rx: oneshot::Receiver<()>,
    ) {
        let work = async {
            let started = Instant::now();
            let mut delivered = false;

            loop {
                match self.stream_once(&body, &tx, &mut delivered).await {
                    Ok(()) if delivered => {
                        debug!(url = %self.decide_url, "decision stream closed");
                        return;
                    }
                    Ok(()) => {
                        warn!(url = %self.decide_url, "stream ended before first decision");
                    }
                    Err(e) if delivered => {
                        // Resilience floor: keep the last decision valid,
                        // no reconnection after a delivered stream fails.
                        warn!(
                            url = %self.decide_url,
                            error = %e,
                            "decision stream failed after first decision, keeping last"
                        );
                        return;
                    }
                    Err(e) => {
                        warn!(url = %self.decide_url, error = %e, "PDP connection failed");
                    }
                }

                if started.elapsed() + RETRY_INTERVAL >= self.backoff_max {
                    warn!(
                        url = %self.decide_url,
                        waited = ?started.elapsed(),
                        "PDP retry budget exhausted without a decision"
                    );
                    return;
                }
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        };

        tokio::select! {
            () = work => {}
            _ = close_rx => {
                debug!(url = %self.decide_url, "subscription closed by caller");
            }
        }
    }

    async fn stream_once(
        &self,
        body: &Value,
        tx: &watch::Sender<Option<Decision>>,
        delivered: &mut bool,
    ) -> Result<(), StreamError> {
        let mut request = self
            .http
            .post(&self.decide_url)
            .header(ACCEPT, "text/event-stream")
            .json(body);
        if let Some(auth) = &self.auth_header {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(StreamError::Status(status));
        }

        let mut stream = response.bytes_stream();
        let mut parser = SseFrameParser::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            for payload in parser.feed(&bytes) {
                match serde_json::from_str::<Decision>(&payload) {
                    Ok(decision) => {
                        debug!(verdict = decision.verdict.as_str(), "decision received");
                        *delivered = true;
                        if tx.send(Some(decision)).is_err() {
                            // Handle dropped; nobody is listening.
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "undecodable decision frame, skipping");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pepgate_core::Verdict;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn subscription() -> AuthorizationSubscription {
        AuthorizationSubscription::new(
            json!("anonymous"),
            json!({"function": {"function_name": "lookup"}}),
            json!({"function": {"kwargs": {}}}),
        )
    }

    fn sse_body(frames: &[&str]) -> String {
        frames
            .iter()
            .map(|f| format!("data: {}\n\n", f))
            .collect()
    }

    async fn client_for(server: &MockServer, backoff_max: Duration) -> RemotePdpClient {
        let config = PdpConfig::default()
            .with_base_url(server.uri())
            .with_credentials("key", "secret")
            .with_backoff_max(backoff_max);
        RemotePdpClient::new(&config).expect("failed to create client")
    }

    #[tokio::test]
    async fn subscribe_yields_first_decision() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/decide"))
            .and(header(
                "authorization",
                format!("Basic {}", BASE64.encode("key:secret")).as_str(),
            ))
            .and(body_partial_json(json!({"subject": "anonymous"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse_body(&[r#"{"decision":"PERMIT"}"#]), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(2)).await;
        let mut handle = client.subscribe(&subscription()).await.unwrap();
        let decision = handle
            .first_decision(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::Permit);
    }

    #[tokio::test]
    async fn later_decisions_update_the_handle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/decide"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse_body(&[r#"{"decision":"PERMIT"}"#, r#"{"decision":"DENY"}"#]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(2)).await;
        let mut handle = client.subscribe(&subscription()).await.unwrap();
        handle.first_decision(Duration::from_secs(2)).await.unwrap();

        let observed_deny = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(d) = handle.current() {
                    if d.verdict == Verdict::Deny {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(observed_deny.is_ok(), "second decision never observed");
    }

    #[tokio::test]
    async fn undecodable_frames_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/decide"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse_body(&["not json", r#"{"decision":"PERMIT"}"#]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(2)).await;
        let mut handle = client.subscribe(&subscription()).await.unwrap();
        let decision = handle
            .first_decision(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::Permit);
    }

    #[tokio::test]
    async fn decision_with_constraints_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/decide"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse_body(&[
                    r#"{"decision":"PERMIT","obligations":[{"type":"log"}],"advice":[{"type":"notify"}]}"#,
                ]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(2)).await;
        let mut handle = client.subscribe(&subscription()).await.unwrap();
        let decision = handle
            .first_decision(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(decision.obligations.len(), 1);
        assert_eq!(decision.advices.len(), 1);
    }

    #[tokio::test]
    async fn error_status_exhausts_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/decide"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let bound = Duration::from_millis(300);
        let client = client_for(&server, bound).await;
        let mut handle = client.subscribe(&subscription()).await.unwrap();

        let started = std::time::Instant::now();
        let err = handle.first_decision(bound).await.unwrap_err();
        assert!(matches!(err, DecisionError::ConnectionExhausted { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn no_content_response_is_not_a_decision() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/decide"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let bound = Duration::from_millis(300);
        let client = client_for(&server, bound).await;
        let mut handle = client.subscribe(&subscription()).await.unwrap();

        let err = handle.first_decision(bound).await.unwrap_err();
        assert!(matches!(err, DecisionError::ConnectionExhausted { .. }));
    }

    #[tokio::test]
    async fn unresponsive_pdp_exhausts_within_the_bound() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/decide"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(10))
                    .set_body_raw(sse_body(&[r#"{"decision":"PERMIT"}"#]), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let bound = Duration::from_millis(300);
        let client = client_for(&server, bound).await;
        let mut handle = client.subscribe(&subscription()).await.unwrap();

        let started = std::time::Instant::now();
        let err = handle.first_decision(bound).await.unwrap_err();
        assert!(matches!(err, DecisionError::ConnectionExhausted { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn stream_failure_after_first_decision_keeps_it_without_reconnect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::clone(&connections);

        // Serves one decision frame as a chunked body, then drops the
        // connection without the terminal chunk, so the body read fails
        // mid-stream.
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                accepted.fetch_add(1, Ordering::SeqCst);
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;

                let frame = "data: {\"decision\":\"PERMIT\"}\n\n";
                let response = format!(
                    "HTTP/1.1 200 OK\r\n\
                     content-type: text/event-stream\r\n\
                     transfer-encoding: chunked\r\n\r\n\
                     {:x}\r\n{}\r\n",
                    frame.len(),
                    frame
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.flush().await;
            }
        });

        let config = PdpConfig::default()
            .with_base_url(format!("http://{}/api/pdp", addr))
            .with_backoff_max(Duration::from_secs(5));
        let client = RemotePdpClient::new(&config).expect("failed to create client");
        let mut handle = client.subscribe(&subscription()).await.unwrap();

        let decision = handle
            .first_decision(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::Permit);

        // Past the retry interval; a reconnecting client would have dialed
        // again by now.
        tokio::time::sleep(RETRY_INTERVAL + Duration::from_millis(200)).await;
        assert_eq!(handle.current().unwrap().verdict, Verdict::Permit);
        assert_eq!(
            connections.load(Ordering::SeqCst),
            1,
            "delivered stream must not reconnect after failing"
        );
    }

    #[tokio::test]
    async fn closing_the_handle_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/decide"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse_body(&[r#"{"decision":"PERMIT"}"#]), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(2)).await;
        let mut handle = client.subscribe(&subscription()).await.unwrap();
        handle.first_decision(Duration::from_secs(2)).await.unwrap();
        handle.close();
        handle.close();
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        let config = PdpConfig::default().with_base_url("not a url");
        let err = RemotePdpClient::new(&config).unwrap_err();
        assert!(matches!(err, PdpError::Config(_)));
    }

    #[test]
    fn no_auth_header_without_key() {
        let config = PdpConfig::default();
        let client = RemotePdpClient::new(&config).unwrap();
        assert!(client.auth_header.is_none());
        assert!(client.decide_url().ends_with("/decide"));
    }
}
