use std::time::Duration;

use async_trait::async_trait;
use ringback_core::config::DispatcherConfig;
use ringback_scheduler::{CallDispatcher, CallRequest, DispatchError};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Places calls by POSTing the [`CallRequest`] to an external telephony bridge.
pub struct HttpDispatcher {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct PlaceCallResponse {
    call_reference_id: String,
}

impl HttpDispatcher {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
            timeout,
        })
    }
}

#[async_trait]
impl CallDispatcher for HttpDispatcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn place_call(&self, req: &CallRequest) -> Result<String, DispatchError> {
        debug!(call_id = %req.scheduled_call_id, url = %self.url, "placing call");

        let mut builder = self.client.post(&self.url).json(req);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                }
            } else if e.is_connect() {
                DispatchError::Unavailable(e.to_string())
            } else {
                DispatchError::Transport(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "dispatcher rejected call");
            return Err(DispatchError::Rejected {
                status,
                message: text,
            });
        }

        let body: PlaceCallResponse = resp
            .json()
            .await
            .map_err(|e| DispatchError::Parse(e.to_string()))?;
        if body.call_reference_id.trim().is_empty() {
            return Err(DispatchError::Parse("empty call_reference_id".into()));
        }
        Ok(body.call_reference_id)
    }
}

/// Logs the call instead of placing it. Used when no dispatcher URL is set.
pub struct DryRunDispatcher;

#[async_trait]
impl CallDispatcher for DryRunDispatcher {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn place_call(&self, req: &CallRequest) -> Result<String, DispatchError> {
        let reference = format!("dry-run-{}", uuid::Uuid::new_v4());
        info!(
            call_id = %req.scheduled_call_id,
            destination = %req.destination,
            title = %req.title,
            due = %req.due_time_label,
            call_ref = %reference,
            "dry run: would place call"
        );
        Ok(reference)
    }
}

/// Pick the dispatcher for this config: HTTP when a URL is configured,
/// dry-run otherwise.
pub fn build_dispatcher(
    cfg: &DispatcherConfig,
) -> Result<Box<dyn CallDispatcher>, reqwest::Error> {
    match cfg.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => {
            info!(%url, "using HTTP call dispatcher");
            Ok(Box::new(HttpDispatcher::new(
                url,
                cfg.token.clone(),
                Duration::from_secs(cfg.timeout_secs),
            )?))
        }
        None => {
            warn!("no [dispatcher] url configured; calls will only be logged");
            Ok(Box::new(DryRunDispatcher))
        }
    }
}
