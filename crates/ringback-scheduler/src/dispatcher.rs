use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::ScheduledCall;

/// Everything the telephony side needs to ring the callee and speak the reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    pub scheduled_call_id: String,
    pub destination: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub due_time_label: String,
}

impl From<&ScheduledCall> for CallRequest {
    fn from(job: &ScheduledCall) -> Self {
        Self {
            scheduled_call_id: job.id.clone(),
            destination: job.destination.clone(),
            title: job.title.clone(),
            description: job.description.clone(),
            due_time_label: job.due_time_label.clone(),
        }
    }
}

/// Capability to place a phone call (Twilio, a SIP gateway, a test double…).
///
/// Implementations own their timeout; the engine never cancels an in-flight
/// `place_call`.
#[async_trait]
pub trait CallDispatcher: Send + Sync {
    /// Dispatcher name for logging.
    fn name(&self) -> &str;

    /// Place the call and return the dispatcher's reference id for it.
    async fn place_call(&self, req: &CallRequest) -> Result<String, DispatchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Dispatcher rejected call ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Dispatch timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Dispatcher unavailable: {0}")]
    Unavailable(String),
}
