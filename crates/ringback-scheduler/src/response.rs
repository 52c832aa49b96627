//! In-call keypresses and dispatcher status callbacks.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{Result, SchedulerError},
    label::DueTimeFormatter,
    store::{CallStore, JobStore},
    types::{now_millis, ActiveCallStatus, CallStatus, ScheduledCall},
};

/// Meaning of a digit pressed during the reminder call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keypress {
    Acknowledge,
    Snooze,
    Other(String),
}

impl Keypress {
    pub fn from_digits(digits: &str) -> Self {
        match digits.trim() {
            "1" => Keypress::Acknowledge,
            "2" => Keypress::Snooze,
            other => Keypress::Other(other.to_string()),
        }
    }
}

/// Tells the dispatcher what happened so it can pick the next prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum KeypressOutcome {
    Acknowledged,
    Snoozed { new_call_id: String },
    /// Unrecognised input; the dispatcher should play the menu again.
    Reprompt,
    /// Unknown or evicted call, or the callee already answered the prompt.
    Ignored,
}

pub struct ResponseHandler {
    jobs: Arc<dyn JobStore>,
    calls: Arc<dyn CallStore>,
    snooze_ms: i64,
    labels: DueTimeFormatter,
}

impl ResponseHandler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        calls: Arc<dyn CallStore>,
        snooze_minutes: i64,
        labels: DueTimeFormatter,
    ) -> Self {
        Self {
            jobs,
            calls,
            snooze_ms: snooze_minutes * 60_000,
            labels,
        }
    }

    pub fn on_keypress(&self, call_reference_id: &str, digits: &str) -> Result<KeypressOutcome> {
        self.on_keypress_at(call_reference_id, digits, now_millis())
    }

    pub fn on_keypress_at(
        &self,
        call_reference_id: &str,
        digits: &str,
        now: i64,
    ) -> Result<KeypressOutcome> {
        let action = Keypress::from_digits(digits);
        if let Keypress::Other(input) = &action {
            debug!(call_ref = %call_reference_id, %input, "unrecognised keypress");
            return Ok(KeypressOutcome::Reprompt);
        }

        let call = match self.calls.get(call_reference_id) {
            Ok(call) => call,
            Err(SchedulerError::NotFound { .. }) => {
                debug!(call_ref = %call_reference_id, "keypress for unknown call");
                return Ok(KeypressOutcome::Ignored);
            }
            Err(e) => return Err(e),
        };
        let job_id = call.scheduled_call_id.as_str();

        match action {
            Keypress::Acknowledge => self.acknowledge(job_id, now),
            Keypress::Snooze => self.snooze(job_id, now),
            Keypress::Other(_) => Ok(KeypressOutcome::Reprompt),
        }
    }

    fn acknowledge(&self, job_id: &str, now: i64) -> Result<KeypressOutcome> {
        let mut changed = false;
        let job = self.jobs.modify(job_id, &mut |j: &mut ScheduledCall| {
            if j.status.is_user_confirmed() {
                return false;
            }
            j.status = CallStatus::Acknowledged;
            j.updated_at = now;
            changed = true;
            true
        })?;
        match job {
            Some(_) if changed => {
                info!(call_id = %job_id, "reminder acknowledged");
                Ok(KeypressOutcome::Acknowledged)
            }
            Some(j) if j.status == CallStatus::Acknowledged => Ok(KeypressOutcome::Acknowledged),
            _ => Ok(KeypressOutcome::Ignored),
        }
    }

    fn snooze(&self, job_id: &str, now: i64) -> Result<KeypressOutcome> {
        let mut changed = false;
        let original = self.jobs.modify(job_id, &mut |j: &mut ScheduledCall| {
            if j.status.is_user_confirmed() {
                return false;
            }
            j.status = CallStatus::Snoozed;
            j.updated_at = now;
            changed = true;
            true
        })?;
        let Some(original) = original.filter(|_| changed) else {
            debug!(call_id = %job_id, "snooze ignored");
            return Ok(KeypressOutcome::Ignored);
        };

        let call_at = now + self.snooze_ms;
        let next = original.snoozed_copy(
            Uuid::new_v4().to_string(),
            call_at,
            now,
            self.labels.label(call_at, now),
        );
        let new_call_id = next.id.clone();
        self.jobs.submit(next, now)?;
        info!(call_id = %job_id, %new_call_id, call_at, "reminder snoozed");
        Ok(KeypressOutcome::Snoozed { new_call_id })
    }

    /// Parse a raw dispatcher status string and apply it.
    pub fn on_status(&self, call_reference_id: &str, status: &str) -> Result<()> {
        let status = status
            .parse::<ActiveCallStatus>()
            .map_err(SchedulerError::InvalidEvent)?;
        self.on_status_at(call_reference_id, status, now_millis());
        Ok(())
    }

    /// The active call always takes the new status. Terminal statuses also
    /// land on the scheduled call unless the callee already acknowledged or
    /// snoozed it.
    pub fn on_status_at(&self, call_reference_id: &str, status: ActiveCallStatus, now: i64) {
        let Some(call) = self.calls.update_status(call_reference_id, status, now) else {
            debug!(call_ref = %call_reference_id, %status, "status for unknown call");
            return;
        };
        debug!(call_ref = %call_reference_id, %status, "call status updated");

        let Some(outcome) = status.terminal_outcome() else {
            return;
        };
        let result = self
            .jobs
            .modify(&call.scheduled_call_id, &mut |j: &mut ScheduledCall| {
                if j.status.is_user_confirmed() || j.status == outcome {
                    return false;
                }
                j.status = outcome;
                j.updated_at = now;
                true
            });
        match result {
            Ok(Some(job)) => {
                debug!(call_id = %job.id, status = %job.status, "scheduled call settled")
            }
            Ok(None) => debug!(call_id = %call.scheduled_call_id, "scheduled call already evicted"),
            Err(e) => tracing::error!(call_id = %call.scheduled_call_id, "status propagation failed: {e}"),
        }
    }
}
