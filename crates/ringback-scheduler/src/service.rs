//! Boundary operations exposed to clients and to the telephony callbacks.

use std::{sync::Arc, time::Instant};

use chrono::DateTime;
use serde::{de::IgnoredAny, Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    engine::Scheduler,
    error::{Result, SchedulerError},
    label::{minutes_until, DueTimeFormatter},
    response::{KeypressOutcome, ResponseHandler},
    retention::RetentionPolicy,
    store::{CallStore, JobStore},
    types::{now_millis, ActiveCall, CallStatus, ScheduledCall, SubmitOutcome},
};

/// Call time as sent by clients: epoch millis or an RFC 3339 timestamp.
/// Any other JSON value lands in `Invalid` so it is reported as a schedule
/// error instead of a body rejection.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CallAt {
    Millis(i64),
    Text(String),
    Invalid(IgnoredAny),
}

impl CallAt {
    pub fn to_millis(&self) -> Result<i64> {
        match self {
            CallAt::Millis(ms) => Ok(*ms),
            CallAt::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<i64>() {
                    return Ok(ms);
                }
                DateTime::parse_from_rfc3339(text)
                    .map(|dt| dt.timestamp_millis())
                    .map_err(|e| {
                        SchedulerError::InvalidSchedule(format!("invalid call_at {text:?}: {e}"))
                    })
            }
            CallAt::Invalid(_) => Err(SchedulerError::InvalidSchedule(
                "call_at must be integer epoch milliseconds or an RFC 3339 timestamp".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub call_at: Option<CallAt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: String,
    pub due_time_label: String,
    pub minutes_until_call: i64,
}

/// Client-facing view of a scheduled call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledSummary {
    pub id: String,
    pub title: String,
    pub destination: String,
    pub call_at: i64,
    pub status: CallStatus,
    pub claimed: bool,
    pub call_reference_id: Option<String>,
    pub snoozed_from_id: Option<String>,
}

impl From<ScheduledCall> for ScheduledSummary {
    fn from(job: ScheduledCall) -> Self {
        Self {
            id: job.id,
            title: job.title,
            destination: job.destination,
            call_at: job.call_at,
            status: job.status,
            claimed: job.claimed,
            call_reference_id: job.call_reference_id,
            snoozed_from_id: job.snoozed_from_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub scheduled_count: usize,
    pub active_count: usize,
    pub uptime_secs: u64,
}

/// Owns the stores and the components that act on them.
pub struct CallService {
    jobs: Arc<dyn JobStore>,
    calls: Arc<dyn CallStore>,
    scheduler: Arc<Scheduler>,
    responses: ResponseHandler,
    retention: RetentionPolicy,
    labels: DueTimeFormatter,
    started: Instant,
}

impl CallService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        calls: Arc<dyn CallStore>,
        scheduler: Arc<Scheduler>,
        responses: ResponseHandler,
        retention: RetentionPolicy,
        labels: DueTimeFormatter,
    ) -> Self {
        Self {
            jobs,
            calls,
            scheduler,
            responses,
            retention,
            labels,
            started: Instant::now(),
        }
    }

    pub fn submit(&self, req: SubmitRequest) -> Result<SubmitResponse> {
        self.submit_at(req, now_millis())
    }

    pub fn submit_at(&self, req: SubmitRequest, now: i64) -> Result<SubmitResponse> {
        let call_at = req
            .call_at
            .as_ref()
            .ok_or_else(|| SchedulerError::InvalidSchedule("call_at is required".into()))?
            .to_millis()?;
        let id = match req.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        let label = self.labels.label(call_at, now);
        let job = ScheduledCall::new(
            id.clone(),
            req.destination,
            req.title,
            req.description,
            call_at,
            now,
            label.clone(),
        );

        let outcome = self.jobs.submit(job, now)?;
        if outcome == SubmitOutcome::Inserted {
            self.enforce_cap()?;
        }
        info!(call_id = %id, call_at, ?outcome, "call scheduled");

        Ok(SubmitResponse {
            id,
            due_time_label: label,
            minutes_until_call: minutes_until(call_at, now),
        })
    }

    /// Remove an unclaimed job. Unknown and claimed ids are not errors.
    pub fn cancel(&self, id: &str) -> Result<()> {
        if self.jobs.cancel(id)? {
            info!(call_id = %id, "call cancelled");
        } else {
            debug!(call_id = %id, "cancel was a no-op");
        }
        Ok(())
    }

    pub fn list_scheduled(&self) -> Result<Vec<ScheduledSummary>> {
        Ok(self
            .jobs
            .list()?
            .into_iter()
            .map(ScheduledSummary::from)
            .collect())
    }

    pub fn active_call(&self, call_reference_id: &str) -> Result<ActiveCall> {
        self.calls.get(call_reference_id)
    }

    /// Store counts plus uptime. Also kicks an out-of-band scan so a stalled
    /// timer cannot hold due calls back; the scan's dispatches run detached.
    pub fn health(&self) -> Result<HealthReport> {
        let scan = self.scheduler.scan()?;
        if scan.claimed > 0 {
            info!(claimed = scan.claimed, "health check dispatched due calls");
        }
        Ok(HealthReport {
            scheduled_count: self.jobs.len()?,
            active_count: self.calls.len(),
            uptime_secs: self.started.elapsed().as_secs(),
        })
    }

    pub fn on_status(&self, call_reference_id: &str, status: &str) -> Result<()> {
        self.responses.on_status(call_reference_id, status)
    }

    /// A snooze inserts a follow-up job, so it is held to the same cap as a
    /// client submission. The snooze itself is already committed when the
    /// cap runs; a failed trim is logged rather than reported to the caller.
    pub fn on_keypress(&self, call_reference_id: &str, digits: &str) -> Result<KeypressOutcome> {
        let outcome = self.responses.on_keypress(call_reference_id, digits)?;
        if matches!(outcome, KeypressOutcome::Snoozed { .. }) {
            if let Err(e) = self.enforce_cap() {
                error!(call_ref = %call_reference_id, "scheduled call cap after snooze failed: {e}");
            }
        }
        Ok(outcome)
    }

    fn enforce_cap(&self) -> Result<()> {
        let evicted = self.retention.enforce_scheduled_cap(self.jobs.as_ref())?;
        if evicted > 0 {
            warn!(evicted, "scheduled call cap reached");
        }
        Ok(())
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn calls(&self) -> &Arc<dyn CallStore> {
        &self.calls
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        dispatcher::{CallDispatcher, CallRequest, DispatchError},
        store::{MemoryCallStore, MemoryJobStore},
    };

    const NOW: i64 = 1_749_997_800_000;

    struct Echo;

    #[async_trait]
    impl CallDispatcher for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn place_call(&self, req: &CallRequest) -> std::result::Result<String, DispatchError> {
            Ok(format!("CA-{}", req.scheduled_call_id))
        }
    }

    fn service_with_cap(max_scheduled: usize) -> CallService {
        let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let calls: Arc<dyn CallStore> = Arc::new(MemoryCallStore::new());
        let labels = DueTimeFormatter::default();
        let scheduler = Arc::new(Scheduler::new(
            jobs.clone(),
            calls.clone(),
            Arc::new(Echo),
            Duration::from_secs(30),
        ));
        let responses = ResponseHandler::new(jobs.clone(), calls.clone(), 5, labels);
        let retention = RetentionPolicy {
            max_scheduled,
            ..RetentionPolicy::default()
        };
        CallService::new(jobs, calls, scheduler, responses, retention, labels)
    }

    fn request(id: Option<&str>, call_at: CallAt) -> SubmitRequest {
        SubmitRequest {
            id: id.map(str::to_string),
            destination: "+15551234567".into(),
            title: "Take medicine".into(),
            description: None,
            call_at: Some(call_at),
        }
    }

    #[test]
    fn call_at_accepts_millis_and_rfc3339() {
        let from_json: SubmitRequest = serde_json::from_str(
            r#"{"destination":"+1555","title":"x","call_at":"2025-06-15T15:05:00Z"}"#,
        )
        .unwrap();
        assert_eq!(from_json.call_at.unwrap().to_millis().unwrap(), NOW + 35 * 60_000);

        let from_json: SubmitRequest =
            serde_json::from_str(r#"{"destination":"+1555","title":"x","call_at":1749997800000}"#)
                .unwrap();
        assert!(matches!(from_json.call_at, Some(CallAt::Millis(NOW))));

        assert!(CallAt::Text("next tuesday".into()).to_millis().is_err());
    }

    #[test]
    fn unusable_call_at_is_a_schedule_error() {
        let service = service_with_cap(1000);
        for body in [
            r#"{"destination":"+1555","title":"x"}"#,
            r#"{"destination":"+1555","title":"x","call_at":null}"#,
            r#"{"destination":"+1555","title":"x","call_at":true}"#,
            r#"{"destination":"+1555","title":"x","call_at":1.5e12}"#,
            r#"{"destination":"+1555","title":"x","call_at":{"at":1}}"#,
        ] {
            let req: SubmitRequest = serde_json::from_str(body).unwrap();
            let err = service.submit_at(req, NOW).unwrap_err();
            assert_eq!(err.code(), "INVALID_SCHEDULE", "{body}");
        }
        assert!(service.jobs().is_empty().unwrap());
    }

    #[test]
    fn submit_reports_label_and_minutes() {
        let service = service_with_cap(1000);
        let resp = service
            .submit_at(request(Some("r1"), CallAt::Millis(NOW + 35 * 60_000)), NOW)
            .unwrap();
        assert_eq!(resp.id, "r1");
        assert_eq!(resp.due_time_label, "3:05 PM");
        assert_eq!(resp.minutes_until_call, 35);
    }

    #[test]
    fn missing_id_gets_generated() {
        let service = service_with_cap(1000);
        let resp = service
            .submit_at(request(None, CallAt::Millis(NOW + 60_000)), NOW)
            .unwrap();
        assert!(Uuid::parse_str(&resp.id).is_ok());

        let blank = service
            .submit_at(request(Some("  "), CallAt::Millis(NOW + 60_000)), NOW)
            .unwrap();
        assert_ne!(blank.id.trim(), "");
    }

    #[test]
    fn stale_call_time_is_rejected() {
        let service = service_with_cap(1000);
        let err = service
            .submit_at(request(Some("r1"), CallAt::Millis(NOW - 10 * 60_000)), NOW)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_SCHEDULE");
    }

    #[test]
    fn cancel_unknown_id_succeeds_twice() {
        let service = service_with_cap(1000);
        assert!(service.cancel("nope").is_ok());
        assert!(service.cancel("nope").is_ok());
    }

    #[test]
    fn submit_enforces_cap_inline() {
        let service = service_with_cap(3);
        for i in 0..5 {
            service
                .submit_at(
                    request(Some(&format!("r{i}")), CallAt::Millis(NOW + i * 60_000)),
                    NOW,
                )
                .unwrap();
        }
        let ids: Vec<_> = service
            .list_scheduled()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, ["r2", "r3", "r4"]);
    }

    #[tokio::test]
    async fn health_forces_a_scan() {
        let service = service_with_cap(1000);
        let now = now_millis();
        service
            .submit_at(request(Some("r1"), CallAt::Millis(now - 1_000)), now)
            .unwrap();

        let report = service.health().unwrap();
        assert_eq!(report.scheduled_count, 1);

        let job = service.jobs().get("r1").unwrap().unwrap();
        assert!(job.claimed);
    }

    #[tokio::test]
    async fn snooze_follow_up_is_held_to_the_cap() {
        let service = service_with_cap(1);
        let now = now_millis();
        service
            .submit_at(request(Some("r1"), CallAt::Millis(now)), now)
            .unwrap();
        service.scheduler().scan().unwrap().wait().await;

        let outcome = service.on_keypress("CA-r1", "2").unwrap();
        let KeypressOutcome::Snoozed { new_call_id } = outcome else {
            panic!("expected snooze, got {outcome:?}");
        };

        // The dispatched original is claimed, so it is the one evicted.
        assert_eq!(service.jobs().len().unwrap(), 1);
        assert!(service.jobs().get(&new_call_id).unwrap().is_some());
        assert!(service.jobs().get("r1").unwrap().is_none());
    }

    #[test]
    fn active_call_lookup_reports_not_found() {
        let service = service_with_cap(1000);
        let err = service.active_call("CA-missing").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
