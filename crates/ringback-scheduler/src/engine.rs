use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    dispatcher::{CallDispatcher, CallRequest},
    error::Result,
    store::{CallStore, JobStore},
    types::{now_millis, ActiveCall, CallStatus, ClaimOutcome, ScheduledCall},
};

/// What one scan did. Dispatch tasks keep running after the report is
/// returned; callers that need the outcome can [`ScanReport::wait`].
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Jobs returned by the due query.
    pub due: usize,
    /// Jobs this scan won the claim for and handed to the dispatcher.
    pub claimed: usize,
    pub dispatches: Vec<JoinHandle<()>>,
}

impl ScanReport {
    /// Wait for every dispatch spawned by this scan to settle.
    pub async fn wait(self) {
        for handle in self.dispatches {
            if let Err(e) = handle.await {
                error!("dispatch task panicked: {e}");
            }
        }
    }
}

/// Polls the job store and hands due calls to the dispatcher.
///
/// Each due job is claimed synchronously inside the scan, before its dispatch
/// task is spawned, so overlapping scans (timer tick plus a health-check scan)
/// can never dispatch the same job twice.
pub struct Scheduler {
    jobs: Arc<dyn JobStore>,
    calls: Arc<dyn CallStore>,
    dispatcher: Arc<dyn CallDispatcher>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        calls: Arc<dyn CallStore>,
        dispatcher: Arc<dyn CallDispatcher>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            jobs,
            calls,
            dispatcher,
            poll_interval,
        }
    }

    /// Run one scan against the current wall clock.
    pub fn scan(&self) -> Result<ScanReport> {
        self.scan_at(now_millis())
    }

    /// Claim every job due at `now` and spawn its dispatch. Must be called
    /// from within a Tokio runtime.
    pub fn scan_at(&self, now: i64) -> Result<ScanReport> {
        let due = self.jobs.due_jobs(now)?;
        let mut report = ScanReport {
            due: due.len(),
            ..ScanReport::default()
        };

        for candidate in due {
            let job = match self.jobs.claim(&candidate.id) {
                Ok(ClaimOutcome::Claimed(job)) => job,
                Ok(ClaimOutcome::AlreadyClaimed) => {
                    debug!(call_id = %candidate.id, "already claimed by another scan");
                    continue;
                }
                Ok(ClaimOutcome::Missing) => {
                    debug!(call_id = %candidate.id, "cancelled before claim");
                    continue;
                }
                Err(e) => {
                    error!(call_id = %candidate.id, "claim failed: {e}");
                    continue;
                }
            };

            info!(call_id = %job.id, call_at = job.call_at, "claimed call for dispatch");
            report.claimed += 1;
            report.dispatches.push(tokio::spawn(dispatch(
                Arc::clone(&self.jobs),
                Arc::clone(&self.calls),
                Arc::clone(&self.dispatcher),
                job,
            )));
        }
        Ok(report)
    }

    /// Main loop. Scans every `poll_interval` until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.poll_interval.as_secs_f64(),
            dispatcher = self.dispatcher.name(),
            "call scheduler started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.scan() {
                        Ok(report) if report.claimed > 0 => {
                            info!(due = report.due, claimed = report.claimed, "scheduler tick");
                        }
                        Ok(_) => {}
                        Err(e) => error!("scheduler tick error: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("call scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Place one claimed call and record the result. Never returns an error: a
/// failed dispatch is terminal for the job and only logged.
async fn dispatch(
    jobs: Arc<dyn JobStore>,
    calls: Arc<dyn CallStore>,
    dispatcher: Arc<dyn CallDispatcher>,
    job: ScheduledCall,
) {
    let req = CallRequest::from(&job);
    match dispatcher.place_call(&req).await {
        Ok(reference) => {
            let now = now_millis();
            // Record the active call first so an early status callback finds it.
            calls.record(ActiveCall::initiated(reference.clone(), &job, now));
            let updated = jobs.modify(&job.id, &mut |j: &mut ScheduledCall| {
                j.call_reference_id = Some(reference.clone());
                // A fast terminal callback may already have moved the job on.
                if j.status == CallStatus::Calling {
                    j.status = CallStatus::Initiated;
                }
                j.updated_at = now;
                true
            });
            match updated {
                Ok(Some(_)) => {
                    info!(call_id = %job.id, call_ref = %reference, dispatcher = dispatcher.name(), "call initiated");
                }
                Ok(None) => {
                    warn!(call_id = %job.id, call_ref = %reference, "call placed but job was evicted");
                }
                Err(e) => error!(call_id = %job.id, "failed to record call reference: {e}"),
            }
        }
        Err(dispatch_err) => {
            let detail = dispatch_err.to_string();
            warn!(call_id = %job.id, dispatcher = dispatcher.name(), "dispatch failed: {detail}");
            let result = jobs.modify(&job.id, &mut |j: &mut ScheduledCall| {
                if j.status != CallStatus::Calling {
                    return false;
                }
                j.status = CallStatus::Failed;
                j.last_error = Some(detail.clone());
                j.updated_at = now_millis();
                true
            });
            if let Err(e) = result {
                error!(call_id = %job.id, "failed to record dispatch failure: {e}");
            }
        }
    }
}
