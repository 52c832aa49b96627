use std::{sync::Arc, time::Duration};

use ringback_core::config::RetentionConfig;
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, error, info};

use crate::{
    error::Result,
    store::{CallStore, JobStore},
    types::{now_millis, ActiveCall, CallStatus, ScheduledCall},
};

/// Age and count limits for both stores. Ages are milliseconds.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub claimed_max_age_ms: i64,
    pub failed_max_age_ms: i64,
    pub max_age_ms: i64,
    pub active_max_age_ms: i64,
    pub max_scheduled: usize,
    pub max_active: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&RetentionConfig::default())
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(cfg: &RetentionConfig) -> Self {
        Self {
            claimed_max_age_ms: cfg.claimed_max_age_secs * 1000,
            failed_max_age_ms: cfg.failed_max_age_secs * 1000,
            max_age_ms: cfg.max_age_secs * 1000,
            active_max_age_ms: cfg.active_max_age_secs * 1000,
            max_scheduled: cfg.max_scheduled,
            max_active: cfg.max_active,
        }
    }
}

/// Eviction counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionReport {
    pub scheduled_expired: usize,
    pub scheduled_capped: usize,
    pub active_expired: usize,
    pub active_capped: usize,
}

impl RetentionReport {
    pub fn total(&self) -> usize {
        self.scheduled_expired + self.scheduled_capped + self.active_expired + self.active_capped
    }
}

impl RetentionPolicy {
    pub fn should_evict_scheduled(&self, job: &ScheduledCall, now: i64) -> bool {
        let age = now.saturating_sub(job.call_at);
        (job.claimed && age > self.claimed_max_age_ms)
            || age > self.max_age_ms
            || (job.status == CallStatus::Failed && age > self.failed_max_age_ms)
    }

    pub fn should_evict_active(&self, call: &ActiveCall, now: i64) -> bool {
        now.saturating_sub(call.created_at) > self.active_max_age_ms
    }

    /// Apply the age rules, then the hard caps, to both stores.
    pub fn sweep(
        &self,
        jobs: &dyn JobStore,
        calls: &dyn CallStore,
        now: i64,
    ) -> Result<RetentionReport> {
        let mut report = RetentionReport::default();

        // The listing is a snapshot; a job resubmitted since then must not
        // be evicted on its old call time.
        for job in jobs.list()? {
            if !self.should_evict_scheduled(&job, now) {
                continue;
            }
            let evicted = jobs.remove_if(&job.id, &|current| {
                self.should_evict_scheduled(current, now)
            })?;
            if let Some(job) = evicted {
                debug!(call_id = %job.id, status = %job.status, "evicted scheduled call");
                report.scheduled_expired += 1;
            }
        }
        report.scheduled_capped = self.enforce_scheduled_cap(jobs)?;

        for call in calls.list() {
            if self.should_evict_active(&call, now)
                && calls.remove(&call.call_reference_id).is_some()
            {
                report.active_expired += 1;
            }
        }
        report.active_capped = self.enforce_active_cap(calls);

        Ok(report)
    }

    /// Trim the job store to `max_scheduled`: claimed jobs go first, then
    /// unclaimed ones, each oldest `call_at` first. Returns the eviction count.
    pub fn enforce_scheduled_cap(&self, jobs: &dyn JobStore) -> Result<usize> {
        let len = jobs.len()?;
        if len <= self.max_scheduled {
            return Ok(0);
        }
        let mut excess = len - self.max_scheduled;

        // `list` is already ordered by call_at; a stable sort keeps that
        // order within each group.
        let mut victims = jobs.list()?;
        victims.sort_by_key(|j| !j.claimed);

        let mut evicted = 0;
        for job in victims {
            if excess == 0 {
                break;
            }
            let unchanged = |current: &ScheduledCall| {
                current.claimed == job.claimed && current.call_at == job.call_at
            };
            if jobs.remove_if(&job.id, &unchanged)?.is_some() {
                evicted += 1;
                excess -= 1;
            }
        }
        Ok(evicted)
    }

    pub fn enforce_active_cap(&self, calls: &dyn CallStore) -> usize {
        let len = calls.len();
        if len <= self.max_active {
            return 0;
        }
        calls
            .list()
            .into_iter()
            .take(len - self.max_active)
            .filter(|c| calls.remove(&c.call_reference_id).is_some())
            .count()
    }

    /// Sweep on a fixed timer until `shutdown` broadcasts `true`.
    pub async fn run(
        self,
        jobs: Arc<dyn JobStore>,
        calls: Arc<dyn CallStore>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval_secs = every.as_secs(), "retention sweeper started");
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep(jobs.as_ref(), calls.as_ref(), now_millis()) {
                        Ok(report) if report.total() > 0 => info!(
                            scheduled_expired = report.scheduled_expired,
                            scheduled_capped = report.scheduled_capped,
                            active_expired = report.active_expired,
                            active_capped = report.active_capped,
                            "retention sweep"
                        ),
                        Ok(_) => {}
                        Err(e) => error!("retention sweep failed: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("retention sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}
