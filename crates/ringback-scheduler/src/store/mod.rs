//! Storage seams for the two keyed collections the engine owns.
//!
//! [`JobStore`] holds scheduled calls, [`CallStore`] holds dispatched calls.
//! Operations are synchronous and never touch the network, so callers may use
//! them from async handlers directly. Every backend must make `claim` and
//! `cancel` indivisible with respect to each other.

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryCallStore, MemoryJobStore};
pub use sqlite::SqliteJobStore;

use crate::{
    error::{Result, SchedulerError},
    types::{
        ActiveCall, ActiveCallStatus, ClaimOutcome, ScheduledCall, SubmitOutcome,
        MAX_PAST_SKEW_MS,
    },
};

/// Keyed collection of pending and in-flight scheduled calls.
pub trait JobStore: Send + Sync {
    /// Insert `job`, or replace the mutable fields of an unclaimed job with the
    /// same id. Fails with `AlreadyClaimed` when the existing job is claimed.
    fn upsert(&self, job: ScheduledCall) -> Result<SubmitOutcome>;

    /// Validate and store a new submission.
    fn submit(&self, job: ScheduledCall, now: i64) -> Result<SubmitOutcome> {
        validate_submission(&job, now)?;
        self.upsert(job)
    }

    /// Remove an unclaimed job. Returns whether anything was removed; a missing
    /// or already-claimed id is not an error.
    fn cancel(&self, id: &str) -> Result<bool>;

    /// Unclaimed jobs with `call_at <= now`, earliest first.
    fn due_jobs(&self, now: i64) -> Result<Vec<ScheduledCall>>;

    /// Atomically flip `claimed` to true and move the job to `calling`.
    fn claim(&self, id: &str) -> Result<ClaimOutcome>;

    fn get(&self, id: &str) -> Result<Option<ScheduledCall>>;

    /// All jobs ordered by `call_at`.
    fn list(&self) -> Result<Vec<ScheduledCall>>;

    /// Remove `id` only if `pred` still holds for the stored job, checked
    /// under the same lock as the delete.
    fn remove_if(
        &self,
        id: &str,
        pred: &dyn Fn(&ScheduledCall) -> bool,
    ) -> Result<Option<ScheduledCall>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Atomic read-modify-write of one job. `f` edits a draft and returns
    /// whether to commit it. Returns the stored job afterwards, or `None` if
    /// the id is unknown.
    fn modify(
        &self,
        id: &str,
        f: &mut dyn FnMut(&mut ScheduledCall) -> bool,
    ) -> Result<Option<ScheduledCall>>;
}

/// Keyed collection of dispatched calls.
pub trait CallStore: Send + Sync {
    fn record(&self, call: ActiveCall);

    /// Apply a dispatcher status. Unknown references return `None`.
    fn update_status(
        &self,
        call_reference_id: &str,
        status: ActiveCallStatus,
        now: i64,
    ) -> Option<ActiveCall>;

    /// Lookup; absence is reported as `NotFound`.
    fn get(&self, call_reference_id: &str) -> Result<ActiveCall>;

    /// All calls ordered by creation time.
    fn list(&self) -> Vec<ActiveCall>;

    fn remove(&self, call_reference_id: &str) -> Option<ActiveCall>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Submission rules shared by every backend.
pub fn validate_submission(job: &ScheduledCall, now: i64) -> Result<()> {
    if job.id.trim().is_empty() {
        return Err(SchedulerError::InvalidSchedule("id must not be empty".into()));
    }
    if job.destination.trim().is_empty() {
        return Err(SchedulerError::InvalidSchedule(
            "destination is required".into(),
        ));
    }
    if job.title.trim().is_empty() {
        return Err(SchedulerError::InvalidSchedule("title is required".into()));
    }
    if job.call_at < now - MAX_PAST_SKEW_MS {
        return Err(SchedulerError::InvalidSchedule(format!(
            "call time is {} minutes in the past",
            now.saturating_sub(job.call_at) / 60_000
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_750_000_000_000;

    fn job_at(call_at: i64) -> ScheduledCall {
        ScheduledCall::new("r1", "+15551234567", "Take medicine", None, call_at, NOW, "")
    }

    #[test]
    fn ten_minutes_past_is_rejected() {
        let err = validate_submission(&job_at(NOW - 10 * 60_000), NOW).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    #[test]
    fn four_minutes_past_is_accepted() {
        assert!(validate_submission(&job_at(NOW - 4 * 60_000), NOW).is_ok());
    }

    #[test]
    fn far_past_call_time_is_rejected_without_overflow() {
        let err = validate_submission(&job_at(i64::MIN), NOW).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    #[test]
    fn blank_fields_are_rejected() {
        let mut job = job_at(NOW + 60_000);
        job.destination = "  ".into();
        assert!(validate_submission(&job, NOW).is_err());

        let mut job = job_at(NOW + 60_000);
        job.title = String::new();
        assert!(validate_submission(&job, NOW).is_err());
    }
}
