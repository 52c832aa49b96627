//! In-process stores backed by `DashMap`.
//!
//! Per-key operations run under the owning shard's lock, which is what makes
//! `claim` (via `get_mut`) and `cancel` (via `remove_if`) mutually atomic.
//! Scans collect into a `Vec` before any per-key write so no shard lock is
//! re-entered on the same thread.

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    error::{Result, SchedulerError},
    store::{CallStore, JobStore},
    types::{
        now_millis, ActiveCall, ActiveCallStatus, CallStatus, ClaimOutcome, ScheduledCall,
        SubmitOutcome,
    },
};

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: DashMap<String, ScheduledCall>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn upsert(&self, job: ScheduledCall) -> Result<SubmitOutcome> {
        match self.jobs.entry(job.id.clone()) {
            Entry::Occupied(mut existing) => {
                let current = existing.get_mut();
                if current.claimed {
                    return Err(SchedulerError::AlreadyClaimed { id: job.id });
                }
                current.apply_resubmission(&job);
                Ok(SubmitOutcome::Updated)
            }
            Entry::Vacant(slot) => {
                slot.insert(job);
                Ok(SubmitOutcome::Inserted)
            }
        }
    }

    fn cancel(&self, id: &str) -> Result<bool> {
        Ok(self.jobs.remove_if(id, |_, job| !job.claimed).is_some())
    }

    fn due_jobs(&self, now: i64) -> Result<Vec<ScheduledCall>> {
        let mut due: Vec<ScheduledCall> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().is_due(now))
            .map(|entry| entry.value().clone())
            .collect();
        due.sort_by_key(|job| job.call_at);
        Ok(due)
    }

    fn claim(&self, id: &str) -> Result<ClaimOutcome> {
        let Some(mut job) = self.jobs.get_mut(id) else {
            return Ok(ClaimOutcome::Missing);
        };
        if job.claimed {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        job.claimed = true;
        job.status = CallStatus::Calling;
        job.updated_at = now_millis();
        Ok(ClaimOutcome::Claimed(job.value().clone()))
    }

    fn get(&self, id: &str) -> Result<Option<ScheduledCall>> {
        Ok(self.jobs.get(id).map(|job| job.value().clone()))
    }

    fn list(&self) -> Result<Vec<ScheduledCall>> {
        let mut all: Vec<ScheduledCall> = self.jobs.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.call_at.cmp(&b.call_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    fn remove_if(
        &self,
        id: &str,
        pred: &dyn Fn(&ScheduledCall) -> bool,
    ) -> Result<Option<ScheduledCall>> {
        Ok(self.jobs.remove_if(id, |_, job| pred(job)).map(|(_, job)| job))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.jobs.len())
    }

    fn modify(
        &self,
        id: &str,
        f: &mut dyn FnMut(&mut ScheduledCall) -> bool,
    ) -> Result<Option<ScheduledCall>> {
        Ok(self.jobs.get_mut(id).map(|mut job| {
            let mut draft = job.value().clone();
            if f(&mut draft) {
                *job.value_mut() = draft;
            }
            job.value().clone()
        }))
    }
}

#[derive(Debug, Default)]
pub struct MemoryCallStore {
    calls: DashMap<String, ActiveCall>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CallStore for MemoryCallStore {
    fn record(&self, call: ActiveCall) {
        self.calls.insert(call.call_reference_id.clone(), call);
    }

    fn update_status(
        &self,
        call_reference_id: &str,
        status: ActiveCallStatus,
        now: i64,
    ) -> Option<ActiveCall> {
        self.calls.get_mut(call_reference_id).map(|mut call| {
            call.status = status;
            call.updated_at = now;
            call.value().clone()
        })
    }

    fn get(&self, call_reference_id: &str) -> Result<ActiveCall> {
        self.calls
            .get(call_reference_id)
            .map(|call| call.value().clone())
            .ok_or_else(|| SchedulerError::NotFound {
                id: call_reference_id.to_string(),
            })
    }

    fn list(&self) -> Vec<ActiveCall> {
        let mut all: Vec<ActiveCall> = self.calls.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|call| call.created_at);
        all
    }

    fn remove(&self, call_reference_id: &str) -> Option<ActiveCall> {
        self.calls.remove(call_reference_id).map(|(_, call)| call)
    }

    fn len(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    const T: i64 = 1_750_000_000_000;

    fn job(id: &str, call_at: i64) -> ScheduledCall {
        ScheduledCall::new(id, "+15551234567", "Take medicine", None, call_at, T - 60_000, "9:00 AM")
    }

    #[test]
    fn due_jobs_boundary() {
        let store = MemoryJobStore::new();
        store.submit(job("r1", T), T - 60_000).unwrap();

        assert!(store.due_jobs(T - 1).unwrap().is_empty());
        assert_eq!(store.due_jobs(T).unwrap().len(), 1);
        assert_eq!(store.due_jobs(T + 1).unwrap().len(), 1);
    }

    #[test]
    fn claimed_jobs_are_not_due() {
        let store = MemoryJobStore::new();
        store.submit(job("r1", T), T).unwrap();
        assert!(matches!(store.claim("r1").unwrap(), ClaimOutcome::Claimed(_)));
        assert!(store.due_jobs(T + 1).unwrap().is_empty());
    }

    #[test]
    fn claim_is_one_shot() {
        let store = MemoryJobStore::new();
        store.submit(job("r1", T), T).unwrap();

        match store.claim("r1").unwrap() {
            ClaimOutcome::Claimed(j) => {
                assert!(j.claimed);
                assert_eq!(j.status, CallStatus::Calling);
            }
            other => panic!("expected claim, got {other:?}"),
        }
        assert_eq!(store.claim("r1").unwrap(), ClaimOutcome::AlreadyClaimed);
        assert_eq!(store.claim("nope").unwrap(), ClaimOutcome::Missing);
    }

    #[test]
    fn concurrent_claims_produce_one_winner() {
        let store = Arc::new(MemoryJobStore::new());
        store.submit(job("r1", T), T).unwrap();
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    if let ClaimOutcome::Claimed(_) = store.claim("r1").unwrap() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_is_idempotent() {
        let store = MemoryJobStore::new();
        assert!(!store.cancel("ghost").unwrap());
        assert!(!store.cancel("ghost").unwrap());

        store.submit(job("r1", T), T).unwrap();
        assert!(store.cancel("r1").unwrap());
        assert!(!store.cancel("r1").unwrap());
        assert!(store.get("r1").unwrap().is_none());
    }

    #[test]
    fn cancel_after_claim_is_a_no_op() {
        let store = MemoryJobStore::new();
        store.submit(job("r1", T), T).unwrap();
        store.claim("r1").unwrap();
        assert!(!store.cancel("r1").unwrap());
        assert!(store.get("r1").unwrap().is_some());
    }

    #[test]
    fn claim_after_cancel_finds_nothing() {
        let store = MemoryJobStore::new();
        store.submit(job("r1", T), T).unwrap();
        store.cancel("r1").unwrap();
        assert_eq!(store.claim("r1").unwrap(), ClaimOutcome::Missing);
    }

    #[test]
    fn resubmission_updates_unclaimed_job() {
        let store = MemoryJobStore::new();
        store.submit(job("r1", T), T).unwrap();

        let mut changed = job("r1", T + 60_000);
        changed.title = "Call mom".into();
        changed.destination = "+15550000000".into();
        assert_eq!(store.submit(changed, T).unwrap(), SubmitOutcome::Updated);
        assert_eq!(store.len().unwrap(), 1);

        let stored = store.get("r1").unwrap().unwrap();
        assert_eq!(stored.title, "Call mom");
        assert_eq!(stored.call_at, T + 60_000);
        assert_eq!(stored.destination, "+15551234567");
    }

    #[test]
    fn resubmission_of_claimed_job_conflicts() {
        let store = MemoryJobStore::new();
        store.submit(job("r1", T), T).unwrap();
        store.claim("r1").unwrap();

        let err = store.submit(job("r1", T + 60_000), T).unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyClaimed { .. }));
        assert_eq!(store.get("r1").unwrap().unwrap().call_at, T);
    }

    #[test]
    fn remove_if_leaves_job_when_predicate_fails() {
        let store = MemoryJobStore::new();
        store.submit(job("r1", T), T).unwrap();

        assert!(store.remove_if("r1", &|j| j.call_at < T).unwrap().is_none());
        assert_eq!(store.len().unwrap(), 1);

        assert!(store.remove_if("r1", &|j| j.call_at == T).unwrap().is_some());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn modify_reports_unknown_ids() {
        let store = MemoryJobStore::new();
        assert!(store.modify("ghost", &mut |_: &mut ScheduledCall| true).unwrap().is_none());
    }

    #[test]
    fn call_store_ignores_unknown_references() {
        let calls = MemoryCallStore::new();
        assert!(calls
            .update_status("CA-missing", ActiveCallStatus::Ringing, T)
            .is_none());
        assert!(matches!(
            calls.get("CA-missing"),
            Err(SchedulerError::NotFound { .. })
        ));
    }

    #[test]
    fn call_store_tracks_status() {
        let calls = MemoryCallStore::new();
        calls.record(ActiveCall::initiated("CA1", &job("r1", T), T));
        let updated = calls
            .update_status("CA1", ActiveCallStatus::Answered, T + 5)
            .unwrap();
        assert_eq!(updated.status, ActiveCallStatus::Answered);
        assert_eq!(calls.get("CA1").unwrap().updated_at, T + 5);
    }
}
