use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Submissions whose `call_at` lies more than this far behind "now" are rejected.
pub const MAX_PAST_SKEW_MS: i64 = 5 * 60 * 1000;

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Lifecycle state of a scheduled call.
///
/// `scheduled → calling → {initiated | failed}`, then from `initiated` to one
/// of the outcome states. Only `scheduled` jobs are unclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    /// Waiting for its call time.
    Scheduled,
    /// Claimed by a scheduler pass; dispatch in flight.
    Calling,
    /// The dispatcher accepted the call.
    Initiated,
    Completed,
    /// The callee confirmed the reminder with a keypress.
    Acknowledged,
    /// The callee deferred; a follow-up job carries the lineage.
    Snoozed,
    Failed,
    Busy,
    NoAnswer,
    Canceled,
}

impl CallStatus {
    /// Outcomes set by the callee. Transport callbacks never overwrite them.
    pub fn is_user_confirmed(self) -> bool {
        matches!(self, CallStatus::Acknowledged | CallStatus::Snoozed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Scheduled => "scheduled",
            CallStatus::Calling => "calling",
            CallStatus::Initiated => "initiated",
            CallStatus::Completed => "completed",
            CallStatus::Acknowledged => "acknowledged",
            CallStatus::Snoozed => "snoozed",
            CallStatus::Failed => "failed",
            CallStatus::Busy => "busy",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(CallStatus::Scheduled),
            "calling" => Ok(CallStatus::Calling),
            "initiated" => Ok(CallStatus::Initiated),
            "completed" => Ok(CallStatus::Completed),
            "acknowledged" => Ok(CallStatus::Acknowledged),
            "snoozed" => Ok(CallStatus::Snoozed),
            "failed" => Ok(CallStatus::Failed),
            "busy" => Ok(CallStatus::Busy),
            "no-answer" => Ok(CallStatus::NoAnswer),
            "canceled" => Ok(CallStatus::Canceled),
            other => Err(format!("unknown call status: {other}")),
        }
    }
}

/// Status reported by the dispatcher for a placed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActiveCallStatus {
    Initiated,
    Ringing,
    Answered,
    Completed,
    Failed,
    Busy,
    NoAnswer,
    Canceled,
}

impl ActiveCallStatus {
    /// The scheduled-call status a terminal transport status propagates to.
    /// `None` for progress updates that stay on the active call only.
    pub fn terminal_outcome(self) -> Option<CallStatus> {
        match self {
            ActiveCallStatus::Completed => Some(CallStatus::Completed),
            ActiveCallStatus::Failed => Some(CallStatus::Failed),
            ActiveCallStatus::Busy => Some(CallStatus::Busy),
            ActiveCallStatus::NoAnswer => Some(CallStatus::NoAnswer),
            ActiveCallStatus::Canceled => Some(CallStatus::Canceled),
            ActiveCallStatus::Initiated
            | ActiveCallStatus::Ringing
            | ActiveCallStatus::Answered => None,
        }
    }
}

impl std::fmt::Display for ActiveCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActiveCallStatus::Initiated => "initiated",
            ActiveCallStatus::Ringing => "ringing",
            ActiveCallStatus::Answered => "answered",
            ActiveCallStatus::Completed => "completed",
            ActiveCallStatus::Failed => "failed",
            ActiveCallStatus::Busy => "busy",
            ActiveCallStatus::NoAnswer => "no-answer",
            ActiveCallStatus::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ActiveCallStatus {
    type Err = String;

    /// Accepts the kebab-case names plus the `in-progress` / underscore
    /// spellings some telephony providers send.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "initiated" | "queued" => Ok(ActiveCallStatus::Initiated),
            "ringing" => Ok(ActiveCallStatus::Ringing),
            "answered" | "in-progress" => Ok(ActiveCallStatus::Answered),
            "completed" => Ok(ActiveCallStatus::Completed),
            "failed" => Ok(ActiveCallStatus::Failed),
            "busy" => Ok(ActiveCallStatus::Busy),
            "no-answer" => Ok(ActiveCallStatus::NoAnswer),
            "canceled" | "cancelled" => Ok(ActiveCallStatus::Canceled),
            other => Err(format!("unknown call status: {other}")),
        }
    }
}

/// A requested reminder call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCall {
    /// Client-supplied or UUID v4 key.
    pub id: String,
    /// Phone number to ring. Opaque to the engine.
    pub destination: String,
    pub title: String,
    pub description: Option<String>,
    /// Epoch millis at which the call should fire.
    pub call_at: i64,
    /// Epoch millis of the original submission.
    pub scheduled_at: i64,
    /// Precomputed human-readable call time for speech/display.
    pub due_time_label: String,
    /// Set once by a scheduler pass; never cleared.
    pub claimed: bool,
    pub status: CallStatus,
    /// Dispatcher reference, present once the call was placed.
    pub call_reference_id: Option<String>,
    /// The job this one was snoozed from, if any.
    pub snoozed_from_id: Option<String>,
    /// Dispatch error detail when `status == failed`.
    pub last_error: Option<String>,
    pub updated_at: i64,
}

impl ScheduledCall {
    pub fn new(
        id: impl Into<String>,
        destination: impl Into<String>,
        title: impl Into<String>,
        description: Option<String>,
        call_at: i64,
        now: i64,
        due_time_label: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            destination: destination.into(),
            title: title.into(),
            description,
            call_at,
            scheduled_at: now,
            due_time_label: due_time_label.into(),
            claimed: false,
            status: CallStatus::Scheduled,
            call_reference_id: None,
            snoozed_from_id: None,
            last_error: None,
            updated_at: now,
        }
    }

    /// Follow-up job for a snooze: same content, new key, lineage to `self`.
    pub fn snoozed_copy(
        &self,
        new_id: impl Into<String>,
        call_at: i64,
        now: i64,
        due_time_label: impl Into<String>,
    ) -> Self {
        let mut next = Self::new(
            new_id,
            self.destination.clone(),
            self.title.clone(),
            self.description.clone(),
            call_at,
            now,
            due_time_label,
        );
        next.snoozed_from_id = Some(self.id.clone());
        next
    }

    /// Overwrite the mutable fields from a resubmission with the same id.
    /// The destination is fixed at first submission.
    pub fn apply_resubmission(&mut self, incoming: &ScheduledCall) {
        self.title = incoming.title.clone();
        self.description = incoming.description.clone();
        self.call_at = incoming.call_at;
        self.due_time_label = incoming.due_time_label.clone();
        self.updated_at = incoming.scheduled_at;
    }

    pub fn is_due(&self, now: i64) -> bool {
        !self.claimed && self.call_at <= now
    }
}

/// Record of a placed call, keyed by the dispatcher's reference id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCall {
    pub call_reference_id: String,
    pub destination: String,
    pub title: String,
    /// Lookup-only link back to the originating job; it may already be evicted.
    pub scheduled_call_id: String,
    pub status: ActiveCallStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ActiveCall {
    pub fn initiated(call_reference_id: impl Into<String>, job: &ScheduledCall, now: i64) -> Self {
        Self {
            call_reference_id: call_reference_id.into(),
            destination: job.destination.clone(),
            title: job.title.clone(),
            scheduled_call_id: job.id.clone(),
            status: ActiveCallStatus::Initiated,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of [`JobStore::claim`](crate::store::JobStore::claim).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller won the claim; the snapshot is post-claim.
    Claimed(ScheduledCall),
    /// Another pass claimed it first.
    AlreadyClaimed,
    /// Cancelled or evicted between scan and claim.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Inserted,
    /// An unclaimed job with the same id had its mutable fields replaced.
    Updated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_status_round_trips_through_str() {
        for status in [
            CallStatus::Scheduled,
            CallStatus::NoAnswer,
            CallStatus::Acknowledged,
        ] {
            let parsed: CallStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(
            serde_json::to_string(&CallStatus::NoAnswer).unwrap(),
            r#""no-answer""#
        );
    }

    #[test]
    fn provider_spellings_are_accepted() {
        assert_eq!(
            "in-progress".parse::<ActiveCallStatus>().unwrap(),
            ActiveCallStatus::Answered
        );
        assert_eq!(
            "NO_ANSWER".parse::<ActiveCallStatus>().unwrap(),
            ActiveCallStatus::NoAnswer
        );
        assert!("exploded".parse::<ActiveCallStatus>().is_err());
    }

    #[test]
    fn only_terminal_statuses_propagate() {
        assert_eq!(ActiveCallStatus::Ringing.terminal_outcome(), None);
        assert_eq!(ActiveCallStatus::Answered.terminal_outcome(), None);
        assert_eq!(
            ActiveCallStatus::Busy.terminal_outcome(),
            Some(CallStatus::Busy)
        );
    }

    #[test]
    fn resubmission_keeps_destination() {
        let mut job = ScheduledCall::new("r1", "+15550000001", "Old", None, 1_000, 0, "label");
        let incoming = ScheduledCall::new(
            "r1",
            "+15559999999",
            "New",
            Some("details".to_string()),
            2_000,
            10,
            "label2",
        );
        job.apply_resubmission(&incoming);
        assert_eq!(job.destination, "+15550000001");
        assert_eq!(job.title, "New");
        assert_eq!(job.call_at, 2_000);
        assert_eq!(job.due_time_label, "label2");
    }

    #[test]
    fn snoozed_copy_links_back() {
        let job = ScheduledCall::new("a", "+1555", "Pills", None, 1_000, 0, "x");
        let next = job.snoozed_copy("b", 301_000, 1_000, "y");
        assert_eq!(next.snoozed_from_id.as_deref(), Some("a"));
        assert_eq!(next.status, CallStatus::Scheduled);
        assert!(!next.claimed);
    }
}
