//! `ringback-scheduler` — lifecycle engine for scheduled reminder phone calls.
//!
//! # Overview
//!
//! Clients submit [`types::ScheduledCall`]s through the [`service::CallService`].
//! The [`engine::Scheduler`] polls the [`store::JobStore`] on a fixed interval,
//! claims each due job exactly once and hands it to a
//! [`dispatcher::CallDispatcher`]. Placed calls are tracked in the
//! [`store::CallStore`] under the dispatcher's reference id; keypresses and
//! status callbacks flow back through the [`response::ResponseHandler`].
//! [`retention::RetentionPolicy`] keeps both stores bounded.
//!
//! # Lifecycle
//!
//! | Status         | Reached by                                      |
//! |----------------|-------------------------------------------------|
//! | `scheduled`    | Submission                                      |
//! | `calling`      | Claim by a scheduler pass                       |
//! | `initiated`    | Dispatcher accepted the call                    |
//! | `failed`       | Dispatcher error (terminal, no retry)           |
//! | `acknowledged` | Callee pressed 1                                |
//! | `snoozed`      | Callee pressed 2; a follow-up job is created    |
//! | `completed` / `busy` / `no-answer` / `canceled` | Dispatcher status callback |

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod label;
pub mod response;
pub mod retention;
pub mod service;
pub mod store;
pub mod types;

pub use dispatcher::{CallDispatcher, CallRequest, DispatchError};
pub use engine::{ScanReport, Scheduler};
pub use error::{Result, SchedulerError};
pub use response::{KeypressOutcome, ResponseHandler};
pub use retention::{RetentionPolicy, RetentionReport};
pub use service::{CallService, SubmitRequest, SubmitResponse};
pub use types::{ActiveCall, ActiveCallStatus, CallStatus, ScheduledCall};
