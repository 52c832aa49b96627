use axum::{
    routing::{delete, get, post},
    Router,
};
use ringback_core::config::RingbackConfig;
use ringback_scheduler::{
    label::DueTimeFormatter,
    store::{CallStore, JobStore, MemoryCallStore},
    CallDispatcher, CallService, ResponseHandler, RetentionPolicy, Scheduler,
};
use std::{sync::Arc, time::Duration};

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: RingbackConfig,
    pub service: Arc<CallService>,
}

impl AppState {
    pub fn new(config: RingbackConfig, service: Arc<CallService>) -> Self {
        Self { config, service }
    }
}

/// Wire the engine components around `jobs` and `dispatcher`. Active calls
/// always live in memory.
pub fn build_service(
    config: &RingbackConfig,
    jobs: Arc<dyn JobStore>,
    dispatcher: Arc<dyn CallDispatcher>,
) -> Arc<CallService> {
    let calls: Arc<dyn CallStore> = Arc::new(MemoryCallStore::new());
    let labels = DueTimeFormatter::with_offset_minutes(config.display.utc_offset_minutes);

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&jobs),
        Arc::clone(&calls),
        dispatcher,
        Duration::from_secs(config.scheduler.poll_interval_secs),
    ));
    let responses = ResponseHandler::new(
        Arc::clone(&jobs),
        Arc::clone(&calls),
        config.scheduler.snooze_minutes,
        labels,
    );
    Arc::new(CallService::new(
        jobs,
        calls,
        scheduler,
        responses,
        RetentionPolicy::from(&config.retention),
        labels,
    ))
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/calls",
            post(crate::http::calls::submit_handler).get(crate::http::calls::list_handler),
        )
        .route("/calls/{id}", delete(crate::http::calls::cancel_handler))
        .route(
            "/active-calls/{call_reference_id}",
            get(crate::http::calls::active_call_handler),
        )
        .route(
            "/callbacks/status",
            post(crate::http::callbacks::status_handler),
        )
        .route(
            "/callbacks/keypress",
            post(crate::http::callbacks::keypress_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
