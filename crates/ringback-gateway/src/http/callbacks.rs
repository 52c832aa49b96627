//! Dispatcher callbacks: POST /callbacks/status and /callbacks/keypress.
//!
//! Both routes are authenticated per `[callbacks] auth_mode` before the body
//! is parsed, so the HMAC runs over the exact bytes the dispatcher signed.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use hmac::{Hmac, Mac};
use ringback_core::config::{CallbackAuthMode, CallbacksConfig};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    app::AppState,
    http::error::{ApiError, ApiResult},
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature-256";
const AUTHORIZATION: &str = "authorization";

#[derive(Debug, Deserialize)]
pub struct StatusCallback {
    pub call_reference_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct KeypressCallback {
    pub call_reference_id: String,
    #[serde(alias = "digit")]
    pub digits: String,
}

/// POST /callbacks/status
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let event: StatusCallback = authenticate_and_parse(&state.config.callbacks, &headers, &body)?;
    debug!(call_ref = %event.call_reference_id, status = %event.status, "status callback");

    state
        .service
        .on_status(&event.call_reference_id, &event.status)?;
    Ok(Json(json!({"ok": true})))
}

/// POST /callbacks/keypress
pub async fn keypress_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let event: KeypressCallback =
        authenticate_and_parse(&state.config.callbacks, &headers, &body)?;
    debug!(call_ref = %event.call_reference_id, "keypress callback");

    let outcome = state
        .service
        .on_keypress(&event.call_reference_id, &event.digits)?;
    let mut body = json!({"ok": true});
    if let (Some(map), Ok(Value::Object(extra))) =
        (body.as_object_mut(), serde_json::to_value(&outcome))
    {
        map.extend(extra);
    }
    Ok(Json(body))
}

/// Why a callback was refused before its body was looked at.
#[derive(Debug, thiserror::Error)]
pub enum CallbackAuthError {
    #[error("no callback secret configured")]
    NoSecret,
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("malformed {0} header")]
    Malformed(&'static str),
    #[error("callback secret is not a usable HMAC key")]
    BadKey,
    #[error("callback credentials mismatch")]
    Mismatch,
}

fn authenticate_and_parse<T: DeserializeOwned>(
    cfg: &CallbacksConfig,
    headers: &HeaderMap,
    body: &Bytes,
) -> ApiResult<T> {
    verify(cfg, headers, body).map_err(|e| {
        warn!(reason = %e, mode = ?cfg.auth_mode, "callback authentication failed");
        ApiError::unauthorized(e.to_string())
    })?;
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "invalid callback body");
        ApiError::bad_request(format!("invalid JSON body: {e}"))
    })
}

fn verify(
    cfg: &CallbacksConfig,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), CallbackAuthError> {
    if cfg.auth_mode == CallbackAuthMode::None {
        return Ok(());
    }
    let secret = cfg
        .secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(CallbackAuthError::NoSecret)?;

    match cfg.auth_mode {
        CallbackAuthMode::HmacSha256 => {
            let presented = header_str(headers, SIGNATURE_HEADER)?
                .strip_prefix("sha256=")
                .and_then(|hex_sig| hex::decode(hex_sig).ok())
                .ok_or(CallbackAuthError::Malformed(SIGNATURE_HEADER))?;
            keyed_mac(secret, body)?
                .verify_slice(&presented)
                .map_err(|_| CallbackAuthError::Mismatch)
        }
        CallbackAuthMode::BearerToken => {
            let token = header_str(headers, AUTHORIZATION)?
                .strip_prefix("Bearer ")
                .ok_or(CallbackAuthError::Malformed(AUTHORIZATION))?;
            (token == secret)
                .then_some(())
                .ok_or(CallbackAuthError::Mismatch)
        }
        CallbackAuthMode::None => Ok(()),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, CallbackAuthError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(CallbackAuthError::MissingHeader(name))
}

fn keyed_mac(secret: &str, body: &[u8]) -> Result<HmacSha256, CallbackAuthError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| CallbackAuthError::BadKey)?;
    mac.update(body);
    Ok(mac)
}

/// Signature header value for `body`; dispatchers compute the same thing.
#[cfg(test)]
pub(crate) fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mac = keyed_mac(secret, body).ok()?;
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}
