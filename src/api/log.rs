//! Log endpoint (§4.J): `POST log` validates, rate-limits, and authenticates
//! a browser-originated event, then runs it through the rule pipeline and
//! fans it out to sinks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::dispatch;
use crate::enrich;
use crate::ip;
use crate::rules;
use crate::token;
use crate::validate;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct LogRequest {
    token: String,
    site_id: String,
    #[serde(default)]
    gtm_id: String,
    #[serde(default)]
    data: Option<Value>,
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let client_ip = ip::get_client_ip(
        peer.ip(),
        &headers,
        &state.trusted_proxies,
        state.config.client_ip_header.as_deref(),
    );

    if !state.rate_limiter.check(client_ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    // Body-over-cap is a ClientInputError (§7): silently dropped, HTTP 200,
    // not axum's automatic 413. Read with an explicit limit instead of
    // relying on `DefaultBodyLimit` + the `Bytes` extractor.
    let body = match axum::body::to_bytes(body, state.config.max_body_bytes).await {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "log body exceeded cap or failed to read");
            return ok_with_status(None);
        }
    };

    let parsed: LogRequest = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "malformed log body");
            return ok_with_status(None);
        }
    };

    let ids_valid = validate::is_valid_id(&parsed.site_id, 128)
        && (parsed.gtm_id.is_empty() || validate::is_valid_id(&parsed.gtm_id, 128));
    if !ids_valid {
        warn!(site_id = %parsed.site_id, "invalid site_id/gtm_id on log request");
        return ok_with_status(None);
    }

    let client_data = sanitize_client_data(parsed.data, state.config.sanitize_limits);

    let limiter_key = client_ip.to_string();
    if state.failure_limiter.is_blocked(&limiter_key).await {
        return ok_with_status(Some("failure"));
    }

    let token_ok = token::validate(
        state.config.token_secret.as_bytes(),
        &parsed.site_id,
        &parsed.gtm_id,
        &parsed.token,
    )
    .is_ok();
    state.failure_limiter.check_and_record(&limiter_key, token_ok).await;
    if !token_ok {
        return ok_with_status(Some("failure"));
    }

    let rules = state.rules.load();
    let result = rules::process(&rules, &parsed.site_id, &parsed.gtm_id, client_ip, &headers);

    if !result.should_log_to_server {
        return ok_with_status(None);
    }

    let base = enrich::create_base_record(&parsed.site_id, &parsed.gtm_id, client_ip);
    let sinks = state.sinks.load();
    let success_count = dispatch::fan_out(
        &sinks,
        result.target_destinations.as_deref(),
        &result.add_log_data,
        &base,
        client_data.as_ref(),
        &headers,
        &query,
    );

    ok_with_status(Some(if success_count > 0 { "success" } else { "error" }))
}

fn sanitize_client_data(
    data: Option<Value>,
    limits: validate::SanitizeLimits,
) -> Option<Map<String, Value>> {
    let Value::Object(map) = data? else {
        return None;
    };
    let had_entries = !map.is_empty();
    let (sanitized, report) = validate::sanitize_map_recursively(&Value::Object(map), limits);
    if !report.is_clean() {
        warn!(
            truncated = report.truncated_strings,
            dropped_keys = report.dropped_keys,
            dropped_subtrees = report.dropped_subtrees,
            "client payload partially sanitized"
        );
    }
    let sanitized = sanitized.as_object().cloned()?;
    // Every top-level key was dropped out from under a non-empty payload:
    // sanitization fully failed rather than partially succeeded.
    if had_entries && sanitized.is_empty() {
        return None;
    }
    Some(sanitized)
}

fn ok_with_status(status: Option<&str>) -> Response {
    let mut response = StatusCode::OK.into_response();
    if let Some(s) = status {
        if let Ok(value) = HeaderValue::from_str(s) {
            response.headers_mut().insert("x-log-status", value);
        }
    }
    response
}
