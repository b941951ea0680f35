//! Router-level integration tests driving the real `axum::Router`/`AppState`
//! end to end via `tower::ServiceExt::oneshot`, in the teacher's
//! `meta_token_tests.rs`/`reservation_tests.rs` style. Unit tests elsewhere
//! cover each component in isolation; these cover the scenarios from spec.md
//! §8 that only show up once the handlers are wired together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::limiter::FailureLimiter;
use crate::rate_limit::IpRateLimiter;
use crate::rules::Rule;
use crate::sinks::{DestinationConfig, DestinationType, SinkManager};
use crate::validate::SanitizeLimits;
use crate::AppState;

fn test_config() -> AppConfig {
    AppConfig {
        listen_addr: "127.0.0.1:0".into(),
        token_secret: "test-secret".into(),
        token_ttl_secs: 3600,
        path_prefix: "".into(),
        standalone: false,
        domain: "".into(),
        protocol: "https".into(),
        global_object_name: "wlp".into(),
        trusted_proxies: vec![],
        client_ip_header: None,
        max_body_bytes: 64 * 1024,
        rate_limit_per_minute: 600,
        failure_max_attempts: 8,
        failure_block_secs: 300,
        failure_sweep_secs: 300,
        sanitize_limits: SanitizeLimits {
            max_depth: 8,
            max_key_len: 128,
            max_str_len: 4096,
        },
        cors_allowed_origins: vec![],
        cors_max_age_secs: 600,
        rules_path: "rules.json".into(),
        destinations_path: "destinations.json".into(),
    }
}

fn tmp_path(tag: &str) -> String {
    let unique = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}/weblogproxy-integration-{tag}-{unique}.log", std::env::temp_dir().display())
}

fn file_dest(name: &str, path: &str, max_message_size: usize) -> DestinationConfig {
    DestinationConfig {
        name: name.into(),
        kind: DestinationType::File,
        enabled: true,
        add_log_data: vec![],
        max_message_size,
        file: Some(crate::sinks::file::FileSinkConfig {
            path: path.into(),
            max_size_bytes: 1_000_000,
            max_backups: 1,
        }),
        gelf: None,
    }
}

fn test_router(config: AppConfig, rules: Vec<Rule>, destinations: &[DestinationConfig]) -> Router {
    let sinks = SinkManager::from_configs(destinations).unwrap();
    let failure_limiter = FailureLimiter::new(config.failure_max_attempts, Duration::from_secs(config.failure_block_secs));
    let rate_limiter = IpRateLimiter::new(config.rate_limit_per_minute);
    let template_env = super::bootstrap::build_template_env().unwrap();

    let state = Arc::new(AppState {
        config,
        trusted_proxies: vec![],
        rules: ArcSwap::new(Arc::new(rules)),
        sinks: ArcSwap::new(Arc::new(sinks)),
        failure_limiter,
        rate_limiter,
        template_env,
    });

    super::build_router(state)
}

fn log_request(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/log")
        .header("content-type", "application/json")
        .extension(ConnectInfo(SocketAddr::from(([203, 0, 113, 9], 443))))
        .body(body.into())
        .unwrap()
}

// Scenario D from §8: malformed body is a silent-200 ClientInputError.
#[tokio::test]
async fn malformed_log_body_is_silently_accepted() {
    let router = test_router(test_config(), vec![], &[]);

    let resp = router.oneshot(log_request("not json at all")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("x-log-status").is_none());
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty(), "client never receives why a log was dropped (§7)");
}

// Scenario E from §8: burst above the per-minute budget gets 429.
#[tokio::test]
async fn burst_above_rate_limit_returns_429() {
    let mut config = test_config();
    config.rate_limit_per_minute = 1;
    let router = test_router(config, vec![], &[]);

    let first = router.clone().oneshot(log_request("{}")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router.oneshot(log_request("{}")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

// Scenario F from §8: a settling rule restricted to destination "A" must
// leave destination "B" untouched, driven through the real log handler.
#[tokio::test]
async fn fan_out_through_real_handler_honors_restricted_destination() {
    let path_a = tmp_path("f-a");
    let path_b = tmp_path("f-b");
    let destinations = vec![file_dest("A", &path_a, 4096), file_dest("B", &path_b, 4096)];

    let rule: Rule = serde_json::from_value(json!({
        "condition": {},
        "continue": false,
        "log_destinations": ["A"]
    }))
    .unwrap();

    let config = test_config();
    let token = crate::token::generate(config.token_secret.as_bytes(), "s", "", Duration::from_secs(60)).unwrap();
    let router = test_router(config, vec![rule], &destinations);

    let body = json!({"token": token, "site_id": "s", "gtm_id": "", "data": {"msg": "hi"}}).to_string();
    let resp = router.oneshot(log_request(body)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("x-log-status").unwrap(), "success");
    assert_eq!(std::fs::read_to_string(&path_a).unwrap().lines().count(), 1);
    assert!(std::fs::read_to_string(&path_b).unwrap().is_empty());

    let _ = std::fs::remove_file(&path_a);
    let _ = std::fs::remove_file(&path_b);
}

// Scenario G from §8: an oversized client field is truncated to the
// destination's message-size budget before it is written.
#[tokio::test]
async fn oversized_client_field_is_truncated_before_write() {
    let path = tmp_path("g");
    let destinations = vec![file_dest("A", &path, 256)];

    let rule: Rule = serde_json::from_value(json!({
        "condition": {},
        "continue": false,
        "log_destinations": ["A"]
    }))
    .unwrap();

    let config = test_config();
    let token = crate::token::generate(config.token_secret.as_bytes(), "s", "", Duration::from_secs(60)).unwrap();
    let router = test_router(config, vec![rule], &destinations);

    let long_msg = "x".repeat(10_000);
    let body = json!({"token": token, "site_id": "s", "gtm_id": "", "data": {"msg": long_msg}}).to_string();
    let resp = router.oneshot(log_request(body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("x-log-status").unwrap(), "success");

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.len() <= 256 + 1, "line plus newline must fit the destination budget");
    let record: Value = serde_json::from_str(written.trim_end()).unwrap();
    assert!(record["msg"].as_str().unwrap().ends_with("...truncated"));

    let _ = std::fs::remove_file(&path);
}
