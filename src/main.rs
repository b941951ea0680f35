mod api;
mod config;
mod dispatch;
mod enrich;
mod ip;
mod limiter;
mod rate_limit;
mod rules;
mod sinks;
mod strings;
mod token;
mod truncate;
mod validate;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use ipnet::IpNet;
use minijinja::Environment;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::limiter::FailureLimiter;
use crate::rate_limit::IpRateLimiter;
use crate::rules::Rule;
use crate::sinks::{DestinationConfig, SinkManager};

/// Shared application state available to every handler.
pub struct AppState {
    pub config: AppConfig,
    pub trusted_proxies: Vec<IpNet>,
    pub rules: ArcSwap<Vec<Rule>>,
    pub sinks: ArcSwap<SinkManager>,
    pub failure_limiter: FailureLimiter,
    pub rate_limiter: IpRateLimiter,
    pub template_env: Environment<'static>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weblogproxy=info,tower_http=info".into()),
        )
        .init();

    info!("Starting WebLogProxy v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;
    info!(listen_addr = %config.listen_addr, standalone = config.standalone, "Configuration loaded");

    let trusted_proxies = ip::parse_cidrs(&config.trusted_proxies)
        .context("failed to parse TRUSTED_PROXIES")?;

    let rules = load_rules(&config.rules_path)?;
    info!(count = rules.len(), path = %config.rules_path, "Rules loaded");

    let destinations = load_destinations(&config.destinations_path)?;
    let sinks = SinkManager::from_configs(&destinations)?;
    info!(
        enabled = ?sinks.enabled_names(),
        path = %config.destinations_path,
        "Sinks initialized"
    );

    let failure_limiter = FailureLimiter::new(
        config.failure_max_attempts,
        Duration::from_secs(config.failure_block_secs),
    );
    let rate_limiter = IpRateLimiter::new(config.rate_limit_per_minute);
    let template_env = api::bootstrap::build_template_env()?;

    let state = Arc::new(AppState {
        config,
        trusted_proxies,
        rules: ArcSwap::new(Arc::new(rules)),
        sinks: ArcSwap::new(Arc::new(sinks)),
        failure_limiter,
        rate_limiter,
        template_env,
    });

    // Spawn the failure-limiter sweeper (§4.C / §5 background tasks).
    state
        .failure_limiter
        .spawn_sweeper(Duration::from_secs(state.config.failure_sweep_secs));

    // Bound the per-IP rate limiter map under long-running traffic from many
    // distinct clients.
    {
        let rate_limiter = state.rate_limiter.clone();
        let sweep_every = Duration::from_secs(state.config.failure_sweep_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_every);
            interval.tick().await;
            loop {
                interval.tick().await;
                rate_limiter.sweep();
            }
        });
    }

    let app = api::build_router(state.clone());
    let addr = state.config.listen_addr.parse::<SocketAddr>()?;

    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Rules and destinations are external config out of core scope (§1); both
/// are loaded once at startup from flat JSON files. A missing file is not
/// fatal — the service starts with no rules/sinks rather than refusing to
/// boot.
fn load_rules(path: &str) -> Result<Vec<Rule>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).with_context(|| format!("invalid rules file {path}")),
        Err(e) => {
            warn!(path, error = %e, "rules file not found — starting with no rules");
            Ok(Vec::new())
        }
    }
}

fn load_destinations(path: &str) -> Result<Vec<DestinationConfig>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            serde_json::from_str(&raw).with_context(|| format!("invalid destinations file {path}"))
        }
        Err(e) => {
            warn!(path, error = %e, "destinations file not found — starting with no sinks");
            Ok(Vec::new())
        }
    }
}
