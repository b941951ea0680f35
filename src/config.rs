use anyhow::{Context, Result};

use crate::validate::SanitizeLimits;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bind address (e.g. "0.0.0.0:8080")
    pub listen_addr: String,

    /// HMAC secret backing the token service (env: TOKEN_SECRET)
    pub token_secret: String,

    /// Token lifetime in seconds (env: TOKEN_TTL_SECS)
    pub token_ttl_secs: u64,

    /// Path prefix for the embedded-mode HTTP surface (env: PATH_PREFIX,
    /// e.g. "/weblogproxy"). Ignored in standalone mode, where routes are
    /// mounted at root.
    pub path_prefix: String,

    /// Standalone vs. embedded deployment (env: STANDALONE). Standalone
    /// mode constructs absolute log URLs and applies CORS.
    pub standalone: bool,

    /// Domain used to build absolute URLs in standalone mode (env: DOMAIN)
    pub domain: String,

    /// URL scheme used alongside `domain` unless `domain` already carries
    /// one (env: PROTOCOL, default "https")
    pub protocol: String,

    /// Name of the `window[...]` object the bootstrap program installs
    /// (env: GLOBAL_OBJECT_NAME, default "wlp")
    pub global_object_name: String,

    /// CIDRs/IPs allowed to override the client IP via a header (env:
    /// TRUSTED_PROXIES, comma-separated)
    pub trusted_proxies: Vec<String>,

    /// Header consulted first when the peer is a trusted proxy (env:
    /// CLIENT_IP_HEADER, e.g. "X-Real-IP"); falls back to X-Forwarded-For
    pub client_ip_header: Option<String>,

    /// Hard cap on the `log` request body, in bytes (env: MAX_BODY_BYTES)
    pub max_body_bytes: usize,

    /// Token-bucket burst/rate for the per-IP log limiter (env:
    /// RATE_LIMIT_PER_MINUTE)
    pub rate_limit_per_minute: u32,

    /// Failure limiter: attempts before blocking (env: FAILURE_MAX_ATTEMPTS)
    pub failure_max_attempts: u32,

    /// Failure limiter: block window in seconds (env: FAILURE_BLOCK_SECS)
    pub failure_block_secs: u64,

    /// Failure limiter: sweeper cadence in seconds (env: FAILURE_SWEEP_SECS)
    pub failure_sweep_secs: u64,

    /// Input sanitization limits applied to client payloads (env:
    /// MAX_SANITIZE_DEPTH, MAX_KEY_LEN, MAX_STR_LEN)
    pub sanitize_limits: SanitizeLimits,

    /// Allowed CORS origins in standalone mode (env: CORS_ALLOWED_ORIGINS,
    /// comma-separated; "*" permitted)
    pub cors_allowed_origins: Vec<String>,

    /// CORS preflight cache duration in seconds (env: CORS_MAX_AGE_SECS)
    pub cors_max_age_secs: u64,

    /// Path to the rule-list JSON file (env: RULES_PATH)
    pub rules_path: String,

    /// Path to the destination-list JSON file (env: DESTINATIONS_PATH)
    pub destinations_path: String,
}

fn env_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            listen_addr: env_var("LISTEN_ADDR", "0.0.0.0:8080"),
            token_secret: std::env::var("TOKEN_SECRET")
                .context("TOKEN_SECRET must be set")?,
            token_ttl_secs: env_parsed("TOKEN_TTL_SECS", 3600),
            path_prefix: env_var("PATH_PREFIX", ""),
            standalone: env_bool("STANDALONE", false),
            domain: env_var("DOMAIN", ""),
            protocol: env_var("PROTOCOL", "https"),
            global_object_name: env_var("GLOBAL_OBJECT_NAME", "wlp"),
            trusted_proxies: env_list("TRUSTED_PROXIES"),
            client_ip_header: std::env::var("CLIENT_IP_HEADER").ok().filter(|s| !s.is_empty()),
            max_body_bytes: env_parsed("MAX_BODY_BYTES", 64 * 1024),
            rate_limit_per_minute: env_parsed("RATE_LIMIT_PER_MINUTE", 60),
            failure_max_attempts: env_parsed("FAILURE_MAX_ATTEMPTS", 8),
            failure_block_secs: env_parsed("FAILURE_BLOCK_SECS", 300),
            failure_sweep_secs: env_parsed("FAILURE_SWEEP_SECS", 300),
            sanitize_limits: SanitizeLimits {
                max_depth: env_parsed("MAX_SANITIZE_DEPTH", 8),
                max_key_len: env_parsed("MAX_KEY_LEN", 128),
                max_str_len: env_parsed("MAX_STR_LEN", 4096),
            },
            cors_allowed_origins: env_list("CORS_ALLOWED_ORIGINS"),
            cors_max_age_secs: env_parsed("CORS_MAX_AGE_SECS", 600),
            rules_path: env_var("RULES_PATH", "rules.json"),
            destinations_path: env_var("DESTINATIONS_PATH", "destinations.json"),
        })
    }

    /// Build the URL the bootstrap program's beacon call should POST to:
    /// relative in embedded mode, absolute (honoring any scheme already in
    /// `domain`) in standalone mode.
    pub fn log_url(&self) -> String {
        let log_path = format!("{}/log", self.path_prefix);
        if !self.standalone {
            return log_path;
        }
        if self.domain.contains("://") {
            format!("{}{}", self.domain.trim_end_matches('/'), log_path)
        } else {
            format!("{}://{}{}", self.protocol, self.domain, log_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal `AppConfig` with all fields defaulted. Override
    /// specific fields in each test via struct update syntax.
    fn base_config() -> AppConfig {
        AppConfig {
            listen_addr: "0.0.0.0:8080".into(),
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
            rate_limit_per_minute: 60,
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

    #[test]
    fn embedded_mode_log_url_is_relative() {
        let cfg = AppConfig {
            path_prefix: "/wlp".into(),
            standalone: false,
            ..base_config()
        };
        assert_eq!(cfg.log_url(), "/wlp/log");
    }

    #[test]
    fn standalone_mode_builds_absolute_url() {
        let cfg = AppConfig {
            path_prefix: "".into(),
            standalone: true,
            domain: "logs.example.com".into(),
            protocol: "https".into(),
            ..base_config()
        };
        assert_eq!(cfg.log_url(), "https://logs.example.com/log");
    }

    #[test]
    fn standalone_mode_honors_scheme_already_in_domain() {
        let cfg = AppConfig {
            standalone: true,
            domain: "http://logs.example.com".into(),
            ..base_config()
        };
        assert_eq!(cfg.log_url(), "http://logs.example.com/log");
    }
}
