//! Bootstrap endpoint (§4.I): `GET bootstrap.js` renders the client-side
//! program that installs `window[globalObjectName].log` and injects any
//! rule-configured scripts.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use minijinja::{context, Environment, Value as MiniValue};
use serde_json::json;
use tracing::warn;

use crate::dispatch;
use crate::enrich;
use crate::ip;
use crate::rules;
use crate::token;
use crate::validate;
use crate::AppState;

const TEMPLATE_NAME: &str = "bootstrap.js";

const TEMPLATE_SOURCE: &str = r#"(function () {
  var ns = window.{{ global_object_name }} = window.{{ global_object_name }} || {};
  ns.config = {{ config_json }};
  ns.log = function (data) {
    {%- if log_url %}
    var payload = JSON.stringify({ token: {{ token_json }}, site_id: {{ site_id_json }}, gtm_id: {{ gtm_id_json }}, data: data });
    if (navigator.sendBeacon) {
      navigator.sendBeacon({{ log_url_json }}, payload);
    } else {
      fetch({{ log_url_json }}, { method: "POST", headers: { "Content-Type": "application/json" }, body: payload, keepalive: true });
    }
    {%- endif %}
  };
  {%- for script in scripts %}
  (function () {
    var el = document.createElement("script");
    el.src = {{ script.url_json }};
    {%- if script.async_ %}
    el.async = true;
    {%- endif %}
    {%- if script.defer %}
    el.defer = true;
    {%- endif %}
    document.head.appendChild(el);
  })();
  {%- endfor %}
})();
"#;

pub fn build_template_env() -> anyhow::Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template_owned(TEMPLATE_NAME, TEMPLATE_SOURCE)?;
    Ok(env)
}

#[derive(Debug, Clone, serde::Serialize)]
struct ScriptCtx {
    url_json: String,
    async_: bool,
    defer: bool,
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let site_id = query.get("site_id").cloned().unwrap_or_default();
    let gtm_id = query.get("gtm_id").cloned().unwrap_or_default();

    let ids_valid =
        validate::is_valid_id(&site_id, 128) && (gtm_id.is_empty() || validate::is_valid_id(&gtm_id, 128));
    if !ids_valid {
        return render_empty(&state);
    }

    let client_ip = ip::get_client_ip(
        peer.ip(),
        &headers,
        &state.trusted_proxies,
        state.config.client_ip_header.as_deref(),
    );

    let rules = state.rules.load();
    let result = rules::process(&rules, &site_id, &gtm_id, client_ip, &headers);

    if result.should_log_script_downloads {
        let mut base = enrich::create_base_record(&site_id, &gtm_id, client_ip);
        base.insert("msg".into(), json!("bootstrap download"));
        base.insert("event_type".into(), json!("script_download"));
        let sinks = state.sinks.load();
        dispatch::fan_out(
            &sinks,
            result.target_destinations.as_deref(),
            &result.add_log_data,
            &base,
            None,
            &headers,
            &query,
        );
    }

    let (log_url, token_json) = if result.should_log_to_server {
        match token::generate(
            state.config.token_secret.as_bytes(),
            &site_id,
            &gtm_id,
            Duration::from_secs(state.config.token_ttl_secs),
        ) {
            Ok(t) => (Some(state.config.log_url()), json!(t).to_string()),
            Err(e) => {
                warn!(error = %e, "failed to issue bootstrap token");
                (None, "null".to_string())
            }
        }
    } else {
        (None, "null".to_string())
    };

    let scripts: Vec<ScriptCtx> = result
        .scripts
        .iter()
        .map(|s| ScriptCtx {
            url_json: serde_json::to_string(&s.url).unwrap_or_else(|_| "\"\"".into()),
            async_: s.async_,
            defer: s.defer,
        })
        .collect();

    let config_json = json!({
        "trackUrl": result.js_options.track_url,
        "trackTraceback": result.js_options.track_traceback,
    })
    .to_string();

    render(
        &state,
        RenderArgs {
            config_json,
            log_url: log_url.clone(),
            log_url_json: log_url.map(|u| json!(u).to_string()).unwrap_or_else(|| "null".into()),
            token_json,
            site_id_json: json!(site_id).to_string(),
            gtm_id_json: json!(gtm_id).to_string(),
            scripts,
        },
    )
}

struct RenderArgs {
    config_json: String,
    log_url: Option<String>,
    log_url_json: String,
    token_json: String,
    site_id_json: String,
    gtm_id_json: String,
    scripts: Vec<ScriptCtx>,
}

fn render(state: &AppState, args: RenderArgs) -> Response {
    let tmpl = state
        .template_env
        .get_template(TEMPLATE_NAME)
        .expect("template registered at startup");

    let rendered = tmpl.render(context! {
        global_object_name => state.config.global_object_name.clone(),
        config_json => args.config_json,
        log_url => args.log_url.is_some(),
        log_url_json => args.log_url_json,
        token_json => args.token_json,
        site_id_json => args.site_id_json,
        gtm_id_json => args.gtm_id_json,
        scripts => MiniValue::from_serialize(&args.scripts),
    });

    match rendered {
        Ok(body) => js_response(body),
        Err(e) => {
            warn!(error = %e, "bootstrap template render failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn render_empty(state: &AppState) -> Response {
    render(
        state,
        RenderArgs {
            config_json: "{}".into(),
            log_url: None,
            log_url_json: "null".into(),
            token_json: "null".into(),
            site_id_json: "\"\"".into(),
            gtm_id_json: "\"\"".into(),
            scripts: Vec::new(),
        },
    )
}

fn js_response(body: String) -> Response {
    axum::http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/javascript; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-store")
        .body(axum::body::Body::from(body))
        .expect("static headers are always valid")
        .into_response()
}
