//! Enricher (§4.F): builds the base record and composes rule/destination
//! adds with the raw client payload.

use std::collections::HashMap;
use std::net::IpAddr;

use axum::http::HeaderMap;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::rules::{FieldSource, FieldSpec};

/// Seed a fresh record with `timestamp`, `site_id`, `gtm_id`, `remote_ip`.
pub fn create_base_record(site_id: &str, gtm_id: &str, client_ip: IpAddr) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert(
        "timestamp".to_string(),
        Value::String(Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()),
    );
    record.insert("site_id".to_string(), Value::String(site_id.to_string()));
    record.insert("gtm_id".to_string(), Value::String(gtm_id.to_string()));
    record.insert(
        "remote_ip".to_string(),
        Value::String(client_ip.to_string()),
    );
    record
}

/// Names of the base fields, used by the truncator to know what must be
/// dropped last (§4.G, Design Note decision in DESIGN.md).
pub const BASE_FIELDS: &[&str] = &["timestamp", "site_id", "gtm_id", "remote_ip"];

/// Result of [`enrich_and_merge`]: the finished record plus the set of
/// top-level keys that were contributed purely by the client payload (used
/// by the truncator to decide what to drop first).
pub struct EnrichedRecord {
    pub record: Map<String, Value>,
    pub client_keys: Vec<String>,
}

fn resolve(
    spec: &FieldSpec,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    client_data: Option<&Map<String, Value>>,
) -> Value {
    match spec.source {
        FieldSource::Static => Value::String(spec.value.clone()),
        FieldSource::Header => Value::String(
            headers
                .get(spec.value.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string(),
        ),
        FieldSource::Query => Value::String(
            query
                .get(&spec.value)
                .cloned()
                .unwrap_or_default(),
        ),
        FieldSource::Post => client_data
            .and_then(|m| m.get(&spec.value))
            .cloned()
            .unwrap_or_else(|| Value::String(String::new())),
    }
}

/// Compose the final record: `base` < resolved `rule_adds` < resolved
/// `dest_adds` < client payload (client data can only fill keys not already
/// claimed by an enriched field — this is the anti-spoofing invariant from
/// §4.F/§9).
pub fn enrich_and_merge(
    base: Map<String, Value>,
    rule_adds: &[FieldSpec],
    dest_adds: &[FieldSpec],
    client_data: Option<&Map<String, Value>>,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> EnrichedRecord {
    let mut record = base;

    for spec in rule_adds {
        record.insert(spec.name.clone(), resolve(spec, headers, query, client_data));
    }
    for spec in dest_adds {
        record.insert(spec.name.clone(), resolve(spec, headers, query, client_data));
    }

    let mut client_keys = Vec::new();
    if let Some(data) = client_data {
        for (k, v) in data {
            if !record.contains_key(k) {
                record.insert(k.clone(), v.clone());
                client_keys.push(k.clone());
            }
        }
    }

    EnrichedRecord { record, client_keys }
}
