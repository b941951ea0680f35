//! Fan-out shared by the bootstrap "script download" event (§4.I step 3)
//! and the log endpoint's write (§4.J step 7): enrich a per-destination
//! copy of the base record, truncate it to that destination's budget, and
//! write it via the sink manager.

use std::collections::HashMap;

use axum::http::HeaderMap;
use serde_json::{Map, Value};
use tracing::warn;

use crate::enrich;
use crate::rules::FieldSpec;
use crate::sinks::SinkManager;
use crate::truncate;

/// Write `base` to every destination in `targets`, or every enabled sink
/// when `targets` is `None` (§3: "nil ⇒ all enabled"). Returns how many
/// destinations accepted the write.
pub fn fan_out(
    sinks: &SinkManager,
    targets: Option<&[String]>,
    rule_adds: &[FieldSpec],
    base: &Map<String, Value>,
    client_data: Option<&Map<String, Value>>,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> usize {
    let names: Vec<String> = match targets {
        Some(list) => list.to_vec(),
        None => sinks.enabled_names().to_vec(),
    };

    let mut success = 0;
    for name in names {
        let Some(dest) = sinks.destination(&name) else {
            warn!(destination = %name, "target destination not configured");
            continue;
        };

        let enriched = enrich::enrich_and_merge(
            base.clone(),
            rule_adds,
            &dest.add_log_data,
            client_data,
            headers,
            query,
        );
        let mut record = enriched.record;
        if let Err(e) =
            truncate::truncate_map_if_needed(&mut record, &enriched.client_keys, dest.max_message_size)
        {
            warn!(destination = %name, error = %e, "record could not be truncated to fit");
            continue;
        }

        match sinks.log(&name, &record) {
            Ok(()) => success += 1,
            Err(e) => warn!(destination = %name, error = %e, "sink write failed"),
        }
    }
    success
}
