//! Rule processor (§4.E): walks an ordered rule list, matches conditions,
//! accumulates data/scripts/options, and determines the final logging
//! decision and target destinations.

mod glob;

use std::collections::HashMap;
use std::net::IpAddr;

use axum::http::HeaderMap;
use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A list of CIDRs/bare IPs, compiled once at load time.
#[derive(Debug, Clone, Default)]
pub struct CidrList(pub Vec<IpNet>);

impl<'de> Deserialize<'de> for CidrList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Vec<String> = Vec::deserialize(deserializer)?;
        let nets = crate::ip::parse_cidrs(&raw).map_err(serde::de::Error::custom)?;
        Ok(CidrList(nets))
    }
}

impl Serialize for CidrList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .serialize(serializer)
    }
}

/// A per-header condition: must the header exist, not exist, or equal a
/// specific (case-sensitive) value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderCondition {
    Presence(bool),
    Equals(String),
}

impl HeaderCondition {
    fn matches(&self, actual: Option<&str>) -> bool {
        match self {
            HeaderCondition::Presence(true) => actual.is_some(),
            HeaderCondition::Presence(false) => actual.is_none(),
            HeaderCondition::Equals(want) => actual == Some(want.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    pub site_id: Option<String>,
    #[serde(default)]
    pub gtm_ids: Vec<String>,
    #[serde(default)]
    pub user_agents: Vec<String>,
    #[serde(default)]
    pub ips: CidrList,
    #[serde(default)]
    pub headers: HashMap<String, HeaderCondition>,
}

impl Condition {
    fn matches(&self, site_id: &str, gtm_id: &str, client_ip: IpAddr, headers: &HeaderMap) -> bool {
        if let Some(ref want) = self.site_id {
            if want != site_id {
                return false;
            }
        }
        if !self.gtm_ids.is_empty() && !self.gtm_ids.iter().any(|g| g == gtm_id) {
            return false;
        }
        if !self.user_agents.is_empty() {
            let ua = headers
                .get(axum::http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !self
                .user_agents
                .iter()
                .any(|pattern| glob::glob_match(pattern, ua))
            {
                return false;
            }
        }
        if !self.ips.0.is_empty() && !self.ips.0.iter().any(|net| net.contains(&client_ip)) {
            return false;
        }
        for (name, cond) in &self.headers {
            let actual = headers.get(name.as_str()).and_then(|v| v.to_str().ok());
            if !cond.matches(actual) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Static,
    Header,
    Query,
    Post,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub source: FieldSource,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptTag {
    pub url: String,
    #[serde(default, rename = "async")]
    pub async_: bool,
    #[serde(default)]
    pub defer: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JsOptions {
    #[serde(default)]
    pub track_url: bool,
    #[serde(default)]
    pub track_traceback: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub condition: Condition,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, rename = "continue")]
    pub continue_: bool,
    #[serde(default)]
    pub log_script_downloads: Option<bool>,
    #[serde(default)]
    pub javascript_options: JsOptions,
    #[serde(default)]
    pub add_log_data: Vec<FieldSpec>,
    #[serde(default)]
    pub script_injection: Vec<ScriptTag>,
    #[serde(default)]
    pub log_destinations: Option<Vec<String>>,
}

/// Output of a full rule-list walk.
#[derive(Debug, Clone, Default)]
pub struct RuleResult {
    pub should_log_to_server: bool,
    pub should_log_script_downloads: bool,
    pub add_log_data: Vec<FieldSpec>,
    pub scripts: Vec<ScriptTag>,
    pub js_options: JsOptions,
    pub target_destinations: Option<Vec<String>>,
}

/// Walk `rules` in order against `(site_id, gtm_id, client_ip, headers)`,
/// accumulating data/scripts/options and settling the logging decision at
/// the first matching rule with `continue = false`. Pure: identical inputs
/// always produce an identical result.
pub fn process(
    rules: &[Rule],
    site_id: &str,
    gtm_id: &str,
    client_ip: IpAddr,
    headers: &HeaderMap,
) -> RuleResult {
    let mut result = RuleResult::default();
    let mut settled = false;
    let mut field_index: HashMap<String, usize> = HashMap::new();
    let mut script_downloads: Option<bool> = None;

    for rule in rules {
        if !rule.enabled || !rule.condition.matches(site_id, gtm_id, client_ip, headers) {
            continue;
        }

        for field in &rule.add_log_data {
            if let Some(&idx) = field_index.get(&field.name) {
                result.add_log_data[idx] = field.clone();
            } else {
                field_index.insert(field.name.clone(), result.add_log_data.len());
                result.add_log_data.push(field.clone());
            }
        }
        result.scripts.extend(rule.script_injection.iter().cloned());
        result.js_options.track_url |= rule.javascript_options.track_url;
        result.js_options.track_traceback |= rule.javascript_options.track_traceback;
        if let Some(v) = rule.log_script_downloads {
            script_downloads = Some(v);
        }

        if !rule.continue_ && !settled {
            result.should_log_to_server = true;
            result.target_destinations = rule.log_destinations.clone();
            settled = true;
        }
    }

    if let Some(v) = script_downloads {
        result.should_log_script_downloads = v;
    }
    result
}
