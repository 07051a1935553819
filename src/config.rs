/**
 * Copyright (c) 2024-2025 Glaive, Inc.
 *
 * This file is part of Glaive Gateway
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::collections::HashMap;
use std::fs;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// One entry of the proxy listen surface: `{listen_port, target_port, require_auth_cookie}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenMapping {
    pub listen_port: u16,
    pub target_port: u16,
    #[serde(default)]
    pub require_auth_cookie: bool,
}

/// A declared launch parameter: materialised as both a container env var and
/// a cluster tag (see §4.5's tag convention).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub rule: Option<String>,
}

const MAX_PARAMETER_LEN: usize = 255;

impl ParameterSpec {
    /// Resolves this parameter's value from a request-supplied map per §4.8:
    /// fall back to the default, reject a missing required value, enforce
    /// the rule-regex and the 255 code point length cap.
    fn resolve(&self, provided: &HashMap<String, String>) -> Result<Option<String>> {
        let value = provided
            .get(&self.name)
            .filter(|v| !v.is_empty())
            .cloned()
            .or_else(|| self.default.clone());
        let Some(value) = value else {
            if self.required {
                return Err(GatewayError::Validation(format!("missing required parameter {}", self.name)));
            }
            return Ok(None);
        };
        if value.chars().count() > MAX_PARAMETER_LEN {
            return Err(GatewayError::Validation(format!(
                "parameter {} exceeds {MAX_PARAMETER_LEN} code points",
                self.name
            )));
        }
        if let Some(rule) = &self.rule {
            let pattern = Regex::new(rule)
                .map_err(|e| GatewayError::Config(format!("invalid rule for parameter {}: {e}", self.name)))?;
            if !pattern.is_match(&value) {
                return Err(GatewayError::Validation(format!(
                    "parameter {} does not match its configured rule",
                    self.name
                )));
            }
        }
        Ok(Some(value))
    }
}

/// Resolves every declared parameter against a request-supplied map,
/// returning only the ones with a value (request-supplied or defaulted).
pub fn load_parameters(specs: &[ParameterSpec], provided: &HashMap<String, String>) -> Result<HashMap<String, String>> {
    let mut resolved = HashMap::new();
    for spec in specs {
        if let Some(value) = spec.resolve(provided)? {
            resolved.insert(spec.name.clone(), value);
        }
    }
    Ok(resolved)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerMode {
    Cluster,
    Local,
}

impl Default for RunnerMode {
    fn default() -> Self {
        RunnerMode::Local
    }
}

/// Default purge parameters, pre-validated at load time and used by the
/// cron-scheduled purge mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PurgeConfig {
    pub duration_seconds: u64,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub exclude_tags: HashMap<String, String>,
    #[serde(default)]
    pub exclude_regexp: Option<String>,
    /// Standard 5-field cron expression evaluated by the scheduler.
    #[serde(default)]
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    pub region: String,
    pub cluster_name: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub log_group: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricStoreConfig {
    pub host: String,
    pub port: u16,
}

/// Immutable, process-lifetime configuration. Loaded once at startup and
/// shared by `Arc<Config>` with every component.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Magic value used in the `ManagedBy` tag to discriminate this
    /// gateway's tasks from others sharing the cluster.
    pub managed_by: String,
    pub reverse_proxy_suffix: String,
    pub web_api_host: String,
    pub auth_cookie_name: String,
    pub jwt_secret: String,
    #[serde(default)]
    pub v1_compat_env: bool,
    pub listen: Vec<ListenMapping>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    pub purge: PurgeConfig,
    #[serde(default)]
    pub runner_mode: RunnerMode,
    pub cluster: Option<ClusterConfig>,
    pub metric_store: Option<MetricStoreConfig>,
    /// Milliseconds. Zero means unlimited.
    #[serde(default)]
    pub proxy_timeout_ms: u64,
    #[serde(default = "default_handler_lifetime_secs")]
    pub proxy_handler_lifetime_secs: u64,
}

fn default_handler_lifetime_secs() -> u64 {
    30
}

static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\{\s*env\s+"([^"]+)"\s+"([^"]*)"\s*\}\}"#).unwrap()
});

/// Expands `{{ env "NAME" "default" }}` placeholders against the process
/// environment, matching §6's config format.
fn expand_env(raw: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(raw, |caps: &regex::Captures| {
            let name = &caps[1];
            let default = &caps[2];
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
}

impl Config {
    /// Loads configuration from a local path or an `s3://bucket/key` URL.
    pub async fn load(source: &str) -> Result<Config> {
        let raw = if let Some(rest) = source.strip_prefix("s3://") {
            Self::load_from_s3(rest).await?
        } else {
            fs::read_to_string(source)
                .map_err(|e| GatewayError::Config(format!("unable to read {source}: {e}")))?
        };
        let expanded = expand_env(&raw);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| GatewayError::Config(format!("unable to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    async fn load_from_s3(rest: &str) -> Result<String> {
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| GatewayError::Config(format!("invalid s3 url: s3://{rest}")))?;
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = aws_sdk_s3::Client::new(&sdk_config);
        let output = client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| GatewayError::Config(format!("s3 get_object failed: {e}")))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| GatewayError::Config(format!("s3 body read failed: {e}")))?
            .into_bytes();
        String::from_utf8(bytes.to_vec())
            .map_err(|e| GatewayError::Config(format!("config is not valid utf8: {e}")))
    }

    fn validate(&self) -> Result<()> {
        if self.purge.duration_seconds < 300 {
            return Err(GatewayError::Config(
                "purge.duration_seconds must be >= 300 (5 minutes)".to_string(),
            ));
        }
        if let Some(pattern) = &self.purge.exclude_regexp {
            Regex::new(pattern)
                .map_err(|e| GatewayError::Config(format!("invalid exclude_regexp: {e}")))?;
        }
        if self.listen.is_empty() {
            return Err(GatewayError::Config(
                "at least one listen mapping is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_env_with_default() {
        std::env::remove_var("GATEWAY_TEST_VAR");
        let out = expand_env(r#"name: {{ env "GATEWAY_TEST_VAR" "fallback" }}"#);
        assert_eq!(out, "name: fallback");
    }

    #[test]
    fn expands_env_when_set() {
        std::env::set_var("GATEWAY_TEST_VAR", "explicit");
        let out = expand_env(r#"name: {{ env "GATEWAY_TEST_VAR" "fallback" }}"#);
        assert_eq!(out, "name: explicit");
        std::env::remove_var("GATEWAY_TEST_VAR");
    }

    fn spec(name: &str, required: bool, default: Option<&str>, rule: Option<&str>) -> ParameterSpec {
        ParameterSpec {
            name: name.to_string(),
            required,
            default: default.map(str::to_string),
            rule: rule.map(str::to_string),
        }
    }

    #[test]
    fn missing_required_parameter_is_rejected() {
        let specs = vec![spec("replicas", true, None, None)];
        assert!(load_parameters(&specs, &HashMap::new()).is_err());
    }

    #[test]
    fn explicit_empty_required_parameter_is_rejected() {
        let specs = vec![spec("replicas", true, None, None)];
        let mut provided = HashMap::new();
        provided.insert("replicas".to_string(), String::new());
        assert!(load_parameters(&specs, &provided).is_err());
    }

    #[test]
    fn explicit_empty_value_falls_back_to_default() {
        let specs = vec![spec("replicas", true, Some("1"), None)];
        let mut provided = HashMap::new();
        provided.insert("replicas".to_string(), String::new());
        let resolved = load_parameters(&specs, &provided).unwrap();
        assert_eq!(resolved.get("replicas"), Some(&"1".to_string()));
    }

    #[test]
    fn falls_back_to_default() {
        let specs = vec![spec("replicas", true, Some("1"), None)];
        let resolved = load_parameters(&specs, &HashMap::new()).unwrap();
        assert_eq!(resolved.get("replicas"), Some(&"1".to_string()));
    }

    #[test]
    fn rule_mismatch_is_rejected() {
        let specs = vec![spec("replicas", false, None, Some(r"^[0-9]+$"))];
        let mut provided = HashMap::new();
        provided.insert("replicas".to_string(), "abc".to_string());
        assert!(load_parameters(&specs, &provided).is_err());
    }

    #[test]
    fn overlong_value_is_rejected() {
        let specs = vec![spec("note", false, None, None)];
        let mut provided = HashMap::new();
        provided.insert("note".to_string(), "x".repeat(256));
        assert!(load_parameters(&specs, &provided).is_err());
    }
}
