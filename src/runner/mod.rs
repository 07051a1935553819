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

pub mod cluster;
pub mod local;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::control::ControlChannel;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Stopping,
    Stopped,
}

/// Immutable snapshot of one running workload (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub short_id: String,
    pub subdomain: String,
    pub branch: String,
    pub taskdef: String,
    pub ip_address: String,
    pub created: DateTime<Local>,
    pub last_status: TaskStatus,
    pub port_map: HashMap<String, u16>,
    pub env: HashMap<String, String>,
    pub tags: HashMap<String, String>,
    /// Container names belonging to this task, for per-container log fetch.
    pub containers: Vec<String>,
}

/// Request-supplied parameters for a launch, already loaded per §4.8
/// (default fallback, required check, rule-regex, length limit applied).
#[derive(Debug, Clone, Default)]
pub struct LaunchParams {
    pub subdomain: String,
    pub branch: String,
    pub parameters: HashMap<String, String>,
}

/// Pre-validated purge eligibility rules (§3).
#[derive(Debug, Clone)]
pub struct PurgeParams {
    pub duration: Duration,
    pub excludes: std::collections::HashSet<String>,
    pub exclude_tags: HashMap<String, String>,
    pub exclude_regexp: Option<Regex>,
}

impl PurgeParams {
    /// Builds params from a request body shaped like
    /// `{duration, excludes[], exclude_tags[], exclude_regexp}`, compiling
    /// the regex eagerly so a bad pattern fails the request instead of the
    /// sweep.
    pub fn from_request(
        duration: Duration,
        excludes: Vec<String>,
        exclude_tags: HashMap<String, String>,
        exclude_regexp: Option<&str>,
    ) -> crate::error::Result<Self> {
        let exclude_regexp = exclude_regexp
            .map(Regex::new)
            .transpose()
            .map_err(|e| crate::error::GatewayError::Validation(format!("invalid exclude_regexp: {e}")))?;
        Ok(PurgeParams {
            duration,
            excludes: excludes.into_iter().collect(),
            exclude_tags,
            exclude_regexp,
        })
    }
}

/// Launch/List/Terminate/Logs/Trace/AccessCount, against either a real
/// cluster backend (`ClusterRunner`) or an in-process local backend
/// (`LocalRunner`), driven by a control channel that keeps the proxy
/// registry in sync (§4.5).
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Idempotent: terminates any task already running for `subdomain`
    /// before launching one task per taskdef, in parallel.
    async fn launch(&self, params: &LaunchParams, taskdefs: &[String]) -> Result<()>;

    /// Every workload managed by this gateway, optionally filtered by
    /// status, sorted by subdomain ascending.
    async fn list(&self, desired_status: Option<TaskStatus>) -> Result<Vec<TaskInfo>>;

    async fn terminate(&self, id: &str) -> Result<()>;

    /// Emits a `proxyRemove` control message, then terminates every
    /// matching task in parallel.
    async fn terminate_by_subdomain(&self, subdomain: &str) -> Result<()>;

    /// Merged log lines across every container of every matching task,
    /// trimmed to `tail` trailing lines (`0` = all).
    async fn logs(&self, subdomain: &str, since: Option<DateTime<Local>>, tail: usize) -> Result<Vec<String>>;

    /// Opaque diagnostic dump for one task.
    async fn trace(&self, id: &str) -> Result<String>;

    /// `duration` is truncated to a minute, matching the external metric
    /// store's bucket granularity.
    async fn get_access_count(&self, subdomain: &str, duration: Duration) -> Result<u64>;

    /// Publishes a nested counter snapshot, batched by <= 20 per upstream
    /// call (§9).
    async fn put_access_counts(&self, snapshot: HashMap<String, HashMap<i64, u64>>) -> Result<()>;

    /// Injects the channel this runner notifies on Add/Remove.
    fn set_proxy_control_channel(&self, channel: Arc<ControlChannel>);
}

pub(crate) fn short_id(id: &str) -> String {
    id.rsplit('/').next().unwrap_or(id).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_takes_trailing_path_segment() {
        assert_eq!(
            short_id("arn:aws:ecs:us-east-1:1234:task/my-cluster/abcdef0123"),
            "abcdef0123"
        );
        assert_eq!(short_id("bare-id"), "bare-id");
    }
}
