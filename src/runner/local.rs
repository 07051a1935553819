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

//! `TaskRunner` backed by in-process child processes, for tests and
//! development (§3's "local mode"). Each taskdef is a shell command; the
//! gateway assigns it a loopback port and tags it the same way a cluster
//! task would be tagged, so the rest of the system cannot tell the
//! difference.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tokio::process::{Child, Command};
use tracing::warn;
use uuid::Uuid;

use crate::config::ParameterSpec;
use crate::control::ControlChannel;
use crate::error::{GatewayError, Result};
use crate::runner::{short_id, LaunchParams, TaskInfo, TaskRunner, TaskStatus};
use crate::tagging::{self, MANAGED_BY_TAG, SUBDOMAIN_TAG};

const FIRST_LOCAL_PORT: u16 = 30000;

struct LocalTask {
    info: TaskInfo,
    child: Mutex<Child>,
}

pub struct LocalRunner {
    managed_by: String,
    parameters: Vec<ParameterSpec>,
    v1_compat_env: bool,
    next_port: AtomicU16,
    tasks: RwLock<HashMap<String, Vec<LocalTask>>>,
    counters: Mutex<HashMap<String, HashMap<i64, u64>>>,
    control: Mutex<Option<Arc<ControlChannel>>>,
}

impl LocalRunner {
    pub fn new(managed_by: String, parameters: Vec<ParameterSpec>, v1_compat_env: bool) -> Self {
        LocalRunner {
            managed_by,
            parameters,
            v1_compat_env,
            next_port: AtomicU16::new(FIRST_LOCAL_PORT),
            tasks: RwLock::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            control: Mutex::new(None),
        }
    }

    fn allocate_port(&self) -> u16 {
        self.next_port.fetch_add(1, Ordering::Relaxed)
    }

    fn env_for(&self, subdomain: &str, port: u16, params: &LaunchParams) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = tagging::subdomain_env_vars(subdomain, self.v1_compat_env)
            .into_iter()
            .collect();
        env.insert("PORT".to_string(), port.to_string());
        env.insert("BRANCH".to_string(), params.branch.clone());
        for spec in &self.parameters {
            let value = params
                .parameters
                .get(&spec.name)
                .cloned()
                .or_else(|| spec.default.clone());
            if let Some(value) = value {
                env.insert(spec.name.clone(), value);
            }
        }
        env
    }

    async fn status_of(child: &Mutex<Child>) -> TaskStatus {
        let mut child = child.lock().unwrap();
        match child.try_wait() {
            Ok(Some(_)) => TaskStatus::Stopped,
            Ok(None) => TaskStatus::Running,
            Err(_) => TaskStatus::Stopped,
        }
    }

    async fn spawn_one(&self, taskdef: &str, params: &LaunchParams) -> Result<LocalTask> {
        let port = self.allocate_port();
        let env = self.env_for(&params.subdomain, port, params);
        let mut command = Command::new("sh");
        command.arg("-c").arg(taskdef).envs(env.clone()).kill_on_drop(true);
        let child = command
            .spawn()
            .map_err(|e| GatewayError::ClusterApi(format!("failed to spawn local task {taskdef}: {e}")))?;

        let id = Uuid::new_v4().to_string();
        let mut tags = HashMap::new();
        tags.insert(MANAGED_BY_TAG.to_string(), self.managed_by.clone());
        tags.insert(SUBDOMAIN_TAG.to_string(), tagging::encode_tag_value(&params.subdomain));
        let mut port_map = HashMap::new();
        port_map.insert("app".to_string(), port);

        let info = TaskInfo {
            short_id: short_id(&id),
            id,
            subdomain: params.subdomain.clone(),
            branch: params.branch.clone(),
            taskdef: taskdef.to_string(),
            ip_address: "127.0.0.1".to_string(),
            created: Local::now(),
            last_status: TaskStatus::Running,
            port_map,
            env,
            tags,
            containers: vec!["app".to_string()],
        };
        Ok(LocalTask {
            info,
            child: Mutex::new(child),
        })
    }
}

#[async_trait]
impl TaskRunner for LocalRunner {
    async fn launch(&self, params: &LaunchParams, taskdefs: &[String]) -> Result<()> {
        self.terminate_by_subdomain(&params.subdomain).await?;

        let spawns = taskdefs.iter().map(|taskdef| self.spawn_one(taskdef, params));
        let mut launched = Vec::new();
        for result in futures::future::join_all(spawns).await {
            launched.push(result?);
        }

        if let Some(control) = self.control.lock().unwrap().as_ref() {
            for task in &launched {
                let port = task.info.port_map.get("app").copied().unwrap_or(0);
                control.notify_add(&params.subdomain, &task.info.ip_address, port);
            }
        }

        self.tasks
            .write()
            .unwrap()
            .insert(params.subdomain.clone(), launched);
        Ok(())
    }

    async fn list(&self, desired_status: Option<TaskStatus>) -> Result<Vec<TaskInfo>> {
        let tasks = self.tasks.read().unwrap();
        let mut out = Vec::new();
        for group in tasks.values() {
            for task in group {
                let status = Self::status_of(&task.child).await;
                if desired_status.map_or(true, |s| s == status) {
                    let mut info = task.info.clone();
                    info.last_status = status;
                    out.push(info);
                }
            }
        }
        out.sort_by(|a, b| a.subdomain.cmp(&b.subdomain));
        Ok(out)
    }

    async fn terminate(&self, id: &str) -> Result<()> {
        let tasks = self.tasks.read().unwrap();
        for group in tasks.values() {
            for task in group {
                if task.info.id == id {
                    let mut child = task.child.lock().unwrap();
                    let _ = child.start_kill();
                    return Ok(());
                }
            }
        }
        Err(GatewayError::ClusterApi(format!("no such local task: {id}")))
    }

    async fn terminate_by_subdomain(&self, subdomain: &str) -> Result<()> {
        if let Some(control) = self.control.lock().unwrap().as_ref() {
            control.notify_remove(subdomain);
        }
        let removed = self.tasks.write().unwrap().remove(subdomain);
        if let Some(group) = removed {
            for task in group {
                let mut child = task.child.lock().unwrap();
                if let Err(e) = child.start_kill() {
                    warn!("failed to kill local task {}: {e}", task.info.id);
                }
            }
        }
        Ok(())
    }

    async fn logs(&self, _subdomain: &str, _since: Option<chrono::DateTime<Local>>, _tail: usize) -> Result<Vec<String>> {
        Ok(vec!["local runner does not capture child process output".to_string()])
    }

    async fn trace(&self, id: &str) -> Result<String> {
        let tasks = self.tasks.read().unwrap();
        for group in tasks.values() {
            for task in group {
                if task.info.id == id {
                    return Ok(format!("{:?}", task.info));
                }
            }
        }
        Err(GatewayError::ClusterApi(format!("no such local task: {id}")))
    }

    async fn get_access_count(&self, subdomain: &str, duration: Duration) -> Result<u64> {
        // `counters` is keyed by epoch-second bucket starts, the same
        // encoding `put_access_counts` receives from the registry's
        // `AccessCounter`, so the cutoff must be in seconds too.
        let cutoff = chrono::Utc::now().timestamp() - duration.as_secs() as i64;
        let counters = self.counters.lock().unwrap();
        let total = counters
            .get(subdomain)
            .map(|buckets| {
                buckets
                    .iter()
                    .filter(|(bucket, _)| **bucket >= cutoff)
                    .map(|(_, count)| *count)
                    .sum()
            })
            .unwrap_or(0);
        Ok(total)
    }

    async fn put_access_counts(&self, snapshot: HashMap<String, HashMap<i64, u64>>) -> Result<()> {
        let mut counters = self.counters.lock().unwrap();
        for (subdomain, buckets) in snapshot {
            let entry = counters.entry(subdomain).or_default();
            for (bucket, count) in buckets {
                *entry.entry(bucket).or_insert(0) += count;
            }
        }
        Ok(())
    }

    fn set_proxy_control_channel(&self, channel: Arc<ControlChannel>) {
        *self.control.lock().unwrap() = Some(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(subdomain: &str) -> LaunchParams {
        LaunchParams {
            subdomain: subdomain.to_string(),
            branch: "main".to_string(),
            parameters: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn launch_list_terminate_round_trip() {
        let runner = LocalRunner::new("branch-gateway".to_string(), Vec::new(), false);
        runner.launch(&params("feature-x"), &["sleep 5".to_string()]).await.unwrap();

        let running = runner.list(Some(TaskStatus::Running)).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].subdomain, "feature-x");

        runner.terminate_by_subdomain("feature-x").await.unwrap();
        let after = runner.list(None).await.unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn access_counts_accumulate_across_puts() {
        let runner = LocalRunner::new("branch-gateway".to_string(), Vec::new(), false);
        let now = chrono::Utc::now().timestamp();
        let mut snapshot = HashMap::new();
        let mut buckets = HashMap::new();
        buckets.insert(now, 3u64);
        snapshot.insert("feature-x".to_string(), buckets);
        runner.put_access_counts(snapshot).await.unwrap();

        let count = runner
            .get_access_count("feature-x", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(count, 3);
    }
}
