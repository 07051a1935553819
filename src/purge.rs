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

//! Periodically sweeps every registered subdomain and terminates the ones
//! that have gone quiet (§4.6). Single-flight: a sweep already in progress
//! blocks out a concurrent one instead of queuing behind it.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use cron::Schedule;
use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::PurgeConfig;
use crate::error::{GatewayError, Result};
use crate::runner::{PurgeParams, TaskRunner, TaskStatus};

const INTER_SUBDOMAIN_SLEEP: Duration = Duration::from_secs(3);

pub struct PurgeController {
    runner: Arc<dyn TaskRunner>,
    params: PurgeParams,
    schedule: Option<Schedule>,
    in_progress: Mutex<()>,
}

impl PurgeController {
    pub fn new(runner: Arc<dyn TaskRunner>, config: &PurgeConfig) -> Result<Self> {
        let exclude_regexp = config
            .exclude_regexp
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| GatewayError::Config(format!("invalid purge.exclude_regexp: {e}")))?;
        let schedule = config
            .schedule
            .as_deref()
            .map(Schedule::from_str)
            .transpose()
            .map_err(|e| GatewayError::Config(format!("invalid purge.schedule cron expression: {e}")))?;
        Ok(PurgeController {
            runner,
            params: PurgeParams {
                duration: Duration::from_secs(config.duration_seconds),
                excludes: config.excludes.iter().cloned().collect(),
                exclude_tags: config.exclude_tags.clone(),
                exclude_regexp,
            },
            schedule,
            in_progress: Mutex::new(()),
        })
    }

    /// Runs forever, firing a sweep on every cron tick, or once per
    /// `duration` if no schedule was configured.
    pub async fn run_forever(self: Arc<Self>) {
        loop {
            let next_delay = match &self.schedule {
                Some(schedule) => schedule
                    .upcoming(Local)
                    .next()
                    .map(|fire_at| (fire_at - Local::now()).to_std().unwrap_or(Duration::ZERO))
                    .unwrap_or(self.params.duration),
                None => self.params.duration,
            };
            sleep(next_delay).await;
            self.clone().sweep_once().await;
        }
    }

    /// One pass over every registered subdomain using the configured
    /// default parameters. Safe to call concurrently; a pass already
    /// running causes this call to no-op.
    pub async fn sweep_once(self: Arc<Self>) {
        let params = self.params.clone();
        self.sweep_with(&params).await;
    }

    /// One pass using caller-supplied parameters, for an on-demand purge
    /// request (e.g. the `purge` control-API method) that overrides the
    /// configured defaults for this pass only. Safe to call concurrently
    /// with `sweep_once`/`sweep_with`; a pass already running causes this
    /// call to no-op rather than queue behind it.
    pub async fn sweep_with(self: Arc<Self>, params: &PurgeParams) {
        let Ok(_guard) = self.in_progress.try_lock() else {
            info!("purge sweep already in progress, skipping");
            return;
        };

        let tasks = match self.runner.list(Some(TaskStatus::Running)).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("failed to list running tasks for purge: {e}");
                return;
            }
        };

        let mut candidates = Vec::new();
        for task in tasks.iter().filter(|t| Self::should_purge(params, t)) {
            if !candidates.contains(&task.subdomain) {
                candidates.push(task.subdomain.clone());
            }
        }

        for subdomain in candidates {
            match self.runner.get_access_count(&subdomain, params.duration).await {
                Ok(0) => {
                    if let Err(e) = self.runner.terminate_by_subdomain(&subdomain).await {
                        warn!("failed to purge subdomain {subdomain}: {e}");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("failed to query access count for {subdomain}: {e}"),
            }
            sleep(INTER_SUBDOMAIN_SLEEP).await;
        }
    }

    fn should_purge(params: &PurgeParams, task: &crate::runner::TaskInfo) -> bool {
        if task.last_status != TaskStatus::Running {
            return false;
        }
        if params.excludes.contains(&task.subdomain) {
            return false;
        }
        if params.exclude_tags.iter().any(|(k, v)| task.tags.get(k) == Some(v)) {
            return false;
        }
        if let Some(pattern) = &params.exclude_regexp {
            if pattern.is_match(&task.subdomain) {
                return false;
            }
        }
        let age = Local::now().signed_duration_since(task.created);
        age.to_std().map(|age| age >= params.duration).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::control::ControlChannel;
    use crate::runner::{LaunchParams, TaskInfo};

    struct StubRunner {
        tasks: Vec<TaskInfo>,
        terminated: AtomicUsize,
    }

    #[async_trait]
    impl TaskRunner for StubRunner {
        async fn launch(&self, _params: &LaunchParams, _taskdefs: &[String]) -> Result<()> {
            Ok(())
        }
        async fn list(&self, _desired_status: Option<TaskStatus>) -> Result<Vec<TaskInfo>> {
            Ok(self.tasks.clone())
        }
        async fn terminate(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn terminate_by_subdomain(&self, _subdomain: &str) -> Result<()> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn logs(&self, _subdomain: &str, _since: Option<chrono::DateTime<Local>>, _tail: usize) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn trace(&self, _id: &str) -> Result<String> {
            Ok(String::new())
        }
        async fn get_access_count(&self, _subdomain: &str, _duration: Duration) -> Result<u64> {
            Ok(0)
        }
        async fn put_access_counts(&self, _snapshot: HashMap<String, HashMap<i64, u64>>) -> Result<()> {
            Ok(())
        }
        fn set_proxy_control_channel(&self, _channel: Arc<ControlChannel>) {}
    }

    fn old_task(subdomain: &str) -> TaskInfo {
        TaskInfo {
            id: subdomain.to_string(),
            short_id: subdomain.to_string(),
            subdomain: subdomain.to_string(),
            branch: "main".to_string(),
            taskdef: "td".to_string(),
            ip_address: "10.0.0.1".to_string(),
            created: Local::now() - chrono::Duration::hours(2),
            last_status: TaskStatus::Running,
            port_map: HashMap::new(),
            env: HashMap::new(),
            tags: HashMap::new(),
            containers: Vec::new(),
        }
    }

    fn config() -> PurgeConfig {
        PurgeConfig {
            duration_seconds: 300,
            excludes: vec!["keep-me".to_string()],
            exclude_tags: HashMap::new(),
            exclude_regexp: None,
            schedule: None,
        }
    }

    #[tokio::test]
    async fn purges_quiet_old_task() {
        let runner = Arc::new(StubRunner {
            tasks: vec![old_task("feature-x")],
            terminated: AtomicUsize::new(0),
        });
        let controller = Arc::new(PurgeController::new(runner.clone(), &config()).unwrap());
        controller.sweep_once().await;
        assert_eq!(runner.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn skips_excluded_subdomain() {
        let runner = Arc::new(StubRunner {
            tasks: vec![old_task("keep-me")],
            terminated: AtomicUsize::new(0),
        });
        let controller = Arc::new(PurgeController::new(runner.clone(), &config()).unwrap());
        controller.sweep_once().await;
        assert_eq!(runner.terminated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn skips_task_younger_than_duration() {
        let mut task = old_task("feature-y");
        task.created = Local::now();
        let runner = Arc::new(StubRunner {
            tasks: vec![task],
            terminated: AtomicUsize::new(0),
        });
        let controller = Arc::new(PurgeController::new(runner.clone(), &config()).unwrap());
        controller.sweep_once().await;
        assert_eq!(runner.terminated.load(Ordering::SeqCst), 0);
    }
}
