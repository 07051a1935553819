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

//! `TaskRunner` backed by AWS ECS. One task per declared taskdef per
//! subdomain; tasks are tagged so the gateway can recover its own state by
//! listing and filtering, rather than keeping authoritative local state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ecs::types::{AwsVpcConfiguration, KeyValuePair, NetworkConfiguration, Tag};
use chrono::{DateTime, Local, TimeZone};
use tokio::time::timeout;
use tracing::warn;

use crate::config::{ClusterConfig, MetricStoreConfig, ParameterSpec};
use crate::control::ControlChannel;
use crate::error::{GatewayError, Result};
use crate::metrics::RedisMetricStore;
use crate::runner::{short_id, LaunchParams, TaskInfo, TaskRunner, TaskStatus};
use crate::tagging::{self, decode_tag_value, MANAGED_BY_TAG, SUBDOMAIN_TAG};

const CLUSTER_API_TIMEOUT: Duration = Duration::from_secs(30);

/// TTL-less memo of a task definition's container names, keyed by its ARN.
/// A task definition is immutable once registered, so a restart is the only
/// thing that ever invalidates an entry. Safe for concurrent readers: the
/// read lock is held only long enough to clone the cached `Arc`.
struct TaskDefinitionCache {
    entries: RwLock<HashMap<String, Arc<Vec<String>>>>,
}

impl TaskDefinitionCache {
    fn new() -> Self {
        TaskDefinitionCache {
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn container_names(&self, ecs: &aws_sdk_ecs::Client, taskdef: &str) -> Result<Arc<Vec<String>>> {
        if let Some(names) = self.entries.read().unwrap().get(taskdef) {
            return Ok(names.clone());
        }

        let described = ecs
            .describe_task_definition()
            .task_definition(taskdef)
            .send()
            .await
            .map_err(|e| GatewayError::ClusterApi(format!("DescribeTaskDefinition failed for {taskdef}: {e}")))?;
        let names: Vec<String> = described
            .task_definition()
            .map(|td| td.container_definitions().iter().filter_map(|c| c.name().map(str::to_string)).collect())
            .unwrap_or_default();
        let names = Arc::new(names);
        self.entries.write().unwrap().insert(taskdef.to_string(), names.clone());
        Ok(names)
    }
}

pub struct ClusterRunner {
    ecs: aws_sdk_ecs::Client,
    logs: aws_sdk_cloudwatchlogs::Client,
    config: ClusterConfig,
    managed_by: String,
    parameters: Vec<ParameterSpec>,
    v1_compat_env: bool,
    metrics: Option<RedisMetricStore>,
    taskdefs: TaskDefinitionCache,
    control: RwLock<Option<Arc<ControlChannel>>>,
}

impl ClusterRunner {
    pub async fn connect(
        config: ClusterConfig,
        managed_by: String,
        parameters: Vec<ParameterSpec>,
        v1_compat_env: bool,
        metric_store: Option<&MetricStoreConfig>,
    ) -> Result<Self> {
        let sdk_config = aws_config::from_env()
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;
        let metrics = metric_store.map(RedisMetricStore::connect).transpose()?;
        Ok(ClusterRunner {
            ecs: aws_sdk_ecs::Client::new(&sdk_config),
            logs: aws_sdk_cloudwatchlogs::Client::new(&sdk_config),
            config,
            managed_by,
            parameters,
            v1_compat_env,
            metrics,
            taskdefs: TaskDefinitionCache::new(),
            control: RwLock::new(None),
        })
    }

    fn launch_tags(&self, subdomain: &str, params: &LaunchParams) -> Vec<Tag> {
        let mut tags = vec![
            Tag::builder().key(MANAGED_BY_TAG).value(&self.managed_by).build(),
            Tag::builder()
                .key(SUBDOMAIN_TAG)
                .value(tagging::encode_tag_value(subdomain))
                .build(),
        ];
        for spec in &self.parameters {
            if let Some(value) = params.parameters.get(&spec.name) {
                tags.push(Tag::builder().key(&spec.name).value(value).build());
            }
        }
        tags
    }

    fn env_overrides(&self, subdomain: &str, params: &LaunchParams) -> Vec<KeyValuePair> {
        let mut env: Vec<KeyValuePair> = tagging::subdomain_env_vars(subdomain, self.v1_compat_env)
            .into_iter()
            .map(|(name, value)| KeyValuePair::builder().name(name).value(value).build())
            .collect();
        env.push(KeyValuePair::builder().name("BRANCH").value(&params.branch).build());
        for spec in &self.parameters {
            let value = params
                .parameters
                .get(&spec.name)
                .cloned()
                .or_else(|| spec.default.clone());
            if let Some(value) = value {
                env.push(KeyValuePair::builder().name(&spec.name).value(value).build());
            }
        }
        env
    }

    async fn call<F, T, E>(&self, what: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        timeout(CLUSTER_API_TIMEOUT, fut)
            .await
            .map_err(|_| GatewayError::ClusterApi(format!("{what} timed out after {CLUSTER_API_TIMEOUT:?}")))?
            .map_err(|e| GatewayError::ClusterApi(format!("{what} failed: {e}")))
    }

    fn task_info(task: &aws_sdk_ecs::types::Task) -> Option<TaskInfo> {
        let id = task.task_arn()?.to_string();
        let taskdef = task
            .task_definition_arn()
            .map(|s| s.rsplit('/').next().unwrap_or(s).to_string())
            .unwrap_or_default();
        let mut tags = HashMap::new();
        for tag in task.tags() {
            if let (Some(k), Some(v)) = (tag.key(), tag.value()) {
                tags.insert(k.to_string(), v.to_string());
            }
        }
        let subdomain = tags
            .get(SUBDOMAIN_TAG)
            .and_then(|v| decode_tag_value(v))
            .unwrap_or_default();
        if tags.get(MANAGED_BY_TAG).is_none() || subdomain.is_empty() {
            return None;
        }
        let ip_address = task
            .attachments()
            .iter()
            .flat_map(|a| a.details())
            .find(|kv| kv.name() == Some("privateIPv4Address"))
            .and_then(|kv| kv.value())
            .unwrap_or("")
            .to_string();
        let mut port_map = HashMap::new();
        let mut containers = Vec::new();
        for container in task.containers() {
            if let Some(name) = container.name() {
                containers.push(name.to_string());
            }
            for binding in container.network_bindings() {
                if let Some(port) = binding.container_port() {
                    port_map.insert(container.name().unwrap_or("").to_string(), port as u16);
                }
            }
        }
        let last_status = match task.last_status().unwrap_or("") {
            "RUNNING" => TaskStatus::Running,
            "PENDING" | "PROVISIONING" | "ACTIVATING" => TaskStatus::Pending,
            "DEACTIVATING" | "STOPPING" | "DEPROVISIONING" => TaskStatus::Stopping,
            "STOPPED" => TaskStatus::Stopped,
            other => {
                warn!("unrecognized ECS task status {other}, treating as stopped");
                TaskStatus::Stopped
            }
        };
        let created = task
            .created_at()
            .and_then(|t| Local.timestamp_opt(t.secs(), 0).single())
            .unwrap_or_else(Local::now);
        Some(TaskInfo {
            short_id: short_id(&id),
            id,
            subdomain,
            branch: tags.get("BRANCH").cloned().unwrap_or_default(),
            taskdef,
            ip_address,
            created,
            last_status,
            port_map,
            env: HashMap::new(),
            tags,
            containers,
        })
    }
}

#[async_trait]
impl TaskRunner for ClusterRunner {
    async fn launch(&self, params: &LaunchParams, taskdefs: &[String]) -> Result<()> {
        // Idempotent: clear any prior generation before launching the new one.
        self.terminate_by_subdomain(&params.subdomain).await?;

        let vpc_config = NetworkConfiguration::builder()
            .awsvpc_configuration(
                AwsVpcConfiguration::builder()
                    .set_subnets(Some(self.config.subnets.clone()))
                    .set_security_groups(Some(self.config.security_groups.clone()))
                    .assign_public_ip(aws_sdk_ecs::types::AssignPublicIp::Enabled)
                    .build()
                    .map_err(|e| GatewayError::ClusterApi(format!("invalid vpc configuration: {e}")))?,
            )
            .build();

        let tags = self.launch_tags(&params.subdomain, params);
        let env = self.env_overrides(&params.subdomain, params);

        let mut launches = Vec::new();
        for taskdef in taskdefs {
            let container_names = self.taskdefs.container_names(&self.ecs, taskdef).await?;
            let mut overrides_builder = aws_sdk_ecs::types::TaskOverride::builder();
            for name in container_names.iter() {
                overrides_builder = overrides_builder.container_overrides(
                    aws_sdk_ecs::types::ContainerOverride::builder()
                        .name(name)
                        .set_environment(Some(env.clone()))
                        .build(),
                );
            }
            let overrides = overrides_builder.build();
            launches.push(self.call(
                "RunTask",
                self.ecs
                    .run_task()
                    .cluster(&self.config.cluster_name)
                    .task_definition(taskdef)
                    .launch_type(aws_sdk_ecs::types::LaunchType::Fargate)
                    .network_configuration(vpc_config.clone())
                    .overrides(overrides)
                    .set_tags(Some(tags.clone()))
                    .enable_ecs_managed_tags(true)
                    .send(),
            ));
        }
        for result in futures::future::join_all(launches).await {
            result?;
        }
        Ok(())
    }

    async fn list(&self, desired_status: Option<TaskStatus>) -> Result<Vec<TaskInfo>> {
        let arns = self
            .call(
                "ListTasks",
                self.ecs.list_tasks().cluster(&self.config.cluster_name).send(),
            )
            .await?
            .task_arns()
            .to_vec();
        if arns.is_empty() {
            return Ok(Vec::new());
        }

        let described = self
            .call(
                "DescribeTasks",
                self.ecs
                    .describe_tasks()
                    .cluster(&self.config.cluster_name)
                    .set_tasks(Some(arns))
                    .include(aws_sdk_ecs::types::TaskField::Tags)
                    .send(),
            )
            .await?;

        let mut tasks: Vec<TaskInfo> = described
            .tasks()
            .iter()
            .filter_map(Self::task_info)
            .filter(|t| desired_status.map_or(true, |s| s == t.last_status))
            .collect();
        tasks.sort_by(|a, b| a.subdomain.cmp(&b.subdomain));
        Ok(tasks)
    }

    async fn terminate(&self, id: &str) -> Result<()> {
        self.call(
            "StopTask",
            self.ecs
                .stop_task()
                .cluster(&self.config.cluster_name)
                .task(id)
                .reason("terminated by branch-gateway")
                .send(),
        )
        .await?;
        Ok(())
    }

    async fn terminate_by_subdomain(&self, subdomain: &str) -> Result<()> {
        if let Some(control) = self.control.read().unwrap().as_ref() {
            control.notify_remove(subdomain);
        }
        let matching: Vec<String> = self
            .list(None)
            .await?
            .into_iter()
            .filter(|t| t.subdomain == subdomain)
            .map(|t| t.id)
            .collect();
        let stops = matching.iter().map(|id| self.terminate(id));
        for result in futures::future::join_all(stops).await {
            if let Err(e) = result {
                warn!("failed to stop a task for subdomain {subdomain}: {e}");
            }
        }
        Ok(())
    }

    async fn logs(&self, subdomain: &str, since: Option<DateTime<Local>>, tail: usize) -> Result<Vec<String>> {
        let tasks = self
            .list(None)
            .await?
            .into_iter()
            .filter(|t| t.subdomain == subdomain)
            .collect::<Vec<_>>();

        let mut lines = Vec::new();
        for task in tasks {
            let containers = if task.containers.is_empty() {
                vec![task.taskdef.clone()]
            } else {
                task.containers.clone()
            };
            for container in containers {
                let stream = format!("ecs/{container}/{}", task.short_id);
                let mut request = self
                    .logs
                    .get_log_events()
                    .log_group_name(&self.config.log_group)
                    .log_stream_name(&stream)
                    .start_from_head(true);
                if let Some(since) = since {
                    request = request.start_time(since.timestamp_millis());
                }
                let events = match request.send().await {
                    Ok(output) => output,
                    Err(e) => {
                        warn!("failed to fetch logs for task {} container {container}: {e}", task.short_id);
                        continue;
                    }
                };
                for event in events.events() {
                    if let Some(message) = event.message() {
                        lines.push(message.to_string());
                    }
                }
            }
        }
        if tail > 0 && lines.len() > tail {
            let start = lines.len() - tail;
            lines = lines.split_off(start);
        }
        Ok(lines)
    }

    async fn trace(&self, id: &str) -> Result<String> {
        let described = self
            .call(
                "DescribeTasks",
                self.ecs
                    .describe_tasks()
                    .cluster(&self.config.cluster_name)
                    .tasks(id)
                    .include(aws_sdk_ecs::types::TaskField::Tags)
                    .send(),
            )
            .await?;
        described
            .tasks()
            .first()
            .map(|t| format!("{t:?}"))
            .ok_or_else(|| GatewayError::ClusterApi(format!("no such task: {id}")))
    }

    async fn get_access_count(&self, subdomain: &str, duration: Duration) -> Result<u64> {
        match &self.metrics {
            Some(metrics) => metrics.get_access_count(subdomain, duration).await,
            None => Ok(0),
        }
    }

    async fn put_access_counts(&self, snapshot: HashMap<String, HashMap<i64, u64>>) -> Result<()> {
        match &self.metrics {
            Some(metrics) => metrics.put_access_counts(snapshot).await,
            None => Ok(()),
        }
    }

    fn set_proxy_control_channel(&self, channel: Arc<ControlChannel>) {
        *self.control.write().unwrap() = Some(channel);
    }
}
