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

//! Bootstraps the entire gateway: config, registry, runner, control channel
//! and purge controller, wired together the way `main` needs them. The HTTP
//! control API and HTML renderer are external consumers of these methods,
//! not part of this crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::config::Config;
use crate::control::ControlChannel;
use crate::error::Result;
use crate::purge::PurgeController;
use crate::registry::ProxyRegistry;
use crate::runner::cluster::ClusterRunner;
use crate::runner::local::LocalRunner;
use crate::runner::{LaunchParams, TaskInfo, TaskRunner, TaskStatus};

pub struct Gateway {
    pub config: Arc<Config>,
    pub registry: Arc<ProxyRegistry>,
    pub runner: Arc<dyn TaskRunner>,
    pub purge: Arc<PurgeController>,
}

impl Gateway {
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let local_mode = matches!(config.runner_mode, crate::config::RunnerMode::Local);

        let registry = Arc::new(ProxyRegistry::new(
            config.listen.clone(),
            Some(Duration::from_secs(config.proxy_handler_lifetime_secs)).filter(|_| !local_mode),
            local_mode,
        ));

        let runner: Arc<dyn TaskRunner> = if local_mode {
            Arc::new(LocalRunner::new(
                config.managed_by.clone(),
                config.parameters.clone(),
                config.v1_compat_env,
            ))
        } else {
            let cluster_config = config
                .cluster
                .clone()
                .ok_or_else(|| crate::error::GatewayError::Config("cluster mode requires a `cluster` section".to_string()))?;
            Arc::new(
                ClusterRunner::connect(
                    cluster_config,
                    config.managed_by.clone(),
                    config.parameters.clone(),
                    config.v1_compat_env,
                    config.metric_store.as_ref(),
                )
                .await?,
            )
        };

        let control = Arc::new(ControlChannel::spawn(registry.clone()));
        runner.set_proxy_control_channel(control);

        let purge = Arc::new(PurgeController::new(runner.clone(), &config.purge)?);

        Ok(Gateway {
            config,
            registry,
            runner,
            purge,
        })
    }

    /// Spawns the purge loop as a background task.
    pub fn spawn_purge_loop(&self) {
        let purge = self.purge.clone();
        tokio::spawn(async move { purge.run_forever().await });
    }

    /// Spawns the periodic metric-publication loop that drains the
    /// registry's access counters into the external metric store.
    pub fn spawn_metric_publisher(&self, interval: Duration) {
        let registry = self.registry.clone();
        let runner = self.runner.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let snapshot = registry.collect_access_counts().await;
                if snapshot.is_empty() {
                    continue;
                }
                if let Err(e) = runner.put_access_counts(snapshot).await {
                    tracing::warn!("failed to publish access counts: {e}");
                }
            }
        });
    }

    pub async fn launch(&self, params: LaunchParams, taskdefs: &[String]) -> Result<()> {
        self.runner.launch(&params, taskdefs).await
    }

    pub async fn list(&self, desired_status: Option<TaskStatus>) -> Result<Vec<TaskInfo>> {
        self.runner.list(desired_status).await
    }

    pub async fn terminate_by_subdomain(&self, subdomain: &str) -> Result<()> {
        self.runner.terminate_by_subdomain(subdomain).await
    }

    pub async fn logs(&self, subdomain: &str, since: Option<DateTime<Local>>, tail: usize) -> Result<Vec<String>> {
        self.runner.logs(subdomain, since, tail).await
    }

    pub async fn access_count(&self, subdomain: &str, duration: Duration) -> Result<u64> {
        self.runner.get_access_count(subdomain, duration).await
    }

    pub async fn collect_access_counts(&self) -> HashMap<String, HashMap<i64, u64>> {
        self.registry.collect_access_counts().await
    }

    /// Runs one purge pass with caller-supplied parameters, overriding the
    /// configured defaults for this pass only (the `/api/purge` control
    /// method).
    pub async fn purge(&self, params: &crate::runner::PurgeParams) {
        self.purge.clone().sweep_with(params).await
    }
}
