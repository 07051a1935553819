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

//! The external metric-publication backend (§4.4), consumed only through
//! `GetAccessCount`/`PutAccessCounts`. Backed by redis so counts survive a
//! gateway restart and stay visible to the purge loop regardless of which
//! process last collected them.

use std::collections::HashMap;
use std::time::Duration;

use redis::AsyncCommands;

use crate::config::MetricStoreConfig;
use crate::error::{GatewayError, Result};

const KEY_PREFIX: &str = "branch-gateway:access";

pub struct RedisMetricStore {
    client: redis::Client,
}

impl RedisMetricStore {
    pub fn connect(config: &MetricStoreConfig) -> Result<Self> {
        let address = format!("redis://{}:{}", config.host, config.port);
        let client = redis::Client::open(address)
            .map_err(|e| GatewayError::ClusterApi(format!("invalid metric store address: {e}")))?;
        Ok(RedisMetricStore { client })
    }

    /// Sum of access counts recorded for `subdomain` within `duration`. Keys
    /// are bucketed by epoch-second timestamps truncated to a minute, the
    /// same encoding `AccessCounter::truncate` produces for cluster mode, so
    /// this walks the same bucket starts `put_access_counts` wrote.
    pub async fn get_access_count(&self, subdomain: &str, duration: Duration) -> Result<u64> {
        const BUCKET_SECS: i64 = 60;
        let buckets_needed = ((duration.as_secs() + BUCKET_SECS as u64 - 1) / BUCKET_SECS as u64).max(1);
        let mut conn = self.connection().await?;
        let mut total: u64 = 0;
        let now = chrono::Utc::now().timestamp();
        let now_bucket = now - now.rem_euclid(BUCKET_SECS);
        for i in 0..buckets_needed as i64 {
            let bucket = now_bucket - i * BUCKET_SECS;
            let key = format!("{KEY_PREFIX}:{subdomain}:{bucket}");
            let count: Option<u64> = conn
                .get(&key)
                .await
                .map_err(|e| GatewayError::ClusterApi(format!("redis GET failed: {e}")))?;
            total += count.unwrap_or(0);
        }
        Ok(total)
    }

    /// Publishes a nested `subdomain -> bucket -> count` snapshot, batched
    /// by at most 20 keys per pipeline (§9).
    pub async fn put_access_counts(&self, snapshot: HashMap<String, HashMap<i64, u64>>) -> Result<()> {
        let mut conn = self.connection().await?;
        let entries: Vec<(String, u64)> = snapshot
            .into_iter()
            .flat_map(|(subdomain, buckets)| {
                buckets.into_iter().map(move |(bucket, count)| {
                    (format!("{KEY_PREFIX}:{subdomain}:{bucket}"), count)
                })
            })
            .collect();

        for chunk in entries.chunks(20) {
            let mut pipe = redis::pipe();
            for (key, count) in chunk {
                pipe.incr(key, *count).ignore().expire(key, 3600).ignore();
            }
            pipe.query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| GatewayError::ClusterApi(format!("redis pipeline failed: {e}")))?;
        }
        Ok(())
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| GatewayError::ClusterApi(format!("redis connection failed: {e}")))
    }
}
