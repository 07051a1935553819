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

//! Per-subdomain rolling access counter, bucketed by a unit interval (§4.4).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// `bucket_start_time -> count`. Guarded by its own mutex so counting a
/// request never contends with the registry's map lock.
pub struct AccessCounter {
    unit: Duration,
    buckets: Mutex<HashMap<i64, u64>>,
}

fn truncate(now: DateTime<Utc>, unit_secs: i64) -> i64 {
    let ts = now.timestamp();
    ts - ts.rem_euclid(unit_secs)
}

impl AccessCounter {
    pub fn new(unit: Duration) -> Self {
        AccessCounter {
            unit,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Cluster mode default: 1-minute buckets.
    pub fn cluster_default() -> Self {
        Self::new(Duration::from_secs(60))
    }

    /// Local mode default: 10-second buckets.
    pub fn local_default() -> Self {
        Self::new(Duration::from_secs(10))
    }

    pub fn add(&self) {
        self.add_at(Utc::now());
    }

    fn add_at(&self, now: DateTime<Utc>) {
        let bucket = truncate(now, self.unit.as_secs() as i64);
        let mut buckets = self.buckets.lock().unwrap();
        *buckets.entry(bucket).or_insert(0) += 1;
    }

    /// Returns a copy of all non-empty buckets and clears them.
    pub fn collect(&self) -> HashMap<i64, u64> {
        let mut buckets = self.buckets.lock().unwrap();
        std::mem::take(&mut *buckets)
    }

    /// Sum of all buckets whose start time falls within the last `window`.
    /// Buckets older than the window are treated as zero, not pruned.
    pub fn sum_within(&self, window: Duration) -> u64 {
        let now = Utc::now().timestamp();
        let cutoff = now - window.as_secs() as i64;
        let buckets = self.buckets.lock().unwrap();
        buckets
            .iter()
            .filter(|(bucket, _)| **bucket >= cutoff)
            .map(|(_, count)| *count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_collect_observes_bucket() {
        let counter = AccessCounter::new(Duration::from_secs(60));
        let now = Utc::now();
        counter.add_at(now);
        counter.add_at(now);
        let snapshot = counter.collect();
        let bucket = truncate(now, 60);
        assert_eq!(snapshot.get(&bucket), Some(&2));
        // collect clears the buckets
        assert!(counter.collect().is_empty());
    }

    #[test]
    fn sum_within_ignores_old_buckets() {
        let counter = AccessCounter::new(Duration::from_secs(60));
        let old = Utc::now() - chrono::Duration::hours(2);
        counter.add_at(old);
        assert_eq!(counter.sum_within(Duration::from_secs(3600)), 0);
        counter.add_at(Utc::now());
        assert_eq!(counter.sum_within(Duration::from_secs(3600)), 1);
    }
}
