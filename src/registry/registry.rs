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

//! The guarded `subdomain -> {listenPort -> {upstreamAddr -> ProxyHandler}}`
//! map plus its ordered registration list and per-subdomain access counters
//! (§4.1).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::warn;

use crate::config::ListenMapping;
use crate::control::ControlMessage;
use crate::error::Result;
use crate::registry::counter::AccessCounter;
use crate::registry::handler::ProxyHandler;
use crate::subdomain::is_pattern;

type UpstreamMap = scc::HashMap<String, Arc<ProxyHandler>, ahash::RandomState>;

struct SubdomainEntry {
    /// listenPort -> upstreamAddr -> handler
    handlers: scc::HashMap<u16, Arc<UpstreamMap>, ahash::RandomState>,
    counter: AccessCounter,
}

impl SubdomainEntry {
    fn new(local_mode: bool) -> Self {
        SubdomainEntry {
            handlers: scc::HashMap::default(),
            counter: if local_mode {
                AccessCounter::local_default()
            } else {
                AccessCounter::cluster_default()
            },
        }
    }
}

pub struct ProxyRegistry {
    entries: scc::HashMap<String, Arc<SubdomainEntry>, ahash::RandomState>,
    /// Registration order, independent of the (unordered) concurrent map.
    order: RwLock<Vec<String>>,
    listen: Vec<ListenMapping>,
    /// `None` in local mode: handlers never expire.
    handler_lifetime: Option<Duration>,
    local_mode: bool,
}

impl ProxyRegistry {
    pub fn new(listen: Vec<ListenMapping>, handler_lifetime: Option<Duration>, local_mode: bool) -> Self {
        ProxyRegistry {
            entries: scc::HashMap::default(),
            order: RwLock::new(Vec::new()),
            listen,
            handler_lifetime,
            local_mode,
        }
    }

    /// True on an exact match, or if any registered name is a glob pattern
    /// matching `subdomain`.
    pub async fn exists(&self, subdomain: &str) -> bool {
        if self.entries.contains_async(subdomain).await {
            return true;
        }
        let order = self.order.read().await;
        order.iter().any(|name| glob_matches(name, subdomain))
    }

    /// Snapshot of registered names in registration order.
    pub async fn subdomains(&self) -> Vec<String> {
        self.order.read().await.clone()
    }

    /// Exact lookup first, then the first glob match; within the resolved
    /// entry, any live handler on `listen_port` is acceptable. Dead handlers
    /// encountered along the way are purged.
    pub async fn find_handler(&self, subdomain: &str, listen_port: u16) -> Option<Arc<ProxyHandler>> {
        if let Some(entry) = self.entries.get_async(subdomain).await {
            let entry = entry.get().clone();
            if let Some(handler) = Self::live_handler_on_port(&entry, listen_port).await {
                return Some(handler);
            }
        }

        let candidate = {
            let order = self.order.read().await;
            order
                .iter()
                .find(|name| name.as_str() != subdomain && glob_matches(name, subdomain))
                .cloned()
        };
        let candidate = candidate?;
        let entry = self.entries.get_async(&candidate).await?.get().clone();
        Self::live_handler_on_port(&entry, listen_port).await
    }

    async fn live_handler_on_port(entry: &SubdomainEntry, listen_port: u16) -> Option<Arc<ProxyHandler>> {
        let by_upstream = entry.handlers.get_async(&listen_port).await?.get().clone();
        let mut dead = Vec::new();
        let mut chosen = None;
        by_upstream
            .scan_async(|upstream, handler| {
                if handler.is_alive() {
                    if chosen.is_none() {
                        chosen = Some((upstream.clone(), handler.clone()));
                    }
                } else {
                    dead.push(upstream.clone());
                }
            })
            .await;
        for upstream in dead {
            by_upstream.remove_async(&upstream).await;
        }
        if let Some((_, handler)) = chosen {
            handler.extend();
            Some(handler)
        } else {
            None
        }
    }

    /// Ensures a live handler exists for every listen mapping whose target
    /// matches `container_target_port` (any mapping, in local mode).
    pub async fn add_subdomain(&self, subdomain: &str, upstream_ip: &str, container_target_port: u16) {
        let matches: Vec<&ListenMapping> = self
            .listen
            .iter()
            .filter(|m| self.local_mode || m.target_port == container_target_port)
            .collect();
        if matches.is_empty() {
            warn!(
                "no listen mapping targets port {container_target_port} for subdomain {subdomain}; \
                 ignoring add"
            );
            return;
        }

        let entry = {
            let local_mode = self.local_mode;
            self.entries
                .entry_async(subdomain.to_string())
                .await
                .or_insert_with(|| Arc::new(SubdomainEntry::new(local_mode)))
                .get()
                .clone()
        };

        let upstream_addr = format!("{upstream_ip}:{container_target_port}");
        for mapping in matches {
            let by_upstream = entry
                .handlers
                .entry_async(mapping.listen_port)
                .await
                .or_insert_with(|| Arc::new(scc::HashMap::default()))
                .get()
                .clone();
            if let Some(existing) = by_upstream.get_async(&upstream_addr).await {
                existing.get().extend();
            } else {
                let handler = Arc::new(ProxyHandler::new(upstream_addr.clone(), self.handler_lifetime));
                let _ = by_upstream.insert_async(upstream_addr.clone(), handler).await;
            }
        }

        let mut order = self.order.write().await;
        if !order.iter().any(|n| n == subdomain) {
            order.push(subdomain.to_string());
        }
    }

    pub async fn remove_subdomain(&self, subdomain: &str) {
        self.entries.remove_async(subdomain).await;
        let mut order = self.order.write().await;
        order.retain(|n| n != subdomain);
    }

    pub async fn modify(&self, message: ControlMessage) -> Result<()> {
        match message {
            ControlMessage::AddSubdomain {
                subdomain,
                upstream_ip,
                container_target_port,
            } => {
                self.add_subdomain(&subdomain, &upstream_ip, container_target_port).await;
            }
            ControlMessage::RemoveSubdomain { subdomain } => {
                self.remove_subdomain(&subdomain).await;
            }
        }
        Ok(())
    }

    /// Increments the access counter for `subdomain`. No-op if the
    /// subdomain is not currently registered.
    pub async fn record_access(&self, subdomain: &str) {
        if let Some(entry) = self.entries.get_async(subdomain).await {
            entry.get().counter.add();
        }
    }

    /// Snapshot of every registered subdomain's access-counter buckets, for
    /// metric publication.
    pub async fn collect_access_counts(&self) -> HashMap<String, HashMap<i64, u64>> {
        let mut out = HashMap::new();
        for subdomain in self.subdomains().await {
            if let Some(entry) = self.entries.get_async(&subdomain).await {
                out.insert(subdomain, entry.get().counter.collect());
            }
        }
        out
    }
}

fn glob_matches(pattern: &str, subdomain: &str) -> bool {
    if !is_pattern(pattern) {
        return pattern == subdomain;
    }
    glob::Pattern::new(pattern)
        .map(|p| p.matches(subdomain))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(listen_port: u16, target_port: u16) -> ListenMapping {
        ListenMapping {
            listen_port,
            target_port,
            require_auth_cookie: false,
        }
    }

    #[tokio::test]
    async fn add_route_remove_round_trip() {
        let registry = ProxyRegistry::new(vec![mapping(8080, 80)], Some(Duration::from_secs(30)), false);
        registry.add_subdomain("feature-x", "10.0.0.5", 80).await;
        let handler = registry.find_handler("feature-x", 8080).await.unwrap();
        assert_eq!(handler.upstream_addr, "10.0.0.5:80");

        registry.remove_subdomain("feature-x").await;
        assert!(registry.find_handler("feature-x", 8080).await.is_none());
        assert!(!registry.exists("feature-x").await);
    }

    #[tokio::test]
    async fn wildcard_subdomain_routes() {
        let registry = ProxyRegistry::new(vec![mapping(8080, 80)], Some(Duration::from_secs(30)), false);
        registry.add_subdomain("pr-*", "10.0.0.9", 80).await;
        let handler = registry.find_handler("pr-42", 8080).await.unwrap();
        assert_eq!(handler.upstream_addr, "10.0.0.9:80");
    }

    #[tokio::test]
    async fn handler_expires_after_lifetime() {
        let registry = ProxyRegistry::new(
            vec![mapping(8080, 80)],
            Some(Duration::from_millis(20)),
            false,
        );
        registry.add_subdomain("feature-x", "10.0.0.5", 80).await;
        assert!(registry.find_handler("feature-x", 8080).await.is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(registry.find_handler("feature-x", 8080).await.is_none());
    }

    #[tokio::test]
    async fn no_matching_listen_mapping_is_a_noop() {
        let registry = ProxyRegistry::new(vec![mapping(8080, 80)], Some(Duration::from_secs(30)), false);
        registry.add_subdomain("feature-x", "10.0.0.5", 9999).await;
        assert!(!registry.exists("feature-x").await);
    }
}
