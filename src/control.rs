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

//! FIFO, single-consumer link between the `TaskRunner` (producer) and the
//! `ProxyRegistry` (consumer). Keeps the slow cluster-API path from ever
//! taking the registry's map lock directly.

use tracing::warn;

use crate::registry::ProxyRegistry;

#[derive(Debug, Clone)]
pub enum ControlMessage {
    AddSubdomain {
        subdomain: String,
        upstream_ip: String,
        container_target_port: u16,
    },
    RemoveSubdomain {
        subdomain: String,
    },
}

pub struct ControlChannel {
    sender: tokio::sync::mpsc::UnboundedSender<ControlMessage>,
}

impl ControlChannel {
    /// Builds the channel and spawns the single-consumer sync loop that
    /// applies messages, in order, to `registry`.
    pub fn spawn(registry: std::sync::Arc<ProxyRegistry>) -> ControlChannel {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ControlMessage>();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = registry.modify(message).await {
                    warn!("failed to apply control message: {e}");
                }
            }
        });
        ControlChannel { sender: tx }
    }

    pub fn notify_add(&self, subdomain: &str, upstream_ip: &str, container_target_port: u16) {
        let _ = self.sender.send(ControlMessage::AddSubdomain {
            subdomain: subdomain.to_string(),
            upstream_ip: upstream_ip.to_string(),
            container_target_port,
        });
    }

    pub fn notify_remove(&self, subdomain: &str) {
        let _ = self.sender.send(ControlMessage::RemoveSubdomain {
            subdomain: subdomain.to_string(),
        });
    }
}
