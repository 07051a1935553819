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

use thiserror::Error;

/// Typed failures surfaced by the core. The HTTP adapter (out of scope here)
/// maps each variant to a status code per the error handling design:
/// Validation -> 400, Auth -> 401/403, UpstreamTimeout -> 504,
/// UpstreamTransport -> 502, ClusterApi -> 500, Config is fatal at startup.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("{subdomain} upstream timeout: {target} ({source})")]
    UpstreamTimeout {
        subdomain: String,
        target: String,
        source: String,
    },

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("cluster api error: {0}")]
    ClusterApi(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
