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

pub mod auth;
pub mod config;
pub mod control;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod proxy;
pub mod purge;
pub mod registry;
pub mod request;
pub mod response;
pub mod runner;
pub mod subdomain;
pub mod tagging;

pub use error::{GatewayError, Result};
pub use gateway::Gateway;
