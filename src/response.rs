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

use pingora::http::ResponseHeader;
use pingora::proxy::Session;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    status_code: u16,
    message: String,
}

pub struct ResponseProvider {}

impl ResponseProvider {
    pub fn new() -> Self {
        ResponseProvider {}
    }

    /// Writes a synthesised JSON error response and closes the connection,
    /// matching UpstreamTransport's 403/404/504 synthesis (§4.3).
    pub async fn error_response(&self, session: &mut Session, status_code: u16, message: &str) -> pingora::Result<()> {
        let mut header = ResponseHeader::build(status_code, None)?;
        header.insert_header("Content-Type", "application/json")?;
        let body = ErrorBody {
            status_code,
            message: message.to_string(),
        };
        let json_body = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
        session.set_keepalive(None);
        session.write_response_header(Box::new(header), false).await?;
        session.write_response_body(Some(Bytes::from(json_body)), true).await?;
        Ok(())
    }
}

impl Default for ResponseProvider {
    fn default() -> Self {
        Self::new()
    }
}
