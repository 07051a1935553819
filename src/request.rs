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

use pingora::http::RequestHeader;

pub struct RequestProvider {}

impl RequestProvider {
    pub fn new() -> Self {
        RequestProvider {}
    }

    /// Gets string value from req header.
    pub fn get_req_header_value<'a>(&self, req_header: &'a RequestHeader, key: &str) -> Option<&'a str> {
        req_header.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// Gets cookie value from req header.
    pub fn get_cookie_value<'a>(&self, req_header: &'a RequestHeader, cookie_name: &str) -> Option<&'a str> {
        let cookie_value = self.get_req_header_value(req_header, "Cookie")?;
        for item in cookie_value.split(';') {
            if let Some((k, v)) = item.split_once('=') {
                if k.trim() == cookie_name {
                    return Some(v.trim());
                }
            }
        }
        None
    }

    /// Get request host in this order of precedence:
    /// host name from the request line, or the "Host" request header field,
    /// with any trailing `:port` stripped.
    pub fn get_host<'a>(&'a self, header: &'a RequestHeader) -> Option<&'a str> {
        if let Some(host) = header.uri.host() {
            return Some(host);
        }
        let raw = self.get_req_header_value(header, "Host")?;
        Some(raw.split(':').next().unwrap_or(raw))
    }
}

impl Default for RequestProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Strips the leading DNS label from `host` and returns it, provided the
/// remainder matches `reverse_proxy_suffix` exactly (§4.3).
pub fn subdomain_from_host(host: &str, reverse_proxy_suffix: &str) -> Option<String> {
    let stripped = host.strip_suffix(reverse_proxy_suffix)?;
    let label = stripped.strip_suffix('.')?;
    if label.is_empty() {
        return None;
    }
    Some(label.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_leading_label() {
        assert_eq!(
            subdomain_from_host("feature-x.branch.example.com", "branch.example.com"),
            Some("feature-x".to_string())
        );
    }

    #[test]
    fn rejects_bare_suffix() {
        assert_eq!(subdomain_from_host("branch.example.com", "branch.example.com"), None);
    }

    #[test]
    fn rejects_mismatched_suffix() {
        assert_eq!(subdomain_from_host("feature-x.other.com", "branch.example.com"), None);
    }
}
