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

//! UpstreamTransport (§4.3): one `ProxyHttp` implementation per configured
//! listen port, sharing a single `ProxyRegistry`. Counts the request against
//! its subdomain, resolves the Host header, enforces the auth cookie when
//! the listen mapping requires one, and synthesises 403/404/504 bodies the
//! way the wrapped transport would; an actual upstream transport failure
//! still surfaces as pingora's own 502.

use std::sync::Arc;

use async_trait::async_trait;
use pingora::http::ResponseHeader;
use pingora::prelude::HttpPeer;
use pingora::proxy::{ProxyHttp, Session};
use pingora::{Error, Result};

use crate::auth;
use crate::error::GatewayError;
use crate::registry::ProxyRegistry;
use crate::request::{subdomain_from_host, RequestProvider};
use crate::response::ResponseProvider;

pub struct Router {
    pub registry: Arc<ProxyRegistry>,
    pub listen_port: u16,
    pub require_auth_cookie: bool,
    pub cookie_name: String,
    pub jwt_secret: String,
    pub reverse_proxy_suffix: String,
    pub proxy_timeout_ms: u64,
    request: RequestProvider,
    response: ResponseProvider,
}

impl Router {
    pub fn new(
        registry: Arc<ProxyRegistry>,
        listen_port: u16,
        require_auth_cookie: bool,
        cookie_name: String,
        jwt_secret: String,
        reverse_proxy_suffix: String,
        proxy_timeout_ms: u64,
    ) -> Self {
        Router {
            registry,
            listen_port,
            require_auth_cookie,
            cookie_name,
            jwt_secret,
            reverse_proxy_suffix,
            proxy_timeout_ms,
            request: RequestProvider::new(),
            response: ResponseProvider::new(),
        }
    }
}

pub struct RouterCtx {
    pub subdomain: String,
    pub target: String,
}

#[async_trait]
impl ProxyHttp for Router {
    type CTX = RouterCtx;

    fn new_ctx(&self) -> Self::CTX {
        RouterCtx {
            subdomain: String::new(),
            target: String::new(),
        }
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool>
    where
        Self::CTX: Send + Sync,
    {
        let req_header = session.req_header().clone();

        let host = match self.request.get_host(&req_header) {
            Some(host) => host.to_string(),
            None => {
                self.response.error_response(session, 400, "missing Host header").await?;
                return Ok(true);
            }
        };

        let subdomain = match subdomain_from_host(&host, &self.reverse_proxy_suffix) {
            Some(subdomain) => subdomain,
            None => {
                self.response
                    .error_response(session, 400, &format!("host {host} does not resolve to a subdomain"))
                    .await?;
                return Ok(true);
            }
        };

        self.registry.record_access(&subdomain).await;

        if self.require_auth_cookie && req_header.method != http::Method::OPTIONS {
            let authorized = self
                .request
                .get_cookie_value(&req_header, &self.cookie_name)
                .map(|token| auth::validate_cookie(token, &self.jwt_secret))
                .unwrap_or(false);
            if !authorized {
                self.response.error_response(session, 403, "Forbidden: missing or invalid auth cookie").await?;
                return Ok(true);
            }
        }

        let handler = match self.registry.find_handler(&subdomain, self.listen_port).await {
            Some(handler) => handler,
            None => {
                self.response
                    .error_response(session, 404, &format!("no upstream registered for {subdomain}"))
                    .await?;
                return Ok(true);
            }
        };

        ctx.subdomain = subdomain;
        ctx.target = handler.upstream_addr.clone();
        Ok(false)
    }

    async fn upstream_peer(&self, _session: &mut Session, ctx: &mut Self::CTX) -> Result<Box<HttpPeer>> {
        let mut peer = Box::new(HttpPeer::new(&ctx.target, false, String::new()));
        if self.proxy_timeout_ms > 0 {
            let timeout = std::time::Duration::from_millis(self.proxy_timeout_ms);
            peer.options.connection_timeout = Some(timeout);
            peer.options.read_timeout = Some(timeout);
            peer.options.write_timeout = Some(timeout);
        }
        Ok(peer)
    }

    async fn response_filter(&self, _session: &mut Session, _upstream_response: &mut ResponseHeader, _ctx: &mut Self::CTX) -> Result<()>
    where
        Self::CTX: Send + Sync,
    {
        Ok(())
    }

    /// Synthesises the 504 body named by §4.3(d) when the failure looks like
    /// a timeout; other connect failures propagate as pingora's default.
    async fn error_while_proxy(
        &self,
        peer: &HttpPeer,
        session: &mut Session,
        e: Box<Error>,
        ctx: &mut Self::CTX,
        _client_reused: bool,
    ) -> Box<Error> {
        if e.to_string().to_lowercase().contains("timeout") {
            let gateway_err = GatewayError::UpstreamTimeout {
                subdomain: ctx.subdomain.clone(),
                target: peer.address().to_string(),
                source: e.to_string(),
            };
            let _ = self.response.error_response(session, 504, &gateway_err.to_string()).await;
        }
        e
    }
}
