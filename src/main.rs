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

use std::time::Duration;

use pingora::prelude::Opt;
use pingora::proxy::http_proxy_service;
use pingora::server::Server;

use branch_gateway::config::Config;
use branch_gateway::proxy::Router;
use branch_gateway::Gateway;

fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opt = Opt::parse_args();
    let mut server = Server::new(Some(opt)).expect("failed to initialize server");
    server.bootstrap();

    let config_source = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    // Kept alive for the rest of `main` so the runtime's worker threads keep
    // driving the purge loop and metric publisher spawned below.
    let _guard = runtime.enter();
    let gateway = runtime.block_on(async {
        let config = Config::load(&config_source).await.expect("failed to load configuration");
        Gateway::bootstrap(config).await.expect("failed to bootstrap gateway")
    });

    gateway.spawn_purge_loop();
    if gateway.config.metric_store.is_some() {
        gateway.spawn_metric_publisher(Duration::from_secs(60));
    }

    for mapping in &gateway.config.listen {
        let router = Router::new(
            gateway.registry.clone(),
            mapping.listen_port,
            mapping.require_auth_cookie,
            gateway.config.auth_cookie_name.clone(),
            gateway.config.jwt_secret.clone(),
            gateway.config.reverse_proxy_suffix.clone(),
            gateway.config.proxy_timeout_ms,
        );
        let mut service = http_proxy_service(&server.configuration, router);
        service.add_tcp(&format!("0.0.0.0:{}", mapping.listen_port));
        server.add_service(service);
    }

    server.run_forever();
}
