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

//! One upstream handler plus its idle-expiry deadline (§4.2).

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// `{upstream, deadline}`. "Alive" is polled non-blockingly: has the deadline
/// passed? A `None` lifetime means the deadline never expires (local mode).
pub struct ProxyHandler {
    pub upstream_addr: String,
    lifetime: Option<Duration>,
    deadline: Mutex<Instant>,
}

impl ProxyHandler {
    pub fn new(upstream_addr: String, lifetime: Option<Duration>) -> Self {
        let deadline = match lifetime {
            Some(d) => Instant::now() + d,
            // far enough in the future to be "effectively infinite" per §3.
            None => Instant::now() + Duration::from_secs(365 * 24 * 3600),
        };
        ProxyHandler {
            upstream_addr,
            lifetime,
            deadline: Mutex::new(deadline),
        }
    }

    pub fn is_alive(&self) -> bool {
        Instant::now() < *self.deadline.lock().unwrap()
    }

    /// Resets the deadline to a full `lifetime` from now.
    pub fn extend(&self) {
        if let Some(lifetime) = self.lifetime {
            *self.deadline.lock().unwrap() = Instant::now() + lifetime;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_until_lifetime_elapses() {
        let handler = ProxyHandler::new("10.0.0.5:80".to_string(), Some(Duration::from_millis(20)));
        assert!(handler.is_alive());
        std::thread::sleep(Duration::from_millis(40));
        assert!(!handler.is_alive());
    }

    #[test]
    fn extend_resets_full_lifetime() {
        let handler = ProxyHandler::new("10.0.0.5:80".to_string(), Some(Duration::from_millis(30)));
        std::thread::sleep(Duration::from_millis(20));
        handler.extend();
        std::thread::sleep(Duration::from_millis(20));
        assert!(handler.is_alive(), "extend should have reset the deadline");
    }

    #[test]
    fn local_mode_lifetime_is_effectively_infinite() {
        let handler = ProxyHandler::new("127.0.0.1:9000".to_string(), None);
        assert!(handler.is_alive());
    }
}
