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

//! Wire-level tag/env conventions shared by every `TaskRunner` implementation:
//! `ManagedBy=<magic>`, `Subdomain=base64url(subdomain)`, one tag per declared
//! parameter, and the `SUBDOMAIN`/`SUBDOMAINRAW` container env vars.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

pub const MANAGED_BY_TAG: &str = "ManagedBy";
pub const SUBDOMAIN_TAG: &str = "Subdomain";

pub fn encode_tag_value(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(value.as_bytes())
}

pub fn decode_tag_value(value: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(value).ok()?;
    String::from_utf8(bytes).ok()
}

/// Builds the `SUBDOMAIN` env var per the v1/v2 compatibility rule: v1
/// containers expect base64url, v2 containers expect the raw subdomain.
/// `SUBDOMAINRAW` is always plain regardless of compat mode.
pub fn subdomain_env_vars(subdomain: &str, v1_compat: bool) -> [(String, String); 2] {
    let subdomain_value = if v1_compat {
        encode_tag_value(subdomain)
    } else {
        subdomain.to_string()
    };
    [
        ("SUBDOMAIN".to_string(), subdomain_value),
        ("SUBDOMAINRAW".to_string(), subdomain.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_value_roundtrips_utf8() {
        for s in ["feature-x", "pr-42", "unicode-€-name"] {
            assert_eq!(decode_tag_value(&encode_tag_value(s)).unwrap(), s);
        }
    }

    #[test]
    fn v1_compat_encodes_subdomain_env() {
        let vars = subdomain_env_vars("feature-x", true);
        assert_eq!(vars[0].1, encode_tag_value("feature-x"));
        assert_eq!(vars[1].1, "feature-x");
    }

    #[test]
    fn v2_passes_subdomain_env_raw() {
        let vars = subdomain_env_vars("feature-x", false);
        assert_eq!(vars[0].1, "feature-x");
        assert_eq!(vars[1].1, "feature-x");
    }
}
