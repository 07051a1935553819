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

//! Subdomain validation (§4.7): a lowercase DNS label, 2-63 chars, that must
//! also be a syntactically valid shell glob.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GatewayError, Result};

// first/last char: alphanumeric or glob meta; interior additionally allows '-'.
static SUBDOMAIN_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9*?\[\]][a-z0-9*?\[\]\-]*[a-z0-9*?\[\]]$").unwrap());

/// Validates a candidate subdomain and returns it unchanged on success.
pub fn validate_subdomain(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Err(GatewayError::Validation("subdomain is empty".to_string()));
    }
    let len = raw.chars().count();
    if len < 2 || len > 63 {
        return Err(GatewayError::Validation(format!(
            "subdomain must be 2-63 characters, got {len}"
        )));
    }
    if raw != raw.to_lowercase() {
        return Err(GatewayError::Validation(
            "subdomain must be lowercase".to_string(),
        ));
    }
    if !SUBDOMAIN_SHAPE.is_match(raw) {
        return Err(GatewayError::Validation(format!(
            "subdomain {raw:?} does not match the DNS-with-glob shape"
        )));
    }
    glob::Pattern::new(raw)
        .map_err(|e| GatewayError::Validation(format!("subdomain {raw:?} is not a valid glob: {e}")))?;
    Ok(raw.to_string())
}

/// True if `name` contains any glob meta-character, i.e. is a pattern rather
/// than a literal subdomain.
pub fn is_pattern(name: &str) -> bool {
    name.contains(['*', '?', '[', ']'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_shapes() {
        for s in ["abc", "a-b-c", "a*c", "[ab]c"] {
            assert!(validate_subdomain(s).is_ok(), "expected {s} to be valid");
        }
    }

    #[test]
    fn rejects_invalid_shapes() {
        let too_long: String = "a".repeat(64);
        for s in ["", "a", "-ab", "ab-", too_long.as_str(), "ab/cd"] {
            assert!(validate_subdomain(s).is_err(), "expected {s} to be rejected");
        }
    }

    #[test]
    fn pattern_detection() {
        assert!(!is_pattern("feature-x"));
        assert!(is_pattern("pr-*"));
        assert!(is_pattern("[ab]c"));
    }
}
