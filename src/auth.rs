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

//! Two pure functions the rest of the gateway treats as its entire auth
//! surface (§6): issue a signed cookie after the web API authenticates a
//! user, and validate one on the proxy's hot path. Neither touches a
//! request object directly, so they're trivial to unit test.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

const COOKIE_LIFETIME_SECS: i64 = 24 * 3600;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// Signs a JWT for `subject` and renders it as a `Set-Cookie` header value
/// scoped to `domain`, valid for 24 hours.
pub fn issue_cookie(cookie_name: &str, subject: &str, jwt_secret: &str, domain: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: subject.to_string(),
        exp: chrono::Utc::now().timestamp() + COOKIE_LIFETIME_SECS,
    };
    let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(jwt_secret.as_bytes()))?;
    Ok(format!(
        "{cookie_name}={token}; Domain={domain}; Path=/; Max-Age={COOKIE_LIFETIME_SECS}; HttpOnly; SameSite=Lax"
    ))
}

/// True if `token` is a well-formed, unexpired, correctly-signed cookie
/// value previously produced by [`issue_cookie`].
pub fn validate_cookie(token: &str, jwt_secret: &str) -> bool {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(jwt_secret.as_bytes()), &validation).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_cookie_validates() {
        let cookie = issue_cookie("gw_session", "operator", "super-secret", "example.com").unwrap();
        let token = cookie
            .split(';')
            .next()
            .unwrap()
            .trim_start_matches("gw_session=");
        assert!(validate_cookie(token, "super-secret"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let cookie = issue_cookie("gw_session", "operator", "super-secret", "example.com").unwrap();
        let token = cookie
            .split(';')
            .next()
            .unwrap()
            .trim_start_matches("gw_session=");
        assert!(!validate_cookie(token, "other-secret"));
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(!validate_cookie("not-a-jwt", "super-secret"));
    }
}
