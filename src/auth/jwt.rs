//! HS256 bearer tokens.
//!
//! Signature and shape are checked here. Expiry is checked by the caller
//! against the injected clock, and revocation against the store.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::principal::Principal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
    pub iat: i64,
    pub exp: i64,
    /// Only present on customer sessions opened with a temp token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_id: Option<i64>,
}

impl Claims {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() < self.exp
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Error, Debug)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token generation failed: {0}")]
    GenerationFailed(String),
}

/// A freshly minted token and its `exp` as a Unix timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
}

impl JwtService {
    pub fn new(secret: &str, lifetime_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            lifetime: Duration::seconds(lifetime_secs),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Token for `principal` valid for the configured lifetime.
    pub fn issue(&self, principal: &Principal, now: DateTime<Utc>) -> Result<IssuedToken, JwtError> {
        self.issue_until(principal, now, now + self.lifetime)
    }

    /// Token for `principal` with an explicit expiry.
    pub fn issue_until(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedToken, JwtError> {
        let claims = principal.to_claims(now.timestamp(), expires_at.timestamp());
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::GenerationFailed(e.to_string()))?;
        Ok(IssuedToken { token, expires_at: claims.exp })
    }

    /// Verify the signature and decode the claims. `exp` must be present but
    /// is not compared with the wall clock here.
    pub fn decode(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| JwtError::InvalidToken(e.to_string()))
    }

    pub fn extract_from_header(header: &str) -> Option<&str> {
        header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "a-test-secret-of-some-length";

    #[test]
    fn operator_round_trip() {
        let jwt = JwtService::new(SECRET, 7200);
        let now = Utc::now();
        let issued = jwt
            .issue(&Principal::Operator { id: 5, username: "root".into() }, now)
            .unwrap();
        assert_eq!(issued.expires_at, now.timestamp() + 7200);

        let claims = jwt.decode(&issued.token).unwrap();
        assert_eq!(claims.user_id, 5);
        assert!(claims.is_admin);
        assert_eq!(claims.shop_id, None);
        assert!(claims.is_live_at(now));
        assert!(!claims.is_live_at(now + Duration::seconds(7200)));
    }

    #[test]
    fn shop_owner_claims_carry_shop_id_as_user_id() {
        let jwt = JwtService::new(SECRET, 60);
        let issued = jwt
            .issue(&Principal::ShopOwner { shop_id: 11, username: "shop_corner".into() }, Utc::now())
            .unwrap();
        let claims = jwt.decode(&issued.token).unwrap();
        assert_eq!((claims.user_id, claims.is_admin), (11, false));
        assert_eq!(Principal::from(claims), Principal::ShopOwner { shop_id: 11, username: "shop_corner".into() });
    }

    #[test]
    fn expired_tokens_still_decode() {
        let jwt = JwtService::new(SECRET, 60);
        let past = Utc::now() - Duration::days(1);
        let issued = jwt.issue(&Principal::Operator { id: 1, username: "a".into() }, past).unwrap();
        let claims = jwt.decode(&issued.token).unwrap();
        assert!(!claims.is_live_at(Utc::now()));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issued = JwtService::new(SECRET, 60)
            .issue(&Principal::Operator { id: 1, username: "a".into() }, Utc::now())
            .unwrap();
        let other = JwtService::new("another-secret-entirely", 60);
        assert!(other.decode(&issued.token).is_err());
        assert!(other.decode("not.a.token").is_err());
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(JwtService::extract_from_header("Bearer abc"), Some("abc"));
        assert_eq!(JwtService::extract_from_header("Bearer "), None);
        assert_eq!(JwtService::extract_from_header("Basic abc"), None);
    }
}
