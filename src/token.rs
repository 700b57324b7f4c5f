//! Auth tokens handed to the responder and the polling initiator.
//!
//! HS256 JWTs carrying the user id and username, valid for seven days.

use crate::error::{AppError, AppResult};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenIssuer {
    enc: EncodingKey,
    dec: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str) -> Self {
        Self {
            enc: EncodingKey::from_secret(secret.as_bytes()),
            dec: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::days(7),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn issue(&self, user_id: &str, username: &str) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.enc)
            .map_err(|e| AppError::Internal(format!("could not sign token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        if token.trim().is_empty() {
            return Err(AppError::Unauthorized("missing token".to_string()));
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = jsonwebtoken::decode::<Claims>(token, &self.dec, &validation)
            .map_err(|e| AppError::Unauthorized(format!("invalid token: {}", e)))?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify() {
        let issuer = TokenIssuer::new("secret");
        let token = issuer.issue("u1", "alice").unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 3600);
    }

    #[test]
    fn wrong_secret_and_expiry_rejected() {
        let token = TokenIssuer::new("one").issue("u1", "alice").unwrap();
        assert!(matches!(
            TokenIssuer::new("two").verify(&token),
            Err(AppError::Unauthorized(_))
        ));

        let expired = TokenIssuer::new("one")
            .with_ttl(Duration::hours(-1))
            .issue("u1", "alice")
            .unwrap();
        assert!(TokenIssuer::new("one").verify(&expired).is_err());
    }
}
