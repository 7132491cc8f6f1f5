//! JWT token service
//!
//! Issues and verifies gateway login tokens with the `jsonwebtoken` crate and
//! implements the `AuthService` port. Kicked tokens are remembered until they
//! would have expired anyway.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use im_core::{AuthService, DomainError, DomainResult, PlatformId, TokenClaims};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    #[serde(rename = "platformID")]
    pub platform_id: i32,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Unique token id, so two logins never share a token string
    pub jti: String,
}

impl Claims {
    /// Check if the token is expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// JWT service for issuing and verifying login tokens
pub struct JwtAuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_expiry: i64,
    /// Kicked token -> its expiry timestamp
    revoked: DashMap<String, i64>,
}

impl JwtAuthService {
    /// Create a new JWT service with the given secret and token lifetime (seconds)
    #[must_use]
    pub fn new(secret: &str, token_expiry: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_expiry,
            revoked: DashMap::new(),
        }
    }

    /// Create a service from configuration
    #[must_use]
    pub fn from_config(config: &crate::config::JwtConfig) -> Self {
        Self::new(&config.secret, config.token_expiry)
    }

    /// Issue a token for a user on a platform
    ///
    /// # Errors
    /// Returns an error if token encoding fails
    pub fn issue_token(&self, user_id: &str, platform_id: PlatformId) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            platform_id: platform_id.as_i32(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.token_expiry)).timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Token(format!("failed to encode token: {e}")))
    }

    /// Decode and validate a token
    ///
    /// # Errors
    /// Returns an error if the token is malformed, expired, forged, or kicked
    pub fn decode_token(&self, token: &str) -> DomainResult<Claims> {
        if self.revoked.contains_key(token) {
            return Err(DomainError::TokenKicked);
        }

        let validation = Validation::default();
        let token_data =
            decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => DomainError::TokenExpired,
                ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
                    DomainError::TokenMalformed
                }
                _ => DomainError::TokenInvalid,
            })?;

        Ok(token_data.claims)
    }

    /// Number of tokens currently remembered as kicked
    #[must_use]
    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    fn prune_revoked(&self) {
        let now = Utc::now().timestamp();
        self.revoked.retain(|_, exp| *exp >= now);
    }
}

impl std::fmt::Debug for JwtAuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthService")
            .field("token_expiry", &self.token_expiry)
            .field("revoked", &self.revoked.len())
            .finish()
    }
}

#[async_trait]
impl AuthService for JwtAuthService {
    async fn parse_token(&self, token: &str) -> DomainResult<TokenClaims> {
        let claims = self.decode_token(token)?;
        Ok(TokenClaims {
            user_id: claims.sub,
            platform_id: PlatformId::new(claims.platform_id),
        })
    }

    async fn kick_tokens(&self, user_id: &str, tokens: &[String]) -> DomainResult<()> {
        self.prune_revoked();

        for token in tokens {
            // Tokens that no longer decode are already unusable.
            let exp = match decode::<Claims>(token, &self.decoding_key, &Validation::default()) {
                Ok(data) => data.claims.exp,
                Err(_) => continue,
            };
            self.revoked.insert(token.clone(), exp);
        }

        tracing::debug!(user_id = %user_id, count = tokens.len(), "Kicked tokens");
        Ok(())
    }
}
