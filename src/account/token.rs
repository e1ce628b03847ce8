//! Session Tokens
//!
//! HS256 JWTs issued at registration and login, verified on profile lookup.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::account::password::DEFAULT_COST;
use crate::core::env::env_parse;

/// Default token lifetime (24 hours).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Account service configuration.
#[derive(Clone, Debug)]
pub struct AccountConfig {
    /// HS256 signing secret.
    pub secret: String,
    /// Token lifetime in seconds.
    pub token_ttl_secs: u64,
    /// Issuer claim ("iss"). Checked on verify when set.
    pub issuer: Option<String>,
    /// bcrypt cost for new password hashes.
    pub password_cost: u32,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            secret: random_secret(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            issuer: None,
            password_cost: DEFAULT_COST,
        }
    }
}

impl AccountConfig {
    /// Create config from environment variables.
    ///
    /// Without `JWT_SECRET` a random per-process secret is used, so tokens do
    /// not survive a restart.
    pub fn from_env() -> Self {
        let secret = match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("JWT_SECRET not set, using a random per-process secret");
                random_secret()
            }
        };
        Self {
            secret,
            token_ttl_secs: env_parse("TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS),
            issuer: std::env::var("JWT_ISSUER").ok(),
            password_cost: env_parse("BCRYPT_COST", DEFAULT_COST),
        }
    }
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject, the user id as a string.
    pub sub: String,
    /// Numeric user id.
    #[serde(rename = "userId")]
    pub user_id: u64,
    /// Username at issue time.
    pub username: String,
    /// Issued at (Unix seconds).
    #[serde(default)]
    pub iat: u64,
    /// Expiry (Unix seconds).
    pub exp: u64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Token errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Signing failed.
    #[error("encode error: {0}")]
    EncodeError(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Issues and verifies session tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
    issuer: Option<String>,
}

impl TokenIssuer {
    /// Create an issuer from config.
    pub fn new(config: &AccountConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            ttl_secs: config.token_ttl_secs,
            issuer: config.issuer.clone(),
        }
    }

    /// Token lifetime in seconds.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Issue a token valid from now.
    pub fn issue(&self, user_id: u64, username: &str) -> Result<String, TokenError> {
        let now = Utc::now().timestamp().max(0) as u64;
        self.issue_at(user_id, username, now)
    }

    /// Issue a token as if the current time were `issued_at`.
    pub fn issue_at(
        &self,
        user_id: u64,
        username: &str,
        issued_at: u64,
    ) -> Result<String, TokenError> {
        let claims = TokenClaims {
            sub: user_id.to_string(),
            user_id,
            username: username.to_string(),
            iat: issued_at,
            exp: issued_at.saturating_add(self.ttl_secs),
            iss: self.issuer.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::EncodeError(e.to_string()))
    }

    /// Verify signature, expiry and issuer, and return the claims.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        if let Some(ref issuer) = self.issuer {
            validation.set_issuer(&[issuer]);
        }

        let claims = decode::<TokenClaims>(token, &self.decoding, &validation)
            .map_err(map_jwt_error)?
            .claims;

        if claims.sub.is_empty() {
            return Err(TokenError::MissingClaim("sub".into()));
        }
        if claims.sub != claims.user_id.to_string() {
            return Err(TokenError::DecodeError("subject does not match userId".into()));
        }

        Ok(claims)
    }
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
        ErrorKind::MissingRequiredClaim(claim) => TokenError::MissingClaim(claim.clone()),
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => TokenError::InvalidFormat,
        _ => TokenError::DecodeError(err.to_string()),
    }
}
