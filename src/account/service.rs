//! Account Service
//!
//! Registration, login and profile lookup. Each user owns exactly one wallet
//! in the [`Ledger`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::account::ledger::{Ledger, LedgerError};
use crate::account::password::{HashError, PasswordHash, MIN_PASSWORD_LEN};
use crate::account::token::{AccountConfig, TokenClaims, TokenError, TokenIssuer};

/// Public view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User id.
    pub id: u64,
    /// Username (trimmed).
    pub username: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// Result of a successful register or login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthSession {
    /// Signed session token.
    pub token: String,
    /// The user.
    pub user: UserProfile,
}

/// Account errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    /// Username empty after trimming.
    #[error("username is required")]
    InvalidUsername,
    /// Password below the minimum length.
    #[error("password must be at least {min} characters")]
    PasswordTooShort {
        /// Minimum length.
        min: usize,
    },
    /// Username already registered.
    #[error("username '{0}' already exists")]
    UsernameTaken(String),
    /// Unknown user or wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Token names a user that no longer exists.
    #[error("user {0} not found")]
    UserNotFound(u64),
    /// Token failure.
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    /// Ledger failure.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    /// Password hashing failure.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// The blocking hash task panicked or was cancelled.
    #[error("password task failed: {0}")]
    TaskFailed(String),
}

struct UserRecord {
    profile: UserProfile,
    password: PasswordHash,
}

#[derive(Default)]
struct UserTable {
    by_id: BTreeMap<u64, UserRecord>,
    by_name: BTreeMap<String, u64>,
    last_id: u64,
}

/// In-memory account store.
pub struct AccountService {
    users: RwLock<UserTable>,
    ledger: Arc<Ledger>,
    tokens: TokenIssuer,
    password_cost: u32,
}

impl AccountService {
    /// Create a service writing wallets to `ledger`.
    pub fn new(config: &AccountConfig, ledger: Arc<Ledger>) -> Self {
        Self {
            users: RwLock::new(UserTable::default()),
            ledger,
            tokens: TokenIssuer::new(config),
            password_cost: config.password_cost,
        }
    }

    /// The wallet ledger.
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Register a user and open their wallet.
    pub async fn register(&self, username: &str, password: &str) -> Result<AuthSession, AccountError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AccountError::InvalidUsername);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AccountError::PasswordTooShort { min: MIN_PASSWORD_LEN });
        }

        // bcrypt is CPU bound; keep it off the async workers.
        let cost = self.password_cost;
        let plain = password.to_string();
        let password = tokio::task::spawn_blocking(move || PasswordHash::with_cost(&plain, cost))
            .await
            .map_err(|e| AccountError::TaskFailed(e.to_string()))??;

        let mut users = self.users.write().await;
        if users.by_name.contains_key(username) {
            return Err(AccountError::UsernameTaken(username.to_string()));
        }

        users.last_id += 1;
        let id = users.last_id;
        let profile = UserProfile {
            id,
            username: username.to_string(),
            created_at: Utc::now(),
        };

        // User and wallet are created together; the user is dropped again if
        // the wallet cannot be opened.
        users.by_name.insert(profile.username.clone(), id);
        users.by_id.insert(id, UserRecord { profile: profile.clone(), password });
        if let Err(e) = self.ledger.open_wallet(id).await {
            warn!("Rolling back user {}: {}", id, e);
            users.by_name.remove(&profile.username);
            users.by_id.remove(&id);
            return Err(e.into());
        }
        drop(users);

        let token = self.tokens.issue(id, &profile.username)?;
        info!("Registered user {} ({})", id, profile.username);
        Ok(AuthSession { token, user: profile })
    }

    /// Check credentials and issue a fresh token.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthSession, AccountError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AccountError::InvalidCredentials);
        }

        let (profile, stored) = {
            let users = self.users.read().await;
            let record = users
                .by_name
                .get(username)
                .and_then(|id| users.by_id.get(id))
                .ok_or(AccountError::InvalidCredentials)?;
            (record.profile.clone(), record.password.clone())
        };

        let plain = password.to_string();
        let matches = tokio::task::spawn_blocking(move || stored.verify(&plain))
            .await
            .map_err(|e| AccountError::TaskFailed(e.to_string()))?;
        if !matches {
            return Err(AccountError::InvalidCredentials);
        }

        let token = self.tokens.issue(profile.id, &profile.username)?;
        info!("User {} logged in", profile.id);
        Ok(AuthSession { token, user: profile })
    }

    /// Check a session token's signature, expiry and issuer.
    pub fn verify_token(&self, token: &str) -> Result<TokenClaims, AccountError> {
        Ok(self.tokens.verify(token)?)
    }

    /// Resolve a session token to its user.
    pub async fn profile(&self, token: &str) -> Result<UserProfile, AccountError> {
        let claims = self.verify_token(token)?;
        self.users
            .read()
            .await
            .by_id
            .get(&claims.user_id)
            .map(|record| record.profile.clone())
            .ok_or(AccountError::UserNotFound(claims.user_id))
    }
}
