//! Wallet Ledger
//!
//! One wallet per user, balance held in integer cents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// A user's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    /// Owning user.
    pub user_id: u64,
    /// Balance in cents.
    pub balance_cents: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// Balance as a two-decimal string.
    pub fn display_balance(&self) -> String {
        format_cents(self.balance_cents)
    }
}

/// Format cents as `units.cc`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Ledger errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// A wallet already exists for the user.
    #[error("wallet already exists for user {0}")]
    WalletExists(u64),
    /// No wallet for the user.
    #[error("no wallet for user {0}")]
    WalletNotFound(u64),
}

/// In-memory wallet store.
#[derive(Debug, Default)]
pub struct Ledger {
    wallets: RwLock<BTreeMap<u64, Wallet>>,
}

impl Ledger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a zero-balance wallet for `user_id`.
    pub async fn open_wallet(&self, user_id: u64) -> Result<Wallet, LedgerError> {
        let mut wallets = self.wallets.write().await;
        if wallets.contains_key(&user_id) {
            return Err(LedgerError::WalletExists(user_id));
        }
        let wallet = Wallet {
            user_id,
            balance_cents: 0,
            created_at: Utc::now(),
        };
        wallets.insert(user_id, wallet.clone());
        debug!("Opened wallet for user {}", user_id);
        Ok(wallet)
    }

    /// Wallet of `user_id`.
    pub async fn wallet(&self, user_id: u64) -> Result<Wallet, LedgerError> {
        self.wallets
            .read()
            .await
            .get(&user_id)
            .cloned()
            .ok_or(LedgerError::WalletNotFound(user_id))
    }

    /// Balance of `user_id` in cents.
    pub async fn balance(&self, user_id: u64) -> Result<i64, LedgerError> {
        Ok(self.wallet(user_id).await?.balance_cents)
    }

    /// Remove the wallet of `user_id`.
    pub async fn close_wallet(&self, user_id: u64) -> Result<Wallet, LedgerError> {
        self.wallets
            .write()
            .await
            .remove(&user_id)
            .ok_or(LedgerError::WalletNotFound(user_id))
    }

    /// Number of wallets.
    pub async fn len(&self) -> usize {
        self.wallets.read().await.len()
    }

    /// True when no wallet exists.
    pub async fn is_empty(&self) -> bool {
        self.wallets.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_wallet_starts_at_zero() {
        let ledger = Ledger::new();
        let wallet = ledger.open_wallet(1).await.unwrap();
        assert_eq!(wallet.balance_cents, 0);
        assert_eq!(wallet.display_balance(), "0.00");
        assert_eq!(ledger.balance(1).await, Ok(0));
    }

    #[tokio::test]
    async fn test_duplicate_wallet_rejected() {
        let ledger = Ledger::new();
        ledger.open_wallet(1).await.unwrap();
        assert_eq!(ledger.open_wallet(1).await, Err(LedgerError::WalletExists(1)));
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_wallet() {
        let ledger = Ledger::new();
        ledger.open_wallet(2).await.unwrap();
        assert!(ledger.close_wallet(2).await.is_ok());
        assert_eq!(ledger.balance(2).await, Err(LedgerError::WalletNotFound(2)));
        assert!(ledger.is_empty().await);
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(1234), "12.34");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(-250), "-2.50");
    }
}
