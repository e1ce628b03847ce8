//! Accounts and Wallets
//!
//! Independent of the round engine; the two share only the process.
//!
//! ## Module Structure
//!
//! - `token`: Session token issue and verification
//! - `password`: bcrypt password hashes
//! - `ledger`: Per-user wallet balances
//! - `service`: Register, login and profile lookup

pub mod ledger;
pub mod password;
pub mod service;
pub mod token;

pub use ledger::{Ledger, LedgerError, Wallet};
pub use password::{HashError, PasswordHash};
pub use service::{AccountError, AccountService, AuthSession, UserProfile};
pub use token::{AccountConfig, TokenClaims, TokenError, TokenIssuer};
