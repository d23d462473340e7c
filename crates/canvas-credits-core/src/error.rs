//! Error types for the credits domain.

use crate::ids::IdError;

/// Result type for credits domain operations.
pub type Result<T> = std::result::Result<T, CreditsError>;

/// Errors raised by domain-level validation and balance arithmetic.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CreditsError {
    /// The requested amount is not a positive number of credits.
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    /// The purchase price is negative or not a finite number.
    #[error("invalid price: {0}")]
    InvalidPrice(f64),

    /// The total available balance is below the requested amount.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Total balance available.
        balance: i64,
        /// Amount requested.
        required: i64,
    },

    /// A stored balance is negative, which the ledger never produces.
    #[error("corrupt balance: {0}")]
    CorruptBalance(i64),

    /// Arithmetic on balances overflowed.
    #[error("balance overflow")]
    Overflow,

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
