//! Core types and policy for the canvas credits ledger.
//!
//! This crate provides the foundational types shared by the store, the HTTP
//! service and the client SDK:
//!
//! - **Identifiers**: `UserId`, `SubscriptionId`, `PurchaseId`, `LedgerEntryId`
//! - **Balances**: `UserCredits` (purchased credits), `Subscription` (granted credits)
//! - **History**: `CreditPurchase`, `CreditLedgerEntry`
//! - **Policy**: `ConsumptionPlan` (subscription-first deduction order)
//!
//! # Two balance sources
//!
//! A user's spendable balance is the sum of the subscription's
//! `credits_balance` and the purchased `UserCredits::balance`. Consumption
//! always drains the subscription before touching purchased credits, since
//! subscription credits are time-boxed and purchased credits never expire.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod consumption;
pub mod credits;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod purchase;
pub mod subscription;

pub use consumption::{
    AdjustOutcome, BalanceSnapshot, ConsumeOutcome, ConsumeRequest, ConsumptionPlan, Deduction,
    GrantOutcome, PurchaseReceipt,
};
pub use credits::UserCredits;
pub use error::{CreditsError, Result};
pub use ids::{IdError, LedgerEntryId, PurchaseId, SubscriptionId, UserId};
pub use ledger::{BalanceSource, CreditLedgerEntry, EntryType, LedgerMeta};
pub use purchase::{validate_purchase, CreditPurchase, PurchaseStatus};
pub use subscription::{Subscription, SubscriptionStatus};

/// Ledger reason recorded for consumption when the caller gives none.
pub const DEFAULT_CONSUME_REASON: &str = "usage";

/// Ledger reason recorded for credit purchases.
pub const PURCHASE_REASON: &str = "credit-purchase";

/// Ledger reason recorded for periodic subscription grants.
pub const GRANT_REASON: &str = "subscription-grant";

/// Ledger reason recorded when unused subscription credits exceed the rollover limit.
pub const ROLLOVER_EXPIRY_REASON: &str = "rollover-expiry";

/// Ledger reason recorded when a new subscription starts with credits.
pub const SUBSCRIPTION_SEED_REASON: &str = "subscription-seed";

/// Ledger reason recorded when a replaced subscription forfeits its credits.
pub const SUBSCRIPTION_REPLACED_REASON: &str = "subscription-replaced";
