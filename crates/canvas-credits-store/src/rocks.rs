//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait
//! on top of a pessimistic `TransactionDB`. Compound operations take row
//! locks with `get_for_update_cf` in a fixed order:
//!
//! 1. the idempotency key (locked even when absent, which reserves it)
//! 2. the user's `user_credits` row
//! 3. the user's `subscriptions` row
//!
//! All writes of one operation commit together or not at all.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, MultiThreaded, Options,
    Transaction, TransactionDB, TransactionDBOptions,
};
use tracing::warn;

use canvas_credits_core::{
    validate_purchase, AdjustOutcome, BalanceSnapshot, ConsumeOutcome, ConsumeRequest,
    ConsumptionPlan, CreditLedgerEntry, CreditPurchase, CreditsError, GrantOutcome,
    LedgerEntryId, PurchaseId, PurchaseReceipt, Subscription, SubscriptionId, UserCredits, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// How long a transaction waits for a row lock before giving up.
const LOCK_TIMEOUT_MS: i64 = 2_000;

type Txn<'db> = Transaction<'db, TransactionDB<MultiThreaded>>;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<TransactionDB<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(LOCK_TIMEOUT_MS);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = TransactionDB::open_cf_descriptors(&opts, &txn_opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read a record outside any transaction.
    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Read a record and hold an exclusive lock on its key until the
    /// transaction ends. Absent keys are locked too.
    fn get_locked<T: serde::de::DeserializeOwned>(
        &self,
        txn: &Txn<'_>,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        txn.get_for_update_cf(&cf, key, true)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put<T: serde::Serialize>(
        &self,
        txn: &Txn<'_>,
        cf_name: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let cf = self.cf(cf_name)?;
        txn.put_cf(&cf, key, Self::serialize(value)?)?;
        Ok(())
    }

    /// Lock an idempotency key and return the ledger entry it points to.
    fn lock_idempotency_key(&self, txn: &Txn<'_>, key: &str) -> Result<Option<LedgerEntryId>> {
        let cf = self.cf(cf::LEDGER_BY_IDEMPOTENCY_KEY)?;
        let Some(value) = txn.get_for_update_cf(&cf, keys::idempotency_key(key), true)? else {
            return Ok(None);
        };
        let bytes: [u8; 16] = value.as_slice().try_into().map_err(|_| {
            StoreError::Serialization(format!("malformed idempotency index value for {key}"))
        })?;
        Ok(Some(LedgerEntryId::from_bytes(bytes)))
    }

    /// Lock the user's purchased balance row, returning a fresh record if absent.
    ///
    /// The boolean is `true` when the record does not exist yet.
    fn lock_user_credits(&self, txn: &Txn<'_>, user_id: &UserId) -> Result<(UserCredits, bool)> {
        Ok(
            match self.get_locked(txn, cf::USER_CREDITS, &keys::user_key(user_id))? {
                Some(credits) => (credits, false),
                None => (UserCredits::new(user_id.clone()), true),
            },
        )
    }

    fn put_user_credits(&self, txn: &Txn<'_>, credits: &UserCredits) -> Result<()> {
        self.put(txn, cf::USER_CREDITS, &keys::user_key(&credits.user_id), credits)
    }

    fn put_subscription_record(&self, txn: &Txn<'_>, subscription: &Subscription) -> Result<()> {
        let user_key = keys::user_key(&subscription.user_id);
        self.put(txn, cf::SUBSCRIPTIONS, &user_key, subscription)?;

        let cf_by_id = self.cf(cf::SUBSCRIPTIONS_BY_ID)?;
        txn.put_cf(
            &cf_by_id,
            keys::subscription_id_key(&subscription.id),
            user_key,
        )?;
        Ok(())
    }

    /// Append a ledger entry and all of its index entries.
    fn put_ledger_entry(&self, txn: &Txn<'_>, entry: &CreditLedgerEntry) -> Result<()> {
        let id_bytes = entry.id.to_bytes();
        self.put(txn, cf::LEDGER, &keys::ledger_key(&entry.id), entry)?;

        let cf_by_user = self.cf(cf::LEDGER_BY_USER)?;
        txn.put_cf(
            &cf_by_user,
            keys::owner_index_key(entry.user_id.as_ref(), id_bytes),
            b"",
        )?;

        if let Some(subscription_id) = &entry.subscription_id {
            let cf_by_sub = self.cf(cf::LEDGER_BY_SUBSCRIPTION)?;
            txn.put_cf(
                &cf_by_sub,
                keys::owner_index_key(subscription_id.as_ref(), id_bytes),
                b"",
            )?;
        }

        if let Some(key) = &entry.idempotency_key {
            let cf_by_key = self.cf(cf::LEDGER_BY_IDEMPOTENCY_KEY)?;
            txn.put_cf(&cf_by_key, keys::idempotency_key(key), id_bytes)?;
        }

        Ok(())
    }

    fn put_purchase(&self, txn: &Txn<'_>, purchase: &CreditPurchase) -> Result<()> {
        self.put(txn, cf::PURCHASES, &keys::purchase_key(&purchase.id), purchase)?;

        let cf_by_user = self.cf(cf::PURCHASES_BY_USER)?;
        txn.put_cf(
            &cf_by_user,
            keys::owner_index_key(purchase.user_id.as_ref(), purchase.id.to_bytes()),
            b"",
        )?;
        Ok(())
    }

    /// Walk an owner index newest first and load the referenced records.
    fn list_indexed<T: serde::de::DeserializeOwned>(
        &self,
        index_cf: &str,
        record_cf: &str,
        owner: &[u8],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<T>> {
        let cf_index = self.cf(index_cf)?;
        let prefix = keys::owner_prefix(owner);
        let upper = keys::owner_index_key(owner, [0xFF; 16]);

        let iter = self
            .db
            .iterator_cf(&cf_index, IteratorMode::From(&upper, Direction::Reverse));

        let mut records = Vec::new();
        let mut skipped = 0;
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            if records.len() >= limit {
                break;
            }

            let Some(record_id) = keys::record_id_from_index_key(&key) else {
                continue;
            };
            if let Some(record) = self.get(record_cf, &record_id)? {
                records.push(record);
            }
        }

        Ok(records)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Balances
    // =========================================================================

    fn get_user_credits(&self, user_id: &UserId) -> Result<Option<UserCredits>> {
        self.get(cf::USER_CREDITS, &keys::user_key(user_id))
    }

    fn get_balance(&self, user_id: &UserId) -> Result<BalanceSnapshot> {
        let user_key = keys::user_key(user_id);
        let cf_credits = self.cf(cf::USER_CREDITS)?;
        let cf_subscriptions = self.cf(cf::SUBSCRIPTIONS)?;

        // Both rows come from one snapshot so a concurrent consumption is
        // seen entirely or not at all.
        let snapshot = self.db.snapshot();
        let purchased = snapshot
            .get_cf(&cf_credits, &user_key)?
            .map(|data| Self::deserialize::<UserCredits>(&data))
            .transpose()?
            .map_or(0, |c| c.balance);
        let subscription = snapshot
            .get_cf(&cf_subscriptions, &user_key)?
            .map(|data| Self::deserialize::<Subscription>(&data))
            .transpose()?
            .map_or(0, |s| s.credits_balance);

        Ok(BalanceSnapshot {
            subscription,
            purchased,
        })
    }

    fn get_or_create_user_credits(&self, user_id: &UserId) -> Result<UserCredits> {
        let txn = self.db.transaction();
        let (credits, created) = self.lock_user_credits(&txn, user_id)?;
        if created {
            self.put_user_credits(&txn, &credits)?;
            txn.commit()?;
        }
        Ok(credits)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        self.get(cf::SUBSCRIPTIONS, &keys::user_key(user_id))
    }

    fn get_subscription_by_id(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<Subscription>> {
        let cf_by_id = self.cf(cf::SUBSCRIPTIONS_BY_ID)?;
        let Some(user_key) = self
            .db
            .get_cf(&cf_by_id, keys::subscription_id_key(subscription_id))?
        else {
            return Ok(None);
        };

        // The index may point at a user whose subscription was since replaced.
        Ok(self
            .get::<Subscription>(cf::SUBSCRIPTIONS, &user_key)?
            .filter(|s| &s.id == subscription_id))
    }

    fn put_subscription(&self, subscription: &Subscription) -> Result<Subscription> {
        for value in [
            subscription.credits_balance,
            subscription.credits_grant_per_period,
            subscription.credits_rollover_limit,
        ] {
            if value < 0 {
                return Err(CreditsError::InvalidAmount(value).into());
            }
        }

        let txn = self.db.transaction();
        let existing: Option<Subscription> = self.get_locked(
            &txn,
            cf::SUBSCRIPTIONS,
            &keys::user_key(&subscription.user_id),
        )?;

        let mut record = subscription.clone();
        record.updated_at = Utc::now();

        let seeded = match existing {
            Some(existing) if existing.id == record.id => {
                record.credits_balance = existing.credits_balance;
                record.last_grant_cursor = existing.last_grant_cursor;
                record.created_at = existing.created_at;
                false
            }
            Some(existing) => {
                // The replaced subscription's credits do not carry over.
                if existing.credits_balance > 0 {
                    let entry = CreditLedgerEntry::subscription_forfeit(&existing);
                    self.put_ledger_entry(&txn, &entry)?;
                }
                let cf_by_id = self.cf(cf::SUBSCRIPTIONS_BY_ID)?;
                txn.delete_cf(&cf_by_id, keys::subscription_id_key(&existing.id))?;
                true
            }
            None => true,
        };

        if seeded && record.credits_balance > 0 {
            self.put_ledger_entry(&txn, &CreditLedgerEntry::subscription_seed(&record))?;
        }

        self.put_subscription_record(&txn, &record)?;
        txn.commit()?;

        Ok(record)
    }

    // =========================================================================
    // History
    // =========================================================================

    fn get_ledger_entry(&self, entry_id: &LedgerEntryId) -> Result<Option<CreditLedgerEntry>> {
        self.get(cf::LEDGER, &keys::ledger_key(entry_id))
    }

    fn find_ledger_entry_by_key(&self, key: &str) -> Result<Option<CreditLedgerEntry>> {
        let cf_by_key = self.cf(cf::LEDGER_BY_IDEMPOTENCY_KEY)?;
        let Some(value) = self.db.get_cf(&cf_by_key, keys::idempotency_key(key))? else {
            return Ok(None);
        };
        self.get(cf::LEDGER, &value)
    }

    fn list_ledger_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditLedgerEntry>> {
        self.list_indexed(
            cf::LEDGER_BY_USER,
            cf::LEDGER,
            user_id.as_ref(),
            limit,
            offset,
        )
    }

    fn list_ledger_by_subscription(
        &self,
        subscription_id: &SubscriptionId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditLedgerEntry>> {
        self.list_indexed(
            cf::LEDGER_BY_SUBSCRIPTION,
            cf::LEDGER,
            subscription_id.as_ref(),
            limit,
            offset,
        )
    }

    fn get_purchase(&self, purchase_id: &PurchaseId) -> Result<Option<CreditPurchase>> {
        self.get(cf::PURCHASES, &keys::purchase_key(purchase_id))
    }

    fn list_purchases_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditPurchase>> {
        self.list_indexed(
            cf::PURCHASES_BY_USER,
            cf::PURCHASES,
            user_id.as_ref(),
            limit,
            offset,
        )
    }

    // =========================================================================
    // Compound Operations
    // =========================================================================

    fn purchase_credits(
        &self,
        purchase: &CreditPurchase,
        dedupe: bool,
    ) -> Result<PurchaseReceipt> {
        validate_purchase(purchase.amount, purchase.price_usd)?;

        let txn = self.db.transaction();

        let mut ledger_key = purchase.external_ref.clone();
        if let Some(external_ref) = &purchase.external_ref {
            if let Some(entry_id) = self.lock_idempotency_key(&txn, external_ref)? {
                let earlier = match self.get_ledger_entry(&entry_id)? {
                    Some(entry) => match entry.meta.purchase_id {
                        Some(id) => self.get_purchase(&id)?,
                        None => None,
                    },
                    None => None,
                };

                if let (true, Some(earlier)) = (dedupe, earlier) {
                    let balance = self
                        .get_user_credits(&earlier.user_id)?
                        .map_or(0, |c| c.balance);
                    return Ok(PurchaseReceipt {
                        purchase: earlier,
                        balance,
                        duplicate: true,
                    });
                }

                warn!(
                    user_id = %purchase.user_id,
                    external_ref = %external_ref,
                    "External reference already recorded, crediting purchase again"
                );
                ledger_key = None;
            }
        }

        let (mut credits, _) = self.lock_user_credits(&txn, &purchase.user_id)?;
        let (prev, next) = credits.apply_delta(purchase.amount)?;

        let entry = CreditLedgerEntry::purchase(purchase, prev, next).with_idempotency_key(ledger_key);

        self.put_purchase(&txn, purchase)?;
        self.put_user_credits(&txn, &credits)?;
        self.put_ledger_entry(&txn, &entry)?;
        txn.commit()?;

        Ok(PurchaseReceipt {
            purchase: purchase.clone(),
            balance: next,
            duplicate: false,
        })
    }

    fn consume_credits(&self, request: &ConsumeRequest) -> Result<ConsumeOutcome> {
        if request.amount <= 0 {
            return Ok(ConsumeOutcome::InvalidAmount);
        }

        let txn = self.db.transaction();

        if let Some(key) = &request.idempotency_key {
            if self.lock_idempotency_key(&txn, key)?.is_some() {
                return Ok(ConsumeOutcome::Duplicate);
            }
        }

        let (mut credits, created) = self.lock_user_credits(&txn, &request.user_id)?;
        let mut subscription: Option<Subscription> = self.get_locked(
            &txn,
            cf::SUBSCRIPTIONS,
            &keys::user_key(&request.user_id),
        )?;
        let subscription_balance = subscription.as_ref().map_or(0, |s| s.credits_balance);

        let plan = match ConsumptionPlan::compute(
            subscription_balance,
            credits.balance,
            request.amount,
        ) {
            Ok(plan) => plan,
            Err(CreditsError::InsufficientCredits { balance, .. }) => {
                // The record created by the lookup still persists.
                if created {
                    self.put_user_credits(&txn, &credits)?;
                    txn.commit()?;
                }
                return Ok(ConsumeOutcome::Insufficient { balance });
            }
            Err(err) => return Err(err.into()),
        };

        let reason = request.reason_or_default();
        let mut key = request.idempotency_key.clone();
        let now = Utc::now();

        if let (Some(deduction), Some(sub)) = (plan.subscription, subscription.as_mut()) {
            sub.credits_balance = deduction.next;
            sub.updated_at = now;
            self.put_subscription_record(&txn, sub)?;

            let entry = CreditLedgerEntry::consume(request.user_id.clone(), &deduction, reason)
                .with_subscription(sub.id.clone())
                .with_idempotency_key(key.take());
            self.put_ledger_entry(&txn, &entry)?;
        }

        if let Some(deduction) = plan.purchased {
            credits.balance = deduction.next;
            credits.last_updated = now;

            let entry = CreditLedgerEntry::consume(request.user_id.clone(), &deduction, reason);
            let entry = match key.take() {
                Some(key) => entry.with_idempotency_key(Some(key)),
                None => entry.with_related_key(request.idempotency_key.clone()),
            };
            self.put_ledger_entry(&txn, &entry)?;
        }

        if created || plan.purchased.is_some() {
            self.put_user_credits(&txn, &credits)?;
        }

        txn.commit()?;

        Ok(ConsumeOutcome::from(&plan))
    }

    fn grant_subscription_credits(
        &self,
        user_id: &UserId,
        period_cursor: &str,
    ) -> Result<GrantOutcome> {
        let not_found = || StoreError::NotFound {
            entity: "subscription",
            id: user_id.to_string(),
        };
        let user_key = keys::user_key(user_id);

        // The grant key names the subscription, so peek at it before locking.
        let current: Subscription = self.get(cf::SUBSCRIPTIONS, &user_key)?.ok_or_else(not_found)?;
        let grant_key = current.grant_key(period_cursor);

        let txn = self.db.transaction();
        let key_used = self.lock_idempotency_key(&txn, &grant_key)?.is_some();
        let mut sub: Subscription = self
            .get_locked(&txn, cf::SUBSCRIPTIONS, &user_key)?
            .ok_or_else(not_found)?;

        if sub.id != current.id {
            return Err(StoreError::Conflict(format!(
                "subscription for {user_id} replaced during grant"
            )));
        }
        if key_used || sub.was_granted(period_cursor) {
            return Ok(GrantOutcome::AlreadyGranted {
                balance: sub.credits_balance,
            });
        }

        let prev = sub.credits_balance;
        let (carried, expired) = sub.rollover();
        if expired > 0 {
            let entry = CreditLedgerEntry::rollover_expiry(&sub, expired, prev);
            self.put_ledger_entry(&txn, &entry)?;
        }

        let granted = sub.credits_grant_per_period.max(0);
        let next = carried.checked_add(granted).ok_or(CreditsError::Overflow)?;

        sub.credits_balance = next;
        sub.last_grant_cursor = Some(period_cursor.to_string());
        sub.updated_at = Utc::now();
        self.put_subscription_record(&txn, &sub)?;

        // A zero grant moves nothing; the cursor alone marks the period done.
        if granted > 0 {
            let entry = CreditLedgerEntry::grant(&sub, granted, carried, next)
                .with_idempotency_key(Some(grant_key));
            self.put_ledger_entry(&txn, &entry)?;
        }
        txn.commit()?;

        Ok(GrantOutcome::Granted {
            balance: next,
            granted,
            expired,
        })
    }

    fn adjust_credits(&self, user_id: &UserId, delta: i64, reason: &str) -> Result<AdjustOutcome> {
        if delta == 0 {
            return Err(CreditsError::InvalidAmount(delta).into());
        }

        let txn = self.db.transaction();
        let (mut credits, _) = self.lock_user_credits(&txn, user_id)?;
        let (prev, next) = credits.apply_delta(delta)?;

        self.put_user_credits(&txn, &credits)?;
        self.put_ledger_entry(
            &txn,
            &CreditLedgerEntry::adjust(user_id.clone(), prev, next, reason),
        )?;
        txn.commit()?;

        Ok(AdjustOutcome { prev, next })
    }
}
