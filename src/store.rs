//! sled persistence: one tree per record type plus per-user index trees.
//!
//! Records are CBOR encoded. Business operations that touch more than one
//! record go through sled multi-tree transactions; the `tx_*` helpers here
//! make the encoding usable inside those closures.
use crate::account::Account;
use crate::coupon::Coupon;
use crate::error::{MarketError, Result};
use crate::ledger::Transaction;
use crate::notify::Notification;
use crate::types::TimeStamp;
use chrono::Utc;
use sled::Tree;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use std::sync::Arc;

/// Index entry for a user's ledger history. The digest is the sha256 of the
/// entry's CBOR at the time it was appended.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LedgerRef {
    #[n(0)]
    pub txn_id: String,
    #[n(1)]
    pub digest: String,
}

#[derive(Clone)]
pub struct MarketStore {
    instance: Arc<sled::Db>,
    pub(crate) accounts: Tree,
    pub(crate) account_emails: Tree,
    pub(crate) coupons: Tree,
    pub(crate) transactions: Tree,
    pub(crate) user_transactions: Tree,
    pub(crate) notifications: Tree,
    pub(crate) user_notifications: Tree,
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    Ok(minicbor::to_vec(value)?)
}

pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

/// `user_id / created_at nanos (big endian) / record id`, so a prefix scan
/// walks one user's records in time order.
pub(crate) fn index_key(user_id: &str, at: &TimeStamp<Utc>, id: &str) -> Vec<u8> {
    let mut key = user_prefix(user_id);
    key.extend_from_slice(&at.nanos().to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

fn user_prefix(user_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_id.len() + 32);
    key.extend_from_slice(user_id.as_bytes());
    key.push(b'/');
    key
}

pub(crate) fn abort<T>(err: MarketError) -> ConflictableTransactionResult<T, MarketError> {
    Err(ConflictableTransactionError::Abort(err))
}

/// Lifts a domain result into a transaction closure, aborting on error.
pub(crate) fn tx_try<T>(res: Result<T>) -> ConflictableTransactionResult<T, MarketError> {
    res.map_err(ConflictableTransactionError::Abort)
}

pub(crate) fn tx_get<T>(
    tree: &TransactionalTree,
    key: &[u8],
) -> ConflictableTransactionResult<Option<T>, MarketError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key)? {
        Some(bytes) => decode(&bytes)
            .map(Some)
            .map_err(ConflictableTransactionError::Abort),
        None => Ok(None),
    }
}

pub(crate) fn tx_put<T: minicbor::Encode<()>>(
    tree: &TransactionalTree,
    key: &[u8],
    value: &T,
) -> ConflictableTransactionResult<(), MarketError> {
    let bytes = encode(value).map_err(ConflictableTransactionError::Abort)?;
    tree.insert(key, bytes)?;
    Ok(())
}

/// Appends a ledger entry and its per-user index record.
pub(crate) fn tx_append_ledger(
    transactions: &TransactionalTree,
    index: &TransactionalTree,
    entry: &Transaction,
) -> ConflictableTransactionResult<(), MarketError> {
    let (digest, cbor) = entry.seal().map_err(ConflictableTransactionError::Abort)?;
    transactions.insert(entry.id.as_bytes(), cbor)?;

    let pointer = LedgerRef {
        txn_id: entry.id.clone(),
        digest,
    };
    tx_put(
        index,
        &index_key(&entry.user_id, &entry.created_at, &entry.id),
        &pointer,
    )
}

/// Flattens sled's transaction error back into the domain error.
pub(crate) fn unwrap_txn<T>(res: std::result::Result<T, TransactionError<MarketError>>) -> Result<T> {
    res.map_err(|e| match e {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => MarketError::Storage(err),
    })
}

impl MarketStore {
    pub fn open(instance: Arc<sled::Db>) -> Result<Self> {
        Ok(Self {
            accounts: instance.open_tree("accounts")?,
            account_emails: instance.open_tree("account_emails")?,
            coupons: instance.open_tree("coupons")?,
            transactions: instance.open_tree("transactions")?,
            user_transactions: instance.open_tree("user_transactions")?,
            notifications: instance.open_tree("notifications")?,
            user_notifications: instance.open_tree("user_notifications")?,
            instance,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.instance.flush()?;
        Ok(())
    }

    pub fn load_account(&self, id: &str) -> Result<Option<Account>> {
        self.accounts
            .get(id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn account(&self, id: &str) -> Result<Account> {
        self.load_account(id)?
            .ok_or(MarketError::NotFound("Account"))
    }

    pub fn load_coupon(&self, id: &str) -> Result<Option<Coupon>> {
        self.coupons
            .get(id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Loads a coupon and persists lazy expiry if it is due.
    ///
    /// The write is a compare-and-swap against the bytes just read, so a sale
    /// that lands in between is never overwritten; in that case the fresh
    /// record is returned instead.
    pub fn load_coupon_fresh(&self, id: &str, now: &TimeStamp<Utc>) -> Result<Option<Coupon>> {
        let Some(raw) = self.coupons.get(id.as_bytes())? else {
            return Ok(None);
        };
        let mut coupon: Coupon = decode(&raw)?;

        if coupon.refresh_expiry(now) {
            let updated = encode(&coupon)?;
            match self
                .coupons
                .compare_and_swap(id.as_bytes(), Some(raw), Some(updated))?
            {
                Ok(()) => {
                    tracing::debug!(coupon_id = %id, "coupon flagged as expired");
                }
                Err(_) => return self.load_coupon(id),
            }
        }

        Ok(Some(coupon))
    }

    pub fn all_coupons(&self) -> Result<Vec<Coupon>> {
        self.coupons
            .iter()
            .values()
            .map(|bytes| decode(&bytes?))
            .collect()
    }

    pub fn load_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        self.transactions
            .get(id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Index records of a user's ledger, newest first.
    pub fn ledger_refs(&self, user_id: &str) -> Result<Vec<LedgerRef>> {
        self.user_transactions
            .scan_prefix(user_prefix(user_id))
            .values()
            .rev()
            .map(|bytes| decode(&bytes?))
            .collect()
    }

    /// A user's ledger entries, newest first.
    pub fn user_transactions(&self, user_id: &str) -> Result<Vec<Transaction>> {
        self.ledger_refs(user_id)?
            .into_iter()
            .map(|pointer| {
                self.load_transaction(&pointer.txn_id)?
                    .ok_or(MarketError::NotFound("Transaction"))
            })
            .collect()
    }

    pub fn raw_transaction(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.transactions.get(id.as_bytes())?.map(|v| v.to_vec()))
    }

    pub fn save_notification(&self, note: &Notification) -> Result<()> {
        self.notifications
            .insert(note.id.as_bytes(), encode(note)?)?;
        self.user_notifications.insert(
            index_key(&note.user_id, &note.created_at, &note.id),
            note.id.as_bytes(),
        )?;
        Ok(())
    }

    pub fn load_notification(&self, id: &str) -> Result<Option<Notification>> {
        self.notifications
            .get(id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// A user's notifications, newest first.
    pub fn user_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        self.user_notifications
            .scan_prefix(user_prefix(user_id))
            .values()
            .rev()
            .filter_map(|id| match id {
                Ok(id) => match self.notifications.get(&id) {
                    Ok(Some(bytes)) => Some(decode(&bytes)),
                    Ok(None) => None,
                    Err(e) => Some(Err(e.into())),
                },
                Err(e) => Some(Err(e.into())),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::CouponStatus;
    use crate::coupon::CouponDraft;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, MarketStore) {
        let dir = tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("store.db")).unwrap());
        (dir, MarketStore::open(db).unwrap())
    }

    #[test]
    fn index_keys_sort_by_time() {
        let early = TimeStamp::new_with(2024, 1, 1, 0, 0, 0).unwrap();
        let late = TimeStamp::new_with(2025, 1, 1, 0, 0, 0).unwrap();

        assert!(index_key("user_a", &early, "zzz") < index_key("user_a", &late, "aaa"));
    }

    #[test]
    fn lazy_expiry_is_persisted() {
        let (_dir, store) = store();

        let coupon = CouponDraft::new()
            .set_title("Movie ticket")
            .set_description("Any show before 6pm")
            .set_category("entertainment")
            .set_selling_price(150)
            .set_expiry_date(TimeStamp::days_from_now(1))
            .validate_and_finalise(
                "coupon_1".into(),
                "user_s",
                "https://img".into(),
                CouponStatus::Active,
                TimeStamp::new(),
            )
            .unwrap();
        store
            .coupons
            .insert(coupon.id.as_bytes(), encode(&coupon).unwrap())
            .unwrap();

        let later = TimeStamp::days_from_now(2);
        let fresh = store.load_coupon_fresh("coupon_1", &later).unwrap().unwrap();
        assert_eq!(fresh.status, CouponStatus::Expired);

        let stored = store.load_coupon("coupon_1").unwrap().unwrap();
        assert_eq!(stored.status, CouponStatus::Expired);
    }
}
