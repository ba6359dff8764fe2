//! Append-only wallet ledger entries
//!
//! Every balance-affecting event on an account produces exactly one
//! [`Transaction`]. Entries are built from the [`BalanceChange`] captured when
//! the balance moved, so `balance_after = balance_before ± amount` holds by
//! construction rather than being recomputed later.
use crate::account::BalanceChange;
use crate::error::{MarketError, Result};
use crate::types::{Amount, PaymentMethod, TimeStamp};
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    #[n(0)]
    Credit,
    #[n(1)]
    Debit,
    #[n(2)]
    Info,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxCategory {
    #[n(0)]
    WalletTopup,
    #[n(1)]
    CouponPurchase,
    #[n(2)]
    CouponSale,
    #[n(3)]
    Refund,
    #[n(4)]
    Withdrawal,
    #[n(5)]
    Exchange,
    #[n(6)]
    CouponListing,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Completed,
    #[n(2)]
    Failed,
    #[n(3)]
    Refunded,
}

/// How money entered the platform, for top-ups.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PaymentDetails {
    #[n(0)]
    pub method: PaymentMethod,
    #[n(1)]
    pub reference: Option<String>, // gateway receipt id, once charged
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub kind: TxKind,
    #[n(3)]
    pub category: TxCategory,
    #[n(4)]
    pub amount: Amount,
    #[n(5)]
    pub balance_before: Amount,
    #[n(6)]
    pub balance_after: Amount,
    #[n(7)]
    pub coupon_id: Option<String>,
    #[n(8)]
    pub related_user_id: Option<String>,
    #[n(9)]
    pub payment: Option<PaymentDetails>,
    #[n(10)]
    pub status: TxStatus,
    #[n(11)]
    pub description: String,
    #[n(12)]
    pub created_at: TimeStamp<Utc>,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Credit => "credit",
            TxKind::Debit => "debit",
            TxKind::Info => "info",
        }
    }
}

impl TxCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxCategory::WalletTopup => "wallet_topup",
            TxCategory::CouponPurchase => "coupon_purchase",
            TxCategory::CouponSale => "coupon_sale",
            TxCategory::Refund => "refund",
            TxCategory::Withdrawal => "withdrawal",
            TxCategory::Exchange => "exchange",
            TxCategory::CouponListing => "coupon_listing",
        }
    }
}

impl Transaction {
    fn entry(
        id: String,
        user_id: String,
        kind: TxKind,
        category: TxCategory,
        amount: Amount,
        change: BalanceChange,
        description: String,
    ) -> Self {
        Self {
            id,
            user_id,
            kind,
            category,
            amount,
            balance_before: change.before,
            balance_after: change.after,
            coupon_id: None,
            related_user_id: None,
            payment: None,
            status: TxStatus::Completed,
            description,
            created_at: TimeStamp::new(),
        }
    }

    pub fn credit(
        id: String,
        user_id: String,
        category: TxCategory,
        change: BalanceChange,
        description: impl Into<String>,
    ) -> Self {
        let amount = change.after.saturating_sub(change.before);
        Self::entry(id, user_id, TxKind::Credit, category, amount, change, description.into())
    }

    pub fn debit(
        id: String,
        user_id: String,
        category: TxCategory,
        change: BalanceChange,
        description: impl Into<String>,
    ) -> Self {
        let amount = change.before.saturating_sub(change.after);
        Self::entry(id, user_id, TxKind::Debit, category, amount, change, description.into())
    }

    /// Zero-amount activity record, e.g. a new listing.
    pub fn info(
        id: String,
        user_id: String,
        category: TxCategory,
        balance: Amount,
        description: impl Into<String>,
    ) -> Self {
        let change = BalanceChange {
            before: balance,
            after: balance,
        };
        Self::entry(id, user_id, TxKind::Info, category, 0, change, description.into())
    }

    /// A top-up recorded before the gateway is charged. The id doubles as the
    /// gateway idempotency key; no money moves until [`Transaction::complete`].
    pub fn pending_topup(
        id: String,
        user_id: String,
        amount: Amount,
        balance: Amount,
        method: PaymentMethod,
    ) -> Self {
        let change = BalanceChange {
            before: balance,
            after: balance,
        };
        let mut entry = Self::entry(
            id,
            user_id,
            TxKind::Credit,
            TxCategory::WalletTopup,
            amount,
            change,
            format!("Wallet top-up via {method}"),
        );
        entry.status = TxStatus::Pending;
        entry.payment = Some(PaymentDetails {
            method,
            reference: None,
        });
        entry
    }

    /// Settles a pending entry with the balance move it stands for.
    pub fn complete(&mut self, change: BalanceChange, reference: String) -> Result<()> {
        if self.status != TxStatus::Pending {
            return Err(MarketError::InvalidState(
                "Transaction is not pending".into(),
            ));
        }
        let moved = match self.kind {
            TxKind::Credit => change.after.checked_sub(change.before),
            TxKind::Debit => change.before.checked_sub(change.after),
            TxKind::Info => Some(0),
        };
        if moved != Some(self.amount) {
            return Err(MarketError::validation(
                "Balance change does not match the transaction amount",
            ));
        }

        self.balance_before = change.before;
        self.balance_after = change.after;
        self.status = TxStatus::Completed;
        if let Some(payment) = self.payment.as_mut() {
            payment.reference = Some(reference);
        }
        Ok(())
    }

    pub fn fail(&mut self) -> Result<()> {
        if self.status != TxStatus::Pending {
            return Err(MarketError::InvalidState(
                "Transaction is not pending".into(),
            ));
        }
        self.status = TxStatus::Failed;
        Ok(())
    }

    pub fn with_coupon(mut self, coupon_id: &str) -> Self {
        self.coupon_id = Some(coupon_id.to_string());
        self
    }
    pub fn with_counterparty(mut self, user_id: &str) -> Self {
        self.related_user_id = Some(user_id.to_string());
        self
    }
    pub fn with_timestamp(mut self, at: TimeStamp<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// `balance_after - balance_before` must equal the signed amount for the
    /// kind. Pending and failed entries moved nothing.
    pub fn is_consistent(&self) -> bool {
        if matches!(self.status, TxStatus::Pending | TxStatus::Failed) {
            return self.balance_before == self.balance_after;
        }
        match self.kind {
            TxKind::Credit => self.balance_before.checked_add(self.amount) == Some(self.balance_after),
            TxKind::Debit => self.balance_before.checked_sub(self.amount) == Some(self.balance_after),
            TxKind::Info => self.amount == 0 && self.balance_before == self.balance_after,
        }
    }

    /// CBOR encoding and its sha256 digest; the digest is kept alongside the
    /// per-user index so audits can detect altered entries.
    pub fn seal(&self) -> Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}
