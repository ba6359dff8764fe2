//! Service layer API for wallet and coupon marketplace operations
//!
//! Every mutating operation checks its preconditions first and then applies
//! all of its record changes in one sled transaction. Notifications and email
//! run after the commit and never fail the operation.
use crate::account::{Account, BalanceChange};
use crate::catalog::{Catalog, Category};
use crate::config::MarketConfig;
use crate::coupon::{Coupon, CouponDraft, CouponPatch};
use crate::error::{MarketError, Result};
use crate::external::{
    ImageStore, NoTextRecognizer, PaymentGateway, PlaceholderImageStore, SimulatedGateway,
    TextRecognizer,
};
use crate::extract::{ExtractedFields, Extractor, TextAssessment};
use crate::ledger::{Transaction, TxCategory, TxKind, TxStatus};
use crate::lifecycle::CouponStatus;
use crate::notify::{
    Email, LogMailer, Mailer, Notification, NotificationKind, Notifier, Related, SledNotifier,
    email,
};
use crate::store::{
    MarketStore, abort, decode, tx_append_ledger, tx_get, tx_put, tx_try, unwrap_txn,
};
use crate::types::{Amount, Page, Paginated, PaymentMethod, TimeStamp};
use crate::utils::{call_with_timeout, new_id};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseReceipt {
    pub transaction: Transaction, // buyer side
    pub coupon: Coupon,
    pub new_balance: Amount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopUpReceipt {
    pub transaction: Transaction,
    pub new_balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Review {
    Approve,
    Reject(String),
}

#[derive(Debug, Clone, Default)]
pub struct CouponFilter {
    /// Defaults to `active` when unset.
    pub status: Option<CouponStatus>,
    pub category: Option<String>,
    pub min_price: Option<Amount>,
    pub max_price: Option<Amount>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionFilter {
    pub kind: Option<TxKind>,
    pub category: Option<TxCategory>,
}

/// Result of re-checking a user's ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerAudit {
    pub entries: usize,
    /// Entries whose before/after balances disagree with their amount.
    pub inconsistent: Vec<String>,
    /// Entries whose stored bytes no longer match the digest taken at append time.
    pub tampered: Vec<String>,
}

impl LedgerAudit {
    pub fn is_clean(&self) -> bool {
        self.inconsistent.is_empty() && self.tampered.is_empty()
    }
}

struct Settlement {
    buyer_entry: Transaction,
    coupon: Coupon,
    buyer_balance: Amount,
    seller: Account,
}

pub struct MarketService {
    store: MarketStore,
    config: MarketConfig,
    catalog: Catalog,
    extractor: Extractor,
    placeholder: PlaceholderImageStore,
    notifier: Arc<dyn Notifier>,
    mailer: Arc<dyn Mailer>,
    images: Arc<dyn ImageStore>,
    recognizer: Arc<dyn TextRecognizer>,
    gateway: Arc<dyn PaymentGateway>,
}

// A zero price moves no money but still leaves a ledger entry behind.
fn move_funds(account: &mut Account, amount: Amount, debit: bool) -> Result<BalanceChange> {
    if amount == 0 {
        let balance = account.balance();
        return Ok(BalanceChange {
            before: balance,
            after: balance,
        });
    }
    if debit {
        account.debit(amount)
    } else {
        account.credit(amount)
    }
}

impl MarketService {
    /// Service with the default collaborators: sled-backed notification feed,
    /// logging mailer, placeholder images, no OCR and a simulated gateway.
    pub fn new(instance: Arc<sled::Db>, config: MarketConfig) -> Result<Self> {
        let store = MarketStore::open(instance)?;
        let placeholder = PlaceholderImageStore::new(config.placeholder_image_url.clone());

        Ok(Self {
            notifier: Arc::new(SledNotifier::new(store.clone())),
            mailer: Arc::new(LogMailer::new(config.mail_from.clone())),
            images: Arc::new(placeholder.clone()),
            recognizer: Arc::new(NoTextRecognizer),
            gateway: Arc::new(SimulatedGateway),
            catalog: Catalog::default(),
            extractor: Extractor::new()?,
            placeholder,
            store,
            config,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }
    pub fn with_image_store(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.images = images;
        self
    }
    pub fn with_text_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = recognizer;
        self
    }
    pub fn with_payment_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = gateway;
        self
    }
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn store(&self) -> &MarketStore {
        &self.store
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn categories(&self) -> &[Category] {
        self.catalog.all()
    }

    /// Create a zero-balance account. Emails are unique, case-insensitively.
    pub fn register_user(&self, name: &str, email: &str) -> Result<Account> {
        let account = Account::open(new_id("user_")?, name, email)?;

        let trees = (&self.store.accounts, &self.store.account_emails);
        unwrap_txn(trees.transaction(
            |(accounts, emails)| -> ConflictableTransactionResult<(), MarketError> {
                if emails.get(account.email.as_bytes())?.is_some() {
                    return abort(MarketError::validation("Email is already registered"));
                }
                emails.insert(account.email.as_bytes(), account.id.as_bytes())?;
                tx_put(accounts, account.id.as_bytes(), &account)
            },
        ))?;

        tracing::info!(user_id = %account.id, "account registered");
        self.email_best_effort(email::welcome(&account.email, &account.name));

        Ok(account)
    }

    pub fn account(&self, user_id: &str) -> Result<Account> {
        self.store.account(user_id)
    }

    pub fn balance(&self, user_id: &str) -> Result<Amount> {
        Ok(self.store.account(user_id)?.balance())
    }

    /// Top up a wallet from an external payment method.
    ///
    /// A `pending` ledger entry is written before the gateway is charged, and
    /// its id is passed along as the idempotency key. A successful charge
    /// completes that entry together with the credit. A declined charge marks
    /// it `failed`. A charge with no answer in time stays `pending`; it may
    /// still go through, so it is left for [`MarketService::complete_topup`]
    /// or [`MarketService::fail_topup`] once the gateway has been asked.
    pub fn add_money(
        &self,
        user_id: &str,
        amount: Amount,
        method: PaymentMethod,
    ) -> Result<TopUpReceipt> {
        let (min, max) = (self.config.topup_min, self.config.topup_max);
        if amount < min || amount > max {
            return Err(MarketError::OutOfRange {
                field: "Top-up amount",
                value: amount,
                min,
                max,
            });
        }

        let attempt_id = self.open_topup(user_id, amount, method)?;

        let gateway = self.gateway.clone();
        let payer = user_id.to_string();
        let attempt = attempt_id.clone();
        let charged = call_with_timeout("payments", self.config.external_timeout, move || {
            gateway.charge(&attempt, &payer, amount, method)
        });

        match charged {
            Ok(reference) => self.complete_topup(user_id, &attempt_id, &reference),
            Err(e @ MarketError::DependencyUnavailable { .. }) => {
                tracing::warn!(%user_id, %attempt_id, amount, error = %e, "top-up outcome unknown, left pending");
                Err(MarketError::PaymentFailed(format!(
                    "{e}; top-up {attempt_id} is pending confirmation"
                )))
            }
            Err(e) => {
                if let Err(mark) = self.fail_topup(user_id, &attempt_id) {
                    tracing::error!(%attempt_id, error = %mark, "could not mark top-up as failed");
                }
                Err(match e {
                    MarketError::PaymentFailed(_) => e,
                    other => MarketError::PaymentFailed(other.to_string()),
                })
            }
        }
    }

    fn open_topup(&self, user_id: &str, amount: Amount, method: PaymentMethod) -> Result<String> {
        let attempt_id = new_id("txn_")?;
        let now = TimeStamp::new();

        let trees = (
            &self.store.accounts,
            &self.store.transactions,
            &self.store.user_transactions,
        );
        unwrap_txn(trees.transaction(
            |(accounts, txs, index)| -> ConflictableTransactionResult<(), MarketError> {
                let Some(account) = tx_get::<Account>(accounts, user_id.as_bytes())? else {
                    return abort(MarketError::NotFound("Account"));
                };
                let entry = Transaction::pending_topup(
                    attempt_id.clone(),
                    user_id.to_string(),
                    amount,
                    account.balance(),
                    method,
                )
                .with_timestamp(now.clone());

                tx_append_ledger(txs, index, &entry)
            },
        ))?;

        tracing::debug!(%user_id, %attempt_id, amount, %method, "top-up pending");
        Ok(attempt_id)
    }

    /// Credit the wallet for a pending top-up the gateway has confirmed.
    /// The entry is settled in the same transaction as the credit, so a
    /// top-up can only ever be credited once.
    pub fn complete_topup(
        &self,
        user_id: &str,
        txn_id: &str,
        reference: &str,
    ) -> Result<TopUpReceipt> {
        let trees = (
            &self.store.accounts,
            &self.store.transactions,
            &self.store.user_transactions,
        );
        let (entry, new_balance) = unwrap_txn(trees.transaction(
            |(accounts, txs, index)| -> ConflictableTransactionResult<(Transaction, Amount), MarketError> {
                let mut entry = Self::pending_entry(txs, user_id, txn_id)?;
                let Some(mut account) = tx_get::<Account>(accounts, user_id.as_bytes())? else {
                    return abort(MarketError::NotFound("Account"));
                };

                let change = tx_try(account.credit(entry.amount))?;
                tx_try(entry.complete(change, reference.to_string()))?;

                tx_put(accounts, user_id.as_bytes(), &account)?;
                tx_append_ledger(txs, index, &entry)?;

                Ok((entry, change.after))
            },
        ))?;

        tracing::info!(%user_id, amount = entry.amount, txn_id = %entry.id, "wallet topped up");

        self.notify_best_effort(
            Notification::new(
                user_id,
                NotificationKind::Transaction,
                "Money Added",
                format!("₹{} has been added to your wallet", entry.amount),
            )
            .map(|n| n.related_to(Related::Transaction(entry.id.clone()))),
        );

        Ok(TopUpReceipt {
            transaction: entry,
            new_balance,
        })
    }

    /// Close a pending top-up the gateway never charged.
    pub fn fail_topup(&self, user_id: &str, txn_id: &str) -> Result<Transaction> {
        let trees = (&self.store.transactions, &self.store.user_transactions);
        let entry = unwrap_txn(trees.transaction(
            |(txs, index)| -> ConflictableTransactionResult<Transaction, MarketError> {
                let mut entry = Self::pending_entry(txs, user_id, txn_id)?;
                tx_try(entry.fail())?;
                tx_append_ledger(txs, index, &entry)?;
                Ok(entry)
            },
        ))?;

        tracing::info!(%user_id, %txn_id, "top-up marked failed");
        Ok(entry)
    }

    fn pending_entry(
        txs: &TransactionalTree,
        user_id: &str,
        txn_id: &str,
    ) -> ConflictableTransactionResult<Transaction, MarketError> {
        let Some(entry) = tx_get::<Transaction>(txs, txn_id.as_bytes())? else {
            return abort(MarketError::NotFound("Transaction"));
        };
        if entry.user_id != user_id {
            return abort(MarketError::Unauthorized(
                "Not authorized to settle this top-up".into(),
            ));
        }
        if entry.category != TxCategory::WalletTopup || entry.status != TxStatus::Pending {
            return abort(MarketError::InvalidState("Top-up is not pending".into()));
        }
        Ok(entry)
    }

    /// Buy an active coupon with wallet funds.
    ///
    /// Preconditions, first failure wins: the coupon exists, is active, is not
    /// owned by the buyer, is not exchange-only, and the buyer can afford it.
    /// Both balance moves, the ownership transfer and both ledger entries
    /// commit together or not at all; concurrent buyers of the same coupon are
    /// serialised by the transaction and all but one see `InvalidState`.
    pub fn purchase(&self, coupon_id: &str, buyer_id: &str) -> Result<PurchaseReceipt> {
        let now = TimeStamp::new();

        if self.store.load_coupon_fresh(coupon_id, &now)?.is_none() {
            return Err(MarketError::NotFound("Coupon"));
        }

        let buyer_txn_id = new_id("txn_")?;
        let seller_txn_id = new_id("txn_")?;

        let trees = (
            &self.store.accounts,
            &self.store.coupons,
            &self.store.transactions,
            &self.store.user_transactions,
        );
        let settled = unwrap_txn(trees.transaction(
            |(accounts, coupons, txs, index)| -> ConflictableTransactionResult<Settlement, MarketError> {
                let Some(mut coupon) = tx_get::<Coupon>(coupons, coupon_id.as_bytes())? else {
                    return abort(MarketError::NotFound("Coupon"));
                };
                coupon.refresh_expiry(&now);

                if coupon.status != CouponStatus::Active {
                    return abort(MarketError::InvalidState(
                        "Coupon is not available for purchase".into(),
                    ));
                }
                if coupon.owner_id == buyer_id {
                    return abort(MarketError::SelfTrade);
                }
                if coupon.is_exchange_only {
                    return abort(MarketError::ExchangeOnly);
                }

                let Some(mut buyer) = tx_get::<Account>(accounts, buyer_id.as_bytes())? else {
                    return abort(MarketError::NotFound("Account"));
                };
                let price = coupon.selling_price;
                if buyer.balance() < price {
                    return abort(MarketError::InsufficientFunds {
                        available: buyer.balance(),
                        required: price,
                    });
                }

                let seller_id = coupon.owner_id.clone();
                let Some(mut seller) = tx_get::<Account>(accounts, seller_id.as_bytes())? else {
                    return abort(MarketError::NotFound("Seller account"));
                };

                let buyer_change = tx_try(move_funds(&mut buyer, price, true))?;
                let seller_change = tx_try(move_funds(&mut seller, price, false))?;
                buyer.record_purchase(price, coupon.original_price);
                seller.record_sale();
                tx_try(coupon.mark_sold(buyer_id, now.clone()))?;

                let buyer_entry = Transaction::debit(
                    buyer_txn_id.clone(),
                    buyer_id.to_string(),
                    TxCategory::CouponPurchase,
                    buyer_change,
                    format!("Purchased: {}", coupon.title),
                )
                .with_coupon(&coupon.id)
                .with_counterparty(&seller_id)
                .with_timestamp(now.clone());

                let seller_entry = Transaction::credit(
                    seller_txn_id.clone(),
                    seller_id.clone(),
                    TxCategory::CouponSale,
                    seller_change,
                    format!("Sold: {}", coupon.title),
                )
                .with_coupon(&coupon.id)
                .with_counterparty(buyer_id)
                .with_timestamp(now.clone());

                tx_put(accounts, buyer_id.as_bytes(), &buyer)?;
                tx_put(accounts, seller_id.as_bytes(), &seller)?;
                tx_put(coupons, coupon_id.as_bytes(), &coupon)?;
                tx_append_ledger(txs, index, &buyer_entry)?;
                tx_append_ledger(txs, index, &seller_entry)?;

                Ok(Settlement {
                    buyer_entry,
                    coupon,
                    buyer_balance: buyer.balance(),
                    seller,
                })
            },
        ))
        .inspect_err(|e| tracing::debug!(%coupon_id, %buyer_id, error = %e, "purchase rejected"))?;

        let Settlement {
            buyer_entry,
            coupon,
            buyer_balance,
            seller,
        } = settled;

        tracing::info!(
            %coupon_id,
            %buyer_id,
            seller_id = %seller.id,
            price = coupon.selling_price,
            "coupon sold"
        );

        self.notify_best_effort(
            Notification::new(
                buyer_id,
                NotificationKind::Transaction,
                "Purchase Successful",
                format!("You have successfully purchased \"{}\"", coupon.title),
            )
            .map(|n| {
                n.related_to(Related::Coupon(coupon.id.clone()))
                    .with_action_url("/vault")
            }),
        );
        self.notify_best_effort(
            Notification::new(
                &seller.id,
                NotificationKind::CouponSold,
                "Coupon Sold!",
                format!(
                    "Your coupon \"{}\" has been sold for ₹{}",
                    coupon.title, coupon.selling_price
                ),
            )
            .map(|n| {
                n.related_to(Related::Coupon(coupon.id.clone()))
                    .with_action_url("/wallet")
            }),
        );
        if seller.email_notifications {
            self.email_best_effort(email::coupon_sold(
                &seller.email,
                &seller.name,
                &coupon.title,
                coupon.selling_price,
            ));
        }

        Ok(PurchaseReceipt {
            transaction: buyer_entry,
            coupon,
            new_balance: buyer_balance,
        })
    }

    /// Publish a coupon for sale or exchange. The listing and its zero-amount
    /// activity entry are written together.
    pub fn list_coupon(&self, seller_id: &str, draft: CouponDraft, image: &[u8]) -> Result<Coupon> {
        if image.is_empty() {
            return Err(MarketError::validation("Please upload a coupon image"));
        }
        self.store.account(seller_id)?;

        match draft.category() {
            Some(category) if !self.catalog.contains(category) => {
                return Err(MarketError::NotFound("Category"));
            }
            _ => {}
        }

        let status = if self.config.moderation_enabled {
            CouponStatus::PendingApproval
        } else {
            CouponStatus::Active
        };
        let now = TimeStamp::new();
        let mut coupon =
            draft.validate_and_finalise(new_id("coupon_")?, seller_id, String::new(), status, now.clone())?;
        coupon.image = self.store_image(image);

        let txn_id = new_id("txn_")?;
        let trees = (
            &self.store.accounts,
            &self.store.coupons,
            &self.store.transactions,
            &self.store.user_transactions,
        );
        unwrap_txn(trees.transaction(
            |(accounts, coupons, txs, index)| -> ConflictableTransactionResult<(), MarketError> {
                let Some(seller) = tx_get::<Account>(accounts, seller_id.as_bytes())? else {
                    return abort(MarketError::NotFound("Account"));
                };

                let entry = Transaction::info(
                    txn_id.clone(),
                    seller_id.to_string(),
                    TxCategory::CouponListing,
                    seller.balance(),
                    format!("Listed: {}", coupon.title),
                )
                .with_coupon(&coupon.id)
                .with_timestamp(now.clone());

                tx_put(coupons, coupon.id.as_bytes(), &coupon)?;
                tx_append_ledger(txs, index, &entry)
            },
        ))?;

        tracing::info!(coupon_id = %coupon.id, %seller_id, status = %coupon.status, "coupon listed");
        Ok(coupon)
    }

    /// Moderation outcome for a listing in `pending_approval`.
    pub fn review_listing(&self, coupon_id: &str, review: Review) -> Result<Coupon> {
        let coupon = unwrap_txn(self.store.coupons.transaction(
            |coupons| -> ConflictableTransactionResult<Coupon, MarketError> {
                let Some(mut coupon) = tx_get::<Coupon>(coupons, coupon_id.as_bytes())? else {
                    return abort(MarketError::NotFound("Coupon"));
                };
                match &review {
                    Review::Approve => tx_try(coupon.review(true, None))?,
                    Review::Reject(reason) => tx_try(coupon.review(false, Some(reason.clone())))?,
                }
                tx_put(coupons, coupon_id.as_bytes(), &coupon)?;
                Ok(coupon)
            },
        ))?;

        let (kind, title, message) = match &review {
            Review::Approve => (
                NotificationKind::CouponApproved,
                "Coupon Approved",
                format!("Your coupon \"{}\" is now live", coupon.title),
            ),
            Review::Reject(reason) => (
                NotificationKind::CouponRejected,
                "Coupon Rejected",
                format!("Your coupon \"{}\" was rejected: {reason}", coupon.title),
            ),
        };
        self.notify_best_effort(
            Notification::new(&coupon.seller_id, kind, title, message)
                .map(|n| n.related_to(Related::Coupon(coupon.id.clone()))),
        );

        Ok(coupon)
    }

    /// Redeem a bought coupon. Only its current owner may do this.
    pub fn mark_used(&self, coupon_id: &str, user_id: &str) -> Result<Coupon> {
        let now = TimeStamp::new();
        self.store.load_coupon_fresh(coupon_id, &now)?;

        let coupon = unwrap_txn(self.store.coupons.transaction(
            |coupons| -> ConflictableTransactionResult<Coupon, MarketError> {
                let Some(mut coupon) = tx_get::<Coupon>(coupons, coupon_id.as_bytes())? else {
                    return abort(MarketError::NotFound("Coupon"));
                };
                tx_try(coupon.mark_used(user_id, now.clone()))?;
                tx_put(coupons, coupon_id.as_bytes(), &coupon)?;
                Ok(coupon)
            },
        ))?;

        tracing::info!(%coupon_id, %user_id, "coupon marked as used");
        Ok(coupon)
    }

    /// Owner edits to a listing that has not been traded yet.
    pub fn update_coupon(
        &self,
        coupon_id: &str,
        user_id: &str,
        mut patch: CouponPatch,
        new_image: Option<&[u8]>,
    ) -> Result<Coupon> {
        let now = TimeStamp::new();
        let current = self
            .store
            .load_coupon_fresh(coupon_id, &now)?
            .ok_or(MarketError::NotFound("Coupon"))?;
        Self::check_editable(&current, user_id, "update")?;

        if let Some(category) = &patch.category {
            if !self.catalog.contains(category.trim()) {
                return Err(MarketError::NotFound("Category"));
            }
        }

        if let Some(bytes) = new_image.filter(|b| !b.is_empty()) {
            patch.image = Some(self.store_image(bytes));
        }

        unwrap_txn(self.store.coupons.transaction(
            |coupons| -> ConflictableTransactionResult<Coupon, MarketError> {
                let Some(mut coupon) = tx_get::<Coupon>(coupons, coupon_id.as_bytes())? else {
                    return abort(MarketError::NotFound("Coupon"));
                };
                tx_try(Self::check_editable(&coupon, user_id, "update"))?;
                tx_try(patch.clone().apply(&mut coupon, &now))?;
                tx_put(coupons, coupon_id.as_bytes(), &coupon)?;
                Ok(coupon)
            },
        ))
    }

    /// Withdraw a listing that has not been traded.
    pub fn delete_coupon(&self, coupon_id: &str, user_id: &str) -> Result<()> {
        unwrap_txn(self.store.coupons.transaction(
            |coupons| -> ConflictableTransactionResult<(), MarketError> {
                let Some(coupon) = tx_get::<Coupon>(coupons, coupon_id.as_bytes())? else {
                    return abort(MarketError::NotFound("Coupon"));
                };
                if coupon.owner_id != user_id {
                    return abort(MarketError::Unauthorized(
                        "Not authorized to delete this coupon".into(),
                    ));
                }
                if matches!(coupon.status, CouponStatus::Sold | CouponStatus::Used) {
                    return abort(MarketError::InvalidState(
                        "Traded coupons cannot be deleted".into(),
                    ));
                }
                coupons.remove(coupon_id.as_bytes())?;
                Ok(())
            },
        ))?;

        tracing::info!(%coupon_id, %user_id, "coupon deleted");
        Ok(())
    }

    fn check_editable(coupon: &Coupon, user_id: &str, action: &str) -> Result<()> {
        if coupon.owner_id != user_id {
            return Err(MarketError::Unauthorized(format!(
                "Not authorized to {action} this coupon"
            )));
        }
        if !matches!(
            coupon.status,
            CouponStatus::Active | CouponStatus::PendingApproval
        ) {
            return Err(MarketError::InvalidState(format!(
                "Coupon is {} and can no longer be edited",
                coupon.status
            )));
        }
        Ok(())
    }

    /// Coupon detail view. Counts the view and applies lazy expiry.
    pub fn get_coupon(&self, coupon_id: &str) -> Result<Coupon> {
        let now = TimeStamp::new();

        unwrap_txn(self.store.coupons.transaction(
            |coupons| -> ConflictableTransactionResult<Coupon, MarketError> {
                let Some(mut coupon) = tx_get::<Coupon>(coupons, coupon_id.as_bytes())? else {
                    return abort(MarketError::NotFound("Coupon"));
                };
                coupon.refresh_expiry(&now);
                coupon.views = coupon.views.saturating_add(1);
                tx_put(coupons, coupon_id.as_bytes(), &coupon)?;
                Ok(coupon)
            },
        ))
    }

    /// Marketplace listing, newest first.
    pub fn browse(&self, filter: &CouponFilter, page: Page) -> Result<Paginated<Coupon>> {
        let now = TimeStamp::new();
        let status = filter.status.unwrap_or(CouponStatus::Active);

        let mut coupons: Vec<Coupon> = self
            .store
            .all_coupons()?
            .into_iter()
            .map(|mut c| {
                c.refresh_expiry(&now);
                c
            })
            .filter(|c| c.status == status)
            .filter(|c| filter.category.as_ref().is_none_or(|cat| &c.category == cat))
            .filter(|c| filter.min_price.is_none_or(|min| c.selling_price >= min))
            .filter(|c| filter.max_price.is_none_or(|max| c.selling_price <= max))
            .filter(|c| {
                filter
                    .search
                    .as_deref()
                    .is_none_or(|needle| c.matches_search(needle))
            })
            .collect();
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(Paginated::from_items(coupons, page))
    }

    /// Coupons a user currently holds, newest first.
    pub fn owned_coupons(&self, user_id: &str) -> Result<Vec<Coupon>> {
        let now = TimeStamp::new();
        let mut coupons: Vec<Coupon> = self
            .store
            .all_coupons()?
            .into_iter()
            .filter(|c| c.owner_id == user_id)
            .map(|mut c| {
                c.refresh_expiry(&now);
                c
            })
            .collect();
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(coupons)
    }

    /// Wallet history, newest first.
    pub fn transactions(
        &self,
        user_id: &str,
        filter: TransactionFilter,
        page: Page,
    ) -> Result<Paginated<Transaction>> {
        let entries: Vec<Transaction> = self
            .store
            .user_transactions(user_id)?
            .into_iter()
            .filter(|t| filter.kind.is_none_or(|k| t.kind == k))
            .filter(|t| filter.category.is_none_or(|c| t.category == c))
            .collect();

        Ok(Paginated::from_items(entries, page))
    }

    pub fn transaction(&self, user_id: &str, txn_id: &str) -> Result<Transaction> {
        let entry = self
            .store
            .load_transaction(txn_id)?
            .ok_or(MarketError::NotFound("Transaction"))?;
        if entry.user_id != user_id {
            return Err(MarketError::Unauthorized("Not authorized to view this record".into()));
        }
        Ok(entry)
    }

    /// Re-check every ledger entry of a user against its balance invariant and
    /// the digest recorded when it was appended.
    pub fn verify_ledger(&self, user_id: &str) -> Result<LedgerAudit> {
        let mut audit = LedgerAudit::default();

        for pointer in self.store.ledger_refs(user_id)? {
            audit.entries += 1;

            let Some(raw) = self.store.raw_transaction(&pointer.txn_id)? else {
                audit.tampered.push(pointer.txn_id);
                continue;
            };
            if sha256::digest(&raw) != pointer.digest {
                audit.tampered.push(pointer.txn_id.clone());
            }

            let entry: Transaction = decode(&raw)?;
            if !entry.is_consistent() || entry.user_id != user_id {
                audit.inconsistent.push(pointer.txn_id);
            }
        }

        if !audit.is_clean() {
            tracing::warn!(
                %user_id,
                tampered = audit.tampered.len(),
                inconsistent = audit.inconsistent.len(),
                "ledger audit found problems"
            );
        }
        Ok(audit)
    }

    pub fn notifications(
        &self,
        user_id: &str,
        unread_only: bool,
        page: Page,
    ) -> Result<Paginated<Notification>> {
        let notes = self
            .store
            .user_notifications(user_id)?
            .into_iter()
            .filter(|n| !unread_only || !n.is_read)
            .collect();
        Ok(Paginated::from_items(notes, page))
    }

    pub fn mark_notification_read(&self, user_id: &str, note_id: &str) -> Result<Notification> {
        let mut note = self
            .store
            .load_notification(note_id)?
            .ok_or(MarketError::NotFound("Notification"))?;
        if note.user_id != user_id {
            return Err(MarketError::Unauthorized("Not authorized to view this record".into()));
        }
        note.mark_read();
        self.store.save_notification(&note)?;
        Ok(note)
    }

    /// Suggested listing fields read off a coupon photo. Empty when OCR is
    /// unavailable; the seller fills the form by hand in that case.
    pub fn autofill(&self, image: &[u8]) -> ExtractedFields {
        match self.recognize(image) {
            Ok(text) => self.extractor.extract(&text),
            Err(e) => {
                tracing::warn!(error = %e, "skipping auto-fill");
                ExtractedFields::default()
            }
        }
    }

    /// Whether a photo appears to contain a readable coupon.
    pub fn assess_image(&self, image: &[u8]) -> TextAssessment {
        match self.recognize(image) {
            Ok(text) => self.extractor.assess(&text),
            Err(e) => {
                tracing::warn!(error = %e, "image assessment unavailable");
                TextAssessment {
                    is_coupon_like: false,
                    confidence: 0,
                }
            }
        }
    }

    fn recognize(&self, image: &[u8]) -> Result<String> {
        let recognizer = self.recognizer.clone();
        let bytes = image.to_vec();
        call_with_timeout("ocr", self.config.external_timeout, move || {
            recognizer.recognize(&bytes)
        })
    }

    // Never fails: a broken or slow image host degrades to a placeholder URL.
    fn store_image(&self, image: &[u8]) -> String {
        let images = self.images.clone();
        let bytes = image.to_vec();
        match call_with_timeout("image-store", self.config.external_timeout, move || {
            images.store(&bytes)
        }) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "image upload failed, using placeholder");
                self.placeholder.url_for(image)
            }
        }
    }

    fn notify_best_effort(&self, note: Result<Notification>) {
        if let Err(e) = note.and_then(|n| self.notifier.notify(n)) {
            tracing::warn!(error = %e, "notification dropped");
        }
    }

    /// Email goes out on its own thread; the caller never waits on the mailer.
    fn email_best_effort(&self, mail: Email) {
        let mailer = self.mailer.clone();
        let to = mail.to.clone();
        let spawned = std::thread::Builder::new()
            .name("email".into())
            .spawn(move || {
                if let Err(e) = mailer.send(mail) {
                    tracing::warn!(%to, error = %e, "email sending failed");
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "could not start email thread");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn service() -> (TempDir, MarketService) {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("market.db")).unwrap();
        let service = MarketService::new(Arc::new(db), MarketConfig::default()).unwrap();
        (dir, service)
    }

    fn funded(service: &MarketService) -> (String, Transaction) {
        let user = service.register_user("Uma", "uma@example.com").unwrap().id;
        let receipt = service.add_money(&user, 500, PaymentMethod::Upi).unwrap();
        (user, receipt.transaction)
    }

    #[test]
    fn audit_flags_rewritten_entry_bytes() {
        let (_dir, service) = service();
        let (user, topup) = funded(&service);

        let mut forged = topup.clone();
        forged.amount = 5_000;
        forged.balance_after = 5_000;
        let (_, cbor) = forged.seal().unwrap();
        service
            .store
            .transactions
            .insert(topup.id.as_bytes(), cbor)
            .unwrap();

        let audit = service.verify_ledger(&user).unwrap();
        assert_eq!(audit.tampered, vec![topup.id]);
        assert!(audit.inconsistent.is_empty());
        assert!(!audit.is_clean());
    }

    #[test]
    fn audit_flags_entry_whose_balances_disagree() {
        let (_dir, service) = service();
        let (user, _) = funded(&service);

        let mut entry = Transaction::credit(
            "txn_bad".into(),
            user.clone(),
            TxCategory::Refund,
            BalanceChange { before: 500, after: 700 },
            "Refund",
        );
        entry.amount = 900;

        let trees = (
            &service.store.transactions,
            &service.store.user_transactions,
        );
        unwrap_txn(trees.transaction(
            |(txs, index)| -> ConflictableTransactionResult<(), MarketError> {
                tx_append_ledger(txs, index, &entry)
            },
        ))
        .unwrap();

        let audit = service.verify_ledger(&user).unwrap();
        assert_eq!(audit.entries, 2);
        assert_eq!(audit.inconsistent, vec!["txn_bad".to_string()]);
        assert!(audit.tampered.is_empty());
    }

    #[test]
    fn audit_flags_missing_entry() {
        let (_dir, service) = service();
        let (user, topup) = funded(&service);

        service
            .store
            .transactions
            .remove(topup.id.as_bytes())
            .unwrap();

        let audit = service.verify_ledger(&user).unwrap();
        assert_eq!(audit.tampered, vec![topup.id]);
    }
}
