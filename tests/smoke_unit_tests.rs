//! Smoke Screen Unit tests for the coupon ledger components
//!
//! Happy-path checks across the public API, kept apart from the
//! integration scenarios which drive everything through the service.

use chrono::{Datelike, Utc};
use coupon_ledger::{
    MarketError,
    account::Account,
    catalog::{Catalog, slugify},
    ledger::{Transaction, TxCategory, TxKind, TxStatus},
    lifecycle::CouponStatus,
    response::ApiResponse,
    types::{Page, Paginated, PaymentMethod, TimeStamp},
    utils::new_uuid_to_bech32,
};

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Ids carry their human-readable prefix
    #[test]
    fn generates_valid_bech32_with_hrp() {
        let encoded = new_uuid_to_bech32("coupon_").unwrap();
        assert!(encoded.starts_with("coupon_1"));
        assert!(encoded.len() > 10);
    }

    #[test]
    fn handles_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    #[test]
    fn generates_unique_ids() {
        let id1 = new_uuid_to_bech32("txn_").unwrap();
        let id2 = new_uuid_to_bech32("txn_").unwrap();
        assert_ne!(id1, id2);
    }
}

// TYPES MODULE TESTS
#[cfg(test)]
mod types_tests {
    use super::*;

    #[test]
    fn timestamp_new_creates_current_time() {
        let ts = TimeStamp::new();
        let diff = (Utc::now() - ts.to_datetime_utc()).num_seconds().abs();
        assert!(diff < 1);
    }

    #[test]
    fn timestamp_with_specific_date() {
        let ts = TimeStamp::new_with(2031, 6, 30, 23, 59, 59).unwrap();
        let dt = ts.to_datetime_utc();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2031, 6, 30));
    }

    /// An out of range page is empty rather than an error
    #[test]
    fn page_past_the_end_is_empty() {
        let page: Paginated<u32> = Paginated::from_items(vec![1, 2, 3], Page::new(5, 2));
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert!(!page.has_next);
    }

    #[test]
    fn payment_methods_have_wire_names() {
        assert_eq!(PaymentMethod::default(), PaymentMethod::Upi);
        assert_eq!(PaymentMethod::NetBanking.to_string(), "netbanking");
    }
}

// LEDGER MODULE TESTS
#[cfg(test)]
mod ledger_tests {
    use super::*;

    #[test]
    fn top_up_entry_from_account_credit() {
        let mut account = Account::open("user_1".into(), "Uma", "uma@example.com").unwrap();
        let change = account.credit(500).unwrap();

        let entry = Transaction::credit(
            "txn_1".into(),
            account.id.clone(),
            TxCategory::WalletTopup,
            change,
            "Wallet top-up via upi",
        );

        assert_eq!(entry.kind, TxKind::Credit);
        assert_eq!(entry.status, TxStatus::Completed);
        assert_eq!(entry.amount, 500);
        assert_eq!(entry.balance_after, account.balance());
        assert!(entry.is_consistent());
    }

    #[test]
    fn sealing_detects_changes() {
        let entry = Transaction::info(
            "txn_2".into(),
            "user_1".into(),
            TxCategory::CouponListing,
            300,
            "Listed: Movie ticket",
        );
        let (digest, _) = entry.seal().unwrap();

        let mut altered = entry.clone();
        altered.description = "Listed: something else".into();
        let (altered_digest, _) = altered.seal().unwrap();

        assert_ne!(digest, altered_digest);
    }
}

// CATALOG AND LIFECYCLE TESTS
#[cfg(test)]
mod catalog_tests {
    use super::*;

    #[test]
    fn default_catalog_has_known_slugs() {
        let catalog = Catalog::default();
        assert!(catalog.contains("food-dining"));
        assert!(catalog.contains("electronics"));
        assert!(!catalog.contains("pets"));
        assert_eq!(slugify("Health  Fitness"), "health-fitness");
    }

    #[test]
    fn status_names_round_trip() {
        for status in CouponStatus::ALL {
            assert_eq!(status.as_str().parse::<CouponStatus>().unwrap(), status);
        }
    }
}

// RESPONSE MODULE TESTS
#[cfg(test)]
mod response_tests {
    use super::*;

    #[test]
    fn self_trade_message_reaches_the_caller() {
        let res: ApiResponse<()> = ApiResponse::fail(&MarketError::SelfTrade);
        assert!(!res.success);
        assert_eq!(res.message, "You cannot buy your own coupon");
    }
}
