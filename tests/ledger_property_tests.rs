//! Property-based tests for wallet arithmetic and the coupon state machine
//!
//! Balances and ledger entries have to agree for any sequence of credits and
//! debits, including the ones that get refused. These tests generate such
//! sequences and replay them against an account.
//!
//! Not covered here: persistence and multi-tree transactions, and
//! concurrency between buyers. Both live in scenarios.rs.

use coupon_ledger::{
    MarketError,
    account::Account,
    ledger::{Transaction, TxCategory},
    lifecycle::CouponStatus,
    types::{Amount, Page, Paginated},
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Credit(Amount),
    Debit(Amount),
}

/// Amounts stay small enough that a run never overflows but debits often overdraw.
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..=50_000u64).prop_map(Op::Credit),
        (0..=60_000u64).prop_map(Op::Debit),
    ]
}

fn status_strategy() -> impl Strategy<Value = CouponStatus> {
    prop::sample::select(CouponStatus::ALL.to_vec())
}

fn account() -> Account {
    Account::open("user_prop".into(), "Prop", "prop@example.com").unwrap()
}

// PROPERTY TESTS
proptest! {
    /// Property: the balance equals credits minus debits that were accepted,
    /// and every accepted move yields a consistent ledger entry chained to the last
    #[test]
    fn prop_balance_matches_accepted_moves(ops in prop::collection::vec(op_strategy(), 1..=40)) {
        let mut account = account();
        let mut expected: Amount = 0;
        let mut previous_after: Amount = 0;

        for (i, op) in ops.into_iter().enumerate() {
            let id = format!("txn_{i}");
            let entry = match op {
                Op::Credit(amount) => account.credit(amount).map(|change| {
                    expected += amount;
                    Transaction::credit(id, account.id.clone(), TxCategory::WalletTopup, change, "top-up")
                }),
                Op::Debit(amount) => account.debit(amount).map(|change| {
                    expected -= amount;
                    Transaction::debit(id, account.id.clone(), TxCategory::CouponPurchase, change, "purchase")
                }),
            };

            if let Ok(entry) = entry {
                prop_assert!(entry.is_consistent());
                prop_assert_eq!(entry.balance_before, previous_after);
                previous_after = entry.balance_after;
            }
            prop_assert_eq!(account.balance(), expected);
        }
    }

    /// Property: a refused debit reports the real balance and leaves it untouched
    #[test]
    fn prop_overdraft_is_refused(start in 1..=50_000u64, extra in 1..=10_000u64) {
        let mut account = account();
        account.credit(start).unwrap();

        let err = account.debit(start + extra).unwrap_err();
        let is_insufficient = matches!(
            err,
            MarketError::InsufficientFunds { available, required }
                if available == start && required == start + extra
        );
        prop_assert!(is_insufficient);
        prop_assert_eq!(account.balance(), start);
    }

    /// Property: savings only ever grow, whatever the prices
    #[test]
    fn prop_savings_are_monotonic(
        purchases in prop::collection::vec((0..=10_000u64, prop::option::of(0..=10_000u64)), 1..=20)
    ) {
        let mut account = account();
        let mut last = 0;

        for (price, original) in purchases {
            account.record_purchase(price, original);
            prop_assert!(account.total_savings >= last);
            last = account.total_savings;
        }
    }

    /// Property: terminal statuses never move, and a legal move never lands on
    /// pending approval
    #[test]
    fn prop_terminal_statuses_are_stable(from in status_strategy(), to in status_strategy()) {
        match from.transition(to) {
            Ok(next) => {
                prop_assert!(!from.is_terminal());
                prop_assert_eq!(next, to);
                prop_assert_ne!(to, CouponStatus::PendingApproval);
            }
            Err(MarketError::InvalidStateTransition { from: f, to: t }) => {
                prop_assert_eq!((f, t), (from, to));
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }

    /// Property: walking every page returns each item exactly once, in order
    #[test]
    fn prop_pages_cover_everything(len in 0usize..=120, limit in 1usize..=30) {
        let items: Vec<usize> = (0..len).collect();
        let first = Paginated::from_items(items.clone(), Page::new(1, limit));

        let mut seen = Vec::new();
        for page in 1..=first.total_pages.max(1) {
            seen.extend(Paginated::from_items(items.clone(), Page::new(page, limit)).items);
        }
        prop_assert_eq!(seen, items);
    }
}
