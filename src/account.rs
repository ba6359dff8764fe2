//! Wallet accounts and the balance arithmetic behind every ledger entry
use crate::error::{MarketError, Result};
use crate::types::{Amount, TimeStamp};
use chrono::Utc;

/// Balance snapshot taken at the moment of a credit or debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub before: Amount,
    pub after: Amount,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Account {
    #[n(0)]
    pub id: String, // bech32 "user_" id
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub email: String,
    #[n(3)]
    balance: Amount,
    #[n(4)]
    pub total_coupons_bought: u64,
    #[n(5)]
    pub total_coupons_sold: u64,
    #[n(6)]
    pub total_spent: Amount,
    #[n(7)]
    pub total_savings: Amount,
    #[n(8)]
    pub email_notifications: bool,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
}

impl Account {
    pub const MAX_NAME_LEN: usize = 50;

    /// Builds a zero-balance account after checking the profile fields.
    pub fn open(id: String, name: &str, email: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > Self::MAX_NAME_LEN {
            return Err(MarketError::validation(format!(
                "Name must be between 1 and {} characters",
                Self::MAX_NAME_LEN
            )));
        }

        let email = email.trim().to_lowercase();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => return Err(MarketError::validation("Please provide a valid email")),
        }

        Ok(Self {
            id,
            name: name.to_string(),
            email,
            balance: 0,
            total_coupons_bought: 0,
            total_coupons_sold: 0,
            total_spent: 0,
            total_savings: 0,
            email_notifications: true,
            created_at: TimeStamp::new(),
        })
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn credit(&mut self, amount: Amount) -> Result<BalanceChange> {
        if amount == 0 {
            return Err(MarketError::validation("Credit amount must be positive"));
        }

        let before = self.balance;
        let after = before
            .checked_add(amount)
            .ok_or_else(|| MarketError::validation("Credit would overflow the wallet balance"))?;
        self.balance = after;

        Ok(BalanceChange { before, after })
    }

    pub fn debit(&mut self, amount: Amount) -> Result<BalanceChange> {
        if amount == 0 {
            return Err(MarketError::validation("Debit amount must be positive"));
        }

        let before = self.balance;
        let after = before
            .checked_sub(amount)
            .ok_or(MarketError::InsufficientFunds {
                available: before,
                required: amount,
            })?;
        self.balance = after;

        Ok(BalanceChange { before, after })
    }

    /// Buyer-side counters. Savings never go down, a price above the original saves nothing.
    pub fn record_purchase(&mut self, price: Amount, original_price: Option<Amount>) {
        self.total_coupons_bought = self.total_coupons_bought.saturating_add(1);
        self.total_spent = self.total_spent.saturating_add(price);

        if let Some(original) = original_price {
            self.total_savings = self
                .total_savings
                .saturating_add(original.saturating_sub(price));
        }
    }

    pub fn record_sale(&mut self) {
        self.total_coupons_sold = self.total_coupons_sold.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::open("user_1".into(), "Asha", "Asha@Example.com").unwrap()
    }

    #[test]
    fn opens_with_zero_balance_and_normalised_email() {
        let acc = account();
        assert_eq!(acc.balance(), 0);
        assert_eq!(acc.email, "asha@example.com");
    }

    #[test]
    fn rejects_bad_profiles() {
        assert!(Account::open("user_1".into(), "  ", "a@b.co").is_err());
        assert!(Account::open("user_1".into(), "Asha", "not-an-email").is_err());
        assert!(Account::open("user_1".into(), &"x".repeat(51), "a@b.co").is_err());
    }

    #[test]
    fn credit_and_debit_snapshot_balances() {
        let mut acc = account();

        let change = acc.credit(500).unwrap();
        assert_eq!(change, BalanceChange { before: 0, after: 500 });

        let change = acc.debit(200).unwrap();
        assert_eq!(change, BalanceChange { before: 500, after: 300 });
        assert_eq!(acc.balance(), 300);
    }

    #[test]
    fn zero_amounts_are_rejected() {
        let mut acc = account();
        assert!(acc.credit(0).unwrap_err().is_validation());
        assert!(acc.debit(0).unwrap_err().is_validation());
    }

    #[test]
    fn overdraft_leaves_balance_untouched() {
        let mut acc = account();
        acc.credit(100).unwrap();

        let err = acc.debit(101).unwrap_err();
        assert!(matches!(
            err,
            MarketError::InsufficientFunds {
                available: 100,
                required: 101
            }
        ));
        assert_eq!(acc.balance(), 100);
    }

    #[test]
    fn savings_never_decrease() {
        let mut acc = account();
        acc.record_purchase(600, Some(1000));
        assert_eq!(acc.total_savings, 400);

        acc.record_purchase(900, Some(500));
        assert_eq!(acc.total_savings, 400);
        assert_eq!(acc.total_spent, 1500);
        assert_eq!(acc.total_coupons_bought, 2);
    }
}
