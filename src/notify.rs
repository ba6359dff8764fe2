//! In-app notifications and outbound email.
//!
//! Both are best effort: the service logs failures and carries on.
use crate::error::Result;
use crate::store::MarketStore;
use crate::types::{Amount, TimeStamp};
use crate::utils;
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    #[n(0)]
    Transaction,
    #[n(1)]
    CouponSold,
    #[n(2)]
    CouponApproved,
    #[n(3)]
    CouponRejected,
    #[n(4)]
    ExpiryReminder,
    #[n(5)]
    System,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    #[n(0)]
    Low,
    #[n(1)]
    #[default]
    Medium,
    #[n(2)]
    High,
}

/// What a notification points at.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum Related {
    #[n(0)]
    Coupon(#[n(0)] String),
    #[n(1)]
    Transaction(#[n(0)] String),
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub kind: NotificationKind,
    #[n(3)]
    pub title: String,
    #[n(4)]
    pub message: String,
    #[n(5)]
    pub related: Option<Related>,
    #[n(6)]
    pub priority: Priority,
    #[n(7)]
    pub action_url: Option<String>,
    #[n(8)]
    pub is_read: bool,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub read_at: Option<TimeStamp<Utc>>,
}

impl Notification {
    pub fn new(user_id: &str, kind: NotificationKind, title: &str, message: String) -> Result<Self> {
        Ok(Self {
            id: utils::new_id("note_")?,
            user_id: user_id.to_string(),
            kind,
            title: title.to_string(),
            message,
            related: None,
            priority: Priority::default(),
            action_url: None,
            is_read: false,
            created_at: TimeStamp::new(),
            read_at: None,
        })
    }
    pub fn related_to(mut self, related: Related) -> Self {
        self.related = Some(related);
        self
    }
    pub fn with_action_url(mut self, url: &str) -> Self {
        self.action_url = Some(url.to_string());
        self
    }
    pub fn mark_read(&mut self) {
        if !self.is_read {
            self.is_read = true;
            self.read_at = Some(TimeStamp::new());
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, note: Notification) -> Result<()>;
}

/// Keeps the notification feed in the marketplace database.
#[derive(Clone)]
pub struct SledNotifier {
    store: MarketStore,
}

impl SledNotifier {
    pub fn new(store: MarketStore) -> Self {
        Self { store }
    }
}

impl Notifier for SledNotifier {
    fn notify(&self, note: Notification) -> Result<()> {
        self.store.save_notification(&note)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub trait Mailer: Send + Sync {
    fn send(&self, email: Email) -> Result<()>;
}

/// Writes outgoing mail to the log instead of an SMTP relay.
#[derive(Debug, Clone)]
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

impl Mailer for LogMailer {
    fn send(&self, email: Email) -> Result<()> {
        tracing::info!(from = %self.from, to = %email.to, subject = %email.subject, "email queued");
        Ok(())
    }
}

pub mod email {
    use super::*;

    pub fn welcome(to: &str, name: &str) -> Email {
        Email {
            to: to.to_string(),
            subject: "Welcome to the coupon marketplace".to_string(),
            body: format!(
                "Hi {name},\n\nThanks for joining. Browse deals, sell the coupons you won't use, \
                 or swap them with other members.\n"
            ),
        }
    }

    pub fn coupon_sold(to: &str, seller_name: &str, title: &str, price: Amount) -> Email {
        Email {
            to: to.to_string(),
            subject: "Coupon Sold".to_string(),
            body: format!(
                "Hi {seller_name},\n\nYour coupon \"{title}\" has been sold for ₹{price}. \
                 The amount has been credited to your wallet.\n"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_read_stamps_once() {
        let mut note = Notification::new(
            "user_1",
            NotificationKind::Transaction,
            "Money Added",
            "₹500 has been added to your wallet".into(),
        )
        .unwrap();

        note.mark_read();
        let first = note.read_at.clone();
        note.mark_read();

        assert!(note.is_read);
        assert_eq!(note.read_at, first);
    }

    #[test]
    fn sold_email_mentions_price() {
        let mail = email::coupon_sold("s@example.com", "Sam", "Pizza", 600);
        assert_eq!(mail.subject, "Coupon Sold");
        assert!(mail.body.contains("₹600"));
        assert!(mail.body.contains("\"Pizza\""));
    }

    #[test]
    fn notification_encoding() {
        let note = Notification::new("user_1", NotificationKind::CouponSold, "Coupon Sold!", "x".into())
            .unwrap()
            .related_to(Related::Coupon("coupon_1".into()));

        let bytes = minicbor::to_vec(&note).unwrap();
        let decoded: Notification = minicbor::decode(&bytes).unwrap();
        assert_eq!(decoded, note);
    }
}
