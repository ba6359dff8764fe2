//! Coupon records, listing drafts and owner edits
use crate::error::{MarketError, Result};
use crate::lifecycle::CouponStatus;
use crate::types::{Amount, TimeStamp};
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Coupon {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub seller_id: String, // original lister, never changes
    #[n(2)]
    pub owner_id: String, // current holder
    #[n(3)]
    pub title: String,
    #[n(4)]
    pub description: String,
    #[n(5)]
    pub category: String,
    #[n(6)]
    pub brand: Option<String>,
    #[n(7)]
    pub discount_percentage: Option<u8>,
    #[n(8)]
    pub original_price: Option<Amount>,
    #[n(9)]
    pub selling_price: Amount,
    #[n(10)]
    pub is_exchange_only: bool,
    #[n(11)]
    pub coupon_code: Option<String>,
    #[n(12)]
    pub terms: Option<String>,
    #[n(13)]
    pub expiry_date: TimeStamp<Utc>,
    #[n(14)]
    pub image: String,
    #[n(15)]
    pub status: CouponStatus,
    #[n(16)]
    pub rejection_reason: Option<String>,
    #[n(17)]
    pub views: u64,
    #[n(18)]
    pub created_at: TimeStamp<Utc>,
    #[n(19)]
    pub sold_at: Option<TimeStamp<Utc>>,
    #[n(20)]
    pub used_at: Option<TimeStamp<Utc>>,
}

impl Coupon {
    pub fn is_expired_at(&self, now: &TimeStamp<Utc>) -> bool {
        self.expiry_date < *now
    }

    /// Flags an `active` coupon whose expiry has passed as `expired`.
    /// Idempotent; returns whether the status changed.
    pub fn refresh_expiry(&mut self, now: &TimeStamp<Utc>) -> bool {
        if self.status == CouponStatus::Active && self.is_expired_at(now) {
            self.status = CouponStatus::Expired;
            return true;
        }
        false
    }

    pub fn mark_sold(&mut self, buyer_id: &str, now: TimeStamp<Utc>) -> Result<()> {
        self.status = self.status.transition(CouponStatus::Sold)?;
        self.owner_id = buyer_id.to_string();
        self.sold_at = Some(now);
        Ok(())
    }

    pub fn mark_used(&mut self, user_id: &str, now: TimeStamp<Utc>) -> Result<()> {
        if self.owner_id != user_id {
            return Err(MarketError::InvalidState(
                "Only the current owner can mark this coupon as used".into(),
            ));
        }
        self.status = self.status.transition(CouponStatus::Used)?;
        self.used_at = Some(now);
        Ok(())
    }

    /// Moderation outcome for a listing waiting in `pending_approval`.
    pub fn review(&mut self, approve: bool, reason: Option<String>) -> Result<()> {
        if approve {
            self.status = self.status.transition(CouponStatus::Active)?;
            self.rejection_reason = None;
        } else {
            self.status = self.status.transition(CouponStatus::Rejected)?;
            self.rejection_reason = reason;
        }
        Ok(())
    }

    pub fn savings(&self) -> Option<Amount> {
        self.original_price
            .map(|original| original.saturating_sub(self.selling_price))
    }

    /// Case-insensitive match over title, description and brand.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self.description.to_lowercase().contains(&needle)
            || self
                .brand
                .as_deref()
                .is_some_and(|b| b.to_lowercase().contains(&needle))
    }
}

// Used for constructing listings before they are validated
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CouponDraft {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    brand: Option<String>,
    discount_percentage: Option<u8>,
    original_price: Option<Amount>,
    selling_price: Option<Amount>,
    is_exchange_only: bool,
    coupon_code: Option<String>,
    terms: Option<String>,
    expiry_date: Option<TimeStamp<Utc>>,
}

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 1000;
pub const MAX_TERMS_LEN: usize = 500;

/// Trimmed, with blank values dropped.
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_discount(pct: Option<u8>) -> Result<()> {
    match pct {
        Some(pct) if pct > 100 => Err(MarketError::validation(
            "Discount percentage must be between 0 and 100",
        )),
        _ => Ok(()),
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len == 0 || len > max {
        return Err(MarketError::validation(format!(
            "{field} must be between 1 and {max} characters"
        )));
    }
    Ok(())
}

impl CouponDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_title(mut self, title: &str) -> Self {
        self.title = Some(title.trim().to_string());
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
    pub fn set_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }
    pub fn set_brand(mut self, brand: &str) -> Self {
        self.brand = Some(brand.to_string());
        self
    }
    pub fn set_discount_percentage(mut self, pct: u8) -> Self {
        self.discount_percentage = Some(pct);
        self
    }
    pub fn set_original_price(mut self, price: Amount) -> Self {
        self.original_price = Some(price);
        self
    }
    pub fn set_selling_price(mut self, price: Amount) -> Self {
        self.selling_price = Some(price);
        self
    }
    pub fn set_exchange_only(mut self, exchange_only: bool) -> Self {
        self.is_exchange_only = exchange_only;
        self
    }
    pub fn set_coupon_code(mut self, code: &str) -> Self {
        self.coupon_code = Some(code.to_string());
        self
    }
    pub fn set_terms(mut self, terms: &str) -> Self {
        self.terms = Some(terms.to_string());
        self
    }
    pub fn set_expiry_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.expiry_date = Some(date);
        self
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Checks the draft and turns it into a coupon owned by its seller.
    /// Category existence is checked by the caller against the catalog.
    pub fn validate_and_finalise(
        self,
        id: String,
        seller_id: &str,
        image: String,
        status: CouponStatus,
        now: TimeStamp<Utc>,
    ) -> Result<Coupon> {
        let title = self
            .title
            .ok_or_else(|| MarketError::validation("Please provide a title"))?;
        check_len("Title", &title, MAX_TITLE_LEN)?;

        let description = self
            .description
            .ok_or_else(|| MarketError::validation("Please provide a description"))?;
        check_len("Description", &description, MAX_DESCRIPTION_LEN)?;

        if let Some(terms) = &self.terms {
            check_len("Terms", terms, MAX_TERMS_LEN)?;
        }

        let category = self
            .category
            .ok_or_else(|| MarketError::validation("Please select a category"))?;

        check_discount(self.discount_percentage)?;

        let expiry_date = self
            .expiry_date
            .ok_or_else(|| MarketError::validation("Please provide an expiry date"))?;
        if expiry_date <= now {
            return Err(MarketError::validation("Expiry date must be in the future"));
        }

        let selling_price = match (self.is_exchange_only, self.selling_price) {
            (true, _) => 0,
            (false, Some(price)) => price,
            (false, None) => {
                return Err(MarketError::validation(
                    "Selling price is required unless the coupon is exchange-only",
                ));
            }
        };

        Ok(Coupon {
            id,
            seller_id: seller_id.to_string(),
            owner_id: seller_id.to_string(),
            title,
            description,
            category,
            brand: clean(self.brand),
            discount_percentage: self.discount_percentage,
            original_price: self.original_price,
            selling_price,
            is_exchange_only: self.is_exchange_only,
            coupon_code: clean(self.coupon_code),
            terms: self.terms,
            expiry_date,
            image,
            status,
            rejection_reason: None,
            views: 0,
            created_at: now,
            sold_at: None,
            used_at: None,
        })
    }
}

/// Owner edits to a listing. Ownership, status and pricing mode stay put.
/// A blank brand or coupon code clears it. Category existence is checked by
/// the caller against the catalog.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CouponPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub discount_percentage: Option<u8>,
    pub original_price: Option<Amount>,
    pub selling_price: Option<Amount>,
    pub coupon_code: Option<String>,
    pub terms: Option<String>,
    pub expiry_date: Option<TimeStamp<Utc>>,
    pub image: Option<String>,
}

impl CouponPatch {
    pub fn apply(self, coupon: &mut Coupon, now: &TimeStamp<Utc>) -> Result<()> {
        if let Some(title) = &self.title {
            check_len("Title", title.trim(), MAX_TITLE_LEN)?;
        }
        if let Some(description) = &self.description {
            check_len("Description", description, MAX_DESCRIPTION_LEN)?;
        }
        if let Some(terms) = &self.terms {
            check_len("Terms", terms, MAX_TERMS_LEN)?;
        }
        if let Some(category) = &self.category {
            if category.trim().is_empty() {
                return Err(MarketError::validation("Please select a category"));
            }
        }
        check_discount(self.discount_percentage)?;
        if let Some(expiry) = &self.expiry_date {
            if expiry <= now {
                return Err(MarketError::validation("Expiry date must be in the future"));
            }
        }
        if self.selling_price.is_some() && coupon.is_exchange_only {
            return Err(MarketError::ExchangeOnly);
        }

        if let Some(title) = self.title {
            coupon.title = title.trim().to_string();
        }
        if let Some(description) = self.description {
            coupon.description = description;
        }
        if let Some(category) = self.category {
            coupon.category = category.trim().to_string();
        }
        if self.brand.is_some() {
            coupon.brand = clean(self.brand);
        }
        if let Some(pct) = self.discount_percentage {
            coupon.discount_percentage = Some(pct);
        }
        if let Some(price) = self.original_price {
            coupon.original_price = Some(price);
        }
        if let Some(price) = self.selling_price {
            coupon.selling_price = price;
        }
        if self.coupon_code.is_some() {
            coupon.coupon_code = clean(self.coupon_code);
        }
        if let Some(terms) = self.terms {
            coupon.terms = Some(terms);
        }
        if let Some(expiry) = self.expiry_date {
            coupon.expiry_date = expiry;
        }
        if let Some(image) = self.image {
            coupon.image = image;
        }
        Ok(())
    }
}
