//! Shared value types: timestamps, money, payment methods and pagination
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Whole currency units. Balances are unsigned so they can never go negative.
pub type Amount = u64;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// `Utc` itself is not `Ord`, so ordering can't be derived.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Into::into)
    }
    /// Now shifted by a signed number of days, handy for expiry dates.
    pub fn days_from_now(days: i64) -> Self {
        Self(Utc::now() + Duration::days(days))
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn nanos(&self) -> i64 {
        self.0.timestamp_nanos_opt().unwrap_or(i64::MAX)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PaymentMethod {
    #[n(0)]
    Wallet,
    #[n(1)]
    #[default]
    Upi,
    #[n(2)]
    Card,
    #[n(3)]
    NetBanking,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Card => "card",
            PaymentMethod::NetBanking => "netbanking",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pagination request. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: usize,
    pub limit: usize,
}

impl Page {
    pub const MAX_LIMIT: usize = 100;

    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Paginated<T> {
    /// Slice an already ordered result set down to the requested page.
    pub fn from_items(items: Vec<T>, page: Page) -> Self {
        let page = Page::new(page.page, page.limit);
        let total = items.len();
        let skip = (page.page - 1).saturating_mul(page.limit);

        let items: Vec<T> = items.into_iter().skip(skip).take(page.limit).collect();

        Self {
            items,
            current_page: page.page,
            total_pages: total.div_ceil(page.limit),
            total,
            has_next: page.page * page.limit < total,
            has_prev: page.page > 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn timestamps_order_by_instant() {
        let early = TimeStamp::new_with(2030, 1, 1, 0, 0, 0).unwrap();
        let late = TimeStamp::new_with(2030, 1, 1, 0, 0, 1).unwrap();

        assert!(early < late);
        assert!(late >= early);
        assert_eq!(early.cmp(&early.clone()), std::cmp::Ordering::Equal);

        let mut stamps = vec![late.clone(), early.clone()];
        stamps.sort();
        assert_eq!(stamps, vec![early, late]);
    }

    #[test]
    fn rejects_impossible_dates() {
        assert!(TimeStamp::new_with(2024, 2, 30, 0, 0, 0).is_none());
        assert!(TimeStamp::new_with(2024, 2, 29, 0, 0, 0).is_some());
    }

    #[test]
    fn paginates_with_flags() {
        let items: Vec<u32> = (0..45).collect();

        let first = Paginated::from_items(items.clone(), Page::new(1, 20));
        assert_eq!(first.items.len(), 20);
        assert_eq!(first.total_pages, 3);
        assert!(first.has_next);
        assert!(!first.has_prev);

        let last = Paginated::from_items(items, Page::new(3, 20));
        assert_eq!(last.items, (40..45).collect::<Vec<_>>());
        assert!(!last.has_next);
        assert!(last.has_prev);
    }

    #[test]
    fn page_is_clamped() {
        let page = Page::new(0, 1_000);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, Page::MAX_LIMIT);
    }
}
