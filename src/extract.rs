//! Pattern matching over OCR text to pre-fill a listing form.
//!
//! Output is advisory only. Nothing here is trusted for validation; the
//! seller can override every field before the draft is finalised.
use crate::coupon::CouponDraft;
use crate::error::{MarketError, Result};
use crate::types::{Amount, TimeStamp};
use chrono::{NaiveDate, Utc};
use regex::Regex;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractedFields {
    pub title: Option<String>,
    pub brand: Option<String>,
    pub description: Option<String>,
    pub discount_percentage: Option<u8>,
    pub original_price: Option<Amount>,
    pub coupon_code: Option<String>,
    pub expiry_text: Option<String>, // as printed on the coupon
    pub expiry_date: Option<TimeStamp<Utc>>,
    pub terms: Option<String>,
}

impl ExtractedFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Seeds a draft with whatever was recognised.
    pub fn into_draft(self) -> CouponDraft {
        let mut draft = CouponDraft::new();
        if let Some(title) = &self.title {
            draft = draft.set_title(title);
        }
        if let Some(brand) = &self.brand {
            draft = draft.set_brand(brand);
        }
        if let Some(description) = &self.description {
            draft = draft.set_description(description);
        }
        if let Some(pct) = self.discount_percentage {
            draft = draft.set_discount_percentage(pct);
        }
        if let Some(price) = self.original_price {
            draft = draft.set_original_price(price);
        }
        if let Some(code) = &self.coupon_code {
            draft = draft.set_coupon_code(code);
        }
        if let Some(date) = self.expiry_date {
            draft = draft.set_expiry_date(date);
        }
        if let Some(terms) = &self.terms {
            draft = draft.set_terms(terms);
        }
        draft
    }
}

/// Rough check that an image's text looks like a coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextAssessment {
    pub is_coupon_like: bool,
    pub confidence: u8,
}

pub struct Extractor {
    discount: Regex,
    price: Regex,
    keyed_code: Regex,
    bare_code: Regex,
    numeric_date: Regex,
    iso_date: Regex,
    month_date: Regex,
    brand_line: Regex,
    terms_line: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| MarketError::Codec(e.to_string()))
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let prefix = name.get(..3)?.to_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|i| i as u32 + 1)
}

fn expand_year(year: i32) -> i32 {
    if year < 100 { 2000 + year } else { year }
}

fn end_of_day(date: NaiveDate) -> Option<TimeStamp<Utc>> {
    date.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc().into())
}

impl Extractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            discount: compile(r"(?i)(\d{1,3})\s*%?\s*(?:off|discount|percent)")?,
            price: compile(r"(?i)(?:₹|\$|\brs\.?|\binr)\s*(\d+(?:,\d{3})*(?:\.\d{1,2})?)")?,
            keyed_code: compile(r"(?i:code|coupon)\s*:?\s*([A-Z0-9]{4,15})\b")?,
            bare_code: compile(r"\b([A-Z0-9]{4,15})\b")?,
            numeric_date: compile(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{2,4})\b")?,
            iso_date: compile(r"\b(\d{4})[/-](\d{1,2})[/-](\d{1,2})\b")?,
            month_date: compile(
                r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2}),?\s+(\d{4})\b",
            )?,
            brand_line: compile(r"^[A-Z][A-Za-z\s&'-]+$")?,
            terms_line: compile(r"(?i)valid|terms|conditions|applicable|minimum|maximum")?,
        })
    }

    pub fn extract(&self, text: &str) -> ExtractedFields {
        let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let mut fields = ExtractedFields {
            discount_percentage: self
                .discount
                .captures(&flat)
                .and_then(|c| c[1].parse::<u8>().ok())
                .filter(|pct| *pct <= 100),
            original_price: self.price.captures(&flat).and_then(|c| {
                let whole = c[1].replace(',', "");
                whole.split('.').next()?.parse::<Amount>().ok()
            }),
            coupon_code: self.coupon_code(&flat),
            brand: lines
                .iter()
                .find(|l| l.len() > 2 && l.len() < 30 && self.brand_line.is_match(l))
                .map(|l| l.to_string()),
            description: lines
                .iter()
                .find(|l| l.len() > 20 && l.len() < 200)
                .map(|l| l.to_string()),
            ..Default::default()
        };

        if let Some((raw, date)) = self.expiry(&flat) {
            fields.expiry_text = Some(raw);
            fields.expiry_date = date;
        }

        fields.title = match (fields.discount_percentage, &fields.brand) {
            (Some(pct), Some(brand)) => Some(format!("{pct}% off at {brand}")),
            (Some(pct), None) => Some(format!("{pct}% Discount Coupon")),
            _ => lines.first().map(|l| l.chars().take(50).collect()),
        };

        let terms: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|l| self.terms_line.is_match(l))
            .collect();
        if !terms.is_empty() {
            fields.terms = Some(terms.join(". "));
        }

        fields
    }

    // A keyword-led code wins; otherwise the first upper-case token mixing letters and digits.
    fn coupon_code(&self, flat: &str) -> Option<String> {
        if let Some(c) = self.keyed_code.captures(flat) {
            return Some(c[1].to_uppercase());
        }
        self.bare_code
            .captures_iter(flat)
            .map(|c| c[1].to_string())
            .find(|token| {
                token.chars().any(|ch| ch.is_ascii_digit())
                    && token.chars().any(|ch| ch.is_ascii_alphabetic())
            })
    }

    fn expiry(&self, flat: &str) -> Option<(String, Option<TimeStamp<Utc>>)> {
        if let Some(c) = self.numeric_date.captures(flat) {
            let date = match (c[1].parse::<u32>(), c[2].parse::<u32>(), c[3].parse::<i32>()) {
                (Ok(day), Ok(month), Ok(year)) => {
                    NaiveDate::from_ymd_opt(expand_year(year), month, day)
                }
                _ => None,
            };
            return Some((c[0].to_string(), date.and_then(end_of_day)));
        }
        if let Some(c) = self.iso_date.captures(flat) {
            let date = match (c[1].parse::<i32>(), c[2].parse::<u32>(), c[3].parse::<u32>()) {
                (Ok(year), Ok(month), Ok(day)) => NaiveDate::from_ymd_opt(year, month, day),
                _ => None,
            };
            return Some((c[0].to_string(), date.and_then(end_of_day)));
        }
        if let Some(c) = self.month_date.captures(flat) {
            let date = match (month_number(&c[1]), c[2].parse::<u32>(), c[3].parse::<i32>()) {
                (Some(month), Ok(day), Ok(year)) => NaiveDate::from_ymd_opt(year, month, day),
                _ => None,
            };
            return Some((c[0].to_string(), date.and_then(end_of_day)));
        }
        None
    }

    pub fn assess(&self, text: &str) -> TextAssessment {
        let words = text.split_whitespace().filter(|w| w.chars().count() > 2).count();
        let has_numbers = text.chars().any(|c| c.is_ascii_digit());
        let has_percentage = text.contains('%');

        TextAssessment {
            is_coupon_like: words > 3 && (has_numbers || has_percentage),
            confidence: (words * 10).min(100) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    const SAMPLE: &str = "PIZZA HUT\n\
        Get 40% OFF on all large pizzas this weekend\n\
        Worth Rs. 1,200\n\
        Use code: PIZZA40 at checkout\n\
        Valid till 31/12/2030\n\
        Terms and conditions apply";

    #[test]
    fn extracts_common_fields() {
        let fields = Extractor::new().unwrap().extract(SAMPLE);

        assert_eq!(fields.discount_percentage, Some(40));
        assert_eq!(fields.original_price, Some(1200));
        assert_eq!(fields.coupon_code.as_deref(), Some("PIZZA40"));
        assert_eq!(fields.brand.as_deref(), Some("PIZZA HUT"));
        assert_eq!(fields.title.as_deref(), Some("40% off at PIZZA HUT"));
        assert_eq!(fields.expiry_text.as_deref(), Some("31/12/2030"));

        let expiry = fields.expiry_date.unwrap().to_datetime_utc();
        assert_eq!((expiry.year(), expiry.month(), expiry.day()), (2030, 12, 31));

        let terms = fields.terms.unwrap();
        assert!(terms.contains("Valid till"));
        assert!(terms.contains("Terms and conditions apply"));
    }

    #[test]
    fn parses_month_names() {
        let fields = Extractor::new()
            .unwrap()
            .extract("Flat 15% discount\nExpires March 5, 2031");

        let expiry = fields.expiry_date.unwrap().to_datetime_utc();
        assert_eq!((expiry.year(), expiry.month(), expiry.day()), (2031, 3, 5));
        assert_eq!(fields.title.as_deref(), Some("15% Discount Coupon"));
    }

    #[test]
    fn falls_back_to_first_line_title() {
        let fields = Extractor::new().unwrap().extract("free coffee with any breakfast");
        assert_eq!(fields.title.as_deref(), Some("free coffee with any breakfast"));
        assert_eq!(fields.discount_percentage, None);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(Extractor::new().unwrap().extract("").is_empty());
    }

    #[test]
    fn assessment_needs_words_and_numbers() {
        let extractor = Extractor::new().unwrap();
        assert!(extractor.assess(SAMPLE).is_coupon_like);
        assert!(!extractor.assess("blurry photo").is_coupon_like);
        assert_eq!(extractor.assess("").confidence, 0);
    }
}
