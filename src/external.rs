//! Seams for the services the marketplace relies on but does not implement:
//! image hosting, OCR and payment settlement.
use crate::error::{MarketError, Result};
use crate::types::{Amount, PaymentMethod};
use crate::utils;

pub trait ImageStore: Send + Sync {
    /// Persist the image and return a stable URL.
    fn store(&self, bytes: &[u8]) -> Result<String>;
}

pub trait TextRecognizer: Send + Sync {
    /// Raw text found in an image.
    fn recognize(&self, bytes: &[u8]) -> Result<String>;
}

pub trait PaymentGateway: Send + Sync {
    /// Collect `amount` from the user's external instrument. Returns the gateway reference.
    ///
    /// `attempt_id` is the pending ledger entry's id. Gateways must treat it as
    /// an idempotency key so a retried attempt is never charged twice.
    fn charge(
        &self,
        attempt_id: &str,
        user_id: &str,
        amount: Amount,
        method: PaymentMethod,
    ) -> Result<String>;
}

/// Hands out placeholder URLs, used when no real image host is configured and
/// as the fallback when the real one fails.
#[derive(Debug, Clone)]
pub struct PlaceholderImageStore {
    base_url: String,
}

impl PlaceholderImageStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Deterministic per image so re-uploads of the same bytes map to one URL.
    pub fn url_for(&self, bytes: &[u8]) -> String {
        let seed = &sha256::digest(bytes)[..8];
        format!("{}/seed/{seed}/800/600", self.base_url.trim_end_matches('/'))
    }
}

impl ImageStore for PlaceholderImageStore {
    fn store(&self, bytes: &[u8]) -> Result<String> {
        Ok(self.url_for(bytes))
    }
}

/// Approves every charge immediately.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway;

impl PaymentGateway for SimulatedGateway {
    fn charge(
        &self,
        attempt_id: &str,
        user_id: &str,
        amount: Amount,
        method: PaymentMethod,
    ) -> Result<String> {
        let reference = utils::new_id("pay_")?;
        tracing::debug!(%attempt_id, %user_id, amount, %method, %reference, "simulated charge approved");
        Ok(reference)
    }
}

/// Stand-in for deployments without OCR; auto-fill is skipped.
#[derive(Debug, Clone, Default)]
pub struct NoTextRecognizer;

impl TextRecognizer for NoTextRecognizer {
    fn recognize(&self, _bytes: &[u8]) -> Result<String> {
        Err(MarketError::unavailable("ocr", "no text recognizer configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_urls_are_stable() {
        let store = PlaceholderImageStore::new("https://picsum.photos/");
        let a = store.store(b"coupon image").unwrap();
        let b = store.store(b"coupon image").unwrap();
        let c = store.store(b"other image").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("https://picsum.photos/seed/"));
        assert!(a.ends_with("/800/600"));
    }

    #[test]
    fn simulated_gateway_issues_references() {
        let gateway = SimulatedGateway;
        let reference = gateway
            .charge("txn_1", "user_1", 500, PaymentMethod::Card)
            .unwrap();
        assert!(reference.starts_with("pay_"));
    }
}
