use crate::types::Amount;
use anyhow::Context;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub db_path: PathBuf,
    pub topup_min: Amount,
    pub topup_max: Amount,
    /// Upper bound on any call into image storage, OCR or payments. Email is
    /// sent in the background and never waited on.
    pub external_timeout: Duration,
    pub placeholder_image_url: String,
    /// New listings wait in `pending_approval` until reviewed.
    pub moderation_enabled: bool,
    pub mail_from: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("coupon-ledger.db"),
            topup_min: 100,
            topup_max: 50_000,
            external_timeout: Duration::from_secs(5),
            placeholder_image_url: "https://picsum.photos".to_string(),
            moderation_enabled: false,
            mail_from: "noreply@coupon-ledger.local".to_string(),
        }
    }
}

fn var_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key).ok().filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw}")),
        None => Ok(default),
    }
}

impl MarketConfig {
    /// Reads `COUPON_LEDGER_*` variables, falling back to the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let config = Self {
            db_path: var_or("COUPON_LEDGER_DB_PATH", defaults.db_path)?,
            topup_min: var_or("COUPON_LEDGER_TOPUP_MIN", defaults.topup_min)?,
            topup_max: var_or("COUPON_LEDGER_TOPUP_MAX", defaults.topup_max)?,
            external_timeout: Duration::from_millis(var_or(
                "COUPON_LEDGER_EXTERNAL_TIMEOUT_MS",
                defaults.external_timeout.as_millis() as u64,
            )?),
            placeholder_image_url: var_or(
                "COUPON_LEDGER_PLACEHOLDER_IMAGE_URL",
                defaults.placeholder_image_url,
            )?,
            moderation_enabled: var_or("COUPON_LEDGER_MODERATION", defaults.moderation_enabled)?,
            mail_from: var_or("COUPON_LEDGER_MAIL_FROM", defaults.mail_from)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.topup_min == 0 || self.topup_min > self.topup_max {
            anyhow::bail!(
                "top-up bounds must satisfy 0 < min <= max, got [{}, {}]",
                self.topup_min,
                self.topup_max
            );
        }
        if self.external_timeout.is_zero() {
            anyhow::bail!("external timeout must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wallet_limits() {
        let config = MarketConfig::default();
        assert_eq!(config.topup_min, 100);
        assert_eq!(config.topup_max, 50_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let config = MarketConfig {
            topup_min: 500,
            topup_max: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
