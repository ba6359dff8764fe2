use crate::lifecycle::CouponStatus;
use crate::types::Amount;

/// Every variant's message is what callers show to the user.
#[derive(thiserror::Error, Debug)]
pub enum MarketError {
    #[error("{0}")]
    Validation(String),
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: Amount,
        min: Amount,
        max: Amount,
    },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Insufficient wallet balance")]
    InsufficientFunds { available: Amount, required: Amount },
    #[error("{0}")]
    InvalidState(String),
    #[error("Coupon cannot move from {from} to {to}")]
    InvalidStateTransition {
        from: CouponStatus,
        to: CouponStatus,
    },
    #[error("You cannot buy your own coupon")]
    SelfTrade,
    #[error("This coupon is available for exchange only")]
    ExchangeOnly,
    #[error("{0}")]
    Unauthorized(String),
    #[error("{service} unavailable: {reason}")]
    DependencyUnavailable {
        service: &'static str,
        reason: String,
    },
    #[error("Payment failed: {0}")]
    PaymentFailed(String),
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("Record encoding error: {0}")]
    Codec(String),
}

impl MarketError {
    pub fn validation(msg: impl Into<String>) -> Self {
        MarketError::Validation(msg.into())
    }

    /// Input rejected before any state was touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MarketError::Validation(_) | MarketError::OutOfRange { .. }
        )
    }

    pub fn unavailable(service: &'static str, reason: impl ToString) -> Self {
        MarketError::DependencyUnavailable {
            service,
            reason: reason.to_string(),
        }
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for MarketError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        MarketError::Codec(value.to_string())
    }
}

impl From<minicbor::decode::Error> for MarketError {
    fn from(value: minicbor::decode::Error) -> Self {
        MarketError::Codec(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;
