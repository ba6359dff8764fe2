//! Success flag plus human-readable message, the envelope every caller sees.
use crate::error::MarketError;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Failures carry the specific precondition message, never a generic one.
    pub fn fail(err: &MarketError) -> Self {
        match err {
            MarketError::Storage(_) | MarketError::Codec(_) => {
                tracing::error!(error = %err, "internal failure");
            }
            _ => tracing::debug!(error = %err, "request rejected"),
        }

        Self {
            success: false,
            message: err.to_string(),
            data: None,
        }
    }

    pub fn from_result(result: Result<T, MarketError>, success_message: &str) -> Self {
        match result {
            Ok(data) => Self::ok(success_message, data),
            Err(err) => Self::fail(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_keeps_specific_message() {
        let res: ApiResponse<()> = ApiResponse::from_result(
            Err(MarketError::InsufficientFunds {
                available: 10,
                required: 600,
            }),
            "Coupon purchased successfully",
        );

        assert!(!res.success);
        assert_eq!(res.message, "Insufficient wallet balance");
        assert!(res.data.is_none());
    }

    #[test]
    fn success_carries_data() {
        let res = ApiResponse::from_result(Ok(400u64), "Money added successfully");
        assert!(res.success);
        assert_eq!(res.data, Some(400));
    }
}
