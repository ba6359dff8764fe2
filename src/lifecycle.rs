//! Coupon lifecycle state machine
use crate::error::{MarketError, Result};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CouponStatus {
    #[n(0)]
    PendingApproval,
    #[n(1)]
    Active,
    #[n(2)]
    Sold,
    #[n(3)]
    Used,
    #[n(4)]
    Expired,
    #[n(5)]
    Rejected,
}

impl CouponStatus {
    pub const ALL: [CouponStatus; 6] = [
        CouponStatus::PendingApproval,
        CouponStatus::Active,
        CouponStatus::Sold,
        CouponStatus::Used,
        CouponStatus::Expired,
        CouponStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CouponStatus::PendingApproval => "pending_approval",
            CouponStatus::Active => "active",
            CouponStatus::Sold => "sold",
            CouponStatus::Used => "used",
            CouponStatus::Expired => "expired",
            CouponStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CouponStatus::Expired | CouponStatus::Used | CouponStatus::Rejected
        )
    }

    pub fn can_transition(&self, to: CouponStatus) -> bool {
        use CouponStatus::*;

        matches!(
            (self, to),
            (Active, Sold)
                | (Active, Expired)
                | (Sold, Used)
                | (PendingApproval, Active)
                | (PendingApproval, Rejected)
        )
    }

    /// Returns the new status, or `InvalidStateTransition` for anything off the table.
    pub fn transition(self, to: CouponStatus) -> Result<CouponStatus> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(MarketError::InvalidStateTransition { from: self, to })
        }
    }
}

impl std::fmt::Display for CouponStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CouponStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        CouponStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| MarketError::validation(format!("Unknown coupon status '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        assert_eq!(
            CouponStatus::Active.transition(CouponStatus::Sold).unwrap(),
            CouponStatus::Sold
        );
        assert!(CouponStatus::Sold.transition(CouponStatus::Used).is_ok());
        assert!(CouponStatus::Active.transition(CouponStatus::Expired).is_ok());
        assert!(
            CouponStatus::PendingApproval
                .transition(CouponStatus::Rejected)
                .is_ok()
        );
    }

    #[test]
    fn terminal_states_go_nowhere() {
        for from in CouponStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for to in CouponStatus::ALL {
                assert!(matches!(
                    from.transition(to),
                    Err(MarketError::InvalidStateTransition { .. })
                ));
            }
        }
    }

    #[test]
    fn sold_cannot_be_resold_or_expired() {
        assert!(CouponStatus::Sold.transition(CouponStatus::Sold).is_err());
        assert!(CouponStatus::Sold.transition(CouponStatus::Expired).is_err());
        assert!(CouponStatus::Active.transition(CouponStatus::Used).is_err());
        assert!(!CouponStatus::Sold.is_terminal());
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!(
            "pending_approval".parse::<CouponStatus>().unwrap(),
            CouponStatus::PendingApproval
        );
        assert!("archived".parse::<CouponStatus>().is_err());
    }
}
