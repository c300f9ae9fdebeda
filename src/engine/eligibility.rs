//! Take-eligibility evaluation.
//!
//! One rule decides whether a third party may take a position, and both the
//! owner's listing and the scanner go through it:
//!
//! ```text
//! take_deadline_expired = deadline > 0 && deadline < now
//! can_owner_close       = true
//! can_others_take       = expect_profit > 0 && (deadline == 0 || deadline > now)
//! ```
//!
//! A deadline equal to `now` is neither expired nor takeable.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::amount::Amount;
use crate::types::{Deadline, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TakeStatus {
    /// Third parties may take it now.
    Open,
    /// The take window has closed.
    Expired,
    /// Live, but not offered to takers (no profit set, or deadline is now).
    Active,
}

impl fmt::Display for TakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TakeStatus::Open => write!(f, "Open"),
            TakeStatus::Expired => write!(f, "Expired"),
            TakeStatus::Active => write!(f, "Active"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub take_deadline_expired: bool,
    pub can_owner_close: bool,
    pub can_others_take: bool,
}

impl Eligibility {
    pub fn status(&self) -> TakeStatus {
        if self.can_others_take {
            TakeStatus::Open
        } else if self.take_deadline_expired {
            TakeStatus::Expired
        } else {
            TakeStatus::Active
        }
    }

    /// Why a third party cannot take, or `None` when it can.
    pub fn rejection(&self) -> Option<&'static str> {
        if self.can_others_take {
            None
        } else if self.take_deadline_expired {
            Some("take deadline has passed")
        } else {
            Some("no expected profit offered or deadline is now")
        }
    }
}

pub fn evaluate_eligibility(deadline: Deadline, expect_profit: &Amount, now: i64) -> Eligibility {
    Eligibility {
        take_deadline_expired: deadline.has_passed(now),
        can_owner_close: true,
        can_others_take: !expect_profit.is_zero() && deadline.is_open_at(now),
    }
}

/// Eligibility of a position read from a vault.
pub fn evaluate_position(position: &Position, now: i64) -> Eligibility {
    evaluate_eligibility(position.deadline, &position.expect_profit, now)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_750_000_000;

    fn profit(raw: u128) -> Amount {
        Amount::new(raw, 6)
    }

    #[test]
    fn test_no_deadline_with_profit_is_open() {
        let e = evaluate_eligibility(Deadline::None, &profit(10_000_000), T);
        assert!(e.can_others_take);
        assert!(!e.take_deadline_expired);
        assert!(e.can_owner_close);
        assert_eq!(e.status(), TakeStatus::Open);
        assert_eq!(e.rejection(), None);
    }

    #[test]
    fn test_past_deadline_is_expired() {
        let e = evaluate_eligibility(Deadline::At(T - 100), &profit(10_000_000), T);
        assert!(e.take_deadline_expired);
        assert!(!e.can_others_take);
        assert!(e.can_owner_close);
        assert_eq!(e.status(), TakeStatus::Expired);
    }

    #[test]
    fn test_future_deadline_is_open() {
        let e = evaluate_eligibility(Deadline::At(T + 3_600), &profit(1), T);
        assert!(e.can_others_take);
        assert!(!e.take_deadline_expired);
    }

    #[test]
    fn test_deadline_equal_to_now() {
        let e = evaluate_eligibility(Deadline::At(T), &profit(10_000_000), T);
        assert!(!e.take_deadline_expired);
        assert!(!e.can_others_take);
        assert_eq!(e.status(), TakeStatus::Active);
    }

    #[test]
    fn test_zero_profit_never_takeable() {
        for deadline in [Deadline::None, Deadline::At(T + 10), Deadline::At(T - 10)] {
            let e = evaluate_eligibility(deadline, &profit(0), T);
            assert!(!e.can_others_take, "deadline {deadline:?}");
            assert!(e.can_owner_close);
        }
    }

    #[test]
    fn test_no_deadline_never_expires() {
        for now in [0, T, i64::MAX] {
            assert!(!evaluate_eligibility(Deadline::None, &profit(5), now).take_deadline_expired);
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&TakeStatus::Expired).unwrap(), "\"expired\"");
    }
}
