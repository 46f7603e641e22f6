use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    None,
    Active,
    PastDue,
    Canceled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::None => "none",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Maps a Stripe subscription status. `incomplete` carries no state change and maps
    /// to `None`.
    pub fn from_stripe(raw: &str) -> Option<Self> {
        match raw {
            "active" | "trialing" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "unpaid" | "incomplete_expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }

    /// Whether this status grants the paid plan recorded alongside it.
    pub fn grants_paid_plan(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::PastDue)
    }

    /// `past_due` is only reachable from a live subscription; every other target is
    /// reachable from anywhere (resubscribe, late deletion after expiry, ...).
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        match next {
            SubscriptionStatus::PastDue => matches!(
                self,
                SubscriptionStatus::Active | SubscriptionStatus::PastDue
            ),
            SubscriptionStatus::None => matches!(self, SubscriptionStatus::None),
            _ => true,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown subscription status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for SubscriptionStatus {
    type Err = UnknownStatus;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "none" | "" => Ok(SubscriptionStatus::None),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SubscriptionStatus::*;
    use super::*;

    #[test]
    fn stripe_statuses_collapse_onto_local_states() {
        assert_eq!(SubscriptionStatus::from_stripe("trialing"), Some(Active));
        assert_eq!(SubscriptionStatus::from_stripe("unpaid"), Some(Expired));
        assert_eq!(
            SubscriptionStatus::from_stripe("incomplete_expired"),
            Some(Expired)
        );
        assert_eq!(SubscriptionStatus::from_stripe("incomplete"), Option::None);
    }

    #[test]
    fn past_due_requires_a_live_subscription() {
        assert!(Active.can_transition_to(PastDue));
        assert!(PastDue.can_transition_to(PastDue));
        assert!(!None.can_transition_to(PastDue));
        assert!(!Canceled.can_transition_to(PastDue));
        assert!(!Expired.can_transition_to(PastDue));
    }

    #[test]
    fn resubscribe_is_allowed_from_terminal_states() {
        assert!(Canceled.can_transition_to(Active));
        assert!(Expired.can_transition_to(Active));
        assert!(!Active.can_transition_to(None));
    }
}
