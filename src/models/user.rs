use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::plan::{BillingInterval, PlanTier};
use crate::models::subscription::SubscriptionStatus;

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub plan: Option<String>,
    pub billing_interval: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub subscription_status: Option<String>,
    pub subscription_state_at: Option<i64>,
    pub past_due_since: Option<i64>,
    pub created_at: time::OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("user {user_id} has invalid stored {field}: {value}")]
pub struct DataIntegrityError {
    pub user_id: Uuid,
    pub field: &'static str,
    pub value: String,
}

/// The billing view of a user row. A missing plan column reads as `free`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanAssignment {
    pub plan: PlanTier,
    pub billing_interval: Option<BillingInterval>,
    pub subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    #[serde(skip_serializing)]
    pub state_at: Option<i64>,
    #[serde(skip_serializing)]
    pub past_due_since: Option<i64>,
}

impl Default for PlanAssignment {
    fn default() -> Self {
        Self {
            plan: PlanTier::Free,
            billing_interval: None,
            subscription_id: None,
            status: SubscriptionStatus::None,
            state_at: None,
            past_due_since: None,
        }
    }
}

impl User {
    pub fn plan_assignment(&self) -> Result<PlanAssignment, DataIntegrityError> {
        let invalid = |field: &'static str, value: &str| DataIntegrityError {
            user_id: self.id,
            field,
            value: value.to_string(),
        };

        let plan = match self.plan.as_deref() {
            None => PlanTier::Free,
            Some(raw) => raw.parse().map_err(|_| invalid("plan", raw))?,
        };
        let billing_interval = match self.billing_interval.as_deref() {
            None => None,
            Some(raw) => Some(raw.parse().map_err(|_| invalid("billing_interval", raw))?),
        };
        let status = match self.subscription_status.as_deref() {
            None => SubscriptionStatus::None,
            Some(raw) => raw
                .parse()
                .map_err(|_| invalid("subscription_status", raw))?,
        };

        Ok(PlanAssignment {
            plan,
            billing_interval,
            subscription_id: self.subscription_id.clone(),
            status,
            state_at: self.subscription_state_at,
            past_due_since: self.past_due_since,
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub has_billing_account: bool,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            has_billing_account: user.stripe_customer_id.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn user_with_plan(plan: Option<&str>) -> User {
        User {
            id: Uuid::new_v4(),
            email: "ada@example.com".into(),
            name: "Ada".into(),
            password_hash: String::new(),
            plan: plan.map(str::to_string),
            billing_interval: None,
            stripe_customer_id: None,
            subscription_id: None,
            subscription_status: None,
            subscription_state_at: None,
            past_due_since: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn missing_plan_reads_as_free() {
        let assignment = user_with_plan(None).plan_assignment().unwrap();
        assert_eq!(assignment, PlanAssignment::default());
    }

    #[test]
    fn unknown_stored_plan_is_an_integrity_error() {
        let user = user_with_plan(Some("enterprise"));
        let err = user.plan_assignment().unwrap_err();
        assert_eq!(err.field, "plan");
        assert_eq!(err.value, "enterprise");
        assert_eq!(err.user_id, user.id);
    }

    #[test]
    fn public_user_hides_customer_id() {
        let mut user = user_with_plan(Some("pro"));
        user.stripe_customer_id = Some("cus_123".into());
        let public = PublicUser::from(&user);
        let json = serde_json::to_value(&public).unwrap();
        assert_eq!(json["has_billing_account"], true);
        assert!(json.get("stripe_customer_id").is_none());
        assert!(json.get("password_hash").is_none());
    }
}
