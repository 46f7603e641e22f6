use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    plan::{BillingInterval, PlanTier},
    subscription::SubscriptionStatus,
    user::User,
};

pub struct NewUser<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub password_hash: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerIdWrite {
    Stored,
    /// Another writer got there first; carries the id already on record.
    Existing(String),
}

/// Full replacement of the subscription-derived columns, applied only when the stored
/// `subscription_state_at` is not newer than `state_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStateUpdate {
    pub plan: PlanTier,
    pub billing_interval: Option<BillingInterval>,
    pub subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub past_due_since: Option<i64>,
    pub state_at: i64,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn is_email_taken(&self, email: &str) -> Result<bool, sqlx::Error>;
    async fn create_user(&self, new_user: NewUser<'_>) -> Result<User, sqlx::Error>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error>;
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error>;
    async fn find_user_id_by_stripe_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error>;
    async fn set_stripe_customer_id_if_absent(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<CustomerIdWrite, sqlx::Error>;
    async fn update_user_plan(
        &self,
        user_id: Uuid,
        plan: PlanTier,
        billing_interval: Option<BillingInterval>,
    ) -> Result<(), sqlx::Error>;
    /// Returns `false` when a newer state is already stored.
    async fn apply_subscription_state(
        &self,
        user_id: Uuid,
        update: &SubscriptionStateUpdate,
    ) -> Result<bool, sqlx::Error>;
}
