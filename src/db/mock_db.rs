use crate::models::plan::{BillingInterval, PlanTier};
use crate::models::user::User;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use super::user_repository::{CustomerIdWrite, NewUser, SubscriptionStateUpdate, UserRepository};

#[derive(Default)]
pub struct MockDb {
    pub users: Mutex<HashMap<Uuid, User>>,
    pub should_fail: bool,
    pub fail_lookups_by_id: bool,
    /// Runs once, right after the next `find_user_by_id` has read its row.
    pub after_lookup_by_id: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    pub update_user_plan_calls: Mutex<usize>,
    pub customer_id_writes: Mutex<usize>,
    pub subscription_writes: Mutex<usize>,
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn seed_user(&self, email: &str, name: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.to_string(),
            password_hash: String::new(),
            plan: Some("free".into()),
            billing_interval: None,
            stripe_customer_id: None,
            subscription_id: None,
            subscription_status: Some("none".into()),
            subscription_state_at: None,
            past_due_since: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.insert_user(user.clone());
        user
    }

    pub fn insert_user(&self, user: User) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    pub fn user(&self, user_id: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&user_id).cloned()
    }

    fn fail_if_configured(&self) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MockDb {
    async fn is_email_taken(&self, email: &str) -> Result<bool, sqlx::Error> {
        self.fail_if_configured()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(email)))
    }

    async fn create_user(&self, new_user: NewUser<'_>) -> Result<User, sqlx::Error> {
        self.fail_if_configured()?;
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email.to_string(),
            name: new_user.name.to_string(),
            password_hash: new_user.password_hash.to_string(),
            plan: Some("free".into()),
            billing_interval: None,
            stripe_customer_id: None,
            subscription_id: None,
            subscription_status: Some("none".into()),
            subscription_state_at: None,
            past_due_since: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.insert_user(user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        self.fail_if_configured()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        self.fail_if_configured()?;
        if self.fail_lookups_by_id {
            return Err(sqlx::Error::Protocol("Mock DB lookup failure".into()));
        }
        let user = self.user(user_id);
        let hook = self.after_lookup_by_id.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(user)
    }

    async fn find_user_id_by_stripe_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        self.fail_if_configured()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.stripe_customer_id.as_deref() == Some(customer_id))
            .map(|u| u.id))
    }

    async fn set_stripe_customer_id_if_absent(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<CustomerIdWrite, sqlx::Error> {
        self.fail_if_configured()?;
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(sqlx::Error::RowNotFound)?;
        match &user.stripe_customer_id {
            Some(existing) => Ok(CustomerIdWrite::Existing(existing.clone())),
            None => {
                user.stripe_customer_id = Some(customer_id.to_string());
                *self.customer_id_writes.lock().unwrap() += 1;
                Ok(CustomerIdWrite::Stored)
            }
        }
    }

    async fn update_user_plan(
        &self,
        user_id: Uuid,
        plan: PlanTier,
        billing_interval: Option<BillingInterval>,
    ) -> Result<(), sqlx::Error> {
        self.fail_if_configured()?;
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(sqlx::Error::RowNotFound)?;
        user.plan = Some(plan.as_str().to_string());
        user.billing_interval = billing_interval.map(|i| i.as_str().to_string());
        *self.update_user_plan_calls.lock().unwrap() += 1;
        Ok(())
    }

    async fn apply_subscription_state(
        &self,
        user_id: Uuid,
        update: &SubscriptionStateUpdate,
    ) -> Result<bool, sqlx::Error> {
        self.fail_if_configured()?;
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.get_mut(&user_id) else {
            return Ok(false);
        };
        if user
            .subscription_state_at
            .is_some_and(|stored| stored > update.state_at)
        {
            return Ok(false);
        }
        user.plan = Some(update.plan.as_str().to_string());
        user.billing_interval = update.billing_interval.map(|i| i.as_str().to_string());
        user.subscription_id = update.subscription_id.clone();
        user.subscription_status = Some(update.status.as_str().to_string());
        user.past_due_since = update.past_due_since;
        user.subscription_state_at = Some(update.state_at);
        *self.subscription_writes.lock().unwrap() += 1;
        Ok(true)
    }
}
