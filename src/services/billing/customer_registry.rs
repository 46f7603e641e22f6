use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::db::user_repository::{CustomerIdWrite, UserRepository};
use crate::models::user::User;
use crate::services::stripe::{CreateCustomerRequest, StripeService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerOutcome {
    Created(String),
    AlreadyExists(String),
    Skipped(&'static str),
    Failed(String),
}

impl CustomerOutcome {
    pub fn customer_id(&self) -> Option<&str> {
        match self {
            CustomerOutcome::Created(id) | CustomerOutcome::AlreadyExists(id) => Some(id),
            CustomerOutcome::Skipped(_) | CustomerOutcome::Failed(_) => None,
        }
    }
}

/// Keeps each user mapped to exactly one Stripe customer.
#[derive(Clone)]
pub struct CustomerRegistry {
    users: Arc<dyn UserRepository>,
    stripe: Option<Arc<dyn StripeService>>,
    timeout: Duration,
}

impl CustomerRegistry {
    pub fn new(
        users: Arc<dyn UserRepository>,
        stripe: Option<Arc<dyn StripeService>>,
        timeout: Duration,
    ) -> Self {
        Self {
            users,
            stripe,
            timeout,
        }
    }

    /// Never returns an error: callers on the signup path must not fail because billing is
    /// unavailable, and checkout turns a non-customer outcome into its own error.
    pub async fn ensure_customer(&self, user: &User) -> CustomerOutcome {
        if let Some(existing) = user.stripe_customer_id.as_deref() {
            return CustomerOutcome::AlreadyExists(existing.to_string());
        }
        let Some(stripe) = self.stripe.as_ref() else {
            return CustomerOutcome::Skipped("billing is not configured");
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("user_id".to_string(), user.id.to_string());
        let request = CreateCustomerRequest {
            email: user.email.clone(),
            name: (!user.name.trim().is_empty()).then(|| user.name.clone()),
            metadata,
        };

        let customer_id =
            match tokio::time::timeout(self.timeout, stripe.create_customer(request)).await {
                Ok(Ok(id)) => id,
                Ok(Err(err)) => {
                    warn!(user_id = %user.id, ?err, "stripe customer creation failed");
                    return CustomerOutcome::Failed(err.to_string());
                }
                Err(_) => {
                    warn!(user_id = %user.id, timeout = ?self.timeout, "stripe customer creation timed out");
                    return CustomerOutcome::Failed("stripe request timed out".into());
                }
            };

        match self
            .users
            .set_stripe_customer_id_if_absent(user.id, &customer_id)
            .await
        {
            Ok(CustomerIdWrite::Stored) => {
                info!(user_id = %user.id, %customer_id, "stripe customer created");
                CustomerOutcome::Created(customer_id)
            }
            Ok(CustomerIdWrite::Existing(existing)) => {
                warn!(
                    user_id = %user.id,
                    orphan_customer_id = %customer_id,
                    %existing,
                    "concurrent customer creation; remote customer left orphaned"
                );
                CustomerOutcome::AlreadyExists(existing)
            }
            Err(err) => {
                error!(
                    user_id = %user.id,
                    orphan_customer_id = %customer_id,
                    ?err,
                    "failed to persist stripe customer id"
                );
                CustomerOutcome::Failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::services::stripe::MockStripeService;

    fn registry(db: Arc<MockDb>, stripe: MockStripeService) -> CustomerRegistry {
        CustomerRegistry::new(db, Some(Arc::new(stripe)), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn second_call_reuses_stored_customer() {
        let db = Arc::new(MockDb::new());
        let user = db.seed_user("ada@example.com", "Ada");
        let stripe = MockStripeService::new();
        let registry = registry(db.clone(), stripe.clone());

        let first = registry.ensure_customer(&user).await;
        let CustomerOutcome::Created(id) = first.clone() else {
            panic!("expected Created, got {first:?}");
        };

        let reloaded = db.user(user.id).unwrap();
        let second = registry.ensure_customer(&reloaded).await;
        assert_eq!(second, CustomerOutcome::AlreadyExists(id));
        assert_eq!(stripe.customer_calls(), 1);
        assert_eq!(*db.customer_id_writes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn sends_user_id_metadata() {
        let db = Arc::new(MockDb::new());
        let user = db.seed_user("ada@example.com", "Ada");
        let stripe = MockStripeService::new();
        registry(db, stripe.clone()).ensure_customer(&user).await;

        let requests = stripe.customer_requests.lock().unwrap();
        assert_eq!(requests[0].email, "ada@example.com");
        assert_eq!(requests[0].name.as_deref(), Some("Ada"));
        assert_eq!(
            requests[0].metadata.get("user_id"),
            Some(&user.id.to_string())
        );
    }

    #[tokio::test]
    async fn lost_race_returns_the_stored_id() {
        let db = Arc::new(MockDb::new());
        let user = db.seed_user("ada@example.com", "Ada");
        // Another request stored a customer after `user` was loaded.
        db.users
            .lock()
            .unwrap()
            .get_mut(&user.id)
            .unwrap()
            .stripe_customer_id = Some("cus_winner".into());

        let outcome = registry(db.clone(), MockStripeService::new())
            .ensure_customer(&user)
            .await;
        assert_eq!(outcome, CustomerOutcome::AlreadyExists("cus_winner".into()));
        assert_eq!(
            db.user(user.id).unwrap().stripe_customer_id.as_deref(),
            Some("cus_winner")
        );
    }

    #[tokio::test]
    async fn stripe_failure_is_reported_without_write() {
        let db = Arc::new(MockDb::new());
        let user = db.seed_user("ada@example.com", "Ada");
        let outcome = registry(db.clone(), MockStripeService::unreachable())
            .ensure_customer(&user)
            .await;
        assert!(matches!(outcome, CustomerOutcome::Failed(_)));
        assert_eq!(*db.customer_id_writes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn slow_stripe_times_out() {
        let db = Arc::new(MockDb::new());
        let user = db.seed_user("ada@example.com", "Ada");
        let stripe = MockStripeService {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let registry = CustomerRegistry::new(db, Some(Arc::new(stripe)), Duration::from_millis(20));
        assert_eq!(
            registry.ensure_customer(&user).await,
            CustomerOutcome::Failed("stripe request timed out".into())
        );
    }

    #[tokio::test]
    async fn billing_disabled_skips() {
        let db = Arc::new(MockDb::new());
        let user = db.seed_user("ada@example.com", "Ada");
        let registry = CustomerRegistry::new(db, None, Duration::from_secs(1));
        assert!(matches!(
            registry.ensure_customer(&user).await,
            CustomerOutcome::Skipped(_)
        ));
    }
}
