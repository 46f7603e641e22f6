//! Plan synchronization between Stripe and the user record.
//!
//! Writes to a user's plan happen in exactly two places: [`WebhookReconciler`] for
//! processor-confirmed changes and [`PlanStore::set_plan`] for operator/test overrides.
//! Both invalidate the [`PlanReader`] cache for the affected user.

use std::sync::Arc;

use crate::models::{plan::PlanCatalog, user::DataIntegrityError};

pub mod checkout;
pub mod customer_registry;
pub mod plan_reader;
pub mod plan_store;
pub mod reconciler;

pub use checkout::CheckoutInitiator;
pub use customer_registry::{CustomerOutcome, CustomerRegistry};
pub use plan_reader::PlanReader;
pub use plan_store::PlanStore;
pub use reconciler::{ReconcileOutcome, WebhookEvent, WebhookReconciler};

use crate::services::stripe::StripeService;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("customer creation failed: {0}")]
    CustomerCreationFailed(String),
    #[error("checkout initiation failed: {0}")]
    CheckoutInitiationFailed(String),
    #[error("stale event {event_id} ignored")]
    ReconciliationStale { event_id: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    DataIntegrity(#[from] DataIntegrityError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Everything that needs a live Stripe connection. Absent when billing is disabled.
#[derive(Clone)]
pub struct BillingServices {
    pub stripe: Arc<dyn StripeService>,
    pub checkout: CheckoutInitiator,
    pub reconciler: WebhookReconciler,
    pub catalog: PlanCatalog,
    pub publishable_key: String,
}
