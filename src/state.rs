use crate::config::Config;
use crate::db::{
    stripe_event_log_repository::StripeEventLogRepository, user_repository::UserRepository,
};
use crate::models::plan::PlanCatalog;
use crate::services::billing::{
    BillingServices, CheckoutInitiator, CustomerRegistry, PlanReader, PlanStore, WebhookReconciler,
};
use crate::services::stripe::StripeService;
use crate::utils::jwt::{JwtKeyProvider, JwtKeys};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn UserRepository>,
    pub config: Arc<Config>,
    pub jwt_keys: Arc<JwtKeys>,
    pub plan_reader: PlanReader,
    pub plans: PlanStore,
    pub customers: CustomerRegistry,
    pub billing: Option<BillingServices>,
}

impl AppState {
    /// Wires the billing components. Billing is only enabled when the configuration
    /// carries valid Stripe settings and a Stripe client is supplied.
    pub fn new(
        config: Arc<Config>,
        jwt_keys: Arc<JwtKeys>,
        db: Arc<dyn UserRepository>,
        event_log: Arc<dyn StripeEventLogRepository>,
        stripe: Option<Arc<dyn StripeService>>,
    ) -> Self {
        let plan_reader = PlanReader::new(db.clone(), config.plan_cache_ttl);
        let plans = PlanStore::new(db.clone(), plan_reader.clone());

        let settings = config.billing.as_ref().ok().and_then(Option::as_ref);
        let stripe = stripe.filter(|_| settings.is_some());
        let customers = CustomerRegistry::new(db.clone(), stripe.clone(), config.stripe_timeout);

        let billing = match (stripe, settings) {
            (Some(stripe), Some(settings)) => Some(BillingServices {
                checkout: CheckoutInitiator::new(
                    db.clone(),
                    customers.clone(),
                    stripe.clone(),
                    settings.catalog.clone(),
                    config.frontend_origin.clone(),
                    config.stripe_timeout,
                ),
                reconciler: WebhookReconciler::new(
                    db.clone(),
                    event_log,
                    settings.catalog.clone(),
                    plan_reader.clone(),
                    config.past_due_grace,
                ),
                catalog: settings.catalog.clone(),
                publishable_key: settings.stripe.publishable_key.clone(),
                stripe,
            }),
            _ => None,
        };

        Self {
            db,
            config,
            jwt_keys,
            plan_reader,
            plans,
            customers,
            billing,
        }
    }

    pub fn catalog(&self) -> Option<&PlanCatalog> {
        self.billing.as_ref().map(|billing| &billing.catalog)
    }
}

impl JwtKeyProvider for AppState {
    fn jwt_keys(&self) -> &JwtKeys {
        &self.jwt_keys
    }

    fn jwt_issuer(&self) -> &str {
        &self.config.jwt_issuer
    }

    fn jwt_audience(&self) -> &str {
        &self.config.jwt_audience
    }
}
