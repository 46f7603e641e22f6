use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use super::{BillingError, CustomerRegistry};
use crate::db::user_repository::UserRepository;
use crate::models::plan::{BillingInterval, PlanCatalog, PlanTier};
use crate::services::stripe::{
    CheckoutLineItem, CreateCheckoutSessionRequest, StripeService,
};

#[derive(Clone)]
pub struct CheckoutInitiator {
    users: Arc<dyn UserRepository>,
    customers: CustomerRegistry,
    stripe: Arc<dyn StripeService>,
    catalog: PlanCatalog,
    frontend_origin: String,
    timeout: Duration,
}

impl CheckoutInitiator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        customers: CustomerRegistry,
        stripe: Arc<dyn StripeService>,
        catalog: PlanCatalog,
        frontend_origin: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            users,
            customers,
            stripe,
            catalog,
            frontend_origin: frontend_origin.into(),
            timeout,
        }
    }

    /// Returns the hosted checkout URL. The plan itself only changes once the
    /// completion webhook is reconciled.
    pub async fn start_checkout(
        &self,
        user_id: Uuid,
        plan: &str,
        billing_interval: &str,
    ) -> Result<String, BillingError> {
        let tier = match plan.parse::<PlanTier>() {
            Ok(tier) if tier.is_paid() => tier,
            Ok(_) => {
                return Err(BillingError::InvalidRequest(
                    "the free plan does not need checkout".into(),
                ))
            }
            Err(_) => return Err(BillingError::InvalidRequest(format!("unknown plan {plan}"))),
        };
        let interval = match billing_interval.parse::<BillingInterval>() {
            Ok(interval @ (BillingInterval::Monthly | BillingInterval::Yearly)) => interval,
            _ => {
                return Err(BillingError::InvalidRequest(
                    "billing interval must be monthly or yearly".into(),
                ))
            }
        };

        let user = self
            .users
            .find_user_by_id(user_id)
            .await?
            .ok_or(BillingError::Unauthorized)?;

        let current = user.plan_assignment()?;
        if current.plan == tier
            && current.billing_interval == Some(interval)
            && current.status.grants_paid_plan()
        {
            return Err(BillingError::InvalidRequest(format!(
                "already subscribed to {tier} ({interval})"
            )));
        }

        let outcome = self.customers.ensure_customer(&user).await;
        let customer_id = outcome.customer_id().map(str::to_string).ok_or_else(|| {
            BillingError::CheckoutInitiationFailed(
                "could not set up a billing account; please try again".into(),
            )
        })?;

        let price_id = self.catalog.price_for(tier, interval).ok_or_else(|| {
            BillingError::CheckoutInitiationFailed(format!(
                "no price configured for {tier} ({interval})"
            ))
        })?;

        let metadata: BTreeMap<String, String> = [
            ("user_id", user_id.to_string()),
            ("plan", tier.as_str().to_string()),
            ("billing_interval", interval.as_str().to_string()),
            ("price_id", price_id.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let request = CreateCheckoutSessionRequest {
            success_url: format!(
                "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
                self.frontend_origin
            ),
            cancel_url: format!("{}/checkout/cancel", self.frontend_origin),
            line_items: vec![CheckoutLineItem {
                price: price_id.to_string(),
                quantity: 1,
            }],
            client_reference_id: Some(user_id.to_string()),
            customer: Some(customer_id),
            metadata: Some(metadata),
        };

        let session =
            match tokio::time::timeout(self.timeout, self.stripe.create_checkout_session(request))
                .await
            {
                Ok(Ok(session)) => session,
                Ok(Err(err)) => {
                    warn!(%user_id, ?err, "checkout session creation failed");
                    return Err(BillingError::CheckoutInitiationFailed(
                        "the payment provider rejected the request; please try again".into(),
                    ));
                }
                Err(_) => {
                    warn!(%user_id, "checkout session creation timed out");
                    return Err(BillingError::CheckoutInitiationFailed(
                        "the payment provider did not respond in time; please try again".into(),
                    ));
                }
            };

        let url = session.url.ok_or_else(|| {
            BillingError::CheckoutInitiationFailed("checkout session has no redirect url".into())
        })?;
        info!(%user_id, plan = %tier, %interval, session_id = %session.id, "checkout session created");
        Ok(url)
    }
}
