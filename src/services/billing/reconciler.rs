use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{BillingError, PlanReader};
use crate::db::{
    stripe_event_log_repository::StripeEventLogRepository,
    user_repository::{SubscriptionStateUpdate, UserRepository},
};
use crate::models::{
    plan::{PlanCatalog, PlanTier},
    subscription::SubscriptionStatus,
    user::{PlanAssignment, User},
};
use crate::services::stripe::StripeEvent;

/// Who an event is about. Either part may be missing from a given payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSubject {
    pub user_id: Option<Uuid>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    CheckoutCompleted {
        subject: EventSubject,
        subscription_id: Option<String>,
        price_id: Option<String>,
        paid: bool,
    },
    SubscriptionUpdated {
        subject: EventSubject,
        subscription_id: Option<String>,
        status: String,
        price_id: Option<String>,
    },
    SubscriptionDeleted {
        subject: EventSubject,
        subscription_id: Option<String>,
    },
    PaymentFailed {
        subject: EventSubject,
        subscription_id: Option<String>,
    },
    Unhandled(String),
}

impl WebhookEvent {
    pub fn from_stripe(event: &StripeEvent) -> Self {
        let object = &event.payload["data"]["object"];
        match event.r#type.as_str() {
            "checkout.session.completed" => WebhookEvent::CheckoutCompleted {
                subject: subject_of(object, true),
                subscription_id: expandable_id(&object["subscription"]),
                price_id: string_at(&object["metadata"]["price_id"]),
                paid: !matches!(object["payment_status"].as_str(), Some("unpaid")),
            },
            "customer.subscription.created" | "customer.subscription.updated" => {
                WebhookEvent::SubscriptionUpdated {
                    subject: subject_of(object, false),
                    subscription_id: string_at(&object["id"]),
                    status: object["status"].as_str().unwrap_or_default().to_string(),
                    price_id: string_at(&object["items"]["data"][0]["price"]["id"]),
                }
            }
            "customer.subscription.deleted" => WebhookEvent::SubscriptionDeleted {
                subject: subject_of(object, false),
                subscription_id: string_at(&object["id"]),
            },
            "invoice.payment_failed" => WebhookEvent::PaymentFailed {
                subject: subject_of(object, false),
                subscription_id: expandable_id(&object["subscription"]),
            },
            other => WebhookEvent::Unhandled(other.to_string()),
        }
    }

    fn subject(&self) -> Option<&EventSubject> {
        match self {
            WebhookEvent::CheckoutCompleted { subject, .. }
            | WebhookEvent::SubscriptionUpdated { subject, .. }
            | WebhookEvent::SubscriptionDeleted { subject, .. }
            | WebhookEvent::PaymentFailed { subject, .. } => Some(subject),
            WebhookEvent::Unhandled(_) => None,
        }
    }
}

fn string_at(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Stripe sends related objects either as a bare id or, when expanded, as an object.
fn expandable_id(value: &Value) -> Option<String> {
    string_at(value).or_else(|| string_at(&value["id"]))
}

fn subject_of(object: &Value, with_reference: bool) -> EventSubject {
    let reference = with_reference
        .then(|| string_at(&object["client_reference_id"]))
        .flatten();
    let user_id = reference
        .or_else(|| string_at(&object["metadata"]["user_id"]))
        .and_then(|raw| Uuid::parse_str(&raw).ok());
    EventSubject {
        user_id,
        customer_id: expandable_id(&object["customer"]),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        user_id: Uuid,
        plan: PlanTier,
        status: SubscriptionStatus,
        /// A still-live subscription that a completed checkout took over from. It keeps
        /// billing until it is canceled with the processor.
        replaced_subscription: Option<String>,
    },
    Duplicate,
    Stale,
    Ignored(String),
    Unresolved,
    ConfigError(String),
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied { .. } => "applied",
            ReconcileOutcome::Duplicate => "duplicate",
            ReconcileOutcome::Stale => "stale",
            ReconcileOutcome::Ignored(_) => "ignored",
            ReconcileOutcome::Unresolved => "unresolved",
            ReconcileOutcome::ConfigError(_) => "config_error",
        }
    }
}

/// What a single event asks for, before the ordering check.
enum Transition {
    Write(SubscriptionStateUpdate),
    Skip(ReconcileOutcome),
}

#[derive(Clone)]
pub struct WebhookReconciler {
    users: Arc<dyn UserRepository>,
    event_log: Arc<dyn StripeEventLogRepository>,
    catalog: PlanCatalog,
    reader: PlanReader,
    past_due_grace: Duration,
}

impl WebhookReconciler {
    pub fn new(
        users: Arc<dyn UserRepository>,
        event_log: Arc<dyn StripeEventLogRepository>,
        catalog: PlanCatalog,
        reader: PlanReader,
        past_due_grace: Duration,
    ) -> Self {
        Self {
            users,
            event_log,
            catalog,
            reader,
            past_due_grace,
        }
    }

    /// Applies a verified event at most once. Errors are database failures only; the event
    /// is left unrecorded and the failure is logged for offline remediation.
    pub async fn reconcile(&self, event: &StripeEvent) -> Result<ReconcileOutcome, BillingError> {
        if self.event_log.has_processed_event(&event.id).await? {
            debug!(event_id = %event.id, "duplicate stripe event skipped");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let parsed = WebhookEvent::from_stripe(event);
        let outcome = match self.apply(&event.id, &parsed, event.created).await {
            Ok(outcome) => outcome,
            Err(err @ BillingError::ReconciliationStale { .. }) => {
                info!(event_type = %event.r#type, error = %err, "newer subscription state already stored");
                ReconcileOutcome::Stale
            }
            Err(err) => return Err(err),
        };

        match &outcome {
            ReconcileOutcome::Applied {
                user_id,
                plan,
                status,
                replaced_subscription,
            } => {
                info!(
                    event_id = %event.id,
                    event_type = %event.r#type,
                    %user_id,
                    %plan,
                    %status,
                    "subscription state applied"
                );
                if let Some(replaced) = replaced_subscription {
                    warn!(
                        event_id = %event.id,
                        %user_id,
                        replaced_subscription_id = %replaced,
                        "replaced subscription is still billing and must be canceled"
                    );
                }
            }
            ReconcileOutcome::ConfigError(reason) => error!(
                event_id = %event.id,
                event_type = %event.r#type,
                reason = %reason,
                "stripe event does not match the configured catalog"
            ),
            ReconcileOutcome::Unresolved => warn!(
                event_id = %event.id,
                event_type = %event.r#type,
                "stripe event could not be matched to a user"
            ),
            ReconcileOutcome::Ignored(reason) => debug!(
                event_id = %event.id,
                event_type = %event.r#type,
                reason = %reason,
                "stripe event ignored"
            ),
            ReconcileOutcome::Stale | ReconcileOutcome::Duplicate => {}
        }

        if let Err(err) = self
            .event_log
            .record_event(&event.id, &event.r#type, outcome.as_str())
            .await
        {
            // The ordering check keeps a manual replay harmless.
            warn!(event_id = %event.id, ?err, "failed to record processed stripe event");
        }
        Ok(outcome)
    }

    async fn apply(
        &self,
        event_id: &str,
        event: &WebhookEvent,
        event_at: i64,
    ) -> Result<ReconcileOutcome, BillingError> {
        let Some(subject) = event.subject() else {
            if let WebhookEvent::Unhandled(kind) = event {
                return Ok(ReconcileOutcome::Ignored(format!("unhandled event type {kind}")));
            }
            return Ok(ReconcileOutcome::Unresolved);
        };
        let Some(user) = self.resolve_user(subject).await? else {
            return Ok(ReconcileOutcome::Unresolved);
        };
        let current = user.plan_assignment()?;
        let replaced_subscription = match event {
            WebhookEvent::CheckoutCompleted {
                subscription_id, ..
            } if replaced(&current, subscription_id.as_deref()) => current.subscription_id.clone(),
            _ => None,
        };

        let transition = match event {
            WebhookEvent::CheckoutCompleted {
                subscription_id,
                price_id,
                paid,
                ..
            } => {
                if !paid {
                    Transition::Skip(ReconcileOutcome::Ignored("checkout not paid".into()))
                } else {
                    self.activate(price_id.as_deref(), subscription_id.clone(), event_at)
                }
            }
            WebhookEvent::SubscriptionUpdated {
                subscription_id, ..
            } if replaced(&current, subscription_id.as_deref()) => Transition::Skip(
                ReconcileOutcome::Ignored("update for a replaced subscription".into()),
            ),
            WebhookEvent::SubscriptionUpdated {
                subscription_id,
                status,
                price_id,
                ..
            } => match SubscriptionStatus::from_stripe(status) {
                None => Transition::Skip(ReconcileOutcome::Ignored(format!(
                    "subscription status {status}"
                ))),
                Some(SubscriptionStatus::Active) => {
                    self.activate(price_id.as_deref(), subscription_id.clone(), event_at)
                }
                Some(SubscriptionStatus::PastDue) => {
                    self.past_due(&current, subscription_id.clone(), event_at)
                }
                Some(ended @ (SubscriptionStatus::Canceled | SubscriptionStatus::Expired)) => {
                    end_subscription(&current, subscription_id.as_deref(), ended, event_at)
                }
                Some(SubscriptionStatus::None) => {
                    Transition::Skip(ReconcileOutcome::Ignored("no subscription state".into()))
                }
            },
            WebhookEvent::SubscriptionDeleted {
                subscription_id, ..
            } => end_subscription(
                &current,
                subscription_id.as_deref(),
                SubscriptionStatus::Canceled,
                event_at,
            ),
            WebhookEvent::PaymentFailed {
                subscription_id, ..
            } => {
                if replaced(&current, subscription_id.as_deref()) {
                    Transition::Skip(ReconcileOutcome::Ignored(
                        "payment failure for a replaced subscription".into(),
                    ))
                } else {
                    self.past_due(&current, subscription_id.clone(), event_at)
                }
            }
            WebhookEvent::Unhandled(kind) => {
                Transition::Skip(ReconcileOutcome::Ignored(format!("unhandled event type {kind}")))
            }
        };

        let update = match transition {
            Transition::Write(update) => update,
            Transition::Skip(outcome) => return Ok(outcome),
        };

        if !self.users.apply_subscription_state(user.id, &update).await? {
            return Err(BillingError::ReconciliationStale {
                event_id: event_id.to_string(),
            });
        }
        self.reader.invalidate(user.id);

        if let (WebhookEvent::CheckoutCompleted { subject, .. }, None) =
            (event, user.stripe_customer_id.as_deref())
        {
            if let Some(customer_id) = subject.customer_id.as_deref() {
                if let Err(err) = self
                    .users
                    .set_stripe_customer_id_if_absent(user.id, customer_id)
                    .await
                {
                    warn!(user_id = %user.id, ?err, "failed to store customer id from checkout");
                }
            }
        }

        Ok(ReconcileOutcome::Applied {
            user_id: user.id,
            plan: update.plan,
            status: update.status,
            replaced_subscription,
        })
    }

    async fn resolve_user(&self, subject: &EventSubject) -> Result<Option<User>, BillingError> {
        if let Some(user_id) = subject.user_id {
            if let Some(user) = self.users.find_user_by_id(user_id).await? {
                return Ok(Some(user));
            }
        }
        let Some(customer_id) = subject.customer_id.as_deref() else {
            return Ok(None);
        };
        match self
            .users
            .find_user_id_by_stripe_customer_id(customer_id)
            .await?
        {
            Some(user_id) => Ok(self.users.find_user_by_id(user_id).await?),
            None => Ok(None),
        }
    }

    fn activate(
        &self,
        price_id: Option<&str>,
        subscription_id: Option<String>,
        event_at: i64,
    ) -> Transition {
        let Some(price_id) = price_id else {
            return Transition::Skip(ReconcileOutcome::ConfigError(
                "event carries no price id".into(),
            ));
        };
        let Some((plan, interval)) = self.catalog.plan_for_price(price_id) else {
            return Transition::Skip(ReconcileOutcome::ConfigError(format!(
                "unknown price id {price_id}"
            )));
        };
        Transition::Write(SubscriptionStateUpdate {
            plan,
            billing_interval: Some(interval),
            subscription_id,
            status: SubscriptionStatus::Active,
            past_due_since: None,
            state_at: event_at,
        })
    }

    fn past_due(
        &self,
        current: &PlanAssignment,
        subscription_id: Option<String>,
        event_at: i64,
    ) -> Transition {
        if !current.status.can_transition_to(SubscriptionStatus::PastDue) {
            return Transition::Skip(ReconcileOutcome::Ignored(format!(
                "payment issue while {}",
                current.status
            )));
        }
        let since = current.past_due_since.unwrap_or(event_at);
        let subscription_id = subscription_id.or_else(|| current.subscription_id.clone());
        let grace = i64::try_from(self.past_due_grace.as_secs()).unwrap_or(i64::MAX);

        if event_at.saturating_sub(since) >= grace {
            return Transition::Write(SubscriptionStateUpdate {
                plan: PlanTier::Free,
                billing_interval: None,
                subscription_id,
                status: SubscriptionStatus::Expired,
                past_due_since: None,
                state_at: event_at,
            });
        }
        Transition::Write(SubscriptionStateUpdate {
            plan: current.plan,
            billing_interval: current.billing_interval,
            subscription_id,
            status: SubscriptionStatus::PastDue,
            past_due_since: Some(since),
            state_at: event_at,
        })
    }
}

/// An event about a subscription other than the live one on record. Only a completed
/// checkout may move the record to a different subscription.
fn replaced(current: &PlanAssignment, subscription_id: Option<&str>) -> bool {
    current.status.grants_paid_plan()
        && matches!(
            (current.subscription_id.as_deref(), subscription_id),
            (Some(stored), Some(incoming)) if stored != incoming
        )
}

fn end_subscription(
    current: &PlanAssignment,
    subscription_id: Option<&str>,
    status: SubscriptionStatus,
    event_at: i64,
) -> Transition {
    if replaced(current, subscription_id) {
        return Transition::Skip(ReconcileOutcome::Ignored(
            "end of a replaced subscription".into(),
        ));
    }
    Transition::Write(SubscriptionStateUpdate {
        plan: PlanTier::Free,
        billing_interval: None,
        subscription_id: subscription_id
            .map(str::to_string)
            .or_else(|| current.subscription_id.clone()),
        status,
        past_due_since: None,
        state_at: event_at,
    })
}
