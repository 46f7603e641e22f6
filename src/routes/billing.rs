use axum::{
    extract::{Json, State},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::models::plan::{BillingInterval, PlanTier};
use crate::responses::JsonResponse;
use crate::routes::auth::session::AuthSession;
use crate::services::billing::BillingError;
use crate::state::AppState;

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCheckoutPayload {
    pub plan: String,
    pub billing_interval: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlanPayload {
    pub plan: String,
    #[serde(default)]
    pub billing_interval: Option<String>,
}

pub fn billing_error_response(err: BillingError) -> Response {
    match err {
        BillingError::Unauthorized => JsonResponse::unauthorized("Unauthorized").into_response(),
        BillingError::InvalidRequest(msg) => JsonResponse::bad_request(&msg).into_response(),
        BillingError::InvalidPlan(plan) => {
            JsonResponse::bad_request_with_code(&format!("Unknown plan: {plan}"), "invalid_plan")
                .into_response()
        }
        BillingError::CheckoutInitiationFailed(msg) => {
            JsonResponse::bad_gateway_with_code(&msg, "checkout_failed").into_response()
        }
        BillingError::CustomerCreationFailed(msg) => {
            JsonResponse::bad_gateway_with_code(&msg, "customer_creation_failed").into_response()
        }
        BillingError::ReconciliationStale { .. } => {
            JsonResponse::conflict("A newer billing state is already recorded").into_response()
        }
        BillingError::Configuration(msg) => {
            error!(%msg, "billing configuration error");
            JsonResponse::server_error("Billing is not available").into_response()
        }
        BillingError::DataIntegrity(err) => {
            error!(%err, "stored billing data is invalid");
            JsonResponse::server_error("Billing data is inconsistent").into_response()
        }
        BillingError::Database(err) => {
            error!(?err, "billing database error");
            JsonResponse::server_error("Database error").into_response()
        }
    }
}

fn session_user(claims: &crate::routes::auth::claims::Claims) -> Result<uuid::Uuid, BillingError> {
    claims.user_id().ok_or(BillingError::Unauthorized)
}

// POST /api/create-customer
pub async fn create_customer(
    State(state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Response {
    let user_id = match session_user(&claims) {
        Ok(id) => id,
        Err(err) => return billing_error_response(err),
    };
    let user = match state.db.find_user_by_id(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return billing_error_response(BillingError::Unauthorized),
        Err(err) => return billing_error_response(err.into()),
    };

    let outcome = state.customers.ensure_customer(&user).await;
    if outcome.customer_id().is_none() {
        info!(%user_id, ?outcome, "no stripe customer available");
    }
    Json(json!({
        "success": outcome.customer_id().is_some(),
        "customerId": outcome.customer_id(),
    }))
    .into_response()
}

// POST /api/checkout/start
pub async fn start_checkout(
    State(state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<StartCheckoutPayload>,
) -> Response {
    let Some(billing) = state.billing.as_ref() else {
        return JsonResponse::not_found("Billing is not enabled").into_response();
    };
    let user_id = match session_user(&claims) {
        Ok(id) => id,
        Err(err) => return billing_error_response(err),
    };

    match billing
        .checkout
        .start_checkout(user_id, &payload.plan, &payload.billing_interval)
        .await
    {
        Ok(url) => Json(json!({ "success": true, "redirectUrl": url })).into_response(),
        Err(err) => billing_error_response(err),
    }
}

// GET /api/billing/plan
pub async fn current_plan(
    State(state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Response {
    let user_id = match session_user(&claims) {
        Ok(id) => id,
        Err(err) => return billing_error_response(err),
    };
    match state.plan_reader.current_plan(user_id).await {
        Ok(plan) => Json(json!({
            "success": true,
            "limits": plan.plan.limits(),
            "plan": plan,
        }))
        .into_response(),
        Err(err) => billing_error_response(err),
    }
}

// GET /api/plans
pub async fn list_plans(State(state): State<AppState>) -> Response {
    let catalog = state.catalog();
    let plans: Vec<_> = PlanTier::ALL
        .iter()
        .map(|tier| {
            let available = |interval: BillingInterval| {
                catalog.is_some_and(|c| c.price_for(*tier, interval).is_some())
            };
            let prices = tier.list_prices().map(|(monthly, yearly)| {
                json!({
                    "currency": "usd",
                    "monthly": { "amount": monthly, "available": available(BillingInterval::Monthly) },
                    "yearly": { "amount": yearly, "available": available(BillingInterval::Yearly) },
                })
            });
            json!({
                "plan": tier,
                "limits": tier.limits(),
                "prices": prices,
            })
        })
        .collect();

    Json(json!({
        "success": true,
        "billingEnabled": state.billing.is_some(),
        "publishableKey": state.billing.as_ref().map(|b| b.publishable_key.as_str()),
        "plans": plans,
    }))
    .into_response()
}

// POST /api/dev/update-plan (development only)
pub async fn dev_update_plan(
    State(state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<UpdatePlanPayload>,
) -> Response {
    let user_id = match session_user(&claims) {
        Ok(id) => id,
        Err(err) => return billing_error_response(err),
    };
    match state
        .plans
        .set_plan(user_id, &payload.plan, payload.billing_interval.as_deref())
        .await
    {
        Ok(plan) => Json(json!({ "success": true, "plan": plan })).into_response(),
        Err(err) => billing_error_response(err),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::to_bytes,
        extract::{Json, State},
        http::StatusCode,
    };
    use serde_json::Value;

    use super::*;
    use crate::models::user::User;
    use crate::routes::auth::claims::Claims;
    use crate::services::stripe::MockStripeService;
    use crate::state::test_support::{test_app, test_app_with, test_config};

    fn session_for(user: &User) -> AuthSession {
        AuthSession(Claims {
            id: user.id.to_string(),
            email: user.email.clone(),
            name: user.name.clone(),
            iat: 0,
            exp: usize::MAX,
            iss: String::new(),
            aud: String::new(),
        })
    }

    async fn body_json(res: Response) -> Value {
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn create_customer_is_idempotent() {
        let app = test_app(true);
        let user = app.db.seed_user("ada@example.com", "Ada");

        let first = body_json(create_customer(State(app.state.clone()), session_for(&user)).await).await;
        let second = body_json(create_customer(State(app.state.clone()), session_for(&user)).await).await;

        assert_eq!(first["success"], true);
        assert_eq!(first["customerId"], second["customerId"]);
        assert_eq!(app.stripe.customer_calls(), 1);
    }

    #[tokio::test]
    async fn create_customer_reports_failure_without_error_status() {
        let app = test_app_with(test_config(true), MockStripeService::unreachable());
        let user = app.db.seed_user("ada@example.com", "Ada");

        let res = create_customer(State(app.state.clone()), session_for(&user)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["success"], false);
        assert!(json["customerId"].is_null());
    }

    #[tokio::test]
    async fn checkout_returns_redirect_url() {
        let app = test_app(true);
        let user = app.db.seed_user("ada@example.com", "Ada");

        let res = start_checkout(
            State(app.state.clone()),
            session_for(&user),
            Json(StartCheckoutPayload {
                plan: "pro".into(),
                billing_interval: "monthly".into(),
            }),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["redirectUrl"], "https://example.test/checkout");
    }

    #[tokio::test]
    async fn checkout_failure_is_bad_gateway() {
        let stripe = MockStripeService {
            fail_checkout: true,
            ..Default::default()
        };
        let app = test_app_with(test_config(true), stripe);
        let user = app.db.seed_user("ada@example.com", "Ada");

        let res = start_checkout(
            State(app.state.clone()),
            session_for(&user),
            Json(StartCheckoutPayload {
                plan: "pro".into(),
                billing_interval: "yearly".into(),
            }),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(res).await["code"], "checkout_failed");
    }

    #[tokio::test]
    async fn checkout_rejects_free_plan() {
        let app = test_app(true);
        let user = app.db.seed_user("ada@example.com", "Ada");
        let res = start_checkout(
            State(app.state.clone()),
            session_for(&user),
            Json(StartCheckoutPayload {
                plan: "free".into(),
                billing_interval: "monthly".into(),
            }),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn dev_update_plan_round_trips_and_rejects_unknown() {
        let app = test_app(false);
        let user = app.db.seed_user("ada@example.com", "Ada");

        let res = dev_update_plan(
            State(app.state.clone()),
            session_for(&user),
            Json(UpdatePlanPayload {
                plan: "pro".into(),
                billing_interval: Some("monthly".into()),
            }),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = dev_update_plan(
            State(app.state.clone()),
            session_for(&user),
            Json(UpdatePlanPayload {
                plan: "enterprise".into(),
                billing_interval: None,
            }),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["code"], "invalid_plan");

        let json = body_json(current_plan(State(app.state.clone()), session_for(&user)).await).await;
        assert_eq!(json["plan"]["plan"], "pro");
        assert_eq!(json["plan"]["billing_interval"], "monthly");
    }

    #[tokio::test]
    async fn plan_catalog_reports_availability() {
        let json = body_json(list_plans(State(test_app(true).state)).await).await;
        assert_eq!(json["billingEnabled"], true);
        assert_eq!(json["plans"][1]["plan"], "pro");
        assert_eq!(json["plans"][1]["prices"]["yearly"]["amount"], 12_000);
        assert_eq!(json["plans"][1]["prices"]["yearly"]["available"], true);
        assert!(json["plans"][0]["prices"].is_null());

        let json = body_json(list_plans(State(test_app(false).state)).await).await;
        assert_eq!(json["billingEnabled"], false);
        assert_eq!(json["plans"][1]["prices"]["monthly"]["available"], false);
    }
}
