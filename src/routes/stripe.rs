use axum::body::Bytes;
use axum::Json;
use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use axum::{http::StatusCode, response::Response};
use tracing::{error, warn};

use crate::responses::JsonResponse;
use crate::state::AppState;

// POST /api/webhook
pub async fn webhook(State(app_state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let Some(billing) = app_state.billing.as_ref() else {
        return JsonResponse::not_found("Billing is not enabled").into_response();
    };

    let sig = match headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
    {
        Some(s) => s,
        None => return JsonResponse::bad_request("Missing Stripe-Signature").into_response(),
    };

    let evt = match billing.stripe.verify_webhook(&body, sig) {
        Ok(e) => e,
        Err(err) => {
            warn!(?err, "stripe webhook verification failed");
            return (StatusCode::BAD_REQUEST, "invalid webhook").into_response();
        }
    };

    // Every verified event is acknowledged; the outcome is logged by the reconciler.
    if let Err(err) = billing.reconciler.reconcile(&evt).await {
        error!(event_id = %evt.id, event_type = %evt.r#type, ?err, "stripe event reconciliation failed");
    }

    Json(serde_json::json!({ "received": true })).into_response()
}
