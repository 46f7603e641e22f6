use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, info, warn};

use super::session_headers;
use crate::db::user_repository::NewUser;
use crate::models::{
    signup::{normalize_email, SignupPayload},
    user::{PlanAssignment, PublicUser},
};
use crate::responses::JsonResponse;
use crate::services::billing::CustomerOutcome;
use crate::state::AppState;
use crate::utils::password::{hash_password, MIN_PASSWORD_LENGTH};

const UNIQUE_VIOLATION: &str = "23505";

pub async fn handle_signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupPayload>,
) -> Response {
    let email = normalize_email(&payload.email);
    let name = payload.name.trim();

    if email.is_empty() || !email.contains('@') {
        return JsonResponse::bad_request("A valid email address is required").into_response();
    }
    if name.is_empty() {
        return JsonResponse::bad_request("Name is required").into_response();
    }
    if payload.password.chars().count() < MIN_PASSWORD_LENGTH {
        return JsonResponse::bad_request(&format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        ))
        .into_response();
    }

    match state.db.is_email_taken(&email).await {
        Ok(true) => return JsonResponse::conflict("User already registered").into_response(),
        Ok(false) => {}
        Err(err) => {
            error!(?err, "failed to check email availability");
            return JsonResponse::server_error("Database error").into_response();
        }
    }

    let password_hash = match hash_password(&payload.password) {
        Ok(hash) => hash,
        Err(_) => return JsonResponse::server_error("Password hashing failed").into_response(),
    };

    let user = match state
        .db
        .create_user(NewUser {
            email: &email,
            name,
            password_hash: &password_hash,
        })
        .await
    {
        Ok(user) => user,
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            return JsonResponse::conflict("User already registered").into_response();
        }
        Err(err) => {
            error!(?err, "failed to insert user");
            return JsonResponse::server_error("Could not create user").into_response();
        }
    };
    info!(user_id = %user.id, "user signed up");

    // Billing is best effort here; checkout retries customer creation.
    let mut user = user;
    match state.customers.ensure_customer(&user).await {
        CustomerOutcome::Created(id) | CustomerOutcome::AlreadyExists(id) => {
            user.stripe_customer_id = Some(id);
        }
        CustomerOutcome::Skipped(reason) => {
            info!(user_id = %user.id, reason, "stripe customer not created at signup");
        }
        CustomerOutcome::Failed(reason) => {
            warn!(user_id = %user.id, %reason, "stripe customer creation deferred to checkout");
        }
    }

    // The row was just inserted, so its own columns are the plan.
    let plan = user.plan_assignment().unwrap_or_else(|err| {
        warn!(user_id = %user.id, %err, "new user row has an unexpected plan");
        PlanAssignment::default()
    });

    let headers = match session_headers(&state, &user) {
        Ok(headers) => headers,
        Err(err) => {
            error!(user_id = %user.id, ?err, "failed to issue session");
            return JsonResponse::server_error("Token generation failed").into_response();
        }
    };

    (
        StatusCode::CREATED,
        headers,
        Json(json!({
            "success": true,
            "user": PublicUser::from(&user),
            "plan": plan,
        })),
    )
        .into_response()
}
