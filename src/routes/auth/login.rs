use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

use super::{session::AuthSession, session_headers, REFRESH_AFTER_SECS};
use crate::models::{
    signup::{normalize_email, LoginPayload},
    user::PublicUser,
};
use crate::responses::JsonResponse;
use crate::state::AppState;
use crate::utils::{jwt::unix_now, password::verify_password};

pub async fn handle_login(
    State(app_state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Response {
    let email = normalize_email(&payload.email);
    let user = match app_state.db.find_user_by_email(&email).await {
        Ok(Some(record)) => record,
        Ok(None) => return JsonResponse::unauthorized("Invalid credentials").into_response(),
        Err(err) => {
            error!(?err, "failed to look up user for login");
            return JsonResponse::server_error("Database error").into_response();
        }
    };

    if user.password_hash.trim().is_empty() {
        return JsonResponse::unauthorized("Invalid credentials").into_response();
    }

    match verify_password(&payload.password, &user.password_hash) {
        Ok(true) => match session_headers(&app_state, &user) {
            Ok(headers) => (
                StatusCode::OK,
                headers,
                Json(json!({
                    "success": true,
                    "user": PublicUser::from(&user),
                })),
            )
                .into_response(),
            Err(err) => {
                error!(user_id = %user.id, ?err, "failed to issue session");
                JsonResponse::server_error("Token generation failed").into_response()
            }
        },
        Ok(false) => JsonResponse::unauthorized("Invalid credentials").into_response(),
        Err(err) => {
            error!(user_id = %user.id, ?err, "password verification error");
            JsonResponse::server_error("Internal error").into_response()
        }
    }
}

pub async fn handle_me(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Response {
    let Some(user_id) = claims.user_id() else {
        return JsonResponse::unauthorized("Invalid user ID").into_response();
    };

    let user = match app_state.db.find_user_by_id(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return JsonResponse::unauthorized("User not found").into_response(),
        Err(err) => {
            error!(%user_id, ?err, "failed to load user");
            return JsonResponse::server_error("Database error").into_response();
        }
    };

    let plan = match app_state.plan_reader.current_plan(user_id).await {
        Ok(plan) => plan,
        Err(err) => {
            error!(%user_id, ?err, "failed to read current plan");
            return JsonResponse::server_error("Could not load plan").into_response();
        }
    };

    // Sliding session: an active user keeps getting a fresh 7-day cookie.
    let mut headers = HeaderMap::new();
    let age = unix_now()
        .map(|now| now as i64 - claims.iat as i64)
        .unwrap_or_default();
    if age >= REFRESH_AFTER_SECS {
        match session_headers(&app_state, &user) {
            Ok(fresh) => headers = fresh,
            Err(err) => warn!(%user_id, ?err, "failed to refresh session"),
        }
    }

    (
        StatusCode::OK,
        headers,
        Json(json!({
            "success": true,
            "user": PublicUser::from(&user),
            "limits": plan.plan.limits(),
            "plan": plan,
        })),
    )
        .into_response()
}
