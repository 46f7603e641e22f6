use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use super::cleared_session_headers;
use crate::responses::JsonResponse;
use crate::state::AppState;

pub async fn handle_logout(State(state): State<AppState>) -> Response {
    match cleared_session_headers(state.config.auth_cookie_secure) {
        Ok(headers) => (StatusCode::OK, headers, JsonResponse::success("Logged out")).into_response(),
        Err(err) => {
            error!(?err, "failed to build logout cookie");
            JsonResponse::server_error("Logout failed").into_response()
        }
    }
}
