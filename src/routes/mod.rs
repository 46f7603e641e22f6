pub mod auth;
pub mod billing;
pub mod stripe;

use axum::{
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::responses::JsonResponse;
use crate::state::AppState;
use auth::{handle_login, handle_logout, handle_me, handle_signup};

/// Builds the application router. Routes that need Stripe are only mounted when billing
/// is configured, and the plan override only exists in development.
pub fn router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/signup", post(handle_signup))
        .route("/login", post(handle_login))
        .route("/logout", post(handle_logout))
        .route("/me", get(handle_me));

    let mut api = Router::new()
        .nest("/auth", auth_routes)
        .route("/plans", get(billing::list_plans))
        .route("/billing/plan", get(billing::current_plan));

    if state.billing.is_some() {
        api = api
            .route("/webhook", post(stripe::webhook))
            .route("/create-customer", post(billing::create_customer))
            .route("/checkout/start", post(billing::start_checkout));
    }

    if state.config.is_development() {
        api = api.route("/dev/update-plan", post(billing::dev_update_plan));
    }

    Router::new()
        .route("/", get(root))
        .nest("/api", api)
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Response {
    JsonResponse::success("Hello, PlanSync!").into_response()
}

async fn not_found() -> Response {
    JsonResponse::not_found("Not found").into_response()
}
