pub mod claims;
pub mod login;
pub mod logout;
pub mod session;
pub mod signup;

pub use login::{handle_login, handle_me};
pub use logout::handle_logout;
pub use signup::handle_signup;

use axum::http::{
    header::{InvalidHeaderValue, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{Duration, Utc};
use time::Duration as TimeDuration;

use crate::models::user::User;
use crate::state::AppState;
use crate::utils::jwt::create_jwt;
use claims::Claims;

pub const AUTH_COOKIE: &str = "auth_token";
pub const SESSION_DAYS: i64 = 7;
/// `/me` re-issues the session once the token is older than this.
pub const REFRESH_AFTER_SECS: i64 = 86_400;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("token generation failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("invalid cookie header: {0}")]
    Header(#[from] InvalidHeaderValue),
}

fn cookie_header(cookie: Cookie<'_>) -> Result<HeaderMap, SessionError> {
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, HeaderValue::from_str(&cookie.to_string())?);
    Ok(headers)
}

/// Issues a fresh session for `user` as a `Set-Cookie` header.
pub(crate) fn session_headers(state: &AppState, user: &User) -> Result<HeaderMap, SessionError> {
    let now = Utc::now();
    let expires_in = Duration::days(SESSION_DAYS);
    let claims = Claims {
        id: user.id.to_string(),
        email: user.email.clone(),
        name: user.name.clone(),
        iat: now.timestamp() as usize,
        exp: (now + expires_in).timestamp() as usize,
        iss: String::new(),
        aud: String::new(),
    };
    let token = create_jwt(claims, state)?;

    let cookie = Cookie::build((AUTH_COOKIE, token))
        .http_only(true)
        .secure(state.config.auth_cookie_secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(TimeDuration::seconds(expires_in.num_seconds()))
        .build();
    cookie_header(cookie)
}

pub(crate) fn cleared_session_headers(secure: bool) -> Result<HeaderMap, SessionError> {
    let expired = Cookie::build((AUTH_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::seconds(0))
        .build();
    cookie_header(expired)
}
