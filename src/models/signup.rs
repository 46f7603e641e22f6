use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize)]
pub struct SignupPayload {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize, Serialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

/// Lowercased, trimmed form used for storage and lookup.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}
