use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub id: String, // user UUID
    pub email: String,
    pub name: String,
    pub iat: usize, // issued at (UNIX timestamp)
    pub exp: usize, // expiration (UNIX timestamp)
    pub iss: String,
    pub aud: String,
}

impl Claims {
    pub fn user_id(&self) -> Option<uuid::Uuid> {
        uuid::Uuid::parse_str(&self.id).ok()
    }
}
