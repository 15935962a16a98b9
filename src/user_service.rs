use anyhow::Result;

use crate::database::{Database, is_unique_violation};
use crate::errors::ApiError;
use crate::models::{CreateUserRequest, User};

#[derive(Clone)]
pub struct UserService {
    db: Database,
}

impl UserService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.db.get_all_users().await
    }

    pub async fn create_user(&self, request: CreateUserRequest) -> Result<User, ApiError> {
        let name = request.name.as_deref().map(str::trim).unwrap_or_default();
        let email = request.email.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() || email.is_empty() {
            return Err(ApiError::ValidationError("Both name and email are required.".to_string()));
        }

        match self.db.create_user(name, email).await {
            Ok(user) => Ok(user),
            Err(e) if is_unique_violation(&e) => Err(ApiError::DuplicateResource("Email already exists.".to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
