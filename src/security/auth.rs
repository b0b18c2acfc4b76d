use crate::config::SecurityConfig;
use crate::db::models::{AuthToken, LoginCredentials, User, UserRole};
use crate::db::MetadataStore;
use crate::error::Error;
use crate::security::{password, SecurityService};
use anyhow::Result;
use chrono::Utc;
use log::info;
use std::sync::Arc;
use uuid::Uuid;

/// Authentication service for handling user login and registration
pub struct AuthService {
    store: Arc<dyn MetadataStore>,
    security: SecurityService,
    config: SecurityConfig,
}

impl AuthService {
    pub fn new(store: Arc<dyn MetadataStore>, config: &SecurityConfig) -> Self {
        Self {
            store,
            security: SecurityService::new(config.clone()),
            config: config.clone(),
        }
    }

    /// Login a user with username/password
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<(User, AuthToken)> {
        let user = self
            .store
            .get_user_by_username(&credentials.username)
            .await?
            .ok_or_else(|| Error::Authentication("Invalid username or password".to_string()))?;

        if !user.active {
            return Err(Error::Authentication("User account is inactive".to_string()).into());
        }

        let valid = password::verify_password(&credentials.password, &user.password_hash)?;
        if !valid {
            return Err(Error::Authentication("Invalid username or password".to_string()).into());
        }

        self.store.update_user_last_login(&user.id).await?;
        let token = self.security.generate_token(&user)?;

        info!("User logged in: {}", user.username);
        Ok((user, token))
    }

    /// Register a new user
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: UserRole,
    ) -> Result<User> {
        if self.store.get_user_by_username(username).await?.is_some() {
            return Err(Error::Conflict("Username already exists".to_string()).into());
        }
        if self.store.get_user_by_email(email).await?.is_some() {
            return Err(Error::Conflict("Email already exists".to_string()).into());
        }

        let password_hash = password::hash_password(password, &self.config)?;
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            role,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login: None,
            active: true,
        };

        let created = self.store.create_user(&user).await?;
        info!("New user registered: {}", username);
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;

    fn auth() -> AuthService {
        let store = Arc::new(MemoryStore::new());
        AuthService::new(
            store,
            &SecurityConfig {
                jwt_secret: "test".into(),
                jwt_expiration_minutes: 60,
                password_hash_cost: 4,
                enc_key: None,
            },
        )
    }

    #[tokio::test]
    async fn register_then_login() {
        let auth = auth();
        auth.register("admin", "admin@example.com", "hunter2", UserRole::Admin)
            .await
            .unwrap();

        let (user, token) = auth
            .login(&LoginCredentials {
                username: "admin".into(),
                password: "hunter2".into(),
            })
            .await
            .unwrap();
        assert_eq!(user.username, "admin");
        assert_eq!(token.token_type, "Bearer");
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let auth = auth();
        auth.register("admin", "admin@example.com", "hunter2", UserRole::Admin)
            .await
            .unwrap();

        let result = auth
            .login(&LoginCredentials {
                username: "admin".into(),
                password: "nope".into(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let auth = auth();
        auth.register("admin", "admin@example.com", "hunter2", UserRole::Admin)
            .await
            .unwrap();
        let result = auth
            .register("admin", "other@example.com", "pw", UserRole::Viewer)
            .await;
        assert!(result.is_err());
    }
}
