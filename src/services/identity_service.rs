//! src/services/identity_service.rs
//!
//! IdentityService — the user registry behind "who is making this request
//! and what role do they hold". Sign-in/session issuance belongs to the
//! hosted identity provider; this service owns the account records the
//! lifecycle core consults for role claims and verification status.

use crate::models::user::{NewUser, User, UserRole};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("user `{0}` not found")]
    UserNotFound(Uuid),
    #[error("email `{0}` is already registered")]
    EmailTaken(String),
    #[error("user `{0}` does not hold the admin role")]
    AdminRequired(Uuid),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

const USER_COLUMNS: &str = "id, email, display_name, role, email_verified, created_at";

/// IdentityService provides the account operations the rest of the system
/// needs:
/// - Register an account (role fixed at registration)
/// - Fetch an account / resolve its role claim
/// - Record email verification
/// - List accounts (admin visibility only)
#[derive(Clone)]
pub struct IdentityService {
    /// Shared SQLite connection pool used for account records.
    pub db: Arc<SqlitePool>,
}

impl IdentityService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Register a new account.
    ///
    /// The role is immutable after this point. Returns EmailTaken if the
    /// email is already registered.
    pub async fn register_user(&self, new: NewUser) -> IdentityResult<User> {
        let user = User {
            id: Uuid::new_v4(),
            email: new.email.trim().to_ascii_lowercase(),
            display_name: new.display_name,
            role: new.role,
            email_verified: false,
            created_at: Utc::now(),
        };

        match sqlx::query(
            "INSERT INTO users (id, email, display_name, role, email_verified, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.role)
        .bind(user.email_verified)
        .bind(user.created_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => {
                debug!("registered {} account {}", user.role, user.id);
                Ok(user)
            }
            Err(err) if is_unique_violation(&err) => Err(IdentityError::EmailTaken(user.email)),
            Err(err) => Err(IdentityError::Store(err)),
        }
    }

    /// Fetch a single account record.
    ///
    /// Returns UserNotFound if missing.
    pub async fn fetch_user(&self, id: Uuid) -> IdentityResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => IdentityError::UserNotFound(id),
            other => IdentityError::Store(other),
        })
    }

    /// Resolve the role claim for an acting identity.
    ///
    /// This is the only question the lifecycle core ever asks of the
    /// identity layer.
    pub async fn resolve_role(&self, id: Uuid) -> IdentityResult<UserRole> {
        Ok(self.fetch_user(id).await?.role)
    }

    /// Record that the account's email address has been verified.
    ///
    /// Idempotent: verifying an already-verified account is a no-op.
    pub async fn mark_email_verified(&self, id: Uuid) -> IdentityResult<User> {
        let result = sqlx::query("UPDATE users SET email_verified = 1 WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::UserNotFound(id));
        }

        self.fetch_user(id).await
    }

    /// List every account, newest first. Admin-only visibility.
    pub async fn list_users(&self, acting_admin_id: Uuid) -> IdentityResult<Vec<User>> {
        let actor = self.fetch_user(acting_admin_id).await?;
        if actor.role != UserRole::Admin {
            return Err(IdentityError::AdminRequired(acting_admin_id));
        }

        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id ASC"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(users)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
