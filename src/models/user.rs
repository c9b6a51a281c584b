//! Represents an account — donor, recipient, or admin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Role held by an account. Immutable after registration.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserRole {
    /// Creates and owns donation listings.
    Donor,
    /// Reserves and completes donations.
    Recipient,
    /// Account-management visibility; outside the lifecycle itself.
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Donor => "donor",
            UserRole::Recipient => "recipient",
            UserRole::Admin => "admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered account.
///
/// Session issuance, token refresh, and email delivery live with the hosted
/// identity provider; this record is what the lifecycle core consults to
/// answer "who is acting and what role do they hold".
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct User {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Unique contact address, also the registration key.
    pub email: String,

    /// Name shown to other actors.
    pub display_name: String,

    /// Role fixed at registration.
    pub role: UserRole,

    /// Whether the verification email has been confirmed.
    pub email_verified: bool,

    /// When the account was registered.
    pub created_at: DateTime<Utc>,
}

/// Fields supplied at registration.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub role: UserRole,
}
