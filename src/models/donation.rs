//! Represents a donation listing — an offered quantity of surplus food.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a donation.
///
/// The status travels a single legal path:
///
/// ```text
/// active ──reserve──▶ reserved ──complete──▶ completed
///   │                    │
///   │cancel              │cancel (reservation voided)
///   ▼                    ▼
/// cancelled           cancelled
/// active ──expire──▶ expired
/// ```
///
/// `completed`, `cancelled`, and `expired` are terminal; nothing ever
/// re-enters `active`.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DonationStatus {
    Active,
    Reserved,
    Completed,
    Expired,
    Cancelled,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationStatus::Active => "active",
            DonationStatus::Reserved => "reserved",
            DonationStatus::Completed => "completed",
            DonationStatus::Expired => "expired",
            DonationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of food categories a listing can be filed under.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FoodCategory {
    Produce,
    Bakery,
    Dairy,
    Meat,
    Prepared,
    Pantry,
    Beverages,
    Other,
}

/// A single donation listing.
///
/// Rows are never physically deleted; cancellation, completion, and expiry
/// are terminal statuses, not removals. `reserved_by` is set if and only if
/// the status is `reserved` or `completed`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Donation {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// The donor who created and owns this listing.
    pub donor_id: Uuid,

    /// Short human-readable title (e.g. "3 trays of lasagna").
    pub title: String,

    /// Free-form description of the food on offer.
    pub description: String,

    /// Food category the listing is filed under.
    pub category: FoodCategory,

    /// Offered amount, interpreted against `unit`.
    pub quantity: f64,

    /// Unit for `quantity` (e.g. "kg", "portions", "boxes").
    pub unit: String,

    /// Where the food can be collected.
    pub pickup_address: String,

    /// References to externally stored images (URLs or storage keys).
    pub images: Json<Vec<String>>,

    /// Current lifecycle status.
    pub status: DonationStatus,

    /// Recipient currently holding the reservation, if any.
    pub reserved_by: Option<Uuid>,

    /// When the current reservation was taken.
    pub reserved_at: Option<DateTime<Utc>>,

    /// When the hand-off was confirmed.
    pub completed_at: Option<DateTime<Utc>>,

    /// After this instant the listing is no longer offerable.
    pub expiry_date: DateTime<Utc>,

    /// Timestamp when the listing was created.
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last mutation.
    pub updated_at: DateTime<Utc>,
}

/// Fields a donor supplies when creating a listing.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDonation {
    pub title: String,
    pub description: String,
    pub category: FoodCategory,
    pub quantity: f64,
    pub unit: String,
    pub pickup_address: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub expiry_date: DateTime<Utc>,
}

/// Partial edit applied by the owning donor while the listing is `active`.
/// Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DonationPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<FoodCategory>,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub pickup_address: Option<String>,
    pub images: Option<Vec<String>>,
    pub expiry_date: Option<DateTime<Utc>>,
}
