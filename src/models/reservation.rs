//! Represents a reservation — the binding of a recipient to a donation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status of a reservation, mirroring the donation's status for the
/// reserving recipient's view.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// The recipient currently holds the donation.
    Reserved,
    /// The hand-off was confirmed.
    Completed,
    /// Voided because the donor cancelled the donation.
    Cancelled,
}

/// Audit row linking a recipient to a donation they claimed.
///
/// A donation accumulates at most one open (`reserved`) row at a time; prior
/// rows stay behind as history when a reservation is voided.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Reservation {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// The donation this reservation binds.
    pub donation_id: Uuid,

    /// The recipient who claimed it.
    pub recipient_id: Uuid,

    /// Current status of this binding.
    pub status: ReservationStatus,

    /// When the reservation was taken.
    pub reserved_at: DateTime<Utc>,

    /// When the hand-off was confirmed, if it was.
    pub completed_at: Option<DateTime<Utc>>,

    /// When the donor voided it, if they did.
    pub cancelled_at: Option<DateTime<Utc>>,
}
