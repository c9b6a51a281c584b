//! src/services/lifecycle_service.rs
//!
//! LifecycleService — the single owner of donation state transitions,
//! regardless of which actor or UI surface triggers them. Every transition
//! is one logical unit of work: read current state, validate actor and
//! source status, then write behind a conditional `UPDATE` keyed on the
//! current status. A guard that matches zero rows leaves the record
//! untouched; the row is re-read once to classify what actually happened.

use crate::models::donation::{Donation, DonationPatch, DonationStatus, FoodCategory, NewDonation};
use crate::models::reservation::{Reservation, ReservationStatus};
use crate::models::user::UserRole;
use crate::services::identity_service::{IdentityError, IdentityService};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct ListActiveParams {
    pub category: Option<FoodCategory>,
    pub continuation_token: Option<String>,
    pub max_results: usize,
}

#[derive(Debug)]
pub struct ListActiveResult {
    pub donations: Vec<Donation>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("donation `{0}` not found")]
    DonationNotFound(Uuid),
    #[error("cannot {action} a donation while it is `{status}`")]
    InvalidTransition {
        action: &'static str,
        status: DonationStatus,
    },
    #[error("user `{user_id}` may not {action} this donation")]
    UnauthorizedActor { user_id: Uuid, action: &'static str },
    #[error("this donation was already reserved by someone else")]
    ReservationConflict,
    #[error("expiry date must be in the future")]
    ExpiryInPast,
    #[error("invalid continuation token")]
    InvalidContinuationToken,
    #[error("reservation history filter must be `reserved` or `completed`")]
    InvalidHistoryFilter,
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

const DONATION_COLUMNS: &str = "id, donor_id, title, description, category, quantity, unit, \
     pickup_address, images, status, reserved_by, reserved_at, completed_at, \
     expiry_date, created_at, updated_at";

const MAX_LIST_RESULTS: usize = 100;

/// LifecycleService enforces the donation state machine:
/// - Create a listing (donor; expiry strictly in the future)
/// - Reserve it (recipient; exactly one winner under contention)
/// - Complete the hand-off (owning donor or reserving recipient)
/// - Cancel it (owning donor; voids an open reservation)
/// - Sweep expired listings (idempotent, system-triggered)
/// - Serve the per-actor listings (available / owned / reserved history)
///
/// Role claims come from the injected [`IdentityService`]; this service
/// never trusts the caller's word for who is acting.
#[derive(Clone)]
pub struct LifecycleService {
    /// Shared SQLite connection pool holding donation and reservation rows.
    pub db: Arc<SqlitePool>,

    /// Resolves acting identities to their role claims.
    identity: IdentityService,
}

impl LifecycleService {
    pub fn new(db: Arc<SqlitePool>, identity: IdentityService) -> Self {
        Self { db, identity }
    }

    /// Fetch a single donation row.
    ///
    /// Returns DonationNotFound if missing.
    pub async fn fetch_donation(&self, id: Uuid) -> LifecycleResult<Donation> {
        sqlx::query_as::<_, Donation>(&format!(
            "SELECT {DONATION_COLUMNS} FROM donations WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => LifecycleError::DonationNotFound(id),
            other => LifecycleError::Store(other),
        })
    }

    /// Create a new listing owned by `donor_id`, starting out `active`.
    ///
    /// The acting identity must hold the donor role, and the expiry must be
    /// strictly in the future at creation time.
    pub async fn create_donation(
        &self,
        donor_id: Uuid,
        new: NewDonation,
    ) -> LifecycleResult<Donation> {
        let role = self.identity.resolve_role(donor_id).await?;
        if role != UserRole::Donor {
            return Err(LifecycleError::UnauthorizedActor {
                user_id: donor_id,
                action: "create",
            });
        }

        let now = Utc::now();
        if new.expiry_date <= now {
            return Err(LifecycleError::ExpiryInPast);
        }

        let donation = Donation {
            id: Uuid::new_v4(),
            donor_id,
            title: new.title,
            description: new.description,
            category: new.category,
            quantity: new.quantity,
            unit: new.unit,
            pickup_address: new.pickup_address,
            images: Json(new.images),
            status: DonationStatus::Active,
            reserved_by: None,
            reserved_at: None,
            completed_at: None,
            expiry_date: new.expiry_date,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(&format!(
            "INSERT INTO donations ({DONATION_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(donation.id)
        .bind(donation.donor_id)
        .bind(&donation.title)
        .bind(&donation.description)
        .bind(donation.category)
        .bind(donation.quantity)
        .bind(&donation.unit)
        .bind(&donation.pickup_address)
        .bind(&donation.images)
        .bind(donation.status)
        .bind(donation.reserved_by)
        .bind(donation.reserved_at)
        .bind(donation.completed_at)
        .bind(donation.expiry_date)
        .bind(donation.created_at)
        .bind(donation.updated_at)
        .execute(&*self.db)
        .await?;

        info!("donor {} listed donation {}", donor_id, donation.id);
        Ok(donation)
    }

    /// Edit a listing the acting donor still owns, while it is `active`.
    ///
    /// Absent patch fields keep their current value. The write is guarded on
    /// `status = 'active'` so an edit can never race past a reservation.
    pub async fn update_donation(
        &self,
        donation_id: Uuid,
        donor_id: Uuid,
        patch: DonationPatch,
    ) -> LifecycleResult<Donation> {
        let current = self.fetch_donation(donation_id).await?;
        if current.donor_id != donor_id {
            return Err(LifecycleError::UnauthorizedActor {
                user_id: donor_id,
                action: "edit",
            });
        }

        let now = Utc::now();
        let expiry_date = patch.expiry_date.unwrap_or(current.expiry_date);
        if expiry_date <= now {
            return Err(LifecycleError::ExpiryInPast);
        }

        let images = patch.images.map(Json).unwrap_or(current.images);
        let result = sqlx::query(
            "UPDATE donations
             SET title = ?, description = ?, category = ?, quantity = ?, unit = ?,
                 pickup_address = ?, images = ?, expiry_date = ?, updated_at = ?
             WHERE id = ? AND status = 'active'",
        )
        .bind(patch.title.unwrap_or(current.title))
        .bind(patch.description.unwrap_or(current.description))
        .bind(patch.category.unwrap_or(current.category))
        .bind(patch.quantity.unwrap_or(current.quantity))
        .bind(patch.unit.unwrap_or(current.unit))
        .bind(patch.pickup_address.unwrap_or(current.pickup_address))
        .bind(images)
        .bind(expiry_date)
        .bind(now)
        .bind(donation_id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.fetch_donation(donation_id).await?;
            return Err(LifecycleError::InvalidTransition {
                action: "edit",
                status: current.status,
            });
        }

        self.fetch_donation(donation_id).await
    }

    /// Reserve an `active` donation for a recipient.
    ///
    /// The guard is the sole concurrency control: of two concurrent
    /// reservations exactly one matches `status = 'active'` and wins; the
    /// other observes zero affected rows and gets ReservationConflict. The
    /// guard also rejects listings whose expiry has passed but which no
    /// sweep has visited yet.
    pub async fn reserve(&self, donation_id: Uuid, recipient_id: Uuid) -> LifecycleResult<Donation> {
        let role = self.identity.resolve_role(recipient_id).await?;
        if role != UserRole::Recipient {
            return Err(LifecycleError::UnauthorizedActor {
                user_id: recipient_id,
                action: "reserve",
            });
        }

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE donations
             SET status = 'reserved', reserved_by = ?, reserved_at = ?, updated_at = ?
             WHERE id = ? AND status = 'active' AND expiry_date > ?",
        )
        .bind(recipient_id)
        .bind(now)
        .bind(now)
        .bind(donation_id)
        .bind(now)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.fetch_donation(donation_id).await?;
            return Err(match current.status {
                DonationStatus::Reserved => LifecycleError::ReservationConflict,
                // Still `active` in the store, so the expiry guard is what
                // rejected us: the listing is effectively expired.
                DonationStatus::Active => LifecycleError::InvalidTransition {
                    action: "reserve",
                    status: DonationStatus::Expired,
                },
                status => LifecycleError::InvalidTransition {
                    action: "reserve",
                    status,
                },
            });
        }

        sqlx::query(
            "INSERT INTO reservations (id, donation_id, recipient_id, status, reserved_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(donation_id)
        .bind(recipient_id)
        .bind(ReservationStatus::Reserved)
        .bind(now)
        .execute(&*self.db)
        .await?;

        debug!("recipient {} reserved donation {}", recipient_id, donation_id);
        self.fetch_donation(donation_id).await
    }

    /// Confirm the hand-off of a `reserved` donation.
    ///
    /// Either the owning donor or the reserving recipient may confirm.
    pub async fn complete(&self, donation_id: Uuid, actor_id: Uuid) -> LifecycleResult<Donation> {
        let current = self.fetch_donation(donation_id).await?;
        if current.status != DonationStatus::Reserved {
            return Err(LifecycleError::InvalidTransition {
                action: "complete",
                status: current.status,
            });
        }
        if actor_id != current.donor_id && current.reserved_by != Some(actor_id) {
            return Err(LifecycleError::UnauthorizedActor {
                user_id: actor_id,
                action: "complete",
            });
        }

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE donations SET status = 'completed', completed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'reserved'",
        )
        .bind(now)
        .bind(now)
        .bind(donation_id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            // The status moved between our read and the guarded write.
            let current = self.fetch_donation(donation_id).await?;
            return Err(LifecycleError::InvalidTransition {
                action: "complete",
                status: current.status,
            });
        }

        sqlx::query(
            "UPDATE reservations SET status = ?, completed_at = ?
             WHERE donation_id = ? AND status = ?",
        )
        .bind(ReservationStatus::Completed)
        .bind(now)
        .bind(donation_id)
        .bind(ReservationStatus::Reserved)
        .execute(&*self.db)
        .await?;

        info!("donation {} completed by {}", donation_id, actor_id);
        self.fetch_donation(donation_id).await
    }

    /// Cancel a donation the acting donor owns.
    ///
    /// Legal from `active` or `reserved`. Cancelling a reserved donation
    /// voids the reservation (never transfers it) and clears `reserved_by`,
    /// so the iff-invariant on that column holds in the terminal state.
    pub async fn cancel(&self, donation_id: Uuid, donor_id: Uuid) -> LifecycleResult<Donation> {
        let current = self.fetch_donation(donation_id).await?;
        if current.donor_id != donor_id {
            return Err(LifecycleError::UnauthorizedActor {
                user_id: donor_id,
                action: "cancel",
            });
        }

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE donations
             SET status = 'cancelled', reserved_by = NULL, reserved_at = NULL, updated_at = ?
             WHERE id = ? AND status IN ('active', 'reserved')",
        )
        .bind(now)
        .bind(donation_id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.fetch_donation(donation_id).await?;
            return Err(LifecycleError::InvalidTransition {
                action: "cancel",
                status: current.status,
            });
        }

        sqlx::query(
            "UPDATE reservations SET status = ?, cancelled_at = ?
             WHERE donation_id = ? AND status = ?",
        )
        .bind(ReservationStatus::Cancelled)
        .bind(now)
        .bind(donation_id)
        .bind(ReservationStatus::Reserved)
        .execute(&*self.db)
        .await?;

        info!("donor {} cancelled donation {}", donor_id, donation_id);
        self.fetch_donation(donation_id).await
    }

    /// Transition every `active` donation whose expiry has passed to
    /// `expired`, returning how many rows were swept.
    ///
    /// Idempotent: already-expired rows no longer match the guard, so
    /// re-running the sweep affects nothing and is not an error.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> LifecycleResult<u64> {
        let result = sqlx::query(
            "UPDATE donations SET status = 'expired', updated_at = ?
             WHERE status = 'active' AND expiry_date <= ?",
        )
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await?;

        let swept = result.rows_affected();
        if swept > 0 {
            info!("expiry sweep transitioned {} donations", swept);
        }
        Ok(swept)
    }

    /// List donations available to recipients.
    ///
    /// Only `active` listings whose expiry is still in the future *at query
    /// time* are returned — a stale `active` row the sweep has not visited
    /// yet is filtered here, not trusted from its stored status. Ordered
    /// newest first with a stable id tie-break, keyset-paginated behind an
    /// opaque continuation token.
    pub async fn list_active(&self, params: ListActiveParams) -> LifecycleResult<ListActiveResult> {
        let now = Utc::now();
        let max_results = params.max_results.clamp(1, MAX_LIST_RESULTS);
        let fetch_limit = max_results + 1;

        let cursor = params
            .continuation_token
            .as_deref()
            .map(decode_continuation_token)
            .transpose()?;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {DONATION_COLUMNS} FROM donations \
             WHERE status = 'active' AND expiry_date > "
        ));
        builder.push_bind(now);

        if let Some(category) = params.category {
            builder.push(" AND category = ");
            builder.push_bind(category);
        }

        if let Some((created_at, id)) = cursor {
            builder.push(" AND (created_at < ");
            builder.push_bind(created_at);
            builder.push(" OR (created_at = ");
            builder.push_bind(created_at);
            builder.push(" AND id > ");
            builder.push_bind(id);
            builder.push("))");
        }

        builder.push(" ORDER BY created_at DESC, id ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<Donation> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut is_truncated = false;
        if rows.len() == fetch_limit {
            rows.pop();
            is_truncated = true;
        }
        let next_continuation_token = if is_truncated {
            rows.last().map(encode_continuation_token)
        } else {
            None
        };

        Ok(ListActiveResult {
            donations: rows,
            is_truncated,
            next_continuation_token,
        })
    }

    /// Every donation the donor owns, regardless of status, newest first.
    pub async fn list_owned_by(&self, donor_id: Uuid) -> LifecycleResult<Vec<Donation>> {
        self.identity.fetch_user(donor_id).await?;
        let rows = sqlx::query_as::<_, Donation>(&format!(
            "SELECT {DONATION_COLUMNS} FROM donations
             WHERE donor_id = ? ORDER BY created_at DESC, id ASC"
        ))
        .bind(donor_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// The recipient's history: donations they currently hold or have
    /// completed. `status_filter` may narrow to one of the two.
    pub async fn list_reserved_by(
        &self,
        recipient_id: Uuid,
        status_filter: Option<DonationStatus>,
    ) -> LifecycleResult<Vec<Donation>> {
        self.identity.fetch_user(recipient_id).await?;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {DONATION_COLUMNS} FROM donations WHERE reserved_by = "
        ));
        builder.push_bind(recipient_id);

        match status_filter {
            None => {
                builder.push(" AND status IN ('reserved', 'completed')");
            }
            Some(status @ (DonationStatus::Reserved | DonationStatus::Completed)) => {
                builder.push(" AND status = ");
                builder.push_bind(status);
            }
            Some(_) => return Err(LifecycleError::InvalidHistoryFilter),
        }

        builder.push(" ORDER BY reserved_at DESC, id ASC");

        let rows = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    /// Reservation audit rows for one donation, newest first.
    pub async fn reservations_for(&self, donation_id: Uuid) -> LifecycleResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, Reservation>(
            "SELECT id, donation_id, recipient_id, status, reserved_at, completed_at, cancelled_at
             FROM reservations WHERE donation_id = ?
             ORDER BY reserved_at DESC, id ASC",
        )
        .bind(donation_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }
}

/// Encode a listing-page cursor as an opaque token.
fn encode_continuation_token(donation: &Donation) -> String {
    let raw = format!("{}|{}", donation.created_at.to_rfc3339(), donation.id);
    general_purpose::STANDARD.encode(raw)
}

/// Decode a continuation token back into its (created_at, id) cursor.
fn decode_continuation_token(token: &str) -> LifecycleResult<(DateTime<Utc>, Uuid)> {
    let bytes = general_purpose::STANDARD
        .decode(token)
        .map_err(|_| LifecycleError::InvalidContinuationToken)?;
    let raw = String::from_utf8(bytes).map_err(|_| LifecycleError::InvalidContinuationToken)?;
    let (created_at, id) = raw
        .split_once('|')
        .ok_or(LifecycleError::InvalidContinuationToken)?;
    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|_| LifecycleError::InvalidContinuationToken)?
        .with_timezone(&Utc);
    let id = Uuid::parse_str(id).map_err(|_| LifecycleError::InvalidContinuationToken)?;
    Ok((created_at, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::{NewUser, User};
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

    async fn test_service() -> (LifecycleService, IdentityService) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        for stmt in INIT_SQL.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(&pool).await.expect("schema");
        }
        let db = Arc::new(pool);
        let identity = IdentityService::new(db.clone());
        (LifecycleService::new(db, identity.clone()), identity)
    }

    async fn register(identity: &IdentityService, email: &str, role: UserRole) -> User {
        identity
            .register_user(NewUser {
                email: email.to_string(),
                display_name: email.split('@').next().unwrap_or(email).to_string(),
                role,
            })
            .await
            .expect("register user")
    }

    fn listing(title: &str) -> NewDonation {
        NewDonation {
            title: title.to_string(),
            description: "still fresh, collect tonight".to_string(),
            category: FoodCategory::Prepared,
            quantity: 4.0,
            unit: "portions".to_string(),
            pickup_address: "12 Mill Lane".to_string(),
            images: vec!["images/tray.jpg".to_string()],
            expiry_date: Utc::now() + Duration::hours(6),
        }
    }

    /// Force a stored expiry into the past without going through the
    /// service (which rightly refuses to create such a listing).
    async fn backdate_expiry(svc: &LifecycleService, donation_id: Uuid, hours: i64) {
        sqlx::query("UPDATE donations SET expiry_date = ? WHERE id = ?")
            .bind(Utc::now() - Duration::hours(hours))
            .bind(donation_id)
            .execute(&*svc.db)
            .await
            .expect("backdate expiry");
    }

    async fn set_created_at(svc: &LifecycleService, donation_id: Uuid, at: DateTime<Utc>) {
        sqlx::query("UPDATE donations SET created_at = ? WHERE id = ?")
            .bind(at)
            .bind(donation_id)
            .execute(&*svc.db)
            .await
            .expect("set created_at");
    }

    #[tokio::test]
    async fn reserve_sets_holder_and_audit_row() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let recipient = register(&identity, "rcpt@example.org", UserRole::Recipient).await;
        let donation = svc.create_donation(donor.id, listing("bread")).await.unwrap();

        assert_eq!(donation.status, DonationStatus::Active);
        assert_eq!(donation.reserved_by, None);

        let reserved = svc.reserve(donation.id, recipient.id).await.unwrap();
        assert_eq!(reserved.status, DonationStatus::Reserved);
        assert_eq!(reserved.reserved_by, Some(recipient.id));
        assert!(reserved.reserved_at.is_some());

        let audit = svc.reservations_for(donation.id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].recipient_id, recipient.id);
        assert_eq!(audit[0].status, ReservationStatus::Reserved);
    }

    #[tokio::test]
    async fn concurrent_reserves_have_exactly_one_winner() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let first = register(&identity, "first@example.org", UserRole::Recipient).await;
        let second = register(&identity, "second@example.org", UserRole::Recipient).await;
        let donation = svc.create_donation(donor.id, listing("soup")).await.unwrap();

        let (a, b) = tokio::join!(
            svc.reserve(donation.id, first.id),
            svc.reserve(donation.id, second.id)
        );

        let mut winners = Vec::new();
        let mut losers = Vec::new();
        for (recipient_id, outcome) in [(first.id, a), (second.id, b)] {
            match outcome {
                Ok(_) => winners.push(recipient_id),
                Err(err) => losers.push(err),
            }
        }
        assert_eq!(winners.len(), 1, "expected exactly one winner");
        assert_eq!(losers.len(), 1);
        assert!(matches!(losers[0], LifecycleError::ReservationConflict));

        let final_row = svc.fetch_donation(donation.id).await.unwrap();
        assert_eq!(final_row.status, DonationStatus::Reserved);
        assert_eq!(final_row.reserved_by, Some(winners[0]));
    }

    #[tokio::test]
    async fn sequential_second_reserve_conflicts() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let first = register(&identity, "first@example.org", UserRole::Recipient).await;
        let second = register(&identity, "second@example.org", UserRole::Recipient).await;
        let donation = svc.create_donation(donor.id, listing("rice")).await.unwrap();

        svc.reserve(donation.id, first.id).await.unwrap();
        let err = svc.reserve(donation.id, second.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::ReservationConflict));
    }

    #[tokio::test]
    async fn reserve_requires_recipient_role() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let other_donor = register(&identity, "other@example.org", UserRole::Donor).await;
        let donation = svc.create_donation(donor.id, listing("milk")).await.unwrap();

        let err = svc.reserve(donation.id, other_donor.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::UnauthorizedActor { .. }));

        let untouched = svc.fetch_donation(donation.id).await.unwrap();
        assert_eq!(untouched.status, DonationStatus::Active);
        assert_eq!(untouched.reserved_by, None);
    }

    #[tokio::test]
    async fn reserve_rejects_unswept_expired_listing() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let recipient = register(&identity, "rcpt@example.org", UserRole::Recipient).await;
        let donation = svc.create_donation(donor.id, listing("stew")).await.unwrap();
        backdate_expiry(&svc, donation.id, 2).await;

        let err = svc.reserve(donation.id, recipient.id).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                action: "reserve",
                status: DonationStatus::Expired,
            }
        ));
    }

    #[tokio::test]
    async fn sweep_expires_stale_listings_idempotently() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let stale = svc.create_donation(donor.id, listing("stale")).await.unwrap();
        let fresh = svc.create_donation(donor.id, listing("fresh")).await.unwrap();
        backdate_expiry(&svc, stale.id, 3).await;

        let swept = svc.sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(swept, 1);
        assert_eq!(
            svc.fetch_donation(stale.id).await.unwrap().status,
            DonationStatus::Expired
        );
        assert_eq!(
            svc.fetch_donation(fresh.id).await.unwrap().status,
            DonationStatus::Active
        );

        // Second pass is a no-op, not an error.
        let swept_again = svc.sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(swept_again, 0);
        assert_eq!(
            svc.fetch_donation(stale.id).await.unwrap().status,
            DonationStatus::Expired
        );
    }

    #[tokio::test]
    async fn cancel_reserved_voids_reservation_and_terminates() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let recipient = register(&identity, "rcpt@example.org", UserRole::Recipient).await;
        let donation = svc.create_donation(donor.id, listing("pasta")).await.unwrap();
        svc.reserve(donation.id, recipient.id).await.unwrap();

        let cancelled = svc.cancel(donation.id, donor.id).await.unwrap();
        assert_eq!(cancelled.status, DonationStatus::Cancelled);
        assert_eq!(cancelled.reserved_by, None);
        assert_eq!(cancelled.reserved_at, None);

        let audit = svc.reservations_for(donation.id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].status, ReservationStatus::Cancelled);
        assert!(audit[0].cancelled_at.is_some());

        // Terminal: nothing re-opens a cancelled donation.
        let err = svc.reserve(donation.id, recipient.id).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                status: DonationStatus::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancel_requires_owning_donor() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let other = register(&identity, "other@example.org", UserRole::Donor).await;
        let donation = svc.create_donation(donor.id, listing("cake")).await.unwrap();

        let err = svc.cancel(donation.id, other.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::UnauthorizedActor { .. }));
        assert_eq!(
            svc.fetch_donation(donation.id).await.unwrap().status,
            DonationStatus::Active
        );
    }

    #[tokio::test]
    async fn complete_rejected_without_reservation() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let donation = svc.create_donation(donor.id, listing("jam")).await.unwrap();

        let err = svc.complete(donation.id, donor.id).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                action: "complete",
                status: DonationStatus::Active,
            }
        ));
    }

    #[tokio::test]
    async fn complete_allowed_for_donor_and_recipient_only() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let recipient = register(&identity, "rcpt@example.org", UserRole::Recipient).await;
        let stranger = register(&identity, "stranger@example.org", UserRole::Recipient).await;

        // Recipient confirms.
        let first = svc.create_donation(donor.id, listing("beans")).await.unwrap();
        svc.reserve(first.id, recipient.id).await.unwrap();
        let err = svc.complete(first.id, stranger.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::UnauthorizedActor { .. }));
        let done = svc.complete(first.id, recipient.id).await.unwrap();
        assert_eq!(done.status, DonationStatus::Completed);
        assert_eq!(done.reserved_by, Some(recipient.id));
        assert!(done.completed_at.is_some());

        // Donor confirms.
        let second = svc.create_donation(donor.id, listing("flour")).await.unwrap();
        svc.reserve(second.id, recipient.id).await.unwrap();
        let done = svc.complete(second.id, donor.id).await.unwrap();
        assert_eq!(done.status, DonationStatus::Completed);

        let audit = svc.reservations_for(second.id).await.unwrap();
        assert_eq!(audit[0].status, ReservationStatus::Completed);
    }

    #[tokio::test]
    async fn reserved_by_is_set_iff_reserved_or_completed() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let recipient = register(&identity, "rcpt@example.org", UserRole::Recipient).await;

        let invariant = |d: &Donation| {
            let should_hold = matches!(
                d.status,
                DonationStatus::Reserved | DonationStatus::Completed
            );
            assert_eq!(
                d.reserved_by.is_some(),
                should_hold,
                "reserved_by/{} mismatch",
                d.status
            );
        };

        let a = svc.create_donation(donor.id, listing("a")).await.unwrap();
        invariant(&a);
        let a = svc.reserve(a.id, recipient.id).await.unwrap();
        invariant(&a);
        let a = svc.complete(a.id, recipient.id).await.unwrap();
        invariant(&a);

        let b = svc.create_donation(donor.id, listing("b")).await.unwrap();
        let b = svc.reserve(b.id, recipient.id).await.unwrap();
        invariant(&b);
        let b = svc.cancel(b.id, donor.id).await.unwrap();
        invariant(&b);

        let c = svc.create_donation(donor.id, listing("c")).await.unwrap();
        backdate_expiry(&svc, c.id, 1).await;
        svc.sweep_expired(Utc::now()).await.unwrap();
        let c = svc.fetch_donation(c.id).await.unwrap();
        invariant(&c);
    }

    #[tokio::test]
    async fn create_rejects_past_expiry() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;

        let mut stale = listing("old");
        stale.expiry_date = Utc::now() - Duration::minutes(1);
        let err = svc.create_donation(donor.id, stale).await.unwrap_err();
        assert!(matches!(err, LifecycleError::ExpiryInPast));
    }

    #[tokio::test]
    async fn edit_only_while_active_and_only_by_owner() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let other = register(&identity, "other@example.org", UserRole::Donor).await;
        let recipient = register(&identity, "rcpt@example.org", UserRole::Recipient).await;
        let donation = svc.create_donation(donor.id, listing("buns")).await.unwrap();

        let patch = DonationPatch {
            title: Some("day-old buns".to_string()),
            quantity: Some(12.0),
            ..DonationPatch::default()
        };
        let err = svc
            .update_donation(donation.id, other.id, patch.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::UnauthorizedActor { .. }));

        let edited = svc
            .update_donation(donation.id, donor.id, patch.clone())
            .await
            .unwrap();
        assert_eq!(edited.title, "day-old buns");
        assert_eq!(edited.quantity, 12.0);
        assert_eq!(edited.description, "still fresh, collect tonight");

        svc.reserve(donation.id, recipient.id).await.unwrap();
        let err = svc
            .update_donation(donation.id, donor.id, patch)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                action: "edit",
                status: DonationStatus::Reserved,
            }
        ));
    }

    #[tokio::test]
    async fn listing_hides_unswept_expired_donations() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let visible = svc.create_donation(donor.id, listing("visible")).await.unwrap();
        let hidden = svc.create_donation(donor.id, listing("hidden")).await.unwrap();
        backdate_expiry(&svc, hidden.id, 1).await;

        // No sweep has run: the stale row still says `active` in the store.
        assert_eq!(
            svc.fetch_donation(hidden.id).await.unwrap().status,
            DonationStatus::Active
        );

        let page = svc
            .list_active(ListActiveParams {
                max_results: 10,
                ..ListActiveParams::default()
            })
            .await
            .unwrap();
        let ids: Vec<Uuid> = page.donations.iter().map(|d| d.id).collect();
        assert!(ids.contains(&visible.id));
        assert!(!ids.contains(&hidden.id));
    }

    #[tokio::test]
    async fn listing_orders_newest_first_and_paginates() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let recipient = register(&identity, "rcpt@example.org", UserRole::Recipient).await;

        let oldest = svc.create_donation(donor.id, listing("oldest")).await.unwrap();
        let middle = svc.create_donation(donor.id, listing("middle")).await.unwrap();
        let newest = svc.create_donation(donor.id, listing("newest")).await.unwrap();
        let reserved = svc.create_donation(donor.id, listing("taken")).await.unwrap();
        svc.reserve(reserved.id, recipient.id).await.unwrap();

        let base = Utc::now();
        set_created_at(&svc, oldest.id, base - Duration::minutes(30)).await;
        set_created_at(&svc, middle.id, base - Duration::minutes(20)).await;
        set_created_at(&svc, newest.id, base - Duration::minutes(10)).await;

        let first_page = svc
            .list_active(ListActiveParams {
                max_results: 2,
                ..ListActiveParams::default()
            })
            .await
            .unwrap();
        assert!(first_page.is_truncated);
        assert_eq!(first_page.donations.len(), 2);
        assert_eq!(first_page.donations[0].id, newest.id);
        assert_eq!(first_page.donations[1].id, middle.id);

        let token = first_page.next_continuation_token.expect("token");
        let second_page = svc
            .list_active(ListActiveParams {
                max_results: 2,
                continuation_token: Some(token),
                ..ListActiveParams::default()
            })
            .await
            .unwrap();
        assert!(!second_page.is_truncated);
        assert_eq!(second_page.donations.len(), 1);
        assert_eq!(second_page.donations[0].id, oldest.id);
        assert!(second_page.next_continuation_token.is_none());
    }

    #[tokio::test]
    async fn listing_breaks_created_at_ties_by_id() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let a = svc.create_donation(donor.id, listing("tie-a")).await.unwrap();
        let b = svc.create_donation(donor.id, listing("tie-b")).await.unwrap();

        let shared = Utc::now() - Duration::minutes(5);
        set_created_at(&svc, a.id, shared).await;
        set_created_at(&svc, b.id, shared).await;

        let page = svc
            .list_active(ListActiveParams {
                max_results: 10,
                ..ListActiveParams::default()
            })
            .await
            .unwrap();
        assert_eq!(page.donations.len(), 2);
        assert!(page.donations[0].id < page.donations[1].id);
    }

    #[tokio::test]
    async fn listing_rejects_garbage_continuation_token() {
        let (svc, _identity) = test_service().await;
        let err = svc
            .list_active(ListActiveParams {
                max_results: 10,
                continuation_token: Some("not-base64!".to_string()),
                ..ListActiveParams::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidContinuationToken));
    }

    #[tokio::test]
    async fn listing_filters_by_category() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let mut bread = listing("bread");
        bread.category = FoodCategory::Bakery;
        let bakery = svc.create_donation(donor.id, bread).await.unwrap();
        svc.create_donation(donor.id, listing("stew")).await.unwrap();

        let page = svc
            .list_active(ListActiveParams {
                category: Some(FoodCategory::Bakery),
                max_results: 10,
                ..ListActiveParams::default()
            })
            .await
            .unwrap();
        assert_eq!(page.donations.len(), 1);
        assert_eq!(page.donations[0].id, bakery.id);
    }

    #[tokio::test]
    async fn donor_listing_shows_every_status() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let recipient = register(&identity, "rcpt@example.org", UserRole::Recipient).await;

        let active = svc.create_donation(donor.id, listing("active")).await.unwrap();
        let cancelled = svc.create_donation(donor.id, listing("cancelled")).await.unwrap();
        svc.cancel(cancelled.id, donor.id).await.unwrap();
        let completed = svc.create_donation(donor.id, listing("completed")).await.unwrap();
        svc.reserve(completed.id, recipient.id).await.unwrap();
        svc.complete(completed.id, recipient.id).await.unwrap();

        let owned = svc.list_owned_by(donor.id).await.unwrap();
        let ids: Vec<Uuid> = owned.iter().map(|d| d.id).collect();
        assert_eq!(owned.len(), 3);
        assert!(ids.contains(&active.id));
        assert!(ids.contains(&cancelled.id));
        assert!(ids.contains(&completed.id));
    }

    #[tokio::test]
    async fn recipient_history_covers_reserved_and_completed_only() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let recipient = register(&identity, "rcpt@example.org", UserRole::Recipient).await;

        let held = svc.create_donation(donor.id, listing("held")).await.unwrap();
        svc.reserve(held.id, recipient.id).await.unwrap();
        let done = svc.create_donation(donor.id, listing("done")).await.unwrap();
        svc.reserve(done.id, recipient.id).await.unwrap();
        svc.complete(done.id, recipient.id).await.unwrap();
        let voided = svc.create_donation(donor.id, listing("voided")).await.unwrap();
        svc.reserve(voided.id, recipient.id).await.unwrap();
        svc.cancel(voided.id, donor.id).await.unwrap();

        let history = svc.list_reserved_by(recipient.id, None).await.unwrap();
        let ids: Vec<Uuid> = history.iter().map(|d| d.id).collect();
        assert_eq!(history.len(), 2);
        assert!(ids.contains(&held.id));
        assert!(ids.contains(&done.id));

        let held_only = svc
            .list_reserved_by(recipient.id, Some(DonationStatus::Reserved))
            .await
            .unwrap();
        assert_eq!(held_only.len(), 1);
        assert_eq!(held_only[0].id, held.id);

        let err = svc
            .list_reserved_by(recipient.id, Some(DonationStatus::Cancelled))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidHistoryFilter));
    }

    #[tokio::test]
    async fn unknown_actor_is_a_not_found() {
        let (svc, identity) = test_service().await;
        let donor = register(&identity, "donor@example.org", UserRole::Donor).await;
        let donation = svc.create_donation(donor.id, listing("ghosted")).await.unwrap();

        let err = svc.reserve(donation.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Identity(IdentityError::UserNotFound(_))
        ));
    }
}
