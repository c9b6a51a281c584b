//! HTTP handlers for donation lifecycle operations.
//! Every transition request is delegated to `LifecycleService`; no handler
//! touches the store directly, so the conditional-update guard cannot be
//! bypassed from any surface.

use crate::{
    errors::AppError,
    models::donation::{Donation, DonationPatch, DonationStatus, FoodCategory, NewDonation},
    models::reservation::Reservation,
    services::lifecycle_service::ListActiveParams,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 50;

/// Query params accepted by the available-donations listing.
#[derive(Debug, Deserialize)]
pub struct ListDonationsQuery {
    pub category: Option<FoodCategory>,
    #[serde(rename = "max-results")]
    pub max_results: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
}

/// Query params for a recipient's reservation history.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub status: Option<DonationStatus>,
}

/// Request body for `POST /donations`.
#[derive(Debug, Deserialize)]
pub struct CreateDonationReq {
    pub donor_id: Uuid,
    #[serde(flatten)]
    pub donation: NewDonation,
}

/// Request body for `PUT /donations/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateDonationReq {
    pub donor_id: Uuid,
    #[serde(flatten)]
    pub patch: DonationPatch,
}

#[derive(Debug, Deserialize)]
pub struct ReserveReq {
    pub recipient_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CancelReq {
    pub donor_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CompleteReq {
    pub actor_id: Uuid,
}

#[derive(Serialize)]
pub struct DonationPage {
    pub count: usize,
    pub donations: Vec<Donation>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

#[derive(Serialize)]
pub struct DonationList {
    pub count: usize,
    pub donations: Vec<Donation>,
}

#[derive(Serialize)]
pub struct SweepResponse {
    pub expired: u64,
}

#[derive(Serialize)]
pub struct ReservationList {
    pub count: usize,
    pub reservations: Vec<Reservation>,
}

/// POST `/donations` — create a listing.
pub async fn create_donation(
    State(state): State<AppState>,
    Json(req): Json<CreateDonationReq>,
) -> Result<impl IntoResponse, AppError> {
    let donation = state
        .lifecycle
        .create_donation(req.donor_id, req.donation)
        .await?;
    Ok((StatusCode::CREATED, Json(donation)))
}

/// GET `/donations/{id}` — fetch one listing.
pub async fn get_donation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let donation = state.lifecycle.fetch_donation(id).await?;
    Ok(Json(donation))
}

/// PUT `/donations/{id}` — donor edit while the listing is still active.
pub async fn update_donation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateDonationReq>,
) -> Result<impl IntoResponse, AppError> {
    let donation = state
        .lifecycle
        .update_donation(id, req.donor_id, req.patch)
        .await?;
    Ok(Json(donation))
}

/// GET `/donations` — what recipients can browse right now.
/// Supports ?category=&max-results=&continuation-token=
pub async fn list_donations(
    State(state): State<AppState>,
    Query(q): Query<ListDonationsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let params = ListActiveParams {
        category: q.category,
        continuation_token: q.continuation_token,
        max_results: q.max_results.unwrap_or(DEFAULT_PAGE_SIZE),
    };
    let page = state.lifecycle.list_active(params).await?;
    Ok(Json(DonationPage {
        count: page.donations.len(),
        donations: page.donations,
        is_truncated: page.is_truncated,
        next_continuation_token: page.next_continuation_token,
    }))
}

/// POST `/donations/{id}/reserve` — recipient claims a listing.
pub async fn reserve_donation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReserveReq>,
) -> Result<impl IntoResponse, AppError> {
    let donation = state.lifecycle.reserve(id, req.recipient_id).await?;
    Ok(Json(donation))
}

/// POST `/donations/{id}/cancel` — owning donor withdraws a listing.
pub async fn cancel_donation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelReq>,
) -> Result<impl IntoResponse, AppError> {
    let donation = state.lifecycle.cancel(id, req.donor_id).await?;
    Ok(Json(donation))
}

/// POST `/donations/{id}/complete` — donor or reserving recipient confirms
/// the hand-off.
pub async fn complete_donation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteReq>,
) -> Result<impl IntoResponse, AppError> {
    let donation = state.lifecycle.complete(id, req.actor_id).await?;
    Ok(Json(donation))
}

/// POST `/donations/sweep` — expiry sweep, driven by an external scheduler.
pub async fn sweep_donations(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let expired = state.lifecycle.sweep_expired(Utc::now()).await?;
    Ok(Json(SweepResponse { expired }))
}

/// GET `/donations/{id}/reservations` — reservation audit trail for one
/// listing, newest first.
pub async fn list_donation_reservations(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    // 404 for unknown donations rather than an empty trail.
    state.lifecycle.fetch_donation(id).await?;
    let reservations = state.lifecycle.reservations_for(id).await?;
    Ok(Json(ReservationList {
        count: reservations.len(),
        reservations,
    }))
}

/// GET `/donors/{id}/donations` — everything the donor owns, every status.
pub async fn list_donor_donations(
    State(state): State<AppState>,
    Path(donor_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let donations = state.lifecycle.list_owned_by(donor_id).await?;
    Ok(Json(DonationList {
        count: donations.len(),
        donations,
    }))
}

/// GET `/recipients/{id}/reservations` — the recipient's held and completed
/// donations. Supports ?status=reserved|completed
pub async fn list_recipient_reservations(
    State(state): State<AppState>,
    Path(recipient_id): Path<Uuid>,
    Query(q): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let donations = state
        .lifecycle
        .list_reserved_by(recipient_id, q.status)
        .await?;
    Ok(Json(DonationList {
        count: donations.len(),
        donations,
    }))
}
