//! HTTP handlers for account registration and admin visibility.

use crate::{
    errors::AppError,
    models::user::{NewUser, User},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub actor_id: Uuid,
}

#[derive(Serialize)]
pub struct UserList {
    pub count: usize,
    pub users: Vec<User>,
}

/// POST `/users` — register an account; the role is fixed from here on.
pub async fn register_user(
    State(state): State<AppState>,
    Json(req): Json<NewUser>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.identity.register_user(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET `/users/{id}` — fetch one account.
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.identity.fetch_user(id).await?;
    Ok(Json(user))
}

/// POST `/users/{id}/verify-email` — record that the verification issued by
/// the hosted provider came back confirmed.
pub async fn verify_email(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.identity.mark_email_verified(id).await?;
    Ok(Json(user))
}

/// GET `/users?actor_id=…` — admin-only account listing.
pub async fn list_users(
    State(state): State<AppState>,
    Query(q): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let users = state.identity.list_users(q.actor_id).await?;
    Ok(Json(UserList {
        count: users.len(),
        users,
    }))
}
