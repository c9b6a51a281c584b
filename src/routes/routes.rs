//! Defines routes for all account and donation lifecycle operations.
//!
//! ## Structure
//! - **Account endpoints**
//!   - `POST   /users` — register (role fixed at registration)
//!   - `GET    /users` — admin-only listing (`?actor_id=`)
//!   - `GET    /users/{id}` — fetch one account
//!   - `POST   /users/{id}/verify-email` — record verification
//!
//! - **Donation endpoints**
//!   - `POST   /donations` — create listing
//!   - `GET    /donations` — browse available (category, max-results,
//!     continuation-token)
//!   - `POST   /donations/sweep` — expiry sweep
//!   - `GET    /donations/{id}` — fetch one listing
//!   - `PUT    /donations/{id}` — donor edit while active
//!   - `GET    /donations/{id}/reservations` — reservation audit trail
//!   - `POST   /donations/{id}/reserve` — recipient claims
//!   - `POST   /donations/{id}/cancel` — donor withdraws
//!   - `POST   /donations/{id}/complete` — confirm hand-off
//!
//! - **Per-actor listings**
//!   - `GET    /donors/{id}/donations` — everything the donor owns
//!   - `GET    /recipients/{id}/reservations` — held/completed history
//!
//! Every donation route funnels into `LifecycleService`, which owns the
//! legality of each status transition.

use crate::{
    handlers::{
        donation_handlers::{
            cancel_donation, complete_donation, create_donation, get_donation,
            list_donation_reservations, list_donations, list_donor_donations,
            list_recipient_reservations, reserve_donation, sweep_donations,
            update_donation,
        },
        health_handlers::{healthz, readyz},
        user_handlers::{get_user, list_users, register_user, verify_email},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for the full HTTP surface.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Account routes
        .route("/users", post(register_user).get(list_users))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/verify-email", post(verify_email))
        // Donation routes
        .route("/donations", post(create_donation).get(list_donations))
        .route("/donations/sweep", post(sweep_donations))
        .route(
            "/donations/{id}",
            get(get_donation).put(update_donation),
        )
        .route(
            "/donations/{id}/reservations",
            get(list_donation_reservations),
        )
        .route("/donations/{id}/reserve", post(reserve_donation))
        .route("/donations/{id}/cancel", post(cancel_donation))
        .route("/donations/{id}/complete", post(complete_donation))
        // Per-actor listings
        .route("/donors/{id}/donations", get(list_donor_donations))
        .route(
            "/recipients/{id}/reservations",
            get(list_recipient_reservations),
        )
}
