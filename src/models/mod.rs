//! Core data models for the food-donation coordination service.
//!
//! These entities represent accounts, donation listings, and reservations.
//! They map cleanly to database tables via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod donation;
pub mod reservation;
pub mod user;
