//! Service layer: the donation lifecycle manager and the user registry.
//!
//! Every UI-facing surface goes through these services rather than issuing
//! raw store writes, so the conditional-update guard on status transitions
//! is never bypassed.

pub mod identity_service;
pub mod lifecycle_service;
