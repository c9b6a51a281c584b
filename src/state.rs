//! Shared application state handed to every handler.

use crate::services::identity_service::IdentityService;
use crate::services::lifecycle_service::LifecycleService;
use sqlx::SqlitePool;
use std::sync::Arc;

/// The services the router carries. Both share the same pool; the lifecycle
/// manager holds its own handle on the identity service for role checks, so
/// no handler can reach the store without going through a service.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: LifecycleService,
    pub identity: IdentityService,
}

impl AppState {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        let identity = IdentityService::new(db.clone());
        let lifecycle = LifecycleService::new(db, identity.clone());
        Self {
            lifecycle,
            identity,
        }
    }
}
