//! Application state management.

use std::sync::Arc;

use super::service::DepositService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DepositService>,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<DepositService>) -> Self {
        Self { service }
    }
}
