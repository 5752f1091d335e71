use std::sync::Arc;

use crate::services::Services;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self { services: Arc::new(services) }
    }
}
