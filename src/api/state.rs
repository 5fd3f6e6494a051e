use std::sync::Arc;

use crate::context::AppContext;

/// Shared application state
///
/// The context is immutable after startup, so handlers share it without a lock.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
}

impl AppState {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }
}
