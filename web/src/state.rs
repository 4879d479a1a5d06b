//! Application state for Axum handlers.

use delivery_core::event::OrderEvent;
use delivery_runtime::{BatchIngestor, DeliveryQueries, TransitionCoordinator};
use std::sync::Arc;

/// Shared by every handler; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Serves start/complete requests.
    pub coordinator: TransitionCoordinator,

    /// Serves the listing endpoints.
    pub queries: DeliveryQueries,

    /// Ingestors reported by the readiness probe.
    pub ingestors: Vec<Arc<BatchIngestor<OrderEvent>>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(
        coordinator: TransitionCoordinator,
        queries: DeliveryQueries,
        ingestors: Vec<Arc<BatchIngestor<OrderEvent>>>,
    ) -> Self {
        Self {
            coordinator,
            queries,
            ingestors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_is_clone_and_send() {
        fn assert_router_state<T: Clone + Send + Sync + 'static>() {}
        assert_router_state::<AppState>();
    }
}
