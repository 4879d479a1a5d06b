//! Axum request surface for the delivery coordinator.
//!
//! A thin shell: handlers parse the request, call the
//! [`TransitionCoordinator`](delivery_runtime::TransitionCoordinator) or
//! [`DeliveryQueries`](delivery_runtime::DeliveryQueries), and map
//! [`DeliveryError`](delivery_core::DeliveryError) into an HTTP status.
//!
//! # Routes
//!
//! | method | path | |
//! |---|---|---|
//! | POST | `/api/deliveries/start` | rider picks up a cooked order |
//! | POST | `/api/deliveries/complete` | rider hands the order over |
//! | GET | `/api/deliveries/cooking` | orders waiting for a rider |
//! | GET | `/api/deliveries/delivering?kind=&id=` | orders a rider carries |
//! | GET | `/health` | liveness |
//! | GET | `/ready` | pending-buffer diagnostics |
//!
//! # Example
//!
//! ```ignore
//! let state = AppState::new(coordinator, queries, vec![cooking_ingestor, rollback_ingestor]);
//! let app = build_router(state);
//! axum::serve(listener, app).await?;
//! ```

pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use error::AppError;
pub use router::build_router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
