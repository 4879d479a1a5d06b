//! HTTP request handlers.

pub mod deliveries;
pub mod health;

pub use deliveries::{complete_delivery, cooking_orders, delivering_orders, start_delivery};
pub use health::{health_check, readiness_check};
