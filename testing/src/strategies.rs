//! Proptest strategies for domain types.

use delivery_core::event::OrderEvent;
use delivery_core::ids::MerchantOrderId;
use delivery_core::status::OrderStatus;
use proptest::prelude::*;

/// Any lifecycle status.
pub fn any_status() -> impl Strategy<Value = OrderStatus> {
    proptest::sample::select(OrderStatus::ALL.to_vec())
}

/// Order ids like `M0` .. `M9999`.
pub fn merchant_order_id() -> impl Strategy<Value = MerchantOrderId> {
    (0u32..10_000).prop_map(|n| MerchantOrderId::new(format!("M{n}")))
}

/// Cooking events with distinct ids, at most `max_len` of them.
pub fn distinct_cooking_events(max_len: usize) -> impl Strategy<Value = Vec<OrderEvent>> {
    proptest::collection::hash_set(0u32..10_000, 0..=max_len).prop_map(|ids| {
        ids.into_iter()
            .map(|n| crate::fixtures::cooking_event(&format!("M{n}")))
            .collect()
    })
}
