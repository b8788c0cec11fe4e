//! Caches that live beside the primary store.
//!
//! Nothing here takes part in a database transaction; writes are best effort and
//! readers must tolerate missing or stale entries.

pub mod payment_orders;

pub use payment_orders::{InMemoryPaymentOrderCache, PaymentOrderCache, RedisPaymentOrderCache};
