//! Black-box availability prober for a range-sharded key-value store
//!
//! The prober plans one target range per cycle and issues either a read of
//! the range's probe key or a transactional put-then-delete of it, recording
//! attempts, failures and latencies as Prometheus metrics.

pub mod config;
pub mod metrics;
pub mod planner;
pub mod prober;
pub mod store;
