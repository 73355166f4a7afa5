//! # Redis
//!
//! The durable side of scan attribution.
//!
//! ## Requirements
//!
//! - Atomic check-and-set per dedup key, the arbiter under concurrent scans
//! - Self-expiring duplicate guards (key TTL = cool-down window)
//! - Small dataset: one sorted-set entry plus two short-lived keys per
//!   accepted scan, bounded by the retention window
//!
//! ## Implementation
//!
//! - Plain string keys for dedup guards, written both-or-neither by a Lua
//!   script (see `store.rs`)
//! - One sorted set for the reporting read-back, scored by scan time

use std::time::Duration;

use redis::{
    Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

pub async fn init_redis(redis_url: &str) -> ConnectionManager {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    Client::open(redis_url)
        .unwrap()
        .get_connection_manager_with_config(config)
        .await
        .unwrap()
}
