//! Example: cluster read/write locks shared through Redis
//!
//! Run with: `cargo run --example redis_cluster`
//!
//! Requires a Redis server. Set REDIS_URL environment variable
//! or modify the URL below. Run several copies to watch them contend.

use std::sync::Arc;
use std::time::Duration;

use lock_manager::prelude::*;
use lock_manager::{ClusterLockConfig, ClusterLockService, RedisClusterStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lock_manager_cluster=debug,lock_manager_redis=debug".into()),
        )
        .init();

    let redis_url = std::env::var("REDIS_URL")
        .unwrap_or_else(|_| "redis://localhost:6379".to_string());

    println!("Connecting to Redis...");
    let store = RedisClusterStore::builder()
        .url(&redis_url)
        .namespace("lock-manager-demo")
        .build()
        .await?;

    let config = ClusterLockConfig::builder()
        .default_write_timeout(Duration::from_secs(30))
        .build()?;
    let service = ClusterLockService::new(Arc::new(store), config);
    println!("Joined as member {}", service.member());

    let key = LockKey::named("invoice", "123");
    println!("Acquiring write lock on {key}...");
    service.request_write_lock(&key, None, false).await?;
    println!("Write lock acquired, working for 5 seconds");
    tokio::time::sleep(Duration::from_secs(5)).await;

    service.convert_to_read_lock(&key, None).await?;
    println!("Downgraded to read lock: {:?}", service.lock_state(&key).await?);

    service.unlock(&key).await?;
    println!("Lock released");

    service.store().leave().await?;
    Ok(())
}
