//! Example: two members of an in-memory cluster sharing one lock
//!
//! Run with: `cargo run --example memory_cluster`

use std::sync::Arc;
use std::time::Duration;

use lock_manager::prelude::*;
use lock_manager::{ClusterLockConfig, ClusterLockService, MemoryCluster};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lock_manager_cluster=debug".into()),
        )
        .init();

    let cluster = MemoryCluster::new();
    let a = ClusterLockService::new(Arc::new(cluster.join_as("a")), ClusterLockConfig::default());
    let b = ClusterLockService::new(Arc::new(cluster.join_as("b")), ClusterLockConfig::default());
    let key = LockKey::named("invoice", "123");

    println!("a takes the write lock on {key}");
    a.request_write_lock(&key, Some(Duration::from_secs(5)), false)
        .await?;

    println!("b asks for it with a 2 second timeout...");
    match b
        .request_write_lock(&key, Some(Duration::from_secs(2)), false)
        .await
    {
        Err(LockError::Timeout(waited)) => println!("b timed out after {waited:?}"),
        other => println!("unexpected: {other:?}"),
    }

    a.unlock(&key).await?;
    println!("a unlocked");

    b.request_write_lock(&key, Some(Duration::from_secs(2)), false)
        .await?;
    println!("b holds the write lock");

    b.convert_to_read_lock(&key, None).await?;
    a.request_read_lock(&key, None, false).await?;
    println!("readers: {:?}", a.lock_state(&key).await?.readers);

    // A member that leaves while reading does not block writers for long.
    cluster.remove_member(b.member());
    a.unlock(&key).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    a.request_write_lock(&key, Some(Duration::from_secs(1)), false)
        .await?;
    println!("a holds the write lock after b left");
    a.unlock(&key).await?;

    Ok(())
}
