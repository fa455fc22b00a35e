//! Heartbeat-based cluster membership.
//!
//! Every member refreshes a heartbeat key with a short TTL and lists itself
//! in the member registry. A member whose heartbeat key has expired is swept
//! out of the registry by whichever member notices first; that member
//! releases the departed member's access mutexes and announces the departure
//! on its local membership feed.

use std::time::Duration;

use fred::prelude::*;
use lock_manager_cluster::{MemberId, MembershipEvent};
use lock_manager_core::error::{LockError, LockResult};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::keys::KeySpace;
use crate::scripts::{eval_i64, RELEASE_MEMBER_SCRIPT_LUA};

pub(crate) fn redis_error(command: &'static str) -> impl FnOnce(RedisError) -> LockError {
    move |e| {
        LockError::Backend(Box::new(std::io::Error::other(format!(
            "Redis {} failed: {}",
            command, e
        ))))
    }
}

/// Refreshes the local heartbeat and registers the member.
pub async fn heartbeat(
    client: &RedisClient,
    keys: &KeySpace,
    member: &MemberId,
    member_ttl: Duration,
) -> LockResult<()> {
    let _: Option<String> = client
        .set(
            keys.heartbeat(member),
            "alive",
            Some(Expiration::PX(member_ttl.as_millis() as i64)),
            None,
            false,
        )
        .await
        .map_err(redis_error("SET PX"))?;
    let _: i64 = client
        .sadd(keys.members(), member.as_str())
        .await
        .map_err(redis_error("SADD"))?;
    Ok(())
}

/// Removes members whose heartbeat expired and returns the ones this call
/// removed.
pub async fn sweep(
    client: &RedisClient,
    keys: &KeySpace,
    local: &MemberId,
) -> LockResult<Vec<MemberId>> {
    let registered: Vec<String> = client
        .smembers(keys.members())
        .await
        .map_err(redis_error("SMEMBERS"))?;

    let mut departed = Vec::new();
    for id in registered {
        let member = MemberId::from(id);
        if &member == local {
            continue;
        }
        let alive: bool = client
            .exists(keys.heartbeat(&member))
            .await
            .map_err(redis_error("EXISTS"))?;
        if alive {
            continue;
        }

        // Only the sweeper whose SREM wins reports the departure.
        let removed: i64 = client
            .srem(keys.members(), member.as_str())
            .await
            .map_err(redis_error("SREM"))?;
        if removed == 0 {
            continue;
        }

        let released = eval_i64(
            client,
            RELEASE_MEMBER_SCRIPT_LUA,
            &[keys.access_index(&member)],
            vec![member.as_str().into()],
        )
        .await?;
        debug!(member = %member, released, "swept departed member");
        departed.push(member);
    }
    Ok(departed)
}

/// Runs heartbeat and sweep every `interval` until the task is aborted.
pub(crate) async fn run(
    client: RedisClient,
    keys: KeySpace,
    member: MemberId,
    interval: Duration,
    member_ttl: Duration,
    events: broadcast::Sender<MembershipEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        if let Err(e) = heartbeat(&client, &keys, &member, member_ttl).await {
            warn!(member = %member, error = %e, "heartbeat failed");
            continue;
        }

        match sweep(&client, &keys, &member).await {
            Ok(departed) => {
                for gone in departed {
                    let _ = events.send(MembershipEvent::MemberRemoved(gone));
                }
            }
            Err(e) => warn!(error = %e, "membership sweep failed"),
        }
    }
}
