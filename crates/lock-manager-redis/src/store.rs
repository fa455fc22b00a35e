//! Redis-backed [`ClusterStore`].

use std::collections::HashSet;
use std::time::Duration;

use fred::prelude::*;
use lock_manager_cluster::record::{ReadLockRecord, WriteLockRecord};
use lock_manager_cluster::{AccessKind, ClusterStore, MemberId, MembershipEvent};
use lock_manager_core::error::{LockError, LockResult};
use lock_manager_core::timeout::Deadline;
use rand::Rng;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::keys::KeySpace;
use crate::membership::{self, redis_error};
use crate::scripts::{
    eval_i64, ACQUIRE_SCRIPT_LUA, FORCE_RELEASE_SCRIPT_LUA, RELEASE_MEMBER_SCRIPT_LUA,
    RELEASE_SCRIPT_LUA,
};

const EVENT_CAPACITY: usize = 256;

fn decode<T: DeserializeOwned>(key: &str, raw: Option<String>) -> LockResult<Option<T>> {
    raw.map(|json| {
        serde_json::from_str(&json).map_err(|e| {
            LockError::Backend(Box::new(std::io::Error::other(format!(
                "corrupt lock record at '{}': {}",
                key, e
            ))))
        })
    })
    .transpose()
}

fn encode<T: serde::Serialize>(record: &T) -> LockResult<String> {
    serde_json::to_string(record).map_err(|e| LockError::Backend(Box::new(e)))
}

/// Builder for Redis cluster store configuration.
pub struct RedisClusterStoreBuilder {
    url: Option<String>,
    client: Option<RedisClient>,
    namespace: String,
    member: Option<MemberId>,
    heartbeat_interval: Duration,
    member_ttl: Duration,
    access_ttl: Duration,
}

impl RedisClusterStoreBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            url: None,
            client: None,
            namespace: "lock-manager".to_string(),
            member: None,
            heartbeat_interval: Duration::from_secs(1),
            member_ttl: Duration::from_secs(5),
            access_ttl: Duration::from_secs(3600),
        }
    }

    /// Sets the Redis server URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Uses an existing, connected Redis client.
    pub fn client(mut self, client: RedisClient) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the key prefix shared by all members of one cluster.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Uses a fixed member ID instead of a random one.
    pub fn member(mut self, member: impl Into<MemberId>) -> Self {
        self.member = Some(member.into());
        self
    }

    /// Sets how often the member refreshes its heartbeat.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets how long a missed heartbeat takes to count as a departure.
    pub fn member_ttl(mut self, ttl: Duration) -> Self {
        self.member_ttl = ttl;
        self
    }

    /// Sets the expiry of a held access mutex.
    ///
    /// A write lock keeps its access mutexes for as long as it is held, so
    /// this should not be shorter than the lock expiry.
    pub fn access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    /// Connects, registers the member and starts its heartbeat.
    pub async fn build(self) -> LockResult<RedisClusterStore> {
        if self.heartbeat_interval.is_zero() || self.member_ttl <= self.heartbeat_interval {
            return Err(LockError::InvalidName(
                "member TTL must be longer than a non-zero heartbeat interval".to_string(),
            ));
        }
        if self.access_ttl.is_zero() {
            return Err(LockError::InvalidName(
                "access mutex TTL must be greater than zero".to_string(),
            ));
        }

        let client = match (self.client, self.url) {
            (Some(client), _) => client,
            (None, Some(url)) => {
                let config = RedisConfig::from_url(&url).map_err(|e| {
                    LockError::Connection(Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("invalid Redis URL: {}", e),
                    )))
                })?;
                let client = RedisClient::new(config, None, None, None);
                client.connect();
                client.wait_for_connect().await.map_err(|e| {
                    LockError::Connection(Box::new(std::io::Error::other(format!(
                        "failed to connect to Redis: {}",
                        e
                    ))))
                })?;
                client
            }
            (None, None) => {
                return Err(LockError::InvalidName(
                    "no Redis client or URL provided".to_string(),
                ));
            }
        };

        let keys = KeySpace::new(self.namespace);
        let member = self.member.unwrap_or_else(MemberId::random);
        membership::heartbeat(&client, &keys, &member, self.member_ttl).await?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let heartbeat_task = tokio::spawn(membership::run(
            client.clone(),
            keys.clone(),
            member.clone(),
            self.heartbeat_interval,
            self.member_ttl,
            events.clone(),
        ));
        debug!(member = %member, namespace = keys.namespace(), "joined Redis lock cluster");

        Ok(RedisClusterStore {
            client,
            keys,
            member,
            access_ttl: self.access_ttl,
            events,
            heartbeat_task,
        })
    }
}

impl Default for RedisClusterStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A cluster store kept in Redis.
///
/// All members that share a Redis server and a namespace form one cluster.
/// The heartbeat runs in the background while the store exists; dropping
/// the store stops it, and the member is swept as departed once its
/// heartbeat key expires.
pub struct RedisClusterStore {
    client: RedisClient,
    keys: KeySpace,
    member: MemberId,
    access_ttl: Duration,
    events: broadcast::Sender<MembershipEvent>,
    heartbeat_task: tokio::task::JoinHandle<()>,
}

impl RedisClusterStore {
    /// Returns a new builder for configuring the store.
    pub fn builder() -> RedisClusterStoreBuilder {
        RedisClusterStoreBuilder::new()
    }

    /// Connects to `url` with default settings.
    pub async fn new(url: impl Into<String>) -> LockResult<Self> {
        Self::builder().url(url).build().await
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Leaves the cluster at once instead of waiting for the heartbeat to
    /// lapse. Locks held by this member become reclaimable immediately.
    #[instrument(skip(self), fields(member = %self.member, backend = "redis"))]
    pub async fn leave(&self) -> LockResult<()> {
        self.heartbeat_task.abort();
        let _: i64 = self
            .client
            .del(self.keys.heartbeat(&self.member))
            .await
            .map_err(redis_error("DEL"))?;
        let _: i64 = self
            .client
            .srem(self.keys.members(), self.member.as_str())
            .await
            .map_err(redis_error("SREM"))?;
        self.mark_member_down(&self.member).await?;
        eval_i64(
            &self.client,
            RELEASE_MEMBER_SCRIPT_LUA,
            &[self.keys.access_index(&self.member)],
            vec![self.member.as_str().into()],
        )
        .await?;
        Ok(())
    }

    async fn load<T: DeserializeOwned>(&self, key: String) -> LockResult<Option<T>> {
        let raw: Option<String> = self.client.get(&key).await.map_err(redis_error("GET"))?;
        decode(&key, raw)
    }

    async fn save(&self, key: String, json: String) -> LockResult<()> {
        let _: Option<String> = self
            .client
            .set(key, json, None, None, false)
            .await
            .map_err(redis_error("SET"))?;
        Ok(())
    }

    async fn delete(&self, key: String) -> LockResult<()> {
        let _: i64 = self.client.del(key).await.map_err(redis_error("DEL"))?;
        Ok(())
    }

    async fn try_acquire_once(&self, kind: AccessKind, handle: &str) -> LockResult<bool> {
        let acquired = eval_i64(
            &self.client,
            ACQUIRE_SCRIPT_LUA,
            &[
                self.keys.access(kind, handle),
                self.keys.access_index(&self.member),
            ],
            vec![
                self.member.as_str().into(),
                (self.access_ttl.as_millis() as i64).into(),
            ],
        )
        .await?;
        Ok(acquired == 1)
    }
}

impl ClusterStore for RedisClusterStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    fn local_member(&self) -> &MemberId {
        &self.member
    }

    async fn live_member_count(&self) -> LockResult<usize> {
        let count: u64 = self
            .client
            .scard(self.keys.members())
            .await
            .map_err(redis_error("SCARD"))?;
        Ok(count as usize)
    }

    async fn load_write_record(&self, handle: &str) -> LockResult<Option<WriteLockRecord>> {
        self.load(self.keys.write_record(handle)).await
    }

    async fn store_write_record(&self, record: &WriteLockRecord) -> LockResult<()> {
        self.save(self.keys.write_record(&record.handle), encode(record)?)
            .await
    }

    async fn delete_write_record(&self, handle: &str) -> LockResult<()> {
        self.delete(self.keys.write_record(handle)).await
    }

    async fn load_read_record(&self, handle: &str) -> LockResult<Option<ReadLockRecord>> {
        self.load(self.keys.read_record(handle)).await
    }

    async fn store_read_record(&self, record: &ReadLockRecord) -> LockResult<()> {
        self.save(self.keys.read_record(&record.handle), encode(record)?)
            .await
    }

    async fn delete_read_record(&self, handle: &str) -> LockResult<()> {
        self.delete(self.keys.read_record(handle)).await
    }

    async fn try_lock_access(
        &self,
        kind: AccessKind,
        handle: &str,
        timeout: Duration,
    ) -> LockResult<bool> {
        let deadline = Deadline::after(timeout);

        // Busy-wait with exponential backoff and jitter
        let mut sleep_duration = Duration::from_millis(10);
        const MAX_SLEEP: Duration = Duration::from_millis(500);
        const BACKOFF_MULTIPLIER: u32 = 2;

        loop {
            if self.try_acquire_once(kind, handle).await? {
                return Ok(true);
            }

            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return Ok(false);
            }

            // Up to 25% extra so waiters on the same handle spread out
            let jitter_range = sleep_duration.as_millis() as u64 / 4;
            let jitter = if jitter_range > 0 {
                rand::thread_rng().gen_range(0..=jitter_range)
            } else {
                0
            };
            let sleep_with_jitter = (sleep_duration + Duration::from_millis(jitter)).min(remaining);
            tokio::time::sleep(sleep_with_jitter).await;

            sleep_duration = (sleep_duration * BACKOFF_MULTIPLIER).min(MAX_SLEEP);
        }
    }

    async fn unlock_access(&self, kind: AccessKind, handle: &str) -> LockResult<()> {
        let released = eval_i64(
            &self.client,
            RELEASE_SCRIPT_LUA,
            &[
                self.keys.access(kind, handle),
                self.keys.access_index(&self.member),
            ],
            vec![self.member.as_str().into()],
        )
        .await?;
        if released < 0 {
            return Err(LockError::ProtocolViolation(format!(
                "{kind} on '{handle}' is not held by member {}",
                self.member
            )));
        }
        Ok(())
    }

    async fn force_unlock_access(&self, kind: AccessKind, handle: &str) -> LockResult<()> {
        eval_i64(
            &self.client,
            FORCE_RELEASE_SCRIPT_LUA,
            &[self.keys.access(kind, handle)],
            vec![self.keys.access_index_prefix().into()],
        )
        .await?;
        Ok(())
    }

    async fn mark_member_down(&self, member: &MemberId) -> LockResult<()> {
        let _: i64 = self
            .client
            .sadd(self.keys.down_members(), member.as_str())
            .await
            .map_err(redis_error("SADD"))?;
        Ok(())
    }

    async fn down_members(&self) -> LockResult<HashSet<MemberId>> {
        let members: Vec<String> = self
            .client
            .smembers(self.keys.down_members())
            .await
            .map_err(redis_error("SMEMBERS"))?;
        Ok(members.into_iter().map(MemberId::from).collect())
    }

    fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }
}

impl Drop for RedisClusterStore {
    fn drop(&mut self) {
        // The heartbeat key expires on its own once refreshes stop.
        self.heartbeat_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_missing_record() {
        let decoded: Option<WriteLockRecord> = decode("k", None).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_decode_corrupt_record_is_backend_error() {
        let decoded: LockResult<Option<WriteLockRecord>> = decode("k", Some("{".to_string()));
        assert!(matches!(decoded, Err(LockError::Backend(_))));
    }

    #[test]
    fn test_encode_then_decode_read_record() {
        let mut record = ReadLockRecord::new("invoice-1", Duration::from_secs(60));
        record.add_member("a".into(), Duration::from_secs(60));
        let decoded: Option<ReadLockRecord> =
            decode("k", Some(encode(&record).unwrap())).unwrap();
        assert_eq!(decoded, Some(record));
    }

    #[tokio::test]
    async fn test_build_rejects_short_member_ttl() {
        let result = RedisClusterStore::builder()
            .url("redis://localhost:6379")
            .heartbeat_interval(Duration::from_secs(5))
            .member_ttl(Duration::from_secs(1))
            .build()
            .await;
        assert!(matches!(result, Err(LockError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_build_requires_client_or_url() {
        let result = RedisClusterStore::builder().build().await;
        assert!(matches!(result, Err(LockError::InvalidName(_))));
    }
}
