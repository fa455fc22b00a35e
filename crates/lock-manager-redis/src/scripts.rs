//! Lua scripts for the re-entrant access mutexes.
//!
//! A held mutex is a hash `{owner, count}` with a PX expiry. Each owner also
//! has an index set listing the mutex keys it holds, so the mutexes of a
//! departed member can be released in one call.

use fred::prelude::*;
use fred::types::CustomCommand;
use lock_manager_core::error::{LockError, LockResult};

/// Takes the mutex or bumps the caller's hold count.
///
/// KEYS: mutex, owner index. ARGV: owner, ttl millis. Returns 1 or 0.
pub const ACQUIRE_SCRIPT_LUA: &str = r#"
    local owner = redis.call('hget', KEYS[1], 'owner')
    if owner and owner ~= ARGV[1] then
        return 0
    end
    redis.call('hset', KEYS[1], 'owner', ARGV[1])
    redis.call('hincrby', KEYS[1], 'count', 1)
    redis.call('pexpire', KEYS[1], ARGV[2])
    redis.call('sadd', KEYS[2], KEYS[1])
    return 1
"#;

/// Drops one hold; deletes the mutex when none are left.
///
/// KEYS: mutex, owner index. ARGV: owner. Returns 1, or -1 if not the owner.
pub const RELEASE_SCRIPT_LUA: &str = r#"
    if redis.call('hget', KEYS[1], 'owner') ~= ARGV[1] then
        return -1
    end
    if redis.call('hincrby', KEYS[1], 'count', -1) <= 0 then
        redis.call('del', KEYS[1])
        redis.call('srem', KEYS[2], KEYS[1])
    end
    return 1
"#;

/// Deletes the mutex whoever holds it.
///
/// KEYS: mutex. ARGV: owner index prefix. Returns 1.
pub const FORCE_RELEASE_SCRIPT_LUA: &str = r#"
    local owner = redis.call('hget', KEYS[1], 'owner')
    redis.call('del', KEYS[1])
    if owner then
        redis.call('srem', ARGV[1] .. owner, KEYS[1])
    end
    return 1
"#;

/// Deletes every mutex still owned by a member, then its index.
///
/// KEYS: owner index. ARGV: owner. Returns the number released.
pub const RELEASE_MEMBER_SCRIPT_LUA: &str = r#"
    local released = 0
    for _, key in ipairs(redis.call('smembers', KEYS[1])) do
        if redis.call('hget', key, 'owner') == ARGV[1] then
            redis.call('del', key)
            released = released + 1
        end
    end
    redis.call('del', KEYS[1])
    return released
"#;

/// Runs a script with `EVAL` and returns its integer reply.
pub async fn eval_i64(
    client: &RedisClient,
    script: &'static str,
    keys: &[String],
    args: Vec<RedisValue>,
) -> LockResult<i64> {
    let mut command_args: Vec<RedisValue> = Vec::with_capacity(2 + keys.len() + args.len());
    command_args.push(script.into());
    command_args.push((keys.len() as i64).into());
    command_args.extend(keys.iter().map(|key| RedisValue::from(key.clone())));
    command_args.extend(args);

    let cmd = CustomCommand::new_static("EVAL", None, false);
    client.custom(cmd, command_args).await.map_err(|e| {
        LockError::Backend(Box::new(std::io::Error::other(format!(
            "Redis EVAL failed: {}",
            e
        ))))
    })
}
