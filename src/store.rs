//! # Scan Store
//!
//! Durable log of accepted scan facts.
//!
//! ## Redis layout
//!
//! - Dedup keys, one per accepted scan and matching key:
//!   - `scan:{ad}:{loc}:session:{sessionId}`
//!   - `scan:{ad}:{loc}:client:{sha256(address|agent)}`
//!
//!   Both carry the serialized fact as value and a PX TTL equal to the
//!   cool-down window, so Redis expires the duplicate guard on its own.
//!
//! - `scans`: sorted set of serialized facts scored by observed-at millis,
//!   the reporting read-back. Appends trim entries older than the retention
//!   window.
//!
//! ## Atomicity
//!
//! Two concurrent scans can both pass the attributor's advisory read. The
//! append goes through a Lua script that checks and sets both dedup keys in
//! one step, so the store stays the single arbiter of uniqueness: one
//! writer wins, the loser gets `Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// One accepted exposure. Created exactly once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFact {
    pub ad_id: String,
    pub location_id: String,
    pub client_session_id: String,
    pub source_address: String,
    pub user_agent: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The uniqueness constraint rejected the append: a matching scan was
    /// written concurrently. Attribution treats this as a duplicate.
    #[error("scan already recorded for this key")]
    Conflict,

    /// Transient infrastructure failure. The attribution decision is left
    /// unresolved; no fact may be assumed written.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Finds a fact for the same (ad, location) observed after `since` that
    /// matches EITHER the session id OR the (address, agent) pair.
    #[allow(clippy::too_many_arguments)]
    async fn find_recent(
        &self,
        ad_id: &str,
        location_id: &str,
        session_id: &str,
        source_address: &str,
        user_agent: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ScanFact>, StoreError>;

    /// Appends an accepted fact. `Conflict` signals a uniqueness violation
    /// against a fact still inside the cool-down window.
    async fn append(&self, fact: &ScanFact) -> Result<(), StoreError>;

    /// Full read-back for reporting, newest first.
    async fn list_all(&self) -> Result<Vec<ScanFact>, StoreError>;
}

const SCANS_KEY: &str = "scans";

// KEYS: session dedup key, client dedup key, scans sorted set.
// ARGV: fact json, window millis, observed millis, retention cutoff millis.
const APPEND_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 or redis.call('EXISTS', KEYS[2]) == 1 then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
redis.call('SET', KEYS[2], ARGV[1], 'PX', ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
redis.call('ZREMRANGEBYSCORE', KEYS[3], '-inf', ARGV[4])
return 1
";

pub struct RedisScanStore {
    connection: ConnectionManager,
    window: Duration,
    retention: Duration,
    append_script: redis::Script,
}

impl RedisScanStore {
    pub fn new(connection: ConnectionManager, window: Duration, retention: Duration) -> Self {
        Self {
            connection,
            window,
            retention,
            append_script: redis::Script::new(APPEND_SCRIPT),
        }
    }
}

fn session_key(ad_id: &str, location_id: &str, session_id: &str) -> String {
    format!("scan:{ad_id}:{location_id}:session:{session_id}")
}

fn client_key(ad_id: &str, location_id: &str, source_address: &str, user_agent: &str) -> String {
    let hash = Sha256::digest(format!("{source_address}|{user_agent}"));

    format!("scan:{ad_id}:{location_id}:client:{}", hex::encode(hash))
}

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl ScanStore for RedisScanStore {
    async fn find_recent(
        &self,
        ad_id: &str,
        location_id: &str,
        session_id: &str,
        source_address: &str,
        user_agent: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ScanFact>, StoreError> {
        let mut connection = self.connection.clone();

        let (by_session, by_client): (Option<String>, Option<String>) = redis::cmd("MGET")
            .arg(session_key(ad_id, location_id, session_id))
            .arg(client_key(ad_id, location_id, source_address, user_agent))
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;

        let hit = by_session.or(by_client);

        // Key TTLs already bound the window, but the contract is expressed
        // in terms of `since`, so honor it for callers with a narrower one.
        Ok(hit
            .and_then(|raw| serde_json::from_str::<ScanFact>(&raw).ok())
            .filter(|fact| fact.observed_at > since))
    }

    async fn append(&self, fact: &ScanFact) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();

        let raw = serde_json::to_string(fact)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let cutoff = fact.observed_at - self.retention;

        let accepted: i64 = self
            .append_script
            .key(session_key(&fact.ad_id, &fact.location_id, &fact.client_session_id))
            .key(client_key(
                &fact.ad_id,
                &fact.location_id,
                &fact.source_address,
                &fact.user_agent,
            ))
            .key(SCANS_KEY)
            .arg(raw)
            .arg(self.window.num_milliseconds())
            .arg(fact.observed_at.timestamp_millis())
            .arg(cutoff.timestamp_millis())
            .invoke_async(&mut connection)
            .await
            .map_err(unavailable)?;

        if accepted == 1 {
            Ok(())
        } else {
            Err(StoreError::Conflict)
        }
    }

    async fn list_all(&self) -> Result<Vec<ScanFact>, StoreError> {
        let mut connection = self.connection.clone();

        let raw: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(SCANS_KEY)
            .arg(0)
            .arg(-1)
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;

        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }
}

/// In-process store with the same insert-if-absent semantics. The
/// attribution policy tests run against this instead of Redis.
pub struct MemoryScanStore {
    window: Duration,
    facts: std::sync::Mutex<Vec<ScanFact>>,
}

impl MemoryScanStore {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            facts: std::sync::Mutex::new(Vec::new()),
        }
    }
}

fn matches_keys(fact: &ScanFact, candidate: &ScanFact) -> bool {
    fact.ad_id == candidate.ad_id
        && fact.location_id == candidate.location_id
        && (fact.client_session_id == candidate.client_session_id
            || (fact.source_address == candidate.source_address
                && fact.user_agent == candidate.user_agent))
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn find_recent(
        &self,
        ad_id: &str,
        location_id: &str,
        session_id: &str,
        source_address: &str,
        user_agent: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ScanFact>, StoreError> {
        let facts = self.facts.lock().expect("store mutex poisoned");

        Ok(facts
            .iter()
            .rev()
            .find(|fact| {
                fact.ad_id == ad_id
                    && fact.location_id == location_id
                    && fact.observed_at > since
                    && (fact.client_session_id == session_id
                        || (fact.source_address == source_address
                            && fact.user_agent == user_agent))
            })
            .cloned())
    }

    async fn append(&self, fact: &ScanFact) -> Result<(), StoreError> {
        let mut facts = self.facts.lock().expect("store mutex poisoned");
        let since = fact.observed_at - self.window;

        // Check and insert under one lock: the arbiter under concurrency.
        if facts
            .iter()
            .any(|existing| matches_keys(existing, fact) && existing.observed_at > since)
        {
            return Err(StoreError::Conflict);
        }

        facts.push(fact.clone());

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ScanFact>, StoreError> {
        let mut facts = self.facts.lock().expect("store mutex poisoned").clone();
        facts.sort_by_key(|fact| std::cmp::Reverse(fact.observed_at));

        Ok(facts)
    }
}
