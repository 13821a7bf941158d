//! # Redis Ranked Store
//!
//! Ranked store on Redis sorted sets, one sorted set per partition key.
//!
//! - `submit` is a single `ZADD key GT score member`: Redis compares and writes
//!   in one command, so concurrent submitters can never lose the maximum.
//!   Requires Redis 6.2 or newer.
//! - `top_n` and `rank` run as Lua scripts so each answer comes from one
//!   consistent view of the set. Equal scores resolve by ascending member id,
//!   never by the descending lexicographic order `ZREVRANGE` gives: `rank`
//!   counts lower ids in Lua, `top_n` re-sorts the script's head together
//!   with the tie group at its cutoff.
//! - Scores must stay within +/-2^53, the integers a Redis double holds
//!   exactly; `submit` rejects anything larger with `Internal`.
//!
//! Members are stored as fixed-width decimal strings of the id with its sign
//! bit flipped, which makes lexicographic order equal numeric order for every
//! `i64`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};

use crate::errors::{RankingError, Result};
use crate::model::{PartitionKey, RankingEntry, Score, UserId};
use crate::store::RankedStore;

const SIGN_BIT: u64 = 1 << 63;
const MAX_EXACT_SCORE: i64 = 1 << 53;

/// Top `n` by score desc as `{head, ties}`: `head` is `ZREVRANGE 0 n-1`,
/// `ties` is the first `n` members (ascending) sharing the lowest head score.
/// Both are flat `[member, score, ...]` lists; `order_top_n` merges them.
const TOP_N_SCRIPT: &str = r#"
local n = tonumber(ARGV[1])
local head = redis.call('ZREVRANGE', KEYS[1], 0, n - 1, 'WITHSCORES')
if #head == 0 then
  return {{}, {}}
end
local floor = head[#head]
local ties = redis.call('ZRANGEBYSCORE', KEYS[1], floor, floor, 'WITHSCORES', 'LIMIT', 0, n)
return {head, ties}
"#;

/// `{rank, score}` of ARGV[1], or nil when the member is absent.
const RANK_SCRIPT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not score then
  return false
end
local higher = redis.call('ZCOUNT', KEYS[1], '(' .. score, '+inf')
local ties = redis.call('ZRANGEBYSCORE', KEYS[1], score, score)
local before = 0
for _, m in ipairs(ties) do
  if m < ARGV[1] then
    before = before + 1
  end
end
return {higher + before + 1, score}
"#;

/// Order-preserving text form of a member id.
pub fn encode_member(member: UserId) -> String {
    format!("{:020}", (member as u64) ^ SIGN_BIT)
}

pub fn decode_member(raw: &str) -> Result<UserId> {
    raw.parse::<u64>()
        .map(|v| (v ^ SIGN_BIT) as i64)
        .map_err(|e| RankingError::internal_from(format!("malformed member {raw:?}"), e))
}

fn decode_score(raw: &str) -> Result<Score> {
    if let Ok(score) = raw.parse::<i64>() {
        return Ok(score);
    }
    let value = raw
        .parse::<f64>()
        .map_err(|e| RankingError::internal_from(format!("malformed score {raw:?}"), e))?;
    if !value.is_finite() || value.abs() > MAX_EXACT_SCORE as f64 {
        return Err(RankingError::internal(format!("score {raw:?} out of range")));
    }
    Ok(value as Score)
}

/// Redis keeps scores as doubles; beyond 2^53 integers stop being exact and
/// max-merge could keep a rounded value.
fn check_score(score: Score) -> Result<()> {
    if score.unsigned_abs() > MAX_EXACT_SCORE as u64 {
        return Err(RankingError::internal(format!(
            "score {score} exceeds the exact range of the redis store (+/-2^53)"
        )));
    }
    Ok(())
}

fn decode_pairs(flat: &[String]) -> Result<Vec<RankingEntry>> {
    flat.chunks_exact(2)
        .map(|pair| {
            Ok(RankingEntry {
                member: decode_member(&pair[0])?,
                score: decode_score(&pair[1])?,
            })
        })
        .collect()
}

/// Merges the two halves of `TOP_N_SCRIPT` into the first `n` entries by
/// score desc, then member asc. `head` holds every member scoring above its
/// lowest score; `ties` completes the group at that score.
fn order_top_n(head: &[String], ties: &[String], n: usize) -> Result<Vec<RankingEntry>> {
    let mut entries = decode_pairs(head)?;
    entries.extend(decode_pairs(ties)?);
    entries.sort_by(|a, b| b.score.cmp(&a.score).then(a.member.cmp(&b.member)));
    entries.dedup_by_key(|e| e.member);
    entries.truncate(n);
    Ok(entries)
}

/// Connectivity and timeout failures become `StoreUnavailable`; anything
/// else Redis reports is `Internal`.
fn classify(operation: &str, e: RedisError) -> RankingError {
    if e.is_io_error()
        || e.is_connection_dropped()
        || e.is_connection_refusal()
        || e.is_timeout()
        || e.is_unrecoverable_error()
    {
        RankingError::store_unavailable_from(format!("redis {operation}"), e)
    } else {
        RankingError::internal_from(format!("redis {operation}"), e)
    }
}

/// # Redis Ranked Store
///
/// Wraps a `ConnectionManager`, which multiplexes one connection across all
/// callers and reconnects on its own. Cloning the store shares it.
#[derive(Clone)]
pub struct RedisRankedStore {
    manager: ConnectionManager,
    top_n_script: Script,
    rank_script: Script,
}

impl RedisRankedStore {
    /// Connects to `url` (e.g. "redis://127.0.0.1/").
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| classify("open", e))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| classify("connect", e))?;
        tracing::info!("connected to redis ranked store");
        Ok(Self {
            manager,
            top_n_script: Script::new(TOP_N_SCRIPT),
            rank_script: Script::new(RANK_SCRIPT),
        })
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| classify("ping", e))
    }
}

#[async_trait]
impl RankedStore for RedisRankedStore {
    async fn submit(&self, key: &PartitionKey, member: UserId, score: Score) -> Result<()> {
        check_score(score)?;
        let mut conn = self.manager.clone();
        let changed: i64 = redis::cmd("ZADD")
            .arg(key.storage_key())
            .arg("GT")
            .arg("CH")
            .arg(score)
            .arg(encode_member(member))
            .query_async(&mut conn)
            .await
            .map_err(|e| classify("zadd", e))?;
        tracing::trace!(%key, member, score, changed, "max-merge applied");
        Ok(())
    }

    async fn top_n(&self, key: &PartitionKey, n: usize) -> Result<Vec<RankingEntry>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let (head, ties): (Vec<String>, Vec<String>) = self
            .top_n_script
            .key(key.storage_key())
            .arg(n)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify("top_n", e))?;

        order_top_n(&head, &ties, n)
    }

    async fn rank(&self, key: &PartitionKey, member: UserId) -> Result<(u64, Score)> {
        let mut conn = self.manager.clone();
        let found: Option<(i64, String)> = self
            .rank_script
            .key(key.storage_key())
            .arg(encode_member(member))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify("rank", e))?;

        match found {
            Some((rank, score)) => Ok((rank as u64, decode_score(&score)?)),
            None => Err(RankingError::not_found(format!("member {member} in {key}"))),
        }
    }
}
