//! Keyframe record queries.
//!
//! Each record is a JSON string stored under `{prefix}:keyframe:{key}`.

use std::collections::{BTreeSet, HashMap};

use redis::AsyncCommands;
use tracing::{debug, warn};

use frameseek_core::Keyframe;

use crate::client::{RedisPool, RedisResult};

/// Redis key holding the record for `key`.
pub fn keyframe_key(prefix: &str, key: u64) -> String {
    format!("{}:keyframe:{}", prefix, key)
}

/// Decode a stored record, trusting the requested key over the payload.
fn decode(key: u64, raw: &str) -> Option<Keyframe> {
    match serde_json::from_str::<Keyframe>(raw) {
        Ok(mut keyframe) => {
            if keyframe.key != key {
                warn!(key, stored = keyframe.key, "Keyframe record key differs from its Redis key");
                keyframe.key = key;
            }
            Some(keyframe)
        }
        Err(e) => {
            warn!(key, error = %e, "Skipping undecodable keyframe record");
            None
        }
    }
}

/// Pair requested keys with MGET values, keeping decodable hits.
fn collect_records(keys: &[u64], values: Vec<Option<String>>) -> HashMap<u64, Keyframe> {
    keys.iter()
        .zip(values)
        .filter_map(|(key, raw)| raw.and_then(|raw| decode(*key, &raw)).map(|kf| (*key, kf)))
        .collect()
}

pub async fn get_keyframe(
    pool: &RedisPool,
    prefix: &str,
    key: u64,
) -> RedisResult<Option<Keyframe>> {
    let mut conn = pool.clone();
    let raw: Option<String> = conn.get(keyframe_key(prefix, key)).await?;
    Ok(raw.and_then(|raw| decode(key, &raw)))
}

/// Fetch many records with a single MGET.
pub async fn get_keyframes(
    pool: &RedisPool,
    prefix: &str,
    keys: &BTreeSet<u64>,
) -> RedisResult<HashMap<u64, Keyframe>> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }

    let ordered: Vec<u64> = keys.iter().copied().collect();
    let redis_keys: Vec<String> = ordered.iter().map(|k| keyframe_key(prefix, *k)).collect();

    let mut conn = pool.clone();
    let values: Vec<Option<String>> = redis::cmd("MGET")
        .arg(&redis_keys)
        .query_async(&mut conn)
        .await?;

    let records = collect_records(&ordered, values);
    debug!(requested = ordered.len(), found = records.len(), "Fetched keyframe records");
    Ok(records)
}

pub async fn ping(pool: &RedisPool) -> RedisResult<()> {
    let mut conn = pool.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframe_key() {
        assert_eq!(keyframe_key("frameseek", 421), "frameseek:keyframe:421");
    }

    #[test]
    fn test_decode_record() {
        let raw = r#"{"key": 7, "video_num": 13, "group_num": 2, "keyframe_num": 421}"#;
        let kf = decode(7, raw).unwrap();
        assert_eq!(kf, Keyframe::new(7, 2, 13, 421));
    }

    #[test]
    fn test_decode_prefers_requested_key() {
        let raw = r#"{"key": 7, "video_num": 1, "group_num": 1, "keyframe_num": 1}"#;
        let kf = decode(8, raw).unwrap();
        assert_eq!(kf.key, 8);
    }

    #[test]
    fn test_collect_skips_nil_and_garbage() {
        let values = vec![
            Some(r#"{"key": 1, "video_num": 1, "group_num": 1, "keyframe_num": 10}"#.to_string()),
            None,
            Some("not json".to_string()),
        ];
        let records = collect_records(&[1, 2, 3], values);
        assert_eq!(records.len(), 1);
        assert_eq!(records[&1].keyframe_num, 10);
    }
}
