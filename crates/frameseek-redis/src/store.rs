//! Metadata store over the Redis keyframe records.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use async_trait::async_trait;

use frameseek_core::config::RedisConfig;
use frameseek_core::{Keyframe, MetadataStore};

use crate::client::{init_pool, RedisPool, RedisResult};
use crate::queries::keyframes;

#[derive(Clone)]
pub struct RedisKeyframeStore {
    pool: RedisPool,
    prefix: String,
}

impl RedisKeyframeStore {
    pub fn new(pool: RedisPool, prefix: &str) -> Self {
        Self {
            pool,
            prefix: prefix.to_string(),
        }
    }

    pub async fn connect(config: &RedisConfig) -> RedisResult<Self> {
        let pool = init_pool(&config.url).await?;
        Ok(Self::new(pool, &config.key_prefix))
    }

    pub async fn get(&self, key: u64) -> RedisResult<Option<Keyframe>> {
        keyframes::get_keyframe(&self.pool, &self.prefix, key).await
    }

    pub async fn ping(&self) -> RedisResult<()> {
        keyframes::ping(&self.pool).await
    }
}

#[async_trait]
impl MetadataStore for RedisKeyframeStore {
    async fn get_many(&self, keys: &BTreeSet<u64>) -> Result<HashMap<u64, Keyframe>> {
        keyframes::get_keyframes(&self.pool, &self.prefix, keys)
            .await
            .context("Failed to fetch keyframe records from Redis")
    }
}
