//! Redis 文档存储
//!
//! 每个文档以 JSON 字符串保存在 `<prefix><collection>:<id>` 键下。
//! 只实现 [`DocumentStore`]，用于已读状态这类按 ID 读写的数据。

use async_trait::async_trait;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use serde_json::Value;
use tracing::{debug, error};

use super::{DocumentStore, merge_json};
use crate::config::RedisConfig;
use crate::errors::{Result, SyncError};

pub struct RedisDocumentStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisDocumentStore {
    pub fn new(redis_config: &RedisConfig) -> Result<Self> {
        debug!(
            "RedisDocumentStore created with prefix: '{}'",
            redis_config.key_prefix
        );

        let client = redis::Client::open(redis_config.url.clone()).map_err(|e| {
            SyncError::store_connection(format!("Invalid Redis URL {}: {e}", redis_config.url))
        })?;

        // 测试 Redis 连接 - 使用同步连接进行简单测试
        match client.get_connection() {
            Ok(mut conn) => match redis::cmd("PING").query::<String>(&mut conn) {
                Ok(response) => {
                    debug!("Redis connection test successful: {}", response);
                }
                Err(e) => {
                    error!(
                        "Failed to ping Redis server: {}. Check Redis server status and URL: {}",
                        e, redis_config.url
                    );
                    return Err(SyncError::store_connection(format!("Redis ping failed: {e}")));
                }
            },
            Err(e) => {
                error!(
                    "Failed to connect to Redis server: {}. Check Redis server status and URL: {}",
                    e, redis_config.url
                );
                return Err(SyncError::store_connection(format!(
                    "Redis connection failed: {e}"
                )));
            }
        }

        Ok(Self {
            client,
            key_prefix: redis_config.key_prefix.clone(),
        })
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SyncError::store_connection(format!("Redis connection failed: {e}")))?;
        Ok(conn)
    }

    fn make_key(&self, collection: &str, id: &str) -> String {
        format!("{}{}:{}", self.key_prefix, collection, id)
    }

    async fn read(&self, conn: &mut MultiplexedConnection, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DocumentStore for RedisDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let key = self.make_key(collection, id);
        let mut conn = self.get_connection().await?;
        let value = self.read(&mut conn, &key).await?;
        debug!("Fetched document {} (found: {})", key, value.is_some());
        Ok(value)
    }

    async fn put(&self, collection: &str, id: &str, data: Value, merge: bool) -> Result<()> {
        let key = self.make_key(collection, id);
        let mut conn = self.get_connection().await?;

        let existing = if merge {
            self.read(&mut conn, &key).await?
        } else {
            None
        };
        let payload = serde_json::to_string(&merge_json(existing, data))?;

        conn.set::<String, String, ()>(key.clone(), payload).await?;
        debug!("Stored document {}", key);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let key = self.make_key(collection, id);
        let mut conn = self.get_connection().await?;
        let deleted_count: i32 = conn.del(key).await?;
        Ok(deleted_count > 0)
    }
}
