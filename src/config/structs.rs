use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub app: AppSettings,
    pub runtime: RuntimeConfig,
    pub sync: SyncConfig,
    pub store: StoreConfig,
    pub session: SessionConfig,
}

/// 应用设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub system_name: String,
    pub environment: String,
    pub log_level: String,
    // 启动时是否向内存存储写入演示数据
    pub seed_demo: bool,
}

/// 运行时配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub workers: usize,
    pub max_workers: usize,
}

/// 同步层配置
///
/// 会话直接持有该结构的副本，不经过全局配置，方便测试中构造多个会话。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    pub chunk_size: usize,          // 单个订阅允许的最大分区键数量
    pub remote_timeout_ms: u64,     // 远端调用超时 (毫秒)
    pub retry_base_delay_ms: u64,   // 重新订阅的初始退避 (毫秒)
    pub retry_max_delay_ms: u64,    // 重新订阅的最大退避 (毫秒)
    pub read_state_collection: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            remote_timeout_ms: 10_000,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            read_state_collection: "notificationReads".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// 第 `attempt` 次重试的退避时间（不含抖动），指数增长并封顶
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        let delay = self.retry_base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.retry_max_delay_ms))
    }
}

/// 文档存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub store_type: String,
    pub redis: RedisConfig,
}

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
}

/// 当前会话的查看者
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub viewer_id: String,
    pub viewer_role: String,
}
