use config::{Config, ConfigError, Environment, File};
use std::sync::OnceLock;

use super::AppConfig;

static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

impl AppConfig {
    /// 加载配置
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // 内置默认值，保证没有配置文件时也能启动
            .set_default("app.system_name", "Classroom Sync")?
            .set_default("app.environment", "development")?
            .set_default("app.log_level", "info")?
            .set_default("app.seed_demo", false)?
            .set_default("runtime.workers", 0)?
            .set_default("runtime.max_workers", 8)?
            .set_default("sync.chunk_size", 10)?
            .set_default("sync.remote_timeout_ms", 10_000)?
            .set_default("sync.retry_base_delay_ms", 500)?
            .set_default("sync.retry_max_delay_ms", 30_000)?
            .set_default("sync.read_state_collection", "notificationReads")?
            .set_default("store.type", "memory")?
            .set_default("store.redis.url", "redis://127.0.0.1:6379")?
            .set_default("store.redis.key_prefix", "classroom:")?
            .set_default("session.viewer_id", "")?
            .set_default("session.viewer_role", "student")?
            // 首先加载默认配置文件
            .add_source(File::with_name("config").required(false))
            // 然后根据环境加载特定配置文件
            .add_source(
                File::with_name(&format!(
                    "config.{}",
                    std::env::var("APP_ENV").unwrap_or_else(|_| "development".into())
                ))
                .required(false),
            )
            // 最后加载环境变量覆盖
            .add_source(
                Environment::with_prefix("CLASSROOM")
                    .separator("__")
                    .try_parsing(true),
            );

        // 支持从常用环境变量加载
        builder = builder
            .set_override_option("app.environment", std::env::var("APP_ENV").ok())?
            .set_override_option("app.log_level", std::env::var("RUST_LOG").ok())?
            .set_override_option("runtime.workers", std::env::var("CPU_COUNT").ok())?
            .set_override_option("store.redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option(
                "store.redis.key_prefix",
                std::env::var("REDIS_KEY_PREFIX").ok(),
            )?
            .set_override_option("session.viewer_id", std::env::var("VIEWER_ID").ok())?
            .set_override_option("session.viewer_role", std::env::var("VIEWER_ROLE").ok())?;

        let config = builder.build()?;
        let mut app_config: AppConfig = config.try_deserialize()?;

        // 处理工作线程数
        if app_config.runtime.workers == 0 {
            app_config.runtime.workers = num_cpus::get().min(app_config.runtime.max_workers.max(1));
        }

        if app_config.sync.chunk_size == 0 {
            return Err(ConfigError::Message(
                "sync.chunk_size must be at least 1".to_string(),
            ));
        }

        Ok(app_config)
    }

    /// 获取全局配置实例
    pub fn get() -> &'static AppConfig {
        APP_CONFIG.get_or_init(|| {
            Self::load().unwrap_or_else(|e| {
                eprintln!("Failed to load configuration: {e}");
                std::process::exit(1);
            })
        })
    }

    /// 初始化配置 (在应用启动时调用)
    pub fn init() -> Result<(), ConfigError> {
        let config = Self::load()?;
        APP_CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("Configuration already initialized".to_string()))?;
        Ok(())
    }

    /// 检查是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app.environment == "production"
    }

    /// 检查是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app.environment == "development"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use std::time::Duration;

    #[test]
    fn test_load_defaults() {
        let config = AppConfig::load().expect("defaults should deserialize");
        assert!(config.sync.chunk_size >= 1);
        assert!(config.runtime.workers >= 1);
        assert!(!config.store.store_type.is_empty());
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let sync = SyncConfig::default();
        assert_eq!(sync.retry_delay(0), Duration::from_millis(500));
        assert_eq!(sync.retry_delay(1), Duration::from_millis(1000));
        assert_eq!(sync.retry_delay(30), Duration::from_millis(30_000));
    }
}
