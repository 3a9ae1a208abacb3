//! 统一错误处理模块
//!
//! 使用宏自动生成错误类型，支持错误代码和类型名称。
//! 同步核心中没有致命错误：订阅失败、远端写入失败、数据引用缺失都只会
//! 导致暂时不完整的视图，由调用方记录日志后继续运行。

use std::fmt;

/// 定义错误类型的宏
///
/// 自动生成：
/// - enum 定义
/// - code() 方法 - 返回错误代码
/// - error_type() 方法 - 返回错误类型名称
/// - message() 方法 - 返回错误详情
/// - 便捷构造函数
macro_rules! define_sync_errors {
    ($(
        $variant:ident($code:literal, $type_name:literal)
    ),* $(,)?) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum SyncError {
            $($variant(String),)*
        }

        impl SyncError {
            /// 获取错误代码
            pub fn code(&self) -> &'static str {
                match self {
                    $(SyncError::$variant(_) => $code,)*
                }
            }

            /// 获取错误类型名称
            pub fn error_type(&self) -> &'static str {
                match self {
                    $(SyncError::$variant(_) => $type_name,)*
                }
            }

            /// 获取错误详情
            pub fn message(&self) -> &str {
                match self {
                    $(SyncError::$variant(msg) => msg,)*
                }
            }
        }

        // 生成便捷构造函数
        paste::paste! {
            impl SyncError {
                $(
                    pub fn [<$variant:snake>]<T: Into<String>>(msg: T) -> Self {
                        SyncError::$variant(msg.into())
                    }
                )*
            }
        }
    };
}

define_sync_errors! {
    StoreConnection("E001", "Store Connection Error"),
    StorePluginNotFound("E002", "Store Plugin Not Found"),
    StoreOperation("E003", "Store Operation Error"),
    TransientSync("E004", "Transient Sync Error"),
    PartialWrite("E005", "Partial Write Failure"),
    InconsistentInput("E006", "Inconsistent Input Error"),
    Timeout("E007", "Remote Timeout"),
    Validation("E008", "Validation Error"),
    Serialization("E009", "Serialization Error"),
    Configuration("E010", "Configuration Error"),
}

impl SyncError {
    /// 格式化为彩色输出（用于开发环境）
    #[cfg(debug_assertions)]
    pub fn format_colored(&self) -> String {
        format!(
            "\x1b[1;31m[ERROR]\x1b[0m \x1b[33m{}\x1b[0m \x1b[31m{}\x1b[0m\n  {}",
            self.code(),
            self.error_type(),
            self.message()
        )
    }

    /// 格式化为简洁输出
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }

    /// 是否可以通过重新订阅恢复
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientSync(_) | SyncError::Timeout(_) | SyncError::StoreConnection(_)
        )
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for SyncError {}

// 为常见的错误类型实现 From trait
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for SyncError {
    fn from(err: redis::RedisError) -> Self {
        SyncError::StoreOperation(err.to_string())
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::Configuration(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SyncError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        SyncError::Timeout(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
