//! Classroom Sync - 课堂实时同步核心
//!
//! 把远端文档存储中的班级数据按分区实时镜像到本地，并在此基础上派生通知流与统计。
//!
//! # 架构
//! - `config`: 配置管理
//! - `errors`: 统一错误处理
//! - `models`: 数据模型定义
//! - `runtime`: 会话与运行时生命周期管理
//! - `services`: 通知派生、已读状态与统计
//! - `storage`: 远端存储抽象（内存 / Redis）
//! - `sync`: 分块订阅、分区合并与状态存储
//! - `utils`: 工具函数

pub mod config;
pub mod errors;
pub mod models;
pub mod runtime;
pub mod services;
pub mod storage;
pub mod sync;
pub mod utils;
