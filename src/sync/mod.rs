//! 实时同步层
//!
//! - `partition`：把分区键切分为不超过提供方上限的块
//! - `merge`：按块做分区隔离的替换合并
//! - `state`：带版本号的本地集合镜像（单写者）
//! - `coordinator`：每个块一个实时订阅，键集合变化时整体重建

pub mod coordinator;
pub mod merge;
pub mod partition;
pub mod state;

pub use coordinator::{PartitionedSubscription, SubscriptionHandle, spawn_live_query};
pub use merge::{CollectionState, MergeOutcome, MergeScope, Partitioned};
pub use partition::partition_keys;
pub use state::{StateStore, SyncRecord, SyncedState};
