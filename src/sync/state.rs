//! 同步状态存储
//!
//! 当前状态以 `Arc<SyncedState>` 保存在 `tokio::sync::watch` 通道中：
//! - 所有合并都经过 `send_if_modified`，在通道的写锁内执行，天然是单写者；
//! - 读者拿到的是不可变快照，派生计算无需额外同步；
//! - 只有内容真正变化时版本号才递增并通知观察者。

use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use super::merge::{CollectionState, MergeOutcome, MergeScope, Partitioned};
use crate::errors::SyncError;
use crate::models::{
    Announcement, Assignment, ChatMessage, ClassRoom, Material, Submission, Viewer, ViewerRole,
};

/// 本地镜像的全部集合
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncedState {
    pub version: u64,
    pub classes: CollectionState<ClassRoom>,
    pub assignments: CollectionState<Assignment>,
    pub submissions: CollectionState<Submission>,
    pub announcements: CollectionState<Announcement>,
    pub chat_messages: CollectionState<ChatMessage>,
    pub materials: CollectionState<Material>,
}

impl SyncedState {
    /// 查看者所属的班级（教师看自己任教的，学生看自己加入的）
    pub fn classes_for<'a>(&'a self, viewer: &'a Viewer) -> impl Iterator<Item = &'a ClassRoom> + 'a {
        self.classes.iter().filter(move |class| match viewer.role {
            ViewerRole::Teacher => class.teacher_id == viewer.id,
            ViewerRole::Student => class.has_student(&viewer.id),
        })
    }

    pub fn class_ids(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.id.clone()).collect()
    }

    pub fn assignment_ids(&self) -> Vec<String> {
        self.assignments.iter().map(|a| a.id.clone()).collect()
    }

    /// 某作业每个学生最新的一次提交
    ///
    /// 远端不保证 (作业, 学生) 唯一，统计时按提交时间取最新一条，避免重复计数。
    pub fn latest_submissions_for(&self, assignment_id: &str) -> Vec<&Submission> {
        let mut latest: HashMap<&str, &Submission> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for submission in self.submissions.in_partition(assignment_id) {
            let student = submission.student_id.as_str();
            let newer = latest
                .get(student)
                .is_none_or(|current| current.submitted_at < submission.submitted_at);
            if !latest.contains_key(student) {
                order.push(student);
            }
            if newer {
                latest.insert(student, submission);
            }
        }
        order.into_iter().filter_map(|s| latest.get(s).copied()).collect()
    }
}

/// 可以被同步进 [`SyncedState`] 的记录类型
pub trait SyncRecord:
    Partitioned + PartialEq + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static
{
    /// 远端集合名
    const COLLECTION: &'static str;
    /// 分区键字段名（远端字段）
    const PARTITION_FIELD: &'static str;

    fn collection(state: &SyncedState) -> &CollectionState<Self>;
    fn collection_mut(state: &mut SyncedState) -> &mut CollectionState<Self>;
}

macro_rules! impl_sync_record {
    ($ty:ty, $collection:literal, $field:literal, $slot:ident, |$r:ident| $key:expr) => {
        impl Partitioned for $ty {
            fn record_id(&self) -> &str {
                &self.id
            }

            fn partition_key(&self) -> &str {
                let $r = self;
                $key
            }
        }

        impl SyncRecord for $ty {
            const COLLECTION: &'static str = $collection;
            const PARTITION_FIELD: &'static str = $field;

            fn collection(state: &SyncedState) -> &CollectionState<Self> {
                &state.$slot
            }

            fn collection_mut(state: &mut SyncedState) -> &mut CollectionState<Self> {
                &mut state.$slot
            }
        }
    };
}

// 班级集合由成员查询整体订阅，分区键就是自身 ID
impl_sync_record!(ClassRoom, "classes", "id", classes, |r| &r.id);
impl_sync_record!(Assignment, "assignments", "classId", assignments, |r| &r.class_id);
impl_sync_record!(Submission, "submissions", "assignmentId", submissions, |r| &r.assignment_id);
impl_sync_record!(Announcement, "announcements", "classId", announcements, |r| &r.class_id);
impl_sync_record!(ChatMessage, "chatMessages", "classId", chat_messages, |r| &r.class_id);
impl_sync_record!(Material, "materials", "classId", materials, |r| &r.class_id);

/// 单个会话的状态存储，克隆后共享同一份状态
#[derive(Clone)]
pub struct StateStore {
    state: Arc<watch::Sender<Arc<SyncedState>>>,
    errors: broadcast::Sender<SyncError>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Arc::new(SyncedState::default()));
        let (errors, _) = broadcast::channel(64);
        Self {
            state: Arc::new(state),
            errors,
        }
    }

    /// 当前状态快照
    pub fn snapshot(&self) -> Arc<SyncedState> {
        self.state.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.state.borrow().version
    }

    /// 订阅状态变化（观察者）
    pub fn subscribe(&self) -> watch::Receiver<Arc<SyncedState>> {
        self.state.subscribe()
    }

    /// 订阅同步错误
    pub fn subscribe_errors(&self) -> broadcast::Receiver<SyncError> {
        self.errors.subscribe()
    }

    /// 向上报告错误，没有接收者时忽略
    pub fn report_error(&self, error: SyncError) {
        let _ = self.errors.send(error);
    }

    /// 在单写者锁内修改某个集合；内容未变化时不递增版本、不通知
    fn mutate<T, R, F>(&self, f: F) -> R
    where
        T: SyncRecord,
        R: Default,
        F: FnOnce(&mut CollectionState<T>) -> R,
    {
        let mut result = None;
        self.state.send_if_modified(|current| {
            let before = T::collection(current).clone();
            let mut next = before.clone();
            result = Some(f(&mut next));
            if next == before {
                return false;
            }
            let state = Arc::make_mut(current);
            *T::collection_mut(state) = next;
            state.version += 1;
            debug!("{} changed, state version {}", T::COLLECTION, state.version);
            true
        });
        result.unwrap_or_default()
    }

    pub fn apply<T: SyncRecord>(&self, scope: &MergeScope, records: Vec<T>) -> MergeOutcome {
        self.mutate::<T, _, _>(|collection| collection.apply(scope, records))
    }

    pub fn merge_chunk<T: SyncRecord>(&self, chunk_keys: &[String], records: Vec<T>) -> MergeOutcome {
        self.mutate::<T, _, _>(|collection| collection.merge_chunk(chunk_keys, records))
    }

    pub fn replace_all<T: SyncRecord>(&self, records: Vec<T>) -> MergeOutcome {
        self.mutate::<T, _, _>(|collection| collection.replace_all(records))
    }

    /// 删除分区键已不在当前键集合中的记录
    pub fn retain_partitions<T: SyncRecord>(&self, keys: &HashSet<String>) -> usize {
        self.mutate::<T, _, _>(|collection| collection.retain_partitions(keys))
    }
}
