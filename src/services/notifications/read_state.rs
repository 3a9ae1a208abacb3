//! 已读状态
//!
//! 本地集合先行修改（乐观更新），远端写入在后台任务中进行。
//! 同一个跟踪器的远端写入通过互斥锁串行化，保证并发标记不会互相覆盖。
//! 远端失败只记录日志，不回滚本地状态，下次 `load` 时再与远端合并。

use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};
use crate::models::notifications::entities::NotificationRecord;
use crate::storage::DocumentStore;

const READ_IDS_FIELD: &str = "readIds";

#[derive(Clone)]
pub struct ReadStateTracker {
    inner: Arc<ReadStateInner>,
}

struct ReadStateInner {
    viewer_id: String,
    collection: String,
    documents: Arc<dyn DocumentStore>,
    timeout: Duration,
    acknowledged: RwLock<HashSet<String>>,
    write_lock: Mutex<()>,
    // 本地集合每次变化递增
    revision: watch::Sender<u64>,
}

impl ReadStateTracker {
    pub fn new<S: Into<String>>(
        viewer_id: S,
        documents: Arc<dyn DocumentStore>,
        settings: &SyncConfig,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(ReadStateInner {
                viewer_id: viewer_id.into(),
                collection: settings.read_state_collection.clone(),
                documents,
                timeout: settings.remote_timeout(),
                acknowledged: RwLock::new(HashSet::new()),
                write_lock: Mutex::new(()),
                revision,
            }),
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.inner.viewer_id
    }

    /// 读取远端记录并并入本地集合，返回远端记录中的 ID 数量
    pub async fn load(&self) -> Result<usize> {
        let remote = self.inner.fetch_remote().await?;
        let count = remote.len();
        self.inner.insert_local(remote);
        debug!(
            "Loaded {} read notification ids for {}",
            count, self.inner.viewer_id
        );
        Ok(count)
    }

    pub fn is_read(&self, id: &str) -> bool {
        self.inner
            .acknowledged
            .read()
            .expect("read state lock poisoned")
            .contains(id)
    }

    /// 当前本地已读集合的副本
    pub fn acknowledged(&self) -> HashSet<String> {
        self.inner
            .acknowledged
            .read()
            .expect("read state lock poisoned")
            .clone()
    }

    pub fn unread_count(&self, feed: &[NotificationRecord]) -> usize {
        let acknowledged = self
            .inner
            .acknowledged
            .read()
            .expect("read state lock poisoned");
        super::unread_count(feed, &acknowledged)
    }

    /// 订阅本地已读集合的变化
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// 标记单条已读：本地立即生效，远端读取-合并-写入在后台进行
    pub fn mark_read<S: Into<String>>(&self, id: S) -> JoinHandle<()> {
        let id = id.into();
        self.inner.insert_local([id.clone()]);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let result = inner.with_timeout(inner.merge_remote(id.clone())).await;
            if let Err(e) = result {
                inner.log_write_failure(&format!("mark {id} as read"), e);
            }
        })
    }

    /// 全部标记已读：本地取并集，远端用完整集合覆盖
    pub fn mark_all_read<I, S>(&self, ids: I) -> JoinHandle<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.insert_local(ids.into_iter().map(Into::into));

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let result = inner.with_timeout(inner.overwrite_remote()).await;
            if let Err(e) = result {
                inner.log_write_failure("mark all notifications as read", e);
            }
        })
    }
}

impl ReadStateInner {
    fn insert_local<I: IntoIterator<Item = String>>(&self, ids: I) {
        let changed = {
            let mut acknowledged = self.acknowledged.write().expect("read state lock poisoned");
            ids.into_iter()
                .fold(false, |changed, id| acknowledged.insert(id) || changed)
        };
        if changed {
            self.revision.send_modify(|revision| *revision += 1);
        }
    }

    async fn with_timeout<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, fut).await?
    }

    async fn fetch_remote(&self) -> Result<Vec<String>> {
        let document = self
            .with_timeout(self.documents.get(&self.collection, &self.viewer_id))
            .await?;
        Ok(document.map(|data| read_ids(&data)).unwrap_or_default())
    }

    async fn merge_remote(&self, id: String) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut ids = match self.documents.get(&self.collection, &self.viewer_id).await? {
            Some(data) => read_ids(&data),
            None => Vec::new(),
        };
        if ids.contains(&id) {
            return Ok(());
        }
        ids.push(id);
        self.documents
            .put(
                &self.collection,
                &self.viewer_id,
                json!({ READ_IDS_FIELD: ids }),
                true,
            )
            .await
    }

    async fn overwrite_remote(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut ids: Vec<String> = self
            .acknowledged
            .read()
            .expect("read state lock poisoned")
            .iter()
            .cloned()
            .collect();
        ids.sort();
        self.documents
            .put(
                &self.collection,
                &self.viewer_id,
                json!({ READ_IDS_FIELD: ids }),
                false,
            )
            .await
    }

    fn log_write_failure(&self, action: &str, cause: SyncError) {
        let error = SyncError::partial_write(format!(
            "Failed to {action} for {}: {}",
            self.viewer_id,
            cause.message()
        ));
        warn!("{}", error.format_simple());
    }
}

fn read_ids(data: &Value) -> Vec<String> {
    data.get(READ_IDS_FIELD)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;

    fn settings() -> SyncConfig {
        SyncConfig {
            remote_timeout_ms: 500,
            ..SyncConfig::default()
        }
    }

    fn stored_ids(storage: &MemoryStorage, viewer: &str) -> HashSet<String> {
        storage
            .document("notificationReads", viewer)
            .map(|data| read_ids(&data).into_iter().collect())
            .unwrap_or_default()
    }

    struct FailingStore;

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn get(&self, _collection: &str, _id: &str) -> Result<Option<Value>> {
            Err(SyncError::store_operation("unavailable"))
        }

        async fn put(&self, _collection: &str, _id: &str, _data: Value, _merge: bool) -> Result<()> {
            Err(SyncError::store_operation("unavailable"))
        }

        async fn delete(&self, _collection: &str, _id: &str) -> Result<bool> {
            Err(SyncError::store_operation("unavailable"))
        }
    }

    /// 所有请求都不会返回的远端
    struct HangingStore;

    #[async_trait]
    impl DocumentStore for HangingStore {
        async fn get(&self, _collection: &str, _id: &str) -> Result<Option<Value>> {
            std::future::pending().await
        }

        async fn put(&self, _collection: &str, _id: &str, _data: Value, _merge: bool) -> Result<()> {
            std::future::pending().await
        }

        async fn delete(&self, _collection: &str, _id: &str) -> Result<bool> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_mark_read_creates_remote_record() {
        let storage = MemoryStorage::new();
        let tracker = ReadStateTracker::new("s1", Arc::new(storage.clone()), &settings());

        let handle = tracker.mark_read("due-a1");
        assert!(tracker.is_read("due-a1"));
        handle.await.unwrap();

        assert_eq!(
            stored_ids(&storage, "s1"),
            ["due-a1".to_string()].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn test_concurrent_marks_are_not_lost() {
        let storage = MemoryStorage::new();
        let tracker = ReadStateTracker::new("s1", Arc::new(storage.clone()), &settings());

        let handles: Vec<_> = (0..8).map(|i| tracker.mark_read(format!("chat-{i}"))).collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(stored_ids(&storage, "s1").len(), 8);
    }

    #[tokio::test]
    async fn test_mark_all_read() {
        let storage = MemoryStorage::new();
        let tracker = ReadStateTracker::new("s1", Arc::new(storage.clone()), &settings());
        let ids: Vec<String> = (1..=5).map(|i| format!("announcement-{i}")).collect();
        let feed: Vec<NotificationRecord> = ids.iter().map(|id| record(id)).collect();
        assert_eq!(tracker.unread_count(&feed), 5);

        tracker.mark_all_read(ids.clone()).await.unwrap();

        assert_eq!(tracker.unread_count(&feed), 0);
        assert_eq!(stored_ids(&storage, "s1"), ids.into_iter().collect());
    }

    #[tokio::test]
    async fn test_load_unions_remote_ids() {
        let storage = MemoryStorage::new();
        storage.upsert(
            "notificationReads",
            "s1",
            json!({ "readIds": ["graded-x1", "chat-m1"] }),
        );
        let tracker = ReadStateTracker::new("s1", Arc::new(storage), &settings());
        tracker.mark_read("due-a1").await.unwrap();

        let rx = tracker.subscribe();
        assert_eq!(tracker.load().await.unwrap(), 3);
        assert!(tracker.is_read("graded-x1"));
        assert!(tracker.is_read("due-a1"));
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_local_state() {
        let tracker = ReadStateTracker::new("s1", Arc::new(FailingStore), &settings());

        tracker.mark_read("due-a1").await.unwrap();
        tracker.mark_all_read(["chat-m1"]).await.unwrap();

        assert!(tracker.is_read("due-a1"));
        assert!(tracker.is_read("chat-m1"));
        assert!(tracker.load().await.is_err());
        assert_eq!(tracker.acknowledged().len(), 2);
    }

    #[tokio::test]
    async fn test_hanging_remote_times_out_and_keeps_local_state() {
        let settings = SyncConfig {
            remote_timeout_ms: 50,
            ..SyncConfig::default()
        };
        let tracker = ReadStateTracker::new("s1", Arc::new(HangingStore), &settings);

        let marked = tokio::time::timeout(Duration::from_secs(2), tracker.mark_read("due-a1")).await;
        assert!(matches!(marked, Ok(Ok(()))));
        let marked_all =
            tokio::time::timeout(Duration::from_secs(2), tracker.mark_all_read(["chat-m1"])).await;
        assert!(matches!(marked_all, Ok(Ok(()))));

        assert!(tracker.is_read("due-a1"));
        assert!(tracker.is_read("chat-m1"));
        let loaded = tokio::time::timeout(Duration::from_secs(2), tracker.load()).await;
        assert!(matches!(loaded, Ok(Err(SyncError::Timeout(_)))));
    }

    fn record(id: &str) -> NotificationRecord {
        use crate::models::notifications::entities::{NotificationKind, NotificationTone};
        NotificationRecord {
            id: id.to_string(),
            kind: NotificationKind::Announcement,
            title: String::new(),
            message: String::new(),
            created_at: chrono::Utc::now(),
            link: String::new(),
            pinned: false,
            tone: NotificationTone::Neutral,
        }
    }
}
