//! 分块订阅协调
//!
//! 对一个集合按 "父键 ∈ 块" 为每个块打开一个实时订阅，快照交给合并引擎。
//! 键集合变化时先拆除全部旧订阅（中止并等待任务结束），再按新集合重新切块订阅，
//! 保证新旧分区不会同时向同一个集合合并。
//!
//! 单个订阅出错只影响自己的块：错误上报后按指数退避重新订阅，
//! 期间该块的数据保持旧值。

use futures_util::StreamExt;
use rand::Rng;
use serde_json::Value;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::merge::MergeScope;
use super::partition::partition_keys;
use super::state::{StateStore, SyncRecord};
use crate::config::SyncConfig;
use crate::errors::SyncError;
use crate::storage::{Document, Filter, LiveQuery, LiveQueryProvider};

/// 一个正在运行的实时订阅
///
/// 被丢弃时中止后台任务，任务持有的快照流随之释放，即取消订阅。
pub struct SubscriptionHandle {
    scope: MergeScope,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn scope(&self) -> &MergeScope {
        &self.scope
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// 中止并等待任务真正退出
    pub async fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// 把远端文档解码为记录，无法解码的文档跳过
pub fn decode_documents<T: SyncRecord>(docs: Vec<Document>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| {
            let mut data = doc.data;
            if let Value::Object(map) = &mut data {
                map.insert("id".to_string(), Value::String(doc.id.clone()));
            }
            match serde_json::from_value::<T>(data) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(
                        "Skipping undecodable document {}/{}: {}",
                        T::COLLECTION,
                        doc.id,
                        e
                    );
                    None
                }
            }
        })
        .collect()
}

/// 启动一个实时查询任务，每次快照按 `scope` 合并进状态存储
pub fn spawn_live_query<T: SyncRecord>(
    provider: Arc<dyn LiveQueryProvider>,
    store: StateStore,
    settings: SyncConfig,
    query: LiveQuery,
    scope: MergeScope,
) -> SubscriptionHandle {
    let task_scope = scope.clone();
    let task = tokio::spawn(async move {
        run_live_query::<T>(provider, store, settings, query, task_scope).await;
    });
    SubscriptionHandle {
        scope,
        task: Some(task),
    }
}

async fn run_live_query<T: SyncRecord>(
    provider: Arc<dyn LiveQueryProvider>,
    store: StateStore,
    settings: SyncConfig,
    query: LiveQuery,
    scope: MergeScope,
) {
    let mut attempt: u32 = 0;

    loop {
        let error =
            match tokio::time::timeout(settings.remote_timeout(), provider.subscribe(query.clone()))
                .await
            {
                Ok(Ok(mut stream)) => {
                    debug!("Subscribed to {} ({:?})", T::COLLECTION, scope);
                    loop {
                        match stream.next().await {
                            Some(Ok(docs)) => {
                                attempt = 0;
                                let records = decode_documents::<T>(docs);
                                let outcome = store.apply::<T>(&scope, records);
                                debug!(
                                    "Merged {} snapshot: removed {}, inserted {}, rejected {}",
                                    T::COLLECTION,
                                    outcome.removed,
                                    outcome.inserted,
                                    outcome.rejected
                                );
                            }
                            Some(Err(e)) => break e,
                            None => {
                                break SyncError::transient_sync(format!(
                                    "live query on {} ended",
                                    T::COLLECTION
                                ));
                            }
                        }
                    }
                }
                Ok(Err(e)) => e,
                Err(elapsed) => SyncError::from(elapsed),
            };

        if !error.is_retryable() {
            error!(
                "Subscription on {} hit a non-transient error: {}",
                T::COLLECTION,
                error.format_simple()
            );
        }
        let error = match error {
            SyncError::TransientSync(_) => error,
            other => SyncError::transient_sync(format!("{} ({})", other.message(), other.error_type())),
        };
        let delay = retry_delay_with_jitter(&settings, attempt);
        warn!(
            "Subscription on {} failed: {}; resubscribing in {} ms",
            T::COLLECTION,
            error,
            delay.as_millis()
        );
        store.report_error(error);

        attempt = attempt.saturating_add(1);
        tokio::time::sleep(delay).await;
    }
}

fn retry_delay_with_jitter(settings: &SyncConfig, attempt: u32) -> Duration {
    let jitter_cap = settings.retry_base_delay_ms / 2;
    let jitter = if jitter_cap == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_cap)
    };
    settings.retry_delay(attempt) + Duration::from_millis(jitter)
}

/// 一个集合的分块订阅集合
pub struct PartitionedSubscription<T: SyncRecord> {
    provider: Arc<dyn LiveQueryProvider>,
    store: StateStore,
    settings: SyncConfig,
    constraints: Vec<Filter>,
    keys: Vec<String>,
    handles: Vec<SubscriptionHandle>,
    _record: PhantomData<fn() -> T>,
}

impl<T: SyncRecord> PartitionedSubscription<T> {
    pub fn new(
        provider: Arc<dyn LiveQueryProvider>,
        store: StateStore,
        settings: SyncConfig,
    ) -> Self {
        Self {
            provider,
            store,
            settings,
            constraints: Vec::new(),
            keys: Vec::new(),
            handles: Vec::new(),
            _record: PhantomData,
        }
    }

    /// 为每个块的查询附加额外过滤条件（例如只看自己的提交）
    pub fn with_constraint(mut self, filter: Filter) -> Self {
        self.constraints.push(filter);
        self
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn chunk_count(&self) -> usize {
        self.handles.len()
    }

    pub fn handles(&self) -> &[SubscriptionHandle] {
        &self.handles
    }

    fn chunk_query(&self, chunk: &[String]) -> LiveQuery {
        let mut query = LiveQuery::collection(T::COLLECTION).where_in(T::PARTITION_FIELD, chunk.to_vec());
        query.filters.extend(self.constraints.iter().cloned());
        query
    }

    /// 切换到新的键集合
    ///
    /// 与当前集合相同（不计顺序）时什么也不做，返回 false。
    /// 否则拆除全部旧订阅、清理不再属于键集合的记录，再按新集合重新订阅。
    pub async fn rekey(&mut self, keys: Vec<String>) -> bool {
        let unchanged = {
            let current: HashSet<&str> = self.keys.iter().map(String::as_str).collect();
            let next: HashSet<&str> = keys.iter().map(String::as_str).collect();
            current == next
        };
        if unchanged {
            return false;
        }

        self.teardown().await;

        let keep: HashSet<String> = keys.iter().cloned().collect();
        let pruned = self.store.retain_partitions::<T>(&keep);
        if pruned > 0 {
            debug!("Pruned {} stale {} records", pruned, T::COLLECTION);
        }

        let chunks = partition_keys(&keys, self.settings.chunk_size);
        for chunk in &chunks {
            let handle = spawn_live_query::<T>(
                self.provider.clone(),
                self.store.clone(),
                self.settings.clone(),
                self.chunk_query(chunk),
                MergeScope::Chunk(chunk.clone()),
            );
            self.handles.push(handle);
        }
        self.keys = chunks.concat();

        info!(
            "{} resubscribed: {} keys in {} chunks",
            T::COLLECTION,
            self.keys.len(),
            self.handles.len()
        );
        true
    }

    /// 拆除全部订阅，等待任务退出后返回
    pub async fn teardown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.close().await;
        }
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Assignment;
    use crate::storage::{MemoryStorage, SnapshotStream};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(chunk_size: usize) -> SyncConfig {
        SyncConfig {
            chunk_size,
            remote_timeout_ms: 1_000,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 50,
            ..SyncConfig::default()
        }
    }

    fn assignment_doc(class_id: &str) -> Value {
        json!({
            "classId": class_id,
            "title": "Essay",
            "createdAt": "2026-09-01T08:00:00Z",
            "dueAt": "2026-09-08T08:00:00Z",
            "totalPoints": 100.0
        })
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_one_subscription_per_chunk() {
        let storage = MemoryStorage::with_in_limit(2);
        for i in 0..5 {
            storage.upsert("assignments", &format!("a{i}"), assignment_doc(&format!("c{i}")));
        }
        let store = StateStore::new();
        let mut subs = PartitionedSubscription::<Assignment>::new(
            Arc::new(storage.clone()),
            store.clone(),
            settings(2),
        );

        let keys: Vec<String> = (0..5).map(|i| format!("c{i}")).collect();
        assert!(subs.rekey(keys.clone()).await);
        assert_eq!(subs.chunk_count(), 3);

        wait_for(|| store.snapshot().assignments.len() == 5).await;
        assert_eq!(storage.active_subscriptions(), 3);

        // 相同集合（顺序不同）不会重建
        let mut reversed = keys.clone();
        reversed.reverse();
        assert!(!subs.rekey(reversed).await);

        subs.teardown().await;
        assert_eq!(storage.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_rekey_prunes_and_resubscribes() {
        let storage = MemoryStorage::new();
        storage.upsert("assignments", "a1", assignment_doc("c1"));
        storage.upsert("assignments", "a2", assignment_doc("c2"));
        let store = StateStore::new();
        let mut subs = PartitionedSubscription::<Assignment>::new(
            Arc::new(storage.clone()),
            store.clone(),
            settings(10),
        );

        subs.rekey(vec!["c1".into(), "c2".into()]).await;
        wait_for(|| store.snapshot().assignments.len() == 2).await;

        subs.rekey(vec!["c2".into()]).await;
        assert!(store.snapshot().assignments.get("a1").is_none());
        wait_for(|| storage.active_subscriptions() == 1).await;

        // 旧块的更新不再进入状态
        storage.upsert("assignments", "a3", assignment_doc("c1"));
        storage.upsert("assignments", "a4", assignment_doc("c2"));
        wait_for(|| store.snapshot().assignments.get("a4").is_some()).await;
        assert!(store.snapshot().assignments.get("a3").is_none());
    }

    #[tokio::test]
    async fn test_undecodable_documents_skipped() {
        let storage = MemoryStorage::new();
        storage.upsert("assignments", "ok", assignment_doc("c1"));
        storage.upsert("assignments", "bad", json!({ "classId": "c1", "dueAt": 42 }));
        let store = StateStore::new();
        let mut subs =
            PartitionedSubscription::<Assignment>::new(Arc::new(storage), store.clone(), settings(10));

        subs.rekey(vec!["c1".into()]).await;
        wait_for(|| store.snapshot().assignments.len() == 1).await;
        assert!(store.snapshot().assignments.get("ok").is_some());
    }

    /// 第一次订阅失败，之后委托给内存存储
    struct FlakyProvider {
        inner: MemoryStorage,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LiveQueryProvider for FlakyProvider {
        async fn subscribe(&self, query: LiveQuery) -> crate::errors::Result<SnapshotStream> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SyncError::store_connection("provider unavailable"));
            }
            self.inner.subscribe(query).await
        }
    }

    #[tokio::test]
    async fn test_failed_subscription_is_retried_and_reported() {
        let storage = MemoryStorage::new();
        storage.upsert("assignments", "a1", assignment_doc("c1"));
        let provider = Arc::new(FlakyProvider {
            inner: storage,
            calls: AtomicUsize::new(0),
        });
        let store = StateStore::new();
        let mut errors = store.subscribe_errors();
        let mut subs =
            PartitionedSubscription::<Assignment>::new(provider.clone(), store.clone(), settings(10));

        subs.rekey(vec!["c1".into()]).await;

        let reported = errors.recv().await.unwrap();
        assert_eq!(reported.code(), "E004");
        wait_for(|| store.snapshot().assignments.len() == 1).await;
        assert!(provider.calls.load(Ordering::SeqCst) >= 2);
    }

    /// c1 所在块的流在首个快照后结束，此后重新订阅一律失败
    struct StaleChunkProvider {
        inner: MemoryStorage,
        stale_calls: AtomicUsize,
    }

    #[async_trait]
    impl LiveQueryProvider for StaleChunkProvider {
        async fn subscribe(&self, query: LiveQuery) -> crate::errors::Result<SnapshotStream> {
            let stale = query.filters.iter().any(|filter| {
                matches!(filter, Filter::In { values, .. } if values.iter().any(|v| v == "c1"))
            });
            if !stale {
                return self.inner.subscribe(query).await;
            }
            if self.stale_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let stream = self.inner.subscribe(query).await?;
                return Ok(stream.take(1).boxed());
            }
            Err(SyncError::store_connection("chunk offline"))
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_data_and_spares_siblings() {
        let storage = MemoryStorage::new();
        storage.upsert("assignments", "a1", assignment_doc("c1"));
        storage.upsert("assignments", "b1", assignment_doc("c2"));
        let provider = Arc::new(StaleChunkProvider {
            inner: storage.clone(),
            stale_calls: AtomicUsize::new(0),
        });
        let store = StateStore::new();
        let mut subs =
            PartitionedSubscription::<Assignment>::new(provider.clone(), store.clone(), settings(1));

        subs.rekey(vec!["c1".into(), "c2".into()]).await;
        assert_eq!(subs.chunk_count(), 2);
        wait_for(|| store.snapshot().assignments.len() == 2).await;
        wait_for(|| provider.stale_calls.load(Ordering::SeqCst) >= 3).await;

        storage.upsert("assignments", "a2", assignment_doc("c1"));
        storage.upsert("assignments", "b2", assignment_doc("c2"));
        wait_for(|| store.snapshot().assignments.get("b2").is_some()).await;

        let snapshot = store.snapshot();
        assert!(snapshot.assignments.get("a1").is_some());
        assert!(snapshot.assignments.get("b1").is_some());
        assert!(snapshot.assignments.get("a2").is_none());
    }
}
