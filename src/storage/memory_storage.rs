//! 内存文档存储
//!
//! 同时实现 [`LiveQueryProvider`] 与 [`DocumentStore`]：每次写入都会广播所涉及的
//! 集合名，订阅该集合的查询随即推送一份新的完整快照。可选的 `In` 键数量上限
//! 用来模拟真实提供方对单个订阅过滤键数量的限制。

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use super::{Document, DocumentStore, LiveQuery, LiveQueryProvider, SnapshotStream, merge_json};
use crate::errors::{Result, SyncError};

/// 集合名 -> (文档ID -> 文档内容)
type Collections = DashMap<String, BTreeMap<String, Value>>;

struct MemoryInner {
    collections: Collections,
    changes: broadcast::Sender<String>,
    in_limit: Option<usize>,
    active_subscriptions: AtomicUsize,
}

/// 内存存储，克隆后共享同一份数据
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// 限制单个查询 `In` 条件最多携带的键数量
    pub fn with_in_limit(limit: usize) -> Self {
        Self::build(Some(limit))
    }

    fn build(in_limit: Option<usize>) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(MemoryInner {
                collections: DashMap::new(),
                changes,
                in_limit,
                active_subscriptions: AtomicUsize::new(0),
            }),
        }
    }

    /// 写入（覆盖）文档并通知订阅者
    pub fn upsert(&self, collection: &str, id: &str, data: Value) {
        self.write(collection, id, data, false);
    }

    /// 使用随机 ID 新建文档，返回 ID
    pub fn add(&self, collection: &str, data: Value) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.write(collection, &id, data, false);
        id
    }

    /// 删除文档并通知订阅者
    pub fn remove(&self, collection: &str, id: &str) -> bool {
        let removed = self
            .inner
            .collections
            .get_mut(collection)
            .is_some_and(|mut docs| docs.remove(id).is_some());
        if removed {
            self.notify(collection);
        }
        removed
    }

    /// 当前仍在存活的订阅数量
    pub fn active_subscriptions(&self) -> usize {
        self.inner.active_subscriptions.load(Ordering::SeqCst)
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    fn write(&self, collection: &str, id: &str, data: Value, merge: bool) {
        {
            let mut docs = self
                .inner
                .collections
                .entry(collection.to_string())
                .or_default();
            let existing = if merge { docs.remove(id) } else { None };
            docs.insert(id.to_string(), merge_json(existing, data));
        }
        self.notify(collection);
    }

    fn notify(&self, collection: &str) {
        // 没有订阅者时发送失败是正常情况
        let _ = self.inner.changes.send(collection.to_string());
    }

    fn snapshot(inner: &MemoryInner, query: &LiveQuery) -> Vec<Document> {
        inner
            .collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .filter(|doc| query.matches(doc))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// 订阅存活期间计数，流被丢弃时自动减一
struct SubscriptionGuard {
    inner: Arc<MemoryInner>,
}

impl SubscriptionGuard {
    fn new(inner: Arc<MemoryInner>) -> Self {
        inner.active_subscriptions.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.inner
            .active_subscriptions
            .fetch_sub(1, Ordering::SeqCst);
    }
}

struct StreamState {
    guard: SubscriptionGuard,
    changes: broadcast::Receiver<String>,
    query: LiveQuery,
    first: bool,
}

#[async_trait]
impl LiveQueryProvider for MemoryStorage {
    async fn subscribe(&self, query: LiveQuery) -> Result<SnapshotStream> {
        if let Some(limit) = self.inner.in_limit
            && query.in_clause_len() > limit
        {
            return Err(SyncError::validation(format!(
                "'in' filter on {} carries {} keys, limit is {}",
                query.collection,
                query.in_clause_len(),
                limit
            )));
        }

        debug!("Opening live query on {}", query.collection);

        let state = StreamState {
            changes: self.inner.changes.subscribe(),
            guard: SubscriptionGuard::new(self.inner.clone()),
            query,
            first: true,
        };

        let stream = futures_util::stream::unfold(state, |mut state| async move {
            if !state.first {
                loop {
                    match state.changes.recv().await {
                        Ok(collection) if collection == state.query.collection => break,
                        Ok(_) => continue,
                        // 落后时直接推送最新快照即可，快照总是完整的
                        Err(broadcast::error::RecvError::Lagged(_)) => break,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
            state.first = false;
            let docs = MemoryStorage::snapshot(&state.guard.inner, &state.query);
            Some((Ok(docs), state))
        });

        Ok(stream.boxed())
    }
}

#[async_trait]
impl DocumentStore for MemoryStorage {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self.document(collection, id))
    }

    async fn put(&self, collection: &str, id: &str, data: Value, merge: bool) -> Result<()> {
        self.write(collection, id, data, merge);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(self.remove(collection, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_snapshot_then_updates() {
        let storage = MemoryStorage::new();
        storage.upsert("assignments", "a1", json!({ "classId": "c1" }));
        storage.upsert("assignments", "a2", json!({ "classId": "c2" }));

        let query = LiveQuery::collection("assignments").where_in("classId", vec!["c1".into()]);
        let mut stream = storage.subscribe(query).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, "a1");

        storage.upsert("assignments", "a3", json!({ "classId": "c1" }));
        let second = stream.next().await.unwrap().unwrap();
        let ids: Vec<_> = second.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a3"]);
    }

    #[tokio::test]
    async fn test_add_assigns_fresh_ids() {
        let storage = MemoryStorage::new();
        let first = storage.add("chatMessages", json!({ "classId": "c1", "text": "hi" }));
        let second = storage.add("chatMessages", json!({ "classId": "c1", "text": "hello" }));
        assert_ne!(first, second);
        assert_eq!(storage.document("chatMessages", &first).unwrap()["text"], "hi");

        let mut stream = storage
            .subscribe(LiveQuery::collection("chatMessages"))
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_in_limit_enforced() {
        let storage = MemoryStorage::with_in_limit(2);
        let query = LiveQuery::collection("x").where_in(
            "classId",
            vec!["a".into(), "b".into(), "c".into()],
        );
        let err = storage.subscribe(query).await.err().expect("limit exceeded");
        assert_eq!(err.code(), "E008");
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_subscription() {
        let storage = MemoryStorage::new();
        let stream = storage
            .subscribe(LiveQuery::collection("classes"))
            .await
            .unwrap();
        assert_eq!(storage.active_subscriptions(), 1);
        drop(stream);
        assert_eq!(storage.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_merge_put() {
        let storage = MemoryStorage::new();
        storage
            .put("reads", "u1", json!({ "readIds": ["a"] }), false)
            .await
            .unwrap();
        storage
            .put("reads", "u1", json!({ "updatedBy": "x" }), true)
            .await
            .unwrap();
        let doc = storage.get("reads", "u1").await.unwrap().unwrap();
        assert_eq!(doc, json!({ "readIds": ["a"], "updatedBy": "x" }));
        assert!(storage.delete("reads", "u1").await.unwrap());
        assert!(storage.get("reads", "u1").await.unwrap().is_none());
    }
}
