//! 远端文档存储抽象
//!
//! 同步核心只依赖两个能力：
//! - [`LiveQueryProvider`]：按过滤条件打开实时查询，每次变化推送一份完整快照；
//!   丢弃返回的流即取消订阅。
//! - [`DocumentStore`]：按 ID 读写单个文档（用于已读状态持久化）。

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::errors::Result;

pub mod memory_storage;
pub mod redis_storage;
pub mod register;

pub use memory_storage::MemoryStorage;
pub use redis_storage::RedisDocumentStore;

/// 远端文档
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new<S: Into<String>>(id: S, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    fn field_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

/// 实时查询的过滤条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// 字段值属于给定集合（受提供方的键数量上限约束）
    In { field: String, values: Vec<String> },
    /// 字段值等于给定值
    Eq { field: String, value: String },
    /// 数组字段包含给定值
    ArrayContains { field: String, value: String },
}

impl Filter {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::In { field, values } => doc
                .field_str(field)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Filter::Eq { field, value } => doc.field_str(field) == Some(value.as_str()),
            Filter::ArrayContains { field, value } => doc
                .data
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.iter().any(|item| item.as_str() == Some(value))),
        }
    }
}

/// 针对单个集合的实时查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveQuery {
    pub collection: String,
    pub filters: Vec<Filter>,
}

impl LiveQuery {
    pub fn collection<S: Into<String>>(collection: S) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
        }
    }

    pub fn where_in<S: Into<String>>(mut self, field: S, values: Vec<String>) -> Self {
        self.filters.push(Filter::In {
            field: field.into(),
            values,
        });
        self
    }

    pub fn where_eq<S: Into<String>, V: Into<String>>(mut self, field: S, value: V) -> Self {
        self.filters.push(Filter::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_array_contains<S: Into<String>, V: Into<String>>(
        mut self,
        field: S,
        value: V,
    ) -> Self {
        self.filters.push(Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// 查询中 `In` 条件携带的最大键数量
    pub fn in_clause_len(&self) -> usize {
        self.filters
            .iter()
            .map(|f| match f {
                Filter::In { values, .. } => values.len(),
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }
}

/// 快照流：每个元素是查询当前匹配的全部文档
pub type SnapshotStream = BoxStream<'static, Result<Vec<Document>>>;

#[async_trait]
pub trait LiveQueryProvider: Send + Sync {
    /// 打开实时查询，首个元素为当前快照
    async fn subscribe(&self, query: LiveQuery) -> Result<SnapshotStream>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // 读取文档，不存在时返回 None
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;
    // 写入文档；merge 为 true 时与已有字段浅合并
    async fn put(&self, collection: &str, id: &str, data: Value, merge: bool) -> Result<()>;
    // 删除文档，返回是否存在
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;
}

/// 浅合并两个 JSON 对象，非对象时直接覆盖
pub(crate) fn merge_json(existing: Option<Value>, incoming: Value) -> Value {
    match (existing, incoming) {
        (Some(Value::Object(mut base)), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (_, incoming) => incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matching() {
        let doc = Document::new(
            "c1",
            json!({ "teacherId": "t1", "studentIds": ["s1", "s2"], "classId": "k" }),
        );

        assert!(Filter::Eq { field: "teacherId".into(), value: "t1".into() }.matches(&doc));
        assert!(
            Filter::ArrayContains { field: "studentIds".into(), value: "s2".into() }.matches(&doc)
        );
        assert!(
            !Filter::ArrayContains { field: "studentIds".into(), value: "s3".into() }.matches(&doc)
        );
        assert!(
            Filter::In { field: "classId".into(), values: vec!["a".into(), "k".into()] }
                .matches(&doc)
        );
        assert!(!Filter::In { field: "missing".into(), values: vec!["k".into()] }.matches(&doc));
    }

    #[test]
    fn test_merge_json() {
        let merged = merge_json(Some(json!({ "a": 1, "b": 2 })), json!({ "b": 3, "c": 4 }));
        assert_eq!(merged, json!({ "a": 1, "b": 3, "c": 4 }));

        let replaced = merge_json(Some(json!([1])), json!({ "x": true }));
        assert_eq!(replaced, json!({ "x": true }));
    }
}
