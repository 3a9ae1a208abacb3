//! 分区隔离的合并
//!
//! 每个块的快照只对属于该块键的记录有权威：合并时先删除本地所有分区键在块内的
//! 记录，再插入快照中的记录。块之间互不相交，所以合并满足幂等与交换律。

use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// 带分区键的记录
pub trait Partitioned: Clone {
    fn record_id(&self) -> &str;
    fn partition_key(&self) -> &str;
}

/// 一次合并所作用的范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeScope {
    /// 只替换分区键属于该块的记录
    Chunk(Vec<String>),
    /// 整个集合由单个订阅负责，直接整体替换
    All,
}

/// 合并结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub removed: usize,
    pub inserted: usize,
    // 分区键不在块内而被拒绝的记录数
    pub rejected: usize,
}

/// 单个集合的本地镜像，按记录 ID 排序保存
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState<T> {
    records: BTreeMap<String, T>,
}

impl<T> Default for CollectionState<T> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }
}

impl<T: Partitioned> CollectionState<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I: IntoIterator<Item = T>>(records: I) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.record_id().to_string(), r))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.records.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.values()
    }

    /// 某个分区下的全部记录
    pub fn in_partition<'a, 'k>(
        &'a self,
        key: &'k str,
    ) -> impl Iterator<Item = &'a T> + use<'a, 'k, T> {
        self.records.values().filter(move |r| r.partition_key() == key)
    }

    /// 用块快照替换该块的记录，块外的记录保持原样
    pub fn merge_chunk(&mut self, chunk_keys: &[String], records: Vec<T>) -> MergeOutcome {
        let chunk: HashSet<&str> = chunk_keys.iter().map(String::as_str).collect();
        let mut outcome = MergeOutcome::default();

        let before = self.records.len();
        self.records
            .retain(|_, record| !chunk.contains(record.partition_key()));
        outcome.removed = before - self.records.len();

        for record in records {
            if !chunk.contains(record.partition_key()) {
                warn!(
                    "Rejected record {} with partition key {} outside of its chunk",
                    record.record_id(),
                    record.partition_key()
                );
                outcome.rejected += 1;
                continue;
            }
            self.records.insert(record.record_id().to_string(), record);
            outcome.inserted += 1;
        }

        outcome
    }

    /// 整体替换
    pub fn replace_all(&mut self, records: Vec<T>) -> MergeOutcome {
        let removed = self.records.len();
        *self = Self::from_records(records);
        MergeOutcome {
            removed,
            inserted: self.records.len(),
            rejected: 0,
        }
    }

    pub fn apply(&mut self, scope: &MergeScope, records: Vec<T>) -> MergeOutcome {
        match scope {
            MergeScope::Chunk(keys) => self.merge_chunk(keys, records),
            MergeScope::All => self.replace_all(records),
        }
    }

    /// 删除分区键不在 `keys` 中的记录，返回删除数量
    pub fn retain_partitions(&mut self, keys: &HashSet<String>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| keys.contains(record.partition_key()));
        before - self.records.len()
    }
}

/// 函数式的合并入口：`merge(state, chunk, records) -> state'`
pub fn merge<T: Partitioned>(
    state: &CollectionState<T>,
    chunk_keys: &[String],
    records: Vec<T>,
) -> CollectionState<T> {
    let mut next = state.clone();
    next.merge_chunk(chunk_keys, records);
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: String,
        class_id: String,
        title: String,
    }

    impl Partitioned for Row {
        fn record_id(&self) -> &str {
            &self.id
        }

        fn partition_key(&self) -> &str {
            &self.class_id
        }
    }

    fn row(id: &str, class_id: &str, title: &str) -> Row {
        Row {
            id: id.to_string(),
            class_id: class_id.to_string(),
            title: title.to_string(),
        }
    }

    fn chunk(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_merge_is_partition_isolating() {
        let state = CollectionState::from_records(vec![
            row("a1", "math", "Algebra"),
            row("a2", "math", "Geometry"),
            row("b1", "bio", "Cells"),
            row("b2", "bio", "Genetics"),
        ]);
        let bio_before: Vec<Row> = state.in_partition("bio").cloned().collect();

        let next = merge(&state, &chunk(&["math"]), vec![row("a3", "math", "Calculus")]);

        let bio_after: Vec<Row> = next.in_partition("bio").cloned().collect();
        assert_eq!(bio_before, bio_after);
        let math: Vec<&str> = next.in_partition("math").map(|r| r.id.as_str()).collect();
        assert_eq!(math, vec!["a3"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let state = CollectionState::from_records(vec![row("b1", "bio", "Cells")]);
        let snapshot = vec![row("a1", "math", "Algebra"), row("a2", "math", "Geometry")];

        let once = merge(&state, &chunk(&["math"]), snapshot.clone());
        let twice = merge(&once, &chunk(&["math"]), snapshot);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_commutes_across_disjoint_chunks() {
        let state = CollectionState::from_records(vec![
            row("a1", "math", "Old"),
            row("b1", "bio", "Old"),
        ]);
        let chunk_a = chunk(&["math", "art"]);
        let chunk_b = chunk(&["bio"]);
        let snap_a = vec![row("a1", "math", "New"), row("c1", "art", "Drawing")];
        let snap_b = vec![row("b2", "bio", "Genetics")];

        let ab = merge(&merge(&state, &chunk_a, snap_a.clone()), &chunk_b, snap_b.clone());
        let ba = merge(&merge(&state, &chunk_b, snap_b), &chunk_a, snap_a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_records_outside_chunk_rejected() {
        let mut state = CollectionState::from_records(vec![row("b1", "bio", "Cells")]);
        let outcome = state.merge_chunk(
            &chunk(&["math"]),
            vec![row("a1", "math", "Algebra"), row("b9", "bio", "Intruder")],
        );

        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.rejected, 1);
        assert!(state.get("b9").is_none());
        assert!(state.get("b1").is_some());
    }

    #[test]
    fn test_empty_snapshot_clears_chunk() {
        let mut state = CollectionState::from_records(vec![
            row("a1", "math", "Algebra"),
            row("b1", "bio", "Cells"),
        ]);
        let outcome = state.merge_chunk(&chunk(&["math"]), Vec::new());
        assert_eq!(outcome.removed, 1);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_retain_partitions() {
        let mut state = CollectionState::from_records(vec![
            row("a1", "math", "Algebra"),
            row("b1", "bio", "Cells"),
        ]);
        let keep: HashSet<String> = ["bio".to_string()].into_iter().collect();
        assert_eq!(state.retain_partitions(&keep), 1);
        assert!(state.get("a1").is_none());
    }
}
