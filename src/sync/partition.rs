//! 分区键切块
//!
//! 提供方限制单个订阅的 `in` 过滤最多携带 K 个键，这里把任意数量的键按原始顺序
//! 切成互不相交、每块不超过 K 的分组。块边界只是效率手段，不具备身份含义：
//! 键集合变化后同一个键可能落入不同的块。

use std::collections::HashSet;

/// 按顺序切块，重复的键只保留第一次出现；`max_chunk_size` 为 0 时按 1 处理
pub fn partition_keys<S: AsRef<str>>(keys: &[S], max_chunk_size: usize) -> Vec<Vec<String>> {
    let size = max_chunk_size.max(1);
    let mut seen = HashSet::with_capacity(keys.len());
    let unique: Vec<String> = keys
        .iter()
        .map(AsRef::as_ref)
        .filter(|key| seen.insert(*key))
        .map(str::to_string)
        .collect();

    unique.chunks(size).map(<[String]>::to_vec).collect()
}
