use serde::Serialize;

use super::entities::NotificationRecord;

/// 通知流（派生结果 + 未读数量）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFeed {
    // 派生时所依据的状态版本
    pub state_version: u64,
    pub items: Vec<NotificationRecord>,
    pub unread_count: usize,
}

impl NotificationFeed {
    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|n| n.id.clone()).collect()
    }
}
