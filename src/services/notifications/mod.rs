pub mod derive;
pub mod read_state;

use std::collections::HashSet;

use crate::models::notifications::entities::NotificationRecord;

pub use derive::{NotificationWindows, derive_notifications, derive_notifications_with};
pub use read_state::ReadStateTracker;

/// 未读数量：派生结果中不在已读集合里的条目数
pub fn unread_count(feed: &[NotificationRecord], acknowledged: &HashSet<String>) -> usize {
    feed.iter()
        .filter(|record| !acknowledged.contains(&record.id))
        .count()
}
