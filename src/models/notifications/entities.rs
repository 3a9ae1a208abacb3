use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 通知类型
///
/// 每种类型对应一个 ID 前缀，通知 ID 由 `<前缀>-<来源记录ID>` 组成，
/// 因此同一来源在多次派生之间得到相同的 ID，已读状态可以跨派生保留。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Announcement,
    DueSoon,
    Overdue,
    Graded,
    NewAssignment,
    ChatMessage,
    NewMaterial,
    NewSubmission,
    LowCompletion,
}

impl NotificationKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            NotificationKind::Announcement => "announcement",
            NotificationKind::DueSoon => "due",
            NotificationKind::Overdue => "overdue",
            NotificationKind::Graded => "graded",
            NotificationKind::NewAssignment => "assignment",
            NotificationKind::ChatMessage => "chat",
            NotificationKind::NewMaterial => "material",
            NotificationKind::NewSubmission => "submission",
            NotificationKind::LowCompletion => "low-completion",
        }
    }

    /// 生成确定性的通知 ID
    pub fn notification_id(&self, source_id: &str) -> String {
        format!("{}-{}", self.prefix(), source_id)
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// 通知的展示倾向（评分区间、逾期等）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTone {
    Favorable,
    #[default]
    Neutral,
    Unfavorable,
}

impl NotificationTone {
    /// 按百分比划分：≥80 良好，≥60 一般，其余较差
    pub fn from_percentage(percentage: i64) -> Self {
        if percentage >= 80 {
            NotificationTone::Favorable
        } else if percentage >= 60 {
            NotificationTone::Neutral
        } else {
            NotificationTone::Unfavorable
        }
    }
}

/// 派生通知，只存在于一次计算周期内，从不持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub link: String,
    pub pinned: bool,
    pub tone: NotificationTone,
}
