use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Draft,
    #[default]
    Published,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    // 唯一 ID
    pub id: String,
    // 关联的班级 ID
    pub class_id: String,
    // 作业标题
    #[serde(default)]
    pub title: String,
    // 作业创建时间
    pub created_at: DateTime<Utc>,
    // 作业截止时间
    pub due_at: DateTime<Utc>,
    // 作业满分
    pub total_points: f64,
    #[serde(default)]
    pub status: AssignmentStatus,
}
