use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: String,
    pub class_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
    // 已读学生ID
    #[serde(default)]
    pub read_by: BTreeSet<String>,
    #[serde(default)]
    pub pinned: bool,
}

impl Announcement {
    pub fn is_read_by(&self, student_id: &str) -> bool {
        self.read_by.contains(student_id)
    }
}
