use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRoom {
    // 班级ID
    pub id: String,
    // 班级名称
    #[serde(default)]
    pub name: String,
    // 教师ID
    pub teacher_id: String,
    // 学生ID（有序、不重复）
    #[serde(default)]
    pub student_ids: Vec<String>,
    // 加入码
    #[serde(default)]
    pub join_code: String,
    // 是否已归档
    #[serde(default)]
    pub archived: bool,
}

impl ClassRoom {
    pub fn class_size(&self) -> usize {
        self.student_ids.len()
    }

    pub fn has_student(&self, student_id: &str) -> bool {
        self.student_ids.iter().any(|id| id == student_id)
    }
}
