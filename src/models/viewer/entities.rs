use serde::{Deserialize, Serialize};

// 查看者角色
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViewerRole {
    Student, // 学生
    Teacher, // 教师
}

impl ViewerRole {
    pub const STUDENT: &'static str = "student";
    pub const TEACHER: &'static str = "teacher";
}

impl<'de> Deserialize<'de> for ViewerRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| {
            serde::de::Error::custom(format!(
                "无效的角色: '{s}'. 支持的角色: student, teacher"
            ))
        })
    }
}

impl std::fmt::Display for ViewerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewerRole::Student => write!(f, "{}", Self::STUDENT),
            ViewerRole::Teacher => write!(f, "{}", Self::TEACHER),
        }
    }
}

impl std::str::FromStr for ViewerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::STUDENT => Ok(ViewerRole::Student),
            Self::TEACHER => Ok(ViewerRole::Teacher),
            _ => Err(format!("Invalid viewer role: {s}")),
        }
    }
}

/// 当前会话的查看者（身份 + 角色）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewer {
    pub id: String,
    pub role: ViewerRole,
}

impl Viewer {
    pub fn student<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            role: ViewerRole::Student,
        }
    }

    pub fn teacher<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            role: ViewerRole::Teacher,
        }
    }

    pub fn is_teacher(&self) -> bool {
        self.role == ViewerRole::Teacher
    }
}
