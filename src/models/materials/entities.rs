use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub id: String,
    pub class_id: String,
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
}
