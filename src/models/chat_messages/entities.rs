use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ViewerRole;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub class_id: String,
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    pub author_role: ViewerRole,
    pub created_at: DateTime<Utc>,
    pub text: String,
}
