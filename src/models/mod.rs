//! 数据模型定义
//!
//! 远端文档存储中的记录在本地的镜像类型，以及由其派生的通知、统计结构。
//! 线上字段名统一使用 camelCase。

pub mod analytics;
pub mod announcements;
pub mod assignments;
pub mod chat_messages;
pub mod classes;
pub mod materials;
pub mod notifications;
pub mod submissions;
pub mod viewer;

pub use announcements::entities::Announcement;
pub use assignments::entities::{Assignment, AssignmentStatus};
pub use chat_messages::entities::ChatMessage;
pub use classes::entities::ClassRoom;
pub use materials::entities::Material;
pub use submissions::entities::Submission;
pub use viewer::entities::{Viewer, ViewerRole};
