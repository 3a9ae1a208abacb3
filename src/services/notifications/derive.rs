//! 通知派生
//!
//! 通知流是同步状态的纯函数：相同的状态、查看者与时间总是得到相同的结果
//! （包括顺序），因此可以在每次状态变化后直接重新计算。
//!
//! 各条规则独立计算后合并，按 ID 去重（保留第一次出现），
//! 再按 `created_at` 降序做稳定排序。引用了不存在的父记录的数据（例如作业已被
//! 删除但提交仍在同步中）直接跳过。

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::models::notifications::entities::{
    NotificationKind, NotificationRecord, NotificationTone,
};
use tracing::debug;

use crate::errors::SyncError;
use crate::models::{Assignment, AssignmentStatus, ClassRoom, Viewer, ViewerRole};
use crate::sync::SyncedState;
use crate::utils::{plural, truncate_with_ellipsis};

/// 各规则使用的时间窗口与阈值
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationWindows {
    pub due_soon: Duration,
    pub recent_chat: Duration,
    pub new_item: Duration,
    pub preview_chars: usize,
    pub low_completion_ratio: f64,
}

impl Default for NotificationWindows {
    fn default() -> Self {
        Self {
            due_soon: Duration::hours(48),
            recent_chat: Duration::hours(24),
            new_item: Duration::days(7),
            preview_chars: 80,
            low_completion_ratio: 0.5,
        }
    }
}

/// 使用默认窗口派生通知
pub fn derive_notifications(
    state: &SyncedState,
    viewer: &Viewer,
    now: DateTime<Utc>,
) -> Vec<NotificationRecord> {
    derive_notifications_with(state, viewer, now, &NotificationWindows::default())
}

pub fn derive_notifications_with(
    state: &SyncedState,
    viewer: &Viewer,
    now: DateTime<Utc>,
    windows: &NotificationWindows,
) -> Vec<NotificationRecord> {
    let ctx = DeriveContext::new(state, viewer, now, windows);
    let mut records = Vec::new();

    match viewer.role {
        ViewerRole::Student => {
            ctx.unread_announcements(&mut records);
            ctx.assignment_deadlines(&mut records);
            ctx.graded_submissions(&mut records);
            ctx.new_assignments(&mut records);
            ctx.recent_chat(&mut records);
            ctx.new_materials(&mut records);
        }
        ViewerRole::Teacher => {
            ctx.new_submissions(&mut records);
            ctx.low_completion(&mut records);
            ctx.recent_chat(&mut records);
        }
    }

    finalize(records)
}

/// 按 ID 去重并按时间降序稳定排序
fn finalize(records: Vec<NotificationRecord>) -> Vec<NotificationRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    let mut unique: Vec<NotificationRecord> = records
        .into_iter()
        .filter(|record| seen.insert(record.id.clone()))
        .collect();
    unique.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    unique
}

struct DeriveContext<'a> {
    state: &'a SyncedState,
    viewer: &'a Viewer,
    now: DateTime<Utc>,
    windows: &'a NotificationWindows,
    // 查看者所属且未归档的班级
    classes: HashMap<&'a str, &'a ClassRoom>,
    // 查看者已提交过的作业
    submitted: HashSet<&'a str>,
}

impl<'a> DeriveContext<'a> {
    fn new(
        state: &'a SyncedState,
        viewer: &'a Viewer,
        now: DateTime<Utc>,
        windows: &'a NotificationWindows,
    ) -> Self {
        let classes = state
            .classes_for(viewer)
            .filter(|class| !class.archived)
            .map(|class| (class.id.as_str(), class))
            .collect();
        let submitted = state
            .submissions
            .iter()
            .filter(|s| s.student_id == viewer.id)
            .map(|s| s.assignment_id.as_str())
            .collect();

        Self {
            state,
            viewer,
            now,
            windows,
            classes,
            submitted,
        }
    }

    fn class_name(&self, class_id: &str) -> &'a str {
        self.classes
            .get(class_id)
            .copied()
            .map(|class| class.name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or("your class")
    }

    /// 学生可见、尚未提交的作业
    fn open_assignments(&self) -> impl Iterator<Item = &'a Assignment> + '_ {
        self.state.assignments.iter().filter(move |a| {
            self.classes.contains_key(a.class_id.as_str())
                && a.status != AssignmentStatus::Draft
                && !self.submitted.contains(a.id.as_str())
        })
    }

    fn record(
        &self,
        kind: NotificationKind,
        source_id: &str,
        title: String,
        message: String,
        created_at: DateTime<Utc>,
        link: String,
    ) -> NotificationRecord {
        NotificationRecord {
            id: kind.notification_id(source_id),
            kind,
            title,
            message,
            created_at,
            link,
            pinned: false,
            tone: NotificationTone::Neutral,
        }
    }

    fn unread_announcements(&self, out: &mut Vec<NotificationRecord>) {
        for announcement in self.state.announcements.iter() {
            if !self.classes.contains_key(announcement.class_id.as_str())
                || announcement.is_read_by(&self.viewer.id)
            {
                continue;
            }
            let title = if announcement.title.is_empty() {
                format!("New announcement in {}", self.class_name(&announcement.class_id))
            } else {
                announcement.title.clone()
            };
            let mut record = self.record(
                NotificationKind::Announcement,
                &announcement.id,
                title,
                truncate_with_ellipsis(&announcement.body, self.windows.preview_chars),
                announcement.created_at,
                format!("/classes/{}/announcements", announcement.class_id),
            );
            record.pinned = announcement.pinned;
            out.push(record);
        }
    }

    fn assignment_deadlines(&self, out: &mut Vec<NotificationRecord>) {
        for assignment in self.open_assignments() {
            let remaining = assignment.due_at - self.now;
            let link = format!(
                "/classes/{}/assignments/{}",
                assignment.class_id, assignment.id
            );

            if remaining > Duration::zero() && remaining <= self.windows.due_soon {
                out.push(self.record(
                    NotificationKind::DueSoon,
                    &assignment.id,
                    "Assignment due soon".to_string(),
                    format!(
                        "\"{}\" is due in {}",
                        assignment.title,
                        format_remaining(remaining)
                    ),
                    // 截止前 48 小时“出现”在通知流中
                    assignment.due_at - self.windows.due_soon,
                    link,
                ));
            } else if remaining < Duration::zero() {
                let mut record = self.record(
                    NotificationKind::Overdue,
                    &assignment.id,
                    "Assignment overdue".to_string(),
                    format!(
                        "\"{}\" was due {}",
                        assignment.title,
                        assignment.due_at.format("%Y-%m-%d %H:%M UTC")
                    ),
                    assignment.due_at,
                    link,
                );
                record.tone = NotificationTone::Unfavorable;
                out.push(record);
            }
        }
    }

    fn graded_submissions(&self, out: &mut Vec<NotificationRecord>) {
        for submission in self.state.submissions.iter() {
            if submission.student_id != self.viewer.id {
                continue;
            }
            let Some(grade) = submission.grade else {
                continue;
            };
            let Some(assignment) = self.state.assignments.get(&submission.assignment_id) else {
                skip_dangling(&submission.id, &submission.assignment_id);
                continue;
            };
            if assignment.total_points <= 0.0 {
                continue;
            }

            let percentage = (grade / assignment.total_points * 100.0).round() as i64;
            let mut record = self.record(
                NotificationKind::Graded,
                &submission.id,
                "Assignment graded".to_string(),
                format!(
                    "\"{}\": {}/{} ({}%)",
                    assignment.title, grade, assignment.total_points, percentage
                ),
                submission.graded_at.unwrap_or(submission.submitted_at),
                format!(
                    "/classes/{}/assignments/{}",
                    assignment.class_id, assignment.id
                ),
            );
            record.tone = NotificationTone::from_percentage(percentage);
            out.push(record);
        }
    }

    fn new_assignments(&self, out: &mut Vec<NotificationRecord>) {
        for assignment in self.open_assignments() {
            if self.now - assignment.created_at > self.windows.new_item {
                continue;
            }
            out.push(self.record(
                NotificationKind::NewAssignment,
                &assignment.id,
                "New assignment".to_string(),
                format!(
                    "\"{}\" was posted in {}",
                    assignment.title,
                    self.class_name(&assignment.class_id)
                ),
                assignment.created_at,
                format!(
                    "/classes/{}/assignments/{}",
                    assignment.class_id, assignment.id
                ),
            ));
        }
    }

    fn recent_chat(&self, out: &mut Vec<NotificationRecord>) {
        for message in self.state.chat_messages.iter() {
            if !self.classes.contains_key(message.class_id.as_str())
                || message.author_id == self.viewer.id
                || self.now - message.created_at > self.windows.recent_chat
            {
                continue;
            }
            let author = if message.author_name.is_empty() {
                message.author_id.as_str()
            } else {
                message.author_name.as_str()
            };
            out.push(self.record(
                NotificationKind::ChatMessage,
                &message.id,
                format!("New message in {}", self.class_name(&message.class_id)),
                truncate_with_ellipsis(
                    &format!("{}: {}", author, message.text),
                    self.windows.preview_chars,
                ),
                message.created_at,
                format!("/classes/{}/chat", message.class_id),
            ));
        }
    }

    fn new_materials(&self, out: &mut Vec<NotificationRecord>) {
        for material in self.state.materials.iter() {
            if !self.classes.contains_key(material.class_id.as_str())
                || self.now - material.created_at > self.windows.new_item
            {
                continue;
            }
            out.push(self.record(
                NotificationKind::NewMaterial,
                &material.id,
                "New material".to_string(),
                format!(
                    "\"{}\" was shared in {}",
                    material.title,
                    self.class_name(&material.class_id)
                ),
                material.created_at,
                format!("/classes/{}/materials", material.class_id),
            ));
        }
    }

    fn new_submissions(&self, out: &mut Vec<NotificationRecord>) {
        for submission in self.state.submissions.iter() {
            if submission.is_graded() {
                continue;
            }
            let Some(assignment) = self.state.assignments.get(&submission.assignment_id) else {
                skip_dangling(&submission.id, &submission.assignment_id);
                continue;
            };
            if !self.classes.contains_key(assignment.class_id.as_str()) {
                continue;
            }
            out.push(self.record(
                NotificationKind::NewSubmission,
                &submission.id,
                "New submission".to_string(),
                format!(
                    "A submission for \"{}\" is waiting to be graded",
                    assignment.title
                ),
                submission.submitted_at,
                format!(
                    "/classes/{}/assignments/{}/submissions",
                    assignment.class_id, assignment.id
                ),
            ));
        }
    }

    fn low_completion(&self, out: &mut Vec<NotificationRecord>) {
        for assignment in self.state.assignments.iter() {
            let Some(class) = self.classes.get(assignment.class_id.as_str()) else {
                continue;
            };
            let class_size = class.class_size();
            if assignment.status == AssignmentStatus::Draft
                || assignment.due_at >= self.now
                || class_size == 0
            {
                continue;
            }

            let submitted = self
                .state
                .latest_submissions_for(&assignment.id)
                .into_iter()
                .filter(|s| class.has_student(&s.student_id))
                .count();
            let ratio = submitted as f64 / class_size as f64;
            if ratio >= self.windows.low_completion_ratio {
                continue;
            }

            let mut record = self.record(
                NotificationKind::LowCompletion,
                &assignment.id,
                "Low completion".to_string(),
                format!(
                    "Only {}% of {} submitted \"{}\"",
                    (ratio * 100.0).round() as i64,
                    self.class_name(&assignment.class_id),
                    assignment.title
                ),
                assignment.due_at,
                format!(
                    "/classes/{}/assignments/{}/submissions",
                    assignment.class_id, assignment.id
                ),
            );
            record.tone = NotificationTone::Unfavorable;
            out.push(record);
        }
    }
}

/// 提交引用的作业已不在本地镜像中（分区之间暂时不一致），跳过该提交
fn skip_dangling(submission_id: &str, assignment_id: &str) {
    let error = SyncError::inconsistent_input(format!(
        "submission {submission_id} references missing assignment {assignment_id}"
    ));
    debug!("Skipping record in derivation: {}", error.format_simple());
}

/// 剩余时间：不足 24 小时按小时取整，否则按天取整
fn format_remaining(remaining: Duration) -> String {
    let seconds = remaining.num_seconds() as f64;
    if remaining >= Duration::hours(24) {
        plural((seconds / 86_400.0).round() as i64, "day")
    } else {
        plural(((seconds / 3_600.0).round() as i64).max(1), "hour")
    }
}
