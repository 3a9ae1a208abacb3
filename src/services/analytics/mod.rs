//! 班级统计
//!
//! 所有统计都是对同步状态快照的同步计算，重复提交按“每个学生最新一条”聚合。

pub mod completion;
pub mod distribution;
pub mod leaderboard;
pub mod streak;

use chrono::NaiveDate;

use crate::models::analytics::responses::{GradeDistribution, LeaderboardEntry};
use crate::sync::StateStore;

pub use completion::completion_rate;
pub use distribution::grade_distribution;
pub use leaderboard::leaderboard;
pub use streak::streak;

/// 基于状态存储当前快照的统计服务
#[derive(Clone)]
pub struct AnalyticsService {
    store: StateStore,
}

impl AnalyticsService {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn completion_rate(&self, assignment_id: &str) -> u32 {
        completion::completion_rate(&self.store.snapshot(), assignment_id)
    }

    pub fn grade_distribution(&self, class_id: &str) -> GradeDistribution {
        distribution::grade_distribution(&self.store.snapshot(), class_id)
    }

    pub fn leaderboard(&self, class_id: &str) -> Vec<LeaderboardEntry> {
        leaderboard::leaderboard(&self.store.snapshot(), class_id)
    }

    pub fn streak(&self, student_id: &str, today: NaiveDate) -> u32 {
        streak::streak(&self.store.snapshot(), student_id, today)
    }
}

/// 得分百分比，总分非正时无意义
pub(crate) fn percentage(grade: f64, total_points: f64) -> Option<f64> {
    (total_points > 0.0).then(|| grade / total_points * 100.0)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, TimeZone, Utc};

    use crate::models::{Assignment, AssignmentStatus, ClassRoom, Submission};

    pub fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, day, 9, 30, 0).unwrap()
    }

    pub fn class(id: &str, students: &[&str]) -> ClassRoom {
        ClassRoom {
            id: id.to_string(),
            name: format!("Class {id}"),
            teacher_id: "t1".to_string(),
            student_ids: students.iter().map(|s| s.to_string()).collect(),
            join_code: "ABC123".to_string(),
            archived: false,
        }
    }

    pub fn assignment(id: &str, class_id: &str, total_points: f64) -> Assignment {
        Assignment {
            id: id.to_string(),
            class_id: class_id.to_string(),
            title: format!("Assignment {id}"),
            created_at: at(1),
            due_at: at(8),
            total_points,
            status: AssignmentStatus::Published,
        }
    }

    pub fn submission(
        id: &str,
        assignment_id: &str,
        student_id: &str,
        grade: Option<f64>,
        day: u32,
    ) -> Submission {
        Submission {
            id: id.to_string(),
            assignment_id: assignment_id.to_string(),
            student_id: student_id.to_string(),
            submitted_at: at(day),
            grade,
            graded_at: grade.map(|_| at(day)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::MergeScope;
    use super::fixtures::*;

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(45.0, 50.0), Some(90.0));
        assert_eq!(percentage(10.0, 0.0), None);
    }

    #[test]
    fn test_service_reads_latest_snapshot() {
        let store = StateStore::new();
        let service = AnalyticsService::new(store.clone());
        store.apply(&MergeScope::All, vec![class("c1", &["s1", "s2"])]);
        store.apply(
            &MergeScope::Chunk(vec!["c1".to_string()]),
            vec![assignment("a1", "c1", 10.0)],
        );
        assert_eq!(service.completion_rate("a1"), 0);

        store.apply(
            &MergeScope::Chunk(vec!["a1".to_string()]),
            vec![submission("x1", "a1", "s1", Some(9.0), 3)],
        );
        assert_eq!(service.completion_rate("a1"), 50);
        assert_eq!(service.grade_distribution("c1").a, 1);
        assert_eq!(service.leaderboard("c1")[0].student_id, "s1");
        assert_eq!(service.streak("s1", at(4).date_naive()), 1);
    }
}
