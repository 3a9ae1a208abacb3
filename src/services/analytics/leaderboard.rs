use std::collections::HashMap;

use super::percentage;
use crate::models::analytics::responses::LeaderboardEntry;
use crate::sync::SyncedState;

/// 班级排行榜：每个成员在已评分作业上的平均百分比，降序稳定排序
///
/// 没有任何成绩的成员平均分为 0，仍然出现在榜单中。
pub fn leaderboard(state: &SyncedState, class_id: &str) -> Vec<LeaderboardEntry> {
    let Some(class) = state.classes.get(class_id) else {
        return Vec::new();
    };

    let mut scores: HashMap<&str, Vec<f64>> = HashMap::new();
    for assignment in state.assignments.in_partition(class_id) {
        for submission in state.latest_submissions_for(&assignment.id) {
            let graded = submission
                .grade
                .and_then(|grade| percentage(grade, assignment.total_points));
            if let Some(pct) = graded {
                scores
                    .entry(submission.student_id.as_str())
                    .or_default()
                    .push(pct);
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    let mut entries: Vec<LeaderboardEntry> = class
        .student_ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .map(|student_id| {
            let graded = scores.get(student_id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let average = if graded.is_empty() {
                0.0
            } else {
                graded.iter().sum::<f64>() / graded.len() as f64
            };
            LeaderboardEntry {
                student_id: student_id.clone(),
                average: (average * 100.0).round() / 100.0,
                graded_count: graded.len(),
            }
        })
        .collect();

    entries.sort_by(|a, b| b.average.total_cmp(&a.average));
    entries
}
