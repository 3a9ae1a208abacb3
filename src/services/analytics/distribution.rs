use super::percentage;
use crate::models::analytics::responses::GradeDistribution;
use crate::sync::SyncedState;

/// 班级内所有已评分提交的等级分布
///
/// 百分比先四舍五入到整数再分档，与成绩通知中显示的百分比一致。
pub fn grade_distribution(state: &SyncedState, class_id: &str) -> GradeDistribution {
    let mut distribution = GradeDistribution::default();

    for assignment in state.assignments.in_partition(class_id) {
        for submission in state.latest_submissions_for(&assignment.id) {
            let graded = submission
                .grade
                .and_then(|grade| percentage(grade, assignment.total_points));
            if let Some(pct) = graded {
                distribution.record(pct.round());
            }
        }
    }

    distribution
}
