use crate::sync::SyncedState;

/// 完成率：提交过的班级成员（去重）占班级人数的百分比，四舍五入
///
/// 作业或班级不存在、班级为空时为 0。
pub fn completion_rate(state: &SyncedState, assignment_id: &str) -> u32 {
    let Some(assignment) = state.assignments.get(assignment_id) else {
        return 0;
    };
    let Some(class) = state.classes.get(&assignment.class_id) else {
        return 0;
    };
    let class_size = class.class_size();
    if class_size == 0 {
        return 0;
    }

    let submitted = state
        .latest_submissions_for(assignment_id)
        .into_iter()
        .filter(|s| class.has_student(&s.student_id))
        .count();

    (submitted as f64 / class_size as f64 * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analytics::fixtures::*;
    use crate::sync::CollectionState;

    fn state() -> SyncedState {
        SyncedState {
            classes: CollectionState::from_records(vec![
                class("c1", &["s1", "s2", "s3"]),
                class("empty", &[]),
            ]),
            assignments: CollectionState::from_records(vec![
                assignment("a1", "c1", 100.0),
                assignment("a2", "empty", 100.0),
                assignment("orphan", "gone", 100.0),
            ]),
            ..SyncedState::default()
        }
    }

    #[test]
    fn test_distinct_members_counted() {
        let mut state = state();
        state.submissions = CollectionState::from_records(vec![
            submission("x1", "a1", "s1", None, 2),
            submission("x2", "a1", "s1", None, 3),
            submission("x3", "a1", "s2", None, 3),
            // 已退出班级的学生不计入
            submission("x4", "a1", "former", None, 3),
        ]);
        assert_eq!(completion_rate(&state, "a1"), 67);
    }

    #[test]
    fn test_missing_or_empty_is_zero() {
        let state = state();
        assert_eq!(completion_rate(&state, "a2"), 0);
        assert_eq!(completion_rate(&state, "orphan"), 0);
        assert_eq!(completion_rate(&state, "nope"), 0);
    }
}
