use chrono::NaiveDate;
use std::collections::BTreeSet;

use crate::sync::SyncedState;

/// 连续提交天数（按 UTC 日期）
///
/// 最近一次提交早于昨天时为 0；否则从最近一天往前数，遇到间隔超过一天即停止。
pub fn streak(state: &SyncedState, student_id: &str, today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = state
        .submissions
        .iter()
        .filter(|s| s.student_id == student_id)
        .map(|s| s.submitted_at.date_naive())
        .collect();

    let mut descending = days.into_iter().rev();
    let Some(mut previous) = descending.next() else {
        return 0;
    };
    if (today - previous).num_days() > 1 {
        return 0;
    }

    let mut count = 1;
    for day in descending {
        if (previous - day).num_days() > 1 {
            break;
        }
        count += 1;
        previous = day;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Submission;
    use crate::services::analytics::fixtures::*;
    use crate::sync::CollectionState;

    const TODAY: u32 = 16;

    fn state(days: &[u32]) -> SyncedState {
        let submissions: Vec<Submission> = days
            .iter()
            .enumerate()
            .map(|(i, day)| submission(&format!("x{i}"), &format!("a{i}"), "s1", None, *day))
            .collect();
        SyncedState {
            submissions: CollectionState::from_records(submissions),
            ..SyncedState::default()
        }
    }

    fn today() -> NaiveDate {
        at(TODAY).date_naive()
    }

    #[test]
    fn test_consecutive_days() {
        assert_eq!(streak(&state(&[TODAY, TODAY - 1, TODAY - 2]), "s1", today()), 3);
    }

    #[test]
    fn test_broken_streak() {
        assert_eq!(streak(&state(&[TODAY - 3, TODAY - 4]), "s1", today()), 0);
    }

    #[test]
    fn test_same_day_counts_once() {
        assert_eq!(streak(&state(&[TODAY - 1, TODAY - 1, TODAY - 2]), "s1", today()), 2);
    }

    #[test]
    fn test_gap_stops_count() {
        assert_eq!(streak(&state(&[TODAY, TODAY - 2, TODAY - 3]), "s1", today()), 1);
        assert_eq!(streak(&state(&[]), "s1", today()), 0);
        assert_eq!(streak(&state(&[TODAY]), "someone-else", today()), 0);
    }
}
