use serde::Serialize;

/// 成绩等级分布
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GradeDistribution {
    pub a: usize, // ≥90
    pub b: usize, // ≥80
    pub c: usize, // ≥70
    pub d: usize, // ≥60
    pub f: usize, // <60
}

impl GradeDistribution {
    pub fn record(&mut self, percentage: f64) {
        if percentage >= 90.0 {
            self.a += 1;
        } else if percentage >= 80.0 {
            self.b += 1;
        } else if percentage >= 70.0 {
            self.c += 1;
        } else if percentage >= 60.0 {
            self.d += 1;
        } else {
            self.f += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.a + self.b + self.c + self.d + self.f
    }
}

/// 排行榜条目
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub student_id: String,
    // 已评分作业的平均百分比，没有成绩时为 0
    pub average: f64,
    pub graded_count: usize,
}
