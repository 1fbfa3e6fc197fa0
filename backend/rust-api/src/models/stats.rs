use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserCounts {
    pub students: u64,
    pub teachers: u64,
    pub admins: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttendanceCounts {
    pub present: u64,
    pub absent: u64,
    pub late: u64,
}

/// Dashboard numbers for `GET /api/admin/stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub users: UserCounts,
    pub classes: u64,
    pub activities: u64,
    pub quizzes: u64,
    pub announcements: u64,
    pub attendance_date: NaiveDate,
    pub attendance_today: AttendanceCounts,
}
