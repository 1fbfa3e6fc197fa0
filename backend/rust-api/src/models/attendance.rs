use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::time::bson_datetime_as_chrono;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Late => "Late",
        }
    }
}

/// One row per (student, class, date); re-marking overwrites `status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub student_id: ObjectId,
    pub class_id: ObjectId,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marked_by: Option<ObjectId>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceMark {
    pub student_id: String,
    pub class_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

/// Accepts a bare array of marks or `{ "records": [...] }`
#[derive(Debug, Deserialize, Validate)]
#[serde(from = "MarkAttendanceBody")]
pub struct MarkAttendanceRequest {
    #[validate(length(min = 1, max = 1000, message = "Provide between 1 and 1000 records"))]
    pub records: Vec<AttendanceMark>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MarkAttendanceBody {
    Bare(Vec<AttendanceMark>),
    Wrapped { records: Vec<AttendanceMark> },
}

impl From<MarkAttendanceBody> for MarkAttendanceRequest {
    fn from(body: MarkAttendanceBody) -> Self {
        match body {
            MarkAttendanceBody::Bare(records) | MarkAttendanceBody::Wrapped { records } => {
                MarkAttendanceRequest { records }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkAttendanceResponse {
    pub inserted: u64,
    pub updated: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub class_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

/// Attendance of one class day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttendanceDay {
    pub date: NaiveDate,
    pub records: Vec<AttendanceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceSummary {
    pub student_id: String,
    pub student_name: String,
    pub present: u32,
    pub absent: u32,
    pub late: u32,
    pub total: u32,
    /// (present + late) / total, 0.0 when nothing was marked
    pub rate: f64,
}

#[derive(Debug, Deserialize)]
pub struct AttendanceRangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceQuery {
    pub class_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Xlsx,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: ExportFormat,
}
