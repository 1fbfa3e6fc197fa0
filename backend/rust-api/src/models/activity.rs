use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{hex_or_default, StoredFile};
use crate::utils::time::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

/// Teacher-assigned work with a deadline and a point value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(with = "bson_datetime_as_chrono")]
    pub deadline: DateTime<Utc>,
    pub class_id: ObjectId,
    pub points: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_file: Option<StoredFile>,
    pub created_by: ObjectId,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Submitted,
    Late,
    Missing,
}

/// A student's response to an activity; one per (activity, student)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub activity_id: ObjectId,
    pub student_id: ObjectId,
    #[serde(with = "bson_datetime_as_chrono")]
    pub submitted_at: DateTime<Utc>,
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<StoredFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub graded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    pub id: String,
    pub title: String,
    pub instructions: String,
    pub deadline: DateTime<Utc>,
    pub class_id: String,
    pub points: i32,
    pub attached_file: Option<StoredFile>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Activity> for ActivityResponse {
    fn from(activity: Activity) -> Self {
        ActivityResponse {
            id: hex_or_default(activity.id),
            title: activity.title,
            instructions: activity.instructions,
            deadline: activity.deadline,
            class_id: activity.class_id.to_hex(),
            points: activity.points,
            attached_file: activity.attached_file,
            created_by: activity.created_by.to_hex(),
            created_at: activity.created_at,
            updated_at: activity.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    /// Empty for synthesized `missing` rows
    pub id: String,
    pub activity_id: String,
    pub student_id: String,
    pub student_name: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub status: SubmissionStatus,
    pub file: Option<StoredFile>,
    pub text: Option<String>,
    pub score: Option<i32>,
    pub feedback: Option<String>,
    pub graded_at: Option<DateTime<Utc>>,
}

impl From<Submission> for SubmissionResponse {
    fn from(submission: Submission) -> Self {
        SubmissionResponse {
            id: hex_or_default(submission.id),
            activity_id: submission.activity_id.to_hex(),
            student_id: submission.student_id.to_hex(),
            student_name: None,
            submitted_at: Some(submission.submitted_at),
            status: submission.status,
            file: submission.file,
            text: submission.text,
            score: submission.score,
            feedback: submission.feedback,
            graded_at: submission.graded_at,
        }
    }
}

impl SubmissionResponse {
    pub fn missing(activity_id: &ObjectId, student_id: &ObjectId, student_name: String) -> Self {
        SubmissionResponse {
            id: String::new(),
            activity_id: activity_id.to_hex(),
            student_id: student_id.to_hex(),
            student_name: Some(student_name),
            submitted_at: None,
            status: SubmissionStatus::Missing,
            file: None,
            text: None,
            score: None,
            feedback: None,
            graded_at: None,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateActivityRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,

    #[validate(length(max = 10000, message = "Instructions must be at most 10000 characters"))]
    #[serde(default)]
    pub instructions: String,

    pub deadline: DateTime<Utc>,

    pub class_id: String,

    #[validate(range(min = 0, max = 1000, message = "Points must be between 0 and 1000"))]
    pub points: i32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateActivityRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: Option<String>,

    #[validate(length(max = 10000, message = "Instructions must be at most 10000 characters"))]
    pub instructions: Option<String>,

    pub deadline: Option<DateTime<Utc>>,

    #[validate(range(min = 0, max = 1000, message = "Points must be between 0 and 1000"))]
    pub points: Option<i32>,
}

/// JSON flavour of `POST /api/activities/submit`
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitActivityRequest {
    pub activity_id: String,

    #[validate(length(min = 1, max = 20000, message = "Text must be between 1 and 20000 characters"))]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GradeSubmissionRequest {
    pub score: i32,

    #[validate(length(max = 5000, message = "Feedback must be at most 5000 characters"))]
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListActivitiesQuery {
    pub class_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(SubmissionStatus::Late).unwrap(),
            serde_json::json!("late")
        );
    }

    #[test]
    fn test_missing_row_has_no_submission_data() {
        let row = SubmissionResponse::missing(&ObjectId::new(), &ObjectId::new(), "Ben".into());
        assert_eq!(row.status, SubmissionStatus::Missing);
        assert!(row.submitted_at.is_none());
        assert!(row.id.is_empty());
    }

    #[test]
    fn test_create_activity_rejects_negative_points() {
        let req: CreateActivityRequest = serde_json::from_value(serde_json::json!({
            "title": "Essay",
            "deadline": "2024-10-01T23:59:00Z",
            "classId": "65f0c0ffee0000000000cafe",
            "points": -5
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }
}
