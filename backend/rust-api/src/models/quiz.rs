use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::hex_or_default;
use crate::utils::time::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

fn default_points() -> i32 {
    1
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuizSource {
    #[default]
    Manual,
    Generated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[validate(length(min = 1, max = 2000, message = "Prompt must be between 1 and 2000 characters"))]
    pub prompt: String,

    /// Empty for free-text questions
    #[serde(default)]
    #[validate(length(max = 10, message = "At most 10 options per question"))]
    pub options: Vec<String>,

    #[validate(length(min = 1, max = 500, message = "Answer must be between 1 and 500 characters"))]
    pub answer: String,

    #[serde(default = "default_points")]
    #[validate(range(min = 0, max = 100, message = "Points must be between 0 and 100"))]
    pub points: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub class_id: ObjectId,
    pub created_by: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_seconds: Option<i64>,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub source: QuizSource,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl Quiz {
    pub fn max_score(&self) -> i32 {
        self.questions.iter().map(|q| q.points).sum()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuizSubmissionStatus {
    InProgress,
    Submitted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmission {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub quiz_id: ObjectId,
    pub student_id: ObjectId,
    #[serde(with = "bson_datetime_as_chrono")]
    pub started_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub max_score: i32,
    #[serde(default)]
    pub timed_out: bool,
    pub status: QuizSubmissionStatus,
}

/// Question as shown to a student taking the quiz
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub prompt: String,
    pub options: Vec<String>,
    pub points: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub class_id: String,
    pub created_by: String,
    pub time_limit_seconds: Option<i64>,
    pub source: QuizSource,
    pub question_count: usize,
    pub max_score: i32,
    pub questions: Vec<QuestionView>,
    pub created_at: DateTime<Utc>,
}

impl QuizResponse {
    pub fn new(quiz: Quiz, include_answers: bool) -> Self {
        let max_score = quiz.max_score();
        let questions: Vec<QuestionView> = quiz
            .questions
            .into_iter()
            .map(|q| QuestionView {
                prompt: q.prompt,
                options: q.options,
                points: q.points,
                answer: include_answers.then_some(q.answer),
            })
            .collect();

        QuizResponse {
            id: hex_or_default(quiz.id),
            title: quiz.title,
            description: quiz.description,
            class_id: quiz.class_id.to_hex(),
            created_by: quiz.created_by.to_hex(),
            time_limit_seconds: quiz.time_limit_seconds,
            source: quiz.source,
            question_count: questions.len(),
            max_score,
            questions,
            created_at: quiz.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmissionResponse {
    pub id: String,
    pub quiz_id: String,
    pub student_id: String,
    pub student_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub answers: Vec<String>,
    pub score: i32,
    pub max_score: i32,
    pub timed_out: bool,
    pub status: QuizSubmissionStatus,
}

impl From<QuizSubmission> for QuizSubmissionResponse {
    fn from(submission: QuizSubmission) -> Self {
        QuizSubmissionResponse {
            id: hex_or_default(submission.id),
            quiz_id: submission.quiz_id.to_hex(),
            student_id: submission.student_id.to_hex(),
            student_name: None,
            started_at: submission.started_at,
            submitted_at: submission.submitted_at,
            answers: submission.answers,
            score: submission.score,
            max_score: submission.max_score,
            timed_out: submission.timed_out,
            status: submission.status,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,

    #[serde(default)]
    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: String,

    pub class_id: String,

    #[validate(range(min = 30, max = 86400, message = "Time limit must be between 30 seconds and 24 hours"))]
    pub time_limit_seconds: Option<i64>,

    #[validate(
        length(min = 1, max = 200, message = "Provide between 1 and 200 questions"),
        nested
    )]
    pub questions: Vec<Question>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuizRequest {
    #[validate(length(min = 1, max = 200, message = "Topic must be between 1 and 200 characters"))]
    pub topic: String,

    #[validate(range(min = 1, max = 50, message = "Count must be between 1 and 50"))]
    pub count: u32,

    pub class_id: String,

    pub title: Option<String>,

    #[validate(range(min = 30, max = 86400, message = "Time limit must be between 30 seconds and 24 hours"))]
    pub time_limit_seconds: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitQuizRequest {
    #[validate(length(max = 200, message = "At most 200 answers"))]
    pub answers: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuizzesQuery {
    pub class_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_quiz() -> Quiz {
        let now = Utc::now();
        Quiz {
            id: Some(ObjectId::new()),
            title: "Fractions".to_string(),
            description: String::new(),
            class_id: ObjectId::new(),
            created_by: ObjectId::new(),
            time_limit_seconds: Some(300),
            questions: vec![
                Question {
                    prompt: "1/2 + 1/4?".to_string(),
                    options: vec!["3/4".to_string(), "2/6".to_string()],
                    answer: "3/4".to_string(),
                    points: 2,
                },
                Question {
                    prompt: "Simplify 4/8".to_string(),
                    options: vec![],
                    answer: "1/2".to_string(),
                    points: 3,
                },
            ],
            source: QuizSource::Manual,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_student_view_hides_answers() {
        let json = serde_json::to_value(QuizResponse::new(sample_quiz(), false)).unwrap();
        assert!(json["questions"][0].get("answer").is_none());
        assert_eq!(json["maxScore"], 5);
    }

    #[test]
    fn test_teacher_view_keeps_answers() {
        let response = QuizResponse::new(sample_quiz(), true);
        assert_eq!(response.questions[1].answer.as_deref(), Some("1/2"));
    }

    #[test]
    fn test_question_points_default_to_one() {
        let q: Question =
            serde_json::from_value(serde_json::json!({"prompt": "2+2", "answer": "4"})).unwrap();
        assert_eq!(q.points, 1);
    }

    #[test]
    fn test_submission_status_snake_case() {
        assert_eq!(
            serde_json::to_value(QuizSubmissionStatus::InProgress).unwrap(),
            serde_json::json!("in_progress")
        );
    }
}
