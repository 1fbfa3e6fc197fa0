use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Document};
use mongodb::options::ReturnDocument;
use mongodb::Database;

use crate::error::{AppError, AppResult};
use crate::metrics::{QUIZZES_GENERATED_TOTAL, QUIZ_SUBMISSIONS_TOTAL};
use crate::middlewares::auth::AuthUser;
use crate::models::class::Class;
use crate::models::quiz::{
    CreateQuizRequest, GenerateQuizRequest, ListQuizzesQuery, Question, Quiz, QuizResponse,
    QuizSource, QuizSubmission, QuizSubmissionResponse, QuizSubmissionStatus, SubmitQuizRequest,
};
use crate::models::user::UserRole;
use crate::models::{collections, parse_object_id};
use crate::services::class_service::{ensure_can_manage, ensure_can_view, find_class, visible_class_ids};
use crate::services::quiz_generator::QuizGenerator;
use crate::services::user_service::{display_name, load_users};
use crate::utils::time::chrono_to_bson;

/// Extra time allowed past the limit before a submission counts as timed out
pub const GRACE_SECONDS: i64 = 30;

pub fn answers_match(given: &str, expected: &str) -> bool {
    given.trim().to_lowercase() == expected.trim().to_lowercase()
}

/// Sum of points of correctly answered questions. Missing answers score zero.
pub fn grade(questions: &[Question], answers: &[String]) -> i32 {
    questions
        .iter()
        .zip(answers.iter())
        .filter(|(q, a)| answers_match(a, &q.answer))
        .map(|(q, _)| q.points)
        .sum()
}

pub fn is_timed_out(
    started_at: DateTime<Utc>,
    submitted_at: DateTime<Utc>,
    time_limit_seconds: Option<i64>,
) -> bool {
    match time_limit_seconds {
        Some(limit) => (submitted_at - started_at).num_seconds() > limit + GRACE_SECONDS,
        None => false,
    }
}

/// When the attempt began; timed quizzes must have a recorded start
pub fn attempt_started_at(
    recorded: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    time_limit_seconds: Option<i64>,
) -> AppResult<DateTime<Utc>> {
    match (recorded, time_limit_seconds) {
        (Some(started_at), _) => Ok(started_at),
        (None, Some(_)) => Err(AppError::bad_request("Start the quiz before submitting")),
        (None, None) => Ok(now),
    }
}

fn status_bson(status: QuizSubmissionStatus) -> AppResult<bson::Bson> {
    bson::to_bson(&status)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode quiz status: {}", e)))
}

pub struct QuizService {
    mongo: Database,
}

impl QuizService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    async fn find_quiz(&self, id: &ObjectId) -> AppResult<Quiz> {
        self.mongo
            .collection::<Quiz>(collections::QUIZZES)
            .find_one(doc! { "_id": *id })
            .await?
            .ok_or_else(|| AppError::not_found("Quiz not found"))
    }

    async fn managed_class(&self, session: &AuthUser, class_id: &str) -> AppResult<Class> {
        session.require_staff()?;
        let class_id = parse_object_id(class_id, "class id")?;
        let class = find_class(&self.mongo, &class_id).await?;
        ensure_can_manage(session, &class)?;
        Ok(class)
    }

    /// Quiz plus its class, for a student enrolled in that class
    async fn enrolled_quiz(&self, session: &AuthUser, quiz_id: &str) -> AppResult<Quiz> {
        session.require_role(&[UserRole::Student])?;
        let id = parse_object_id(quiz_id, "quiz id")?;
        let quiz = self.find_quiz(&id).await?;
        let class = find_class(&self.mongo, &quiz.class_id).await?;
        if !class.has_student(&session.id) {
            return Err(AppError::forbidden("You are not enrolled in this class"));
        }
        Ok(quiz)
    }

    async fn insert_quiz(&self, mut quiz: Quiz) -> AppResult<Quiz> {
        let inserted = self
            .mongo
            .collection::<Quiz>(collections::QUIZZES)
            .insert_one(&quiz)
            .await?;
        quiz.id = inserted.inserted_id.as_object_id();
        Ok(quiz)
    }

    pub async fn create_quiz(&self, session: &AuthUser, req: CreateQuizRequest) -> AppResult<QuizResponse> {
        let class = self.managed_class(session, &req.class_id).await?;
        let class_id = class.id.ok_or_else(|| AppError::not_found("Class not found"))?;

        let now = Utc::now();
        let quiz = self
            .insert_quiz(Quiz {
                id: None,
                title: req.title.trim().to_string(),
                description: req.description,
                class_id,
                created_by: session.id,
                time_limit_seconds: req.time_limit_seconds,
                questions: req.questions,
                source: QuizSource::Manual,
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!(quiz_id = ?quiz.id, questions = quiz.questions.len(), "Quiz created");
        Ok(QuizResponse::new(quiz, true))
    }

    /// Asks the external generator for questions and stores them as a new quiz
    pub async fn generate_quiz(
        &self,
        session: &AuthUser,
        req: GenerateQuizRequest,
        generator: Option<&dyn QuizGenerator>,
    ) -> AppResult<QuizResponse> {
        let class = self.managed_class(session, &req.class_id).await?;
        let class_id = class.id.ok_or_else(|| AppError::not_found("Class not found"))?;
        let generator = generator
            .ok_or_else(|| AppError::Unavailable("Quiz generation is not configured".to_string()))?;

        let topic = req.topic.trim();
        let questions = match generator.generate(topic, req.count).await {
            Ok(questions) => {
                QUIZZES_GENERATED_TOTAL.with_label_values(&["success"]).inc();
                questions
            }
            Err(e) => {
                QUIZZES_GENERATED_TOTAL.with_label_values(&["error"]).inc();
                tracing::warn!(topic, "Quiz generation failed: {}", e);
                return Err(AppError::Unavailable(
                    "Quiz generator is unavailable, try again later".to_string(),
                ));
            }
        };

        let now = Utc::now();
        let title = req
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("{} quiz", topic));
        let quiz = self
            .insert_quiz(Quiz {
                id: None,
                title,
                description: format!("Generated from topic \"{}\"", topic),
                class_id,
                created_by: session.id,
                time_limit_seconds: req.time_limit_seconds,
                questions,
                source: QuizSource::Generated,
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!(quiz_id = ?quiz.id, topic, questions = quiz.questions.len(), "Quiz generated");
        Ok(QuizResponse::new(quiz, true))
    }

    pub async fn list_quizzes(
        &self,
        session: &AuthUser,
        query: ListQuizzesQuery,
    ) -> AppResult<Vec<QuizResponse>> {
        let mut filter = Document::new();
        if let Some(raw) = query.class_id.as_deref().filter(|s| !s.is_empty()) {
            let class_id = parse_object_id(raw, "class id")?;
            let class = find_class(&self.mongo, &class_id).await?;
            ensure_can_view(session, &class)?;
            filter.insert("classId", class_id);
        } else if let Some(class_ids) = visible_class_ids(&self.mongo, session).await? {
            filter.insert("classId", doc! { "$in": class_ids });
        }

        let quizzes: Vec<Quiz> = self
            .mongo
            .collection::<Quiz>(collections::QUIZZES)
            .find(filter)
            .sort(doc! { "createdAt": -1 })
            .await?
            .try_collect()
            .await?;

        let include_answers = !session.is_student();
        Ok(quizzes
            .into_iter()
            .map(|q| QuizResponse::new(q, include_answers))
            .collect())
    }

    /// Students get the questions without answers
    pub async fn get_quiz(&self, session: &AuthUser, quiz_id: &str) -> AppResult<QuizResponse> {
        let id = parse_object_id(quiz_id, "quiz id")?;
        let quiz = self.find_quiz(&id).await?;
        let class = find_class(&self.mongo, &quiz.class_id).await?;
        ensure_can_view(session, &class)?;
        Ok(QuizResponse::new(quiz, !session.is_student()))
    }

    pub async fn delete_quiz(&self, session: &AuthUser, quiz_id: &str) -> AppResult<()> {
        let id = parse_object_id(quiz_id, "quiz id")?;
        let quiz = self.find_quiz(&id).await?;
        let class = find_class(&self.mongo, &quiz.class_id).await?;
        ensure_can_manage(session, &class)?;

        let removed = self
            .mongo
            .collection::<QuizSubmission>(collections::QUIZ_SUBMISSIONS)
            .delete_many(doc! { "quizId": id })
            .await?;
        self.mongo
            .collection::<Quiz>(collections::QUIZZES)
            .delete_one(doc! { "_id": id })
            .await?;

        tracing::info!(quiz_id = %id, submissions = removed.deleted_count, "Quiz deleted");
        Ok(())
    }

    /// Records `startedAt` once; calling again returns the same attempt
    pub async fn start_quiz(&self, session: &AuthUser, quiz_id: &str) -> AppResult<QuizSubmissionResponse> {
        let quiz = self.enrolled_quiz(session, quiz_id).await?;
        let id = quiz.id.ok_or_else(|| AppError::not_found("Quiz not found"))?;

        let attempt = self
            .mongo
            .collection::<QuizSubmission>(collections::QUIZ_SUBMISSIONS)
            .find_one_and_update(
                doc! { "quizId": id, "studentId": session.id },
                doc! {
                    "$setOnInsert": {
                        "startedAt": chrono_to_bson(Utc::now()),
                        "answers": [],
                        "score": 0,
                        "maxScore": quiz.max_score(),
                        "timedOut": false,
                        "status": status_bson(QuizSubmissionStatus::InProgress)?,
                    }
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Quiz start upsert returned nothing")))?;

        tracing::debug!(quiz_id = %id, student_id = %session.id, "Quiz started");
        Ok(QuizSubmissionResponse::from(attempt))
    }

    /// Grades and stores the caller's answers. A quiz can be submitted once per student.
    pub async fn submit_quiz(
        &self,
        session: &AuthUser,
        quiz_id: &str,
        req: SubmitQuizRequest,
    ) -> AppResult<QuizSubmissionResponse> {
        let quiz = self.enrolled_quiz(session, quiz_id).await?;
        let id = quiz.id.ok_or_else(|| AppError::not_found("Quiz not found"))?;

        let submissions = self
            .mongo
            .collection::<QuizSubmission>(collections::QUIZ_SUBMISSIONS);
        let existing = submissions
            .find_one(doc! { "quizId": id, "studentId": session.id })
            .await?;
        if existing
            .as_ref()
            .is_some_and(|s| s.status == QuizSubmissionStatus::Submitted)
        {
            return Err(AppError::conflict("You have already submitted this quiz"));
        }

        let now = Utc::now();
        let started_at = attempt_started_at(
            existing.as_ref().map(|s| s.started_at),
            now,
            quiz.time_limit_seconds,
        )?;
        let timed_out = is_timed_out(started_at, now, quiz.time_limit_seconds);
        let score = grade(&quiz.questions, &req.answers);
        let max_score = quiz.max_score();

        // The status guard makes a racing second submit miss the filter and hit
        // the unique (quizId, studentId) index, which surfaces as 409.
        let saved = submissions
            .find_one_and_update(
                doc! {
                    "quizId": id,
                    "studentId": session.id,
                    "status": { "$ne": status_bson(QuizSubmissionStatus::Submitted)? },
                },
                doc! {
                    "$set": {
                        "submittedAt": chrono_to_bson(now),
                        "answers": req.answers,
                        "score": score,
                        "maxScore": max_score,
                        "timedOut": timed_out,
                        "status": status_bson(QuizSubmissionStatus::Submitted)?,
                    },
                    "$setOnInsert": { "startedAt": chrono_to_bson(started_at) },
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Quiz submission upsert returned nothing")))?;

        QUIZ_SUBMISSIONS_TOTAL
            .with_label_values(&[if timed_out { "true" } else { "false" }])
            .inc();
        tracing::info!(
            quiz_id = %id,
            student_id = %session.id,
            score,
            max_score,
            timed_out,
            "Quiz submitted"
        );

        Ok(QuizSubmissionResponse::from(saved))
    }

    pub async fn list_quiz_submissions(
        &self,
        session: &AuthUser,
        quiz_id: &str,
    ) -> AppResult<Vec<QuizSubmissionResponse>> {
        let id = parse_object_id(quiz_id, "quiz id")?;
        let quiz = self.find_quiz(&id).await?;
        let class = find_class(&self.mongo, &quiz.class_id).await?;
        ensure_can_manage(session, &class)?;

        let submissions: Vec<QuizSubmission> = self
            .mongo
            .collection::<QuizSubmission>(collections::QUIZ_SUBMISSIONS)
            .find(doc! { "quizId": id })
            .sort(doc! { "submittedAt": -1 })
            .await?
            .try_collect()
            .await?;

        let student_ids: Vec<ObjectId> = submissions.iter().map(|s| s.student_id).collect();
        let users = load_users(&self.mongo, &student_ids).await?;

        Ok(submissions
            .into_iter()
            .map(|s| {
                let name = display_name(&users, &s.student_id);
                let mut row = QuizSubmissionResponse::from(s);
                row.student_name = Some(name);
                row
            })
            .collect())
    }
}
