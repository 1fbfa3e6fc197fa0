use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Bson, Document};
use mongodb::options::ReturnDocument;
use mongodb::Database;

use crate::error::{AppError, AppResult};
use crate::metrics::ACTIVITY_SUBMISSIONS_TOTAL;
use crate::middlewares::auth::AuthUser;
use crate::models::activity::{
    Activity, ActivityResponse, CreateActivityRequest, GradeSubmissionRequest,
    ListActivitiesQuery, Submission, SubmissionResponse, SubmissionStatus, UpdateActivityRequest,
};
use crate::models::class::Class;
use crate::models::user::UserRole;
use crate::models::{collections, parse_object_id};
use crate::services::class_service::{ensure_can_manage, ensure_can_view, find_class, visible_class_ids};
use crate::services::file_storage::{
    commit_or_discard, discard, store_upload, FileStore, UploadedFile,
};
use crate::services::user_service::{display_name, load_users};
use crate::utils::time::{bson_now, chrono_to_bson};

/// `submitted` at or before the deadline, `late` after it
pub fn submission_status(submitted_at: DateTime<Utc>, deadline: DateTime<Utc>) -> SubmissionStatus {
    if submitted_at <= deadline {
        SubmissionStatus::Submitted
    } else {
        SubmissionStatus::Late
    }
}

/// One row per rostered student, `missing` where nothing was handed in.
/// Submissions from students no longer on the roster are kept at the end.
pub fn submission_rows(
    activity_id: &ObjectId,
    roster: &[(ObjectId, String)],
    submissions: Vec<Submission>,
) -> Vec<SubmissionResponse> {
    let mut by_student: HashMap<ObjectId, Submission> = submissions
        .into_iter()
        .map(|s| (s.student_id, s))
        .collect();

    let mut rows: Vec<SubmissionResponse> = roster
        .iter()
        .map(|(student_id, name)| match by_student.remove(student_id) {
            Some(submission) => {
                let mut row = SubmissionResponse::from(submission);
                row.student_name = Some(name.clone());
                row
            }
            None => SubmissionResponse::missing(activity_id, student_id, name.clone()),
        })
        .collect();

    let mut extra: Vec<SubmissionResponse> =
        by_student.into_values().map(SubmissionResponse::from).collect();
    extra.sort_by(|a, b| a.student_id.cmp(&b.student_id));
    rows.extend(extra);
    rows
}

fn to_bson_file(file: &crate::models::StoredFile) -> AppResult<Bson> {
    bson::to_bson(file)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode file metadata: {}", e)))
}

pub struct ActivityService {
    mongo: Database,
}

impl ActivityService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    async fn find_activity(&self, id: &ObjectId) -> AppResult<Activity> {
        self.mongo
            .collection::<Activity>(collections::ACTIVITIES)
            .find_one(doc! { "_id": *id })
            .await?
            .ok_or_else(|| AppError::not_found("Activity not found"))
    }

    /// Activity plus its class, after a manage check
    async fn managed_activity(&self, session: &AuthUser, id: &ObjectId) -> AppResult<(Activity, Class)> {
        let activity = self.find_activity(id).await?;
        let class = find_class(&self.mongo, &activity.class_id).await?;
        ensure_can_manage(session, &class)?;
        Ok((activity, class))
    }

    pub async fn create_activity(
        &self,
        session: &AuthUser,
        req: CreateActivityRequest,
    ) -> AppResult<ActivityResponse> {
        session.require_staff()?;
        let class_id = parse_object_id(&req.class_id, "class id")?;
        let class = find_class(&self.mongo, &class_id).await?;
        ensure_can_manage(session, &class)?;

        let now = Utc::now();
        let mut activity = Activity {
            id: None,
            title: req.title.trim().to_string(),
            instructions: req.instructions,
            deadline: req.deadline,
            class_id,
            points: req.points,
            attached_file: None,
            created_by: session.id,
            created_at: now,
            updated_at: now,
        };

        let inserted = self
            .mongo
            .collection::<Activity>(collections::ACTIVITIES)
            .insert_one(&activity)
            .await?;
        activity.id = inserted.inserted_id.as_object_id();

        tracing::info!(activity_id = ?activity.id, class_id = %class_id, "Activity created");
        Ok(ActivityResponse::from(activity))
    }

    /// Soonest deadline first, limited to classes the caller can see
    pub async fn list_activities(
        &self,
        session: &AuthUser,
        query: ListActivitiesQuery,
    ) -> AppResult<Vec<ActivityResponse>> {
        let mut filter = Document::new();
        if let Some(raw) = query.class_id.as_deref().filter(|s| !s.is_empty()) {
            let class_id = parse_object_id(raw, "class id")?;
            let class = find_class(&self.mongo, &class_id).await?;
            ensure_can_view(session, &class)?;
            filter.insert("classId", class_id);
        } else if let Some(class_ids) = visible_class_ids(&self.mongo, session).await? {
            filter.insert("classId", doc! { "$in": class_ids });
        }

        let activities: Vec<Activity> = self
            .mongo
            .collection::<Activity>(collections::ACTIVITIES)
            .find(filter)
            .sort(doc! { "deadline": 1 })
            .await?
            .try_collect()
            .await?;

        Ok(activities.into_iter().map(ActivityResponse::from).collect())
    }

    pub async fn get_activity(&self, session: &AuthUser, activity_id: &str) -> AppResult<ActivityResponse> {
        let id = parse_object_id(activity_id, "activity id")?;
        let activity = self.find_activity(&id).await?;
        let class = find_class(&self.mongo, &activity.class_id).await?;
        ensure_can_view(session, &class)?;
        Ok(ActivityResponse::from(activity))
    }

    pub async fn update_activity(
        &self,
        session: &AuthUser,
        activity_id: &str,
        req: UpdateActivityRequest,
    ) -> AppResult<ActivityResponse> {
        let id = parse_object_id(activity_id, "activity id")?;
        self.managed_activity(session, &id).await?;

        let mut set = doc! { "updatedAt": bson_now() };
        if let Some(title) = &req.title {
            set.insert("title", title.trim());
        }
        if let Some(instructions) = req.instructions {
            set.insert("instructions", instructions);
        }
        if let Some(deadline) = req.deadline {
            set.insert("deadline", chrono_to_bson(deadline));
        }
        if let Some(points) = req.points {
            set.insert("points", points);
        }

        let updated = self
            .mongo
            .collection::<Activity>(collections::ACTIVITIES)
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| AppError::not_found("Activity not found"))?;

        tracing::info!(activity_id = %id, "Activity updated");
        Ok(ActivityResponse::from(updated))
    }

    /// Removes the activity, its submissions and every file attached to either
    pub async fn delete_activity(
        &self,
        session: &AuthUser,
        activity_id: &str,
        files: &dyn FileStore,
    ) -> AppResult<()> {
        let id = parse_object_id(activity_id, "activity id")?;
        let (activity, _) = self.managed_activity(session, &id).await?;

        let submissions = self.mongo.collection::<Submission>(collections::SUBMISSIONS);
        let stale: Vec<Submission> = submissions
            .find(doc! { "activityId": id })
            .await?
            .try_collect()
            .await?;
        submissions.delete_many(doc! { "activityId": id }).await?;
        self.mongo
            .collection::<Activity>(collections::ACTIVITIES)
            .delete_one(doc! { "_id": id })
            .await?;

        let keys = stale
            .iter()
            .filter_map(|s| s.file.as_ref().map(|f| f.key.clone()))
            .chain(activity.attached_file.map(|f| f.key));
        for key in keys {
            discard(files, &key).await;
        }

        tracing::info!(activity_id = %id, submissions = stale.len(), "Activity deleted");
        Ok(())
    }

    /// Attaches (or replaces) the instructions file of an activity
    pub async fn attach_file(
        &self,
        session: &AuthUser,
        activity_id: &str,
        upload: UploadedFile,
        files: &dyn FileStore,
    ) -> AppResult<ActivityResponse> {
        let id = parse_object_id(activity_id, "activity id")?;
        let (activity, _) = self.managed_activity(session, &id).await?;

        let stored = store_upload(files, &format!("activities/{}", id.to_hex()), upload).await?;
        let activities = self.mongo.collection::<Activity>(collections::ACTIVITIES);
        let updated = commit_or_discard(files, Some(&stored), async {
            let update =
                doc! { "$set": { "attachedFile": to_bson_file(&stored)?, "updatedAt": bson_now() } };
            let updated = activities
                .find_one_and_update(doc! { "_id": id }, update)
                .return_document(ReturnDocument::After)
                .await?;
            updated.ok_or_else(|| AppError::not_found("Activity not found"))
        })
        .await?;

        if let Some(previous) = activity.attached_file {
            discard(files, &previous.key).await;
        }

        Ok(ActivityResponse::from(updated))
    }

    /// Upserts the caller's submission; a resubmission replaces the old one and clears its grade
    pub async fn submit(
        &self,
        session: &AuthUser,
        activity_id: &str,
        text: Option<String>,
        upload: Option<UploadedFile>,
        files: &dyn FileStore,
    ) -> AppResult<SubmissionResponse> {
        session.require_role(&[UserRole::Student])?;
        let id = parse_object_id(activity_id, "activity id")?;

        let text = text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        if text.is_none() && upload.is_none() {
            return Err(AppError::bad_request("A submission needs a file or some text"));
        }

        let activity = self.find_activity(&id).await?;
        let class = find_class(&self.mongo, &activity.class_id).await?;
        if !class.has_student(&session.id) {
            return Err(AppError::forbidden("You are not enrolled in this class"));
        }

        let submissions = self.mongo.collection::<Submission>(collections::SUBMISSIONS);
        let filter = doc! { "activityId": id, "studentId": session.id };
        let previous = submissions.find_one(filter.clone()).await?;

        let file = match upload {
            Some(upload) => {
                let scope = format!("submissions/{}/{}", id.to_hex(), session.id.to_hex());
                Some(store_upload(files, &scope, upload).await?)
            }
            None => None,
        };

        let now = Utc::now();
        let status = submission_status(now, activity.deadline);

        let saved = commit_or_discard(files, file.as_ref(), async {
            let mut set = doc! {
                "submittedAt": chrono_to_bson(now),
                "status": bson::to_bson(&status)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode status: {}", e)))?,
            };
            let mut unset = doc! { "score": "", "feedback": "", "gradedAt": "" };
            match &text {
                Some(text) => {
                    set.insert("text", text.as_str());
                }
                None => {
                    unset.insert("text", "");
                }
            }
            match &file {
                Some(file) => {
                    set.insert("file", to_bson_file(file)?);
                }
                None => {
                    unset.insert("file", "");
                }
            }

            let saved = submissions
                .find_one_and_update(filter, doc! { "$set": set, "$unset": unset })
                .upsert(true)
                .return_document(ReturnDocument::After)
                .await?;
            saved.ok_or_else(|| AppError::Internal(anyhow::anyhow!("Submission upsert returned nothing")))
        })
        .await?;

        if let Some(old_file) = previous.and_then(|p| p.file) {
            discard(files, &old_file.key).await;
        }

        let status_label = match status {
            SubmissionStatus::Late => "late",
            _ => "submitted",
        };
        ACTIVITY_SUBMISSIONS_TOTAL
            .with_label_values(&[status_label])
            .inc();
        tracing::info!(
            activity_id = %id,
            student_id = %session.id,
            status = status_label,
            "Activity submitted"
        );

        Ok(SubmissionResponse::from(saved))
    }

    pub async fn list_submissions(
        &self,
        session: &AuthUser,
        activity_id: &str,
    ) -> AppResult<Vec<SubmissionResponse>> {
        let id = parse_object_id(activity_id, "activity id")?;
        let (_, class) = self.managed_activity(session, &id).await?;

        let submissions: Vec<Submission> = self
            .mongo
            .collection::<Submission>(collections::SUBMISSIONS)
            .find(doc! { "activityId": id })
            .await?
            .try_collect()
            .await?;

        let users = load_users(&self.mongo, &class.students).await?;
        let mut roster: Vec<(ObjectId, String)> = class
            .students
            .iter()
            .map(|sid| (*sid, display_name(&users, sid)))
            .collect();
        roster.sort_by(|a, b| a.1.cmp(&b.1));

        Ok(submission_rows(&id, &roster, submissions))
    }

    /// The calling student's submissions, newest first
    pub async fn my_submissions(&self, session: &AuthUser) -> AppResult<Vec<SubmissionResponse>> {
        session.require_role(&[UserRole::Student])?;

        let submissions: Vec<Submission> = self
            .mongo
            .collection::<Submission>(collections::SUBMISSIONS)
            .find(doc! { "studentId": session.id })
            .sort(doc! { "submittedAt": -1 })
            .await?
            .try_collect()
            .await?;

        Ok(submissions.into_iter().map(SubmissionResponse::from).collect())
    }

    pub async fn grade_submission(
        &self,
        session: &AuthUser,
        submission_id: &str,
        req: GradeSubmissionRequest,
    ) -> AppResult<SubmissionResponse> {
        session.require_staff()?;
        let id = parse_object_id(submission_id, "submission id")?;

        let submissions = self.mongo.collection::<Submission>(collections::SUBMISSIONS);
        let submission = submissions
            .find_one(doc! { "_id": id })
            .await?
            .ok_or_else(|| AppError::not_found("Submission not found"))?;
        let (activity, _) = self.managed_activity(session, &submission.activity_id).await?;

        if req.score < 0 || req.score > activity.points {
            return Err(AppError::bad_request(format!(
                "Score must be between 0 and {}",
                activity.points
            )));
        }

        let mut set = doc! { "score": req.score, "gradedAt": bson_now() };
        if let Some(feedback) = req.feedback {
            set.insert("feedback", feedback.trim());
        }

        let graded = submissions
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| AppError::not_found("Submission not found"))?;

        tracing::info!(submission_id = %id, score = req.score, "Submission graded");
        Ok(SubmissionResponse::from(graded))
    }
}
