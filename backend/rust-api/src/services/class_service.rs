use std::collections::HashSet;

use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::Database;

use crate::error::{AppError, AppResult};
use crate::middlewares::auth::AuthUser;
use crate::models::activity::{Activity, Submission};
use crate::models::announcement::Announcement;
use crate::models::class::{
    AddStudentsRequest, Class, ClassResponse, CreateClassRequest, UpdateClassRequest,
};
use crate::models::collections;
use crate::models::module::LearningModule;
use crate::models::user::{User, UserRole, UserSummary};
use crate::models::{parse_object_id, parse_object_ids};
use crate::services::file_storage::{discard, FileStore};
use crate::services::user_service::load_users;
use crate::utils::time::bson_now;

/// Loads a class or fails with 404
pub async fn find_class(mongo: &Database, id: &ObjectId) -> AppResult<Class> {
    mongo
        .collection::<Class>(collections::CLASSES)
        .find_one(doc! { "_id": *id })
        .await?
        .ok_or_else(|| AppError::not_found("Class not found"))
}

/// Read access: admins, the class teacher, enrolled students
pub fn ensure_can_view(session: &AuthUser, class: &Class) -> AppResult<()> {
    let allowed = match session.role {
        UserRole::Admin => true,
        UserRole::Teacher => class.is_taught_by(&session.id),
        UserRole::Student => class.has_student(&session.id),
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden("You do not have access to this class"))
    }
}

/// Write access: admins and the class teacher
pub fn ensure_can_manage(session: &AuthUser, class: &Class) -> AppResult<()> {
    if session.is_admin() || (session.is_teacher() && class.is_taught_by(&session.id)) {
        Ok(())
    } else {
        Err(AppError::forbidden("Only the class teacher or an admin can do this"))
    }
}

/// Class ids visible to the caller; `None` means every class (admin)
pub async fn visible_class_ids(
    mongo: &Database,
    session: &AuthUser,
) -> AppResult<Option<Vec<ObjectId>>> {
    let filter = match session.role {
        UserRole::Admin => return Ok(None),
        UserRole::Teacher => doc! { "teacherId": session.id },
        UserRole::Student => doc! { "students": session.id },
    };

    let classes: Vec<Document> = mongo
        .collection::<Document>(collections::CLASSES)
        .find(filter)
        .projection(doc! { "_id": 1 })
        .await?
        .try_collect()
        .await?;

    Ok(Some(
        classes
            .iter()
            .filter_map(|c| c.get_object_id("_id").ok())
            .collect(),
    ))
}

/// `time` must come before `end_time` when both are set
fn check_schedule(time: &str, end_time: &str) -> AppResult<()> {
    if !time.is_empty() && !end_time.is_empty() && time >= end_time {
        return Err(AppError::bad_request("End time must be after start time"));
    }
    Ok(())
}

pub struct ClassService {
    mongo: Database,
}

impl ClassService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    async fn load_teacher(&self, teacher_id: &ObjectId) -> AppResult<User> {
        let teacher = self
            .mongo
            .collection::<User>(collections::USERS)
            .find_one(doc! { "_id": *teacher_id })
            .await?
            .ok_or_else(|| AppError::bad_request("Teacher not found"))?;

        if teacher.role != UserRole::Teacher {
            return Err(AppError::bad_request("Assigned user must have the teacher role"));
        }
        Ok(teacher)
    }

    pub async fn create_class(
        &self,
        session: &AuthUser,
        req: CreateClassRequest,
    ) -> AppResult<ClassResponse> {
        session.require_staff()?;

        let teacher_id = match (&req.teacher_id, session.role) {
            (Some(raw), _) => {
                let id = parse_object_id(raw, "teacher id")?;
                if session.is_teacher() && id != session.id {
                    return Err(AppError::forbidden(
                        "Teachers can only create classes they teach",
                    ));
                }
                id
            }
            (None, UserRole::Teacher) => session.id,
            (None, _) => return Err(AppError::bad_request("teacherId is required")),
        };
        let teacher = self.load_teacher(&teacher_id).await?;

        let time = req.time.unwrap_or_default();
        let end_time = req.end_time.unwrap_or_default();
        check_schedule(&time, &end_time)?;

        let now = Utc::now();
        let mut class = Class {
            id: None,
            class_name: req.class_name.trim().to_string(),
            teacher_id: Some(teacher_id),
            teacher_name: teacher.name,
            day: req.day.trim().to_string(),
            time,
            end_time,
            room_number: req.room_number.trim().to_string(),
            students: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let inserted = self
            .mongo
            .collection::<Class>(collections::CLASSES)
            .insert_one(&class)
            .await?;
        class.id = inserted.inserted_id.as_object_id();

        tracing::info!(class_id = ?class.id, teacher_id = %teacher_id, "Class created");
        Ok(ClassResponse::from(class))
    }

    pub async fn list_classes(&self, session: &AuthUser) -> AppResult<Vec<ClassResponse>> {
        let filter = match session.role {
            UserRole::Admin => doc! {},
            UserRole::Teacher => doc! { "teacherId": session.id },
            UserRole::Student => doc! { "students": session.id },
        };

        let classes: Vec<Class> = self
            .mongo
            .collection::<Class>(collections::CLASSES)
            .find(filter)
            .sort(doc! { "className": 1 })
            .await?
            .try_collect()
            .await?;

        Ok(classes.into_iter().map(ClassResponse::from).collect())
    }

    pub async fn get_class(&self, session: &AuthUser, class_id: &str) -> AppResult<ClassResponse> {
        let id = parse_object_id(class_id, "class id")?;
        let class = find_class(&self.mongo, &id).await?;
        ensure_can_view(session, &class)?;
        Ok(ClassResponse::from(class))
    }

    pub async fn update_class(
        &self,
        session: &AuthUser,
        class_id: &str,
        req: UpdateClassRequest,
    ) -> AppResult<ClassResponse> {
        let id = parse_object_id(class_id, "class id")?;
        let class = find_class(&self.mongo, &id).await?;
        ensure_can_manage(session, &class)?;

        let mut set = doc! { "updatedAt": bson_now() };

        if let Some(raw) = &req.teacher_id {
            if !session.is_admin() {
                return Err(AppError::forbidden("Only an admin can reassign a class"));
            }
            let teacher_id = parse_object_id(raw, "teacher id")?;
            let teacher = self.load_teacher(&teacher_id).await?;
            set.insert("teacherId", teacher_id);
            set.insert("teacherName", teacher.name);
        }

        let time = req.time.clone().unwrap_or_else(|| class.time.clone());
        let end_time = req.end_time.clone().unwrap_or_else(|| class.end_time.clone());
        check_schedule(&time, &end_time)?;

        if let Some(name) = req.class_name {
            set.insert("className", name.trim());
        }
        if let Some(day) = req.day {
            set.insert("day", day.trim());
        }
        if req.time.is_some() {
            set.insert("time", time);
        }
        if req.end_time.is_some() {
            set.insert("endTime", end_time);
        }
        if let Some(room) = req.room_number {
            set.insert("roomNumber", room.trim());
        }

        self.mongo
            .collection::<Class>(collections::CLASSES)
            .update_one(doc! { "_id": id }, doc! { "$set": set })
            .await?;

        let updated = find_class(&self.mongo, &id).await?;
        tracing::info!(class_id = %id, "Class updated");
        Ok(ClassResponse::from(updated))
    }

    /// Deletes the class and everything hanging off it, including stored files
    pub async fn delete_class(
        &self,
        session: &AuthUser,
        class_id: &str,
        files: &dyn FileStore,
    ) -> AppResult<()> {
        let id = parse_object_id(class_id, "class id")?;
        let class = find_class(&self.mongo, &id).await?;
        ensure_can_manage(session, &class)?;

        let mut file_keys = Vec::new();

        let activities: Vec<Activity> = self
            .mongo
            .collection::<Activity>(collections::ACTIVITIES)
            .find(doc! { "classId": id })
            .await?
            .try_collect()
            .await?;
        let activity_ids: Vec<ObjectId> = activities.iter().filter_map(|a| a.id).collect();
        file_keys.extend(
            activities
                .iter()
                .filter_map(|a| a.attached_file.as_ref().map(|f| f.key.clone())),
        );

        let submissions = self.mongo.collection::<Submission>(collections::SUBMISSIONS);
        let submission_filter = doc! { "activityId": { "$in": activity_ids } };
        let stale: Vec<Submission> = submissions
            .find(submission_filter.clone())
            .await?
            .try_collect()
            .await?;
        file_keys.extend(stale.into_iter().filter_map(|s| s.file.map(|f| f.key)));
        submissions.delete_many(submission_filter).await?;

        self.mongo
            .collection::<Activity>(collections::ACTIVITIES)
            .delete_many(doc! { "classId": id })
            .await?;

        let quizzes = self.mongo.collection::<Document>(collections::QUIZZES);
        let quiz_ids: Vec<ObjectId> = quizzes
            .find(doc! { "classId": id })
            .projection(doc! { "_id": 1 })
            .await?
            .try_collect::<Vec<Document>>()
            .await?
            .iter()
            .filter_map(|d| d.get_object_id("_id").ok())
            .collect();
        self.mongo
            .collection::<Document>(collections::QUIZ_SUBMISSIONS)
            .delete_many(doc! { "quizId": { "$in": quiz_ids } })
            .await?;
        quizzes.delete_many(doc! { "classId": id }).await?;

        let modules = self.mongo.collection::<LearningModule>(collections::MODULES);
        let stale_modules: Vec<LearningModule> =
            modules.find(doc! { "classId": id }).await?.try_collect().await?;
        file_keys.extend(stale_modules.into_iter().map(|m| m.file.key));
        modules.delete_many(doc! { "classId": id }).await?;

        let announcements = self
            .mongo
            .collection::<Announcement>(collections::ANNOUNCEMENTS);
        let stale_announcements: Vec<Announcement> = announcements
            .find(doc! { "classId": id })
            .await?
            .try_collect()
            .await?;
        file_keys.extend(
            stale_announcements
                .into_iter()
                .flat_map(|a| a.attachments.into_iter().map(|f| f.key)),
        );
        announcements.delete_many(doc! { "classId": id }).await?;

        let attendance = self
            .mongo
            .collection::<Document>(collections::ATTENDANCE)
            .delete_many(doc! { "classId": id })
            .await?;

        self.mongo
            .collection::<Class>(collections::CLASSES)
            .delete_one(doc! { "_id": id })
            .await?;

        for key in &file_keys {
            discard(files, key).await;
        }

        tracing::info!(
            class_id = %id,
            activities = activities.len(),
            attendance_rows = attendance.deleted_count,
            files = file_keys.len(),
            "Class deleted"
        );
        Ok(())
    }

    /// Atomic `$addToSet` so concurrent enrolments never overwrite each other
    pub async fn add_students(
        &self,
        session: &AuthUser,
        class_id: &str,
        req: AddStudentsRequest,
    ) -> AppResult<Vec<UserSummary>> {
        let id = parse_object_id(class_id, "class id")?;
        let class = find_class(&self.mongo, &id).await?;
        ensure_can_manage(session, &class)?;

        let mut seen = HashSet::new();
        let student_ids: Vec<ObjectId> = parse_object_ids(&req.student_ids, "student id")?
            .into_iter()
            .filter(|sid| seen.insert(*sid))
            .collect();

        let users = load_users(&self.mongo, &student_ids).await?;
        let invalid: Vec<String> = student_ids
            .iter()
            .filter(|sid| !matches!(users.get(sid), Some(u) if u.role == UserRole::Student))
            .map(|sid| sid.to_hex())
            .collect();
        if !invalid.is_empty() {
            return Err(AppError::bad_request(format!(
                "Unknown or non-student ids: {}",
                invalid.join(", ")
            )));
        }

        self.mongo
            .collection::<Class>(collections::CLASSES)
            .update_one(
                doc! { "_id": id },
                doc! {
                    "$addToSet": { "students": { "$each": student_ids.clone() } },
                    "$set": { "updatedAt": bson_now() },
                },
            )
            .await?;

        tracing::info!(class_id = %id, added = student_ids.len(), "Students enrolled");
        self.roster(&id).await
    }

    pub async fn remove_student(
        &self,
        session: &AuthUser,
        class_id: &str,
        student_id: &str,
    ) -> AppResult<Vec<UserSummary>> {
        let id = parse_object_id(class_id, "class id")?;
        let student_id = parse_object_id(student_id, "student id")?;
        let class = find_class(&self.mongo, &id).await?;
        ensure_can_manage(session, &class)?;

        if !class.has_student(&student_id) {
            return Err(AppError::not_found("Student is not enrolled in this class"));
        }

        self.mongo
            .collection::<Class>(collections::CLASSES)
            .update_one(
                doc! { "_id": id },
                doc! {
                    "$pull": { "students": student_id },
                    "$set": { "updatedAt": bson_now() },
                },
            )
            .await?;

        tracing::info!(class_id = %id, student_id = %student_id, "Student removed");
        self.roster(&id).await
    }

    pub async fn list_students(
        &self,
        session: &AuthUser,
        class_id: &str,
    ) -> AppResult<Vec<UserSummary>> {
        let id = parse_object_id(class_id, "class id")?;
        let class = find_class(&self.mongo, &id).await?;
        ensure_can_view(session, &class)?;
        self.roster(&id).await
    }

    async fn roster(&self, class_id: &ObjectId) -> AppResult<Vec<UserSummary>> {
        let class = find_class(&self.mongo, class_id).await?;
        let users = load_users(&self.mongo, &class.students).await?;

        let mut roster: Vec<UserSummary> = class
            .students
            .iter()
            .filter_map(|sid| users.get(sid).map(UserSummary::from))
            .collect();
        roster.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roster)
    }
}
