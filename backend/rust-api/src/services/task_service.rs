use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson};
use mongodb::options::ReturnDocument;
use mongodb::Database;

use crate::error::{AppError, AppResult};
use crate::middlewares::auth::AuthUser;
use crate::models::task::{CreateTaskRequest, Task, TaskResponse, UpdateTaskRequest};
use crate::models::{collections, parse_object_id};
use crate::utils::time::{bson_now, chrono_to_bson};

/// Personal to-do list. Every query is scoped to the caller, so foreign ids read as 404.
pub struct TaskService {
    mongo: Database,
}

impl TaskService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn owned(id: ObjectId, owner: &AuthUser) -> mongodb::bson::Document {
        doc! { "_id": id, "userId": owner.id }
    }

    pub async fn list_tasks(&self, session: &AuthUser) -> AppResult<Vec<TaskResponse>> {
        let tasks: Vec<Task> = self
            .mongo
            .collection::<Task>(collections::TASKS)
            .find(doc! { "userId": session.id })
            .sort(doc! { "completed": 1, "dueDate": 1, "createdAt": -1 })
            .await?
            .try_collect()
            .await?;

        Ok(tasks.into_iter().map(TaskResponse::from).collect())
    }

    pub async fn create_task(&self, session: &AuthUser, req: CreateTaskRequest) -> AppResult<TaskResponse> {
        let now = Utc::now();
        let mut task = Task {
            id: None,
            user_id: session.id,
            title: req.title.trim().to_string(),
            description: req.description,
            due_date: req.due_date,
            completed: false,
            created_at: now,
            updated_at: now,
        };

        let inserted = self
            .mongo
            .collection::<Task>(collections::TASKS)
            .insert_one(&task)
            .await?;
        task.id = inserted.inserted_id.as_object_id();

        tracing::debug!(task_id = ?task.id, user_id = %session.id, "Task created");
        Ok(TaskResponse::from(task))
    }

    pub async fn update_task(
        &self,
        session: &AuthUser,
        task_id: &str,
        req: UpdateTaskRequest,
    ) -> AppResult<TaskResponse> {
        let id = parse_object_id(task_id, "task id")?;

        let mut set = doc! { "updatedAt": bson_now() };
        if let Some(title) = &req.title {
            set.insert("title", title.trim());
        }
        if let Some(description) = req.description {
            set.insert("description", description);
        }
        if let Some(due_date) = req.due_date {
            set.insert("dueDate", chrono_to_bson(due_date));
        }
        if let Some(completed) = req.completed {
            set.insert("completed", Bson::Boolean(completed));
        }

        let task = self
            .mongo
            .collection::<Task>(collections::TASKS)
            .find_one_and_update(Self::owned(id, session), doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| AppError::not_found("Task not found"))?;

        Ok(TaskResponse::from(task))
    }

    pub async fn delete_task(&self, session: &AuthUser, task_id: &str) -> AppResult<()> {
        let id = parse_object_id(task_id, "task id")?;
        let result = self
            .mongo
            .collection::<Task>(collections::TASKS)
            .delete_one(Self::owned(id, session))
            .await?;

        if result.deleted_count == 0 {
            return Err(AppError::not_found("Task not found"));
        }
        Ok(())
    }
}
