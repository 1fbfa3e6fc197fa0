use std::collections::HashMap;

use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document, Regex};
use mongodb::options::ReturnDocument;
use mongodb::Database;

use crate::error::{AppError, AppResult};
use crate::middlewares::auth::AuthUser;
use crate::models::collections;
use crate::models::user::{
    CreateUserRequest, ListUsersQuery, UpdateUserRequest, User, UserResponse, UserRole,
};
use crate::models::{parse_object_id, Paging};
use crate::services::auth_service::{normalize_email, AuthService};
use crate::utils::time::bson_now;

fn roster_removal(id: &ObjectId) -> (Document, Document) {
    (doc! { "students": *id }, doc! { "$pull": { "students": *id } })
}

fn teacher_removal(id: &ObjectId) -> (Document, Document) {
    (
        doc! { "teacherId": *id },
        doc! { "$unset": { "teacherId": "" }, "$set": { "teacherName": "" } },
    )
}

/// Class updates dropping the links a user's previous role allowed
pub fn class_links_to_drop(id: &ObjectId, from: UserRole, to: UserRole) -> Vec<(Document, Document)> {
    let mut updates = Vec::new();
    if from == to {
        return updates;
    }
    if from == UserRole::Student {
        updates.push(roster_removal(id));
    }
    if from == UserRole::Teacher {
        updates.push(teacher_removal(id));
    }
    updates
}

/// Loads users by id; unknown ids are simply absent from the map.
pub async fn load_users(mongo: &Database, ids: &[ObjectId]) -> AppResult<HashMap<ObjectId, User>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let users: Vec<User> = mongo
        .collection::<User>(collections::USERS)
        .find(doc! { "_id": { "$in": ids.to_vec() } })
        .await?
        .try_collect()
        .await?;

    Ok(users
        .into_iter()
        .filter_map(|user| user.id.map(|id| (id, user)))
        .collect())
}

/// Name for display, falling back to the raw id for deleted accounts.
pub fn display_name(users: &HashMap<ObjectId, User>, id: &ObjectId) -> String {
    users
        .get(id)
        .map(|u| u.name.clone())
        .unwrap_or_else(|| id.to_hex())
}

fn escape_regex(input: &str) -> String {
    regex::escape(input.trim())
}

pub struct UserService {
    mongo: Database,
}

impl UserService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    pub async fn create_user(
        &self,
        req: CreateUserRequest,
        auth: &AuthService,
    ) -> AppResult<UserResponse> {
        let users = self.mongo.collection::<User>(collections::USERS);
        let email = normalize_email(&req.email);

        if users.find_one(doc! { "email": &email }).await?.is_some() {
            return Err(AppError::conflict("User with this email already exists"));
        }

        let now = Utc::now();
        let mut user = User {
            id: None,
            name: req.name.trim().to_string(),
            email,
            password_hash: auth.hash_password(&req.password)?,
            role: req.role,
            active: true,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };

        // Unique index on email turns a concurrent duplicate into 409 here
        let inserted = users.insert_one(&user).await?;
        user.id = inserted.inserted_id.as_object_id();

        tracing::info!(user_id = ?user.id, role = user.role.as_str(), "User created");
        Ok(UserResponse::from(user))
    }

    pub async fn list_users(&self, query: ListUsersQuery) -> AppResult<Vec<UserResponse>> {
        let mut filter = Document::new();

        if let Some(role) = query.role {
            filter.insert("role", role.as_str());
        }
        if let Some(active) = query.active {
            filter.insert("active", active);
        }
        if let Some(search) = query.search.filter(|s| !s.trim().is_empty()) {
            let pattern = escape_regex(&search);
            filter.insert(
                "$or",
                vec![
                    doc! { "name": Regex { pattern: pattern.clone(), options: "i".to_string() } },
                    doc! { "email": Regex { pattern, options: "i".to_string() } },
                ],
            );
        }

        let paging = Paging {
            limit: query.limit,
            offset: query.offset,
        };

        let users: Vec<User> = self
            .mongo
            .collection::<User>(collections::USERS)
            .find(filter)
            .sort(doc! { "name": 1 })
            .skip(paging.offset())
            .limit(paging.limit())
            .await?
            .try_collect()
            .await?;

        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    /// Admins may read anyone; other users only themselves
    pub async fn get_user(&self, session: &AuthUser, user_id: &str) -> AppResult<UserResponse> {
        let id = parse_object_id(user_id, "user id")?;
        if !session.is_admin() && session.id != id {
            return Err(AppError::forbidden("You can only view your own account"));
        }

        let user = self.find(&id).await?;
        Ok(UserResponse::from(user))
    }

    pub async fn find(&self, id: &ObjectId) -> AppResult<User> {
        self.mongo
            .collection::<User>(collections::USERS)
            .find_one(doc! { "_id": *id })
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    pub async fn update_user(
        &self,
        session: &AuthUser,
        user_id: &str,
        req: UpdateUserRequest,
    ) -> AppResult<UserResponse> {
        let id = parse_object_id(user_id, "user id")?;

        if id == session.id {
            if req.role.is_some_and(|role| role != UserRole::Admin) {
                return Err(AppError::bad_request("You cannot remove your own admin role"));
            }
            if req.active == Some(false) {
                return Err(AppError::bad_request("You cannot deactivate your own account"));
            }
        }

        let mut set = doc! { "updatedAt": bson_now() };
        if let Some(name) = &req.name {
            set.insert("name", name.trim());
        }
        if let Some(role) = req.role {
            set.insert("role", role.as_str());
        }
        if let Some(active) = req.active {
            set.insert("active", active);
        }

        let previous = self
            .mongo
            .collection::<User>(collections::USERS)
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .return_document(ReturnDocument::Before)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;

        let classes = self.mongo.collection::<Document>(collections::CLASSES);
        if let Some(role) = req.role {
            for (filter, update) in class_links_to_drop(&id, previous.role, role) {
                let result = classes.update_many(filter, update).await?;
                tracing::info!(
                    user_id = %id,
                    from = previous.role.as_str(),
                    to = role.as_str(),
                    classes = result.modified_count,
                    "Dropped class links after role change"
                );
            }
        }

        // Keep the denormalized teacher name on classes in sync
        if let Some(name) = &req.name {
            classes
                .update_many(
                    doc! { "teacherId": id },
                    doc! { "$set": { "teacherName": name.trim() } },
                )
                .await?;
        }

        let user = self.find(&id).await?;
        tracing::info!(user_id = %id, "User updated");
        Ok(UserResponse::from(user))
    }

    /// Deletes the account and detaches it from rosters and classes
    pub async fn delete_user(&self, session: &AuthUser, user_id: &str) -> AppResult<()> {
        let id = parse_object_id(user_id, "user id")?;
        if id == session.id {
            return Err(AppError::bad_request("You cannot delete your own account"));
        }

        let result = self
            .mongo
            .collection::<User>(collections::USERS)
            .delete_one(doc! { "_id": id })
            .await?;
        if result.deleted_count == 0 {
            return Err(AppError::not_found("User not found"));
        }

        let classes = self.mongo.collection::<Document>(collections::CLASSES);
        let (filter, update) = roster_removal(&id);
        let rosters = classes.update_many(filter, update).await?;
        let (filter, update) = teacher_removal(&id);
        classes.update_many(filter, update).await?;

        self.mongo
            .collection::<Document>(collections::PROFILES)
            .delete_one(doc! { "userId": id })
            .await?;
        self.mongo
            .collection::<Document>(collections::TASKS)
            .delete_many(doc! { "userId": id })
            .await?;

        tracing::info!(
            user_id = %id,
            rosters_updated = rosters.modified_count,
            "User deleted"
        );
        Ok(())
    }
}
