use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub mod activity;
pub mod announcement;
pub mod attendance;
pub mod class;
pub mod module;
pub mod profile;
pub mod quiz;
pub mod stats;
pub mod task;
pub mod user;

/// MongoDB collection names
pub mod collections {
    pub const USERS: &str = "users";
    pub const PROFILES: &str = "profiles";
    pub const CLASSES: &str = "classes";
    pub const ATTENDANCE: &str = "attendance";
    pub const ANNOUNCEMENTS: &str = "announcements";
    pub const ACTIVITIES: &str = "activities";
    pub const SUBMISSIONS: &str = "submissions";
    pub const QUIZZES: &str = "quizzes";
    pub const QUIZ_SUBMISSIONS: &str = "quiz_submissions";
    pub const TASKS: &str = "tasks";
    pub const MODULES: &str = "modules";
}

/// Metadata of a file kept in the configured file store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
    /// Storage key, used to delete the object later
    pub key: String,
    /// Download location, filled in from `key` by the file store when a
    /// response is built. Left out of the database for stores whose links expire.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// Limit/offset pair shared by list endpoints.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct Paging {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Paging {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100) as i64
    }

    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0) as u64
    }
}

pub fn parse_object_id(value: &str, field: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(value.trim())
        .map_err(|_| AppError::bad_request(format!("Invalid {}: must be ObjectId", field)))
}

pub fn parse_object_ids(values: &[String], field: &str) -> Result<Vec<ObjectId>, AppError> {
    values
        .iter()
        .map(|value| parse_object_id(value, field))
        .collect()
}

pub fn hex_or_default(id: Option<ObjectId>) -> String {
    id.map(|id| id.to_hex()).unwrap_or_default()
}
