use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::{hex_or_default, StoredFile};
use crate::utils::time::bson_datetime_as_chrono;

/// Learning material uploaded for a class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningModule {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub class_id: ObjectId,
    pub uploaded_by: ObjectId,
    pub file: StoredFile,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub class_id: String,
    pub uploaded_by: String,
    pub file: StoredFile,
    pub created_at: DateTime<Utc>,
}

impl From<LearningModule> for ModuleResponse {
    fn from(module: LearningModule) -> Self {
        ModuleResponse {
            id: hex_or_default(module.id),
            title: module.title,
            description: module.description,
            class_id: module.class_id.to_hex(),
            uploaded_by: module.uploaded_by.to_hex(),
            file: module.file,
            created_at: module.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListModulesQuery {
    pub class_id: Option<String>,
}
