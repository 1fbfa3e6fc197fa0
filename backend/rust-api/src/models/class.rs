use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use mongodb::bson::oid::ObjectId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::hex_or_default;
use crate::utils::time::bson_datetime_as_chrono;

lazy_static! {
    /// 24h `HH:MM`
    pub static ref TIME_OF_DAY: Regex = Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").unwrap();
}

/// Class stored in MongoDB "classes" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub class_name: String,

    /// Teacher in charge (ref: users, role teacher)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<ObjectId>,

    /// Denormalized teacher name for listings
    #[serde(default)]
    pub teacher_name: String,

    #[serde(default)]
    pub day: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub room_number: String,

    /// Enrolled students (ref: users, role student)
    #[serde(default)]
    pub students: Vec<ObjectId>,

    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl Class {
    pub fn has_student(&self, student_id: &ObjectId) -> bool {
        self.students.contains(student_id)
    }

    pub fn is_taught_by(&self, teacher_id: &ObjectId) -> bool {
        self.teacher_id.as_ref() == Some(teacher_id)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassResponse {
    pub id: String,
    pub class_name: String,
    pub teacher_id: Option<String>,
    pub teacher_name: String,
    pub day: String,
    pub time: String,
    pub end_time: String,
    pub room_number: String,
    pub student_ids: Vec<String>,
    pub student_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Class> for ClassResponse {
    fn from(class: Class) -> Self {
        let student_ids: Vec<String> = class.students.iter().map(|id| id.to_hex()).collect();
        ClassResponse {
            id: hex_or_default(class.id),
            class_name: class.class_name,
            teacher_id: class.teacher_id.map(|id| id.to_hex()),
            teacher_name: class.teacher_name,
            day: class.day,
            time: class.time,
            end_time: class.end_time,
            room_number: class.room_number,
            student_count: student_ids.len(),
            student_ids,
            created_at: class.created_at,
            updated_at: class.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateClassRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Class name must be between 1 and 100 characters"
    ))]
    pub class_name: String,

    /// Required when an admin creates the class; teachers default to themselves
    pub teacher_id: Option<String>,

    #[validate(length(max = 20, message = "Day must be at most 20 characters"))]
    #[serde(default)]
    pub day: String,

    #[validate(regex(path = *TIME_OF_DAY, message = "Time must be HH:MM"))]
    pub time: Option<String>,

    #[validate(regex(path = *TIME_OF_DAY, message = "End time must be HH:MM"))]
    pub end_time: Option<String>,

    #[validate(length(max = 20, message = "Room number must be at most 20 characters"))]
    #[serde(default)]
    pub room_number: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClassRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Class name must be between 1 and 100 characters"
    ))]
    pub class_name: Option<String>,

    pub teacher_id: Option<String>,

    #[validate(length(max = 20, message = "Day must be at most 20 characters"))]
    pub day: Option<String>,

    #[validate(regex(path = *TIME_OF_DAY, message = "Time must be HH:MM"))]
    pub time: Option<String>,

    #[validate(regex(path = *TIME_OF_DAY, message = "End time must be HH:MM"))]
    pub end_time: Option<String>,

    #[validate(length(max = 20, message = "Room number must be at most 20 characters"))]
    pub room_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddStudentsRequest {
    #[validate(length(min = 1, max = 500, message = "Provide between 1 and 500 student ids"))]
    pub student_ids: Vec<String>,
}
