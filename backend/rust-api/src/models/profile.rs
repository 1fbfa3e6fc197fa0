use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::time::bson_datetime_as_chrono_option;

/// Per-user profile stored in "profiles", keyed by `userId`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    /// Stored as `YYYY-MM-DD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: super::user::UserRole,
    pub bio: String,
    pub phone: String,
    pub address: String,
    pub birth_date: Option<NaiveDate>,
    pub avatar_url: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProfileResponse {
    pub fn new(user: &super::user::User, profile: Profile) -> Self {
        ProfileResponse {
            user_id: profile.user_id.to_hex(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            bio: profile.bio,
            phone: profile.phone,
            address: profile.address,
            birth_date: profile.birth_date,
            avatar_url: profile.avatar_url,
            updated_at: profile.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(max = 1000, message = "Bio must be at most 1000 characters"))]
    pub bio: Option<String>,

    #[validate(length(max = 30, message = "Phone must be at most 30 characters"))]
    pub phone: Option<String>,

    #[validate(length(max = 300, message = "Address must be at most 300 characters"))]
    pub address: Option<String>,

    pub birth_date: Option<NaiveDate>,

    #[validate(url(message = "Avatar must be a valid URL"))]
    pub avatar_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_profile_parses_birth_date() {
        let req: UpdateProfileRequest = serde_json::from_value(serde_json::json!({
            "bio": "Math club",
            "birthDate": "2009-04-17"
        }))
        .unwrap();
        assert_eq!(req.birth_date, NaiveDate::from_ymd_opt(2009, 4, 17));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_update_profile_rejects_bad_avatar() {
        let req = UpdateProfileRequest {
            bio: None,
            phone: None,
            address: None,
            birth_date: None,
            avatar_url: Some("not a url".to_string()),
        };
        assert!(req.validate().is_err());
    }
}
