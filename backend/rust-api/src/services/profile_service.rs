use mongodb::bson::{doc, oid::ObjectId, Bson};
use mongodb::options::ReturnDocument;
use mongodb::Database;

use crate::error::{AppError, AppResult};
use crate::models::collections;
use crate::models::profile::{Profile, ProfileResponse, UpdateProfileRequest};
use crate::services::user_service::UserService;
use crate::utils::time::bson_now;

pub struct ProfileService {
    mongo: Database,
}

impl ProfileService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Stored profile, or an empty one when the user never saved it
    pub async fn get_profile(&self, user_id: &ObjectId) -> AppResult<ProfileResponse> {
        let user = UserService::new(self.mongo.clone()).find(user_id).await?;
        let profile = self
            .mongo
            .collection::<Profile>(collections::PROFILES)
            .find_one(doc! { "userId": *user_id })
            .await?
            .unwrap_or_else(|| empty_profile(*user_id));

        Ok(ProfileResponse::new(&user, profile))
    }

    pub async fn upsert_profile(
        &self,
        user_id: &ObjectId,
        req: UpdateProfileRequest,
    ) -> AppResult<ProfileResponse> {
        let user = UserService::new(self.mongo.clone()).find(user_id).await?;

        let mut set = doc! { "updatedAt": bson_now() };
        if let Some(bio) = req.bio {
            set.insert("bio", bio.trim());
        }
        if let Some(phone) = req.phone {
            set.insert("phone", phone.trim());
        }
        if let Some(address) = req.address {
            set.insert("address", address.trim());
        }
        if let Some(birth_date) = req.birth_date {
            set.insert("birthDate", birth_date.format("%Y-%m-%d").to_string());
        }
        if let Some(avatar_url) = req.avatar_url {
            set.insert("avatarUrl", Bson::String(avatar_url));
        }

        let profile = self
            .mongo
            .collection::<Profile>(collections::PROFILES)
            .find_one_and_update(
                doc! { "userId": *user_id },
                doc! { "$set": set },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Profile upsert returned nothing")))?;

        tracing::info!(user_id = %user_id, "Profile updated");
        Ok(ProfileResponse::new(&user, profile))
    }
}

fn empty_profile(user_id: ObjectId) -> Profile {
    Profile {
        id: None,
        user_id,
        bio: String::new(),
        phone: String::new(),
        address: String::new(),
        birth_date: None,
        avatar_url: None,
        updated_at: None,
    }
}
