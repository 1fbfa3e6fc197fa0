use anyhow::Context;
use bcrypt::{hash, verify};
use chrono::Utc;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::Database;

use crate::error::{AppError, AppResult};
use crate::metrics::LOGINS_TOTAL;
use crate::middlewares::auth::{AuthUser, JwtService};
use crate::models::collections;
use crate::models::user::{
    ChangePasswordRequest, LoginRequest, LoginResponse, User, UserResponse,
};
use crate::utils::time::bson_now;

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct AuthService {
    mongo: Database,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(mongo: Database, bcrypt_cost: u32) -> Self {
        Self { mongo, bcrypt_cost }
    }

    pub fn hash_password(&self, password: &str) -> AppResult<String> {
        Ok(hash(password, self.bcrypt_cost).context("Failed to hash password")?)
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool> {
        Ok(verify(password, hash).context("Failed to verify password")?)
    }

    /// Email + password login; issues a bearer token
    pub async fn login(&self, req: LoginRequest, jwt: &JwtService) -> AppResult<LoginResponse> {
        let users = self.mongo.collection::<User>(collections::USERS);
        let email = normalize_email(&req.email);

        let Some(mut user) = users.find_one(doc! { "email": &email }).await? else {
            LOGINS_TOTAL.with_label_values(&["unknown_user"]).inc();
            return Err(AppError::unauthorized("Invalid email or password"));
        };

        if !self.verify_password(&req.password, &user.password_hash)? {
            tracing::warn!(email = %email, "Failed login attempt");
            LOGINS_TOTAL.with_label_values(&["bad_password"]).inc();
            return Err(AppError::unauthorized("Invalid email or password"));
        }

        if !user.active {
            LOGINS_TOTAL.with_label_values(&["inactive"]).inc();
            return Err(AppError::forbidden("Account is deactivated"));
        }

        let user_id = user
            .id
            .ok_or_else(|| anyhow::anyhow!("Stored user without _id"))?;

        users
            .update_one(
                doc! { "_id": user_id },
                doc! { "$set": { "lastLoginAt": bson_now() } },
            )
            .await?;
        user.last_login_at = Some(Utc::now());

        let token = jwt.issue(&user_id, user.role)?;
        LOGINS_TOTAL.with_label_values(&["success"]).inc();
        tracing::info!(user_id = %user_id, role = user.role.as_str(), "User logged in");

        Ok(LoginResponse {
            token,
            user: UserResponse::from(user),
        })
    }

    pub async fn current_user(&self, session: &AuthUser) -> AppResult<UserResponse> {
        let user = self.find_user(&session.id).await?;
        Ok(UserResponse::from(user))
    }

    pub async fn change_password(
        &self,
        session: &AuthUser,
        req: ChangePasswordRequest,
    ) -> AppResult<()> {
        let user = self.find_user(&session.id).await?;

        if !self.verify_password(&req.old_password, &user.password_hash)? {
            return Err(AppError::bad_request("Current password is incorrect"));
        }
        if req.old_password == req.new_password {
            return Err(AppError::bad_request(
                "New password must differ from the current one",
            ));
        }

        let password_hash = self.hash_password(&req.new_password)?;
        self.mongo
            .collection::<User>(collections::USERS)
            .update_one(
                doc! { "_id": session.id },
                doc! { "$set": { "passwordHash": password_hash, "updatedAt": bson_now() } },
            )
            .await?;

        tracing::info!(user_id = %session.id, "Password changed");
        Ok(())
    }

    async fn find_user(&self, id: &ObjectId) -> AppResult<User> {
        self.mongo
            .collection::<User>(collections::USERS)
            .find_one(doc! { "_id": *id })
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }
}
