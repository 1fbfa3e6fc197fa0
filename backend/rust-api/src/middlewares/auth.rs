use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::{doc, oid::ObjectId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppError;
use crate::metrics::track_db_operation;
use crate::models::collections;
use crate::models::user::UserRole;
use crate::services::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String,  // user_id
    pub role: String, // student, teacher, admin
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    InvalidToken,
    ExpiredToken,
    MissingToken,
    InvalidSignature,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidToken => write!(f, "Invalid token"),
            AuthError::ExpiredToken => write!(f, "Token expired"),
            AuthError::MissingToken => write!(f, "Missing authorization token"),
            AuthError::InvalidSignature => write!(f, "Invalid token signature"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Unauthorized(err.to_string())
    }
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_seconds: i64,
}

impl JwtService {
    pub fn new(secret: &str, ttl_seconds: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_seconds,
        }
    }

    pub fn issue(&self, user_id: &ObjectId, role: UserRole) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        self.generate_token(JwtClaims {
            sub: user_id.to_hex(),
            role: role.as_str().to_string(),
            exp: (now + self.ttl_seconds) as usize,
            iat: now as usize,
        })
    }

    pub fn generate_token(&self, claims: JwtClaims) -> Result<String, AuthError> {
        encode(&Header::default(), &claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        let validation = Validation::default();

        decode::<JwtClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken,
            })
    }
}

/// Authenticated caller, inserted into request extensions by [`auth_middleware`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: ObjectId,
    pub role: UserRole,
}

impl AuthUser {
    pub fn from_claims(claims: &JwtClaims) -> Result<Self, AuthError> {
        let id = ObjectId::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        let role = UserRole::parse(&claims.role).ok_or(AuthError::InvalidToken)?;
        Ok(AuthUser { id, role })
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_teacher(&self) -> bool {
        self.role == UserRole::Teacher
    }

    pub fn is_student(&self) -> bool {
        self.role == UserRole::Student
    }

    pub fn require_role(&self, allowed: &[UserRole]) -> Result<(), AppError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            tracing::warn!(user_id = %self.id, role = self.role.as_str(), "Access denied");
            Err(AppError::forbidden(format!(
                "Role '{}' is not allowed to perform this action",
                self.role.as_str()
            )))
        }
    }

    /// Teachers and admins
    pub fn require_staff(&self) -> Result<(), AppError> {
        self.require_role(&[UserRole::Teacher, UserRole::Admin])
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        self.require_role(&[UserRole::Admin])
    }
}

/// Current role and status of the account a token was issued for
#[derive(Debug, Clone, Deserialize)]
pub struct AccountState {
    pub role: UserRole,
    #[serde(default = "account_active_default")]
    pub active: bool,
}

fn account_active_default() -> bool {
    true
}

/// The stored account wins over the token: deleted accounts are rejected,
/// deactivated ones are forbidden and role changes apply immediately.
pub fn session_for_account(id: ObjectId, account: Option<AccountState>) -> Result<AuthUser, AppError> {
    match account {
        None => Err(AppError::unauthorized("Account no longer exists")),
        Some(account) if !account.active => Err(AppError::forbidden("Account is deactivated")),
        Some(account) => Ok(AuthUser {
            id,
            role: account.role,
        }),
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Validates the bearer JWT and stores the caller as [`AuthUser`]
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&headers)?;

    let claims = state.jwt.validate_token(token).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        e
    })?;
    let claimed = AuthUser::from_claims(&claims)?;

    let account = track_db_operation(
        "find_one",
        collections::USERS,
        async {
            state
                .mongo
                .collection::<AccountState>(collections::USERS)
                .find_one(doc! { "_id": claimed.id })
                .projection(doc! { "role": 1, "active": 1 })
                .await
        },
    )
    .await?;
    let user = session_for_account(claimed.id, account)?;
    if user.role != claimed.role {
        tracing::debug!(user_id = %user.id, token_role = %claims.role, "Token role is stale");
    }

    tracing::debug!("Authenticated user: {} (role: {})", user.id, user.role.as_str());

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

pub async fn admin_guard_middleware(request: Request, next: Next) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .copied()
        .ok_or(AuthError::MissingToken)?;
    user.require_admin()?;
    Ok(next.run(request).await)
}
