#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use schooldesk_api::{
    config::{Config, UploadSettings},
    create_router,
    models::{
        collections,
        quiz::Question,
        user::{User, UserRole},
        StoredFile,
    },
    services::{
        file_storage::FileStore,
        quiz_generator::{GeneratorError, QuizGenerator},
        AppState,
    },
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

pub fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".to_string(),
        mongo_uri: std::env::var("MONGO_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
        // Fresh database per app so parallel tests do not see each other's rows
        mongo_database: format!("schooldesk_test_{}", uuid::Uuid::new_v4().simple()),
        jwt_secret: "integration-test-secret".to_string(),
        jwt_ttl_seconds: 3600,
        bcrypt_cost: 4,
        uploads: UploadSettings {
            dir: std::env::temp_dir()
                .join(format!("schooldesk-uploads-{}", uuid::Uuid::new_v4()))
                .to_string_lossy()
                .into_owned(),
            public_base_url: "/uploads".to_string(),
            max_bytes: 1024 * 1024,
        },
        object_storage: None,
        quiz_generator: None,
        metrics_auth: "metrics:secret".to_string(),
        superuser_seed_file: None,
    }
}

/// Router over a lazily connecting Mongo client. Requests that are rejected
/// before touching the database work without a running server.
pub async fn create_test_app() -> TestApp {
    create_test_app_with(|state| state).await
}

pub async fn create_test_app_with(configure: impl FnOnce(AppState) -> AppState) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let config = test_config();
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to parse test MongoDB URI");

    let state = AppState::new(config, mongo_client).expect("Failed to build test state");
    let state = Arc::new(configure(state));
    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

impl TestApp {
    pub fn token(&self, user_id: &ObjectId, role: UserRole) -> String {
        self.state.jwt.issue(user_id, role).expect("Failed to issue token")
    }

    /// Inserts a user straight into the database and returns its id and a token
    pub async fn seed_user(&self, name: &str, role: UserRole) -> (ObjectId, String) {
        let now = Utc::now();
        let user = User {
            id: None,
            name: name.to_string(),
            email: format!("{}@school.test", name.to_lowercase().replace(' ', ".")),
            password_hash: bcrypt::hash("password123", 4).unwrap(),
            role,
            active: true,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        let inserted = self
            .state
            .mongo
            .collection::<User>(collections::USERS)
            .insert_one(&user)
            .await
            .expect("Failed to seed user");
        let id = inserted.inserted_id.as_object_id().unwrap();
        (id, self.token(&id, role))
    }

    pub async fn drop_database(&self) {
        let _ = self.state.mongo.drop().await;
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&body).into_owned())
            })
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(authed("GET", uri, token).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(authed("DELETE", uri, token).body(Body::empty()).unwrap())
            .await
    }

    pub async fn json(&self, method: &str, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            authed(method, uri, token)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

pub fn authed(method: &str, uri: &str, token: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
}

/// File store that keeps objects in memory
#[derive(Default)]
pub struct MemoryFileStore {
    pub objects: Mutex<Vec<String>>,
}

impl MemoryFileStore {
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl FileStore for MemoryFileStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        file_name: &str,
    ) -> anyhow::Result<StoredFile> {
        self.objects.lock().unwrap().push(key.to_string());
        Ok(StoredFile {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len() as i64,
            key: key.to_string(),
            url: String::new(),
        })
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().retain(|k| k != key);
        Ok(())
    }

    fn url_for(&self, key: &str) -> anyhow::Result<String> {
        Ok(format!("memory://{}", key))
    }
}

/// Generator returning `count` numbered questions about the topic
pub struct FixedQuizGenerator;

#[async_trait::async_trait]
impl QuizGenerator for FixedQuizGenerator {
    async fn generate(&self, topic: &str, count: u32) -> Result<Vec<Question>, GeneratorError> {
        Ok((1..=count)
            .map(|n| Question {
                prompt: format!("{} question {}", topic, n),
                options: vec!["yes".to_string(), "no".to_string()],
                answer: "yes".to_string(),
                points: 1,
            })
            .collect())
    }
}

pub fn multipart_body(boundary: &str, fields: &[(&str, &str)], file: (&str, &str, &[u8])) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                boundary, name, value
            )
            .as_bytes(),
        );
    }
    let (field, file_name, bytes) = file;
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/pdf\r\n\r\n",
            boundary, field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
