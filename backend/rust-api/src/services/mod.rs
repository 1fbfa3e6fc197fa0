use std::sync::Arc;

use anyhow::Context;
use mongodb::{Client as MongoClient, Database};

use crate::config::Config;
use crate::middlewares::auth::JwtService;
use crate::services::file_storage::{FileStore, LocalFileStore};
use crate::services::object_storage::ObjectStorageClient;
use crate::services::quiz_generator::{HttpQuizGenerator, QuizGenerator};

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub jwt: JwtService,
    pub files: Arc<dyn FileStore>,
    pub quiz_generator: Option<Arc<dyn QuizGenerator>>,
}

impl AppState {
    /// Wires the shared services. Does not touch the network; the Mongo client connects lazily.
    pub fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);
        let jwt = JwtService::new(&config.jwt_secret, config.jwt_ttl_seconds);

        let files: Arc<dyn FileStore> = match &config.object_storage {
            Some(settings) => {
                let client = ObjectStorageClient::new(settings.clone())
                    .context("Failed to configure object storage")?;
                tracing::info!(bucket = %settings.bucket, "Uploads go to object storage");
                Arc::new(client)
            }
            None => {
                tracing::info!(dir = %config.uploads.dir, "Uploads go to local disk");
                Arc::new(LocalFileStore::new(
                    &config.uploads.dir,
                    &config.uploads.public_base_url,
                ))
            }
        };

        let quiz_generator = config.quiz_generator.as_ref().map(|settings| {
            tracing::info!(url = %settings.url, "Quiz generator enabled");
            Arc::new(HttpQuizGenerator::new(settings)) as Arc<dyn QuizGenerator>
        });

        Ok(Self {
            config,
            mongo,
            jwt,
            files,
            quiz_generator,
        })
    }

    pub fn with_file_store(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = files;
        self
    }

    pub fn with_quiz_generator(mut self, generator: Arc<dyn QuizGenerator>) -> Self {
        self.quiz_generator = Some(generator);
        self
    }
}

pub mod activity_service;
pub mod announcement_service;
pub mod attendance_service;
pub mod auth_service;
pub mod class_service;
pub mod export;
pub mod file_storage;
pub mod indexes;
pub mod module_service;
pub mod object_storage;
pub mod profile_service;
pub mod quiz_generator;
pub mod quiz_service;
pub mod stats_service;
pub mod superuser_seed;
pub mod task_service;
pub mod user_service;
