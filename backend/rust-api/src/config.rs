use serde::Deserialize;
use std::env;

/// Where uploaded files (attachments, submissions, learning modules) end up.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadSettings {
    /// Local directory used by the disk-backed store and served at `/uploads`
    pub dir: String,
    /// Public base URL the local store prefixes to object keys
    pub public_base_url: String,
    pub max_bytes: usize,
}

/// S3-compatible bucket used instead of the local directory when configured.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStorageSettings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub prefix: String,
    pub url_ttl_seconds: u64,
}

/// External endpoint that turns a topic into quiz questions.
#[derive(Debug, Clone, Deserialize)]
pub struct QuizGeneratorSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub jwt_ttl_seconds: i64,
    pub bcrypt_cost: u32,
    pub uploads: UploadSettings,
    pub object_storage: Option<ObjectStorageSettings>,
    pub quiz_generator: Option<QuizGeneratorSettings>,
    /// `username:password` pair guarding `/metrics`
    pub metrics_auth: String,
    pub superuser_seed_file: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml, then APP__SECTION__KEY overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let string = |key: &str, env_key: &str| -> Option<String> {
            settings
                .get_string(key)
                .ok()
                .or_else(|| env::var(env_key).ok())
                .filter(|value| !value.trim().is_empty())
        };
        let int = |key: &str, env_key: &str| -> Option<i64> {
            settings
                .get_int(key)
                .ok()
                .or_else(|| env::var(env_key).ok().and_then(|v| v.parse().ok()))
        };

        let bind_addr = string("server.bind_addr", "BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8081".to_string());

        let mongo_uri = string("database.mongo_uri", "MONGO_URI")
            .unwrap_or_else(|| "mongodb://localhost:27017".to_string());

        let mongo_database = string("database.mongo_database", "MONGO_DATABASE")
            .unwrap_or_else(|| "schooldesk".to_string());

        let jwt_secret = match string("auth.jwt_secret", "JWT_SECRET") {
            Some(secret) => secret,
            None if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            None => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let jwt_ttl_seconds = int("auth.jwt_ttl_seconds", "JWT_TTL_SECONDS").unwrap_or(86400);

        let bcrypt_cost = int("auth.bcrypt_cost", "BCRYPT_COST")
            .map(|cost| cost.clamp(4, 31) as u32)
            .unwrap_or(bcrypt::DEFAULT_COST);

        let uploads = UploadSettings {
            dir: string("uploads.dir", "UPLOAD_DIR").unwrap_or_else(|| "./uploads".to_string()),
            public_base_url: string("uploads.public_base_url", "UPLOAD_PUBLIC_BASE_URL")
                .unwrap_or_else(|| "/uploads".to_string()),
            max_bytes: int("uploads.max_bytes", "UPLOAD_MAX_BYTES")
                .filter(|v| *v > 0)
                .unwrap_or(20 * 1024 * 1024) as usize,
        };

        let object_storage = match (
            string("object_storage.bucket", "OBJECT_STORAGE_BUCKET"),
            string("object_storage.access_key", "OBJECT_STORAGE_ACCESS_KEY"),
            string("object_storage.secret_key", "OBJECT_STORAGE_SECRET_KEY"),
        ) {
            (Some(bucket), Some(access_key), Some(secret_key)) => Some(ObjectStorageSettings {
                bucket,
                region: string("object_storage.region", "OBJECT_STORAGE_REGION")
                    .unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: string("object_storage.endpoint", "OBJECT_STORAGE_ENDPOINT"),
                access_key,
                secret_key,
                prefix: string("object_storage.prefix", "OBJECT_STORAGE_PREFIX")
                    .unwrap_or_else(|| "uploads".to_string()),
                url_ttl_seconds: int("object_storage.url_ttl_seconds", "OBJECT_STORAGE_URL_TTL")
                    .filter(|v| *v > 0)
                    .unwrap_or(604800) as u64,
            }),
            _ => None,
        };

        let quiz_generator =
            string("quiz_generator.url", "QUIZ_GENERATOR_URL").map(|url| QuizGeneratorSettings {
                url,
                api_key: string("quiz_generator.api_key", "QUIZ_GENERATOR_API_KEY"),
                timeout_seconds: int("quiz_generator.timeout_seconds", "QUIZ_GENERATOR_TIMEOUT")
                    .filter(|v| *v > 0)
                    .unwrap_or(30) as u64,
            });

        let metrics_auth = string("metrics.auth", "METRICS_AUTH").unwrap_or_else(|| {
            eprintln!("WARNING: Using default METRICS_AUTH credentials");
            "admin:changeme".to_string()
        });

        let superuser_seed_file = string("bootstrap.superuser_seed_file", "SUPERUSER_SEED_FILE");

        Ok(Config {
            bind_addr,
            mongo_uri,
            mongo_database,
            jwt_secret,
            jwt_ttl_seconds,
            bcrypt_cost,
            uploads,
            object_storage,
            quiz_generator,
            metrics_auth,
            superuser_seed_file,
        })
    }
}
