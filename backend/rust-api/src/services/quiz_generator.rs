use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::QuizGeneratorSettings;
use crate::models::quiz::Question;
use crate::utils::retry::{retry_with_policy, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("quiz generator unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("quiz generator returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("quiz generator returned no usable questions")]
    Empty,
}

impl GeneratorError {
    /// Transport failures, 429 and 5xx are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            GeneratorError::Transport(_) => true,
            GeneratorError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            GeneratorError::Empty => false,
        }
    }
}

/// Turns a topic into quiz questions
#[async_trait]
pub trait QuizGenerator: Send + Sync {
    async fn generate(&self, topic: &str, count: u32) -> Result<Vec<Question>, GeneratorError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    topic: &'a str,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    questions: Vec<GeneratedQuestion>,
}

#[derive(Debug, Deserialize)]
struct GeneratedQuestion {
    #[serde(alias = "question", alias = "text")]
    prompt: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(alias = "correctAnswer", alias = "correct_answer")]
    answer: String,
    points: Option<i32>,
}

/// Posts `{topic, count}` as JSON to the configured URL
pub struct HttpQuizGenerator {
    client: Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpQuizGenerator {
    pub fn new(settings: &QuizGeneratorSettings) -> Self {
        Self {
            client: Client::new(),
            url: settings.url.clone(),
            api_key: settings.api_key.clone(),
            timeout: Duration::from_secs(settings.timeout_seconds),
            retry: RetryPolicy::default(),
        }
    }

    async fn request_once(&self, topic: &str, count: u32) -> Result<GenerateResponse, GeneratorError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&GenerateRequest { topic, count })
            .timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GeneratorError::Status { status, body });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl QuizGenerator for HttpQuizGenerator {
    async fn generate(&self, topic: &str, count: u32) -> Result<Vec<Question>, GeneratorError> {
        let response = retry_with_policy(&self.retry, GeneratorError::is_retryable, || {
            self.request_once(topic, count)
        })
        .await?;

        let questions = normalize_questions(response.questions, count);
        if questions.is_empty() {
            return Err(GeneratorError::Empty);
        }

        tracing::info!(topic, requested = count, received = questions.len(), "Quiz generated");
        Ok(questions)
    }
}

/// Drops blank entries and keeps at most `count` questions
fn normalize_questions(raw: Vec<GeneratedQuestion>, count: u32) -> Vec<Question> {
    raw.into_iter()
        .filter_map(|q| {
            let prompt = q.prompt.trim().to_string();
            let answer = q.answer.trim().to_string();
            if prompt.is_empty() || answer.is_empty() {
                return None;
            }
            Some(Question {
                prompt,
                options: q
                    .options
                    .into_iter()
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect(),
                answer,
                points: q.points.filter(|p| *p > 0).unwrap_or(1).min(100),
            })
        })
        // Same limits as hand-written questions
        .filter(|q| q.validate().is_ok())
        .take(count as usize)
        .collect()
}
