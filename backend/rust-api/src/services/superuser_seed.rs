use crate::config::Config;
use crate::models::collections;
use crate::services::auth_service::normalize_email;
use crate::utils::time::bson_now;
use anyhow::{Context, Result};
use mongodb::{
    bson::{doc, Document},
    Database,
};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

/// Admin account read from the JSON seed file
#[derive(Debug, Deserialize)]
pub struct SuperuserSeed {
    pub email: String,
    #[serde(default = "default_superuser_name")]
    pub name: String,
    /// Plain-text password from seed file (hashed before storage)
    pub password: String,
}

fn default_superuser_name() -> String {
    "School Admin".to_string()
}

impl SuperuserSeed {
    fn into_document(self, bcrypt_cost: u32) -> Result<Document> {
        if self.password.len() < 8 {
            anyhow::bail!("Superuser password must be at least 8 characters");
        }
        let hashed =
            bcrypt::hash(&self.password, bcrypt_cost).context("Failed to hash superuser password")?;

        Ok(doc! {
            "email": normalize_email(&self.email),
            "name": self.name.trim(),
            "passwordHash": hashed,
            "role": "admin",
            "active": true,
            "createdAt": bson_now(),
            "updatedAt": bson_now(),
        })
    }
}

pub async fn bootstrap(config: &Config, mongo: &Database) -> Result<()> {
    let path = match &config.superuser_seed_file {
        Some(path) if !path.is_empty() => Path::new(path),
        _ => {
            tracing::debug!("No superuser seed file configured, skipping bootstrap");
            return Ok(());
        }
    };

    if !path.exists() {
        tracing::warn!(
            "Superuser seed file {} not found, skipping bootstrap",
            path.display()
        );
        return Ok(());
    }

    let contents = fs::read_to_string(path)
        .await
        .context("Failed to read superuser seed file")?;

    let seed: SuperuserSeed =
        serde_json::from_str(&contents).context("Failed to deserialize superuser seed payload")?;

    let email = normalize_email(&seed.email);
    let doc = seed.into_document(config.bcrypt_cost)?;
    tracing::info!("Bootstrapping superuser with email {}", email);

    let update = mongo
        .collection::<Document>(collections::USERS)
        .update_one(doc! { "email": &email }, doc! { "$setOnInsert": doc })
        .upsert(true)
        .await
        .context("Failed to insert superuser")?;

    if update.upserted_id.is_some() {
        tracing::info!("Superuser inserted; remove seed file to prevent rerun");
    } else {
        tracing::info!("Superuser already exists, seed skipped");
    }

    Ok(())
}
