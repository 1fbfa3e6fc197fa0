use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::Database;

use crate::error::{AppError, AppResult};
use crate::middlewares::auth::AuthUser;
use crate::models::module::{LearningModule, ListModulesQuery, ModuleResponse};
use crate::models::{collections, parse_object_id};
use crate::services::class_service::{ensure_can_manage, ensure_can_view, find_class, visible_class_ids};
use crate::services::file_storage::{
    commit_or_discard, discard, store_upload, FileStore, UploadedFile,
};

/// Text fields of the module upload form
#[derive(Debug, Default)]
pub struct ModuleUpload {
    pub title: String,
    pub description: String,
    pub class_id: String,
}

impl ModuleUpload {
    fn validate(&self) -> AppResult<()> {
        let title = self.title.trim();
        if title.is_empty() || title.chars().count() > 200 {
            return Err(AppError::bad_request("Title must be between 1 and 200 characters"));
        }
        if self.description.chars().count() > 5000 {
            return Err(AppError::bad_request("Description must be at most 5000 characters"));
        }
        if self.class_id.trim().is_empty() {
            return Err(AppError::bad_request("classId is required"));
        }
        Ok(())
    }
}

pub struct ModuleService {
    mongo: Database,
}

impl ModuleService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    async fn find_module(&self, id: &ObjectId) -> AppResult<LearningModule> {
        self.mongo
            .collection::<LearningModule>(collections::MODULES)
            .find_one(doc! { "_id": *id })
            .await?
            .ok_or_else(|| AppError::not_found("Module not found"))
    }

    pub async fn upload_module(
        &self,
        session: &AuthUser,
        form: ModuleUpload,
        upload: UploadedFile,
        files: &dyn FileStore,
    ) -> AppResult<ModuleResponse> {
        session.require_staff()?;
        form.validate()?;

        let class_id = parse_object_id(form.class_id.trim(), "class id")?;
        let class = find_class(&self.mongo, &class_id).await?;
        ensure_can_manage(session, &class)?;

        let stored = store_upload(files, &format!("modules/{}", class_id.to_hex()), upload).await?;
        let mut module = LearningModule {
            id: None,
            title: form.title.trim().to_string(),
            description: form.description,
            class_id,
            uploaded_by: session.id,
            file: stored,
            created_at: Utc::now(),
        };

        let modules = self.mongo.collection::<LearningModule>(collections::MODULES);
        let inserted = commit_or_discard(
            files,
            Some(&module.file),
            async { modules.insert_one(&module).await.map_err(AppError::from) },
        )
        .await?;
        module.id = inserted.inserted_id.as_object_id();

        tracing::info!(module_id = ?module.id, class_id = %class_id, "Module uploaded");
        Ok(ModuleResponse::from(module))
    }

    pub async fn list_modules(
        &self,
        session: &AuthUser,
        query: ListModulesQuery,
    ) -> AppResult<Vec<ModuleResponse>> {
        let mut filter = Document::new();
        if let Some(raw) = query.class_id.as_deref().filter(|s| !s.is_empty()) {
            let class_id = parse_object_id(raw, "class id")?;
            let class = find_class(&self.mongo, &class_id).await?;
            ensure_can_view(session, &class)?;
            filter.insert("classId", class_id);
        } else if let Some(class_ids) = visible_class_ids(&self.mongo, session).await? {
            filter.insert("classId", doc! { "$in": class_ids });
        }

        let modules: Vec<LearningModule> = self
            .mongo
            .collection::<LearningModule>(collections::MODULES)
            .find(filter)
            .sort(doc! { "createdAt": -1 })
            .await?
            .try_collect()
            .await?;

        Ok(modules.into_iter().map(ModuleResponse::from).collect())
    }

    pub async fn get_module(&self, session: &AuthUser, module_id: &str) -> AppResult<ModuleResponse> {
        let id = parse_object_id(module_id, "module id")?;
        let module = self.find_module(&id).await?;
        let class = find_class(&self.mongo, &module.class_id).await?;
        ensure_can_view(session, &class)?;
        Ok(ModuleResponse::from(module))
    }

    /// Deletes the record and then the stored file
    pub async fn delete_module(
        &self,
        session: &AuthUser,
        module_id: &str,
        files: &dyn FileStore,
    ) -> AppResult<()> {
        let id = parse_object_id(module_id, "module id")?;
        let module = self.find_module(&id).await?;
        let class = find_class(&self.mongo, &module.class_id).await?;
        ensure_can_manage(session, &class)?;

        self.mongo
            .collection::<LearningModule>(collections::MODULES)
            .delete_one(doc! { "_id": id })
            .await?;
        discard(files, &module.file.key).await;

        tracing::info!(module_id = %id, "Module deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_form_requires_title_and_class() {
        let form = ModuleUpload {
            title: "  ".to_string(),
            class_id: "65f0c0ffee0000000000cafe".to_string(),
            ..Default::default()
        };
        assert!(form.validate().is_err());

        let form = ModuleUpload {
            title: "Week 1 slides".to_string(),
            ..Default::default()
        };
        assert!(form.validate().is_err());

        let form = ModuleUpload {
            title: "Week 1 slides".to_string(),
            description: String::new(),
            class_id: "65f0c0ffee0000000000cafe".to_string(),
        };
        assert!(form.validate().is_ok());
    }
}
