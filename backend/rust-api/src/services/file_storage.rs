use std::future::Future;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics::FILES_STORED_TOTAL;
use crate::models::activity::{ActivityResponse, SubmissionResponse};
use crate::models::announcement::AnnouncementResponse;
use crate::models::module::ModuleResponse;
use crate::models::StoredFile;

/// A file received in a multipart request
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Where uploaded files live. Keys are relative, `/`-separated paths.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Short backend name used in logs and metrics
    fn backend(&self) -> &'static str;

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        file_name: &str,
    ) -> Result<StoredFile>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Link a client can download `key` from right now
    fn url_for(&self, key: &str) -> Result<String>;
}

/// Stores `upload` under `scope/<uuid>/<file name>` and records the outcome.
pub async fn store_upload(
    store: &dyn FileStore,
    scope: &str,
    upload: UploadedFile,
) -> Result<StoredFile, AppError> {
    if upload.bytes.is_empty() {
        return Err(AppError::bad_request("Uploaded file is empty"));
    }

    let key = build_key(scope, &upload.file_name);
    let result = store
        .put(&key, upload.bytes, &upload.content_type, &upload.file_name)
        .await;

    let status = if result.is_ok() { "success" } else { "error" };
    FILES_STORED_TOTAL
        .with_label_values(&[store.backend(), status])
        .inc();

    let stored = result.with_context(|| format!("Failed to store upload {}", key))?;
    tracing::info!(backend = store.backend(), key = %stored.key, size = stored.size, "File stored");
    Ok(stored)
}

/// Awaits the write that records `stored` and removes the file again when it fails.
pub async fn commit_or_discard<T>(
    store: &dyn FileStore,
    stored: Option<&StoredFile>,
    write: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    let result = write.await;
    if let (Err(e), Some(file)) = (&result, stored) {
        tracing::warn!(key = %file.key, "Discarding upload after failed write: {}", e);
        discard(store, &file.key).await;
    }
    result
}

/// Responses that carry stored files
pub trait ResolveFileUrls {
    fn stored_files(&mut self) -> Vec<&mut StoredFile>;
}

/// Fills in a fresh download URL for every stored file in `value`
pub fn resolve_urls<T: ResolveFileUrls>(store: &dyn FileStore, mut value: T) -> T {
    for file in value.stored_files() {
        match store.url_for(&file.key) {
            Ok(url) => file.url = url,
            Err(e) => tracing::warn!(key = %file.key, "Failed to resolve file URL: {:#}", e),
        }
    }
    value
}

impl<T: ResolveFileUrls> ResolveFileUrls for Vec<T> {
    fn stored_files(&mut self) -> Vec<&mut StoredFile> {
        self.iter_mut().flat_map(|item| item.stored_files()).collect()
    }
}

impl ResolveFileUrls for ActivityResponse {
    fn stored_files(&mut self) -> Vec<&mut StoredFile> {
        self.attached_file.iter_mut().collect()
    }
}

impl ResolveFileUrls for SubmissionResponse {
    fn stored_files(&mut self) -> Vec<&mut StoredFile> {
        self.file.iter_mut().collect()
    }
}

impl ResolveFileUrls for AnnouncementResponse {
    fn stored_files(&mut self) -> Vec<&mut StoredFile> {
        self.attachments.iter_mut().collect()
    }
}

impl ResolveFileUrls for ModuleResponse {
    fn stored_files(&mut self) -> Vec<&mut StoredFile> {
        vec![&mut self.file]
    }
}

/// Removes a stored file, logging instead of failing when the store refuses.
pub async fn discard(store: &dyn FileStore, key: &str) {
    if let Err(e) = store.delete(key).await {
        tracing::warn!(backend = store.backend(), key, "Failed to delete stored file: {:#}", e);
    }
}

pub fn build_key(scope: &str, file_name: &str) -> String {
    format!(
        "{}/{}/{}",
        scope.trim_matches('/'),
        Uuid::new_v4(),
        sanitize_file_name(file_name)
    )
}

/// Keeps ASCII letters, digits, `.`, `-` and `_`; everything else becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.chars().take(120).collect()
    }
}

/// Disk-backed store; files are served by `ServeDir` under `public_base_url`.
pub struct LocalFileStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid storage key: {}", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        file_name: &str,
    ) -> Result<StoredFile> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let size = bytes.len() as i64;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(StoredFile {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            size,
            key: key.to_string(),
            url: self.url_for(key)?,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    fn url_for(&self, key: &str) -> Result<String> {
        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("schooldesk-store-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Lab Report (final).pdf"), "Lab_Report__final_.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\kid\\hw.docx"), "hw.docx");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(sanitize_file_name(""), "file");
    }

    #[test]
    fn test_build_key_is_scoped_and_unique() {
        let a = build_key("/modules/", "notes.pdf");
        let b = build_key("modules", "notes.pdf");
        assert!(a.starts_with("modules/"));
        assert!(a.ends_with("/notes.pdf"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_local_store_put_and_delete() {
        let root = temp_root();
        let store = LocalFileStore::new(&root, "/uploads/");

        let stored = store
            .put("modules/abc/notes.txt", b"hello".to_vec(), "text/plain", "notes.txt")
            .await
            .unwrap();
        assert_eq!(stored.url, "/uploads/modules/abc/notes.txt");
        assert_eq!(stored.size, 5);
        assert_eq!(
            tokio::fs::read(root.join("modules/abc/notes.txt")).await.unwrap(),
            b"hello"
        );

        store.delete("modules/abc/notes.txt").await.unwrap();
        assert!(!root.join("modules/abc/notes.txt").exists());
        // Deleting twice is fine
        store.delete("modules/abc/notes.txt").await.unwrap();

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_local_store_rejects_traversal() {
        let store = LocalFileStore::new(temp_root(), "/uploads");
        assert!(store
            .put("../escape.txt", b"x".to_vec(), "text/plain", "escape.txt")
            .await
            .is_err());
    }

    fn upload(name: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.into(),
            content_type: "text/plain".into(),
            bytes: b"lab notes".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_failed_write_discards_upload() {
        let root = temp_root();
        let store = LocalFileStore::new(&root, "/uploads");
        let stored = store_upload(&store, "activities/a1", upload("notes.txt")).await.unwrap();
        assert!(root.join(&stored.key).exists());

        let result: Result<(), AppError> = commit_or_discard(&store, Some(&stored), async {
            Err(AppError::not_found("Activity not found"))
        })
        .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(!root.join(&stored.key).exists());
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_successful_write_keeps_upload() {
        let root = temp_root();
        let store = LocalFileStore::new(&root, "/uploads");
        let stored = store_upload(&store, "activities/a1", upload("notes.txt")).await.unwrap();

        let value = commit_or_discard(&store, Some(&stored), async { Ok::<_, AppError>(7) })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert!(root.join(&stored.key).exists());
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[test]
    fn test_resolve_urls_rewrites_stale_links() {
        let store = LocalFileStore::new(temp_root(), "https://files.school.test/");
        let module = ModuleResponse {
            id: "m1".into(),
            title: "Cells".into(),
            description: String::new(),
            class_id: "c1".into(),
            uploaded_by: "t1".into(),
            file: StoredFile {
                file_name: "cells.pdf".into(),
                content_type: "application/pdf".into(),
                size: 3,
                key: "modules/c1/x/cells.pdf".into(),
                url: "https://expired.example/cells.pdf".into(),
            },
            created_at: chrono::Utc::now(),
        };

        let resolved = resolve_urls(&store, vec![module]);
        assert_eq!(
            resolved[0].file.url,
            "https://files.school.test/modules/c1/x/cells.pdf"
        );
    }

    #[tokio::test]
    async fn test_store_upload_rejects_empty_file() {
        let store = LocalFileStore::new(temp_root(), "/uploads");
        let err = store_upload(
            &store,
            "activities",
            UploadedFile {
                file_name: "empty.txt".into(),
                content_type: "text/plain".into(),
                bytes: vec![],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
