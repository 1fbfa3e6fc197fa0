use std::collections::BTreeMap;

use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Document};
use mongodb::Database;

use crate::error::{AppError, AppResult};
use crate::metrics::ANNOUNCEMENT_INTERACTIONS_TOTAL;
use crate::middlewares::auth::AuthUser;
use crate::models::announcement::{
    Announcement, AnnouncementResponse, Comment, CommentPage, CommentResponse,
    CreateAnnouncementRequest, CreateCommentRequest, ListAnnouncementsQuery, Reaction,
    ReactionKind, ReactResponse, UpdateAnnouncementRequest,
};
use crate::models::{collections, parse_object_id, Paging};
use crate::services::class_service::{ensure_can_manage, ensure_can_view, find_class, visible_class_ids};
use crate::services::file_storage::{
    commit_or_discard, discard, store_upload, FileStore, UploadedFile,
};
use crate::services::user_service::UserService;
use crate::utils::time::bson_now;

/// What a reaction request does to the caller's existing reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    Add(ReactionKind),
    Replace(ReactionKind),
    Remove,
}

/// Same kind twice removes it, a different kind replaces it
pub fn resolve_reaction(current: Option<ReactionKind>, requested: ReactionKind) -> ReactionChange {
    match current {
        None => ReactionChange::Add(requested),
        Some(kind) if kind == requested => ReactionChange::Remove,
        Some(_) => ReactionChange::Replace(requested),
    }
}

/// Filter and update applying `change`. The filter only matches while the
/// caller's reaction is still `current`, so a concurrent change makes it miss.
pub fn reaction_update(
    id: &ObjectId,
    user_id: &ObjectId,
    current: Option<ReactionKind>,
    change: ReactionChange,
) -> (Document, Document) {
    let filter = match current {
        None => doc! { "_id": *id, "reactions.userId": { "$ne": *user_id } },
        Some(kind) => doc! {
            "_id": *id,
            "reactions": { "$elemMatch": { "userId": *user_id, "kind": kind.as_str() } },
        },
    };
    let update = match change {
        ReactionChange::Add(kind) => {
            doc! { "$push": { "reactions": { "userId": *user_id, "kind": kind.as_str() } } }
        }
        ReactionChange::Replace(kind) => doc! { "$set": { "reactions.$.kind": kind.as_str() } },
        ReactionChange::Remove => doc! { "$pull": { "reactions": { "userId": *user_id } } },
    };
    (filter, update)
}

const REACTION_ATTEMPTS: usize = 3;

fn reaction_counts(reactions: &[Reaction]) -> BTreeMap<ReactionKind, usize> {
    let mut counts = BTreeMap::new();
    for reaction in reactions {
        *counts.entry(reaction.kind).or_insert(0) += 1;
    }
    counts
}

fn record_interaction(kind: &str) {
    ANNOUNCEMENT_INTERACTIONS_TOTAL
        .with_label_values(&[kind])
        .inc();
}

pub struct AnnouncementService {
    mongo: Database,
}

impl AnnouncementService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Loads the announcement and checks the caller may read it
    async fn load_visible(&self, session: &AuthUser, id: &ObjectId) -> AppResult<Announcement> {
        let announcement = self
            .mongo
            .collection::<Announcement>(collections::ANNOUNCEMENTS)
            .find_one(doc! { "_id": *id })
            .await?
            .ok_or_else(|| AppError::not_found("Announcement not found"))?;

        if let Some(class_id) = &announcement.class_id {
            let class = find_class(&self.mongo, class_id).await?;
            ensure_can_view(session, &class)?;
        }
        Ok(announcement)
    }

    fn ensure_author_or_admin(session: &AuthUser, announcement: &Announcement) -> AppResult<()> {
        if session.is_admin() || announcement.posted_by == session.id {
            Ok(())
        } else {
            Err(AppError::forbidden("Only the author or an admin can change this announcement"))
        }
    }

    pub async fn create(
        &self,
        session: &AuthUser,
        req: CreateAnnouncementRequest,
    ) -> AppResult<AnnouncementResponse> {
        session.require_staff()?;

        let class_id = match req.class_id.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => {
                let class_id = parse_object_id(raw, "class id")?;
                let class = find_class(&self.mongo, &class_id).await?;
                ensure_can_manage(session, &class)?;
                Some(class_id)
            }
            // School-wide posts are admin-only
            None if session.is_admin() => None,
            None => {
                return Err(AppError::bad_request(
                    "Teachers must post announcements to one of their classes",
                ))
            }
        };

        let author = UserService::new(self.mongo.clone()).find(&session.id).await?;
        let now = Utc::now();
        let mut announcement = Announcement {
            id: None,
            title: req.title.trim().to_string(),
            content: req.content,
            posted_by: session.id,
            posted_by_name: author.name,
            class_id,
            comments: vec![],
            reactions: vec![],
            viewed_by: vec![],
            attachments: vec![],
            created_at: now,
            updated_at: now,
        };

        let inserted = self
            .mongo
            .collection::<Announcement>(collections::ANNOUNCEMENTS)
            .insert_one(&announcement)
            .await?;
        announcement.id = inserted.inserted_id.as_object_id();

        tracing::info!(
            announcement_id = ?announcement.id,
            class_id = ?announcement.class_id,
            "Announcement posted"
        );
        Ok(AnnouncementResponse::for_viewer(announcement, &session.id))
    }

    /// Newest first. Non-admins see school-wide posts plus their own classes.
    pub async fn list(
        &self,
        session: &AuthUser,
        query: ListAnnouncementsQuery,
    ) -> AppResult<Vec<AnnouncementResponse>> {
        let mut filter = Document::new();

        if let Some(raw) = query.class_id.as_deref().filter(|s| !s.is_empty()) {
            let class_id = parse_object_id(raw, "class id")?;
            let class = find_class(&self.mongo, &class_id).await?;
            ensure_can_view(session, &class)?;
            filter.insert("classId", class_id);
        } else if let Some(class_ids) = visible_class_ids(&self.mongo, session).await? {
            filter.insert(
                "$or",
                vec![
                    doc! { "classId": { "$exists": false } },
                    doc! { "classId": bson::Bson::Null },
                    doc! { "classId": { "$in": class_ids } },
                ],
            );
        }

        let paging = Paging {
            limit: query.limit,
            offset: query.offset,
        };

        let announcements: Vec<Announcement> = self
            .mongo
            .collection::<Announcement>(collections::ANNOUNCEMENTS)
            .find(filter)
            .sort(doc! { "createdAt": -1 })
            .skip(paging.offset())
            .limit(paging.limit())
            .await?
            .try_collect()
            .await?;

        Ok(announcements
            .into_iter()
            .map(|a| AnnouncementResponse::for_viewer(a, &session.id))
            .collect())
    }

    /// Reads one announcement and records the caller as a viewer
    pub async fn get(&self, session: &AuthUser, announcement_id: &str) -> AppResult<AnnouncementResponse> {
        let id = parse_object_id(announcement_id, "announcement id")?;
        let mut announcement = self.load_visible(session, &id).await?;

        if !announcement.viewed_by.contains(&session.id) {
            self.mongo
                .collection::<Announcement>(collections::ANNOUNCEMENTS)
                .update_one(
                    doc! { "_id": id },
                    doc! { "$addToSet": { "viewedBy": session.id } },
                )
                .await?;
            announcement.viewed_by.push(session.id);
            record_interaction("view");
        }

        Ok(AnnouncementResponse::for_viewer(announcement, &session.id))
    }

    pub async fn update(
        &self,
        session: &AuthUser,
        announcement_id: &str,
        req: UpdateAnnouncementRequest,
    ) -> AppResult<AnnouncementResponse> {
        let id = parse_object_id(announcement_id, "announcement id")?;
        let announcement = self.load_visible(session, &id).await?;
        Self::ensure_author_or_admin(session, &announcement)?;

        let mut set = doc! { "updatedAt": bson_now() };
        if let Some(title) = &req.title {
            set.insert("title", title.trim());
        }
        if let Some(content) = req.content {
            set.insert("content", content);
        }

        self.mongo
            .collection::<Announcement>(collections::ANNOUNCEMENTS)
            .update_one(doc! { "_id": id }, doc! { "$set": set })
            .await?;

        let updated = self.load_visible(session, &id).await?;
        tracing::info!(announcement_id = %id, "Announcement updated");
        Ok(AnnouncementResponse::for_viewer(updated, &session.id))
    }

    pub async fn delete(
        &self,
        session: &AuthUser,
        announcement_id: &str,
        files: &dyn FileStore,
    ) -> AppResult<()> {
        let id = parse_object_id(announcement_id, "announcement id")?;
        let announcement = self.load_visible(session, &id).await?;
        Self::ensure_author_or_admin(session, &announcement)?;

        self.mongo
            .collection::<Announcement>(collections::ANNOUNCEMENTS)
            .delete_one(doc! { "_id": id })
            .await?;

        for attachment in &announcement.attachments {
            discard(files, &attachment.key).await;
        }

        tracing::info!(announcement_id = %id, "Announcement deleted");
        Ok(())
    }

    /// Appends exactly one comment with `$push`
    pub async fn add_comment(
        &self,
        session: &AuthUser,
        announcement_id: &str,
        req: CreateCommentRequest,
    ) -> AppResult<CommentResponse> {
        let id = parse_object_id(announcement_id, "announcement id")?;
        self.load_visible(session, &id).await?;

        let author = UserService::new(self.mongo.clone()).find(&session.id).await?;
        let comment = Comment {
            id: ObjectId::new(),
            user_id: session.id,
            user_name: author.name,
            text: req.text.trim().to_string(),
            created_at: Utc::now(),
        };
        let comment_doc = bson::to_document(&comment)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode comment: {}", e)))?;

        let result = self
            .mongo
            .collection::<Announcement>(collections::ANNOUNCEMENTS)
            .update_one(
                doc! { "_id": id },
                doc! { "$push": { "comments": comment_doc } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(AppError::not_found("Announcement not found"));
        }

        record_interaction("comment");
        tracing::info!(announcement_id = %id, comment_id = %comment.id, "Comment added");
        Ok(CommentResponse::from(comment))
    }

    /// Comment author, announcement author or admin
    pub async fn delete_comment(
        &self,
        session: &AuthUser,
        announcement_id: &str,
        comment_id: &str,
    ) -> AppResult<()> {
        let id = parse_object_id(announcement_id, "announcement id")?;
        let comment_id = parse_object_id(comment_id, "comment id")?;
        let announcement = self.load_visible(session, &id).await?;

        let comment = announcement
            .comments
            .iter()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| AppError::not_found("Comment not found"))?;

        if !session.is_admin()
            && comment.user_id != session.id
            && announcement.posted_by != session.id
        {
            return Err(AppError::forbidden("You cannot delete this comment"));
        }

        self.mongo
            .collection::<Announcement>(collections::ANNOUNCEMENTS)
            .update_one(
                doc! { "_id": id },
                doc! { "$pull": { "comments": { "_id": comment_id } } },
            )
            .await?;

        tracing::info!(announcement_id = %id, comment_id = %comment_id, "Comment deleted");
        Ok(())
    }

    /// Oldest first, paginated over the embedded array
    pub async fn list_comments(
        &self,
        session: &AuthUser,
        announcement_id: &str,
        paging: Paging,
    ) -> AppResult<CommentPage> {
        let id = parse_object_id(announcement_id, "announcement id")?;
        let announcement = self.load_visible(session, &id).await?;

        let total = announcement.comments.len();
        let comments = announcement
            .comments
            .into_iter()
            .skip(paging.offset() as usize)
            .take(paging.limit() as usize)
            .map(CommentResponse::from)
            .collect();

        Ok(CommentPage { total, comments })
    }

    pub async fn react(
        &self,
        session: &AuthUser,
        announcement_id: &str,
        kind: ReactionKind,
    ) -> AppResult<ReactResponse> {
        let id = parse_object_id(announcement_id, "announcement id")?;
        let announcement = self.load_visible(session, &id).await?;

        let collection = self.mongo.collection::<Announcement>(collections::ANNOUNCEMENTS);
        let mut reactions = announcement.reactions;
        let mut applied = None;
        for _ in 0..REACTION_ATTEMPTS {
            let current = reactions
                .iter()
                .find(|r| r.user_id == session.id)
                .map(|r| r.kind);
            let change = resolve_reaction(current, kind);
            let (filter, update) = reaction_update(&id, &session.id, current, change);

            if collection.update_one(filter, update).await?.matched_count == 1 {
                applied = Some(change);
                break;
            }
            // Lost a race with another request from the same user; re-read and retry
            reactions = collection
                .find_one(doc! { "_id": id })
                .await?
                .ok_or_else(|| AppError::not_found("Announcement not found"))?
                .reactions;
        }
        let change = applied
            .ok_or_else(|| AppError::conflict("Reaction changed concurrently, try again"))?;
        let my_reaction = match change {
            ReactionChange::Add(kind) | ReactionChange::Replace(kind) => Some(kind),
            ReactionChange::Remove => None,
        };
        record_interaction("reaction");

        let reactions = collection
            .find_one(doc! { "_id": id })
            .await?
            .map(|a| reaction_counts(&a.reactions))
            .unwrap_or_default();

        tracing::debug!(announcement_id = %id, ?change, "Reaction updated");
        Ok(ReactResponse {
            my_reaction,
            reactions,
        })
    }

    pub async fn add_attachment(
        &self,
        session: &AuthUser,
        announcement_id: &str,
        upload: UploadedFile,
        files: &dyn FileStore,
    ) -> AppResult<AnnouncementResponse> {
        let id = parse_object_id(announcement_id, "announcement id")?;
        let announcement = self.load_visible(session, &id).await?;
        Self::ensure_author_or_admin(session, &announcement)?;

        let stored = store_upload(files, &format!("announcements/{}", id.to_hex()), upload).await?;
        let announcements = self.mongo.collection::<Announcement>(collections::ANNOUNCEMENTS);
        commit_or_discard(files, Some(&stored), async {
            let stored_doc = bson::to_document(&stored).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to encode attachment: {}", e))
            })?;
            let result = announcements
                .update_one(
                    doc! { "_id": id },
                    doc! {
                        "$push": { "attachments": stored_doc },
                        "$set": { "updatedAt": bson_now() },
                    },
                )
                .await?;
            if result.matched_count == 0 {
                return Err(AppError::not_found("Announcement not found"));
            }
            Ok::<_, AppError>(())
        })
        .await?;

        let updated = self.load_visible(session, &id).await?;
        Ok(AnnouncementResponse::for_viewer(updated, &session.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reaction_is_added() {
        assert_eq!(
            resolve_reaction(None, ReactionKind::Like),
            ReactionChange::Add(ReactionKind::Like)
        );
    }

    #[test]
    fn test_same_reaction_toggles_off() {
        assert_eq!(
            resolve_reaction(Some(ReactionKind::Like), ReactionKind::Like),
            ReactionChange::Remove
        );
    }

    #[test]
    fn test_different_reaction_replaces() {
        assert_eq!(
            resolve_reaction(Some(ReactionKind::Like), ReactionKind::Sad),
            ReactionChange::Replace(ReactionKind::Sad)
        );
    }

    #[test]
    fn test_first_reaction_requires_no_existing_entry() {
        let id = ObjectId::new();
        let user = ObjectId::new();
        let (filter, update) =
            reaction_update(&id, &user, None, ReactionChange::Add(ReactionKind::Love));

        assert_eq!(filter, doc! { "_id": id, "reactions.userId": { "$ne": user } });
        assert_eq!(
            update,
            doc! { "$push": { "reactions": { "userId": user, "kind": "love" } } }
        );
    }

    #[test]
    fn test_replacing_reaction_matches_the_kind_that_was_read() {
        let id = ObjectId::new();
        let user = ObjectId::new();
        let (filter, update) = reaction_update(
            &id,
            &user,
            Some(ReactionKind::Like),
            ReactionChange::Replace(ReactionKind::Sad),
        );

        assert_eq!(
            filter,
            doc! { "_id": id, "reactions": { "$elemMatch": { "userId": user, "kind": "like" } } }
        );
        assert_eq!(update, doc! { "$set": { "reactions.$.kind": "sad" } });
    }

    #[test]
    fn test_removing_reaction_pulls_only_callers_entry() {
        let id = ObjectId::new();
        let user = ObjectId::new();
        let (_, update) =
            reaction_update(&id, &user, Some(ReactionKind::Like), ReactionChange::Remove);
        assert_eq!(update, doc! { "$pull": { "reactions": { "userId": user } } });
    }

    #[test]
    fn test_reaction_counts() {
        let reactions = vec![
            Reaction {
                user_id: ObjectId::new(),
                kind: ReactionKind::Haha,
            },
            Reaction {
                user_id: ObjectId::new(),
                kind: ReactionKind::Haha,
            },
        ];
        let counts = reaction_counts(&reactions);
        assert_eq!(counts.get(&ReactionKind::Haha), Some(&2));
        assert_eq!(counts.len(), 1);
    }
}
