use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{hex_or_default, StoredFile};
use crate::utils::time::bson_datetime_as_chrono;

/// Announcement stored in "announcements". `class_id == None` means school-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    pub content: String,
    pub posted_by: ObjectId,
    #[serde(default)]
    pub posted_by_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<ObjectId>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub viewed_by: Vec<ObjectId>,
    #[serde(default)]
    pub attachments: Vec<StoredFile>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    #[serde(default)]
    pub user_name: String,
    pub text: String,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Love,
    Haha,
    Wow,
    Sad,
    Angry,
}

impl ReactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Love => "love",
            ReactionKind::Haha => "haha",
            ReactionKind::Wow => "wow",
            ReactionKind::Sad => "sad",
            ReactionKind::Angry => "angry",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: ObjectId,
    pub kind: ReactionKind,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentResponse {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<Comment> for CommentResponse {
    fn from(comment: Comment) -> Self {
        CommentResponse {
            id: comment.id.to_hex(),
            user_id: comment.user_id.to_hex(),
            user_name: comment.user_name,
            text: comment.text,
            created_at: comment.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementResponse {
    pub id: String,
    pub title: String,
    pub content: String,
    pub posted_by: String,
    pub posted_by_name: String,
    pub class_id: Option<String>,
    pub comments: Vec<CommentResponse>,
    pub comment_count: usize,
    /// Reaction kind -> count
    pub reactions: BTreeMap<ReactionKind, usize>,
    /// Caller's own reaction, if any
    pub my_reaction: Option<ReactionKind>,
    pub view_count: usize,
    pub attachments: Vec<StoredFile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnnouncementResponse {
    pub fn for_viewer(announcement: Announcement, viewer: &ObjectId) -> Self {
        let mut reactions = BTreeMap::new();
        let mut my_reaction = None;
        for reaction in &announcement.reactions {
            *reactions.entry(reaction.kind).or_insert(0) += 1;
            if &reaction.user_id == viewer {
                my_reaction = Some(reaction.kind);
            }
        }

        AnnouncementResponse {
            id: hex_or_default(announcement.id),
            title: announcement.title,
            content: announcement.content,
            posted_by: announcement.posted_by.to_hex(),
            posted_by_name: announcement.posted_by_name,
            class_id: announcement.class_id.map(|id| id.to_hex()),
            comment_count: announcement.comments.len(),
            comments: announcement
                .comments
                .into_iter()
                .map(CommentResponse::from)
                .collect(),
            reactions,
            my_reaction,
            view_count: announcement.viewed_by.len(),
            attachments: announcement.attachments,
            created_at: announcement.created_at,
            updated_at: announcement.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnnouncementRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,

    #[validate(length(min = 1, max = 10000, message = "Content must be between 1 and 10000 characters"))]
    pub content: String,

    pub class_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAnnouncementRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: Option<String>,

    #[validate(length(min = 1, max = 10000, message = "Content must be between 1 and 10000 characters"))]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCommentRequest {
    #[validate(length(min = 1, max = 2000, message = "Comment must be between 1 and 2000 characters"))]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    pub kind: ReactionKind,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactResponse {
    pub my_reaction: Option<ReactionKind>,
    pub reactions: BTreeMap<ReactionKind, usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAnnouncementsQuery {
    pub class_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentPage {
    pub total: usize,
    pub comments: Vec<CommentResponse>,
}
