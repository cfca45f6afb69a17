//! Domain types: id newtypes, typed views over store documents, and the
//! path layout shared by every component.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{DocPath, Fields};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A claimed, normalized username or share slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(pub String);

impl Handle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Moderation state of a content item; written by the moderation
/// collaborator, read everywhere else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Creator account document (`users/{uid}`). Counters are aggregates over
/// the creator's whole catalog; `total_likes` is the only one that can move
/// back down (unlikes).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Account {
    pub display_name: String,
    pub email: String,
    pub username: Option<String>,
    pub username_change_count: u32,
    pub total_likes: i64,
    pub total_views: i64,
    pub total_copies: i64,
    pub total_shares: i64,
    pub total_uploads: i64,
    pub earning_points: f64,
}

impl Account {
    pub fn from_fields(fields: &Fields) -> Self {
        serde_json::from_value(Value::Object(fields.clone())).unwrap_or_default()
    }
}

/// Content item document (`images/{id}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageDoc {
    pub prompt: String,
    pub tags: Vec<String>,
    pub category: String,
    pub image_url: String,
    pub storage_path: String,
    pub creator_id: String,
    pub creator_name: String,
    pub creator_username: Option<String>,
    pub likes: i64,
    pub views: i64,
    pub copies: i64,
    pub shares: i64,
    pub status: ModerationStatus,
    pub share_slug: Option<String>,
    pub search_keywords: Vec<String>,
}

impl ImageDoc {
    pub fn from_fields(fields: &Fields) -> Self {
        serde_json::from_value(Value::Object(fields.clone())).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Welcome,
    Like,
    Copy,
    Follow,
    Boost,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Like => "like",
            Self::Copy => "copy",
            Self::Follow => "follow",
            Self::Boost => "boost",
        }
    }
}

/// Per-account notification (`users/{uid}/notifications/{id}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub image_id: Option<String>,
    pub read: bool,
    pub created_at: String,
}

/// Audit record of one completed sponsor redirect
/// (`users/{creator}/redirects/{id}`). `processed` flips when a later
/// settlement batch folds the credit in; settlement itself lives elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectCredit {
    pub image_id: String,
    pub viewer_id: Option<String>,
    pub amount: f64,
    pub processed: bool,
    pub created_at: String,
}

pub fn user_doc(user: &UserId) -> DocPath {
    DocPath::new(format!("users/{user}"))
}

pub fn image_doc(image: &ImageId) -> DocPath {
    DocPath::new(format!("images/{image}"))
}

pub fn like_record(image: &ImageId, user: &UserId) -> DocPath {
    DocPath::new(format!("images/{image}/likes/{user}"))
}

pub fn follower_record(target: &UserId, follower: &UserId) -> DocPath {
    DocPath::new(format!("users/{target}/followers/{follower}"))
}

pub fn username_doc(handle: &str) -> DocPath {
    DocPath::new(format!("usernames/{handle}"))
}

pub fn notifications_collection(user: &UserId) -> String {
    format!("users/{user}/notifications")
}

pub fn redirects_collection(user: &UserId) -> String {
    format!("users/{user}/redirects")
}

pub const IMAGES_COLLECTION: &str = "images";

/// Serialize a typed view into store fields.
pub fn to_fields<T: Serialize>(value: &T) -> Fields {
    match serde_json::to_value(value) {
        Ok(Value::Object(fields)) => fields,
        _ => Fields::new(),
    }
}
