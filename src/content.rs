//! Content submissions: the upload path from a draft to a pending item
//! awaiting moderation. Publishing is gated on profile completion, and the
//! share slug is resolved before anything is written.

use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::handles::HandleAllocator;
use crate::model::{image_doc, to_fields, user_doc, ImageDoc, ImageId, ModerationStatus, UserId};
use crate::profile::{self, CreatorProfile};
use crate::store::{apply, run_transaction, Patch, SharedStore, Write};

const MAX_SEARCH_KEYWORDS: usize = 40;
const MAX_KEYWORD_LENGTH: usize = 40;

/// A draft submission, as collected from the upload form.
#[derive(Debug, Clone, Default)]
pub struct ImageSubmission {
    pub prompt: String,
    pub tags: Vec<String>,
    pub category: String,
    pub image_url: String,
    pub storage_path: String,
    /// Requested share slug; empty means derive one from the prompt.
    pub share_slug: String,
}

pub struct ContentService {
    store: SharedStore,
    allocator: Arc<HandleAllocator>,
}

impl ContentService {
    pub fn new(store: SharedStore, allocator: Arc<HandleAllocator>) -> Self {
        Self { store, allocator }
    }

    /// Persist a draft as a pending item. Fails with `ProfileIncomplete`
    /// when the creator's profile does not pass the completion gate.
    pub async fn submit(
        &self,
        creator: &UserId,
        creator_profile: &CreatorProfile,
        draft: ImageSubmission,
    ) -> CoreResult<ImageId> {
        let missing = profile::missing_fields(creator_profile);
        if !missing.is_empty() {
            return Err(CoreError::ProfileIncomplete(missing));
        }

        let share_slug = self
            .allocator
            .resolve_share_slug(&draft.share_slug, &draft.prompt)
            .await?;

        let image_id = ImageId::generate();
        let search_keywords = build_search_keywords(&draft.prompt, &draft.tags);
        let doc = ImageDoc {
            prompt: draft.prompt,
            tags: draft.tags,
            category: if draft.category.is_empty() {
                "Explore".to_string()
            } else {
                draft.category
            },
            image_url: draft.image_url,
            storage_path: draft.storage_path,
            creator_id: creator.as_str().to_string(),
            creator_name: creator_profile.display_name.clone(),
            creator_username: creator_profile.username.clone(),
            status: ModerationStatus::Pending,
            share_slug: Some(share_slug),
            search_keywords,
            ..ImageDoc::default()
        };

        let patch = Patch::from_fields(to_fields(&doc))
            .server_time("createdAt")
            .server_time("updatedAt");
        apply(self.store.as_ref(), Write::Merge {
            path: image_doc(&image_id),
            patch,
        })
        .await?;

        apply(self.store.as_ref(), Write::Merge {
            path: user_doc(creator),
            patch: Patch::new()
                .increment("totalUploads", 1.0)
                .server_time("lastUploadAt"),
        })
        .await?;

        tracing::info!(image = %image_id, creator = %creator, "submission stored for review");
        Ok(image_id)
    }

    /// Moderation collaborator contract: write the item's status. Raises
    /// `NotFound` for unknown items, moderators never create content.
    pub async fn set_status(&self, image: &ImageId, status: ModerationStatus) -> CoreResult<()> {
        let image_path = image_doc(image);
        run_transaction(self.store.as_ref(), |txn| {
            let image_path = image_path.clone();
            Box::pin(async move {
                txn.get(&image_path)
                    .await?
                    .ok_or_else(|| CoreError::NotFound(image_path.to_string()))?;
                let mut patch = Patch::new()
                    .set("status", status.as_str())
                    .server_time("updatedAt");
                if status == ModerationStatus::Approved {
                    patch = patch.server_time("approvedAt");
                }
                txn.merge(image_path, patch);
                Ok(())
            })
        })
        .await
    }
}

/// Lowercased alphanumeric tokens from the prompt plus the tags, deduplicated
/// and capped, for the gallery's keyword search.
pub fn build_search_keywords(prompt: &str, tags: &[String]) -> Vec<String> {
    let composed = format!("{} {}", prompt, tags.join(" "));
    let cleaned: String = composed
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut keywords: Vec<String> = Vec::new();
    for token in cleaned.split_whitespace() {
        let token: String = token.chars().take(MAX_KEYWORD_LENGTH).collect();
        if !keywords.contains(&token) {
            keywords.push(token);
        }
    }
    for tag in tags {
        let tag = tag.to_lowercase();
        if !tag.is_empty() && !keywords.contains(&tag) {
            keywords.push(tag);
        }
    }
    keywords.truncate(MAX_SEARCH_KEYWORDS);
    keywords
}
