//! Unique-handle allocation against the shared store.
//!
//! Usernames claim a global `usernames/{handle}` reservation inside one
//! optimistic transaction per candidate, so concurrent claimants race on the
//! reservation document instead of a lock manager. Share slugs are probed
//! leniently against approved items only.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;

use crate::config::AllocatorConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::{user_doc, username_doc, Account, Handle, UserId, IMAGES_COLLECTION};
use crate::store::{run_transaction, Patch, Query, SharedStore};

const MIN_HANDLE_LENGTH: usize = 3;
/// Deterministic base-36 suffixes tried before switching to random ones.
const DETERMINISTIC_SLUG_SUFFIXES: usize = 3;

pub struct HandleAllocator {
    store: SharedStore,
    config: AllocatorConfig,
}

impl HandleAllocator {
    pub fn new(store: SharedStore, config: AllocatorConfig) -> Self {
        Self { store, config }
    }

    /// Claim a username for `user`, disambiguating with `-2`, `-3`, …
    /// suffixes when the requested handle is owned by someone else.
    ///
    /// `record_change` marks a user-initiated rename: the lifetime change
    /// quota is enforced and the change counter advances. First assignment
    /// passes `false` and resets the counter instead.
    pub async fn claim_username(
        &self,
        user: &UserId,
        requested: &str,
        record_change: bool,
    ) -> CoreResult<Handle> {
        let base = super::normalize_handle(requested, self.config.username_max_length);

        for candidate in self.username_candidates(&base, user) {
            match self.apply_candidate(user, &candidate, record_change).await {
                Ok(handle) => return Ok(handle),
                Err(CoreError::HandleTaken(_)) => continue,
                Err(other) => return Err(other),
            }
        }

        Err(CoreError::AllocationExhausted)
    }

    /// Assign a username if the account does not have one yet, deriving it
    /// from the display name or the email local part. Returns the existing
    /// handle untouched otherwise.
    pub async fn ensure_username(
        &self,
        user: &UserId,
        display_name: &str,
        email: &str,
    ) -> CoreResult<Handle> {
        let account = self
            .store
            .get(&user_doc(user))
            .await
            .map(|doc| doc.map(|d| Account::from_fields(&d.fields)).unwrap_or_default())?;
        if let Some(existing) = account.username {
            return Ok(Handle::new(existing));
        }

        let source = if !display_name.trim().is_empty() {
            display_name.to_string()
        } else {
            email.split('@').next().unwrap_or_default().to_string()
        };
        let source = if source.trim().is_empty() {
            fallback_handle(user)
        } else {
            source
        };

        self.claim_username(user, &source, false).await
    }

    /// One transactional attempt at a single candidate.
    async fn apply_candidate(
        &self,
        user: &UserId,
        candidate: &str,
        record_change: bool,
    ) -> CoreResult<Handle> {
        let user_path = user_doc(user);
        let reservation_path = username_doc(candidate);
        let max_changes = self.config.username_max_changes;

        run_transaction(self.store.as_ref(), |txn| {
            let user = user.clone();
            let candidate = candidate.to_string();
            let user_path = user_path.clone();
            let reservation_path = reservation_path.clone();
            Box::pin(async move {
                let account = txn
                    .get(&user_path)
                    .await?
                    .map(|doc| Account::from_fields(&doc.fields))
                    .unwrap_or_default();
                let current = account.username.clone();
                let change_count = account.username_change_count;

                let is_change = current.as_deref().is_some_and(|c| c != candidate);
                if record_change && is_change && change_count >= max_changes {
                    return Err(CoreError::QuotaExceeded);
                }

                let reservation = txn.get(&reservation_path).await?;
                if let Some(doc) = reservation {
                    if doc.str_field("userId") != Some(user.as_str()) {
                        return Err(CoreError::HandleTaken(candidate));
                    }
                }

                if let Some(previous) = &current {
                    if previous != &candidate {
                        txn.delete(username_doc(previous));
                    }
                }

                let should_reset = current.is_none() && !record_change;
                let next_count = if record_change && is_change {
                    change_count + 1
                } else {
                    change_count
                };

                txn.merge(
                    reservation_path,
                    Patch::new()
                        .set("userId", user.as_str())
                        .server_time("claimedAt"),
                );
                txn.merge(
                    user_path,
                    Patch::new()
                        .set("username", candidate.as_str())
                        .set("usernameLower", candidate.as_str())
                        .set(
                            "usernameChangeCount",
                            if should_reset { 0 } else { next_count },
                        )
                        .server_time("updatedAt"),
                );

                Ok(Handle::new(candidate))
            })
        })
        .await
    }

    fn username_candidates(&self, base: &str, user: &UserId) -> Vec<String> {
        let max_length = self.config.username_max_length;

        let resolved = if base.len() >= MIN_HANDLE_LENGTH {
            truncated(base, max_length)
        } else {
            fallback_handle(user)
        };
        let sanitized = super::normalize_handle(&resolved, max_length);
        let fallback = if sanitized.len() >= MIN_HANDLE_LENGTH {
            sanitized
        } else {
            super::normalize_handle(&fallback_handle(user), max_length)
        };

        (0..self.config.username_max_attempts)
            .map(|attempt| {
                if attempt == 0 {
                    fallback.clone()
                } else {
                    let suffix = format!("-{}", attempt + 1);
                    let keep = max_length.saturating_sub(suffix.len()).max(MIN_HANDLE_LENGTH);
                    format!("{}{}", truncated(&fallback, keep), suffix)
                }
            })
            .collect()
    }

    /// Resolve the share slug for a new submission. An explicitly requested
    /// slug must be free; a derived one is disambiguated automatically.
    pub async fn resolve_share_slug(&self, desired: &str, prompt: &str) -> CoreResult<String> {
        let max_length = self.config.slug_max_length;

        let normalized = super::normalize_handle(desired, max_length);
        if !normalized.is_empty() {
            if self.share_slug_exists(&normalized).await? {
                return Err(CoreError::HandleTaken(normalized));
            }
            return Ok(normalized);
        }

        let base = super::derive_slug_from_title(prompt, max_length);
        match self.find_available_share_slug(&base).await? {
            Some(slug) => Ok(slug),
            None => Ok(base),
        }
    }

    /// Uniqueness is scoped to approved items only: drafts never block a
    /// slug, and two pending items may hold the same one until moderation.
    async fn share_slug_exists(&self, slug: &str) -> CoreResult<bool> {
        let matches = self
            .store
            .query(
                &Query::collection(IMAGES_COLLECTION)
                    .where_eq("shareSlug", slug)
                    .where_eq("status", "approved")
                    .limit(1),
            )
            .await?;
        Ok(!matches.is_empty())
    }

    async fn find_available_share_slug(&self, base: &str) -> CoreResult<Option<String>> {
        let max_length = self.config.slug_max_length;
        let base = super::normalize_handle(base, max_length);
        if base.is_empty() {
            return Ok(None);
        }

        let mut candidate = base.clone();
        for attempt in 0..self.config.slug_suffix_attempts {
            if !self.share_slug_exists(&candidate).await? {
                return Ok(Some(candidate));
            }
            let suffix = if attempt < DETERMINISTIC_SLUG_SUFFIXES {
                to_base36((attempt + 2) as u64)
            } else {
                random_suffix(3)
            };
            candidate = super::normalize_handle(&format!("{base}-{suffix}"), max_length);
        }

        // Timestamp-derived suffix, treated as collision-free by construction
        let stamp = to_base36(Utc::now().timestamp_millis() as u64);
        let tail = &stamp[stamp.len().saturating_sub(4)..];
        Ok(Some(super::normalize_handle(
            &format!("{base}-{tail}"),
            max_length,
        )))
    }
}

fn fallback_handle(user: &UserId) -> String {
    let prefix: String = user.as_str().chars().take(6).collect();
    format!("creator-{}", prefix.to_lowercase())
}

fn truncated(value: &str, max_length: usize) -> String {
    value.chars().take(max_length).collect()
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

fn random_suffix(length: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{image_doc, ImageId};
    use crate::store::{apply, DocPath, DocumentStore, MemoryStore, Write};

    fn allocator(store: &Arc<MemoryStore>) -> HandleAllocator {
        HandleAllocator::new(store.clone(), AllocatorConfig::default())
    }

    async fn seed_image(store: &MemoryStore, id: &str, slug: &str, status: &str) {
        apply(store, Write::Merge {
            path: image_doc(&ImageId::new(id)),
            patch: Patch::new().set("shareSlug", slug).set("status", status),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn claims_normalized_username() {
        let store = Arc::new(MemoryStore::new());
        let handle = allocator(&store)
            .claim_username(&UserId::new("u1"), "Jane Doe!!", false)
            .await
            .unwrap();
        assert_eq!(handle.as_str(), "jane-doe");

        let reservation = store.get(&DocPath::new("usernames/jane-doe")).await.unwrap();
        assert_eq!(reservation.unwrap().str_field("userId"), Some("u1"));

        let account = store.get(&user_doc(&UserId::new("u1"))).await.unwrap().unwrap();
        assert_eq!(account.str_field("username"), Some("jane-doe"));
        assert_eq!(account.i64_field("usernameChangeCount"), Some(0));
    }

    #[tokio::test]
    async fn second_claimant_gets_suffixed_handle() {
        let store = Arc::new(MemoryStore::new());
        let alloc = allocator(&store);
        alloc
            .claim_username(&UserId::new("u1"), "Jane Doe!!", false)
            .await
            .unwrap();
        let second = alloc
            .claim_username(&UserId::new("u2"), "Jane Doe!!", false)
            .await
            .unwrap();
        assert_eq!(second.as_str(), "jane-doe-2");
    }

    #[tokio::test]
    async fn reclaiming_own_username_is_not_taken() {
        let store = Arc::new(MemoryStore::new());
        let alloc = allocator(&store);
        let user = UserId::new("u1");
        alloc.claim_username(&user, "jane", false).await.unwrap();
        let again = alloc.claim_username(&user, "jane", true).await.unwrap();
        assert_eq!(again.as_str(), "jane");

        let account = store.get(&user_doc(&user)).await.unwrap().unwrap();
        // Re-claiming the same handle is not a change
        assert_eq!(account.i64_field("usernameChangeCount"), Some(0));
    }

    #[tokio::test]
    async fn rename_releases_previous_reservation_and_counts() {
        let store = Arc::new(MemoryStore::new());
        let alloc = allocator(&store);
        let user = UserId::new("u1");
        alloc.claim_username(&user, "jane", false).await.unwrap();
        alloc.claim_username(&user, "janet", true).await.unwrap();

        assert!(store.get(&DocPath::new("usernames/jane")).await.unwrap().is_none());
        let account = store.get(&user_doc(&user)).await.unwrap().unwrap();
        assert_eq!(account.str_field("username"), Some("janet"));
        assert_eq!(account.i64_field("usernameChangeCount"), Some(1));

        // The released handle is free for someone else
        let taken = alloc
            .claim_username(&UserId::new("u2"), "jane", false)
            .await
            .unwrap();
        assert_eq!(taken.as_str(), "jane");
    }

    #[tokio::test]
    async fn rename_quota_is_enforced() {
        let store = Arc::new(MemoryStore::new());
        let alloc = allocator(&store);
        let user = UserId::new("u1");
        alloc.claim_username(&user, "name-0", false).await.unwrap();
        for i in 1..=5 {
            alloc
                .claim_username(&user, &format!("name-{i}"), true)
                .await
                .unwrap();
        }

        let result = alloc.claim_username(&user, "one-more", true).await;
        assert!(matches!(result, Err(CoreError::QuotaExceeded)));
    }

    #[tokio::test]
    async fn short_or_empty_request_falls_back_to_creator_prefix() {
        let store = Arc::new(MemoryStore::new());
        let handle = allocator(&store)
            .claim_username(&UserId::new("AbC123xyz"), "!", false)
            .await
            .unwrap();
        assert_eq!(handle.as_str(), "creator-abc123");
    }

    #[tokio::test]
    async fn exhausted_candidates_fail_finitely() {
        let store = Arc::new(MemoryStore::new());
        let config = AllocatorConfig {
            username_max_attempts: 3,
            ..AllocatorConfig::default()
        };
        let alloc = HandleAllocator::new(store.clone(), config);

        for (uid, name) in [("u1", "jane"), ("u2", "jane"), ("u3", "jane")] {
            alloc
                .claim_username(&UserId::new(uid), name, false)
                .await
                .unwrap();
        }

        let result = alloc.claim_username(&UserId::new("u4"), "jane", false).await;
        assert!(matches!(result, Err(CoreError::AllocationExhausted)));
    }

    #[tokio::test]
    async fn concurrent_claimants_never_share_a_handle() {
        let store = Arc::new(MemoryStore::new());
        let alloc = Arc::new(allocator(&store));

        let mut tasks = Vec::new();
        for uid in ["u1", "u2", "u3", "u4"] {
            let alloc = alloc.clone();
            let user = UserId::new(uid);
            tasks.push(tokio::spawn(async move {
                alloc.claim_username(&user, "jane", false).await.unwrap()
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        handles.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        handles.dedup();
        assert_eq!(handles.len(), 4);
    }

    #[tokio::test]
    async fn ensure_username_prefers_display_name_then_email() {
        let store = Arc::new(MemoryStore::new());
        let alloc = allocator(&store);

        let from_name = alloc
            .ensure_username(&UserId::new("u1"), "Jane Doe", "jane@example.com")
            .await
            .unwrap();
        assert_eq!(from_name.as_str(), "jane-doe");

        let from_email = alloc
            .ensure_username(&UserId::new("u2"), "", "neon.artist@example.com")
            .await
            .unwrap();
        assert_eq!(from_email.as_str(), "neon-artist");

        // Second call returns the existing handle without a new claim
        let unchanged = alloc
            .ensure_username(&UserId::new("u1"), "Different Name", "")
            .await
            .unwrap();
        assert_eq!(unchanged.as_str(), "jane-doe");
    }

    #[tokio::test]
    async fn explicit_share_slug_must_be_free_among_approved() {
        let store = Arc::new(MemoryStore::new());
        seed_image(&store, "i1", "neon-city", "approved").await;
        let alloc = allocator(&store);

        let result = alloc.resolve_share_slug("Neon City", "whatever").await;
        assert!(matches!(result, Err(CoreError::HandleTaken(slug)) if slug == "neon-city"));

        let free = alloc.resolve_share_slug("other-slug", "whatever").await.unwrap();
        assert_eq!(free, "other-slug");
    }

    #[tokio::test]
    async fn derived_slug_disambiguates_against_approved_items() {
        let store = Arc::new(MemoryStore::new());
        seed_image(&store, "i1", "a-cat", "approved").await;
        seed_image(&store, "i2", "a-cat-2", "approved").await;
        let alloc = allocator(&store);

        let slug = alloc.resolve_share_slug("", "A cat").await.unwrap();
        assert_eq!(slug, "a-cat-3");
    }

    #[tokio::test]
    async fn pending_items_may_share_a_slug() {
        // Uniqueness is deliberately scoped to approved items: a pending
        // item does not block the slug, so drafts can collide until
        // moderation approves one of them.
        let store = Arc::new(MemoryStore::new());
        seed_image(&store, "i1", "a-cat", "pending").await;
        let alloc = allocator(&store);

        let slug = alloc.resolve_share_slug("", "A cat").await.unwrap();
        assert_eq!(slug, "a-cat");

        let explicit = alloc.resolve_share_slug("a-cat", "").await.unwrap();
        assert_eq!(explicit, "a-cat");
    }

    #[tokio::test]
    async fn slug_probe_is_bounded_and_terminates() {
        let store = Arc::new(MemoryStore::new());
        // Saturate the deterministic candidates; random and timestamp
        // suffixes keep the probe finite regardless.
        seed_image(&store, "i1", "a-cat", "approved").await;
        for suffix in ["2", "3", "4"] {
            seed_image(&store, suffix, &format!("a-cat-{suffix}"), "approved").await;
        }
        let alloc = allocator(&store);

        let slug = alloc.resolve_share_slug("", "A cat").await.unwrap();
        assert!(slug.starts_with("a-cat-"));
        assert!(!["a-cat", "a-cat-2", "a-cat-3", "a-cat-4"].contains(&slug.as_str()));
    }
}
