//! Per-account notifications: fire-and-forget creation off ledger
//! mutations, cursor-paginated reads, and a bounded retention purge.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::config::NotificationConfig;
use crate::error::CoreResult;
use crate::model::{notifications_collection, ImageId, NotificationKind, NotificationRecord, UserId};
use crate::store::{apply, Direction, DocPath, Patch, Query, SharedStore, Write};

pub struct NotificationPage {
    pub items: Vec<(DocPath, NotificationRecord)>,
    pub cursor: Option<DocPath>,
    pub has_more: bool,
}

pub struct NotificationScheduler {
    store: SharedStore,
    config: NotificationConfig,
}

impl NotificationScheduler {
    pub fn new(store: SharedStore, config: NotificationConfig) -> Self {
        Self { store, config }
    }

    /// Create one unread notification.
    pub async fn schedule(
        &self,
        user: &UserId,
        kind: NotificationKind,
        message: &str,
        image: Option<&ImageId>,
    ) -> CoreResult<NotificationRecord> {
        let path = DocPath::new(format!(
            "{}/{}",
            notifications_collection(user),
            Uuid::now_v7()
        ));
        let mut patch = Patch::new()
            .set("type", kind.as_str())
            .set("message", message)
            .set("read", false)
            .server_time("createdAt");
        if let Some(image) = image {
            patch = patch.set("imageId", image.as_str());
        }
        apply(self.store.as_ref(), Write::Merge { path: path.clone(), patch }).await?;

        let created_at = self
            .store
            .get(&path)
            .await?
            .and_then(|doc| doc.str_field("createdAt").map(str::to_string))
            .unwrap_or_default();

        Ok(NotificationRecord {
            kind,
            message: message.to_string(),
            image_id: image.map(|i| i.as_str().to_string()),
            read: false,
            created_at,
        })
    }

    /// Fire-and-forget variant for use downstream of a primary mutation:
    /// a scheduling failure is logged and swallowed, never propagated into
    /// the engagement result.
    pub async fn schedule_best_effort(
        &self,
        user: &UserId,
        kind: NotificationKind,
        message: &str,
        image: Option<&ImageId>,
    ) {
        if let Err(err) = self.schedule(user, kind, message, image).await {
            tracing::warn!(user = %user, kind = kind.as_str(), "notification not scheduled: {err}");
        }
    }

    /// Newest-first page. Fetches one past the requested size to learn
    /// whether another page exists without a count query.
    pub async fn fetch_page(
        &self,
        user: &UserId,
        limit: Option<usize>,
        cursor: Option<DocPath>,
    ) -> CoreResult<NotificationPage> {
        let limit = limit.unwrap_or(self.config.page_size);
        let mut query = Query::collection(notifications_collection(user))
            .order_by("createdAt", Direction::Desc)
            .limit(limit + 1);
        if let Some(cursor) = cursor {
            query = query.start_after(cursor);
        }

        let docs = self.store.query(&query).await?;
        let has_more = docs.len() > limit;

        let items: Vec<(DocPath, NotificationRecord)> = docs
            .into_iter()
            .take(limit)
            .filter_map(|doc| {
                let record =
                    serde_json::from_value(serde_json::Value::Object(doc.fields.clone())).ok()?;
                Some((doc.path, record))
            })
            .collect();
        let cursor = items.last().map(|(path, _)| path.clone());

        Ok(NotificationPage {
            items,
            cursor,
            has_more,
        })
    }

    /// Mark up to one batch of unread notifications read. Best-effort:
    /// returns the number updated, zero on failure.
    pub async fn mark_all_read(&self, user: &UserId) -> u64 {
        let query = Query::collection(notifications_collection(user))
            .where_eq("read", false)
            .limit(self.config.mark_read_batch_size);

        let docs = match self.store.query(&query).await {
            Ok(docs) => docs,
            Err(err) => {
                tracing::warn!(user = %user, "mark-read query failed: {err}");
                return 0;
            }
        };

        let mut updated = 0;
        for doc in docs {
            let write = Write::Merge {
                path: doc.path.clone(),
                patch: Patch::new().set("read", true),
            };
            match apply(self.store.as_ref(), write).await {
                Ok(()) => updated += 1,
                Err(err) => {
                    tracing::warn!(path = %doc.path, "mark-read update failed: {err}")
                }
            }
        }
        updated
    }

    /// Delete notifications older than the retention horizon, one bounded
    /// batch at a time. A short batch means the backlog is drained and the
    /// loop terminates, so a single invocation never does unbounded work.
    pub async fn purge_older_than(&self, user: &UserId, max_age: Duration) -> CoreResult<u64> {
        let cutoff = (Utc::now() - max_age).to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        let batch_size = self.config.purge_batch_size;
        let mut total_deleted = 0u64;

        loop {
            let expired = self
                .store
                .query(
                    &Query::collection(notifications_collection(user))
                        .where_lt("createdAt", cutoff.as_str())
                        .limit(batch_size),
                )
                .await?;
            if expired.is_empty() {
                break;
            }

            let batch = expired.len();
            for doc in expired {
                apply(self.store.as_ref(), Write::Delete { path: doc.path }).await?;
            }
            total_deleted += batch as u64;

            if batch < batch_size {
                break;
            }
        }

        if total_deleted > 0 {
            tracing::info!(user = %user, total_deleted, "purged expired notifications");
        }
        Ok(total_deleted)
    }

    /// Purge with the configured retention horizon.
    pub async fn purge_expired(&self, user: &UserId) -> CoreResult<u64> {
        self.purge_older_than(user, Duration::days(self.config.retention_days))
            .await
    }
}
