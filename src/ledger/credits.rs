//! Redirect credit records: the audit trail tying completed sponsor
//! redirects to creators. Creation is exactly-once per completed redirect
//! (the gate's single-fire latch guarantees one call per armed period);
//! folding credits into a settlement batch happens elsewhere.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::gate::CreditSink;
use crate::model::{image_doc, redirects_collection, ImageId, RedirectCredit, UserId};
use crate::store::{apply, DocPath, Patch, Query, SharedStore, Write};

pub struct RedirectCredits {
    store: SharedStore,
    amount: f64,
}

impl RedirectCredits {
    pub fn new(store: SharedStore, amount: f64) -> Self {
        Self { store, amount }
    }

    /// Record one completed redirect against the item's creator. Returns the
    /// credited creator, or `None` when the item or its creator is unknown.
    pub async fn record(
        &self,
        image: &ImageId,
        viewer: Option<&UserId>,
    ) -> CoreResult<Option<UserId>> {
        let Some(doc) = self.store.get(&image_doc(image)).await? else {
            return Ok(None);
        };
        let Some(creator) = doc
            .str_field("creatorId")
            .filter(|c| !c.is_empty())
            .map(UserId::new)
        else {
            return Ok(None);
        };

        let path = DocPath::new(format!(
            "{}/{}",
            redirects_collection(&creator),
            Uuid::now_v7()
        ));
        let mut patch = Patch::new()
            .set("imageId", image.as_str())
            .set("amount", self.amount)
            .set("processed", false)
            .server_time("createdAt");
        if let Some(viewer) = viewer {
            patch = patch.set("viewerId", viewer.as_str());
        }
        apply(self.store.as_ref(), Write::Merge { path, patch }).await?;

        Ok(Some(creator))
    }

    /// Credits not yet folded into a settlement batch, oldest first.
    pub async fn unprocessed(&self, creator: &UserId) -> CoreResult<Vec<RedirectCredit>> {
        let docs = self
            .store
            .query(
                &Query::collection(redirects_collection(creator))
                    .where_eq("processed", false)
                    .order_by("createdAt", crate::store::Direction::Asc),
            )
            .await?;
        Ok(docs
            .iter()
            .filter_map(|doc| {
                serde_json::from_value(serde_json::Value::Object(doc.fields.clone())).ok()
            })
            .collect())
    }
}

#[async_trait]
impl CreditSink for RedirectCredits {
    async fn record_redirect(&self, image: &ImageId, viewer: Option<&UserId>) -> CoreResult<()> {
        self.record(image, viewer).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    async fn seed_image(store: &MemoryStore, id: &str, creator: &str) {
        apply(store, Write::Merge {
            path: image_doc(&ImageId::new(id)),
            patch: Patch::new().set("creatorId", creator),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn records_credit_under_creator() {
        let store = Arc::new(MemoryStore::new());
        seed_image(&store, "i1", "owner").await;
        let credits = RedirectCredits::new(store.clone(), 0.05);

        let credited = credits
            .record(&ImageId::new("i1"), Some(&UserId::new("viewer")))
            .await
            .unwrap();
        assert_eq!(credited, Some(UserId::new("owner")));

        let pending = credits.unprocessed(&UserId::new("owner")).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].image_id, "i1");
        assert_eq!(pending[0].viewer_id.as_deref(), Some("viewer"));
        assert!(!pending[0].processed);
        assert!((pending[0].amount - 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_image_or_creator_records_nothing() {
        let store = Arc::new(MemoryStore::new());
        let credits = RedirectCredits::new(store.clone(), 0.05);

        let credited = credits.record(&ImageId::new("ghost"), None).await.unwrap();
        assert_eq!(credited, None);

        seed_image(&store, "orphan", "").await;
        let credited = credits.record(&ImageId::new("orphan"), None).await.unwrap();
        assert_eq!(credited, None);
    }

    #[tokio::test]
    async fn anonymous_viewer_is_omitted_from_the_record() {
        let store = Arc::new(MemoryStore::new());
        seed_image(&store, "i1", "owner").await;
        let credits = RedirectCredits::new(store.clone(), 0.05);

        credits.record(&ImageId::new("i1"), None).await.unwrap();
        let pending = credits.unprocessed(&UserId::new("owner")).await.unwrap();
        assert_eq!(pending[0].viewer_id, None);
    }
}
