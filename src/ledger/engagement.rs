//! Engagement counters under atomicity guarantees.
//!
//! `toggle_like`/`toggle_follow` are exactly-once toggles keyed by record
//! existence; the increment family is monotonic and deliberately applies no
//! deduplication, every call is one credited event.

use crate::config::EarningPointWeights;
use crate::error::{CoreError, CoreResult};
use crate::model::{follower_record, image_doc, like_record, user_doc, ImageId, UserId};
use crate::store::{apply, run_transaction, Patch, SharedStore, Write};

#[derive(Debug, Clone, Copy)]
enum EngagementKind {
    View,
    Copy,
    Share,
}

impl EngagementKind {
    fn item_field(&self) -> &'static str {
        match self {
            Self::View => "views",
            Self::Copy => "copies",
            Self::Share => "shares",
        }
    }

    fn owner_field(&self) -> &'static str {
        match self {
            Self::View => "totalViews",
            Self::Copy => "totalCopies",
            Self::Share => "totalShares",
        }
    }

    fn points(&self, weights: &EarningPointWeights) -> f64 {
        match self {
            Self::View => weights.view,
            Self::Copy => weights.copy,
            Self::Share => weights.share,
        }
    }
}

pub struct EngagementLedger {
    store: SharedStore,
    weights: EarningPointWeights,
}

impl EngagementLedger {
    pub fn new(store: SharedStore, weights: EarningPointWeights) -> Self {
        Self { store, weights }
    }

    /// Toggle the caller's like on an item. Returns whether the item is now
    /// liked. One transaction covers the like record, the item counter and
    /// the owner aggregate, so the committed state always satisfies
    /// "record exists ⇔ counted".
    pub async fn toggle_like(&self, image: &ImageId, user: &UserId) -> CoreResult<bool> {
        let image_path = image_doc(image);
        let like_path = like_record(image, user);

        run_transaction(self.store.as_ref(), |txn| {
            let image_path = image_path.clone();
            let like_path = like_path.clone();
            let user = user.clone();
            Box::pin(async move {
                let image = txn
                    .get(&image_path)
                    .await?
                    .ok_or_else(|| CoreError::NotFound(image_path.to_string()))?;
                let owner_path = image
                    .str_field("creatorId")
                    .map(|creator| user_doc(&UserId::new(creator)));

                let existing = txn.get(&like_path).await?;
                let now_liked = existing.is_none();
                let delta = if now_liked { 1.0 } else { -1.0 };

                if now_liked {
                    txn.merge(
                        like_path,
                        Patch::new()
                            .set("userId", user.as_str())
                            .server_time("createdAt"),
                    );
                } else {
                    txn.delete(like_path);
                }
                txn.merge(
                    image_path,
                    Patch::new()
                        .increment("likes", delta)
                        .server_time("updatedAt"),
                );
                if let Some(owner_path) = owner_path {
                    txn.merge(owner_path, Patch::new().increment("totalLikes", delta));
                }

                Ok(now_liked)
            })
        })
        .await
    }

    /// Toggle `follower` following `target`. Same existence-is-truth shape
    /// as likes, scoped to a single follower record.
    pub async fn toggle_follow(
        &self,
        target: &UserId,
        follower: &UserId,
        follower_name: &str,
    ) -> CoreResult<bool> {
        let follow_path = follower_record(target, follower);

        run_transaction(self.store.as_ref(), |txn| {
            let follow_path = follow_path.clone();
            let follower = follower.clone();
            let follower_name = follower_name.to_string();
            Box::pin(async move {
                let existing = txn.get(&follow_path).await?;
                if existing.is_some() {
                    txn.delete(follow_path);
                    Ok(false)
                } else {
                    txn.merge(
                        follow_path,
                        Patch::new()
                            .set("followerId", follower.as_str())
                            .set("displayName", follower_name.as_str())
                            .server_time("createdAt"),
                    );
                    Ok(true)
                }
            })
        })
        .await
    }

    pub async fn increment_view(&self, image: &ImageId) -> CoreResult<()> {
        self.increment(image, EngagementKind::View).await
    }

    pub async fn increment_copy(&self, image: &ImageId) -> CoreResult<()> {
        self.increment(image, EngagementKind::Copy).await
    }

    pub async fn increment_share(&self, image: &ImageId) -> CoreResult<()> {
        self.increment(image, EngagementKind::Share).await
    }

    /// Count one engagement event: item counter plus the owner aggregate and
    /// its weighted earning-point bump. A missing item is a logged no-op.
    async fn increment(&self, image: &ImageId, kind: EngagementKind) -> CoreResult<()> {
        let image_path = image_doc(image);
        let Some(doc) = self.store.get(&image_path).await? else {
            tracing::warn!(image = %image, field = kind.item_field(), "increment on missing item skipped");
            return Ok(());
        };

        apply(
            self.store.as_ref(),
            Write::Merge {
                path: image_path,
                patch: Patch::new()
                    .increment(kind.item_field(), 1.0)
                    .server_time("updatedAt"),
            },
        )
        .await?;

        if let Some(creator) = doc.str_field("creatorId").filter(|c| !c.is_empty()) {
            apply(
                self.store.as_ref(),
                Write::Merge {
                    path: user_doc(&UserId::new(creator)),
                    patch: Patch::new()
                        .increment(kind.owner_field(), 1.0)
                        .increment("earningPoints", kind.points(&self.weights)),
                },
            )
            .await?;
        }

        Ok(())
    }

    /// Flat earning-point bump for a completed sponsor action.
    pub async fn bump_earnings_for_action(&self, user: &UserId, amount: f64) -> CoreResult<()> {
        apply(
            self.store.as_ref(),
            Write::Merge {
                path: user_doc(user),
                patch: Patch::new()
                    .increment("earningPoints", amount)
                    .server_time("lastEarningBoostAt"),
            },
        )
        .await?;
        Ok(())
    }
}
