//! Facade wiring the store and config into the components, plus the flows
//! that connect them: account bootstrap on sign-in, and the gated actions
//! that run a ledger mutation and an owner notification after the sponsor
//! redirect completes.

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::content::ContentService;
use crate::error::CoreResult;
use crate::gate::{CompletionCallback, CreditSink, RedirectGate, RedirectRequest, UrlOpener};
use crate::handles::HandleAllocator;
use crate::ledger::{EngagementLedger, RedirectCredits};
use crate::model::{
    image_doc, to_fields, user_doc, Account, ImageDoc, ImageId, NotificationKind, UserId,
};
use crate::notifications::NotificationScheduler;
use crate::profile::{self, CreatorProfile};
use crate::store::{apply, Patch, SharedStore, Write};

const APP_NAME: &str = "StrangePrompt";

#[derive(Clone)]
pub struct Engine {
    store: SharedStore,
    pub config: Arc<EngineConfig>,
    pub ledger: Arc<EngagementLedger>,
    pub allocator: Arc<HandleAllocator>,
    pub notifications: Arc<NotificationScheduler>,
    pub credits: Arc<RedirectCredits>,
    pub content: Arc<ContentService>,
}

impl Engine {
    pub fn new(store: SharedStore, config: EngineConfig) -> Self {
        let ledger = Arc::new(EngagementLedger::new(
            store.clone(),
            config.earnings.points,
        ));
        let allocator = Arc::new(HandleAllocator::new(store.clone(), config.allocator));
        let notifications = Arc::new(NotificationScheduler::new(
            store.clone(),
            config.notifications,
        ));
        let credits = Arc::new(RedirectCredits::new(
            store.clone(),
            config.earnings.points.redirect_credit,
        ));
        let content = Arc::new(ContentService::new(store.clone(), allocator.clone()));

        Self {
            store,
            config: Arc::new(config),
            ledger,
            allocator,
            notifications,
            credits,
            content,
        }
    }

    /// A gate whose completed redirects are credited through this engine.
    pub fn gate(&self, opener: Box<dyn UrlOpener>) -> RedirectGate {
        RedirectGate::new(opener, Some(self.credits.clone() as Arc<dyn CreditSink>))
    }

    /// Bootstrap on sign-in: create the account document with zeroed
    /// counters on first contact (with a welcome notification), and make
    /// sure a username is assigned. Returns the up-to-date account.
    pub async fn sign_in(
        &self,
        user: &UserId,
        display_name: &str,
        email: &str,
    ) -> CoreResult<Account> {
        let user_path = user_doc(user);
        let is_new = self.store.get(&user_path).await?.is_none();
        if is_new {
            let account = Account {
                display_name: display_name.to_string(),
                email: email.to_string(),
                ..Account::default()
            };
            let patch = Patch::from_fields(to_fields(&account)).server_time("createdAt");
            apply(self.store.as_ref(), Write::Merge {
                path: user_path.clone(),
                patch,
            })
            .await?;
            tracing::info!(user = %user, "account created");

            let welcome = format!(
                "Welcome to {APP_NAME}! Start uploading your images and prompts to \
                 share with the community and earn from views."
            );
            self.notifications
                .schedule_best_effort(user, NotificationKind::Welcome, &welcome, None)
                .await;
        }

        self.allocator
            .ensure_username(user, display_name, email)
            .await?;

        let account = self
            .store
            .get(&user_path)
            .await?
            .map(|doc| Account::from_fields(&doc.fields))
            .unwrap_or_default();
        Ok(account)
    }

    pub async fn fetch_account(&self, user: &UserId) -> CoreResult<Option<Account>> {
        Ok(self
            .store
            .get(&user_doc(user))
            .await?
            .map(|doc| Account::from_fields(&doc.fields)))
    }

    pub async fn fetch_image(&self, image: &ImageId) -> CoreResult<Option<ImageDoc>> {
        Ok(self
            .store
            .get(&image_doc(image))
            .await?
            .map(|doc| ImageDoc::from_fields(&doc.fields)))
    }

    /// Merge profile edits and recompute the derived completion flag.
    pub async fn update_profile(
        &self,
        user: &UserId,
        profile: &CreatorProfile,
    ) -> CoreResult<()> {
        let patch = Patch::from_fields(to_fields(profile))
            .set("profileCompletionStatus", profile::is_complete(profile))
            .server_time("updatedAt");
        apply(self.store.as_ref(), Write::Merge {
            path: user_doc(user),
            patch,
        })
        .await?;
        Ok(())
    }

    /// Display estimate for a creator's dashboard.
    pub fn estimated_earnings(&self, account: &Account) -> f64 {
        self.config.earnings.rates.estimate(
            account.total_views.max(0) as u64,
            account.total_copies.max(0) as u64,
            account.total_shares.max(0) as u64,
        )
    }

    /// Gate a like behind the sponsor redirect. On completion the like
    /// toggles and, when it toggled on, the owner is notified.
    pub fn gated_like(
        &self,
        gate: &mut RedirectGate,
        viewer: &UserId,
        viewer_name: &str,
        image: &ImageId,
    ) {
        let ledger = self.ledger.clone();
        let notifications = self.notifications.clone();
        let store = self.store.clone();
        let image_id = image.clone();
        let viewer_id = viewer.clone();
        let actor = display_or_someone(viewer_name);

        let on_complete: CompletionCallback = Box::new(move || {
            Box::pin(async move {
                let liked = ledger.toggle_like(&image_id, &viewer_id).await?;
                if liked {
                    if let Some(owner) = image_owner(&store, &image_id).await? {
                        let message = format!("{actor} liked your prompt");
                        notifications
                            .schedule_best_effort(
                                &owner,
                                NotificationKind::Like,
                                &message,
                                Some(&image_id),
                            )
                            .await;
                    }
                }
                Ok(())
            })
        });

        gate.trigger(RedirectRequest {
            action_label: "register your like".to_string(),
            redirect_url: self.config.redirect.like_url.clone(),
            duration: Duration::from_millis(self.config.redirect.like_duration_ms),
            image_id: Some(image.clone()),
            viewer: Some(viewer.clone()),
            on_complete,
        });
    }

    /// Gate a prompt copy. On completion the copy counts and the owner is
    /// notified; the clipboard write itself belongs to the caller.
    pub fn gated_copy(
        &self,
        gate: &mut RedirectGate,
        viewer: &UserId,
        viewer_name: &str,
        image: &ImageId,
    ) {
        let ledger = self.ledger.clone();
        let notifications = self.notifications.clone();
        let store = self.store.clone();
        let image_id = image.clone();
        let actor = display_or_someone(viewer_name);

        let on_complete: CompletionCallback = Box::new(move || {
            Box::pin(async move {
                ledger.increment_copy(&image_id).await?;
                if let Some(owner) = image_owner(&store, &image_id).await? {
                    let message = format!("{actor} copied your prompt");
                    notifications
                        .schedule_best_effort(
                            &owner,
                            NotificationKind::Copy,
                            &message,
                            Some(&image_id),
                        )
                        .await;
                }
                Ok(())
            })
        });

        gate.trigger(RedirectRequest {
            action_label: "copy this prompt".to_string(),
            redirect_url: self.config.redirect.copy_url.clone(),
            duration: Duration::from_millis(self.config.redirect.copy_duration_ms),
            image_id: Some(image.clone()),
            viewer: Some(viewer.clone()),
            on_complete,
        });
    }

    /// Gate the dashboard's sponsor boost: a flat earning-point bump with
    /// no item attached.
    pub fn sponsor_boost(&self, gate: &mut RedirectGate, user: &UserId) {
        let ledger = self.ledger.clone();
        let notifications = self.notifications.clone();
        let user_id = user.clone();
        let amount = self.config.earnings.points.boost;

        let on_complete: CompletionCallback = Box::new(move || {
            Box::pin(async move {
                ledger.bump_earnings_for_action(&user_id, amount).await?;
                notifications
                    .schedule_best_effort(
                        &user_id,
                        NotificationKind::Boost,
                        "We applied a sponsor boost to your estimated earnings.",
                        None,
                    )
                    .await;
                Ok(())
            })
        });

        gate.trigger(RedirectRequest {
            action_label: "apply your boost".to_string(),
            redirect_url: self.config.redirect.default_url.clone(),
            duration: Duration::from_millis(self.config.redirect.default_duration_ms),
            image_id: None,
            viewer: Some(user.clone()),
            on_complete,
        });
    }

    /// Follow is not redirect-gated; it notifies the target on follow-on.
    pub async fn follow(
        &self,
        target: &UserId,
        follower: &UserId,
        follower_name: &str,
    ) -> CoreResult<bool> {
        let followed = self
            .ledger
            .toggle_follow(target, follower, follower_name)
            .await?;
        if followed {
            let message = format!("{} started following you", display_or_someone(follower_name));
            self.notifications
                .schedule_best_effort(target, NotificationKind::Follow, &message, None)
                .await;
        }
        Ok(followed)
    }
}

async fn image_owner(store: &SharedStore, image: &ImageId) -> CoreResult<Option<UserId>> {
    Ok(store
        .get(&image_doc(image))
        .await?
        .and_then(|doc| {
            doc.str_field("creatorId")
                .filter(|c| !c.is_empty())
                .map(UserId::new)
        }))
}

fn display_or_someone(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        "Someone".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryStore};

    fn engine() -> (Engine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let shared: SharedStore = store.clone();
        (Engine::new(shared, EngineConfig::default()), store)
    }

    #[tokio::test]
    async fn sign_in_bootstraps_account_once() {
        let (engine, _store) = engine();
        let user = UserId::new("u1");

        let account = engine.sign_in(&user, "Jane Doe", "jane@example.com").await.unwrap();
        assert_eq!(account.display_name, "Jane Doe");
        assert_eq!(account.username.as_deref(), Some("jane-doe"));
        assert_eq!(account.total_likes, 0);
        assert_eq!(account.earning_points, 0.0);

        let page = engine
            .notifications
            .fetch_page(&user, None, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].1.kind, NotificationKind::Welcome);

        // Second sign-in neither re-creates nor re-welcomes
        let again = engine.sign_in(&user, "Jane Doe", "jane@example.com").await.unwrap();
        assert_eq!(again.username.as_deref(), Some("jane-doe"));
        let page = engine
            .notifications
            .fetch_page(&user, None, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn update_profile_recomputes_completion_flag() {
        let (engine, store) = engine();
        let user = UserId::new("u1");
        engine.sign_in(&user, "Jane", "jane@example.com").await.unwrap();

        engine
            .update_profile(&user, &CreatorProfile::default())
            .await
            .unwrap();
        let doc = store.get(&user_doc(&user)).await.unwrap().unwrap();
        assert_eq!(doc.bool_field("profileCompletionStatus"), Some(false));
    }

    #[tokio::test]
    async fn estimated_earnings_uses_configured_rates() {
        let (engine, _store) = engine();
        let account = Account {
            total_views: 10,
            total_copies: 2,
            total_shares: 4,
            ..Account::default()
        };
        assert_eq!(engine.estimated_earnings(&account), 2.40);
    }

    #[tokio::test]
    async fn follow_notifies_target_once() {
        let (engine, _store) = engine();
        let target = UserId::new("creator");
        let follower = UserId::new("fan");

        assert!(engine.follow(&target, &follower, "Fan").await.unwrap());
        assert!(!engine.follow(&target, &follower, "Fan").await.unwrap());

        let page = engine
            .notifications
            .fetch_page(&target, None, None)
            .await
            .unwrap();
        // Only the follow-on direction notified
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].1.kind, NotificationKind::Follow);
        assert_eq!(page.items[0].1.message, "Fan started following you");
    }
}
