//! Sponsor-redirect interstitial state machine.
//!
//! A monetizable action arms the gate: the sponsor URL opens synchronously
//! inside the originating gesture (popup blockers refuse anything later),
//! then a countdown runs while the interstitial shows. The captured action
//! fires exactly once per armed period, whether the timer elapses, the user
//! asserts they already visited, or the interstitial is dismissed. The
//! original client coordinated this through window-scoped globals; here the
//! open-once and fire-once guarantees are state of the gate instance.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::CoreResult;
use crate::model::{ImageId, UserId};

/// The gated action, run once on completion. Errors are caught and logged;
/// a failed credit must not wedge the gate.
pub type CompletionCallback = Box<dyn FnOnce() -> BoxFuture<'static, CoreResult<()>> + Send>;

/// Opens an external browsing context. Must be synchronous: the call happens
/// inside the user gesture that triggered the gate.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// Sink for the audit record of one completed redirect.
#[async_trait]
pub trait CreditSink: Send + Sync {
    async fn record_redirect(&self, image: &ImageId, viewer: Option<&UserId>) -> CoreResult<()>;
}

pub struct RedirectRequest {
    pub action_label: String,
    pub redirect_url: String,
    pub duration: Duration,
    /// Item the completed redirect is credited to, when the action targets one.
    pub image_id: Option<ImageId>,
    pub viewer: Option<UserId>,
    pub on_complete: CompletionCallback,
}

struct ArmedAction {
    action_label: String,
    remaining: Duration,
    image_id: Option<ImageId>,
    viewer: Option<UserId>,
    on_complete: CompletionCallback,
}

enum GateState {
    Idle,
    Armed(Box<ArmedAction>),
}

pub struct RedirectGate {
    opener: Box<dyn UrlOpener>,
    credits: Option<Arc<dyn CreditSink>>,
    state: GateState,
    /// Best-effort local count of completed redirects on this instance.
    completed_redirects: u64,
}

impl RedirectGate {
    pub fn new(opener: Box<dyn UrlOpener>, credits: Option<Arc<dyn CreditSink>>) -> Self {
        Self {
            opener,
            credits,
            state: GateState::Idle,
            completed_redirects: 0,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, GateState::Armed(_))
    }

    pub fn remaining(&self) -> Option<Duration> {
        match &self.state {
            GateState::Armed(action) => Some(action.remaining),
            GateState::Idle => None,
        }
    }

    pub fn completed_redirects(&self) -> u64 {
        self.completed_redirects
    }

    /// Arm the gate for one gesture. Opens the sponsor URL synchronously,
    /// exactly once per trigger; an open refused by the environment is
    /// swallowed and the countdown still gates the action. Triggering while
    /// already armed replaces the pending action — the replaced callback
    /// never fires.
    pub fn trigger(&mut self, request: RedirectRequest) {
        if let Err(err) = self.opener.open(&request.redirect_url) {
            tracing::warn!(url = %request.redirect_url, "sponsor redirect open refused: {err}");
        }

        if let GateState::Armed(previous) = &self.state {
            tracing::debug!(
                replaced = %previous.action_label,
                armed = %request.action_label,
                "gate re-armed, pending action dropped"
            );
        }

        self.state = GateState::Armed(Box::new(ArmedAction {
            action_label: request.action_label,
            remaining: request.duration,
            image_id: request.image_id,
            viewer: request.viewer,
            on_complete: request.on_complete,
        }));
    }

    /// Advance the countdown. Returns true when this tick completed the
    /// armed action.
    pub async fn tick(&mut self, elapsed: Duration) -> bool {
        match &mut self.state {
            GateState::Armed(action) if elapsed >= action.remaining => {
                self.complete().await;
                true
            }
            GateState::Armed(action) => {
                action.remaining -= elapsed;
                false
            }
            GateState::Idle => false,
        }
    }

    /// The user asserts the sponsor page was already visited: completes
    /// immediately, short-circuiting the timer.
    pub async fn confirm(&mut self) -> bool {
        if !self.is_armed() {
            return false;
        }
        self.complete().await;
        true
    }

    /// Dismissing the interstitial completes the wait; it never cancels the
    /// credited action.
    pub async fn close(&mut self) -> bool {
        self.confirm().await
    }

    async fn complete(&mut self) {
        // Capture-and-clear: the state is Idle before anything runs, so a
        // racing duplicate completion finds nothing to fire.
        let GateState::Armed(action) = mem::replace(&mut self.state, GateState::Idle) else {
            return;
        };
        let ArmedAction {
            action_label,
            image_id,
            viewer,
            on_complete,
            ..
        } = *action;

        self.completed_redirects += 1;

        if let Err(err) = (on_complete)().await {
            tracing::error!(action = %action_label, "gated action failed: {err}");
        }

        if let (Some(image), Some(credits)) = (image_id, &self.credits) {
            if let Err(err) = credits.record_redirect(&image, viewer.as_ref()).await {
                tracing::warn!(image = %image, "redirect credit not recorded: {err}");
            }
        }
    }
}

/// Drive an armed gate's countdown off a one-second interval. The task exits
/// as soon as the gate returns to idle, including via `confirm` from
/// elsewhere.
pub fn spawn_countdown(gate: Arc<Mutex<RedirectGate>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tick = Duration::from_secs(1);
        let mut interval = tokio::time::interval(tick);
        interval.tick().await;
        loop {
            interval.tick().await;
            let mut gate = gate.lock().await;
            if !gate.is_armed() {
                break;
            }
            gate.tick(tick).await;
        }
    })
}
