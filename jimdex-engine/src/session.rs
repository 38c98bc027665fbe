//! Viewer session state machine
//!
//! `Anonymous -> Authenticating -> Authenticated`, falling back to
//! `Anonymous` when authentication fails. Entering `Authenticated` installs
//! the viewer in the engine (recomputing mutuality) and then restarts the feed
//! subscriptions. There is no log-out.
//!
//! Installing a viewer and changing the follow set are serialized, so the
//! engine always ends up with the session's latest follow set.

use crate::engine::ReconciliationEngine;
use crate::models::ViewerContext;
use crate::subscriptions::StreamSubscriptions;
use crate::trust::MutualityChange;
use async_trait::async_trait;
use chrono::Utc;
use jimdex_common::events::{EventBus, JimdexEvent, SessionPhase};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Session state; the viewer context only exists once authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated(ViewerContext),
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Anonymous => SessionPhase::Anonymous,
            SessionState::Authenticating => SessionPhase::Authenticating,
            SessionState::Authenticated(_) => SessionPhase::Authenticated,
        }
    }

    pub fn viewer(&self) -> Option<&ViewerContext> {
        match self {
            SessionState::Authenticated(viewer) => Some(viewer),
            _ => None,
        }
    }
}

/// Identity collaborator failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("viewer declined to authenticate")]
    Declined,

    #[error("no signer available")]
    NoSigner,

    #[error("invalid identity: {0}")]
    Invalid(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("a login is already in progress")]
    AlreadyAuthenticating,

    #[error("no authenticated viewer")]
    NotAuthenticated,
}

/// Source of the viewer's identity and follow set
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self) -> Result<ViewerContext, AuthError>;
}

/// Identity handed over directly by a trusted caller (the UI bridge)
#[derive(Debug, Clone)]
pub struct PresentedIdentity {
    pub viewer_id: String,
    pub follows: Vec<String>,
}

#[async_trait]
impl IdentityProvider for PresentedIdentity {
    async fn authenticate(&self) -> Result<ViewerContext, AuthError> {
        let viewer_id = self.viewer_id.trim();
        if viewer_id.is_empty() {
            return Err(AuthError::Invalid("empty viewer id".to_string()));
        }
        let follows = self
            .follows
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(str::to_string);
        Ok(ViewerContext::new(viewer_id, follows))
    }
}

/// Drives session transitions and their side effects
pub struct SessionManager {
    state: Mutex<SessionState>,
    /// Held while a viewer is being installed in the engine
    viewer_install: Mutex<()>,
    engine: ReconciliationEngine,
    subscriptions: Arc<dyn StreamSubscriptions>,
    event_bus: EventBus,
}

impl SessionManager {
    pub fn new(
        engine: ReconciliationEngine,
        subscriptions: Arc<dyn StreamSubscriptions>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            state: Mutex::new(SessionState::Anonymous),
            viewer_install: Mutex::new(()),
            engine,
            subscriptions,
            event_bus,
        }
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Authenticate through `provider`
    ///
    /// Already authenticated: returns the current viewer. A login while
    /// another is in progress is rejected. The state lock is not held while
    /// the provider runs.
    pub async fn login(&self, provider: &dyn IdentityProvider) -> Result<ViewerContext, SessionError> {
        {
            let mut state = self.state.lock().await;
            match &*state {
                SessionState::Authenticated(viewer) => return Ok(viewer.clone()),
                SessionState::Authenticating => return Err(SessionError::AlreadyAuthenticating),
                SessionState::Anonymous => {}
            }
            self.transition(&mut state, SessionState::Authenticating);
        }

        let viewer = match provider.authenticate().await {
            Ok(viewer) => viewer,
            Err(e) => {
                warn!(error = %e, "Authentication failed");
                let mut state = self.state.lock().await;
                self.transition(&mut state, SessionState::Anonymous);
                return Err(e.into());
            }
        };

        let _install = self.viewer_install.lock().await;
        {
            let mut state = self.state.lock().await;
            self.transition(&mut state, SessionState::Authenticated(viewer.clone()));
        }
        info!(
            viewer_id = %viewer.viewer_id,
            follows = viewer.follow_set.len(),
            "Viewer authenticated"
        );

        self.engine.apply_viewer(viewer.clone()).await;
        if let Err(e) = self.subscriptions.restart().await {
            warn!(error = %e, "Feed restart failed after login");
        }

        Ok(viewer)
    }

    /// Replace the authenticated viewer's follow set and recompute mutuality
    ///
    /// Recommenders already mutual stay mutual even if unfollowed.
    pub async fn update_follows(
        &self,
        follows: impl IntoIterator<Item = String>,
    ) -> Result<MutualityChange, SessionError> {
        let _install = self.viewer_install.lock().await;
        let viewer = {
            let mut state = self.state.lock().await;
            let SessionState::Authenticated(current) = &*state else {
                return Err(SessionError::NotAuthenticated);
            };
            let viewer = ViewerContext::new(current.viewer_id.clone(), follows);
            *state = SessionState::Authenticated(viewer.clone());
            viewer
        };

        info!(
            viewer_id = %viewer.viewer_id,
            follows = viewer.follow_set.len(),
            "Follow set updated"
        );
        Ok(self.engine.apply_viewer(viewer).await)
    }

    fn transition(&self, state: &mut SessionState, next: SessionState) {
        let old_state = state.phase();
        let new_state = next.phase();
        *state = next;
        self.event_bus
            .emit_lossy(JimdexEvent::SessionStateChanged {
                old_state,
                new_state,
                timestamp: Utc::now(),
            });
    }
}
