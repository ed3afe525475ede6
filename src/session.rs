//! Authentication state and the per-session lifecycle of sync and change feeds.

use crate::activity::{ActivityEntry, ActivityLevel, ActivitySink};
use crate::config::SyncConfig;
use crate::error::ScheduleError;
use crate::feed::ChangeFeed;
use crate::multiplexer::{FeedHandle, SubscriptionMultiplexer};
use crate::persistence::SlotStore;
use crate::slot::Scope;
use crate::snapshot::SnapshotLoader;
use crate::sync::{SyncOrchestrator, SyncTrigger};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const WILDCARD_PERMISSION: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    SchoolAdmin,
    Teacher,
    Staff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub school_id: String,
    pub academic_year_id: String,
    pub role: Role,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        school_id: impl Into<String>,
        academic_year_id: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            school_id: school_id.into(),
            academic_year_id: academic_year_id.into(),
            role,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.school_id.clone(), self.academic_year_id.clone())
    }

    /// Never touches the network.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.role == Role::SuperAdmin
            || self.permissions.contains(WILDCARD_PERMISSION)
            || self.permissions.contains(permission)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Token issuance and verification live behind this trait.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, ScheduleError>;

    /// Re-validates a session. `Auth` errors are fatal, anything else is retried later.
    async fn refresh(&self, session: &Session) -> Result<Session, ScheduleError>;

    async fn sign_out(&self, _session: &Session) -> Result<(), ScheduleError> {
        Ok(())
    }
}

/// Fixed set of accounts, for tests and the bundled binaries.
#[derive(Default)]
pub struct StaticAuthenticator {
    accounts: RwLock<HashMap<String, (String, Session)>>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(
        self,
        username: impl Into<String>,
        password: impl Into<String>,
        session: Session,
    ) -> Self {
        self.accounts
            .write()
            .insert(username.into(), (password.into(), session));
        self
    }

    /// Replaces the session handed out on the next sign-in or refresh.
    pub fn update_account(&self, username: &str, session: Session) -> bool {
        match self.accounts.write().get_mut(username) {
            Some((_, current)) => {
                *current = session;
                true
            }
            None => false,
        }
    }

    pub fn revoke(&self, username: &str) -> bool {
        self.accounts.write().remove(username).is_some()
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, ScheduleError> {
        match self.accounts.read().get(&credentials.username) {
            Some((password, session)) if *password == credentials.password => Ok(session.clone()),
            _ => Err(ScheduleError::auth("invalid credentials")),
        }
    }

    async fn refresh(&self, session: &Session) -> Result<Session, ScheduleError> {
        self.accounts
            .read()
            .values()
            .find(|(_, account)| account.user_id == session.user_id)
            .map(|(_, account)| account.clone())
            .ok_or_else(|| ScheduleError::auth("session expired"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    SignedOut,
    Authenticating,
    SignedIn,
}

/// Collaborators every signed-in session is wired to.
#[derive(Clone)]
pub struct SyncDependencies {
    pub slots: Arc<dyn SlotStore>,
    pub loader: Arc<dyn SnapshotLoader>,
    pub feed: Arc<dyn ChangeFeed>,
    pub activity: Arc<dyn ActivitySink>,
    pub config: SyncConfig,
}

#[derive(Clone)]
struct ActiveSession {
    session: Arc<Session>,
    orchestrator: Arc<SyncOrchestrator>,
    feed: FeedHandle,
}

pub struct SessionManager {
    authenticator: Arc<dyn Authenticator>,
    deps: SyncDependencies,
    status: RwLock<SessionStatus>,
    current: RwLock<Option<ActiveSession>>,
    refreshing: AtomicBool,
    // Serializes sign-in, sign-out and refresh.
    transition: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(authenticator: Arc<dyn Authenticator>, deps: SyncDependencies) -> Self {
        Self {
            authenticator,
            deps,
            status: RwLock::new(SessionStatus::SignedOut),
            current: RwLock::new(None),
            refreshing: AtomicBool::new(false),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    /// True while a token refresh is in flight. `status` stays `SignedIn` meanwhile.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.current.read().as_ref().map(|active| active.session.clone())
    }

    pub fn orchestrator(&self) -> Option<Arc<SyncOrchestrator>> {
        self.current
            .read()
            .as_ref()
            .map(|active| active.orchestrator.clone())
    }

    pub fn feed_handle(&self) -> Option<FeedHandle> {
        self.current.read().as_ref().map(|active| active.feed.clone())
    }

    /// False when signed out.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(|active| active.session.has_permission(permission))
    }

    /// Authenticates, then opens the change feeds, starts the orchestrator and runs
    /// the initial load. A previous session is torn down first.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Arc<Session>, ScheduleError> {
        let _transition = self.transition.lock().await;
        self.teardown().await;

        *self.status.write() = SessionStatus::Authenticating;
        let session = match self.authenticator.sign_in(credentials).await {
            Ok(session) => Arc::new(session),
            Err(err) => {
                *self.status.write() = SessionStatus::SignedOut;
                tracing::warn!(username = %credentials.username, error = %err, "sign-in failed");
                return Err(err);
            }
        };

        let orchestrator = SyncOrchestrator::new(
            session.clone(),
            self.deps.loader.clone(),
            self.deps.slots.clone(),
            self.deps.activity.clone(),
            self.deps.config.clone(),
        );
        let target = Arc::downgrade(&orchestrator);
        let feed = SubscriptionMultiplexer::new(self.deps.feed.clone())
            .open(
                &session.school_id,
                self.deps.config.watched_tables.iter().copied(),
                move |table, _payload| {
                    if let Some(orchestrator) = target.upgrade() {
                        orchestrator.request(SyncTrigger::ChangeFeed(table));
                    }
                },
            )
            .await;
        orchestrator.bind_feed(feed.clone());
        orchestrator.start();

        *self.current.write() = Some(ActiveSession {
            session: session.clone(),
            orchestrator: orchestrator.clone(),
            feed,
        });
        *self.status.write() = SessionStatus::SignedIn;
        tracing::info!(user_id = %session.user_id, school_id = %session.school_id, "signed in");
        self.deps.activity.record(
            ActivityEntry::new(session.school_id.clone(), "sign_in", "user", ActivityLevel::Info)
                .with_user(session.user_id.clone())
                .with_entity_id(session.user_id.clone())
                .with_details(json!({ "academic_year_id": session.academic_year_id })),
        );

        if let Err(err) = orchestrator.sync(SyncTrigger::Initial).await {
            tracing::warn!(error = %err, "initial sync failed");
        }
        Ok(session)
    }

    /// Closes every feed, cancels pending reloads and drops the sync state together
    /// with unreplayed changes. Signing out while signed out does nothing.
    pub async fn sign_out(&self) -> bool {
        let _transition = self.transition.lock().await;
        self.teardown().await
    }

    async fn teardown(&self) -> bool {
        let taken = self.current.write().take();
        let Some(active) = taken else {
            *self.status.write() = SessionStatus::SignedOut;
            return false;
        };
        let discarded = active.orchestrator.pending_count();
        active.orchestrator.shutdown();
        active.feed.close();
        *self.status.write() = SessionStatus::SignedOut;

        if let Err(err) = self.authenticator.sign_out(&active.session).await {
            tracing::warn!(error = %err, "authenticator sign-out failed");
        }
        tracing::info!(user_id = %active.session.user_id, discarded, "signed out");
        self.deps.activity.record(
            ActivityEntry::new(
                active.session.school_id.clone(),
                "sign_out",
                "user",
                ActivityLevel::Info,
            )
            .with_user(active.session.user_id.clone())
            .with_entity_id(active.session.user_id.clone())
            .with_details(json!({ "discarded_changes": discarded })),
        );
        true
    }

    /// Transparent token refresh. An `Auth` failure, or a refreshed session naming a
    /// different user or scope, signs out. Other failures keep the current session.
    pub async fn refresh(&self) -> Result<Arc<Session>, ScheduleError> {
        let _transition = self.transition.lock().await;
        let Some(current) = self.session() else {
            return Err(ScheduleError::auth("not signed in"));
        };

        self.refreshing.store(true, Ordering::SeqCst);
        let refreshed = self.authenticator.refresh(&current).await;
        self.refreshing.store(false, Ordering::SeqCst);

        match refreshed {
            Ok(session)
                if session.user_id == current.user_id && session.scope() == current.scope() =>
            {
                let session = Arc::new(session);
                if let Some(active) = self.current.write().as_mut() {
                    active.orchestrator.replace_session(session.clone())?;
                    active.session = session.clone();
                }
                tracing::debug!(user_id = %session.user_id, "session refreshed");
                Ok(session)
            }
            Ok(_) => {
                tracing::warn!(user_id = %current.user_id, "refreshed session changed scope");
                self.teardown().await;
                Err(ScheduleError::auth("refreshed session changed scope"))
            }
            Err(err @ ScheduleError::Auth(_)) => {
                tracing::warn!(user_id = %current.user_id, error = %err, "refresh rejected");
                self.teardown().await;
                Err(err)
            }
            Err(err) => {
                tracing::warn!(error = %err, "refresh failed, keeping session");
                Err(err)
            }
        }
    }
}
