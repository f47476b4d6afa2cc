use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::domain::{Session, User, UserId};
use super::repository::{AuthChange, AuthChangeKind, AuthService};

/// Snapshot published to every view observing the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub session: Option<Session>,
    pub loading: bool,
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|session| &session.user)
    }
}

/// Process-wide session context: started once, shared by reference, shut down with the root view.
pub struct SessionProvider {
    state: Arc<watch::Sender<SessionState>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionProvider {
    /// Subscribe to auth changes, resolve the current session, and keep listening in the
    /// background until [`SessionProvider::shutdown`].
    pub async fn start<A>(auth: Arc<A>) -> Arc<Self>
    where
        A: AuthService + ?Sized + 'static,
    {
        let (sender, _) = watch::channel(SessionState {
            session: None,
            loading: true,
        });
        let state = Arc::new(sender);

        // Subscribe before the initial lookup so a sign-in racing it is not lost.
        let mut events = auth.subscribe();

        let session = match auth.current_session().await {
            Ok(session) => session,
            Err(error) => {
                warn!(%error, "failed to resolve current session; treating as signed out");
                None
            }
        };
        state.send_replace(SessionState {
            session,
            loading: false,
        });

        let task_state = Arc::clone(&state);
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(change) => apply_change(&task_state, change),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session listener lagged behind auth changes");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("auth change stream closed");
        });

        Arc::new(Self {
            state,
            listener: Mutex::new(Some(listener)),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    /// Receiver that observes every subsequent state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Resolves once the published session belongs to `user_id`.
    pub async fn wait_for_user(&self, user_id: &UserId) -> Option<User> {
        let mut receiver = self.state.subscribe();
        let state = receiver
            .wait_for(|state| state.user().is_some_and(|user| &user.id == user_id))
            .await
            .ok()?;
        state.user().cloned()
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop listening for auth changes; the last published state stays readable.
    pub fn shutdown(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("session listener stopped");
        }
    }
}

impl Drop for SessionProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn apply_change(state: &watch::Sender<SessionState>, change: AuthChange) {
    debug!(kind = ?change.kind, "auth change received");
    state.send_modify(|current| {
        current.loading = false;
        match change.kind {
            AuthChangeKind::SignedOut => current.session = None,
            AuthChangeKind::SignedIn
            | AuthChangeKind::PasswordRecovery
            | AuthChangeKind::UserUpdated => {
                if let Some(session) = change.session {
                    current.session = Some(session);
                }
            }
        }
    });
}
