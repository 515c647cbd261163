//! Per-chat conversation sessions
//!
//! A session holds the active dialog, the answers collected so far, the
//! authentication state and the pending timers of one (chat, user) pair.
//! Sessions are created lazily, live in memory only and are dropped again
//! once they hold nothing beyond their key.

use super::scheduler::{TimerHandle, TimerPurpose};
use crate::storage::Role;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Identifies a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub chat_id: i64,
    pub user_id: Option<i64>,
}

/// The dialog a session is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveDialog {
    pub dialog: &'static str,
    pub state: &'static str,
}

/// Authentication established by a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    pub account_id: i64,
    pub username: String,
    pub role: Role,
}

/// Conversation state of one chat
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    dialog: Option<ActiveDialog>,
    answers: HashMap<String, String>,
    auth: Option<AuthState>,
    timers: HashMap<TimerPurpose, TimerHandle>,
    /// Last query handed to a capability, referenced by feedback
    pub last_query: Option<String>,
}

impl Session {
    #[must_use]
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            dialog: None,
            answers: HashMap::new(),
            auth: None,
            timers: HashMap::new(),
            last_query: None,
        }
    }

    #[must_use]
    pub const fn key(&self) -> SessionKey {
        self.key
    }

    #[must_use]
    pub const fn dialog(&self) -> Option<ActiveDialog> {
        self.dialog
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.dialog.is_none()
    }

    /// Enter a dialog state, keeping collected answers
    pub fn enter(&mut self, dialog: &'static str, state: &'static str) {
        debug!(chat_id = self.key.chat_id, dialog, state, "Dialog state");
        self.dialog = Some(ActiveDialog { dialog, state });
    }

    /// Leave the active dialog and drop its answers
    pub fn clear_dialog(&mut self) {
        if let Some(active) = self.dialog.take() {
            debug!(chat_id = self.key.chat_id, dialog = active.dialog, "Dialog ended");
        }
        self.answers.clear();
    }

    #[must_use]
    pub fn answer(&self, key: &str) -> Option<&str> {
        self.answers.get(key).map(String::as_str)
    }

    pub fn set_answer(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.answers.insert(key.into(), value.into());
    }

    #[must_use]
    pub const fn answers(&self) -> &HashMap<String, String> {
        &self.answers
    }

    pub(crate) fn restore_answers(&mut self, answers: HashMap<String, String>) {
        self.answers = answers;
    }

    #[must_use]
    pub const fn auth(&self) -> Option<&AuthState> {
        self.auth.as_ref()
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }

    pub fn login(&mut self, auth: AuthState) {
        self.auth = Some(auth);
    }

    /// Drop authentication, returns `false` if there was none
    pub fn logout(&mut self) -> bool {
        self.last_query = None;
        self.auth.take().is_some()
    }

    /// Update the cached role of the logged in account
    pub fn set_role(&mut self, role: Role) {
        if let Some(auth) = self.auth.as_mut() {
            auth.role = role;
        }
    }

    #[must_use]
    pub fn timer(&self, purpose: TimerPurpose) -> Option<&TimerHandle> {
        self.timers.get(&purpose)
    }

    pub(crate) fn insert_timer(&mut self, handle: TimerHandle) -> Option<TimerHandle> {
        self.timers.insert(handle.purpose, handle)
    }

    pub(crate) fn take_timer(&mut self, purpose: TimerPurpose) -> Option<TimerHandle> {
        self.timers.remove(&purpose)
    }

    /// Nothing in the session needs to survive the current event
    #[must_use]
    pub fn is_disposable(&self) -> bool {
        self.is_idle()
            && !self.is_authenticated()
            && self.timers.is_empty()
            && self.answers.is_empty()
            && self.last_query.is_none()
    }

    /// Drop the handle of a fired timer unless it was superseded meanwhile
    pub(crate) fn discard_fired(&mut self, purpose: TimerPurpose, id: u64) {
        if self.timers.get(&purpose).is_some_and(|h| h.id == id) {
            self.timers.remove(&purpose);
        }
    }
}

/// All live sessions
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get existing session or create an empty one
    pub async fn get_or_create(&self, key: SessionKey) -> Arc<Mutex<Session>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(&key) {
                return session.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(key))))
            .clone()
    }

    /// Get session if exists
    pub async fn get(&self, key: &SessionKey) -> Option<Arc<Mutex<Session>>> {
        let sessions = self.sessions.read().await;
        sessions.get(key).cloned()
    }

    /// Remove the session of `key` if it is disposable.
    ///
    /// A session that is locked or still referenced outside the store is
    /// kept. Returns `true` if the session was removed.
    pub async fn release(&self, key: &SessionKey) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get(key) else {
            return false;
        };
        let disposable = Arc::strong_count(session) == 1
            && session.try_lock().is_ok_and(|guard| guard.is_disposable());
        if disposable {
            sessions.remove(key);
            debug!(chat_id = key.chat_id, "Session released");
        }
        disposable
    }

    /// Snapshot of every live session
    pub async fn all(&self) -> Vec<(SessionKey, Arc<Mutex<Session>>)> {
        let sessions = self.sessions.read().await;
        sessions.iter().map(|(k, s)| (*k, s.clone())).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: SessionKey = SessionKey {
        chat_id: 10,
        user_id: Some(20),
    };

    #[test]
    fn test_disposable_only_when_empty() {
        let mut session = Session::new(KEY);
        assert!(session.is_disposable());

        session.enter("register", "ask_username");
        assert!(!session.is_disposable());
        session.clear_dialog();

        session.last_query = Some("вопрос".to_string());
        assert!(!session.is_disposable());
        session.last_query = None;

        session.login(AuthState {
            account_id: 1,
            username: "alice".to_string(),
            role: Role::Client,
        });
        assert!(!session.is_disposable());
        session.logout();
        assert!(session.is_disposable());
    }

    #[tokio::test]
    async fn test_release_keeps_sessions_in_use() {
        let store = SessionStore::new();
        assert!(!store.release(&KEY).await);

        let handle = store.get_or_create(KEY).await;
        assert!(!store.release(&KEY).await);
        drop(handle);
        assert!(store.release(&KEY).await);
        assert!(store.is_empty().await);

        let handle = store.get_or_create(KEY).await;
        handle.lock().await.enter("upload", "wait_for_file");
        drop(handle);
        assert!(!store.release(&KEY).await);
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn test_clear_dialog_drops_answers() {
        let mut session = Session::new(KEY);
        session.enter("register", "ask_password");
        session.set_answer("username", "alice@example.com");

        session.clear_dialog();
        assert!(session.is_idle());
        assert!(session.answers().is_empty());
    }

    #[test]
    fn test_auth_survives_dialogs() {
        let mut session = Session::new(KEY);
        session.login(AuthState {
            account_id: 1,
            username: "alice".to_string(),
            role: Role::Client,
        });
        session.enter("settings", "choosing");
        session.clear_dialog();

        assert!(session.is_authenticated());
        assert!(session.logout());
        assert!(!session.logout());
    }

    #[tokio::test]
    async fn test_store_creates_lazily_once() {
        let store = SessionStore::new();
        assert!(store.get(&KEY).await.is_none());

        let a = store.get_or_create(KEY).await;
        let b = store.get_or_create(KEY).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len().await, 1);
    }
}
