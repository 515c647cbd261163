//! Durable store for accounts, settings, files, activity and error records
//!
//! Backed by SQLite. Error records are written through a second connection so
//! they survive a rollback of the primary one.

use crate::config::{
    DEFAULT_BREAK_MINUTES, DEFAULT_LANGUAGE, DEFAULT_SUMMARY_LENGTH, DEFAULT_WORK_MINUTES,
};
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task;
use tracing::{debug, info};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error reported by SQLite
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Unique constraint violated (duplicate username or platform identity)
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Stored row could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    /// A previous holder of the connection panicked
    #[error("Connection lock poisoned")]
    Poisoned,
    /// The blocking task running the query failed
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Full access, including role management
    Admin,
    /// Access to client overviews
    Manager,
    /// Default role for self-registered accounts
    Client,
}

impl Role {
    /// All roles in display order
    pub const ALL: [Self; 3] = [Self::Admin, Self::Manager, Self::Client];

    /// Name stored in the `roles` table
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "client" => Ok(Self::Client),
            other => Err(StorageError::Corrupt(format!("unknown role '{other}'"))),
        }
    }
}

/// A durable user account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    /// Platform (Telegram) user id linked to this account
    pub external_id: Option<i64>,
    pub username: String,
    pub role: Role,
    pub registered_at: String,
}

/// Account together with its stored password hash
#[derive(Debug, Clone)]
pub struct Credentials {
    pub account: Account,
    pub password_hash: String,
}

/// Data required to create an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub external_id: Option<i64>,
}

/// Per-account preferences
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSettings {
    pub language: String,
    pub summary_length: u32,
    pub deadline_notifications: bool,
    pub flashcard_notifications: bool,
    pub work_minutes: u32,
    pub break_minutes: u32,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            summary_length: DEFAULT_SUMMARY_LENGTH,
            deadline_notifications: true,
            flashcard_notifications: true,
            work_minutes: DEFAULT_WORK_MINUTES,
            break_minutes: DEFAULT_BREAK_MINUTES,
        }
    }
}

/// A single preference update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsChange {
    Language(String),
    SummaryLength(u32),
    DeadlineNotifications(bool),
    FlashcardNotifications(bool),
    WorkMinutes(u32),
    BreakMinutes(u32),
}

/// Outcome stored on a completed activity row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    Completed,
    Denied,
}

impl ActivityOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Denied => "denied",
        }
    }
}

/// Activity row inserted before a handler runs
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub account_id: i64,
    pub handler_name: String,
    pub query_text: Option<String>,
}

/// Activity row as read back for reports
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub id: i64,
    pub account_id: i64,
    pub handler_name: String,
    pub query_text: Option<String>,
    pub intent_label: Option<String>,
    pub response_time_ms: Option<i64>,
    pub outcome: Option<String>,
}

/// Error row written when a handler fails
#[derive(Debug, Clone)]
pub struct NewErrorRecord {
    pub account_id: Option<i64>,
    pub handler_name: String,
    pub description: String,
}

/// Error row as read back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub id: i64,
    pub account_id: Option<i64>,
    pub handler_name: String,
    pub description: String,
}

/// An uploaded document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub account_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub uploaded_at: String,
}

/// Lifecycle of a work interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    Start,
    Complete,
    Stopped,
}

impl WorkStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Stopped => "stopped",
        }
    }
}

impl FromStr for WorkStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "complete" => Ok(Self::Complete),
            "stopped" => Ok(Self::Stopped),
            other => Err(StorageError::Corrupt(format!("unknown work status '{other}'"))),
        }
    }
}

/// A work interval row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSession {
    pub id: i64,
    pub account_id: i64,
    pub status: WorkStatus,
}

/// A recent request shown in personal stats
#[derive(Debug, Clone, PartialEq)]
pub struct RecentRequest {
    pub query_text: Option<String>,
    pub response_time_ms: Option<i64>,
}

/// Personal usage report
#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub total_requests: i64,
    pub average_ms: Option<f64>,
    pub recent: Vec<RecentRequest>,
}

/// Handler ranked by request count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerVolume {
    pub handler_name: String,
    pub requests: i64,
}

/// Handler ranked by average latency
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerLatency {
    pub handler_name: String,
    pub average_ms: f64,
}

/// System-wide usage report
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalStats {
    pub total_users: i64,
    pub top_by_volume: Vec<HandlerVolume>,
    pub top_by_latency: Vec<HandlerLatency>,
}

/// Per-account overview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dashboard {
    pub account: Account,
    pub files: i64,
    pub requests: i64,
}

/// Interface for the durable store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Account linked to a platform identity
    async fn find_account_by_external(
        &self,
        external_id: i64,
    ) -> Result<Option<Account>, StorageError>;
    /// Account by primary key
    async fn find_account(&self, account_id: i64) -> Result<Option<Account>, StorageError>;
    /// Account and password hash by username
    async fn find_credentials(&self, username: &str)
        -> Result<Option<Credentials>, StorageError>;
    /// Create an account and its default settings in one transaction
    async fn create_account(&self, account: NewAccount) -> Result<Account, StorageError>;
    /// Link a platform identity to an account
    async fn link_external_id(&self, account_id: i64, external_id: i64)
        -> Result<(), StorageError>;
    /// Change the role of an account, returns `false` if the username is unknown
    async fn set_role(&self, username: &str, role: Role) -> Result<bool, StorageError>;
    /// All accounts ordered by id
    async fn list_accounts(&self) -> Result<Vec<Account>, StorageError>;
    /// Settings of an account, created with defaults if missing
    async fn settings(&self, account_id: i64) -> Result<UserSettings, StorageError>;
    /// Apply a single settings change
    async fn update_settings(
        &self,
        account_id: i64,
        change: SettingsChange,
    ) -> Result<UserSettings, StorageError>;
    /// Insert an activity row with no latency yet
    async fn record_activity(&self, activity: NewActivity) -> Result<i64, StorageError>;
    /// Backfill latency, outcome and intent label of an activity row
    async fn complete_activity(
        &self,
        activity_id: i64,
        response_time_ms: i64,
        outcome: ActivityOutcome,
        intent_label: Option<String>,
    ) -> Result<(), StorageError>;
    /// Activity rows of an account, newest first
    async fn activities(&self, account_id: i64) -> Result<Vec<ActivityRecord>, StorageError>;
    /// Write an error row through the independent connection
    async fn record_error(&self, record: NewErrorRecord) -> Result<(), StorageError>;
    /// All error rows, newest first
    async fn errors(&self) -> Result<Vec<ErrorRecord>, StorageError>;
    /// Register an uploaded file
    async fn add_file(
        &self,
        account_id: i64,
        file_name: &str,
        file_path: &str,
    ) -> Result<FileRecord, StorageError>;
    /// Files of an account, newest first
    async fn list_files(&self, account_id: i64) -> Result<Vec<FileRecord>, StorageError>;
    /// A file owned by the given account
    async fn find_file(
        &self,
        account_id: i64,
        file_id: i64,
    ) -> Result<Option<FileRecord>, StorageError>;
    /// Number of files per client account
    async fn client_file_counts(&self) -> Result<Vec<(String, i64)>, StorageError>;
    /// Store a like (1) or dislike (0)
    async fn add_feedback(
        &self,
        account_id: i64,
        query_text: Option<String>,
        rating: i64,
    ) -> Result<(), StorageError>;
    /// Open a work interval in status `start`
    async fn start_work_session(&self, account_id: i64) -> Result<i64, StorageError>;
    /// Read a work interval
    async fn work_session(&self, session_id: i64) -> Result<Option<WorkSession>, StorageError>;
    /// Mark a work interval complete if it is still in status `start`
    async fn complete_work_session(&self, session_id: i64) -> Result<bool, StorageError>;
    /// Mark the newest started work interval of an account as stopped
    async fn stop_active_work_session(&self, account_id: i64)
        -> Result<Option<i64>, StorageError>;
    /// Personal usage report
    async fn user_stats(&self, account_id: i64, recent: usize) -> Result<UserStats, StorageError>;
    /// System-wide usage report
    async fn global_stats(&self, top: usize) -> Result<GlobalStats, StorageError>;
    /// Per-account overview
    async fn dashboard(&self, account_id: i64) -> Result<Option<Dashboard>, StorageError>;
    /// Check the database is reachable
    async fn check_connection(&self) -> Result<(), StorageError>;
}

/// SQLite implementation of [`StorageProvider`]
///
/// Connection work runs on the blocking pool so a slow query never stalls
/// handlers of other chats.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    error_conn: Arc<Mutex<Connection>>,
}

const ACCOUNT_COLUMNS: &str =
    "u.id, u.telegram_id, u.username, r.name, u.registered_at, u.password_hash";

/// Run `f` with exclusive access to `conn` on a blocking thread
async fn blocking<T, F>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
{
    let conn = Arc::clone(conn);
    task::spawn_blocking(move || {
        let mut guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
        f(&mut guard)
    })
    .await
    .map_err(|e| StorageError::Task(e.to_string()))?
}

impl SqliteStorage {
    /// Open (or create) a database file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be created.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let error_conn = Connection::open(path)?;
        error_conn.busy_timeout(Duration::from_secs(5))?;

        create_tables(&conn)?;
        info!(path, "SQLite storage opened");
        Ok(Self::from_connections(conn, error_conn))
    }

    /// Open a private in-memory database shared by both connections
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let uri = format!("file:assistant-{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let conn = Connection::open(&uri)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let error_conn = Connection::open(&uri)?;

        create_tables(&conn)?;
        debug!(uri, "In-memory storage opened");
        Ok(Self::from_connections(conn, error_conn))
    }

    fn from_connections(conn: Connection, error_conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            error_conn: Arc::new(Mutex::new(error_conn)),
        }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        blocking(&self.conn, f).await
    }
}

fn create_tables(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS roles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );
        INSERT OR IGNORE INTO roles (name) VALUES ('admin'), ('manager'), ('client');
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            telegram_id INTEGER UNIQUE,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role_id INTEGER NOT NULL REFERENCES roles(id),
            registered_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS user_settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
            preferred_language TEXT NOT NULL,
            default_summary_length INTEGER NOT NULL,
            deadline_notifications INTEGER NOT NULL,
            flashcard_notifications INTEGER NOT NULL,
            work_minutes INTEGER NOT NULL,
            break_minutes INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            uploaded_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS user_activity (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            timestamp TEXT NOT NULL,
            query_text TEXT,
            intent_label TEXT,
            handler_name TEXT NOT NULL,
            response_time_ms INTEGER,
            outcome TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_user_activity_user ON user_activity(user_id, id DESC);
        CREATE TABLE IF NOT EXISTS error_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER,
            handler_name TEXT NOT NULL,
            error_text TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS user_feedback (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            query_text TEXT,
            rating INTEGER NOT NULL,
            timestamp TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS work_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            start_time TEXT NOT NULL,
            end_time TEXT,
            status TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn credentials_from_row(row: &Row<'_>) -> rusqlite::Result<(Account, String)> {
    let role: String = row.get(3)?;
    let role = role.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok((
        Account {
            id: row.get(0)?,
            external_id: row.get(1)?,
            username: row.get(2)?,
            role,
            registered_at: row.get(4)?,
        },
        row.get(5)?,
    ))
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    credentials_from_row(row).map(|(account, _)| account)
}

fn settings_from_row(row: &Row<'_>) -> rusqlite::Result<UserSettings> {
    Ok(UserSettings {
        language: row.get(0)?,
        summary_length: row.get(1)?,
        deadline_notifications: row.get(2)?,
        flashcard_notifications: row.get(3)?,
        work_minutes: row.get(4)?,
        break_minutes: row.get(5)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        account_id: row.get(1)?,
        file_name: row.get(2)?,
        file_path: row.get(3)?,
        uploaded_at: row.get(4)?,
    })
}

fn insert_default_settings(conn: &Connection, account_id: i64) -> rusqlite::Result<()> {
    let defaults = UserSettings::default();
    conn.execute(
        "INSERT OR IGNORE INTO user_settings
            (user_id, preferred_language, default_summary_length, deadline_notifications,
             flashcard_notifications, work_minutes, break_minutes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            account_id,
            defaults.language,
            defaults.summary_length,
            defaults.deadline_notifications,
            defaults.flashcard_notifications,
            defaults.work_minutes,
            defaults.break_minutes
        ],
    )?;
    Ok(())
}

fn read_settings(conn: &Connection, account_id: i64) -> rusqlite::Result<Option<UserSettings>> {
    conn.query_row(
        "SELECT preferred_language, default_summary_length, deadline_notifications,
                flashcard_notifications, work_minutes, break_minutes
         FROM user_settings WHERE user_id = ?1",
        [account_id],
        settings_from_row,
    )
    .optional()
}

fn find_account_where(
    conn: &Connection,
    condition: &str,
    value: i64,
) -> rusqlite::Result<Option<Account>> {
    conn.query_row(
        &format!(
            "SELECT {ACCOUNT_COLUMNS} FROM users u JOIN roles r ON r.id = u.role_id
             WHERE {condition} = ?1"
        ),
        [value],
        account_from_row,
    )
    .optional()
}

#[async_trait]
impl StorageProvider for SqliteStorage {
    async fn find_account_by_external(
        &self,
        external_id: i64,
    ) -> Result<Option<Account>, StorageError> {
        self.run(move |conn| Ok(find_account_where(conn, "u.telegram_id", external_id)?))
            .await
    }

    async fn find_account(&self, account_id: i64) -> Result<Option<Account>, StorageError> {
        self.run(move |conn| Ok(find_account_where(conn, "u.id", account_id)?))
            .await
    }

    async fn find_credentials(
        &self,
        username: &str,
    ) -> Result<Option<Credentials>, StorageError> {
        let username = username.to_string();
        self.run(move |conn| {
            let found = conn
                .query_row(
                    &format!(
                        "SELECT {ACCOUNT_COLUMNS} FROM users u JOIN roles r ON r.id = u.role_id
                         WHERE u.username = ?1"
                    ),
                    [username],
                    credentials_from_row,
                )
                .optional()?;
            Ok(found.map(|(account, password_hash)| Credentials {
                account,
                password_hash,
            }))
        })
        .await
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account, StorageError> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let registered_at = now();

            // A platform identity belongs to at most one account
            if let Some(external_id) = account.external_id {
                tx.execute(
                    "UPDATE users SET telegram_id = NULL WHERE telegram_id = ?1",
                    [external_id],
                )?;
            }
            let inserted = tx.execute(
                "INSERT INTO users (telegram_id, username, password_hash, role_id, registered_at)
                 VALUES (?1, ?2, ?3, (SELECT id FROM roles WHERE name = ?4), ?5)",
                params![
                    account.external_id,
                    account.username,
                    account.password_hash,
                    account.role.as_str(),
                    registered_at
                ],
            );
            if let Err(e) = inserted {
                if is_unique_violation(&e) {
                    return Err(StorageError::Conflict(format!(
                        "account '{}' already exists",
                        account.username
                    )));
                }
                return Err(e.into());
            }

            let id = tx.last_insert_rowid();
            insert_default_settings(&tx, id)?;
            tx.commit()?;

            info!(account_id = id, username = %account.username, role = %account.role, "Account created");
            Ok(Account {
                id,
                external_id: account.external_id,
                username: account.username,
                role: account.role,
                registered_at,
            })
        })
        .await
    }

    async fn link_external_id(
        &self,
        account_id: i64,
        external_id: i64,
    ) -> Result<(), StorageError> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE users SET telegram_id = NULL WHERE telegram_id = ?1 AND id != ?2",
                params![external_id, account_id],
            )?;
            tx.execute(
                "UPDATE users SET telegram_id = ?1 WHERE id = ?2",
                params![external_id, account_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn set_role(&self, username: &str, role: Role) -> Result<bool, StorageError> {
        let username = username.to_string();
        self.run(move |conn| {
            let rows = conn.execute(
                "UPDATE users SET role_id = (SELECT id FROM roles WHERE name = ?1) WHERE username = ?2",
                params![role.as_str(), username],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM users u JOIN roles r ON r.id = u.role_id ORDER BY u.id"
            ))?;
            let accounts = stmt
                .query_map([], account_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(accounts)
        })
        .await
    }

    async fn settings(&self, account_id: i64) -> Result<UserSettings, StorageError> {
        self.run(move |conn| {
            if let Some(settings) = read_settings(conn, account_id)? {
                return Ok(settings);
            }
            insert_default_settings(conn, account_id)?;
            Ok(UserSettings::default())
        })
        .await
    }

    async fn update_settings(
        &self,
        account_id: i64,
        change: SettingsChange,
    ) -> Result<UserSettings, StorageError> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            insert_default_settings(&tx, account_id)?;

            match &change {
                SettingsChange::Language(lang) => tx.execute(
                    "UPDATE user_settings SET preferred_language = ?1 WHERE user_id = ?2",
                    params![lang, account_id],
                )?,
                SettingsChange::SummaryLength(n) => tx.execute(
                    "UPDATE user_settings SET default_summary_length = ?1 WHERE user_id = ?2",
                    params![n, account_id],
                )?,
                SettingsChange::DeadlineNotifications(on) => tx.execute(
                    "UPDATE user_settings SET deadline_notifications = ?1 WHERE user_id = ?2",
                    params![on, account_id],
                )?,
                SettingsChange::FlashcardNotifications(on) => tx.execute(
                    "UPDATE user_settings SET flashcard_notifications = ?1 WHERE user_id = ?2",
                    params![on, account_id],
                )?,
                SettingsChange::WorkMinutes(n) => tx.execute(
                    "UPDATE user_settings SET work_minutes = ?1 WHERE user_id = ?2",
                    params![n, account_id],
                )?,
                SettingsChange::BreakMinutes(n) => tx.execute(
                    "UPDATE user_settings SET break_minutes = ?1 WHERE user_id = ?2",
                    params![n, account_id],
                )?,
            };

            let settings = read_settings(&tx, account_id)?
                .ok_or_else(|| StorageError::Corrupt(format!("settings of {account_id} vanished")))?;
            tx.commit()?;
            debug!(account_id, ?change, "Settings updated");
            Ok(settings)
        })
        .await
    }

    async fn record_activity(&self, activity: NewActivity) -> Result<i64, StorageError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO user_activity (user_id, timestamp, query_text, handler_name)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    activity.account_id,
                    now(),
                    activity.query_text,
                    activity.handler_name
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn complete_activity(
        &self,
        activity_id: i64,
        response_time_ms: i64,
        outcome: ActivityOutcome,
        intent_label: Option<String>,
    ) -> Result<(), StorageError> {
        self.run(move |conn| {
            conn.execute(
                "UPDATE user_activity
                 SET response_time_ms = ?1, outcome = ?2, intent_label = COALESCE(?3, intent_label)
                 WHERE id = ?4",
                params![response_time_ms, outcome.as_str(), intent_label, activity_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn activities(&self, account_id: i64) -> Result<Vec<ActivityRecord>, StorageError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, handler_name, query_text, intent_label, response_time_ms, outcome
                 FROM user_activity WHERE user_id = ?1 ORDER BY id DESC",
            )?;
            let rows = stmt
                .query_map([account_id], |row| {
                    Ok(ActivityRecord {
                        id: row.get(0)?,
                        account_id: row.get(1)?,
                        handler_name: row.get(2)?,
                        query_text: row.get(3)?,
                        intent_label: row.get(4)?,
                        response_time_ms: row.get(5)?,
                        outcome: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn record_error(&self, record: NewErrorRecord) -> Result<(), StorageError> {
        blocking(&self.error_conn, move |conn| {
            conn.execute(
                "INSERT INTO error_log (user_id, handler_name, error_text, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.account_id,
                    record.handler_name,
                    record.description,
                    now()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn errors(&self) -> Result<Vec<ErrorRecord>, StorageError> {
        blocking(&self.error_conn, |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, handler_name, error_text FROM error_log ORDER BY id DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ErrorRecord {
                        id: row.get(0)?,
                        account_id: row.get(1)?,
                        handler_name: row.get(2)?,
                        description: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn add_file(
        &self,
        account_id: i64,
        file_name: &str,
        file_path: &str,
    ) -> Result<FileRecord, StorageError> {
        let file_name = file_name.to_string();
        let file_path = file_path.to_string();
        self.run(move |conn| {
            let uploaded_at = now();
            conn.execute(
                "INSERT INTO files (user_id, filename, file_path, uploaded_at) VALUES (?1, ?2, ?3, ?4)",
                params![account_id, file_name, file_path, uploaded_at],
            )?;
            Ok(FileRecord {
                id: conn.last_insert_rowid(),
                account_id,
                file_name,
                file_path,
                uploaded_at,
            })
        })
        .await
    }

    async fn list_files(&self, account_id: i64) -> Result<Vec<FileRecord>, StorageError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, filename, file_path, uploaded_at
                 FROM files WHERE user_id = ?1 ORDER BY id DESC",
            )?;
            let files = stmt
                .query_map([account_id], file_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(files)
        })
        .await
    }

    async fn find_file(
        &self,
        account_id: i64,
        file_id: i64,
    ) -> Result<Option<FileRecord>, StorageError> {
        self.run(move |conn| {
            let file = conn
                .query_row(
                    "SELECT id, user_id, filename, file_path, uploaded_at
                     FROM files WHERE id = ?1 AND user_id = ?2",
                    params![file_id, account_id],
                    file_from_row,
                )
                .optional()?;
            Ok(file)
        })
        .await
    }

    async fn client_file_counts(&self) -> Result<Vec<(String, i64)>, StorageError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.username, COUNT(f.id)
                 FROM users u
                 JOIN roles r ON r.id = u.role_id
                 LEFT JOIN files f ON f.user_id = u.id
                 WHERE r.name = 'client'
                 GROUP BY u.id ORDER BY u.username",
            )?;
            let counts = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(counts)
        })
        .await
    }

    async fn add_feedback(
        &self,
        account_id: i64,
        query_text: Option<String>,
        rating: i64,
    ) -> Result<(), StorageError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO user_feedback (user_id, query_text, rating, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![account_id, query_text, rating, now()],
            )?;
            Ok(())
        })
        .await
    }

    async fn start_work_session(&self, account_id: i64) -> Result<i64, StorageError> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let started_at = now();
            // Only the newest interval of an account can be running
            let closed = tx.execute(
                "UPDATE work_sessions SET status = ?1, end_time = ?2 WHERE user_id = ?3 AND status = ?4",
                params![
                    WorkStatus::Stopped.as_str(),
                    started_at,
                    account_id,
                    WorkStatus::Start.as_str()
                ],
            )?;
            tx.execute(
                "INSERT INTO work_sessions (user_id, start_time, status) VALUES (?1, ?2, ?3)",
                params![account_id, started_at, WorkStatus::Start.as_str()],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            if closed > 0 {
                debug!(account_id, closed, "Superseded work intervals stopped");
            }
            Ok(id)
        })
        .await
    }

    async fn work_session(&self, session_id: i64) -> Result<Option<WorkSession>, StorageError> {
        self.run(move |conn| {
            let row: Option<(i64, i64, String)> = conn
                .query_row(
                    "SELECT id, user_id, status FROM work_sessions WHERE id = ?1",
                    [session_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            row.map(|(id, account_id, status)| {
                Ok(WorkSession {
                    id,
                    account_id,
                    status: status.parse()?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn complete_work_session(&self, session_id: i64) -> Result<bool, StorageError> {
        self.run(move |conn| {
            let rows = conn.execute(
                "UPDATE work_sessions SET status = ?1, end_time = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    WorkStatus::Complete.as_str(),
                    now(),
                    session_id,
                    WorkStatus::Start.as_str()
                ],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    async fn stop_active_work_session(
        &self,
        account_id: i64,
    ) -> Result<Option<i64>, StorageError> {
        self.run(move |conn| {
            let active: Option<i64> = conn
                .query_row(
                    "SELECT id FROM work_sessions WHERE user_id = ?1 AND status = ?2
                     ORDER BY id DESC LIMIT 1",
                    params![account_id, WorkStatus::Start.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = active {
                conn.execute(
                    "UPDATE work_sessions SET status = ?1, end_time = ?2 WHERE id = ?3",
                    params![WorkStatus::Stopped.as_str(), now(), id],
                )?;
            }
            Ok(active)
        })
        .await
    }

    async fn user_stats(&self, account_id: i64, recent: usize) -> Result<UserStats, StorageError> {
        self.run(move |conn| {
            let (total_requests, average_ms): (i64, Option<f64>) = conn.query_row(
                "SELECT COUNT(id), AVG(response_time_ms) FROM user_activity WHERE user_id = ?1",
                [account_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let limit = i64::try_from(recent).unwrap_or(i64::MAX);
            let mut stmt = conn.prepare(
                "SELECT query_text, response_time_ms FROM user_activity
                 WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let recent = stmt
                .query_map(params![account_id, limit], |row| {
                    Ok(RecentRequest {
                        query_text: row.get(0)?,
                        response_time_ms: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(UserStats {
                total_requests,
                average_ms,
                recent,
            })
        })
        .await
    }

    async fn global_stats(&self, top: usize) -> Result<GlobalStats, StorageError> {
        self.run(move |conn| {
            let limit = i64::try_from(top).unwrap_or(i64::MAX);
            let total_users: i64 =
                conn.query_row("SELECT COUNT(id) FROM users", [], |row| row.get(0))?;

            let mut stmt = conn.prepare(
                "SELECT handler_name, COUNT(id) AS cnt FROM user_activity
                 GROUP BY handler_name ORDER BY cnt DESC, handler_name LIMIT ?1",
            )?;
            let top_by_volume = stmt
                .query_map([limit], |row| {
                    Ok(HandlerVolume {
                        handler_name: row.get(0)?,
                        requests: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut stmt = conn.prepare(
                "SELECT handler_name, AVG(response_time_ms) AS avg_ms FROM user_activity
                 WHERE response_time_ms IS NOT NULL
                 GROUP BY handler_name ORDER BY avg_ms DESC, handler_name LIMIT ?1",
            )?;
            let top_by_latency = stmt
                .query_map([limit], |row| {
                    Ok(HandlerLatency {
                        handler_name: row.get(0)?,
                        average_ms: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(GlobalStats {
                total_users,
                top_by_volume,
                top_by_latency,
            })
        })
        .await
    }

    async fn dashboard(&self, account_id: i64) -> Result<Option<Dashboard>, StorageError> {
        self.run(move |conn| {
            let Some(account) = find_account_where(conn, "u.id", account_id)? else {
                return Ok(None);
            };
            let files: i64 = conn.query_row(
                "SELECT COUNT(id) FROM files WHERE user_id = ?1",
                [account_id],
                |row| row.get(0),
            )?;
            let requests: i64 = conn.query_row(
                "SELECT COUNT(id) FROM user_activity WHERE user_id = ?1",
                [account_id],
                |row| row.get(0),
            )?;
            Ok(Some(Dashboard {
                account,
                files,
                requests,
            }))
        })
        .await
    }

    async fn check_connection(&self) -> Result<(), StorageError> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}
