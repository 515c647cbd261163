use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use vitte_assistant::capabilities::CapabilityRegistry;
use vitte_assistant::config::Settings;
use vitte_assistant::credentials::hash_secret;
use vitte_assistant::engine::channel::{MemoryFileStore, RecordingOutbound};
use vitte_assistant::engine::scheduler::spawn_timer_loop;
use vitte_assistant::engine::{AppContext, Document, Engine, InboundEvent};
use vitte_assistant::handlers::{build_router, timer_callbacks};
use vitte_assistant::storage::{NewAccount, Role, SqliteStorage, StorageProvider, WorkStatus};
use vitte_assistant::views;

const CHAT: i64 = 100;

struct Harness {
    engine: Engine,
    outbound: Arc<RecordingOutbound>,
}

impl Harness {
    fn new() -> Result<Self> {
        Self::with_storage(SqliteStorage::open_in_memory()?)
    }

    fn with_storage(storage: SqliteStorage) -> Result<Self> {
        let outbound = Arc::new(RecordingOutbound::new());
        let (app, timers) = AppContext::new(
            Settings::default(),
            Arc::new(storage),
            CapabilityRegistry::from_settings(&Settings::default()),
            Arc::new(MemoryFileStore),
            outbound.clone(),
        );
        spawn_timer_loop(app.clone(), timer_callbacks(), timers);
        Ok(Self {
            engine: Engine::new(app, build_router()?),
            outbound,
        })
    }

    fn storage(&self) -> &dyn StorageProvider {
        self.engine.app().storage.as_ref()
    }

    async fn say(&self, chat: i64, text: &str) -> Vec<String> {
        self.engine
            .dispatch(InboundEvent::from_text(chat, Some(chat), text))
            .await;
        self.outbound.take_texts()
    }

    async fn press(&self, chat: i64, data: &str) -> Vec<String> {
        self.engine
            .dispatch(InboundEvent::callback(chat, Some(chat), data))
            .await;
        self.outbound.take_texts()
    }

    async fn state(&self, chat: i64) -> Option<&'static str> {
        let key = InboundEvent::from_text(chat, Some(chat), "").session_key();
        let session = self.engine.app().sessions.get_or_create(key).await;
        let state = session.lock().await.dialog().map(|d| d.state);
        state
    }

    async fn register(&self, chat: i64, username: &str, secret: &str) {
        self.say(chat, "/register").await;
        self.say(chat, username).await;
        self.say(chat, secret).await;
    }

    async fn login(&self, chat: i64, username: &str, secret: &str) -> Vec<String> {
        self.say(chat, "/login").await;
        self.say(chat, username).await;
        self.say(chat, secret).await
    }
}

#[tokio::test]
async fn test_registration_retries_short_secret() -> Result<()> {
    let h = Harness::new()?;

    assert_eq!(h.say(CHAT, "/register").await, vec![views::REGISTER_ASK_USERNAME]);
    assert_eq!(h.say(CHAT, "alice@example.com").await, vec![views::REGISTER_ASK_SECRET]);
    assert_eq!(h.say(CHAT, "12345").await, vec![views::REGISTER_SECRET_TOO_SHORT]);
    assert_eq!(h.state(CHAT).await, Some("secret"));

    assert_eq!(
        h.say(CHAT, "12345678").await,
        vec![views::registered("alice@example.com")]
    );
    assert_eq!(h.state(CHAT).await, None);

    let account = h.storage().find_account_by_external(CHAT).await?;
    assert_eq!(account.map(|a| (a.username, a.role)), Some(("alice@example.com".to_string(), Role::Client)));

    // Secrets never reach the activity table
    let account_id = h
        .storage()
        .find_credentials("alice@example.com")
        .await?
        .map(|c| c.account.id)
        .unwrap_or_default();
    let activities = h.storage().activities(account_id).await?;
    assert!(activities
        .iter()
        .all(|a| a.query_text.as_deref() != Some("12345678")));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_username_is_rejected() -> Result<()> {
    let h = Harness::new()?;
    h.register(CHAT, "alice", "password1").await;

    h.say(CHAT + 1, "/register").await;
    assert_eq!(h.say(CHAT + 1, "alice").await, vec![views::REGISTER_USERNAME_TAKEN]);
    assert_eq!(h.state(CHAT + 1).await, Some("username"));
    Ok(())
}

#[tokio::test]
async fn test_gates_follow_login_and_role() -> Result<()> {
    let h = Harness::new()?;
    h.register(CHAT, "bob", "password1").await;

    assert_eq!(h.say(CHAT, "/dashboard").await, vec![views::MUST_AUTHENTICATE]);

    let reply = h.login(CHAT, "bob", "password1").await;
    assert_eq!(reply.len(), 1);
    assert!(reply[0].contains("bob"));

    assert_eq!(h.say(CHAT, "/stats_global").await, vec![views::FORBIDDEN]);
    assert!(h.say(CHAT, "/dashboard").await[0].contains("bob"));

    let account_id = h
        .storage()
        .find_account_by_external(CHAT)
        .await?
        .map(|a| a.id)
        .unwrap_or_default();
    let activities = h.storage().activities(account_id).await?;
    let denied = activities
        .iter()
        .filter(|a| a.handler_name == "stats_global")
        .filter_map(|a| a.outcome.as_deref())
        .collect::<Vec<_>>();
    assert_eq!(denied, vec!["denied"]);

    assert_eq!(h.say(CHAT, "/logout").await, vec![views::LOGGED_OUT]);
    assert_eq!(h.say(CHAT, "/dashboard").await, vec![views::MUST_AUTHENTICATE]);
    Ok(())
}

#[tokio::test]
async fn test_admin_can_promote_and_see_global_stats() -> Result<()> {
    let h = Harness::new()?;
    h.storage()
        .create_account(NewAccount {
            username: "root".to_string(),
            password_hash: hash_secret("rootpass1"),
            role: Role::Admin,
            external_id: None,
        })
        .await?;
    h.register(CHAT + 1, "carol", "password1").await;
    h.login(CHAT, "root", "rootpass1").await;

    let stats = h.say(CHAT, "/stats_global").await;
    assert!(stats[0].contains('2'));

    assert_eq!(
        h.say(CHAT, "/set_role carol manager").await,
        vec![views::role_changed("carol", "manager")]
    );
    h.login(CHAT + 1, "carol", "password1").await;
    assert_eq!(h.say(CHAT + 1, "/manager_panel").await, vec![views::MANAGER_PANEL]);
    assert_eq!(h.say(CHAT + 1, "/admin_panel").await, vec![views::FORBIDDEN]);

    let users = h.press(CHAT, views::CALLBACK_ADMIN_LIST_USERS).await;
    assert!(users[0].contains("carol (роль: manager)"));
    Ok(())
}

#[tokio::test]
async fn test_wrong_secret_ends_login() -> Result<()> {
    let h = Harness::new()?;
    h.register(CHAT, "dave", "password1").await;

    let reply = h.login(CHAT, "dave", "wrong-password").await;
    assert_eq!(reply, vec![views::LOGIN_WRONG_SECRET]);
    assert_eq!(h.state(CHAT).await, None);
    assert_eq!(h.say(CHAT, "/dashboard").await, vec![views::MUST_AUTHENTICATE]);
    Ok(())
}

#[tokio::test]
async fn test_settings_escape_and_update() -> Result<()> {
    let h = Harness::new()?;
    h.register(CHAT, "erin", "password1").await;

    h.say(CHAT, "/settings").await;
    assert_eq!(h.state(CHAT).await, Some("choose"));
    assert_eq!(h.say(CHAT, "Отмена").await, vec![views::DIALOG_CANCELLED]);
    assert_eq!(h.state(CHAT).await, None);

    h.say(CHAT, "/settings").await;
    assert_eq!(h.press(CHAT, "settings_2").await, vec![views::SETTINGS_ASK_SUMMARY_LENGTH]);
    assert_eq!(h.say(CHAT, "50").await, vec![views::settings_bad_number(1, 20)]);
    assert_eq!(h.state(CHAT).await, Some("value"));
    h.say(CHAT, "5").await;
    assert_eq!(h.state(CHAT).await, None);

    let account_id = h
        .storage()
        .find_account_by_external(CHAT)
        .await?
        .map(|a| a.id)
        .unwrap_or_default();
    assert_eq!(h.storage().settings(account_id).await?.summary_length, 5);
    Ok(())
}

#[tokio::test]
async fn test_upload_then_download() -> Result<()> {
    let h = Harness::new()?;
    h.register(CHAT, "frank", "password1").await;

    h.say(CHAT, "/upload").await;
    assert_eq!(h.say(CHAT, "вот файл").await, vec![views::UPLOAD_EXPECT_FILE]);
    assert_eq!(h.state(CHAT).await, Some("wait_for_file"));

    h.engine
        .dispatch(InboundEvent::document(
            CHAT,
            Some(CHAT),
            Document {
                file_id: "abc".to_string(),
                file_name: "notes.pdf".to_string(),
            },
        ))
        .await;
    assert_eq!(h.outbound.take_texts(), vec![views::file_saved("notes.pdf")]);

    let account_id = h
        .storage()
        .find_account_by_external(CHAT)
        .await?
        .map(|a| a.id)
        .unwrap_or_default();
    let files = h.storage().list_files(account_id).await?;
    assert_eq!(files.len(), 1);

    let download = format!("{}{}", views::CALLBACK_DOWNLOAD_PREFIX, files[0].id);
    h.engine
        .dispatch(InboundEvent::callback(CHAT, Some(CHAT), download.as_str()))
        .await;
    let sent = h.outbound.sent();
    assert!(matches!(
        sent.last(),
        Some((CHAT, vitte_assistant::engine::Reply::Document { file_name, .. })) if file_name == "notes.pdf"
    ));
    h.outbound.take_texts();
    assert_eq!(
        h.press(CHAT + 5, &download).await,
        vec![views::REGISTER_FIRST]
    );
    Ok(())
}

#[tokio::test]
async fn test_missing_model_is_reported() -> Result<()> {
    let h = Harness::new()?;
    h.register(CHAT, "gina", "password1").await;
    assert_eq!(
        h.say(CHAT, "/intent как подать заявку").await,
        vec![views::MODEL_UNAVAILABLE]
    );
    assert_eq!(h.say(CHAT, "/intent").await, vec![views::args_required("intent")]);
    Ok(())
}

#[tokio::test]
async fn test_topics_without_model_apologises() -> Result<()> {
    let h = Harness::new()?;
    h.register(CHAT, "hana", "password1").await;
    assert_eq!(h.say(CHAT, "/topics").await, vec![views::TOPICS_USAGE]);
    assert_eq!(
        h.say(CHAT, "/topics стипендия; расписание занятий").await,
        vec![views::MODEL_UNAVAILABLE]
    );

    let errors = h.storage().errors().await?;
    assert_eq!(
        errors.iter().map(|e| e.handler_name.as_str()).collect::<Vec<_>>(),
        vec!["topics"]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stopped_work_timer_stays_silent() -> Result<()> {
    let h = Harness::new()?;
    h.register(CHAT, "hank", "password1").await;

    assert_eq!(h.say(CHAT, "/start_work").await, vec![views::work_started(25)]);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.say(CHAT, "/stop_work").await, vec![views::WORK_STOPPED]);

    tokio::time::sleep(Duration::from_secs(1500)).await;
    tokio::task::yield_now().await;
    assert!(h.outbound.take_texts().is_empty());
    Ok(())
}

/// Database file removed when the test ends
struct TempDb(std::path::PathBuf);

impl TempDb {
    fn new() -> Self {
        Self(std::env::temp_dir().join(format!("assistant-{}.db", uuid::Uuid::new_v4())))
    }

    fn path(&self) -> &str {
        self.0.to_str().unwrap_or_default()
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path()));
        }
    }
}

#[tokio::test]
async fn test_failed_registration_leaves_nothing_behind() -> Result<()> {
    let db = TempDb::new();
    let h = Harness::with_storage(SqliteStorage::open(db.path())?)?;
    let admin = rusqlite::Connection::open(db.path())?;
    admin.execute_batch(
        "CREATE TRIGGER settings_unavailable BEFORE INSERT ON user_settings
         BEGIN SELECT RAISE(ABORT, 'settings unavailable'); END;",
    )?;

    h.say(CHAT, "/register").await;
    h.say(CHAT, "zoe").await;
    assert_eq!(h.say(CHAT, "password1").await, vec![views::GENERIC_FAILURE]);
    assert_eq!(h.state(CHAT).await, None);
    assert!(h.storage().find_credentials("zoe").await?.is_none());
    assert!(h.storage().find_account_by_external(CHAT).await?.is_none());

    admin.execute_batch("DROP TRIGGER settings_unavailable;")?;
    h.say(CHAT, "/register").await;
    assert_eq!(h.say(CHAT, "zoe").await, vec![views::REGISTER_ASK_SECRET]);
    assert_eq!(h.say(CHAT, "password1").await, vec![views::registered("zoe")]);
    let linked = h.storage().find_account_by_external(CHAT).await?;
    assert_eq!(linked.map(|a| a.username), Some("zoe".to_string()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_restarting_work_closes_previous_interval() -> Result<()> {
    let h = Harness::new()?;
    h.register(CHAT, "ivan", "password1").await;

    h.say(CHAT, "/start_work").await;
    h.say(CHAT, "/start_work").await;
    assert_eq!(h.say(CHAT, "/stop_work").await, vec![views::WORK_STOPPED]);

    // A fresh database numbers intervals from 1
    for id in [1, 2] {
        let status = h.storage().work_session(id).await?.map(|s| s.status);
        assert_eq!(status, Some(WorkStatus::Stopped));
    }
    assert_eq!(h.say(CHAT, "/stop_work").await, vec![views::NO_ACTIVE_WORK]);
    Ok(())
}
