use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};
use vitte_assistant::bot::{self, TelegramFileStore, TelegramOutbound};
use vitte_assistant::capabilities::CapabilityRegistry;
use vitte_assistant::config::Settings;
use vitte_assistant::credentials::hash_secret;
use vitte_assistant::engine::scheduler::spawn_timer_loop;
use vitte_assistant::engine::{AppContext, Engine};
use vitte_assistant::handlers::{build_router, timer_callbacks};
use vitte_assistant::storage::{NewAccount, Role, SqliteStorage, StorageProvider};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
    /// Configured secrets, matched literally
    secrets: Option<Regex>,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new(secrets: &[String]) -> Result<Self, regex::Error> {
        let secrets = if secrets.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = secrets.iter().map(|s| regex::escape(s)).collect();
            Some(Regex::new(&alternatives.join("|"))?)
        };
        Ok(Self {
            token1: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token2: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token3: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            secrets,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .token1
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .token2
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token3
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        if let Some(secrets) = &self.secrets {
            output = secrets.replace_all(&output, "[MASKED]").to_string();
        }
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length even if the redacted text differs
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Settings come first so their secrets can be redacted from the very first log line
    let settings = Settings::new().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;
    let patterns = Arc::new(RedactionPatterns::new(&settings.secrets()).map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting Vitte assistant...");

    let storage = init_storage(&settings)?;
    bootstrap_admin(storage.as_ref(), &settings).await;

    let capabilities = CapabilityRegistry::from_settings(&settings);
    let bot = Bot::new(settings.telegram_token.clone());
    let files = Arc::new(TelegramFileStore::new(bot.clone(), &settings.upload_dir));
    let outbound = Arc::new(TelegramOutbound::new(bot.clone()));

    let (app, timers) = AppContext::new(settings, storage, capabilities, files, outbound);
    let timer_loop = spawn_timer_loop(app.clone(), timer_callbacks(), timers);
    let engine = Engine::new(app, build_router()?);

    bot::run(bot, engine).await;
    timer_loop.abort();
    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_storage(settings: &Settings) -> Result<Arc<dyn StorageProvider>, Box<dyn std::error::Error>> {
    match SqliteStorage::open(&settings.database_path) {
        Ok(s) => {
            info!(path = %settings.database_path, "Storage initialized.");
            Ok(Arc::new(s))
        }
        Err(e) => {
            error!("Failed to initialize storage: {}", e);
            Err(e.into())
        }
    }
}

/// Create the configured administrator account if it does not exist yet
async fn bootstrap_admin(storage: &dyn StorageProvider, settings: &Settings) {
    let (Some(username), Some(password)) = (
        settings.bootstrap_admin_username.as_deref(),
        settings.bootstrap_admin_password.as_deref(),
    ) else {
        return;
    };

    match storage.find_credentials(username).await {
        Ok(Some(_)) => info!(username, "Bootstrap administrator already exists"),
        Ok(None) => {
            let account = NewAccount {
                username: username.to_string(),
                password_hash: hash_secret(password),
                role: Role::Admin,
                external_id: None,
            };
            match storage.create_account(account).await {
                Ok(account) => info!(account_id = account.id, username, "Bootstrap administrator created"),
                Err(e) => error!("Failed to create bootstrap administrator: {}", e),
            }
        }
        Err(e) => warn!("Failed to look up bootstrap administrator: {}", e),
    }
}
