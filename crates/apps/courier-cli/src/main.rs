//! Courier - command-line trigger surface for the sync and scheduling engine
//!
//! Every command prints its result as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use courier::{
    CredentialSupplier, EmailAddress, Engine, EngineConfig, GoogleCredentials, OutgoingMessage,
    Repository, SqliteRepository, StaticToken, StoredTokenSupplier, ThreadId, UserId,
    WorkingHoursPolicy,
};

/// Default database file in the data directory
const DB_FILE: &str = "courier.db";

#[derive(Parser)]
#[command(name = "courier", version, about = "Mailbox and calendar sync engine")]
struct Cli {
    /// User the rows are scoped to
    #[arg(long, global = true, default_value = "me", env = "COURIER_USER")]
    user: String,

    /// SQLite file (defaults to the Courier data directory)
    #[arg(long, global = true, env = "COURIER_DB")]
    db: Option<PathBuf>,

    /// Use a fixed bearer token instead of the stored OAuth token
    #[arg(long, global = true, env = "COURIER_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Incremental mail sync, or a full resync with --full
    SyncMail {
        #[arg(long)]
        full: bool,
    },
    /// Refresh the calendar horizon
    SyncCalendar,
    /// Propose meeting slots
    FreeSlots {
        /// Meeting length in minutes
        #[arg(long)]
        duration: i64,
        /// Days to search (default from config)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Store working hours
    WorkingHours {
        /// IANA timezone, e.g. Europe/Berlin
        #[arg(long)]
        tz: String,
        #[arg(long)]
        start: u8,
        #[arg(long)]
        end: u8,
        /// Working days, 0 = Sunday .. 6 = Saturday
        #[arg(long, value_delimiter = ',', default_value = "1,2,3,4,5")]
        days: Vec<u8>,
    },
    /// Mark every message of a thread read
    MarkRead { thread: String },
    /// Star (or with --off, unstar) a thread
    Star {
        thread: String,
        #[arg(long)]
        off: bool,
    },
    /// Send an HTML message
    Send {
        #[arg(long, required = true, value_delimiter = ',')]
        to: Vec<String>,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
        /// Thread to reply into
        #[arg(long)]
        thread: Option<String>,
    },
    /// Poll: sync mail and calendar whenever the cooldown has elapsed
    Watch {
        /// Seconds between checks
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    if let Err(e) = run(Cli::parse()) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig::load().context("Failed to load courier.json")?;
    let repo = open_repository(&cli)?;
    let credentials = credential_supplier(&cli, &config)?;
    let engine = Engine::with_google(credentials, repo, config)?;
    let user = UserId::new(cli.user.as_str());

    match cli.command {
        Command::SyncMail { full } => print_json(&engine.sync_mail(&user, full)?),
        Command::SyncCalendar => print_json(&engine.sync_calendar(&user)?),
        Command::FreeSlots { duration, days } => {
            print_json(&engine.find_free_slots(&user, duration, days)?)
        }
        Command::WorkingHours {
            tz,
            start,
            end,
            days,
        } => {
            let policy = WorkingHoursPolicy::new(&tz, start, end, days)?;
            engine.set_working_hours(&user, &policy)?;
            print_json(&policy)
        }
        Command::MarkRead { thread } => {
            print_json(&engine.mark_thread_read(&user, &ThreadId::new(thread))?)
        }
        Command::Star { thread, off } => {
            print_json(&engine.set_starred(&user, &ThreadId::new(thread), !off)?)
        }
        Command::Send {
            to,
            subject,
            body,
            thread,
        } => {
            let to = to.iter().map(|a| EmailAddress::parse(a)).collect();
            let message = OutgoingMessage::new(to, subject, body);
            let thread = thread.map(ThreadId::new);
            let id = engine.send_message(&message, thread.as_ref())?;
            print_json(&serde_json::json!({ "id": id }))
        }
        Command::Watch { interval } => watch(&engine, &user, Duration::from_secs(interval.max(1))),
    }
}

fn open_repository(cli: &Cli) -> Result<Arc<dyn Repository>> {
    let path = match &cli.db {
        Some(path) => path.clone(),
        None => config::data_path(DB_FILE).context("Could not determine data directory")?,
    };
    info!("Opening database at {}", path.display());
    Ok(Arc::new(SqliteRepository::open(&path)?))
}

fn credential_supplier(cli: &Cli, config: &EngineConfig) -> Result<Arc<dyn CredentialSupplier>> {
    if let Some(token) = &cli.token {
        return Ok(Arc::new(StaticToken::new(token.as_str())));
    }
    let credentials = GoogleCredentials::load().map_err(|e| {
        if let Some(path) = GoogleCredentials::default_credentials_path() {
            warn!(
                "To configure Google access, either:\n\
                 1. Place your Google OAuth credentials at: {}\n\
                 2. Or set environment variables: GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET",
                path.display()
            );
        }
        anyhow!("Google credentials not found: {e}")
    })?;
    Ok(Arc::new(StoredTokenSupplier::new(credentials, &config.token_url)?))
}

fn watch(engine: &Engine, user: &UserId, interval: Duration) -> Result<()> {
    info!("Polling every {}s for user {}", interval.as_secs(), user);
    loop {
        if engine.should_poll(user, Utc::now())? {
            match engine.sync_mail(user, false) {
                Ok(report) => print_json(&report)?,
                Err(e) if e.is_auth() => return Err(e.into()),
                Err(e) => warn!("Mail sync failed: {}", e),
            }
            match engine.sync_calendar(user) {
                Ok(report) => print_json(&report)?,
                Err(e) if e.is_auth() => return Err(e.into()),
                Err(e) => warn!("Calendar sync failed: {}", e),
            }
        }
        std::thread::sleep(interval);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
