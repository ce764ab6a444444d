use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ConfigLoader;
use crate::notify::{ConsoleNotifier, FixedPermission, NotificationCenter, NotificationPermission};
use crate::storage;

pub mod commands;

use self::commands::{AppContext, NoteArgs, OfflineArgs, ThemeArgs, TodoArgs, TodoCommand};

#[derive(Parser, Debug)]
#[command(
    name = "spaila",
    version,
    about = "Offline-first to-do list and notes"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over SPAILA_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over SPAILA_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage tasks (default: list them)
    Todo(TodoArgs),
    /// Manage notes
    Note(NoteArgs),
    /// Restore the most recently deleted task or note
    Undo,
    /// Show or change the colour theme
    Theme(ThemeArgs),
    /// Drive the offline asset cache
    Offline(OfflineArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("SPAILA_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("SPAILA_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let storage = storage::init(&paths, &config.storage)?;

    let permission = if config.notifications.allow_system {
        NotificationPermission::Granted
    } else {
        NotificationPermission::Denied
    };
    let center = Arc::new(NotificationCenter::new(
        Arc::new(ConsoleNotifier),
        Box::new(FixedPermission(permission)),
        config.notifications.clone(),
    ));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    let ctx = AppContext {
        config: Arc::new(config),
        paths,
        storage,
        center,
        runtime,
    };

    let command = cli.command.unwrap_or(Commands::Todo(TodoArgs {
        command: TodoCommand::List(Default::default()),
    }));
    match command {
        Commands::Todo(args) => commands::handle_todo_command(&ctx, args),
        Commands::Note(args) => commands::handle_note_command(&ctx, args),
        Commands::Undo => commands::undo_last(&ctx),
        Commands::Theme(args) => commands::handle_theme_command(&ctx, args),
        Commands::Offline(args) => commands::handle_offline_command(&ctx, args),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
