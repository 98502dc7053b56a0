mod messenger;
mod reminders;
mod scheduler;

use chime_core::{access::AccessFilter, config};
use chime_store::Store;
use clap::{Parser, Subcommand};
use reminders::ReminderManager;
use scheduler::TimerEngine;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "chime",
    version,
    about = "Chime — reminder and alarm scheduling daemon"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the reminder daemon.
    Start,
    /// Show configuration and stored reminder count.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    // Keep the appender guard alive for the life of the process.
    let _log_guard = init_logging(&cfg);

    match cli.command {
        Commands::Start => {
            let tz = cfg.bot.tz()?;

            // Fail fast on bad access patterns; the filter itself is applied
            // by the command layer in front of the manager.
            let access = AccessFilter::new(&cfg.access)?;
            info!("access filter ready: {access}");

            let store = Store::new(&cfg.storage, &cfg.bot.timezone).await?;
            let engine = TimerEngine::new();
            let manager = ReminderManager::new(
                engine.clone(),
                store,
                Arc::new(messenger::LogMessenger),
            );

            // Recovery rebuilds every job before the engine begins firing,
            // so overdue callbacks cannot run against half-restored state.
            let restored = manager.restore().await?;
            engine.start();

            info!(
                "chime daemon running | timezone: {tz} | reminders restored: {restored}"
            );

            tokio::signal::ctrl_c().await?;
            info!("received shutdown signal");
        }
        Commands::Status => {
            println!("Chime — Status\n");
            println!("Config: {}", cli.config);
            println!("Bot name: {}", cfg.bot.name);
            println!("Timezone: {}", cfg.bot.timezone);
            println!("Database: {}", cfg.storage.db_path);

            let store = Store::new(&cfg.storage, &cfg.bot.timezone).await?;
            let count = store.count_reminders().await?;
            println!("Stored reminders: {count}");
        }
    }

    Ok(())
}

/// Initialize tracing with the configured level; optionally tee to a file.
fn init_logging(cfg: &config::Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.logging.level.clone()));

    if cfg.logging.file.enabled {
        let path = std::path::Path::new(&cfg.logging.file.path);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => std::path::Path::new("."),
        };
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chime.log".to_string());

        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}
