use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use keeper_bot::application::errors::BotError;
use keeper_bot::application::services::{reconciler, HostService};
use keeper_bot::domain::traits::{ConfigStore, Platform};
use keeper_bot::infrastructure::adapters::{ConsoleAdapter, TelegramAdapter};
use keeper_bot::infrastructure::config::{BotOverrides, PlatformKind, Snapshot};
use keeper_bot::infrastructure::storage::{MemoryConfigStore, YamlConfigStore};
use keeper_bot::plugins::builtin_catalog;

#[derive(Parser)]
#[command(name = "keeper-bot")]
#[command(about = "A chat bot host built from hot-reloadable plugins", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Bot token (overrides config)
    #[arg(short, long)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
    /// List the plugins compiled into this binary
    Plugins,
    /// Show the lifecycle operations between two config files
    Plan { old: String, new: String },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run => run_bot(&cli.config, cli.token),
        Commands::Version => {
            println!("keeper-bot v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::InitConfig => init_config(&cli.config),
        Commands::Plugins => {
            list_plugins();
            Ok(())
        }
        Commands::Plan { old, new } => print_plan(&old, &new),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run_bot(config_path: &str, token_override: Option<String>) -> Result<(), BotError> {
    let rt = tokio::runtime::Runtime::new().map_err(|e| BotError::Internal(e.to_string()))?;
    rt.block_on(async {
        let store: Arc<dyn ConfigStore> = if Path::new(config_path).exists() {
            Arc::new(YamlConfigStore::new(config_path))
        } else {
            warn!("{} not found, using built-in defaults", config_path);
            Arc::new(MemoryConfigStore::new(Snapshot::template()))
        };
        let overrides = BotOverrides::from_env().with_token(token_override);

        let bot = overrides.apply(&store.load().await?.bot);
        info!("Starting keeper-bot: {}", bot.name);

        let platform: Arc<dyn Platform> = match bot.platform {
            PlatformKind::Telegram => {
                let token = bot
                    .token
                    .clone()
                    .ok_or_else(|| BotError::Auth("telegram platform needs bot.token".to_string()))?;
                Arc::new(TelegramAdapter::new(token, bot.prefix.clone()))
            }
            PlatformKind::Console => Arc::new(ConsoleAdapter::new(bot.name.clone(), bot.prefix.clone())),
        };

        let host = Arc::new(HostService::new(platform, builtin_catalog(), store).with_overrides(overrides));
        let report = host.start().await?;
        for failure in &report.failed {
            warn!(plugin = %failure.op.name(), "Plugin did not start: {}", failure.error);
        }

        tokio::spawn(watch_signals(host.clone()));
        let run_result = host.clone().run().await;
        host.shutdown().await?;
        run_result
    })
}

/// Ctrl-C stops the host; SIGHUP re-reads the config file
async fn watch_signals(host: Arc<HostService>) {
    let shutdown = host.shutdown_token();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!("Cannot listen for SIGHUP: {}", e);
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown.cancel();
                }
                return;
            }
        };

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    shutdown.cancel();
                    return;
                }
                _ = hangup.recv() => match host.reload_config().await {
                    Ok(report) => info!(
                        applied = report.applied.len(),
                        failed = report.failed.len(),
                        restart_required = report.restart_required,
                        "Configuration reloaded"
                    ),
                    Err(e) => error!("Configuration reload failed: {}", e),
                },
                _ = shutdown.cancelled() => return,
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }
        let _ = host;
    }
}

fn init_config(path: &str) -> Result<(), BotError> {
    let yaml = Snapshot::template().to_yaml_string()?;
    if Path::new(path).exists() {
        println!("{}", yaml);
        println!("\n{} already exists; not overwriting. Template printed above.", path);
        return Ok(());
    }
    std::fs::write(path, yaml).map_err(|e| BotError::Storage(e.into()))?;
    println!("Wrote default config to {}", path);
    Ok(())
}

fn list_plugins() {
    let catalog = builtin_catalog();
    println!("Available plugins:");
    for name in catalog.names() {
        let description = catalog
            .create(name)
            .map(|p| p.description().to_string())
            .unwrap_or_default();
        println!("  {} - {}", name, description);
    }
}

fn print_plan(old: &str, new: &str) -> Result<(), BotError> {
    let old = Snapshot::load(old)?;
    let new = Snapshot::load(new)?;
    let plan = reconciler::plan(&old, &new);

    if plan.is_empty() {
        println!("No plugin changes");
    }
    for op in &plan.ops {
        println!("{}", op);
    }
    if plan.restart_required {
        println!("bot section changed: restart required");
    }
    Ok(())
}
