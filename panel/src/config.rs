use clap::{Parser, Subcommand};
use std::path::PathBuf;
use svcpanel_common::config::{load_config, save_config, PanelConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "svcpanel")]
#[command(about = "Control panel for a launchd-managed service")]
pub struct Args {
    /// Service definition plist
    #[arg(short, long)]
    pub descriptor: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the privileged helper binary location
    #[arg(long)]
    pub helper: Option<PathBuf>,

    /// Override the poll interval in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Generate default configuration file
    #[arg(long)]
    pub generate_config: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<PanelCommand>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    /// Poll once and print the observed status
    Status,
    /// Start the service if it is stopped
    Start,
    /// Stop the service if it is running
    Stop,
    /// Stop, unload and remove the service
    Uninstall,
    /// Poll on the configured interval, printing status transitions
    Watch,
}

pub fn load_panel_config(args: &Args) -> anyhow::Result<PanelConfig> {
    let mut config: PanelConfig = if let Some(config_path) = &args.config {
        let content = std::fs::read_to_string(config_path)?;
        toml::from_str(&content)?
    } else {
        load_config("panel.toml")?
    };

    // Override with command line arguments
    if let Some(helper) = &args.helper {
        config.helper.path = Some(helper.clone());
    }

    if let Some(interval) = args.poll_interval_ms {
        config.polling.interval_ms = interval;
    }

    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    Ok(config)
}

pub fn generate_default_config() -> anyhow::Result<()> {
    let config = PanelConfig::default();
    save_config(&config, "panel.toml")?;
    info!("Generated default configuration file: panel.toml");
    Ok(())
}

pub fn setup_logging(config: &PanelConfig) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true);

    if let Some(log_file) = &config.logging.file {
        let file_appender = tracing_appender::rolling::daily(
            log_file
                .parent()
                .unwrap_or_else(|| std::path::Path::new(".")),
            log_file
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("panel.log")),
        );
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    Ok(())
}
