use anyhow::Context;
use clap::Parser;
use devmail_rs::config::{Config, LoggingConfig};
use devmail_rs::events::EventKind;
use devmail_rs::MailServer;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "devmail-rs", about = "Development mail capture server", version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if args.config.exists() {
        Config::from_file(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        Config::default()
    };

    init_tracing(&config.logging);

    info!("Starting devmail-rs");
    if !args.config.exists() {
        info!("No config file at {}, using defaults", args.config.display());
    }
    info!("  SMTP listening on: {}", config.smtp.listen_addr);
    info!("  Mail directory: {}", config.storage.mail_dir.display());
    if config.outgoing.is_enabled() {
        info!(
            "  Relay: {}:{} (auto-relay {})",
            config.outgoing.host,
            config.outgoing.effective_port(),
            if config.outgoing.auto_relay { "on" } else { "off" }
        );
    }

    let server = MailServer::new(config)
        .await
        .context("failed to initialize mail store")?;

    let restored = server.store().reload_from_directory().await?;
    info!("Restored {} email(s)", restored);

    server
        .events()
        .on(EventKind::New, |email| {
            info!(
                "New email {} from {}: {}",
                email.id, email.envelope.from, email.subject
            );
        })
        .await;
    server
        .events()
        .on(EventKind::Delete, |email| info!("Email {} deleted", email.id))
        .await;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("SMTP server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
        }
    }

    server.shutdown().await;
    Ok(())
}
