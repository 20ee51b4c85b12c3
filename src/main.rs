//! Contact Gateway
//!
//! A Rust SSH server that exposes a single interactive contact form.
//! Visitors connect with a plain SSH client, fill out the form line by
//! line, and the submission is forwarded to the portfolio site's contact
//! endpoint tagged as terminal-originated.

mod config;
mod contact;
mod form;
mod ssh;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use crate::config::ContactConfig;
use crate::contact::ContactClient;

/// Contact Gateway - SSH contact form for pcstyle.dev
#[derive(Parser, Debug)]
#[command(name = "contact-gateway", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/contact-gateway/config.toml")]
    config: PathBuf,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Override listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new(Level::DEBUG.to_string())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Handle --generate-config
    if cli.generate_config {
        let config = ContactConfig::default();
        let content = toml::to_string_pretty(&config)?;
        println!("{}", content);
        return Ok(());
    }

    // Load configuration: file, then environment, then CLI flags.
    let mut config = ContactConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    config.apply_env();

    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    config.ensure_dirs()?;

    info!("Starting contact-gateway");
    info!("  Listen address: {}", config.listen_addr);
    info!("  API endpoint: {}", config.api_url);
    info!(
        "  Authentication: {}",
        if config.password.is_some() {
            "password required"
        } else {
            "open access"
        }
    );
    if let Some((host, port)) = config.listen_addr.rsplit_once(':') {
        let host = if host == "0.0.0.0" { "localhost" } else { host };
        info!("  Connect with: ssh -p {} {}", port, host);
    }

    let config = Arc::new(config);

    let contact = Arc::new(ContactClient::new(
        config.api_url.clone(),
        Duration::from_secs(config.submit_timeout_secs),
    ));

    // Run until the listener fails or we get asked to stop.
    tokio::select! {
        result = ssh::run_server(config, contact) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
