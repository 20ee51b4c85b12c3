//! Gateway configuration loaded from TOML, with environment overrides.
//!
//! The deployment environment (Railway/Fly-style) configures the server
//! through `SSH_HOST`, `SSH_PORT` (falling back to `PORT`), `SSH_PASSWORD`
//! and `API_URL`; the TOML file covers everything else.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    /// SSH server listen address (default: "0.0.0.0:2222")
    pub listen_addr: String,

    /// Shared-secret password. `None` means open access: every
    /// connection is accepted without authenticating.
    pub password: Option<String>,

    /// Contact endpoint that receives finished submissions.
    pub api_url: String,

    /// Path to the SSH host key
    pub host_key_path: PathBuf,

    /// Timeout for the outbound submission request, in seconds.
    pub submit_timeout_secs: u64,
}

impl Default for ContactConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("contact-gateway");

        Self {
            listen_addr: "0.0.0.0:2222".to_string(),
            password: None,
            api_url: "http://localhost:3000/api/contact".to_string(),
            host_key_path: data_dir.join("host_key"),
            submit_timeout_secs: 10,
        }
    }
}

impl ContactConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from a file, or return defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment-variable overrides on top of the file config.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Same as [`apply_env`](Self::apply_env), but with an injectable
    /// variable lookup.
    pub fn apply_env_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        let host = var("SSH_HOST");
        // Platforms like Heroku assign PORT; SSH_PORT wins when both are set.
        let port = var("SSH_PORT").or_else(|| var("PORT"));
        if host.is_some() || port.is_some() {
            let (cur_host, cur_port) = self
                .listen_addr
                .rsplit_once(':')
                .map(|(h, p)| (h.to_string(), p.to_string()))
                .unwrap_or_else(|| (self.listen_addr.clone(), "2222".to_string()));
            self.listen_addr = format!(
                "{}:{}",
                host.unwrap_or(cur_host),
                port.unwrap_or(cur_port)
            );
        }

        if let Some(password) = var("SSH_PASSWORD") {
            self.password = if password.is_empty() {
                None
            } else {
                Some(password)
            };
        }

        if let Some(url) = var("API_URL") {
            self.api_url = url;
        }
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        if let Some(parent) = self.host_key_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create host key directory: {}", parent.display())
            })?;
        }
        Ok(())
    }
}
