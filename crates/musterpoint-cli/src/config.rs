//! Configuration file management for musterpoint.
//!
//! Provides a TOML-based config file at `~/.config/musterpoint/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use musterpoint_db::config::DbConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
/// Header an authenticating reverse proxy (e.g. oauth2-proxy) sets.
pub const DEFAULT_IDENTITY_HEADER: &str = "X-Forwarded-Email";
pub const DEFAULT_LOGIN_URL: &str = "/oauth2/sign_in";
pub const DEFAULT_LOGOUT_URL: &str = "/oauth2/sign_out";

const ENV_DATABASE_URL: &str = "MUSTERPOINT_DATABASE_URL";
const ENV_IDENTITY_HEADER: &str = "MUSTERPOINT_IDENTITY_HEADER";
const ENV_LOGIN_URL: &str = "MUSTERPOINT_LOGIN_URL";
const ENV_LOGOUT_URL: &str = "MUSTERPOINT_LOGOUT_URL";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
    pub identity_header: String,
    pub login_url: String,
    pub logout_url: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            logout_url: DEFAULT_LOGOUT_URL.to_string(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the musterpoint config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/musterpoint` or
/// `~/.config/musterpoint`, also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("musterpoint");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("musterpoint")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load the config file if there is one.
///
/// A missing file is `None`; a file that cannot be read or parsed is an
/// error, never silently replaced by defaults.
pub fn load_config_if_present() -> Result<Option<ConfigFile>> {
    let path = config_path();
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    let config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // The database URL may carry a password.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Settings the web layer needs on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebConfig {
    pub identity_header: String,
    pub login_url: String,
    pub logout_url: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            logout_url: DEFAULT_LOGOUT_URL.to_string(),
        }
    }
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct MusterpointConfig {
    pub db_config: DbConfig,
    pub web: WebConfig,
    pub bind: String,
    pub port: u16,
}

/// Non-empty value of an environment variable.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl MusterpointConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `MUSTERPOINT_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Identity header, login and logout URLs: `MUSTERPOINT_*` env > `[server]` > default
    /// - Bind address and port: `[server]` > default (the `serve` flags override both)
    ///
    /// A config file that exists but does not parse is an error.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config_if_present()?;
        let server = file_config
            .as_ref()
            .map(|cfg| cfg.server.clone())
            .unwrap_or_default();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Some(url) = env_value(ENV_DATABASE_URL) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        let web = WebConfig {
            identity_header: env_value(ENV_IDENTITY_HEADER).unwrap_or(server.identity_header),
            login_url: env_value(ENV_LOGIN_URL).unwrap_or(server.login_url),
            logout_url: env_value(ENV_LOGOUT_URL).unwrap_or(server.logout_url),
        };

        Ok(Self {
            db_config: DbConfig::new(db_url),
            web,
            bind: server.bind,
            port: server.port,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
