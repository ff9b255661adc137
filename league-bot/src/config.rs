// Configuration loading and parsing (bot.toml, bot token from the environment).

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::{ChannelId, RoleId};
use crate::roles::{TeamBinding, TeamRoles};

/// Environment variable holding the bot authentication token.
pub const TOKEN_ENV_VAR: &str = "DISCORD_BOT_TOKEN";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },

    #[error("bot token missing: set the DISCORD_BOT_TOKEN environment variable")]
    MissingToken,
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub command_prefix: String,
    pub gateway_url: String,
    pub db_path: String,
    pub channels: ChannelConfig,
    pub permissions: PermissionsConfig,
    pub teams: TeamRoles,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelConfig {
    /// Where fine and bail notices are posted.
    pub fines: ChannelId,
    /// Where signings and releases are announced.
    pub announcements: ChannelId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PermissionsConfig {
    /// Roles allowed to issue fines. Empty means anyone may.
    #[serde(default)]
    pub fine_issuer_roles: Vec<RoleId>,
}

impl PermissionsConfig {
    pub fn may_issue_fines(&self, caller_roles: &[RoleId]) -> bool {
        self.fine_issuer_roles.is_empty()
            || self
                .fine_issuer_roles
                .iter()
                .any(|role| caller_roles.contains(role))
    }
}

// ---------------------------------------------------------------------------
// bot.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire bot.toml file.
#[derive(Debug, Clone, Deserialize)]
struct BotFile {
    bot: BotSection,
    gateway: GatewaySection,
    database: DatabaseSection,
    channels: ChannelConfig,
    #[serde(default)]
    permissions: PermissionsConfig,
    teams: Vec<TeamBinding>,
}

#[derive(Debug, Clone, Deserialize)]
struct BotSection {
    command_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewaySection {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/bot.toml` relative to the
/// given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("bot.toml");
    let text = read_file(&path)?;
    parse_config(&text, &path)
}

/// Parse and validate bot.toml contents. `path` is only used for error
/// messages.
pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let file: BotFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config = Config {
        command_prefix: file.bot.command_prefix,
        gateway_url: file.gateway.url,
        db_path: file.database.path,
        channels: file.channels,
        permissions: file.permissions,
        teams: TeamRoles::new(file.teams),
    };

    validate(&config)?;

    Ok(config)
}

/// Seed `config/bot.toml` from `defaults/bot.toml` when it does not exist
/// yet. Returns the path written, or `None` if a config was already present.
/// An existing config is never overwritten.
pub fn ensure_bot_config(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join("bot.toml");
    if target.is_file() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join("bot.toml");
    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "no config/bot.toml or defaults/bot.toml under {}",
                base_dir.display()
            ),
        });
    }

    let copy_failed = |e: std::io::Error| ConfigError::DefaultsCopyError {
        message: format!("failed to seed {}: {e}", target.display()),
    };
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(copy_failed)?;
    }
    std::fs::copy(&source, &target).map_err(copy_failed)?;

    Ok(Some(target))
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Seeds `config/bot.toml` from the defaults first if needed.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    if let Some(path) = ensure_bot_config(&cwd)? {
        tracing::info!("Created {} from defaults", path.display());
    }
    load_config_from(&cwd)
}

/// Read the bot token from [`TOKEN_ENV_VAR`].
pub fn token_from_env() -> Result<String, ConfigError> {
    resolve_token(std::env::var(TOKEN_ENV_VAR).ok())
}

/// Validate a raw token value. Blank tokens count as missing.
pub fn resolve_token(raw: Option<String>) -> Result<String, ConfigError> {
    match raw.map(|t| t.trim().to_string()) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(ConfigError::MissingToken),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let prefix = &config.command_prefix;
    if prefix.is_empty() || prefix.chars().any(char::is_whitespace) {
        return Err(invalid(
            "bot.command_prefix",
            "must be non-empty and contain no whitespace",
        ));
    }

    if config.gateway_url.trim().is_empty() {
        return Err(invalid("gateway.url", "must not be empty"));
    }

    if config.db_path.trim().is_empty() {
        return Err(invalid("database.path", "must not be empty"));
    }

    if config.channels.fines == 0 {
        return Err(invalid("channels.fines", "must be a channel id"));
    }
    if config.channels.announcements == 0 {
        return Err(invalid("channels.announcements", "must be a channel id"));
    }

    if config.teams.is_empty() {
        return Err(invalid("teams", "at least one team binding is required"));
    }

    let mut role_ids = HashSet::new();
    let mut names = HashSet::new();
    for binding in config.teams.bindings() {
        if binding.name.trim().is_empty() {
            return Err(invalid("teams.name", "must not be empty"));
        }
        if !role_ids.insert(binding.role_id) {
            return Err(invalid(
                "teams.role_id",
                format!("role {} is bound more than once", binding.role_id),
            ));
        }
        if !names.insert(binding.name.as_str()) {
            return Err(invalid(
                "teams.name",
                format!("team `{}` is bound more than once", binding.name),
            ));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
