//! Server configuration module.
//!
//! Parses configuration from environment variables for the SmartServe server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SECRET_KEY` | Yes* | - | HS256 signing secret for session tokens |
//! | `PORT` | No | 8080 | HTTP server port |
//! | `SMARTSERVE_DEV_MODE` | No | false | Enable development fallbacks |
//! | `SMARTSERVE_TOKEN_TTL_SECS` | No | 86400 | Session token lifetime |
//! | `SMARTSERVE_USERS` | No | built-in roster | Format: `principal:orgId[:role],...` |
//! | `SMARTSERVE_SECRET_<PRINCIPAL>` | Yes* | - | Login secret for one principal |
//!
//! *Falls back to a development literal when `SMARTSERVE_DEV_MODE=true`
//!
//! `<PRINCIPAL>` is the principal id uppercased, with every character that is
//! not an ASCII letter or digit replaced by `_`.

use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::DEFAULT_TOKEN_TTL;
use crate::credentials::{CredentialRecord, Role};
use crate::restaurants::RestaurantSummary;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Signing secret used when `SMARTSERVE_DEV_MODE=true` and `SECRET_KEY` is unset.
const DEV_SECRET_KEY: &str = "dev-insecure-secret-key";

/// Prefix of the per-principal secret variables.
const SECRET_VAR_PREFIX: &str = "SMARTSERVE_SECRET_";

/// Demo restaurants provisioned when `SMARTSERVE_USERS` is unset.
///
/// `(principal, org_id, display name, development secret)`
const BUILTIN_ROSTER: &[(&str, i64, &str, &str)] = &[
    ("biryanis", 1, "Biryanis", "biryanis"),
    ("ammammagarillu", 2, "Ammamma Garillu", "ammammagarillu"),
    ("royalspice@smartserver.com", 3, "Royal Spice", "R0y@!$p!ce"),
    ("johndoe@example.com", 4, "John Doe's Kitchen", "J0hn!D0e#2024"),
    ("janedoe@example.com", 5, "Jane Doe's Diner", "J@neD03!24"),
    ("spicychicken@restaurant.com", 6, "Spicy Chicken", "Sp!cyCh!ck3n"),
    ("foodlover@mail.com", 7, "Food Lover", "F00dL0v3r#2024"),
    ("tastytreats@delights.com", 8, "Tasty Treats", "T@styTreaT$"),
    ("deliciousbites@foodies.com", 9, "Delicious Bites", "D3l!c10usB!t3s"),
    ("spicybiryani@spicydishes.com", 10, "Spicy Biryani", "Sp!cYB!rY@N!"),
];

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

impl ConfigError {
    fn invalid_format(var: &str, message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            var: var.to_string(),
            message: message.into(),
        }
    }
}

/// One provisioned principal before its secret is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Login name of the principal.
    pub principal_id: String,

    /// Organization the principal's tokens are bound to.
    pub org_id: i64,

    /// Role carried in issued tokens, if any.
    pub role: Option<Role>,

    /// Restaurant name shown in the directory.
    pub display_name: String,

    /// Secret used in development mode when the principal's variable is unset.
    pub dev_secret: String,
}

impl RosterEntry {
    /// Name of the environment variable holding this principal's secret.
    pub fn secret_var(&self) -> String {
        secret_var_name(&self.principal_id)
    }
}

/// Server configuration parsed from environment variables.
#[derive(Clone)]
pub struct Config {
    /// HS256 signing secret for session tokens.
    pub secret_key: String,

    /// HTTP server port.
    pub port: u16,

    /// When true, missing secrets fall back to development literals.
    pub dev_mode: bool,

    /// Lifetime of issued session tokens.
    pub token_ttl: Duration,

    /// Resolved staff credentials.
    pub credentials: Vec<CredentialRecord>,

    /// Restaurants listed by the directory endpoint.
    pub restaurants: Vec<RestaurantSummary>,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `SECRET_KEY` or a principal secret is missing outside development mode
    /// - `SMARTSERVE_USERS` is malformed or repeats a principal
    /// - `PORT` or `SMARTSERVE_TOKEN_TTL_SECS` is not a valid number
    ///
    /// # Example
    ///
    /// ```no_run
    /// use smartserve_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let dev_mode = parse_bool_env("SMARTSERVE_DEV_MODE");
        let port = parse_port()?;
        let token_ttl = parse_token_ttl()?;
        let secret_key = resolve_signing_secret(dev_mode)?;
        let roster = parse_roster()?;

        let credentials = roster
            .iter()
            .map(|entry| {
                let secret = resolve_principal_secret(entry, dev_mode)?;
                Ok(CredentialRecord::new(
                    entry.principal_id.clone(),
                    secret,
                    entry.org_id,
                    entry.role,
                ))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let restaurants = roster
            .iter()
            .map(|entry| RestaurantSummary::new(entry.org_id, entry.display_name.clone()))
            .collect();

        let config = Self {
            secret_key,
            port,
            dev_mode,
            token_ttl,
            credentials,
            restaurants,
        };

        config.validate()?;

        if config.dev_mode {
            warn!(
                "SMARTSERVE_DEV_MODE is enabled - development secrets may be in use. \
                 Do not use in production!"
            );
        }

        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "SECRET_KEY cannot be empty".to_string(),
            ));
        }

        if self.token_ttl.is_zero() {
            return Err(ConfigError::ValidationError(
                "token lifetime must be positive".to_string(),
            ));
        }

        if self.credentials.is_empty() {
            return Err(ConfigError::ValidationError(
                "no principals configured".to_string(),
            ));
        }

        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("secret_key", &"<redacted>")
            .field("port", &self.port)
            .field("dev_mode", &self.dev_mode)
            .field("token_ttl", &self.token_ttl)
            .field("credentials", &self.credentials)
            .field("restaurants", &self.restaurants)
            .finish()
    }
}

/// Returns the environment variable name holding `principal_id`'s secret.
///
/// ```rust
/// use smartserve_server::config::secret_var_name;
///
/// assert_eq!(
///     secret_var_name("royalspice@smartserver.com"),
///     "SMARTSERVE_SECRET_ROYALSPICE_SMARTSERVER_COM"
/// );
/// ```
pub fn secret_var_name(principal_id: &str) -> String {
    let normalized: String = principal_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{SECRET_VAR_PREFIX}{normalized}")
}

/// Returns the built-in demo roster.
pub fn builtin_roster() -> Vec<RosterEntry> {
    BUILTIN_ROSTER
        .iter()
        .map(|&(principal, org_id, name, dev_secret)| RosterEntry {
            principal_id: principal.to_string(),
            org_id,
            role: Some(Role::Admin),
            display_name: name.to_string(),
            dev_secret: dev_secret.to_string(),
        })
        .collect()
}

/// Parse a boolean environment variable.
///
/// Returns `true` if the variable is set to "true" (case-insensitive),
/// `false` otherwise.
fn parse_bool_env(name: &str) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Reads a variable, treating unset and empty as absent.
fn non_empty_env(name: &str) -> Result<Option<String>, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(Some(value)),
        Ok(_) | Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::invalid_format(
            name,
            "contains invalid unicode",
        )),
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match non_empty_env("PORT")? {
        Some(port_str) => Ok(port_str.trim().parse()?),
        None => Ok(DEFAULT_PORT),
    }
}

/// Parse SMARTSERVE_TOKEN_TTL_SECS, defaulting to 24 hours.
fn parse_token_ttl() -> Result<Duration, ConfigError> {
    const VAR: &str = "SMARTSERVE_TOKEN_TTL_SECS";

    let Some(raw) = non_empty_env(VAR)? else {
        return Ok(DEFAULT_TOKEN_TTL);
    };

    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid_format(VAR, format!("expected seconds, got '{raw}'")))?;

    if secs == 0 {
        return Err(ConfigError::invalid_format(VAR, "must be greater than zero"));
    }

    Ok(Duration::from_secs(secs))
}

/// Resolve the token signing secret.
fn resolve_signing_secret(dev_mode: bool) -> Result<String, ConfigError> {
    match non_empty_env("SECRET_KEY")? {
        Some(secret) => Ok(secret),
        None if dev_mode => {
            warn!("SECRET_KEY not set, using development signing secret");
            Ok(DEV_SECRET_KEY.to_string())
        }
        None => Err(ConfigError::MissingEnvVar("SECRET_KEY".to_string())),
    }
}

/// Resolve one principal's secret from its variable, or the development
/// fallback when allowed.
pub fn resolve_principal_secret(entry: &RosterEntry, dev_mode: bool) -> Result<String, ConfigError> {
    let var = entry.secret_var();
    match non_empty_env(&var)? {
        Some(secret) => Ok(secret),
        None if dev_mode => {
            debug!(principal = %entry.principal_id, var = %var, "Using development secret");
            Ok(entry.dev_secret.clone())
        }
        None => Err(ConfigError::MissingEnvVar(var)),
    }
}

/// Parse the SMARTSERVE_USERS environment variable.
///
/// Expected format: `principal:orgId[:role],principal:orgId[:role]`.
/// Falls back to the built-in roster when unset.
fn parse_roster() -> Result<Vec<RosterEntry>, ConfigError> {
    const VAR: &str = "SMARTSERVE_USERS";

    let Some(users_str) = non_empty_env(VAR)? else {
        return Ok(builtin_roster());
    };

    let mut roster = Vec::new();
    let mut seen = HashSet::new();
    let mut secret_vars: HashMap<String, String> = HashMap::new();

    for item in users_str.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let parts: Vec<&str> = item.split(':').map(str::trim).collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(ConfigError::invalid_format(
                VAR,
                format!("expected 'principal:orgId[:role]' format, got '{item}'"),
            ));
        }

        let principal = parts[0];
        if principal.is_empty() {
            return Err(ConfigError::invalid_format(VAR, "principal cannot be empty"));
        }

        let org_id: i64 = parts[1].parse().map_err(|_| {
            ConfigError::invalid_format(
                VAR,
                format!("orgId for '{principal}' must be an integer, got '{}'", parts[1]),
            )
        })?;

        let role = match parts.get(2) {
            Some(raw) if !raw.is_empty() => Some(
                raw.parse::<Role>()
                    .map_err(|err| ConfigError::invalid_format(VAR, err.to_string()))?,
            ),
            _ => None,
        };

        if !seen.insert(principal.to_string()) {
            return Err(ConfigError::invalid_format(
                VAR,
                format!("principal '{principal}' listed more than once"),
            ));
        }

        let secret_var = secret_var_name(principal);
        if let Some(other) = secret_vars.insert(secret_var.clone(), principal.to_string()) {
            return Err(ConfigError::invalid_format(
                VAR,
                format!("principals '{other}' and '{principal}' would share secret variable {secret_var}"),
            ));
        }

        roster.push(RosterEntry {
            principal_id: principal.to_string(),
            org_id,
            role,
            display_name: principal.to_string(),
            dev_secret: principal.to_string(),
        });
    }

    if roster.is_empty() {
        return Err(ConfigError::invalid_format(VAR, "no principals listed"));
    }

    Ok(roster)
}
