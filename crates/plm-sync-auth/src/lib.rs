//! Session management for the Arena PLM client.
//!
//! This crate resolves credentials from the host's secret store and caches
//! the session token returned by a successful login, with a configurable
//! TTL. It knows nothing about HTTP: the actual login/logout request is
//! performed by whatever implements [`Authenticator`], keeping this crate's
//! dependency footprint to resolution and caching logic that an HTTP-aware
//! caller drives.
//!
//! # Example
//!
//! ```
//! use plm_sync_auth::{Authenticator, Credentials, LoginResponse, SessionManager};
//! use plm_sync_types::PlmError;
//!
//! struct FakeAuthenticator;
//! impl Authenticator for FakeAuthenticator {
//!     fn login(&self, creds: &Credentials) -> Result<LoginResponse, PlmError> {
//!         Ok(LoginResponse {
//!             token: "tok-123".to_string(),
//!             workspace_id: creds.workspace_id.clone(),
//!         })
//!     }
//!     fn logout(&self, _token: &str) -> Result<(), PlmError> {
//!         Ok(())
//!     }
//! }
//!
//! let creds = Credentials {
//!     email: "user@example.com".to_string(),
//!     password: "secret".to_string(),
//!     workspace_id: "ws-1".to_string(),
//!     api_base: "https://api.arenasolutions.com".to_string(),
//! };
//! let manager = SessionManager::new(creds, FakeAuthenticator);
//! let token = manager.session().expect("session");
//! assert_eq!(token, "tok-123");
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use plm_sync_types::PlmError;
use serde::Deserialize;

/// Environment variable names consulted before the secrets file.
pub const ARENA_EMAIL_ENV: &str = "ARENA_EMAIL";
pub const ARENA_PASSWORD_ENV: &str = "ARENA_PASSWORD";
pub const ARENA_WORKSPACE_ID_ENV: &str = "ARENA_WORKSPACE_ID";
pub const ARENA_API_BASE_ENV: &str = "ARENA_API_BASE";

/// Default secrets file name, analogous to Cargo's `credentials.toml`.
pub const SECRETS_FILE: &str = "arena-credentials.toml";

/// Default session TTL.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(6 * 3600);

/// Resolved credentials needed to open a PLM session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub workspace_id: String,
    pub api_base: String,
}

#[derive(Debug, Deserialize, Default)]
struct SecretsFile {
    #[serde(default)]
    arena_email: Option<String>,
    #[serde(default)]
    arena_password: Option<String>,
    #[serde(default)]
    arena_workspace_id: Option<String>,
    #[serde(default)]
    arena_api_base: Option<String>,
}

/// Resolve credentials: environment variables take precedence over the
/// secrets file at `config_home/arena-credentials.toml`.
///
/// Fails with [`PlmError::Configuration`] if any of the four required
/// fields cannot be resolved from either source.
pub fn resolve_credentials(config_home: Option<&Path>) -> Result<Credentials, PlmError> {
    let file = read_secrets_file(config_home).unwrap_or_default();

    let email = env::var(ARENA_EMAIL_ENV).ok().or(file.arena_email);
    let password = env::var(ARENA_PASSWORD_ENV).ok().or(file.arena_password);
    let workspace_id = env::var(ARENA_WORKSPACE_ID_ENV).ok().or(file.arena_workspace_id);
    let api_base = env::var(ARENA_API_BASE_ENV).ok().or(file.arena_api_base);

    let mut missing = Vec::new();
    if email.is_none() {
        missing.push(ARENA_EMAIL_ENV);
    }
    if password.is_none() {
        missing.push(ARENA_PASSWORD_ENV);
    }
    if workspace_id.is_none() {
        missing.push(ARENA_WORKSPACE_ID_ENV);
    }
    if api_base.is_none() {
        missing.push(ARENA_API_BASE_ENV);
    }
    if !missing.is_empty() {
        return Err(PlmError::Configuration(format!(
            "missing credentials: {}",
            missing.join(", ")
        )));
    }

    Ok(Credentials {
        email: email.unwrap(),
        password: password.unwrap(),
        workspace_id: workspace_id.unwrap(),
        api_base: api_base.unwrap(),
    })
}

fn config_home_path(config_home: Option<&Path>) -> PathBuf {
    if let Some(path) = config_home {
        return path.to_path_buf();
    }
    if let Some(home) = dirs::config_dir() {
        return home.join("plm-sync");
    }
    PathBuf::from(".plm-sync")
}

fn read_secrets_file(config_home: Option<&Path>) -> Option<SecretsFile> {
    let path = config_home_path(config_home).join(SECRETS_FILE);
    if !path.exists() {
        return None;
    }
    let content = std::fs::read_to_string(&path).ok()?;
    toml::from_str(&content).ok()
}

/// A successful login response: session token plus the workspace id the
/// server actually bound the session to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub token: String,
    pub workspace_id: String,
}

/// Performs the actual network login/logout. Implemented by the HTTP client
/// crate so that `plm-sync-auth` stays transport-free.
pub trait Authenticator {
    fn login(&self, credentials: &Credentials) -> Result<LoginResponse, PlmError>;
    fn logout(&self, token: &str) -> Result<(), PlmError>;
}

#[derive(Debug, Clone)]
struct CachedSession {
    token: String,
    acquired_at: DateTime<Utc>,
}

/// Caches a session token with a TTL and re-authenticates on expiry.
///
/// `session()` is the only entry point callers need: it returns a fresh
/// token, authenticating at most once per call.
pub struct SessionManager<A: Authenticator> {
    credentials: Credentials,
    ttl: Duration,
    cache: Mutex<Option<CachedSession>>,
    authenticator: A,
}

impl<A: Authenticator> SessionManager<A> {
    pub fn new(credentials: Credentials, authenticator: A) -> Self {
        Self {
            credentials,
            ttl: DEFAULT_SESSION_TTL,
            cache: Mutex::new(None),
            authenticator,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Return a fresh session token, authenticating if the cache is empty or
    /// stale.
    pub fn session(&self) -> Result<String, PlmError> {
        {
            let guard = self.cache.lock().expect("session cache poisoned");
            if let Some(cached) = guard.as_ref() {
                let age = Utc::now().signed_duration_since(cached.acquired_at);
                if age.num_seconds() >= 0 && (age.num_seconds() as u64) < self.ttl.as_secs() {
                    return Ok(cached.token.clone());
                }
            }
        }
        self.reauthenticate()
    }

    /// Force a fresh login, bypassing the cache (used after a 401).
    pub fn reauthenticate(&self) -> Result<String, PlmError> {
        let response = self.authenticator.login(&self.credentials)?;
        if response.workspace_id != self.credentials.workspace_id {
            return Err(PlmError::WorkspaceMismatch {
                configured: self.credentials.workspace_id.clone(),
                returned: response.workspace_id,
            });
        }

        let mut guard = self.cache.lock().expect("session cache poisoned");
        *guard = Some(CachedSession {
            token: response.token.clone(),
            acquired_at: Utc::now(),
        });
        Ok(response.token)
    }

    /// Clear the cached session and best-effort log out server-side.
    /// Errors during logout are logged, never propagated.
    pub fn logout(&self) {
        let token = {
            let mut guard = self.cache.lock().expect("session cache poisoned");
            guard.take().map(|s| s.token)
        };
        if let Some(token) = token {
            if let Err(err) = self.authenticator.logout(&token) {
                log::warn!("logout failed (ignored): {err}");
            }
        }
    }
}

/// Mask a token for safe display (show first 4 and last 4 chars).
pub fn mask_token(token: &str) -> String {
    if token.len() <= 8 {
        return "*".repeat(token.len());
    }
    format!("{}****{}", &token[..4], &token[token.len() - 4..])
}
