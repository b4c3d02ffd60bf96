//! Access tokens and the persisted refresh-token cache

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Seconds before real expiry at which a token is treated as expired.
const EXPIRY_BUFFER_SECS: u64 = 300;

pub(crate) fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Bearer token minted for one scope.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    /// Unix timestamp (seconds)
    pub expires_on: u64,
}

impl AccessToken {
    pub fn new(token: String, expires_in_secs: u64) -> Self {
        Self {
            token,
            expires_on: now_secs() + expires_in_secs,
        }
    }

    pub fn expiring_at(token: String, expires_on: u64) -> Self {
        Self { token, expires_on }
    }

    pub fn is_expired(&self) -> bool {
        // Consider expired if less than 5 minutes remaining
        now_secs() + EXPIRY_BUFFER_SECS >= self.expires_on
    }

    pub fn expires_on_utc(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.expires_on as i64, 0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[redacted]")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Identifies one cached login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub environment: String,
    pub client_id: String,
    pub tenant: String,
}

/// A refresh token written by an interactive login for reuse by later runs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedLogin {
    pub environment: String,
    pub client_id: String,
    pub tenant: String,
    pub refresh_token: String,
    /// Tenant the signed-in user belongs to, when known
    pub home_tenant: Option<String>,
    pub updated_at: u64,
}

impl CachedLogin {
    pub fn new(key: &CacheKey, refresh_token: String, home_tenant: Option<String>) -> Self {
        Self {
            environment: key.environment.clone(),
            client_id: key.client_id.clone(),
            tenant: key.tenant.clone(),
            refresh_token,
            home_tenant,
            updated_at: now_secs(),
        }
    }

    fn matches(&self, key: &CacheKey) -> bool {
        self.environment == key.environment
            && self.client_id.eq_ignore_ascii_case(&key.client_id)
            && self.tenant.eq_ignore_ascii_case(&key.tenant)
    }
}

impl fmt::Debug for CachedLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedLogin")
            .field("environment", &self.environment)
            .field("client_id", &self.client_id)
            .field("tenant", &self.tenant)
            .field("refresh_token", &"[redacted]")
            .field("home_tenant", &self.home_tenant)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    logins: Vec<CachedLogin>,
}

/// On-disk refresh-token cache shared by every invocation of this tool.
///
/// Rewrites go through a temp file and a rename, so concurrent readers see
/// either the old or the new file and the last writer wins.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Platform cache directory, e.g. `~/.cache/azure-login/token_cache.toml`
    pub fn default_location() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "azure-login", "azure-login")
            .context("Could not determine cache directory")?;
        Ok(Self::at(proj_dirs.cache_dir().join("token_cache.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<CachedLogin>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).context("Failed to read token cache")?;
        let file: CacheFile = toml::from_str(&content).context("Failed to parse token cache")?;
        Ok(file.logins)
    }

    pub fn find(&self, key: &CacheKey) -> Result<Option<CachedLogin>> {
        Ok(self.load()?.into_iter().find(|login| login.matches(key)))
    }

    /// Insert or replace the entry for the login's key.
    pub fn store(&self, login: CachedLogin) -> Result<()> {
        let key = CacheKey {
            environment: login.environment.clone(),
            client_id: login.client_id.clone(),
            tenant: login.tenant.clone(),
        };
        let mut logins = self.load().unwrap_or_else(|e| {
            tracing::warn!("Discarding unreadable token cache: {:#}", e);
            Vec::new()
        });
        logins.retain(|existing| !existing.matches(&key));
        logins.push(login);
        self.write(&CacheFile { logins })
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).context("Failed to remove token cache")?;
        }
        Ok(())
    }

    fn write(&self, file: &CacheFile) -> Result<()> {
        let dir = self
            .path
            .parent()
            .context("Token cache path has no parent directory")?;
        fs::create_dir_all(dir).context("Failed to create cache directory")?;

        let content = toml::to_string_pretty(file).context("Failed to serialize token cache")?;
        let tmp = dir.join(format!(".token_cache.{}.tmp", uuid::Uuid::new_v4()));
        let mut out = create_private(&tmp)?;
        out.write_all(content.as_bytes())
            .and_then(|_| out.sync_all())
            .context("Failed to write token cache")?;
        drop(out);

        fs::rename(&tmp, &self.path).context("Failed to replace token cache")?;
        Ok(())
    }
}

/// Create a new file readable only by the owner (contains refresh tokens).
fn create_private(path: &Path) -> Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))
}
