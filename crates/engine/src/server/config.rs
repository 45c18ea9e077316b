//! Server configuration via `server.toml`
//!
//! The file is optional. When `<root>/server.toml` exists it is read on open;
//! otherwise defaults apply. The server never writes it.

use crate::background::DEFAULT_WORKER_NAME;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{CouchStyle, NamePolicy, PermittedChars, StrataError, StrataResult};

/// Config file name looked up in the server root.
pub const CONFIG_FILE_NAME: &str = "server.toml";

/// Grace delay between closing all databases and stopping the work queue.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 60;

/// Network client settings handed to collaborators unchanged.
///
/// The server stores and returns this value; it never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HttpClientConfig {
    /// User-Agent header sent by replication clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in milliseconds (default: 30000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Optional proxy URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_ms: default_timeout_ms(),
            proxy: None,
        }
    }
}

/// Built-in name policies selectable from the config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NamePolicyKind {
    /// `a-z 0-9 _ $ ( ) / + -` anywhere
    #[default]
    Permitted,
    /// Same set, first character must be `a-z`
    Couch,
}

impl NamePolicyKind {
    /// The policy this kind selects
    pub fn policy(self) -> Arc<dyn NamePolicy> {
        match self {
            NamePolicyKind::Permitted => Arc::new(PermittedChars),
            NamePolicyKind::Couch => Arc::new(CouchStyle),
        }
    }
}

/// Server configuration loaded from `server.toml`.
///
/// # Example
///
/// ```toml
/// grace_period_secs = 60
/// worker_name = "strata-queue"
/// name_policy = "permitted"
///
/// [http_client]
/// user_agent = "strata/0.1"
/// timeout_ms = 30000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Seconds between the close-all task and work queue shutdown.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Name of the work queue thread.
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
    /// Which characters database names may use.
    #[serde(default)]
    pub name_policy: NamePolicyKind,
    /// Initial default network client settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_client: Option<HttpClientConfig>,
}

fn default_grace_period_secs() -> u64 {
    DEFAULT_GRACE_PERIOD_SECS
}

fn default_worker_name() -> String {
    DEFAULT_WORKER_NAME.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            worker_name: default_worker_name(),
            name_policy: NamePolicyKind::default(),
            http_client: None,
        }
    }
}

impl ServerConfig {
    /// Grace delay as a `Duration`.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> StrataResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StrataError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            StrataError::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Read `<root>/server.toml` if present, defaults otherwise.
    pub fn load_or_default(root: &Path) -> StrataResult<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }
}
