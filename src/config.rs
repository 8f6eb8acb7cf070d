//! Engine configuration, loadable from TOML.
//!
//! Every field has a default, so an empty document yields a working engine:
//!
//! ```toml
//! sync_interval_secs = 120
//!
//! [retry]
//! max_retries = 5
//! on_exhausted = "park"
//!
//! [queue]
//! limit = { drop_oldest = 500 }
//!
//! [remote]
//! base_url = "https://clinic.example.org/api"
//! resources = { incentive = "/incentives" }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OfflineError, Result};
use crate::form_cache::ReplayPolicy;
use crate::queue::QueueLimit;
use crate::remote::ResourceMap;
use crate::sync::{Backoff, ExhaustedAction, RetryPolicy};
use crate::types::EntityType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Drain periodically and right after each enqueue. Reconnect drains and
    /// explicit triggers happen either way.
    #[serde(default = "default_true")]
    pub auto_sync: bool,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// How long a claimed item stays reserved for this process. Must exceed
    /// `request_timeout_secs`.
    #[serde(default = "default_lease")]
    pub lease_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub form_cache: FormCacheConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Zero disables backoff.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    #[serde(default)]
    pub on_exhausted: OnExhausted,
    #[serde(default = "default_true")]
    pub reject_is_permanent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnExhausted {
    #[default]
    DeadLetter,
    Park,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub limit: LimitConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitConfig {
    #[default]
    Unbounded,
    RejectNew(usize),
    DropOldest(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormCacheConfig {
    #[serde(default)]
    pub on_replay: OnReplay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnReplay {
    #[default]
    RetainFailed,
    ClearAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Used by the bundled HTTP transport. Custom transports ignore it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Entity type → path, layered over the built-in routes.
    #[serde(default)]
    pub resources: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_sync_interval() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    30
}

fn default_lease() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    2
}

fn default_backoff_max() -> u64 {
    300
}

fn default_id_field() -> String {
    "id".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_interval_secs: default_sync_interval(),
            request_timeout_secs: default_request_timeout(),
            lease_secs: default_lease(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
            form_cache: FormCacheConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            on_exhausted: OnExhausted::default(),
            reject_is_permanent: true,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            id_field: default_id_field(),
            resources: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| OfflineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OfflineError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            return Err(OfflineError::Config("sync_interval_secs must be > 0".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(OfflineError::Config("request_timeout_secs must be > 0".into()));
        }
        if self.lease_secs == 0 {
            return Err(OfflineError::Config("lease_secs must be > 0".into()));
        }
        if self.lease_secs <= self.request_timeout_secs {
            return Err(OfflineError::Config(format!(
                "lease_secs ({}) must exceed request_timeout_secs ({})",
                self.lease_secs, self.request_timeout_secs
            )));
        }
        if self.retry.backoff_base_secs > self.retry.backoff_max_secs {
            return Err(OfflineError::Config(
                "retry.backoff_base_secs exceeds retry.backoff_max_secs".into(),
            ));
        }
        match self.queue.limit {
            LimitConfig::RejectNew(0) | LimitConfig::DropOldest(0) => {
                return Err(OfflineError::Config("queue.limit must be > 0".into()));
            }
            _ => {}
        }
        if self.remote.id_field.is_empty() {
            return Err(OfflineError::Config("remote.id_field must not be empty".into()));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = (self.retry.backoff_base_secs > 0).then(|| Backoff {
            base: Duration::from_secs(self.retry.backoff_base_secs),
            max: Duration::from_secs(self.retry.backoff_max_secs),
        });
        RetryPolicy {
            max_retries: self.retry.max_retries,
            backoff,
            on_exhausted: match self.retry.on_exhausted {
                OnExhausted::DeadLetter => ExhaustedAction::DeadLetter,
                OnExhausted::Park => ExhaustedAction::Park,
            },
            reject_is_permanent: self.retry.reject_is_permanent,
        }
    }

    pub fn queue_limit(&self) -> QueueLimit {
        match self.queue.limit {
            LimitConfig::Unbounded => QueueLimit::Unbounded,
            LimitConfig::RejectNew(n) => QueueLimit::RejectNew(n),
            LimitConfig::DropOldest(n) => QueueLimit::DropOldest(n),
        }
    }

    pub fn replay_policy(&self) -> ReplayPolicy {
        match self.form_cache.on_replay {
            OnReplay::RetainFailed => ReplayPolicy::RetainFailed,
            OnReplay::ClearAll => ReplayPolicy::ClearAll,
        }
    }

    pub fn resource_map(&self) -> ResourceMap {
        let mut map = ResourceMap::default();
        for (entity, path) in &self.remote.resources {
            map.insert(EntityType::from(entity.as_str()), path.clone());
        }
        map
    }

    /// HTTP transport for `remote.base_url`.
    #[cfg(feature = "http")]
    pub fn http_transport(&self) -> Result<crate::remote::HttpTransport> {
        let base_url = self
            .remote
            .base_url
            .as_deref()
            .ok_or_else(|| OfflineError::Config("remote.base_url is not set".into()))?;
        Ok(crate::remote::HttpTransport::new(base_url).with_timeout(self.request_timeout()))
    }
}
