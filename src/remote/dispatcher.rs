//! `Dispatcher`: maps a `QueuedMutation` to one `RemoteRequest` and sends it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::RemoteError;
use crate::types::{EntityType, MutationAction, QueuedMutation};

use super::{HttpMethod, RemoteRequest, RemoteTransport};

/// Entity type → collection path on the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMap {
    paths: HashMap<EntityType, String>,
}

impl Default for ResourceMap {
    fn default() -> Self {
        let mut paths = HashMap::new();
        paths.insert(EntityType::Patient, "/patients".to_string());
        paths.insert(EntityType::Appointment, "/appointments".to_string());
        paths.insert(EntityType::Reminder, "/reminders".to_string());
        paths.insert(EntityType::Visit, "/visits".to_string());
        Self { paths }
    }
}

impl ResourceMap {
    pub fn empty() -> Self {
        Self {
            paths: HashMap::new(),
        }
    }

    /// Register or override the path of an entity type.
    pub fn insert(&mut self, entity_type: EntityType, path: impl Into<String>) {
        let path: String = path.into();
        let normalized = format!("/{}", path.trim_matches('/'));
        self.paths.insert(entity_type, normalized);
    }

    pub fn with(mut self, entity_type: EntityType, path: impl Into<String>) -> Self {
        self.insert(entity_type, path);
        self
    }

    pub fn path_for(&self, entity_type: &EntityType) -> Option<&str> {
        self.paths.get(entity_type).map(String::as_str)
    }
}

pub struct Dispatcher {
    transport: Arc<dyn RemoteTransport>,
    resources: ResourceMap,
    id_field: String,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            transport,
            resources: ResourceMap::default(),
            id_field: "id".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_resources(mut self, resources: ResourceMap) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the request for `mutation` without sending it.
    pub fn request_for(&self, mutation: &QueuedMutation) -> Result<RemoteRequest, RemoteError> {
        let base = self
            .resources
            .path_for(&mutation.entity_type)
            .ok_or_else(|| {
                RemoteError::InvalidMutation(format!(
                    "no resource path for entity type {}",
                    mutation.entity_type
                ))
            })?;

        let request = match mutation.action {
            MutationAction::Create => RemoteRequest {
                method: HttpMethod::Post,
                path: base.to_string(),
                body: Some(mutation.payload.clone()),
            },
            MutationAction::Update => RemoteRequest {
                method: HttpMethod::Put,
                path: format!("{base}/{}", self.entity_id(mutation)?),
                body: Some(mutation.payload.clone()),
            },
            MutationAction::Delete => RemoteRequest {
                method: HttpMethod::Delete,
                path: format!("{base}/{}", self.entity_id(mutation)?),
                body: None,
            },
        };
        Ok(request)
    }

    /// The id becomes one path segment, so anything that would change the
    /// request's path, query or fragment is refused.
    fn entity_id(&self, mutation: &QueuedMutation) -> Result<String, RemoteError> {
        match mutation.payload.get(&self.id_field) {
            Some(Value::String(s)) if !s.is_empty() => {
                if s == "." || s == ".." || s.chars().any(is_reserved_in_segment) {
                    return Err(RemoteError::InvalidMutation(format!(
                        "{} {} has `{}` {s:?}, which is not a valid path segment",
                        mutation.entity_type, mutation.action, self.id_field
                    )));
                }
                Ok(s.clone())
            }
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(RemoteError::InvalidMutation(format!(
                "{} {} payload has no `{}`",
                mutation.entity_type, mutation.action, self.id_field
            ))),
        }
    }

    /// Send exactly one call for `mutation`. No retries happen here.
    pub async fn send(&self, mutation: &QueuedMutation) -> Result<(), RemoteError> {
        let request = self.request_for(mutation)?;
        debug!(
            mutation_id = %mutation.id,
            method = %request.method,
            path = %request.path,
            "dispatching mutation"
        );
        match tokio::time::timeout(self.timeout, self.transport.send(&request)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.timeout)),
        }
    }
}

fn is_reserved_in_segment(c: char) -> bool {
    matches!(c, '/' | '\\' | '?' | '#' | '%') || c.is_whitespace() || c.is_control()
}
