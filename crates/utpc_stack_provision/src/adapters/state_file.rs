use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use utpc_stack_core::{IdentityMap, ResourceKind};

use crate::adapters::control_plane::{ControlPlane, ProviderError, Provisioned};
use crate::adapters::memory::{InMemoryControlPlane, ResourceRecord};

pub const STATE_SCHEMA_VERSION: &str = "v1";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to read state file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file '{path}' is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("state file '{path}' has schema {found}, expected {}", STATE_SCHEMA_VERSION)]
    Schema { path: PathBuf, found: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StateDocument {
    schema_version: String,
    updated_at: String,
    resources: Vec<ResourceRecord>,
}

/// In-memory control plane whose records are persisted to a JSON file after
/// every mutation, so repeated CLI runs match resources from earlier runs.
#[derive(Debug)]
pub struct StateFileControlPlane {
    path: PathBuf,
    inner: InMemoryControlPlane,
    /// Serializes writers when plan levels are applied in parallel.
    write_lock: Mutex<()>,
}

impl StateFileControlPlane {
    /// Loads `path` if it exists; a missing file is an empty control plane.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let inner = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| StateError::Read {
                path: path.clone(),
                source,
            })?;
            let document: StateDocument =
                serde_json::from_str(&raw).map_err(|source| StateError::Malformed {
                    path: path.clone(),
                    source,
                })?;
            if document.schema_version != STATE_SCHEMA_VERSION {
                return Err(StateError::Schema {
                    path,
                    found: document.schema_version,
                });
            }
            debug!(path = %path.display(), resources = document.resources.len(), "state loaded");
            InMemoryControlPlane::from_records(document.resources)
        } else {
            InMemoryControlPlane::new()
        };
        Ok(Self {
            path,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> Vec<ResourceRecord> {
        self.inner.records()
    }

    fn persist(&self) -> Result<(), ProviderError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let document = StateDocument {
            schema_version: STATE_SCHEMA_VERSION.to_string(),
            updated_at: Utc::now().to_rfc3339(),
            resources: self.inner.records(),
        };
        let body = serde_json::to_vec_pretty(&document)
            .map_err(|error| ProviderError::fatal(format!("failed to encode state: {error}")))?;

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|error| {
                ProviderError::fatal(format!(
                    "failed to create state directory '{}': {error}",
                    parent.display()
                ))
            })?;
        }

        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, body)
            .and_then(|()| fs::rename(&staging, &self.path))
            .map_err(|error| {
                ProviderError::fatal(format!(
                    "failed to write state file '{}': {error}",
                    self.path.display()
                ))
            })
    }
}

impl ControlPlane for StateFileControlPlane {
    fn create_or_update(
        &self,
        kind: ResourceKind,
        logical_name: &str,
        properties: &Value,
    ) -> Result<Provisioned, ProviderError> {
        let provisioned = self.inner.create_or_update(kind, logical_name, properties)?;
        if provisioned.change.is_mutation() {
            self.persist()?;
        }
        Ok(provisioned)
    }

    fn delete(&self, kind: ResourceKind, identity: &str) -> Result<(), ProviderError> {
        self.inner.delete(kind, identity)?;
        self.persist()
    }

    fn lookup(
        &self,
        kind: ResourceKind,
        logical_name: &str,
    ) -> Result<Option<String>, ProviderError> {
        self.inner.lookup(kind, logical_name)
    }

    fn list(&self) -> Result<IdentityMap, ProviderError> {
        self.inner.list()
    }
}
