use serde::{Deserialize, Serialize};
use serde_json::Value;
use utpc_stack_core::{IdentityMap, ResourceKind};

/// Outcome of one create-or-update call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

impl Change {
    pub fn is_mutation(self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioned {
    pub identity: String,
    pub change: Change,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    message: String,
    transient: bool,
}

impl ProviderError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    /// Throttling and similar failures where repeating the same call is safe.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

/// Idempotent resource API of the cloud control plane.
///
/// Resources are matched by `(kind, logical_name)`, never by a previously
/// generated identity, so the control plane's own records are the single
/// source of truth across runs.
pub trait ControlPlane: Send + Sync {
    fn create_or_update(
        &self,
        kind: ResourceKind,
        logical_name: &str,
        properties: &Value,
    ) -> Result<Provisioned, ProviderError>;

    fn delete(&self, kind: ResourceKind, identity: &str) -> Result<(), ProviderError>;

    fn lookup(&self, kind: ResourceKind, logical_name: &str)
        -> Result<Option<String>, ProviderError>;

    /// Every resource the control plane currently holds.
    fn list(&self) -> Result<IdentityMap, ProviderError>;
}
