use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utpc_stack_core::fingerprint::properties_fingerprint;
use utpc_stack_core::{IdentityMap, ResourceKind, ResourceRef};

use crate::adapters::control_plane::{Change, ControlPlane, ProviderError, Provisioned};

pub const LOCAL_ACCOUNT_ID: &str = "000000000000";
pub const LOCAL_REGION: &str = "local";

/// What the control plane remembers about one provisioned resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource: ResourceRef,
    pub identity: String,
    pub version: u32,
    pub fingerprint: String,
    pub properties: Value,
}

/// Spy entry for every call the control plane received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneCall {
    CreateOrUpdate {
        resource: ResourceRef,
        change: Change,
    },
    Delete {
        kind: ResourceKind,
        identity: String,
    },
    Rejected {
        resource: ResourceRef,
        transient: bool,
    },
}

impl ControlPlaneCall {
    /// True for calls that changed provisioned state.
    pub fn is_mutation(&self) -> bool {
        match self {
            Self::CreateOrUpdate { change, .. } => change.is_mutation(),
            Self::Delete { .. } => true,
            Self::Rejected { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    error: ProviderError,
    remaining: Option<u32>,
}

/// Control plane held entirely in memory.
///
/// Identities are ARN-shaped and stable per logical name. Layers are
/// versioned: changing a layer's properties publishes a new version with a
/// new identity, the way Lambda layer versions behave.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    records: Mutex<BTreeMap<ResourceRef, ResourceRecord>>,
    calls: Mutex<Vec<ControlPlaneCall>>,
    failures: Mutex<BTreeMap<ResourceRef, InjectedFailure>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = ResourceRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.resource.clone(), record))
            .collect();
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<ResourceRecord> {
        lock(&self.records).values().cloned().collect()
    }

    pub fn record(&self, resource: &ResourceRef) -> Option<ResourceRecord> {
        lock(&self.records).get(resource).cloned()
    }

    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn mutation_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.is_mutation())
            .count()
    }

    /// Resources mutated by create-or-update calls, in call order.
    pub fn mutated_resources(&self) -> Vec<ResourceRef> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                ControlPlaneCall::CreateOrUpdate { resource, change } if change.is_mutation() => {
                    Some(resource.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Every call touching `resource` fails with `error`.
    pub fn fail_on(&self, resource: ResourceRef, error: ProviderError) {
        lock(&self.failures).insert(
            resource,
            InjectedFailure {
                error,
                remaining: None,
            },
        );
    }

    /// The next `times` calls touching `resource` fail with `error`.
    pub fn fail_times(&self, resource: ResourceRef, error: ProviderError, times: u32) {
        if times == 0 {
            return;
        }
        lock(&self.failures).insert(
            resource,
            InjectedFailure {
                error,
                remaining: Some(times),
            },
        );
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    fn take_failure(&self, resource: &ResourceRef) -> Option<ProviderError> {
        let mut failures = lock(&self.failures);
        let failure = failures.get_mut(resource)?;
        let error = failure.error.clone();
        let exhausted = match &mut failure.remaining {
            None => false,
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
        };
        if exhausted {
            failures.remove(resource);
        }
        drop(failures);

        lock(&self.calls).push(ControlPlaneCall::Rejected {
            resource: resource.clone(),
            transient: error.is_transient(),
        });
        Some(error)
    }
}

impl ControlPlane for InMemoryControlPlane {
    fn create_or_update(
        &self,
        kind: ResourceKind,
        logical_name: &str,
        properties: &Value,
    ) -> Result<Provisioned, ProviderError> {
        let resource = ResourceRef::new(kind, logical_name);
        if let Some(error) = self.take_failure(&resource) {
            return Err(error);
        }

        let fingerprint = properties_fingerprint(properties);
        let mut records = lock(&self.records);
        let (identity, change) = match records.get_mut(&resource) {
            Some(record) if record.fingerprint == fingerprint => {
                (record.identity.clone(), Change::Unchanged)
            }
            Some(record) => {
                if kind == ResourceKind::Layer {
                    record.version += 1;
                    record.identity = provider_identity(kind, logical_name, record.version);
                }
                record.fingerprint = fingerprint;
                record.properties = properties.clone();
                (record.identity.clone(), Change::Updated)
            }
            None => {
                let identity = provider_identity(kind, logical_name, 1);
                records.insert(
                    resource.clone(),
                    ResourceRecord {
                        resource: resource.clone(),
                        identity: identity.clone(),
                        version: 1,
                        fingerprint,
                        properties: properties.clone(),
                    },
                );
                (identity, Change::Created)
            }
        };
        drop(records);

        lock(&self.calls).push(ControlPlaneCall::CreateOrUpdate { resource, change });
        Ok(Provisioned { identity, change })
    }

    fn delete(&self, kind: ResourceKind, identity: &str) -> Result<(), ProviderError> {
        let owner = lock(&self.records)
            .values()
            .find(|record| record.resource.kind == kind && record.identity == identity)
            .map(|record| record.resource.clone());

        if let Some(resource) = &owner {
            if let Some(error) = self.take_failure(resource) {
                return Err(error);
            }
            lock(&self.records).remove(resource);
        }

        lock(&self.calls).push(ControlPlaneCall::Delete {
            kind,
            identity: identity.to_string(),
        });
        Ok(())
    }

    fn lookup(
        &self,
        kind: ResourceKind,
        logical_name: &str,
    ) -> Result<Option<String>, ProviderError> {
        Ok(lock(&self.records)
            .get(&ResourceRef::new(kind, logical_name))
            .map(|record| record.identity.clone()))
    }

    fn list(&self) -> Result<IdentityMap, ProviderError> {
        Ok(lock(&self.records)
            .values()
            .map(|record| (record.resource.clone(), record.identity.clone()))
            .collect())
    }
}

/// ARN-shaped identity for a locally provisioned resource.
pub fn provider_identity(kind: ResourceKind, logical_name: &str, version: u32) -> String {
    match kind {
        ResourceKind::Role => format!("arn:aws:iam::{LOCAL_ACCOUNT_ID}:role/{logical_name}"),
        ResourceKind::Layer => format!(
            "arn:aws:lambda:{LOCAL_REGION}:{LOCAL_ACCOUNT_ID}:layer:{logical_name}:{version}"
        ),
        ResourceKind::Function => format!(
            "arn:aws:lambda:{LOCAL_REGION}:{LOCAL_ACCOUNT_ID}:function:{logical_name}"
        ),
        ResourceKind::Api => {
            format!("arn:aws:apigateway:{LOCAL_REGION}::/restapis/{logical_name}")
        }
        ResourceKind::Route => {
            let (method, path) = logical_name
                .split_once(' ')
                .unwrap_or(("ANY", logical_name));
            format!("arn:aws:execute-api:{LOCAL_REGION}:{LOCAL_ACCOUNT_ID}:route/{method}{path}")
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn repeated_identical_calls_are_unchanged() {
        let control_plane = InMemoryControlPlane::new();
        let first = control_plane
            .create_or_update(ResourceKind::Role, "utpcRole", &json!({"role_name": "utpcRole"}))
            .expect("create should pass");
        let second = control_plane
            .create_or_update(ResourceKind::Role, "utpcRole", &json!({"role_name": "utpcRole"}))
            .expect("update should pass");

        assert_eq!(first.change, Change::Created);
        assert_eq!(second.change, Change::Unchanged);
        assert_eq!(first.identity, second.identity);
        assert_eq!(control_plane.mutation_count(), 1);
    }

    #[test]
    fn changed_layer_publishes_new_version() {
        let control_plane = InMemoryControlPlane::new();
        let first = control_plane
            .create_or_update(ResourceKind::Layer, "mysqlconnector", &json!({"code_sha256": "a"}))
            .expect("create should pass");
        let second = control_plane
            .create_or_update(ResourceKind::Layer, "mysqlconnector", &json!({"code_sha256": "b"}))
            .expect("update should pass");

        assert_eq!(second.change, Change::Updated);
        assert!(first.identity.ends_with(":1"));
        assert!(second.identity.ends_with(":2"));
    }

    #[test]
    fn changed_function_keeps_identity() {
        let control_plane = InMemoryControlPlane::new();
        let first = control_plane
            .create_or_update(ResourceKind::Function, "utpcCreateDDL", &json!({"timeout_seconds": 60}))
            .expect("create should pass");
        let second = control_plane
            .create_or_update(ResourceKind::Function, "utpcCreateDDL", &json!({"timeout_seconds": 30}))
            .expect("update should pass");

        assert_eq!(second.change, Change::Updated);
        assert_eq!(first.identity, second.identity);
    }

    #[test]
    fn injected_failures_expire_after_requested_count() {
        let control_plane = InMemoryControlPlane::new();
        control_plane.fail_times(
            ResourceRef::role("utpcRole"),
            ProviderError::transient("throttled"),
            1,
        );

        let error = control_plane
            .create_or_update(ResourceKind::Role, "utpcRole", &json!({}))
            .expect_err("first call should fail");
        assert!(error.is_transient());
        control_plane
            .create_or_update(ResourceKind::Role, "utpcRole", &json!({}))
            .expect("second call should pass");
    }

    #[test]
    fn delete_removes_record_and_is_idempotent() {
        let control_plane = InMemoryControlPlane::new();
        let provisioned = control_plane
            .create_or_update(ResourceKind::Api, "utpcApi", &json!({}))
            .expect("create should pass");

        control_plane
            .delete(ResourceKind::Api, &provisioned.identity)
            .expect("delete should pass");
        control_plane
            .delete(ResourceKind::Api, &provisioned.identity)
            .expect("second delete should pass");

        assert_eq!(
            control_plane
                .lookup(ResourceKind::Api, "utpcApi")
                .expect("lookup should pass"),
            None
        );
    }

    #[test]
    fn list_returns_every_record_by_reference() {
        let control_plane = InMemoryControlPlane::new();
        control_plane
            .create_or_update(ResourceKind::Role, "utpcRole", &json!({}))
            .expect("create should pass");
        control_plane
            .create_or_update(ResourceKind::Route, "POST /utpcCreateDDL", &json!({}))
            .expect("create should pass");

        let listed = control_plane.list().expect("list should pass");
        let resources: Vec<&ResourceRef> = listed.keys().collect();
        assert_eq!(
            resources,
            vec![
                &ResourceRef::role("utpcRole"),
                &ResourceRef::route("POST /utpcCreateDDL")
            ]
        );
        assert_eq!(
            listed[&ResourceRef::role("utpcRole")],
            "arn:aws:iam::000000000000:role/utpcRole"
        );
    }

    #[test]
    fn route_identity_embeds_method_and_path() {
        assert_eq!(
            provider_identity(ResourceKind::Route, "POST /utpcDepositMoney", 1),
            "arn:aws:execute-api:local:000000000000:route/POST/utpcDepositMoney"
        );
    }
}
