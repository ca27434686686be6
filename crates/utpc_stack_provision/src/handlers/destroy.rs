use std::collections::BTreeSet;
use std::mem;

use serde::Serialize;
use tracing::{debug, info};
use utpc_stack_core::{DeployPlan, ResourceRef};

use crate::adapters::control_plane::{ControlPlane, ProviderError};
use crate::handlers::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedResource {
    pub resource: ResourceRef,
    pub identity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DestroyReport {
    /// Provisioned resources the stack no longer declares, dependents first.
    pub pruned: Vec<DeletedResource>,
    /// In deletion order, which is reverse plan order.
    pub deleted: Vec<DeletedResource>,
    /// Planned resources the control plane did not know about.
    pub absent: Vec<ResourceRef>,
}

#[derive(Debug, thiserror::Error)]
pub enum DestroyError {
    #[error("listing provisioned resources failed: {source}")]
    ListFailure {
        #[source]
        source: ProviderError,
        report: DestroyReport,
    },
    #[error("deleting {resource} failed: {source}")]
    DeleteFailure {
        resource: ResourceRef,
        #[source]
        source: ProviderError,
        report: DestroyReport,
    },
}

impl DestroyError {
    pub fn report(&self) -> &DestroyReport {
        match self {
            Self::ListFailure { report, .. } | Self::DeleteFailure { report, .. } => report,
        }
    }
}

/// Deletes a stack in reverse plan order so dependents go before the
/// resources they reference.
pub struct Teardown<'a> {
    control_plane: &'a dyn ControlPlane,
    retry: RetryPolicy,
}

impl<'a> Teardown<'a> {
    pub fn new(control_plane: &'a dyn ControlPlane) -> Self {
        Self {
            control_plane,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deletes every provisioned resource missing from `declared`, dependents
    /// first. Declared resources are left untouched.
    pub fn prune(&self, declared: &[ResourceRef]) -> Result<DestroyReport, DestroyError> {
        let mut report = DestroyReport::default();
        self.delete_undeclared(declared, &mut report)?;
        info!(pruned = report.pruned.len(), "undeclared resources pruned");
        Ok(report)
    }

    /// Deletes resources the stack no longer declares, then the planned ones
    /// in reverse plan order.
    pub fn destroy(&self, plan: &DeployPlan) -> Result<DestroyReport, DestroyError> {
        let mut report = DestroyReport::default();
        self.delete_undeclared(&plan.resources(), &mut report)?;

        for planned in plan.teardown_order() {
            let resource = planned.resource_ref();
            let identity = match self.retry.run(&resource, || {
                self.control_plane.lookup(resource.kind, &resource.name)
            }) {
                Ok(identity) => identity,
                Err(source) => {
                    return Err(DestroyError::DeleteFailure {
                        resource,
                        source,
                        report,
                    })
                }
            };

            let Some(identity) = identity else {
                debug!(resource = %resource, "not provisioned, skipping");
                report.absent.push(resource);
                continue;
            };

            if let Err(source) = self.delete(&resource, &identity) {
                return Err(DestroyError::DeleteFailure {
                    resource,
                    source,
                    report,
                });
            }
            info!(resource = %resource, identity = %identity, "resource deleted");
            report.deleted.push(DeletedResource { resource, identity });
        }
        info!(
            pruned = report.pruned.len(),
            deleted = report.deleted.len(),
            absent = report.absent.len(),
            "stack destroyed"
        );
        Ok(report)
    }

    fn delete_undeclared(
        &self,
        declared: &[ResourceRef],
        report: &mut DestroyReport,
    ) -> Result<(), DestroyError> {
        let declared: BTreeSet<&ResourceRef> = declared.iter().collect();
        let provisioned = self
            .control_plane
            .list()
            .map_err(|source| DestroyError::ListFailure {
                source,
                report: mem::take(report),
            })?;

        // Descending kind rank: routes, functions, the API, layers, roles.
        for (resource, identity) in provisioned.into_iter().rev() {
            if declared.contains(&resource) {
                continue;
            }
            if let Err(source) = self.delete(&resource, &identity) {
                return Err(DestroyError::DeleteFailure {
                    resource,
                    source,
                    report: mem::take(report),
                });
            }
            info!(resource = %resource, identity = %identity, "undeclared resource deleted");
            report.pruned.push(DeletedResource { resource, identity });
        }
        Ok(())
    }

    fn delete(&self, resource: &ResourceRef, identity: &str) -> Result<(), ProviderError> {
        self.retry
            .run(resource, || self.control_plane.delete(resource.kind, identity))
    }
}
