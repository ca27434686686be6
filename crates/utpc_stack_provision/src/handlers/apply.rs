use std::sync::{Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info};
use utpc_stack_core::{IdentityMap, ResolvedPlan, ResolvedStep, ResourceKind, ResourceRef};

use crate::adapters::control_plane::{Change, ControlPlane, ProviderError};
use crate::handlers::retry::RetryPolicy;
use crate::handlers::routes::{ApiRouteBinder, BindError, BindFailure};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedResource {
    pub position: usize,
    pub resource: ResourceRef,
    /// For routes this is the target function's identity.
    pub identity: String,
    pub change: Change,
}

/// Everything provisioned so far, in plan order. Also carried by every
/// `ApplyError` so callers can see which resources remain in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub applied: Vec<AppliedResource>,
    pub identities: IdentityMap,
}

impl ApplyReport {
    fn record(&mut self, applied: AppliedResource) {
        self.identities
            .insert(applied.resource.clone(), applied.identity.clone());
        self.applied.push(applied);
    }

    pub fn identity(&self, resource: &ResourceRef) -> Option<&str> {
        self.identities.get(resource).map(String::as_str)
    }

    pub fn is_applied(&self, resource: &ResourceRef) -> bool {
        self.identities.contains_key(resource)
    }

    pub fn mutations(&self) -> usize {
        self.applied
            .iter()
            .filter(|applied| applied.change.is_mutation())
            .count()
    }

    pub fn changed_resources(&self) -> Vec<ResourceRef> {
        self.applied
            .iter()
            .filter(|applied| applied.change.is_mutation())
            .map(|applied| applied.resource.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure {
    pub position: usize,
    pub resource: ResourceRef,
    pub cause: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("provisioning {resource} (plan position {position}) failed: {source}")]
    ProvisioningFailure {
        resource: ResourceRef,
        position: usize,
        #[source]
        source: ProviderError,
        report: ApplyReport,
    },
    #[error("provisioning failed for {}", describe_failures(.failures))]
    ProvisioningFailures {
        failures: Vec<ResourceFailure>,
        report: ApplyReport,
    },
    #[error("{resource} (plan position {position}) references {missing}, which has no provisioned identity")]
    MissingIdentity {
        resource: ResourceRef,
        position: usize,
        missing: ResourceRef,
        report: ApplyReport,
    },
    #[error("route {route} targets {target}, which has no provisioned identity")]
    UnboundRoute {
        route: ResourceRef,
        target: ResourceRef,
        report: ApplyReport,
    },
    #[error("{route} declares no target function")]
    InvalidRoute { route: ResourceRef, report: ApplyReport },
}

impl ApplyError {
    pub fn report(&self) -> &ApplyReport {
        match self {
            Self::ProvisioningFailure { report, .. }
            | Self::ProvisioningFailures { report, .. }
            | Self::MissingIdentity { report, .. }
            | Self::UnboundRoute { report, .. }
            | Self::InvalidRoute { report, .. } => report,
        }
    }

    fn from_bind(error: BindError, position: usize, report: ApplyReport) -> Self {
        match error {
            BindError::MissingTarget { route } => Self::InvalidRoute { route, report },
            BindError::UnboundRoute { route, target } => Self::UnboundRoute {
                route,
                target,
                report,
            },
            BindError::Provider { route, source } => Self::ProvisioningFailure {
                resource: route,
                position,
                source,
                report,
            },
        }
    }
}

fn describe_failures(failures: &[ResourceFailure]) -> String {
    failures
        .iter()
        .map(|failure| {
            format!(
                "{} (plan position {}): {}",
                failure.resource, failure.position, failure.cause
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

enum StepFailure {
    Provider(ProviderError),
    MissingIdentity(ResourceRef),
}

impl StepFailure {
    fn cause(&self) -> String {
        match self {
            Self::Provider(error) => error.to_string(),
            Self::MissingIdentity(missing) => format!("no provisioned identity for {missing}"),
        }
    }

    fn into_apply_error(self, step: &ResolvedStep, report: ApplyReport) -> ApplyError {
        match self {
            Self::Provider(source) => ApplyError::ProvisioningFailure {
                resource: step.resource.clone(),
                position: step.position,
                source,
                report,
            },
            Self::MissingIdentity(missing) => ApplyError::MissingIdentity {
                resource: step.resource.clone(),
                position: step.position,
                missing,
                report,
            },
        }
    }
}

/// Walks a resolved plan against a control plane. Routes are bound last,
/// after every other resource exists.
pub struct Provisioner<'a> {
    control_plane: &'a dyn ControlPlane,
    retry: RetryPolicy,
}

impl<'a> Provisioner<'a> {
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

    /// Sequential apply in plan order. Halts at the first failure; resources
    /// already provisioned are left in place and listed in the error's report.
    pub fn apply(&self, plan: &ResolvedPlan) -> Result<ApplyReport, ApplyError> {
        let (routes, resources): (Vec<&ResolvedStep>, Vec<&ResolvedStep>) = plan
            .steps()
            .iter()
            .partition(|step| step.kind() == ResourceKind::Route);
        info!(
            resources = resources.len(),
            routes = routes.len(),
            "applying deploy plan"
        );

        let mut report = ApplyReport::default();
        for step in resources {
            match self.apply_step(step, &report.identities) {
                Ok(applied) => report.record(applied),
                Err(failure) => {
                    error!(resource = %step.resource, position = step.position, cause = %failure.cause(), "apply halted");
                    return Err(failure.into_apply_error(step, report));
                }
            }
        }
        self.bind_routes(&routes, report)
    }

    /// Level-parallel apply: resources within one dependency level are
    /// provisioned concurrently, levels run in order. Every failure in the
    /// failing level is collected before the apply stops.
    pub fn apply_parallel(&self, plan: &ResolvedPlan) -> Result<ApplyReport, ApplyError> {
        let report = Mutex::new(ApplyReport::default());
        let mut routes = Vec::new();

        for (level, steps) in plan.levels().into_iter().enumerate() {
            let (level_routes, resources): (Vec<&ResolvedStep>, Vec<&ResolvedStep>) = steps
                .into_iter()
                .partition(|step| step.kind() == ResourceKind::Route);
            routes.extend(level_routes);
            if resources.is_empty() {
                continue;
            }
            info!(level, resources = resources.len(), "applying plan level");

            let identities = lock(&report).identities.clone();
            let mut failures: Vec<(&ResolvedStep, StepFailure)> = resources
                .par_iter()
                .filter_map(|step| match self.apply_step(step, &identities) {
                    Ok(applied) => {
                        lock(&report).record(applied);
                        None
                    }
                    Err(failure) => Some((*step, failure)),
                })
                .collect();

            if !failures.is_empty() {
                failures.sort_by_key(|(step, _)| step.position);
                let report = into_sorted(report);
                error!(level, failures = failures.len(), "apply halted");
                if failures.len() == 1 {
                    if let Some((step, failure)) = failures.pop() {
                        return Err(failure.into_apply_error(step, report));
                    }
                }
                return Err(ApplyError::ProvisioningFailures {
                    failures: failures
                        .into_iter()
                        .map(|(step, failure)| ResourceFailure {
                            position: step.position,
                            resource: step.resource.clone(),
                            cause: failure.cause(),
                        })
                        .collect(),
                    report,
                });
            }
        }

        routes.sort_by_key(|step| step.position);
        self.bind_routes(&routes, into_sorted(report))
    }

    fn apply_step(
        &self,
        step: &ResolvedStep,
        identities: &IdentityMap,
    ) -> Result<AppliedResource, StepFailure> {
        let properties = step
            .materialize(identities)
            .map_err(StepFailure::MissingIdentity)?;
        let provisioned = self
            .retry
            .run(&step.resource, || {
                self.control_plane
                    .create_or_update(step.kind(), &step.resource.name, &properties)
            })
            .map_err(StepFailure::Provider)?;

        info!(
            resource = %step.resource,
            position = step.position,
            change = provisioned.change.as_str(),
            identity = %provisioned.identity,
            "resource applied"
        );
        Ok(AppliedResource {
            position: step.position,
            resource: step.resource.clone(),
            identity: provisioned.identity,
            change: provisioned.change,
        })
    }

    fn bind_routes(
        &self,
        routes: &[&ResolvedStep],
        mut report: ApplyReport,
    ) -> Result<ApplyReport, ApplyError> {
        let binder = ApiRouteBinder::new(self.control_plane).with_retry(self.retry);
        let (bound, failure) = match binder.bind(routes, &mut report.identities) {
            Ok(bound) => (bound, None),
            Err(BindFailure { bound, error }) => (bound, Some(error)),
        };
        let failed_step = routes.get(bound.len());
        for (step, binding) in routes.iter().zip(bound) {
            report.record(AppliedResource {
                position: step.position,
                resource: binding.route,
                identity: binding.target_identity,
                change: binding.change,
            });
        }

        if let (Some(error), Some(step)) = (failure, failed_step) {
            error!(route = %step.resource, error = %error, "route binding halted");
            return Err(ApplyError::from_bind(error, step.position, report));
        }
        info!(
            applied = report.applied.len(),
            mutations = report.mutations(),
            "deploy plan applied"
        );
        Ok(report)
    }
}

fn lock(report: &Mutex<ApplyReport>) -> MutexGuard<'_, ApplyReport> {
    report.lock().unwrap_or_else(PoisonError::into_inner)
}

fn into_sorted(report: Mutex<ApplyReport>) -> ApplyReport {
    let mut report = report.into_inner().unwrap_or_else(PoisonError::into_inner);
    report.applied.sort_by_key(|applied| applied.position);
    report
}

#[cfg(test)]
mod tests {
    use utpc_stack_core::{build_plan, MapConfig, Property, ResourceDescriptor};

    use super::*;
    use crate::adapters::memory::InMemoryControlPlane;

    fn chain_plan() -> ResolvedPlan {
        build_plan(vec![
            ResourceDescriptor::new(ResourceKind::Role, "r"),
            ResourceDescriptor::new(ResourceKind::Function, "f")
                .with_property("role", Property::Identity(ResourceRef::role("r"))),
        ])
        .expect("plan should build")
        .resolve(&MapConfig::new())
        .expect("plan should resolve")
    }

    #[test]
    fn report_counts_only_mutations() {
        let control_plane = InMemoryControlPlane::new();
        let provisioner = Provisioner::new(&control_plane);
        let first = provisioner.apply(&chain_plan()).expect("apply should pass");
        let second = provisioner.apply(&chain_plan()).expect("apply should pass");

        assert_eq!(first.mutations(), 2);
        assert_eq!(second.mutations(), 0);
        assert!(second.changed_resources().is_empty());
    }

    #[test]
    fn parallel_apply_matches_sequential_identities() {
        let sequential = InMemoryControlPlane::new();
        let parallel = InMemoryControlPlane::new();
        let left = Provisioner::new(&sequential)
            .apply(&chain_plan())
            .expect("apply should pass");
        let right = Provisioner::new(&parallel)
            .apply_parallel(&chain_plan())
            .expect("apply should pass");

        assert_eq!(left, right);
    }

    #[test]
    fn failure_report_lists_failures_in_plan_order() {
        let failures = vec![
            ResourceFailure {
                position: 1,
                resource: ResourceRef::function("a"),
                cause: "boom".to_string(),
            },
            ResourceFailure {
                position: 2,
                resource: ResourceRef::function("b"),
                cause: "bang".to_string(),
            },
        ];
        assert_eq!(
            describe_failures(&failures),
            "function/a (plan position 1): boom; function/b (plan position 2): bang"
        );
    }
}
