use serde::Serialize;
use tracing::info;
use utpc_stack_core::{IdentityMap, ResolvedProperty, ResolvedStep, ResourceRef};

use crate::adapters::control_plane::{Change, ControlPlane, ProviderError};
use crate::handlers::retry::RetryPolicy;

/// A registered `(path, method) -> function` binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteBinding {
    pub route: ResourceRef,
    pub target: ResourceRef,
    /// Identity of the function the route invokes.
    pub target_identity: String,
    /// Identity of the route registration on the API.
    pub route_identity: String,
    pub change: Change,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("{route} declares no target function")]
    MissingTarget { route: ResourceRef },
    #[error("route {route} targets {target}, which has no provisioned identity")]
    UnboundRoute {
        route: ResourceRef,
        target: ResourceRef,
    },
    #[error("registering {route} failed: {source}")]
    Provider {
        route: ResourceRef,
        #[source]
        source: ProviderError,
    },
}

/// Bindings completed before `error` stopped the remaining routes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error}")]
pub struct BindFailure {
    pub bound: Vec<RouteBinding>,
    pub error: BindError,
}

/// Registers routes against the API once their target functions exist.
pub struct ApiRouteBinder<'a> {
    control_plane: &'a dyn ControlPlane,
    retry: RetryPolicy,
}

impl<'a> ApiRouteBinder<'a> {
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

    /// Binds `routes` in order. Each success is recorded in `identities`
    /// (route -> target function identity); the first failure stops the
    /// remaining bindings and carries the ones already made.
    pub fn bind(
        &self,
        routes: &[&ResolvedStep],
        identities: &mut IdentityMap,
    ) -> Result<Vec<RouteBinding>, BindFailure> {
        let mut bound = Vec::with_capacity(routes.len());
        for step in routes {
            match self.bind_route(step, identities) {
                Ok(binding) => {
                    identities.insert(binding.route.clone(), binding.target_identity.clone());
                    bound.push(binding);
                }
                Err(error) => return Err(BindFailure { bound, error }),
            }
        }
        Ok(bound)
    }

    pub fn bind_route(
        &self,
        step: &ResolvedStep,
        identities: &IdentityMap,
    ) -> Result<RouteBinding, BindError> {
        let route = step.resource.clone();
        let target = match step.property("function") {
            Some(ResolvedProperty::Identity(target)) => target.clone(),
            _ => return Err(BindError::MissingTarget { route }),
        };
        let Some(target_identity) = identities.get(&target).cloned() else {
            return Err(BindError::UnboundRoute { route, target });
        };
        let properties = step
            .materialize(identities)
            .map_err(|missing| BindError::UnboundRoute {
                route: route.clone(),
                target: missing,
            })?;

        let provisioned = self
            .retry
            .run(&route, || {
                self.control_plane
                    .create_or_update(route.kind, &route.name, &properties)
            })
            .map_err(|source| BindError::Provider {
                route: route.clone(),
                source,
            })?;

        info!(
            route = %route,
            target = %target,
            change = provisioned.change.as_str(),
            "route bound"
        );
        Ok(RouteBinding {
            route,
            target,
            target_identity,
            route_identity: provisioned.identity,
            change: provisioned.change,
        })
    }
}
