use crate::descriptor::{ResourceKind, ResourceRef};

/// Plan-time failures. All of them are raised before any control-plane call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("{kind} logical name cannot be empty")]
    EmptyLogicalName { kind: ResourceKind },
    #[error("{resource} is declared more than once")]
    DuplicateLogicalName { resource: ResourceRef },
    #[error("{resource} depends on {missing}, which is not declared")]
    UnresolvedDependency {
        resource: ResourceRef,
        missing: ResourceRef,
    },
    #[error("cyclic dependency: {}", join_cycle(.cycle))]
    CyclicDependency { cycle: Vec<ResourceRef> },
    #[error("{resource} requires configuration key {key}, which has no value and no default")]
    ConfigurationMissing { resource: ResourceRef, key: String },
    #[error("invalid stack definition: {0}")]
    InvalidDefinition(String),
}

fn join_cycle(cycle: &[ResourceRef]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
