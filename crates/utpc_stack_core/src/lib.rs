//! Deterministic provisioning primitives for the UTPC serverless stack.
//!
//! This crate owns resource descriptors, dependency graph construction, plan
//! ordering and plan-time configuration resolution. Control-plane clients,
//! asset packaging and the CLI live in `utpc_stack_provision`.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod plan;
pub mod stack;

pub use config::{ConfigBinding, ConfigPolicy, ConfigSource, EnvConfig, LayeredConfig, MapConfig};
pub use descriptor::{validate_descriptors, Property, ResourceDescriptor, ResourceKind, ResourceRef};
pub use error::PlanError;
pub use graph::DependencyGraph;
pub use plan::{
    build_plan, DeployPlan, IdentityMap, PlanBuilder, PlannedResource, ResolvedPlan,
    ResolvedProperty, ResolvedStep,
};
pub use stack::StackDefinition;
