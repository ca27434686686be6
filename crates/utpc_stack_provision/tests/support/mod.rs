#![allow(dead_code)]

use std::time::Duration;

use utpc_stack_core::{
    build_plan, MapConfig, PlanError, Property, ResolvedPlan, ResourceDescriptor, ResourceKind,
    ResourceRef, StackDefinition,
};
use utpc_stack_provision::handlers::pipeline::synthesize;
use utpc_stack_provision::handlers::retry::RetryPolicy;

pub const FUNCTIONS: [&str; 4] = [
    "utpcChangeDCardKey",
    "utpcCreateDDL",
    "utpcDepositMoney",
    "utpcWithdrawMoney",
];

/// Configuration that satisfies every required key of the UTPC stack.
pub fn scenario_config() -> MapConfig {
    MapConfig::new()
        .with("ENV_HOST_MYSQL", "db.internal")
        .with("ENV_USER_MYSQL", "utpc_app")
        .with("ENV_PASSWORD_MYSQL", "s3cr3t")
        .with("ENV_SES_EMAIL_FROM", "no-reply@utpc.example")
}

pub fn plan_for(definition: &StackDefinition, config: &MapConfig) -> ResolvedPlan {
    synthesize(definition, None)
        .expect("stack should synthesize")
        .resolve(config)
        .expect("plan should resolve")
}

pub fn utpc_plan_result(config: &MapConfig) -> Result<ResolvedPlan, PlanError> {
    synthesize(&StackDefinition::utpc(), None)
        .expect("stack should synthesize")
        .resolve(config)
}

pub fn utpc_plan(config: &MapConfig) -> ResolvedPlan {
    plan_for(&StackDefinition::utpc(), config)
}

/// Role, layer, function and route: the smallest stack with every edge kind.
pub fn minimal_descriptors() -> Vec<ResourceDescriptor> {
    vec![
        ResourceDescriptor::new(ResourceKind::Role, "utpcRole")
            .with_property("role_name", Property::literal("utpcRole")),
        ResourceDescriptor::new(ResourceKind::Layer, "mysqlconnector")
            .with_property("code", Property::literal("lib/layers/mysqlConnector")),
        ResourceDescriptor::new(ResourceKind::Function, "utpcDepositMoney")
            .with_property("role", Property::Identity(ResourceRef::role("utpcRole")))
            .with_property(
                "layers",
                Property::Identities(vec![ResourceRef::layer("mysqlconnector")]),
            ),
        ResourceDescriptor::new(ResourceKind::Route, "POST /utpcDepositMoney")
            .with_property("path", Property::literal("/utpcDepositMoney"))
            .with_property(
                "function",
                Property::Identity(ResourceRef::function("utpcDepositMoney")),
            ),
    ]
}

pub fn minimal_plan() -> ResolvedPlan {
    build_plan(minimal_descriptors())
        .expect("plan should build")
        .resolve(&MapConfig::new())
        .expect("plan should resolve")
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts).with_backoff(Duration::ZERO)
}

pub fn route_for(function: &str) -> ResourceRef {
    ResourceRef::route(format!("POST /{function}"))
}
