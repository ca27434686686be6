use std::collections::BTreeMap;

use utpc_stack_core::{
    build_plan, DependencyGraph, MapConfig, PlanBuilder, PlanError, Property, ResourceDescriptor,
    ResourceKind, ResourceRef, StackDefinition,
};

fn role(name: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::Role, name)
}

fn layer(name: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::Layer, name)
}

fn function(name: &str, role: &str, layers: &[&str]) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::Function, name)
        .with_property("role", Property::Identity(ResourceRef::role(role)))
        .with_property(
            "layers",
            Property::Identities(layers.iter().map(|name| ResourceRef::layer(*name)).collect()),
        )
}

fn route(path: &str, target: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::Route, format!("POST {path}"))
        .with_property("function", Property::Identity(ResourceRef::function(target)))
}

fn banking_descriptors() -> Vec<ResourceDescriptor> {
    vec![
        role("utpcRole"),
        layer("mysqlconnector"),
        function("utpcDepositMoney", "utpcRole", &["mysqlconnector"]),
        function("utpcWithdrawMoney", "utpcRole", &["mysqlconnector"]),
        function("utpcChangeDCardKey", "utpcRole", &["mysqlconnector"]),
        function("utpcCreateDDL", "utpcRole", &["mysqlconnector"]),
        route("/utpcDepositMoney", "utpcDepositMoney"),
        route("/utpcWithdrawMoney", "utpcWithdrawMoney"),
        route("/utpcChangeDCardKey", "utpcChangeDCardKey"),
        route("/utpcCreateDDL", "utpcCreateDDL"),
    ]
}

fn assert_topological(descriptors: &[ResourceDescriptor], order: &[ResourceRef]) {
    let positions: BTreeMap<&ResourceRef, usize> = order
        .iter()
        .enumerate()
        .map(|(index, resource)| (resource, index))
        .collect();
    for descriptor in descriptors {
        let own = positions[&descriptor.resource_ref()];
        for dependency in descriptor.dependencies() {
            assert!(
                positions[&dependency] < own,
                "{dependency} must precede {}",
                descriptor.resource_ref()
            );
        }
    }
}

#[test]
fn order_is_topological_and_stable_across_input_permutations() {
    let descriptors = banking_descriptors();
    let baseline = build_plan(descriptors.clone())
        .expect("plan should build")
        .resources();
    assert_topological(&descriptors, &baseline);

    for shift in 1..descriptors.len() {
        let mut rotated = descriptors.clone();
        rotated.rotate_left(shift);
        let plan = build_plan(rotated).expect("plan should build");
        assert_eq!(plan.resources(), baseline, "rotation {shift} changed the plan");
    }

    let mut reversed = descriptors;
    reversed.reverse();
    assert_eq!(
        build_plan(reversed).expect("plan should build").resources(),
        baseline
    );
}

#[test]
fn repeated_ordering_of_one_graph_is_identical() {
    let graph = DependencyGraph::build(banking_descriptors()).expect("graph should build");
    let first = PlanBuilder::order(&graph).expect("plan should build");
    let second = PlanBuilder::order(&graph).expect("plan should build");
    assert_eq!(first, second);
}

#[test]
fn route_to_absent_function_names_the_function() {
    let error = build_plan(vec![
        role("utpcRole"),
        route("/b", "X"),
    ])
    .expect_err("plan should fail");

    match error {
        PlanError::UnresolvedDependency { resource, missing } => {
            assert_eq!(resource, ResourceRef::route("POST /b"));
            assert_eq!(missing.name, "X");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn cycle_through_roles_and_functions_is_rejected() {
    let error = build_plan(vec![
        role("utpcRole").with_dependency(ResourceRef::function("utpcCreateDDL")),
        layer("mysqlconnector"),
        function("utpcCreateDDL", "utpcRole", &["mysqlconnector"]),
    ])
    .expect_err("plan should fail");

    let PlanError::CyclicDependency { cycle } = error else {
        panic!("expected a cycle error");
    };
    assert_eq!(cycle.first(), cycle.last());
    assert!(cycle.contains(&ResourceRef::role("utpcRole")));
    assert!(cycle.contains(&ResourceRef::function("utpcCreateDDL")));
}

#[test]
fn utpc_stack_plans_shared_dependencies_first() {
    let plan = build_plan(
        StackDefinition::utpc()
            .descriptors()
            .expect("stack should expand"),
    )
    .expect("plan should build");

    let resources = plan.resources();
    assert_eq!(resources.len(), 11);
    assert_eq!(resources[0], ResourceRef::role("utpcRole"));
    assert_eq!(resources[1], ResourceRef::layer("mysqlconnector"));
    assert_eq!(resources[2], ResourceRef::api("utpcApi"));
    assert!(resources[3..7]
        .iter()
        .all(|resource| resource.kind == ResourceKind::Function));
    assert!(resources[7..]
        .iter()
        .all(|resource| resource.kind == ResourceKind::Route));
}

#[test]
fn utpc_stack_requires_database_credentials() {
    let plan = build_plan(
        StackDefinition::utpc()
            .descriptors()
            .expect("stack should expand"),
    )
    .expect("plan should build");

    let config = MapConfig::new()
        .with("ENV_HOST_MYSQL", "db.internal")
        .with("ENV_USER_MYSQL", "utpc")
        .with("ENV_SES_EMAIL_FROM", "no-reply@utpc.example");

    let error = plan.resolve(&config).expect_err("password is missing");
    match error {
        PlanError::ConfigurationMissing { key, .. } => assert_eq!(key, "ENV_PASSWORD_MYSQL"),
        other => panic!("unexpected error: {other}"),
    }
}
