use utpc_stack_core::stack::HttpMethod;
use utpc_stack_core::{PlanError, StackDefinition};

const SHIPPED_STACK: &str = include_str!("../../../stacks/utpc.json");

#[test]
fn shipped_stack_file_matches_builtin_definition() {
    let parsed = StackDefinition::from_json_str(SHIPPED_STACK).expect("stack file should parse");
    assert_eq!(parsed, StackDefinition::utpc());
}

#[test]
fn builtin_definition_survives_json_round_trip() {
    let encoded = serde_json::to_string(&StackDefinition::utpc()).expect("stack should encode");
    let decoded = StackDefinition::from_json_str(&encoded).expect("stack should decode");
    assert_eq!(decoded, StackDefinition::utpc());
}

#[test]
fn every_function_is_exposed_through_post() {
    let stack = StackDefinition::utpc();
    let api = stack.api.as_ref().expect("utpc has an api");

    for function in &stack.functions {
        let route = api
            .routes
            .iter()
            .find(|route| route.function == function.name)
            .expect("function should have a route");
        assert_eq!(route.path, format!("/{}", function.name));
        assert_eq!(route.methods, vec![HttpMethod::Post]);
        assert!(!route.allow_test_invoke);
    }
    assert_eq!(api.cors.allow_methods.len(), 6);
    assert_eq!(api.cors.allow_origins, vec!["*".to_string()]);
}

#[test]
fn unknown_fields_are_rejected() {
    let error = StackDefinition::from_json_str(
        r#"{"name":"x","role":{"name":"r","assumed_by":"lambda.amazonaws.com","unexpected":1},
            "function_defaults":{"runtime":"python3.9","handler":"main.lambda_handler",
            "timeout_seconds":60,"code_root":"lib"},"functions":[]}"#,
    )
    .expect_err("unknown field should fail");
    assert!(matches!(error, PlanError::InvalidDefinition(message) if message.contains("unexpected")));
}

#[test]
fn route_without_methods_is_rejected() {
    let mut stack = StackDefinition::utpc();
    stack.api.as_mut().expect("utpc has an api").routes[0]
        .methods
        .clear();
    assert!(matches!(
        stack.descriptors(),
        Err(PlanError::InvalidDefinition(message)) if message.contains("no methods")
    ));
}
