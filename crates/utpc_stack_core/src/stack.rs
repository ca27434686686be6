//! Declarative stack definition and its expansion into resource descriptors.
//!
//! Functions are declared once as a template (`function_defaults`) plus a
//! short per-function entry; routes are expanded to one descriptor per
//! `(path, method)` pair.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{ConfigBinding, ConfigPolicy};
use crate::descriptor::{Property, ResourceDescriptor, ResourceKind, ResourceRef};
use crate::error::PlanError;

pub const LAMBDA_SERVICE_PRINCIPAL: &str = "lambda.amazonaws.com";

/// Header set API Gateway allows on CORS preflight when none is configured.
pub const DEFAULT_CORS_HEADERS: [&str; 6] = [
    "Content-Type",
    "X-Amz-Date",
    "Authorization",
    "X-Api-Key",
    "X-Amz-Security-Token",
    "X-Amz-User-Agent",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Options,
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 6] = [
        Self::Options,
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Patch,
        Self::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoggingLevel {
    Off,
    Error,
    #[default]
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackDefinition {
    pub name: String,
    pub role: RoleSpec,
    #[serde(default)]
    pub layers: Vec<LayerSpec>,
    pub function_defaults: FunctionDefaults,
    pub functions: Vec<FunctionSpec>,
    #[serde(default)]
    pub api: Option<ApiSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleSpec {
    pub name: String,
    pub assumed_by: String,
    #[serde(default)]
    pub managed_policies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerSpec {
    pub name: String,
    pub code: String,
    pub compatible_runtimes: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Template every function is instantiated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionDefaults {
    pub runtime: String,
    pub handler: String,
    pub timeout_seconds: u32,
    /// Directory holding one artifact directory per function name.
    pub code_root: String,
    #[serde(default)]
    pub layers: Vec<String>,
    /// Environment variable name -> policy when the configuration lacks it.
    #[serde(default)]
    pub environment: BTreeMap<String, ConfigPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u32>,
    /// Added to (or overriding) the template environment.
    #[serde(default)]
    pub environment: BTreeMap<String, ConfigPolicy>,
}

impl FunctionSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: None,
            handler: None,
            timeout_seconds: None,
            environment: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSpec {
    pub name: String,
    pub rest_api_name: String,
    #[serde(default)]
    pub stage: StageSettings,
    #[serde(default)]
    pub cors: CorsSettings,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageSettings {
    pub metrics_enabled: bool,
    pub logging_level: LoggingLevel,
    pub data_trace_enabled: bool,
    pub tracing_enabled: bool,
    pub cloud_watch_role: bool,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            logging_level: LoggingLevel::Info,
            data_trace_enabled: true,
            tracing_enabled: false,
            cloud_watch_role: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsSettings {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<HttpMethod>,
    pub allow_headers: Vec<String>,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_methods: HttpMethod::ALL.to_vec(),
            allow_headers: DEFAULT_CORS_HEADERS.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteSpec {
    pub path: String,
    pub methods: Vec<HttpMethod>,
    pub function: String,
    #[serde(default)]
    pub allow_test_invoke: bool,
}

impl StackDefinition {
    pub fn from_json_str(raw: &str) -> Result<Self, PlanError> {
        serde_json::from_str(raw)
            .map_err(|error| PlanError::InvalidDefinition(format!("malformed stack JSON: {error}")))
    }

    /// The UTPC banking demo: one role, the MySQL connector layer, four
    /// microservices, and a REST API exposing each through `POST /<name>`.
    pub fn utpc() -> Self {
        let environment = BTreeMap::from([
            ("ENV_HOST_MYSQL".to_string(), ConfigPolicy::Required),
            ("ENV_USER_MYSQL".to_string(), ConfigPolicy::Required),
            ("ENV_PASSWORD_MYSQL".to_string(), ConfigPolicy::Required),
            (
                "ENV_DATABASE_MYSQL".to_string(),
                ConfigPolicy::Default("utpc".to_string()),
            ),
            (
                "ENV_PORT_MYSQL".to_string(),
                ConfigPolicy::Default("3306".to_string()),
            ),
        ]);

        let mut deposit = FunctionSpec::named("utpcDepositMoney");
        deposit
            .environment
            .insert("ENV_SES_EMAIL_FROM".to_string(), ConfigPolicy::Required);

        let functions = vec![
            deposit,
            FunctionSpec::named("utpcWithdrawMoney"),
            FunctionSpec::named("utpcChangeDCardKey"),
            FunctionSpec::named("utpcCreateDDL"),
        ];
        let routes = functions
            .iter()
            .map(|function| RouteSpec {
                path: format!("/{}", function.name),
                methods: vec![HttpMethod::Post],
                function: function.name.clone(),
                allow_test_invoke: false,
            })
            .collect();

        Self {
            name: "UtpcCdkStack".to_string(),
            role: RoleSpec {
                name: "utpcRole".to_string(),
                assumed_by: LAMBDA_SERVICE_PRINCIPAL.to_string(),
                managed_policies: vec![
                    "AWSLambda_FullAccess".to_string(),
                    "CloudWatchLogsFullAccess".to_string(),
                ],
            },
            layers: vec![LayerSpec {
                name: "mysqlconnector".to_string(),
                code: "lib/layers/mysqlConnector".to_string(),
                compatible_runtimes: vec!["python3.9".to_string()],
                description: Some("mysqlConnector library layer".to_string()),
            }],
            function_defaults: FunctionDefaults {
                runtime: "python3.9".to_string(),
                handler: "main.lambda_handler".to_string(),
                timeout_seconds: 60,
                code_root: "lib/microservices".to_string(),
                layers: vec!["mysqlconnector".to_string()],
                environment,
            },
            functions,
            api: Some(ApiSpec {
                name: "utpcApi".to_string(),
                rest_api_name: "utpc-api".to_string(),
                stage: StageSettings::default(),
                cors: CorsSettings::default(),
                routes,
            }),
        }
    }

    pub fn role_ref(&self) -> ResourceRef {
        ResourceRef::role(&self.role.name)
    }

    /// Expands the definition into one descriptor per provisionable unit.
    pub fn descriptors(&self) -> Result<Vec<ResourceDescriptor>, PlanError> {
        let mut descriptors = vec![self.role_descriptor()];
        descriptors.extend(self.layers.iter().map(layer_descriptor));
        for function in &self.functions {
            descriptors.push(self.function_descriptor(function)?);
        }
        if let Some(api) = &self.api {
            descriptors.push(api_descriptor(api));
            descriptors.extend(route_descriptors(api)?);
        }
        Ok(descriptors)
    }

    fn role_descriptor(&self) -> ResourceDescriptor {
        let mut policies = self.role.managed_policies.clone();
        policies.sort();
        policies.dedup();

        ResourceDescriptor::new(ResourceKind::Role, &self.role.name)
            .with_property("role_name", Property::literal(self.role.name.as_str()))
            .with_property(
                "assume_role_policy",
                Property::literal(json!({
                    "effect": "Allow",
                    "principal": {"service": self.role.assumed_by},
                    "action": "sts:AssumeRole",
                })),
            )
            .with_property("managed_policies", Property::literal(policies))
    }

    fn function_descriptor(&self, function: &FunctionSpec) -> Result<ResourceDescriptor, PlanError> {
        let defaults = &self.function_defaults;
        let timeout_seconds = function.timeout_seconds.unwrap_or(defaults.timeout_seconds);
        if timeout_seconds == 0 {
            return Err(PlanError::InvalidDefinition(format!(
                "function '{}' timeout must be positive",
                function.name
            )));
        }

        let code = function.code.clone().unwrap_or_else(|| {
            format!("{}/{}", defaults.code_root.trim_end_matches('/'), function.name)
        });

        let mut environment = defaults.environment.clone();
        environment.extend(function.environment.clone());
        let environment = environment
            .into_iter()
            .map(|(key, policy)| {
                let binding = ConfigBinding {
                    key: key.clone(),
                    policy,
                };
                (key, Property::Config(binding))
            })
            .collect();

        let layers = defaults.layers.iter().map(ResourceRef::layer).collect();

        Ok(ResourceDescriptor::new(ResourceKind::Function, &function.name)
            .with_property("function_name", Property::literal(function.name.as_str()))
            .with_property("runtime", Property::literal(defaults.runtime.as_str()))
            .with_property(
                "handler",
                Property::literal(function.handler.as_deref().unwrap_or(&defaults.handler)),
            )
            .with_property("code", Property::literal(code))
            .with_property("timeout_seconds", Property::literal(timeout_seconds))
            .with_property("role", Property::Identity(self.role_ref()))
            .with_property("layers", Property::Identities(layers))
            .with_property("environment", Property::Map(environment)))
    }
}

fn layer_descriptor(layer: &LayerSpec) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::Layer, &layer.name)
        .with_property("layer_name", Property::literal(layer.name.as_str()))
        .with_property("code", Property::literal(layer.code.as_str()))
        .with_property(
            "compatible_runtimes",
            Property::literal(layer.compatible_runtimes.clone()),
        )
        .with_property(
            "description",
            Property::literal(layer.description.clone().unwrap_or_default()),
        )
        .with_property("removal_policy", Property::literal("destroy"))
}

fn api_descriptor(api: &ApiSpec) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::Api, &api.name)
        .with_property("rest_api_name", Property::literal(api.rest_api_name.as_str()))
        .with_property("stage", Property::literal(json!(api.stage)))
        .with_property("cors", Property::literal(json!(api.cors)))
}

/// One descriptor per `(path, method)`; a later declaration of the same pair
/// replaces the earlier one.
fn route_descriptors(api: &ApiSpec) -> Result<Vec<ResourceDescriptor>, PlanError> {
    let mut bindings: BTreeMap<(String, HttpMethod), &RouteSpec> = BTreeMap::new();
    for route in &api.routes {
        let path = normalize_route_path(&route.path)?;
        if route.methods.is_empty() {
            return Err(PlanError::InvalidDefinition(format!(
                "route '{path}' declares no methods"
            )));
        }
        for method in &route.methods {
            bindings.insert((path.clone(), *method), route);
        }
    }

    let api_ref = ResourceRef::api(&api.name);
    Ok(bindings
        .into_iter()
        .map(|((path, method), route)| {
            ResourceDescriptor::new(ResourceKind::Route, route_name(method, &path))
                .with_property("path", Property::literal(path.as_str()))
                .with_property("method", Property::literal(method.as_str()))
                .with_property(
                    "function",
                    Property::Identity(ResourceRef::function(&route.function)),
                )
                .with_property("api", Property::Identity(api_ref.clone()))
                .with_property(
                    "integration",
                    Property::literal(json!({
                        "type": "lambda_proxy",
                        "allow_test_invoke": route.allow_test_invoke,
                    })),
                )
        })
        .collect())
}

pub fn route_name(method: HttpMethod, path: &str) -> String {
    format!("{method} {path}")
}

/// Validates a resource path: leading `/`, no empty or padded segments.
pub fn normalize_route_path(raw: &str) -> Result<String, PlanError> {
    let path = raw.trim();
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PlanError::InvalidDefinition(format!(
            "route path '{raw}' must start with '/'"
        )));
    };
    if rest.is_empty() {
        return Ok("/".to_string());
    }
    for segment in rest.split('/') {
        if segment.is_empty() || segment.trim() != segment {
            return Err(PlanError::InvalidDefinition(format!(
                "route path '{raw}' contains an empty or padded segment"
            )));
        }
    }
    Ok(path.to_string())
}
