use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::config::ConfigBinding;
use crate::error::PlanError;

/// Provisionable resource kinds.
///
/// Declaration order is the kind rank used to break ordering ties, so shared
/// dependencies (roles, layers) sort ahead of the units that consume them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Role,
    Layer,
    Api,
    Function,
    Route,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        Self::Role,
        Self::Layer,
        Self::Api,
        Self::Function,
        Self::Route,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Layer => "layer",
            Self::Api => "api",
            Self::Function => "function",
            Self::Route => "route",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown resource kind '{value}'"))
    }
}

/// Kind-qualified logical name. Serialized as `kind/name`.
///
/// Names repeat across kinds (a route and its function commonly share one), so
/// every reference between resources carries the kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn role(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Role, name)
    }

    pub fn layer(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Layer, name)
    }

    pub fn api(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Api, name)
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Function, name)
    }

    pub fn route(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Route, name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl FromStr for ResourceRef {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, name) = value
            .split_once('/')
            .ok_or_else(|| format!("resource reference '{value}' must look like kind/name"))?;
        Ok(Self::new(kind.parse()?, name))
    }
}

impl Serialize for ResourceRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One declared property value.
///
/// `Identity` and `Identities` are placeholders for identities generated by
/// the control plane; they are substituted while the plan is applied and count
/// as dependencies of the owning descriptor. `Config` values are substituted
/// at plan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    Literal(Value),
    Identity(ResourceRef),
    Identities(Vec<ResourceRef>),
    Config(ConfigBinding),
    Map(BTreeMap<String, Property>),
}

impl Property {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    fn collect_references(&self, out: &mut BTreeSet<ResourceRef>) {
        match self {
            Self::Literal(_) | Self::Config(_) => {}
            Self::Identity(target) => {
                out.insert(target.clone());
            }
            Self::Identities(targets) => out.extend(targets.iter().cloned()),
            Self::Map(entries) => {
                for property in entries.values() {
                    property.collect_references(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub logical_name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Property>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ResourceRef>,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, logical_name: impl Into<String>) -> Self {
        Self {
            kind,
            logical_name: logical_name.into(),
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, property: Property) -> Self {
        self.properties.insert(key.into(), property);
        self
    }

    /// Declares an ordering dependency that no property references.
    pub fn with_dependency(mut self, target: ResourceRef) -> Self {
        self.depends_on.push(target);
        self
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(self.kind, self.logical_name.clone())
    }

    /// Declared dependencies plus every identity the properties reference,
    /// sorted and deduplicated.
    pub fn dependencies(&self) -> BTreeSet<ResourceRef> {
        let mut out: BTreeSet<ResourceRef> = self.depends_on.iter().cloned().collect();
        for property in self.properties.values() {
            property.collect_references(&mut out);
        }
        out
    }
}

/// Construction-time checks: non-empty names, unique `(kind, name)` pairs.
///
/// References to undeclared resources are reported by
/// [`DependencyGraph::build`](crate::graph::DependencyGraph::build).
pub fn validate_descriptors(descriptors: &[ResourceDescriptor]) -> Result<(), PlanError> {
    let mut seen = BTreeSet::new();
    for descriptor in descriptors {
        if descriptor.logical_name.trim().is_empty() {
            return Err(PlanError::EmptyLogicalName {
                kind: descriptor.kind,
            });
        }
        let resource = descriptor.resource_ref();
        if !seen.insert(resource.clone()) {
            return Err(PlanError::DuplicateLogicalName { resource });
        }
    }
    Ok(())
}
