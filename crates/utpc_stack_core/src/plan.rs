//! Deploy plan ordering and plan-time resolution.
//!
//! Ordering uses Kahn's algorithm over a min-heap keyed by [`ResourceRef`]
//! (kind rank, then logical name), so every run over the same graph yields
//! the same plan.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{ConfigPolicy, ConfigSource};
use crate::descriptor::{Property, ResourceDescriptor, ResourceKind, ResourceRef};
use crate::error::PlanError;
use crate::graph::DependencyGraph;

/// `logical resource -> provider identity`, built up while a plan is applied.
pub type IdentityMap = BTreeMap<ResourceRef, String>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedResource {
    pub position: usize,
    /// Dependency depth; resources sharing a level do not depend on each other.
    pub level: usize,
    pub descriptor: ResourceDescriptor,
}

impl PlannedResource {
    pub fn resource_ref(&self) -> ResourceRef {
        self.descriptor.resource_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployPlan {
    steps: Vec<PlannedResource>,
}

pub struct PlanBuilder;

impl PlanBuilder {
    /// Deterministic topological order of `graph`.
    pub fn order(graph: &DependencyGraph) -> Result<DeployPlan, PlanError> {
        let mut in_degree: BTreeMap<&ResourceRef, usize> = graph
            .resources()
            .map(|resource| (resource, graph.dependencies_of(resource).count()))
            .collect();
        let mut levels: BTreeMap<&ResourceRef, usize> = BTreeMap::new();

        let mut ready: BinaryHeap<Reverse<&ResourceRef>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(resource, _)| Reverse(*resource))
            .collect();

        let mut steps = Vec::with_capacity(graph.len());
        while let Some(Reverse(resource)) = ready.pop() {
            let level = graph
                .dependencies_of(resource)
                .filter_map(|dependency| levels.get(dependency))
                .map(|level| level + 1)
                .max()
                .unwrap_or(0);
            levels.insert(resource, level);

            let Some(descriptor) = graph.descriptor(resource) else {
                continue;
            };
            steps.push(PlannedResource {
                position: steps.len(),
                level,
                descriptor: descriptor.clone(),
            });

            for dependent in graph.dependents_of(resource) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }

        if steps.len() < graph.len() {
            let cycle = graph.find_cycle().unwrap_or_default();
            return Err(PlanError::CyclicDependency { cycle });
        }

        debug!(resources = steps.len(), "deploy plan ordered");
        Ok(DeployPlan { steps })
    }
}

/// Graph construction plus ordering in one call.
pub fn build_plan(
    descriptors: impl IntoIterator<Item = ResourceDescriptor>,
) -> Result<DeployPlan, PlanError> {
    let graph = DependencyGraph::build(descriptors)?;
    PlanBuilder::order(&graph)
}

impl DeployPlan {
    pub fn steps(&self) -> &[PlannedResource] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn resources(&self) -> Vec<ResourceRef> {
        self.steps.iter().map(PlannedResource::resource_ref).collect()
    }

    /// Reverse topological order: dependents are removed before what they use.
    pub fn teardown_order(&self) -> impl Iterator<Item = &PlannedResource> {
        self.steps.iter().rev()
    }

    /// Substitutes every configuration binding. Fails on the first required
    /// key without a value, before anything is provisioned.
    pub fn resolve(&self, config: &dyn ConfigSource) -> Result<ResolvedPlan, PlanError> {
        let mut steps = Vec::with_capacity(self.steps.len());
        for planned in &self.steps {
            let resource = planned.resource_ref();
            let mut properties = BTreeMap::new();
            for (key, property) in &planned.descriptor.properties {
                properties.insert(key.clone(), resolve_property(&resource, property, config)?);
            }
            steps.push(ResolvedStep {
                position: planned.position,
                level: planned.level,
                dependencies: planned.descriptor.dependencies().into_iter().collect(),
                resource,
                properties,
            });
        }
        Ok(ResolvedPlan { steps })
    }
}

fn resolve_property(
    resource: &ResourceRef,
    property: &Property,
    config: &dyn ConfigSource,
) -> Result<ResolvedProperty, PlanError> {
    Ok(match property {
        Property::Literal(value) => ResolvedProperty::Value(value.clone()),
        Property::Identity(target) => ResolvedProperty::Identity(target.clone()),
        Property::Identities(targets) => ResolvedProperty::Identities(targets.clone()),
        Property::Config(binding) => match binding.resolve(config) {
            Some(value) if binding.policy == ConfigPolicy::Required => {
                ResolvedProperty::Secret(value)
            }
            Some(value) => ResolvedProperty::Value(Value::String(value)),
            None => {
                return Err(PlanError::ConfigurationMissing {
                    resource: resource.clone(),
                    key: binding.key.clone(),
                })
            }
        },
        Property::Map(entries) => {
            let mut resolved = BTreeMap::new();
            for (key, entry) in entries {
                resolved.insert(key.clone(), resolve_property(resource, entry, config)?);
            }
            ResolvedProperty::Map(resolved)
        }
    })
}

/// Property with configuration substituted; identities still pending.
///
/// Values of required bindings are held as [`ResolvedProperty::Secret`] and
/// serialize redacted, so a printed plan never carries credentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedProperty {
    Value(Value),
    #[serde(serialize_with = "redact")]
    Secret(String),
    Identity(ResourceRef),
    Identities(Vec<ResourceRef>),
    Map(BTreeMap<String, ResolvedProperty>),
}

impl ResolvedProperty {
    /// Substitutes identities. `Err` carries the first reference with no
    /// identity yet.
    pub fn materialize(&self, identities: &IdentityMap) -> Result<Value, ResourceRef> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Secret(value) => Ok(Value::String(value.clone())),
            Self::Identity(target) => lookup(identities, target).map(Value::String),
            Self::Identities(targets) => targets
                .iter()
                .map(|target| lookup(identities, target).map(Value::String))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Map(entries) => {
                let mut object = Map::new();
                for (key, entry) in entries {
                    object.insert(key.clone(), entry.materialize(identities)?);
                }
                Ok(Value::Object(object))
            }
        }
    }
}

pub const REDACTED: &str = "<redacted>";

fn redact<S: Serializer>(_value: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(REDACTED)
}

fn lookup(identities: &IdentityMap, target: &ResourceRef) -> Result<String, ResourceRef> {
    identities
        .get(target)
        .cloned()
        .ok_or_else(|| target.clone())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedStep {
    pub position: usize,
    pub level: usize,
    pub resource: ResourceRef,
    pub dependencies: Vec<ResourceRef>,
    pub properties: BTreeMap<String, ResolvedProperty>,
}

impl ResolvedStep {
    pub fn kind(&self) -> ResourceKind {
        self.resource.kind
    }

    pub fn property(&self, key: &str) -> Option<&ResolvedProperty> {
        self.properties.get(key)
    }

    /// Property object with every identity reference substituted.
    pub fn materialize(&self, identities: &IdentityMap) -> Result<Value, ResourceRef> {
        let mut object = Map::new();
        for (key, property) in &self.properties {
            object.insert(key.clone(), property.materialize(identities)?);
        }
        Ok(Value::Object(object))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPlan {
    steps: Vec<ResolvedStep>,
}

impl ResolvedPlan {
    pub fn steps(&self) -> &[ResolvedStep] {
        &self.steps
    }

    pub fn resources(&self) -> Vec<ResourceRef> {
        self.steps.iter().map(|step| step.resource.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps grouped by dependency level, each group in plan order.
    pub fn levels(&self) -> Vec<Vec<&ResolvedStep>> {
        let mut grouped: BTreeMap<usize, Vec<&ResolvedStep>> = BTreeMap::new();
        for step in &self.steps {
            grouped.entry(step.level).or_default().push(step);
        }
        grouped.into_values().collect()
    }
}
