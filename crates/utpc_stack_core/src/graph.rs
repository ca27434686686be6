//! Dependency graph over resource descriptors.
//!
//! Nodes are keyed by [`ResourceRef`] in ordered maps, so the same descriptor
//! set yields the same graph regardless of input order.

use std::collections::{BTreeMap, BTreeSet};

use crate::descriptor::{validate_descriptors, ResourceDescriptor, ResourceRef};
use crate::error::PlanError;

#[derive(Debug, Clone, PartialEq)]
pub struct DependencyGraph {
    nodes: BTreeMap<ResourceRef, ResourceDescriptor>,
    /// node -> resources it depends on
    dependencies: BTreeMap<ResourceRef, BTreeSet<ResourceRef>>,
    /// node -> resources depending on it
    dependents: BTreeMap<ResourceRef, BTreeSet<ResourceRef>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InProgress,
    Done,
}

impl DependencyGraph {
    /// One node per descriptor, one edge per dependency.
    ///
    /// Fails with `UnresolvedDependency` when an edge target is not declared
    /// and with `CyclicDependency` when the edges form a cycle.
    pub fn build(
        descriptors: impl IntoIterator<Item = ResourceDescriptor>,
    ) -> Result<Self, PlanError> {
        let descriptors: Vec<ResourceDescriptor> = descriptors.into_iter().collect();
        validate_descriptors(&descriptors)?;

        let nodes: BTreeMap<ResourceRef, ResourceDescriptor> = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.resource_ref(), descriptor))
            .collect();

        let mut dependencies = BTreeMap::new();
        let mut dependents: BTreeMap<ResourceRef, BTreeSet<ResourceRef>> = nodes
            .keys()
            .map(|resource| (resource.clone(), BTreeSet::new()))
            .collect();

        for (resource, descriptor) in &nodes {
            let targets = descriptor.dependencies();
            for target in &targets {
                let Some(reverse) = dependents.get_mut(target) else {
                    return Err(PlanError::UnresolvedDependency {
                        resource: resource.clone(),
                        missing: target.clone(),
                    });
                };
                reverse.insert(resource.clone());
            }
            dependencies.insert(resource.clone(), targets);
        }

        let graph = Self {
            nodes,
            dependencies,
            dependents,
        };
        if let Some(cycle) = graph.find_cycle() {
            return Err(PlanError::CyclicDependency { cycle });
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, resource: &ResourceRef) -> bool {
        self.nodes.contains_key(resource)
    }

    pub fn descriptor(&self, resource: &ResourceRef) -> Option<&ResourceDescriptor> {
        self.nodes.get(resource)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceRef> {
        self.nodes.keys()
    }

    pub fn dependencies_of(&self, resource: &ResourceRef) -> impl Iterator<Item = &ResourceRef> {
        self.dependencies.get(resource).into_iter().flatten()
    }

    pub fn dependents_of(&self, resource: &ResourceRef) -> impl Iterator<Item = &ResourceRef> {
        self.dependents.get(resource).into_iter().flatten()
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(BTreeSet::len).sum()
    }

    /// Depth-first search with an explicit recursion stack. Returns the first
    /// cycle found (in node order) with its entry node repeated at the end.
    pub fn find_cycle(&self) -> Option<Vec<ResourceRef>> {
        let mut states: BTreeMap<&ResourceRef, VisitState> = BTreeMap::new();
        let mut stack: Vec<&ResourceRef> = Vec::new();

        for start in self.nodes.keys() {
            if states.contains_key(start) {
                continue;
            }
            if let Some(cycle) = self.visit(start, &mut states, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        node: &'a ResourceRef,
        states: &mut BTreeMap<&'a ResourceRef, VisitState>,
        stack: &mut Vec<&'a ResourceRef>,
    ) -> Option<Vec<ResourceRef>> {
        states.insert(node, VisitState::InProgress);
        stack.push(node);

        for next in self.dependencies_of(node) {
            match states.get(next) {
                Some(VisitState::Done) => {}
                Some(VisitState::InProgress) => {
                    let entry = stack.iter().position(|candidate| *candidate == next)?;
                    let mut cycle: Vec<ResourceRef> =
                        stack[entry..].iter().map(|item| (*item).clone()).collect();
                    cycle.push(next.clone());
                    return Some(cycle);
                }
                None => {
                    if let Some(cycle) = self.visit(next, states, stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        states.insert(node, VisitState::Done);
        None
    }
}
