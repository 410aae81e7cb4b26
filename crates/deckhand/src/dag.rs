//! render order of documents
//!
//! Every document is a node. A node depends on its parent (or the parent's replacement) and on every substitution
//! source it reads from. [DependencyGraph::order] emits dependencies before dependents using Kahn's algorithm. When
//! several nodes are ready at once the lexicographically smallest identity goes first, so the order does not depend
//! on input order.
use crate::document::Meta;
use crate::error::RenderError;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    dependencies: BTreeMap<Meta, BTreeSet<Meta>>,
}

impl DependencyGraph {
    pub fn add_node(&mut self, node: Meta) {
        self.dependencies.entry(node).or_default();
    }

    /// `dependent` must be rendered after `dependency`
    pub fn add_dependency(&mut self, dependent: Meta, dependency: Meta) {
        self.add_node(dependency.clone());
        self.dependencies
            .entry(dependent)
            .or_default()
            .insert(dependency);
    }

    pub fn dependencies_of(&self, node: &Meta) -> impl Iterator<Item = &Meta> {
        self.dependencies.get(node).into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Dependencies first, ties broken by identity
    ///
    /// Fails with [RenderError::SubstitutionDependencyCycle] naming one of the cycles if there is any.
    pub fn order(&self) -> Result<Vec<Meta>, RenderError> {
        let mut pending: HashMap<&Meta, usize> = HashMap::new();
        let mut dependents: HashMap<&Meta, Vec<&Meta>> = HashMap::new();

        for (node, dependencies) in &self.dependencies {
            pending.insert(node, dependencies.len());
            for dependency in dependencies {
                dependents.entry(dependency).or_default().push(node);
            }
        }

        let mut ready: BTreeSet<&Meta> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut order = Vec::with_capacity(self.dependencies.len());
        while let Some(node) = ready.pop_first() {
            order.push(node.clone());

            for dependent in dependents.get(node).into_iter().flatten() {
                let Some(count) = pending.get_mut(dependent) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }

        if order.len() == self.dependencies.len() {
            tracing::trace!(?order, "render order");
            return Ok(order);
        }

        let unresolved: BTreeSet<&Meta> = pending
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(node, _)| node)
            .collect();
        let cycle = self.describe_cycle(&unresolved);
        tracing::error!(%cycle, "dependency cycle");
        Err(RenderError::SubstitutionDependencyCycle { cycle })
    }

    /// `A -> B -> A` for one cycle among `unresolved`
    ///
    /// Every unresolved node has an unresolved dependency, so following the smallest one always runs into a cycle.
    fn describe_cycle(&self, unresolved: &BTreeSet<&Meta>) -> String {
        let Some(mut current) = unresolved.first().copied() else {
            return String::new();
        };

        let mut path: Vec<&Meta> = vec![];
        loop {
            if let Some(start) = path.iter().position(|node| *node == current) {
                return path[start..]
                    .iter()
                    .chain(std::iter::once(&current))
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" -> ");
            }
            path.push(current);

            let next = self
                .dependencies_of(current)
                .find(|dependency| unresolved.contains(dependency));
            match next {
                Some(next) => current = next,
                None => return path.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "),
            }
        }
    }
}
