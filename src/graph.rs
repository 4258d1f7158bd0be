//! Reference graph builder.
//!
//! Edges point from a dependent to its dependency. Ordering ties between
//! unrelated resources are broken by insertion order, so the same
//! declarations always produce the same order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::ConfigError;
use crate::resource::{DeclarationSet, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InStack,
    Done,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<ResourceId>,
    index: HashMap<ResourceId, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph for a declaration set, failing on dangling references
    /// and on cycles. Explicit `depends_on` hints become ordinary edges.
    pub fn build(declarations: &DeclarationSet) -> Result<Self, ConfigError> {
        let mut graph = Self::new();
        for decl in declarations.iter() {
            graph.add_node(decl.id.clone());
        }

        for decl in declarations.iter() {
            for (attribute, reference) in decl.references() {
                let target_declared = declarations.contains(&reference.target);
                let output_declared = reference
                    .target
                    .kind
                    .schema()
                    .output(&reference.attribute)
                    .is_some();
                if !target_declared || !output_declared {
                    return Err(ConfigError::UnresolvedReference {
                        from: decl.id.to_string(),
                        path: attribute.to_string(),
                        target: reference.to_string(),
                    });
                }
                graph.add_edge(&decl.id, &reference.target);
            }

            for hint in &decl.depends_on {
                if !declarations.contains(hint) {
                    return Err(ConfigError::UnresolvedReference {
                        from: decl.id.to_string(),
                        path: "depends_on".to_string(),
                        target: hint.to_string(),
                    });
                }
                graph.add_edge(&decl.id, hint);
            }
        }

        if let Some(cycle) = graph.find_cycle() {
            return Err(ConfigError::CyclicDependency { cycle });
        }

        tracing::debug!(nodes = graph.len(), "dependency graph built");
        Ok(graph)
    }

    pub fn add_node(&mut self, id: ResourceId) -> usize {
        if let Some(&i) = self.index.get(&id) {
            return i;
        }
        let i = self.nodes.len();
        self.index.insert(id.clone(), i);
        self.nodes.push(id);
        self.dependencies.push(Vec::new());
        self.dependents.push(Vec::new());
        i
    }

    /// Adds `dependent -> dependency`, creating either node if needed.
    pub fn add_edge(&mut self, dependent: &ResourceId, dependency: &ResourceId) {
        let from = self.add_node(dependent.clone());
        let to = self.add_node(dependency.clone());
        if !self.dependencies[from].contains(&to) {
            self.dependencies[from].push(to);
            self.dependents[to].push(from);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    pub fn nodes(&self) -> &[ResourceId] {
        &self.nodes
    }

    pub fn dependencies(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.neighbours(id, &self.dependencies)
    }

    pub fn dependents(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.neighbours(id, &self.dependents)
    }

    fn neighbours<'a>(&'a self, id: &ResourceId, edges: &'a [Vec<usize>]) -> Vec<&'a ResourceId> {
        self.index
            .get(id)
            .map(|&i| edges[i].iter().map(|&n| &self.nodes[n]).collect())
            .unwrap_or_default()
    }

    /// Every resource that depends on `id`, directly or through others.
    pub fn transitive_dependents(&self, id: &ResourceId) -> Vec<&ResourceId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        let mut found = Vec::new();
        while let Some(node) = stack.pop() {
            for &next in &self.dependents[node] {
                if !seen[next] {
                    seen[next] = true;
                    found.push(next);
                    stack.push(next);
                }
            }
        }
        found.sort_unstable();
        found.into_iter().map(|i| &self.nodes[i]).collect()
    }

    /// Dependencies before dependents; ties by insertion order.
    pub fn topological_order(&self) -> Result<Vec<ResourceId>, ConfigError> {
        let order = self.kahn();
        if order.len() < self.nodes.len() {
            let cycle = self.find_cycle().unwrap_or_default();
            return Err(ConfigError::CyclicDependency { cycle });
        }
        Ok(order)
    }

    fn kahn(&self) -> Vec<ResourceId> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.nodes[node].clone());
            for &dependent in &self.dependents[node] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
        order
    }

    /// Dependents before dependencies.
    pub fn reverse_topological_order(&self) -> Result<Vec<ResourceId>, ConfigError> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    /// Groups resources into levels: every resource's dependencies sit in
    /// earlier levels.
    pub fn waves(&self) -> Result<Vec<Vec<ResourceId>>, ConfigError> {
        if let Some(cycle) = self.find_cycle() {
            return Err(ConfigError::CyclicDependency { cycle });
        }

        let mut level = vec![0usize; self.nodes.len()];
        let mut max_level = 0;
        for id in self.kahn() {
            let i = self.index[&id];
            level[i] = self.dependencies[i]
                .iter()
                .map(|&d| level[d] + 1)
                .max()
                .unwrap_or(0);
            max_level = max_level.max(level[i]);
        }

        let mut waves = vec![Vec::new(); if self.nodes.is_empty() { 0 } else { max_level + 1 }];
        for (i, id) in self.nodes.iter().enumerate() {
            waves[level[i]].push(id.clone());
        }
        Ok(waves)
    }

    /// Depth-first search with recursion-stack marking. Returns the cycle
    /// members in dependency direction, first member repeated at the end.
    fn find_cycle(&self) -> Option<Vec<ResourceId>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();
        (0..self.nodes.len()).find_map(|start| {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut stack)
            } else {
                None
            }
        })
    }

    fn visit(
        &self,
        node: usize,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<ResourceId>> {
        marks[node] = Mark::InStack;
        stack.push(node);

        for &dep in &self.dependencies[node] {
            match marks[dep] {
                Mark::InStack => {
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<ResourceId> =
                        stack[start..].iter().map(|&n| self.nodes[n].clone()).collect();
                    cycle.push(self.nodes[dep].clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.visit(dep, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node] = Mark::Done;
        None
    }
}
