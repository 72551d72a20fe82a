use std::collections::{BTreeSet, HashMap};

use linker_types::{LinkerError, Result};

use crate::slot::Edge;
use crate::step::StepNode;

/// A declared node/edge set. Nodes keep their declaration order, which is
/// used to break ties in [`SchemaGraph::topological_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaGraph {
    nodes: Vec<StepNode>,
    edges: Vec<Edge>,
}

impl SchemaGraph {
    pub fn new(nodes: Vec<StepNode>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, name: &str) -> Option<&StepNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn incoming_edges<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.dest_step == node)
    }

    pub fn outgoing_edges<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source_step == node)
    }

    /// `true` once no hierarchical step remains.
    pub fn is_flat(&self) -> bool {
        self.nodes.iter().all(|n| n.subgraph().is_none())
    }

    /// The single input step, if the graph declares exactly one.
    pub fn input_step(&self) -> Option<&StepNode> {
        let mut inputs = self.nodes.iter().filter(|n| n.is_input());
        match (inputs.next(), inputs.next()) {
            (Some(node), None) => Some(node),
            _ => None,
        }
    }

    /// Kahn's algorithm over step-level dependencies. Among nodes that are ready
    /// at the same time, the earliest declared comes first.
    pub fn topological_order(&self) -> Result<Vec<&StepNode>> {
        let index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for edge in &self.edges {
            let (Some(&from), Some(&to)) = (
                index.get(edge.source_step.as_str()),
                index.get(edge.dest_step.as_str()),
            ) else {
                return Err(LinkerError::Schema(format!(
                    "Edge {edge} references a step that is not in the graph"
                )));
            };
            if !successors[from].contains(&to) {
                successors[from].push(to);
                in_degree[to] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(current) = ready.pop_first() {
            order.push(&self.nodes[current]);
            for &next in &successors[current] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck: Vec<&str> = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, n)| n.name.as_str())
                .collect();
            return Err(LinkerError::Schema(format!(
                "Schema graph contains a cycle through: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    /// Implemented steps in execution order. Only meaningful on a flat graph.
    pub fn implemented_steps(&self) -> Result<Vec<&StepNode>> {
        if !self.is_flat() {
            return Err(LinkerError::Schema(
                "Implemented steps requested from a graph that has not been flattened".into(),
            ));
        }
        Ok(self
            .topological_order()?
            .into_iter()
            .filter(|n| n.is_implemented())
            .collect())
    }

    /// Names of the implemented steps in execution order.
    pub fn step_names(&self) -> Result<Vec<String>> {
        Ok(self
            .implemented_steps()?
            .into_iter()
            .map(|n| n.name.clone())
            .collect())
    }
}
