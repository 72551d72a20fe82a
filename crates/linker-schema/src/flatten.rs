//! Recursive expansion of hierarchical steps into a single flat graph.

use std::collections::{HashMap, HashSet};

use linker_types::{LinkerError, Result};

use crate::graph::SchemaGraph;
use crate::slot::{Edge, InputSlot, OutputSlot};
use crate::step::{SlotMapping, StepKind, StepNode, SubGraph};

/// Expand every hierarchical step until only input, implemented and result
/// steps remain, then order the nodes topologically.
///
/// Nested names are kept unless they collide with a name already present in the
/// enclosing scope, in which case they become `<hierarchical>.<nested>`.
/// Boundary edges are rewritten through the hierarchical step's slot mappings.
///
/// Flattening an already-flat graph returns an identical graph.
pub fn flatten(graph: &SchemaGraph) -> Result<SchemaGraph> {
    let mut nodes = graph.nodes().to_vec();
    let mut edges = graph.edges().to_vec();

    while let Some(pos) = nodes.iter().position(|n| n.subgraph().is_some()) {
        let StepNode {
            name,
            input_slots,
            output_slots,
            kind,
        } = nodes.remove(pos);
        let StepKind::Hierarchical(sub) = kind else {
            return Err(LinkerError::Schema(format!(
                "Step '{name}' was expected to be hierarchical"
            )));
        };

        let scope: HashSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        let renames = qualify_names(&name, &sub, &scope)?;
        check_mappings(&name, &input_slots, &output_slots, &sub)?;

        let SubGraph {
            nodes: nested,
            edges: internal,
            slot_mappings,
        } = *sub;

        let mut rewritten = Vec::with_capacity(edges.len() + internal.len());
        for edge in edges.drain(..) {
            for edge in rewrite_dest(&name, edge, &slot_mappings.input, &renames)? {
                rewritten.push(rewrite_source(&name, edge, &slot_mappings.output, &renames)?);
            }
        }
        for edge in internal {
            rewritten.push(Edge {
                source_step: renamed(&renames, &edge.source_step),
                source_slot: edge.source_slot,
                dest_step: renamed(&renames, &edge.dest_step),
                dest_slot: edge.dest_slot,
            });
        }
        edges = rewritten;

        tracing::debug!(step = %name, nested = nested.len(), "expanded hierarchical step");
        let spliced = nested.into_iter().map(|mut node| {
            node.name = renamed(&renames, &node.name);
            node
        });
        nodes.splice(pos..pos, spliced);
    }

    for edge in &edges {
        for endpoint in [&edge.source_step, &edge.dest_step] {
            if !nodes.iter().any(|n| &n.name == endpoint) {
                return Err(LinkerError::Schema(format!(
                    "Flattening left dangling edge {edge}: step '{endpoint}' does not exist"
                )));
            }
        }
    }

    let unordered = SchemaGraph::new(nodes, edges);
    let ordered: Vec<StepNode> = unordered
        .topological_order()?
        .into_iter()
        .cloned()
        .collect();
    Ok(SchemaGraph::new(ordered, unordered.edges().to_vec()))
}

fn qualify_names(
    parent: &str,
    sub: &SubGraph,
    scope: &HashSet<&str>,
) -> Result<HashMap<String, String>> {
    let mut renames = HashMap::new();
    let mut taken: HashSet<String> = scope.iter().map(|s| s.to_string()).collect();
    for node in &sub.nodes {
        if renames.contains_key(&node.name) {
            return Err(LinkerError::Schema(format!(
                "Hierarchical step '{parent}' declares nested step '{}' more than once",
                node.name
            )));
        }
        let new_name = if taken.contains(&node.name) {
            format!("{parent}.{}", node.name)
        } else {
            node.name.clone()
        };
        if !taken.insert(new_name.clone()) {
            return Err(LinkerError::Schema(format!(
                "Nested step '{}' of '{parent}' cannot be given a unique name",
                node.name
            )));
        }
        renames.insert(node.name.clone(), new_name);
    }
    Ok(renames)
}

fn check_mappings(
    parent: &str,
    input_slots: &[InputSlot],
    output_slots: &[OutputSlot],
    sub: &SubGraph,
) -> Result<()> {
    let nested = |name: &str| sub.nodes.iter().find(|n| n.name == name);

    for mapping in &sub.slot_mappings.input {
        let inner = nested(&mapping.inner_node).ok_or_else(|| {
            LinkerError::Schema(format!(
                "Input mapping of '{parent}' references non-existent nested step '{}'",
                mapping.inner_node
            ))
        })?;
        if inner.input_slot(&mapping.inner_slot).is_none() {
            return Err(LinkerError::Schema(format!(
                "Input mapping of '{parent}' references non-existent input slot '{}' on '{}'",
                mapping.inner_slot, mapping.inner_node
            )));
        }
        if !input_slots.iter().any(|s| s.name == mapping.outer_slot) {
            return Err(LinkerError::Schema(format!(
                "Input mapping of '{parent}' references non-existent outer slot '{}'",
                mapping.outer_slot
            )));
        }
    }

    for mapping in &sub.slot_mappings.output {
        let inner = nested(&mapping.inner_node).ok_or_else(|| {
            LinkerError::Schema(format!(
                "Output mapping of '{parent}' references non-existent nested step '{}'",
                mapping.inner_node
            ))
        })?;
        if inner.output_slot(&mapping.inner_slot).is_none() {
            return Err(LinkerError::Schema(format!(
                "Output mapping of '{parent}' references non-existent output slot '{}' on '{}'",
                mapping.inner_slot, mapping.inner_node
            )));
        }
        if !output_slots.iter().any(|s| s.name == mapping.outer_slot) {
            return Err(LinkerError::Schema(format!(
                "Output mapping of '{parent}' references non-existent outer slot '{}'",
                mapping.outer_slot
            )));
        }
    }
    Ok(())
}

fn renamed(renames: &HashMap<String, String>, name: &str) -> String {
    renames
        .get(name)
        .cloned()
        .unwrap_or_else(|| name.to_string())
}

/// An edge into the hierarchical step fans out to every nested slot mapped
/// from the targeted outer slot.
fn rewrite_dest(
    parent: &str,
    edge: Edge,
    mappings: &[SlotMapping],
    renames: &HashMap<String, String>,
) -> Result<Vec<Edge>> {
    if edge.dest_step != parent {
        return Ok(vec![edge]);
    }
    let targets: Vec<Edge> = mappings
        .iter()
        .filter(|m| m.outer_slot == edge.dest_slot)
        .map(|m| Edge {
            source_step: edge.source_step.clone(),
            source_slot: edge.source_slot.clone(),
            dest_step: renamed(renames, &m.inner_node),
            dest_slot: m.inner_slot.clone(),
        })
        .collect();
    if targets.is_empty() {
        return Err(LinkerError::Schema(format!(
            "Edge {edge} has no input mapping inside '{parent}'"
        )));
    }
    Ok(targets)
}

fn rewrite_source(
    parent: &str,
    edge: Edge,
    mappings: &[SlotMapping],
    renames: &HashMap<String, String>,
) -> Result<Edge> {
    if edge.source_step != parent {
        return Ok(edge);
    }
    let mut sources = mappings.iter().filter(|m| m.outer_slot == edge.source_slot);
    match (sources.next(), sources.next()) {
        (Some(m), None) => Ok(Edge {
            source_step: renamed(renames, &m.inner_node),
            source_slot: m.inner_slot.clone(),
            dest_step: edge.dest_step,
            dest_slot: edge.dest_slot,
        }),
        (None, _) => Err(LinkerError::Schema(format!(
            "Edge {edge} has no output mapping inside '{parent}'"
        ))),
        (Some(_), Some(_)) => Err(LinkerError::Schema(format!(
            "Output slot '{}' of '{parent}' is mapped from more than one nested slot",
            edge.source_slot
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Validator;
    use crate::step::SlotMappings;

    fn slot(name: &str) -> InputSlot {
        InputSlot::new(name, Some("DUMMY_CONTAINER_MAIN_INPUT_FILE_PATHS"), Validator::AnyFile)
    }

    fn leaf(name: &str) -> StepNode {
        StepNode::implemented(name, vec![slot("in")], &["out"])
    }

    fn wrapper(
        name: &str,
        nodes: Vec<StepNode>,
        edges: Vec<Edge>,
        first: &str,
        last: &str,
    ) -> StepNode {
        StepNode::hierarchical(
            name,
            vec![slot("in")],
            &["out"],
            nodes,
            edges,
            SlotMappings {
                input: vec![SlotMapping::new(first, "in", "in")],
                output: vec![SlotMapping::new(last, "out", "out")],
            },
        )
    }

    fn chain(middle: StepNode) -> SchemaGraph {
        let name = middle.name.clone();
        SchemaGraph::new(
            vec![
                StepNode::input("source", &["file"]),
                middle,
                StepNode::result("sink", vec![slot("result")]),
            ],
            vec![
                Edge::new("source", "file", name.as_str(), "in"),
                Edge::new(name.as_str(), "out", "sink", "result"),
            ],
        )
    }

    #[test]
    fn expands_single_level() {
        let h = wrapper(
            "h",
            vec![leaf("a"), leaf("b")],
            vec![Edge::new("a", "out", "b", "in")],
            "a",
            "b",
        );
        let flat = flatten(&chain(h)).unwrap();
        assert!(flat.is_flat());
        assert_eq!(flat.step_names().unwrap(), vec!["a", "b"]);
        assert!(flat
            .edges()
            .contains(&Edge::new("source", "file", "a", "in")));
        assert!(flat.edges().contains(&Edge::new("b", "out", "sink", "result")));
        assert!(flat.edges().contains(&Edge::new("a", "out", "b", "in")));
    }

    #[test]
    fn expands_nested_levels() {
        let inner = wrapper(
            "inner",
            vec![leaf("x"), leaf("y")],
            vec![Edge::new("x", "out", "y", "in")],
            "x",
            "y",
        );
        let h = wrapper(
            "h",
            vec![leaf("a"), inner],
            vec![Edge::new("a", "out", "inner", "in")],
            "a",
            "inner",
        );
        let flat = flatten(&chain(h)).unwrap();
        assert_eq!(flat.step_names().unwrap(), vec!["a", "x", "y"]);
        assert!(flat.edges().contains(&Edge::new("y", "out", "sink", "result")));
    }

    #[test]
    fn qualifies_colliding_names() {
        let h = wrapper("h", vec![leaf("source")], vec![], "source", "source");
        let flat = flatten(&chain(h)).unwrap();
        assert_eq!(flat.step_names().unwrap(), vec!["h.source"]);
        assert!(flat
            .edges()
            .contains(&Edge::new("source", "file", "h.source", "in")));
    }

    #[test]
    fn flatten_is_idempotent() {
        let h = wrapper(
            "h",
            vec![leaf("a"), leaf("b")],
            vec![Edge::new("a", "out", "b", "in")],
            "a",
            "b",
        );
        let once = flatten(&chain(h)).unwrap();
        let twice = flatten(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_nested_node_in_mapping_is_schema_error() {
        let h = wrapper("h", vec![leaf("a")], vec![], "ghost", "a");
        let err = flatten(&chain(h)).unwrap_err();
        assert!(matches!(err, LinkerError::Schema(_)));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn missing_nested_slot_in_mapping_is_schema_error() {
        let h = StepNode::hierarchical(
            "h",
            vec![slot("in")],
            &["out"],
            vec![leaf("a")],
            vec![],
            SlotMappings {
                input: vec![SlotMapping::new("a", "in", "no_such_slot")],
                output: vec![SlotMapping::new("a", "out", "out")],
            },
        );
        let err = flatten(&chain(h)).unwrap_err();
        assert!(err.to_string().contains("no_such_slot"));
    }

    #[test]
    fn unmapped_boundary_edge_is_dangling() {
        let h = StepNode::hierarchical(
            "h",
            vec![slot("in")],
            &["out"],
            vec![leaf("a")],
            vec![],
            SlotMappings {
                input: vec![SlotMapping::new("a", "in", "in")],
                output: vec![],
            },
        );
        let err = flatten(&chain(h)).unwrap_err();
        assert!(err.to_string().contains("no output mapping"));
    }

    #[test]
    fn cyclic_result_is_rejected() {
        let graph = SchemaGraph::new(
            vec![leaf("a"), leaf("b")],
            vec![
                Edge::new("a", "out", "b", "in"),
                Edge::new("b", "out", "a", "in"),
            ],
        );
        assert!(matches!(flatten(&graph), Err(LinkerError::Schema(_))));
    }
}
