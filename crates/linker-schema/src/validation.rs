//! Schema validation: lint rules and diagnostics.
//!
//! Structural rules run against the declared (possibly nested) graph. If they
//! pass, the graph is flattened and connectivity rules run against the flat
//! result. Call [`validate`] for every diagnostic, or [`validate_or_raise`] to get
//! the flattened graph back when nothing `Error`-severity was found.

use std::collections::HashSet;

use linker_types::{LinkerError, Result};

use crate::flatten::flatten;
use crate::graph::SchemaGraph;
use crate::step::StepNode;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub step: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    fn error(rule: &str, step: Option<&str>, message: String) -> Self {
        Self {
            rule: rule.into(),
            severity: Severity::Error,
            message,
            step: step.map(String::from),
        }
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, graph: &SchemaGraph) -> Vec<Diagnostic>;
}

/// Every scope of a declared graph: the top level plus each hierarchical
/// step's nested node set, paired with the scope's owner name.
fn scopes(graph: &SchemaGraph) -> Vec<(String, SchemaGraph)> {
    fn walk(nodes: &[StepNode], out: &mut Vec<(String, SchemaGraph)>) {
        for node in nodes {
            if let Some(sub) = node.subgraph() {
                out.push((
                    format!("step '{}'", node.name),
                    SchemaGraph::new(sub.nodes.clone(), sub.edges.clone()),
                ));
                walk(&sub.nodes, out);
            }
        }
    }
    let mut out = vec![("the schema".to_string(), graph.clone())];
    walk(graph.nodes(), &mut out);
    out
}

// ---------------------------------------------------------------------------
// Structural rules (declared graph)
// ---------------------------------------------------------------------------

struct UniqueStepNamesRule;
impl LintRule for UniqueStepNamesRule {
    fn name(&self) -> &str { "unique_step_names" }
    fn apply(&self, graph: &SchemaGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (owner, scope) in scopes(graph) {
            let mut seen = HashSet::new();
            for node in scope.nodes() {
                if !seen.insert(node.name.as_str()) {
                    diags.push(Diagnostic::error(
                        self.name(),
                        Some(&node.name),
                        format!("Step name '{}' is declared more than once in {owner}", node.name),
                    ));
                }
            }
        }
        diags
    }
}

struct UniqueSlotNamesRule;
impl LintRule for UniqueSlotNamesRule {
    fn name(&self) -> &str { "unique_slot_names" }
    fn apply(&self, graph: &SchemaGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (_, scope) in scopes(graph) {
            for node in scope.nodes() {
                let mut seen = HashSet::new();
                let names = node
                    .input_slots
                    .iter()
                    .map(|s| s.name.as_str())
                    .chain(node.output_slots.iter().map(|s| s.name.as_str()));
                for name in names {
                    if !seen.insert(name) {
                        diags.push(Diagnostic::error(
                            self.name(),
                            Some(&node.name),
                            format!("Step '{}' declares slot '{name}' more than once", node.name),
                        ));
                    }
                }
            }
        }
        diags
    }
}

struct StepShapeRule;
impl LintRule for StepShapeRule {
    fn name(&self) -> &str { "step_shape" }
    fn apply(&self, graph: &SchemaGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (_, scope) in scopes(graph) {
            for node in scope.nodes() {
                if node.is_input() && !node.input_slots.is_empty() {
                    diags.push(Diagnostic::error(
                        self.name(),
                        Some(&node.name),
                        format!("Input step '{}' must not declare input slots", node.name),
                    ));
                }
                if node.is_result() && !node.output_slots.is_empty() {
                    diags.push(Diagnostic::error(
                        self.name(),
                        Some(&node.name),
                        format!("Result step '{}' must not declare output slots", node.name),
                    ));
                }
            }
        }
        diags
    }
}

struct SourceAndSinkRule;
impl LintRule for SourceAndSinkRule {
    fn name(&self) -> &str { "source_and_sink" }
    fn apply(&self, graph: &SchemaGraph) -> Vec<Diagnostic> {
        let inputs = graph.nodes().iter().filter(|n| n.is_input()).count();
        let results = graph.nodes().iter().filter(|n| n.is_result()).count();
        let mut diags = Vec::new();
        if inputs != 1 {
            diags.push(Diagnostic::error(
                self.name(),
                None,
                format!("Schema must have exactly one input step, found {inputs}"),
            ));
        }
        if results != 1 {
            diags.push(Diagnostic::error(
                self.name(),
                None,
                format!("Schema must have exactly one result step, found {results}"),
            ));
        }
        diags
    }
}

struct EdgeEndpointsRule;
impl LintRule for EdgeEndpointsRule {
    fn name(&self) -> &str { "edge_endpoints" }
    fn apply(&self, graph: &SchemaGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (owner, scope) in scopes(graph) {
            for edge in scope.edges() {
                match scope.node(&edge.source_step) {
                    None => diags.push(Diagnostic::error(
                        self.name(),
                        None,
                        format!("Edge {edge} in {owner} starts at unknown step '{}'", edge.source_step),
                    )),
                    Some(node) if node.output_slot(&edge.source_slot).is_none() => {
                        diags.push(Diagnostic::error(
                            self.name(),
                            Some(&node.name),
                            format!(
                                "Edge {edge} starts at '{}', which is not an output slot of '{}'",
                                edge.source_slot, node.name
                            ),
                        ))
                    }
                    Some(_) => {}
                }
                match scope.node(&edge.dest_step) {
                    None => diags.push(Diagnostic::error(
                        self.name(),
                        None,
                        format!("Edge {edge} in {owner} ends at unknown step '{}'", edge.dest_step),
                    )),
                    Some(node) if node.input_slot(&edge.dest_slot).is_none() => {
                        diags.push(Diagnostic::error(
                            self.name(),
                            Some(&node.name),
                            format!(
                                "Edge {edge} ends at '{}', which is not an input slot of '{}'",
                                edge.dest_slot, node.name
                            ),
                        ))
                    }
                    Some(_) => {}
                }
            }
        }
        diags
    }
}

struct HierarchicalSlotsReferencedRule;
impl LintRule for HierarchicalSlotsReferencedRule {
    fn name(&self) -> &str { "hierarchical_slots_referenced" }
    fn apply(&self, graph: &SchemaGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (owner, scope) in scopes(graph) {
            for node in scope.nodes() {
                let Some(sub) = node.subgraph() else { continue };
                for slot in &node.input_slots {
                    let wired = scope
                        .incoming_edges(&node.name)
                        .any(|e| e.dest_slot == slot.name);
                    let mapped = sub.slot_mappings.input.iter().any(|m| m.outer_slot == slot.name);
                    if !wired && !mapped {
                        diags.push(Diagnostic::error(
                            self.name(),
                            Some(&node.name),
                            format!(
                                "Input slot '{}' of hierarchical step '{}' is referenced by no edge in {owner} and no slot mapping",
                                slot.name, node.name
                            ),
                        ));
                    }
                }
                for slot in &node.output_slots {
                    let wired = scope
                        .outgoing_edges(&node.name)
                        .any(|e| e.source_slot == slot.name);
                    let mapped = sub.slot_mappings.output.iter().any(|m| m.outer_slot == slot.name);
                    if !wired && !mapped {
                        diags.push(Diagnostic::error(
                            self.name(),
                            Some(&node.name),
                            format!(
                                "Output slot '{}' of hierarchical step '{}' is referenced by no edge in {owner} and no slot mapping",
                                slot.name, node.name
                            ),
                        ));
                    }
                }
            }
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Connectivity rules (flattened graph)
// ---------------------------------------------------------------------------

struct SingleIncomingEdgeRule;
impl LintRule for SingleIncomingEdgeRule {
    fn name(&self) -> &str { "single_incoming_edge" }
    fn apply(&self, graph: &SchemaGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for node in graph.nodes() {
            for slot in &node.input_slots {
                let count = graph
                    .incoming_edges(&node.name)
                    .filter(|e| e.dest_slot == slot.name)
                    .count();
                if count != 1 {
                    diags.push(Diagnostic::error(
                        self.name(),
                        Some(&node.name),
                        format!(
                            "Input slot '{}' of step '{}' has {count} incoming edges; expected exactly one",
                            slot.name, node.name
                        ),
                    ));
                }
            }
        }
        diags
    }
}

struct OutputsConsumedRule;
impl LintRule for OutputsConsumedRule {
    fn name(&self) -> &str { "outputs_consumed" }
    fn apply(&self, graph: &SchemaGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for node in graph.nodes() {
            for slot in &node.output_slots {
                let used = graph
                    .outgoing_edges(&node.name)
                    .any(|e| e.source_slot == slot.name);
                if !used {
                    diags.push(Diagnostic::error(
                        self.name(),
                        Some(&node.name),
                        format!(
                            "Output slot '{}' of step '{}' is not connected to any step",
                            slot.name, node.name
                        ),
                    ));
                }
            }
        }
        diags
    }
}

struct HasImplementedStepsRule;
impl LintRule for HasImplementedStepsRule {
    fn name(&self) -> &str { "has_implemented_steps" }
    fn apply(&self, graph: &SchemaGraph) -> Vec<Diagnostic> {
        if graph.nodes().iter().any(StepNode::is_implemented) {
            vec![]
        } else {
            vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: "Schema contains no implemented steps; nothing would run".into(),
                step: None,
            }]
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

fn structural_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(UniqueStepNamesRule),
        Box::new(UniqueSlotNamesRule),
        Box::new(StepShapeRule),
        Box::new(SourceAndSinkRule),
        Box::new(EdgeEndpointsRule),
        Box::new(HierarchicalSlotsReferencedRule),
    ]
}

fn connectivity_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(SingleIncomingEdgeRule),
        Box::new(OutputsConsumedRule),
        Box::new(HasImplementedStepsRule),
    ]
}

fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == Severity::Error)
}

/// Run all lint rules and return every diagnostic found.
pub fn validate(graph: &SchemaGraph) -> Vec<Diagnostic> {
    validate_and_flatten(graph).0
}

/// Run all lint rules and, when the structural rules pass, flatten the graph.
/// The flattened graph is returned alongside the diagnostics even if the
/// connectivity rules found errors.
pub fn validate_and_flatten(graph: &SchemaGraph) -> (Vec<Diagnostic>, Option<SchemaGraph>) {
    let mut diagnostics = Vec::new();
    for rule in &structural_rules() {
        diagnostics.extend(rule.apply(graph));
    }
    if has_errors(&diagnostics) {
        return (diagnostics, None);
    }

    let flat = match flatten(graph) {
        Ok(flat) => flat,
        Err(err) => {
            let message = match err {
                LinkerError::Schema(msg) => msg,
                other => other.to_string(),
            };
            diagnostics.push(Diagnostic::error("flatten", None, message));
            return (diagnostics, None);
        }
    };

    for rule in &connectivity_rules() {
        diagnostics.extend(rule.apply(&flat));
    }
    (diagnostics, Some(flat))
}

/// Run all lint rules; return the flattened graph, or `Err` if any
/// `Error`-severity diagnostic was found.
pub fn validate_or_raise(graph: &SchemaGraph) -> Result<SchemaGraph> {
    let (diagnostics, flat) = validate_and_flatten(graph);
    for diag in diagnostics.iter().filter(|d| d.severity == Severity::Warning) {
        tracing::warn!(rule = %diag.rule, "{}", diag.message);
    }
    match flat {
        Some(flat) if !has_errors(&diagnostics) => Ok(flat),
        _ => {
            let messages: Vec<_> = diagnostics
                .iter()
                .filter(|d| d.severity == Severity::Error)
                .map(|d| d.message.clone())
                .collect();
            Err(LinkerError::Schema(messages.join("; ")))
        }
    }
}

/// Error messages only, in rule order.
pub fn error_messages(diagnostics: &[Diagnostic]) -> Vec<String> {
    diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
