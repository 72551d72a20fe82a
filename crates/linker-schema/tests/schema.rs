//! Compile shipped and hand-built schemas end to end: validate -> flatten -> order.

use std::path::PathBuf;

use indexmap::IndexMap;
use linker_schema::{
    builtin, flatten, validate, validate_or_raise, Edge, InputSlot, SchemaGraph, Severity,
    SlotMapping, SlotMappings, StepNode, StepValidation, Validator,
};
use linker_types::LinkerError;

fn slot(name: &str) -> InputSlot {
    InputSlot::new(name, Some("DUMMY_CONTAINER_MAIN_INPUT_FILE_PATHS"), Validator::DummyTable)
}

fn leaf(name: &str) -> StepNode {
    StepNode::implemented(name, vec![slot("in")], &["out"])
}

/// Wraps `inner` leaves into a chain inside hierarchical step `name`.
fn group(name: &str, inner: Vec<StepNode>) -> StepNode {
    let names: Vec<String> = inner.iter().map(|n| n.name.clone()).collect();
    let edges = names
        .windows(2)
        .map(|w| Edge::new(w[0].as_str(), "out", w[1].as_str(), "in"))
        .collect();
    StepNode::hierarchical(
        name,
        vec![slot("in")],
        &["out"],
        inner,
        edges,
        SlotMappings {
            input: vec![SlotMapping::new(names[0].as_str(), "in", "in")],
            output: vec![SlotMapping::new(names[names.len() - 1].as_str(), "out", "out")],
        },
    )
}

fn pipeline(middle: Vec<StepNode>) -> SchemaGraph {
    let mut names = vec!["source".to_string()];
    names.extend(middle.iter().map(|n| n.name.clone()));
    names.push("sink".to_string());

    let mut nodes = vec![StepNode::input("source", &["out"])];
    nodes.extend(middle);
    nodes.push(StepNode::result("sink", vec![slot("in")]));

    let edges = names
        .windows(2)
        .map(|w| Edge::new(w[0].as_str(), "out", w[1].as_str(), "in"))
        .collect();
    SchemaGraph::new(nodes, edges)
}

#[test]
fn leaf_count_survives_deep_nesting() {
    let schema = pipeline(vec![
        leaf("a"),
        group("g1", vec![leaf("b"), group("g2", vec![leaf("c"), leaf("d")]), leaf("e")]),
        leaf("f"),
    ]);

    let flat = validate_or_raise(&schema).expect("schema should compile");
    assert_eq!(flat.step_names().unwrap(), vec!["a", "b", "c", "d", "e", "f"]);

    // Every edge joins consecutive steps in the flat order.
    for edge in flat.edges() {
        assert!(flat.node(&edge.source_step).is_some());
        assert!(flat.node(&edge.dest_step).is_some());
    }
    assert_eq!(flatten(&flat).unwrap(), flat);
}

#[test]
fn shipped_development_schema_compiles() {
    let flat = validate_or_raise(&builtin("development").unwrap()).unwrap();
    let steps = flat.implemented_steps().unwrap();
    assert_eq!(steps.len(), 5);
    assert_eq!(steps[4].input_slots.len(), 2);
}

#[test]
fn bad_mapping_surfaces_as_single_schema_error() {
    let broken = StepNode::hierarchical(
        "g",
        vec![slot("in")],
        &["out"],
        vec![leaf("x")],
        vec![],
        SlotMappings {
            input: vec![SlotMapping::new("missing", "in", "in")],
            output: vec![SlotMapping::new("x", "out", "out")],
        },
    );
    let schema = pipeline(vec![broken]);

    let diags = validate(&schema);
    let errors: Vec<_> = diags.iter().filter(|d| d.severity == Severity::Error).collect();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].message.contains("missing"));

    match validate_or_raise(&schema) {
        Err(LinkerError::Schema(msg)) => assert!(msg.contains("missing")),
        other => panic!("expected schema error, got {other:?}"),
    }
}

#[test]
fn flattened_steps_validate_their_own_files() {
    let dir = tempfile::tempdir().unwrap();
    let table = dir.path().join("input.csv");
    std::fs::write(&table, "foo,bar\n1,2\n").unwrap();

    let flat = validate_or_raise(&builtin("integration").unwrap()).unwrap();
    let step = flat.implemented_steps().unwrap()[0];

    assert!(step.validate_input(&[table], &IndexMap::new()).is_empty());
    let errors = step.validate_input(&[PathBuf::from("/nowhere/input.csv")], &IndexMap::new());
    assert_eq!(errors.len(), 1);
    assert!(step.validate_output("1_step_1", dir.path()).is_err());
}
