//! Named schemas shipped with the linker.

use linker_types::{LinkerError, Result};

use crate::graph::SchemaGraph;
use crate::slot::{Edge, InputSlot, Validator};
use crate::step::{SlotMapping, SlotMappings, StepNode};

pub const INPUT_STEP: &str = "input_data_schema";
pub const RESULT_STEP: &str = "results_schema";

pub const MAIN_INPUT_ENV: &str = "DUMMY_CONTAINER_MAIN_INPUT_FILE_PATHS";
pub const SECONDARY_INPUT_ENV: &str = "DUMMY_CONTAINER_SECONDARY_INPUT_FILE_PATHS";

/// Names accepted by [`builtin`].
pub const BUILTIN_SCHEMAS: &[&str] = &["development", "integration"];

/// Look up a shipped schema by name.
pub fn builtin(name: &str) -> Result<SchemaGraph> {
    match name {
        "development" => Ok(development()),
        "integration" => Ok(integration()),
        other => Err(LinkerError::Config(format!(
            "Unknown schema '{other}'; available schemas: {}",
            BUILTIN_SCHEMAS.join(", ")
        ))),
    }
}

fn main_input(step: &str) -> InputSlot {
    InputSlot::new(
        format!("{step}_main_input"),
        Some(MAIN_INPUT_ENV),
        Validator::DummyTable,
    )
}

fn single_step(name: &str) -> StepNode {
    let output = format!("{name}_main_output");
    StepNode::implemented(name, vec![main_input(name)], &[output.as_str()])
}

fn source() -> StepNode {
    StepNode::input(INPUT_STEP, &["file1"])
}

fn sink() -> StepNode {
    StepNode::result(
        RESULT_STEP,
        vec![InputSlot::new("result", None, Validator::DummyTable)],
    )
}

/// Four top-level steps, the first of which is a two-step sub-pipeline, with
/// step 4 also reading the raw input data.
pub fn development() -> SchemaGraph {
    let step_1 = StepNode::hierarchical(
        "step_1",
        vec![main_input("step_1")],
        &["step_1_main_output"],
        vec![single_step("step_1a"), single_step("step_1b")],
        vec![Edge::new(
            "step_1a",
            "step_1a_main_output",
            "step_1b",
            "step_1b_main_input",
        )],
        SlotMappings {
            input: vec![SlotMapping::new(
                "step_1a",
                "step_1_main_input",
                "step_1a_main_input",
            )],
            output: vec![SlotMapping::new(
                "step_1b",
                "step_1_main_output",
                "step_1b_main_output",
            )],
        },
    );

    let step_4 = StepNode::implemented(
        "step_4",
        vec![
            main_input("step_4"),
            InputSlot::new(
                "step_4_secondary_input",
                Some(SECONDARY_INPUT_ENV),
                Validator::DummyTable,
            ),
        ],
        &["step_4_main_output"],
    );

    SchemaGraph::new(
        vec![
            source(),
            step_1,
            single_step("step_2"),
            single_step("step_3"),
            step_4,
            sink(),
        ],
        vec![
            Edge::new(INPUT_STEP, "file1", "step_1", "step_1_main_input"),
            Edge::new(INPUT_STEP, "file1", "step_4", "step_4_secondary_input"),
            Edge::new("step_1", "step_1_main_output", "step_2", "step_2_main_input"),
            Edge::new("step_2", "step_2_main_output", "step_3", "step_3_main_input"),
            Edge::new("step_3", "step_3_main_output", "step_4", "step_4_main_input"),
            Edge::new("step_4", "step_4_main_output", RESULT_STEP, "result"),
        ],
    )
}

/// A single implemented step between the input data and the results.
pub fn integration() -> SchemaGraph {
    SchemaGraph::new(
        vec![source(), single_step("step_1"), sink()],
        vec![
            Edge::new(INPUT_STEP, "file1", "step_1", "step_1_main_input"),
            Edge::new("step_1", "step_1_main_output", RESULT_STEP, "result"),
        ],
    )
}
