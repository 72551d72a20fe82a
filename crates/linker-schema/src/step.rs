//! Step variants and the per-step validation capability.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use linker_types::{LinkerError, Result};

use crate::slot::{Edge, InputSlot, OutputSlot, Validator, RESULT_FILE};

/// One re-mapping between a hierarchical step's own slot and a slot on one
/// of its nested nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMapping {
    pub inner_node: String,
    pub outer_slot: String,
    pub inner_slot: String,
}

impl SlotMapping {
    pub fn new(
        inner_node: impl Into<String>,
        outer_slot: impl Into<String>,
        inner_slot: impl Into<String>,
    ) -> Self {
        Self {
            inner_node: inner_node.into(),
            outer_slot: outer_slot.into(),
            inner_slot: inner_slot.into(),
        }
    }
}

/// Slot mappings keyed by direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotMappings {
    pub input: Vec<SlotMapping>,
    pub output: Vec<SlotMapping>,
}

/// The nested structure owned by a hierarchical step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubGraph {
    pub nodes: Vec<StepNode>,
    pub edges: Vec<Edge>,
    pub slot_mappings: SlotMappings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Pipeline source; has no input slots.
    Input,
    /// Leaf step bound to exactly one implementation.
    Implemented,
    /// Composite step expanded away by flattening.
    Hierarchical(Box<SubGraph>),
    /// Pipeline sink; has no output slots.
    Result,
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Input => "input",
            StepKind::Implemented => "implemented",
            StepKind::Hierarchical(_) => "hierarchical",
            StepKind::Result => "result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepNode {
    pub name: String,
    pub input_slots: Vec<InputSlot>,
    pub output_slots: Vec<OutputSlot>,
    pub kind: StepKind,
}

impl StepNode {
    pub fn input(name: impl Into<String>, output_slots: &[&str]) -> Self {
        Self {
            name: name.into(),
            input_slots: Vec::new(),
            output_slots: output_slots.iter().map(|s| OutputSlot::new(*s)).collect(),
            kind: StepKind::Input,
        }
    }

    pub fn implemented(
        name: impl Into<String>,
        input_slots: Vec<InputSlot>,
        output_slots: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            input_slots,
            output_slots: output_slots.iter().map(|s| OutputSlot::new(*s)).collect(),
            kind: StepKind::Implemented,
        }
    }

    pub fn hierarchical(
        name: impl Into<String>,
        input_slots: Vec<InputSlot>,
        output_slots: &[&str],
        nodes: Vec<StepNode>,
        edges: Vec<Edge>,
        slot_mappings: SlotMappings,
    ) -> Self {
        Self {
            name: name.into(),
            input_slots,
            output_slots: output_slots.iter().map(|s| OutputSlot::new(*s)).collect(),
            kind: StepKind::Hierarchical(Box::new(SubGraph {
                nodes,
                edges,
                slot_mappings,
            })),
        }
    }

    pub fn result(name: impl Into<String>, input_slots: Vec<InputSlot>) -> Self {
        Self {
            name: name.into(),
            input_slots,
            output_slots: Vec::new(),
            kind: StepKind::Result,
        }
    }

    pub fn input_slot(&self, name: &str) -> Option<&InputSlot> {
        self.input_slots.iter().find(|s| s.name == name)
    }

    pub fn output_slot(&self, name: &str) -> Option<&OutputSlot> {
        self.output_slots.iter().find(|s| s.name == name)
    }

    pub fn is_implemented(&self) -> bool {
        matches!(self.kind, StepKind::Implemented)
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, StepKind::Input)
    }

    pub fn is_result(&self) -> bool {
        matches!(self.kind, StepKind::Result)
    }

    pub fn subgraph(&self) -> Option<&SubGraph> {
        match &self.kind {
            StepKind::Hierarchical(sub) => Some(sub),
            _ => None,
        }
    }
}

/// Input/output checks every step variant answers for itself.
pub trait StepValidation {
    /// Run each input slot's validator over the files that slot receives,
    /// collecting every problem. A slot whose environment binding is a key of
    /// `bound` receives those files; any other slot receives `files`.
    fn validate_input(&self, files: &[PathBuf], bound: &IndexMap<String, Vec<PathBuf>>) -> Vec<String>;

    /// Confirm the step left its result artifact in `results_dir`.
    fn validate_output(&self, step_id: &str, results_dir: &Path) -> Result<()>;
}

impl StepValidation for StepNode {
    fn validate_input(&self, files: &[PathBuf], bound: &IndexMap<String, Vec<PathBuf>>) -> Vec<String> {
        if self.is_input() {
            return Vec::new();
        }
        let mut errors = Vec::new();
        let mut checked: Vec<(Validator, &Path)> = Vec::new();
        for slot in &self.input_slots {
            let received = slot
                .env_var
                .as_ref()
                .and_then(|var| bound.get(var))
                .map_or(files, Vec::as_slice);
            for file in received {
                if checked.contains(&(slot.validator, file.as_path())) {
                    continue;
                }
                checked.push((slot.validator, file.as_path()));
                if let Err(message) = slot.validator.validate(file) {
                    errors.push(message);
                }
            }
        }
        errors
    }

    fn validate_output(&self, step_id: &str, results_dir: &Path) -> Result<()> {
        match self.kind {
            StepKind::Input | StepKind::Result => Ok(()),
            StepKind::Implemented | StepKind::Hierarchical(_) => {
                if results_dir.join(RESULT_FILE).is_file() {
                    Ok(())
                } else {
                    Err(LinkerError::StepOutput {
                        step_id: step_id.to_string(),
                        results_dir: results_dir.display().to_string(),
                    })
                }
            }
        }
    }
}
