//! Schema graph compiler: slots, edges, step variants, validation and flattening.

pub mod builtin;
pub mod flatten;
pub mod graph;
pub mod slot;
pub mod step;
pub mod validation;

pub use builtin::{builtin, BUILTIN_SCHEMAS};
pub use flatten::flatten;
pub use graph::SchemaGraph;
pub use slot::{Edge, InputSlot, OutputSlot, Validator, RESULT_FILE};
pub use step::{SlotMapping, SlotMappings, StepKind, StepNode, StepValidation, SubGraph};
pub use validation::{
    error_messages, validate, validate_and_flatten, validate_or_raise, Diagnostic, LintRule,
    Severity,
};
