//! Typed connection points on steps and the edges that join them.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Name of the single result artifact every implemented step must produce.
pub const RESULT_FILE: &str = "result.parquet";

/// File-level validation capability attached to an input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    /// The file must exist.
    AnyFile,
    /// The file must exist, be non-empty, and carry a `.csv` or `.parquet` extension.
    DummyTable,
}

impl Validator {
    /// The function name the generated rule file calls for this validator.
    pub fn function_name(&self) -> &'static str {
        match self {
            Validator::AnyFile => "validate_file_exists",
            Validator::DummyTable => "validate_input_file_dummy",
        }
    }

    pub fn validate(&self, path: &Path) -> Result<(), String> {
        let meta = std::fs::metadata(path)
            .map_err(|_| format!("File '{}' does not exist", path.display()))?;
        if !meta.is_file() {
            return Err(format!("'{}' is not a file", path.display()));
        }
        match self {
            Validator::AnyFile => Ok(()),
            Validator::DummyTable => {
                let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
                if !matches!(ext, "csv" | "parquet") {
                    return Err(format!(
                        "File '{}' has unsupported extension '{ext}'; expected csv or parquet",
                        path.display()
                    ));
                }
                if meta.len() == 0 {
                    return Err(format!("File '{}' is empty", path.display()));
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSlot {
    pub name: String,
    /// Environment variable through which the slot's files reach the implementation.
    pub env_var: Option<String>,
    pub validator: Validator,
}

impl InputSlot {
    pub fn new(name: impl Into<String>, env_var: Option<&str>, validator: Validator) -> Self {
        Self {
            name: name.into(),
            env_var: env_var.map(String::from),
            validator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSlot {
    pub name: String,
}

impl OutputSlot {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A directed binding from `source_step.source_slot` (an output) to
/// `dest_step.dest_slot` (an input).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source_step: String,
    pub source_slot: String,
    pub dest_step: String,
    pub dest_slot: String,
}

impl Edge {
    pub fn new(
        source_step: impl Into<String>,
        source_slot: impl Into<String>,
        dest_step: impl Into<String>,
        dest_slot: impl Into<String>,
    ) -> Self {
        Self {
            source_step: source_step.into(),
            source_slot: source_slot.into(),
            dest_step: dest_step.into(),
            dest_slot: dest_slot.into(),
        }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source_step, self.source_slot, self.dest_step, self.dest_slot
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_file_requires_existence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        assert!(Validator::AnyFile.validate(&path).is_err());
        std::fs::write(&path, b"x").unwrap();
        assert!(Validator::AnyFile.validate(&path).is_ok());
    }

    #[test]
    fn dummy_table_checks_extension_and_size() {
        let dir = tempfile::tempdir().unwrap();

        let txt = dir.path().join("data.txt");
        std::fs::write(&txt, b"a,b").unwrap();
        let err = Validator::DummyTable.validate(&txt).unwrap_err();
        assert!(err.contains("unsupported extension"));

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, b"").unwrap();
        assert!(Validator::DummyTable.validate(&empty).unwrap_err().contains("empty"));

        let good = dir.path().join(RESULT_FILE);
        std::fs::write(&good, b"PAR1").unwrap();
        assert!(Validator::DummyTable.validate(&good).is_ok());
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Validator::AnyFile.validate(dir.path()).unwrap_err();
        assert!(err.contains("is not a file"));
    }

    #[test]
    fn edge_display() {
        let edge = Edge::new("a", "out", "b", "in");
        assert_eq!(edge.to_string(), "a.out -> b.in");
    }
}
