//! Positional matching of the user's step bindings against the flattened schema.

use std::collections::HashSet;

use crate::config::StepBinding;

/// Compare the configured step order with the schema's step order and return
/// one message per mismatch. An empty result means the configuration fits.
///
/// When both sides name exactly the same steps but in a different order, a
/// single ordering error is reported at the first divergent (1-based) position.
/// Otherwise the length difference and every unknown or missing step name is
/// reported.
pub fn reconcile(schema_steps: &[String], bindings: &[StepBinding]) -> Vec<String> {
    let configured: Vec<&str> = bindings.iter().map(|b| b.step_name.as_str()).collect();
    let expected: Vec<&str> = schema_steps.iter().map(String::as_str).collect();

    if configured == expected {
        return Vec::new();
    }

    let expected_set: HashSet<&str> = expected.iter().copied().collect();
    let configured_set: HashSet<&str> = configured.iter().copied().collect();

    if expected_set == configured_set && expected.len() == configured.len() {
        let divergence = expected
            .iter()
            .zip(&configured)
            .enumerate()
            .find(|(_, (want, got))| want != got);
        if let Some((idx, (want, got))) = divergence {
            return vec![format!(
                "Step order mismatch at position {}: schema expects '{want}' but the \
                 pipeline configuration has '{got}'. Expected order: [{}]",
                idx + 1,
                expected.join(", ")
            )];
        }
    }

    let mut errors = Vec::new();
    if expected.len() != configured.len() {
        errors.push(format!(
            "Expected {} steps but the pipeline configuration has {}",
            expected.len(),
            configured.len()
        ));
    }
    for name in &configured {
        if !expected_set.contains(name) {
            errors.push(format!(
                "'{name}' is not a step of the schema. Valid steps: [{}]",
                expected.join(", ")
            ));
        }
    }
    for name in &expected {
        if !configured_set.contains(name) {
            errors.push(format!("Step '{name}' is missing from the pipeline configuration"));
        }
    }
    errors
}
