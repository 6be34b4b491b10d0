//! Validation of run options before they reach an interpreter.

use std::collections::BTreeMap;

use crate::core::types::Scalar;
use crate::error::RunError;

/// Run-time option overrides, keyed by option name.
pub type RunOptions = BTreeMap<String, Scalar>;

/// Check every option can be applied as an environment-style key/value pair.
pub fn validate_run_options(options: &RunOptions) -> Result<(), RunError> {
    for (key, value) in options {
        if key.is_empty() {
            return Err(RunError::InvalidRunOption(
                "run option names must be non-empty".to_string(),
            ));
        }
        if key.contains('=') || key.contains('\0') {
            return Err(RunError::InvalidRunOption(format!(
                "run option name '{}' may not contain '=' or NUL",
                key.escape_default()
            )));
        }
        if value.to_string().contains('\0') {
            return Err(RunError::InvalidRunOption(format!(
                "value of run option '{key}' contains NUL"
            )));
        }
    }
    Ok(())
}

/// Options rendered as the string pairs an interpreter applies, in key order.
pub fn render_run_options(options: &RunOptions) -> Vec<(String, String)> {
    options
        .iter()
        .map(|(key, value)| (key.clone(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_names() {
        for key in ["", "A=B", "A\0"] {
            let options = RunOptions::from([(key.to_string(), Scalar::Int(1))]);
            assert!(matches!(
                validate_run_options(&options),
                Err(RunError::InvalidRunOption(_))
            ));
        }
    }

    #[test]
    fn renders_scalars_as_strings() {
        let options = RunOptions::from([
            ("NUMBER".to_string(), Scalar::Int(4)),
            ("MODE".to_string(), Scalar::from("fast")),
        ]);
        validate_run_options(&options).expect("valid");
        assert_eq!(
            render_run_options(&options),
            vec![
                ("MODE".to_string(), "fast".to_string()),
                ("NUMBER".to_string(), "4".to_string()),
            ]
        );
    }
}
