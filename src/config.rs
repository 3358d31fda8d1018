//! Compiler configuration.

use serde::{Deserialize, Serialize};

/// Knobs for one compilation. Every field has a default so a partial JSON
/// config file is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilerConfig {
    /// Fail at finalize when any unrecognized key was recorded.
    pub fail_on_problems: bool,
    /// Rewrite `${constant::NAME}` placeholders before validation.
    pub substitute_constants: bool,
    /// Compute, criterion and step indices must run 1..=n without gaps.
    pub require_contiguous_indices: bool,
    /// Every compile-time source reference must name a source of the connector.
    pub validate_references: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            fail_on_problems: false,
            substitute_constants: true,
            require_contiguous_indices: true,
            validate_references: true,
        }
    }
}

impl CompilerConfig {
    /// Config that rejects anything the rule table does not understand.
    pub fn strict() -> Self {
        Self {
            fail_on_problems: true,
            ..Self::default()
        }
    }

    /// Config that only builds the graph and the plan, skipping the
    /// cross-entity checks.
    pub fn lenient() -> Self {
        Self {
            fail_on_problems: false,
            substitute_constants: true,
            require_contiguous_indices: false,
            validate_references: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CompilerConfig::default();
        assert!(!config.fail_on_problems);
        assert!(config.substitute_constants);
        assert!(config.require_contiguous_indices);
        assert!(config.validate_references);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: CompilerConfig = serde_json::from_str(r#"{ "failOnProblems": true }"#).unwrap();
        assert_eq!(config, CompilerConfig::strict());
    }

    #[test]
    fn lenient_config() {
        let config = CompilerConfig::lenient();
        assert!(!config.validate_references);
        assert!(!config.require_contiguous_indices);
    }
}
