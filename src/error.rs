//! Error types with fix suggestions

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum TrellisError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Binding errors (TRL-010 to TRL-015)
    // ─────────────────────────────────────────────────────────────

    #[error("TRL-010: Template '{template}' requires argument '{name}'")]
    MissingRequiredArgument { template: String, name: String },

    #[error("TRL-011: Unknown argument '{name}' for template '{template}'")]
    UnknownArgument { template: String, name: String },

    #[error("TRL-012: Argument '{name}' of template '{template}' expects {expected}, got {found}")]
    TypeMismatch {
        template: String,
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("TRL-013: Unknown template '{id}'")]
    UnknownTemplate { id: String },

    #[error("TRL-014: Duplicate unit name '{name}'")]
    DuplicateUnit { name: String },

    #[error("TRL-015: Invalid manifest: {details}")]
    InvalidManifest { details: String },

    // ─────────────────────────────────────────────────────────────
    // Directive errors (TRL-020 to TRL-021)
    // ─────────────────────────────────────────────────────────────

    #[error("TRL-020: Directive parse error at line {line}: {details}")]
    DirectiveParse { line: usize, details: String },

    #[error("TRL-021: Directive evaluation failed for path '{path}': {details}")]
    DirectiveEval { path: String, details: String },

    // ─────────────────────────────────────────────────────────────
    // Graph errors (TRL-030 to TRL-031)
    // ─────────────────────────────────────────────────────────────

    #[error("TRL-030: Unit '{unit}' references unknown unit '{referenced}'")]
    DanglingReference { unit: String, referenced: String },

    #[error("TRL-031: Dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    // ─────────────────────────────────────────────────────────────
    // Provisioning errors (TRL-040 to TRL-041)
    // ─────────────────────────────────────────────────────────────

    #[error("TRL-040: Resource creation failed for unit '{unit}': {cause}")]
    ResourceCreationFailed { unit: String, cause: String },

    #[error("TRL-041: Property '{property}' of unit '{unit}' failed to derive: {cause}")]
    PropertyDerivationFailed {
        unit: String,
        property: String,
        cause: String,
    },
}

impl FixSuggestion for TrellisError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TrellisError::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
            TrellisError::Io(_) => Some("Check file path and permissions"),

            TrellisError::MissingRequiredArgument { .. } => {
                Some("Add the argument to the unit's args block")
            }
            TrellisError::UnknownArgument { .. } => {
                Some("Remove the argument or check its spelling against the template schema")
            }
            TrellisError::TypeMismatch { .. } => {
                Some("Bind a literal of the declared shape, or a ${unit.attr} reference")
            }
            TrellisError::UnknownTemplate { .. } => {
                Some("Register the template or check the template id")
            }
            TrellisError::DuplicateUnit { .. } => Some("Use unique unit names within a stack"),
            TrellisError::InvalidManifest { .. } => {
                Some("Each unit needs a name, a template id, and an args mapping")
            }
            TrellisError::DirectiveParse { .. } => {
                Some("Balance {{- if }} / {{- else }} / {{- end }} markers")
            }
            TrellisError::DirectiveEval { .. } => {
                Some("Directive paths may only walk literal substructure, never into a reference")
            }
            TrellisError::DanglingReference { .. } => {
                Some("Declare the referenced unit in the same stack")
            }
            TrellisError::Cycle { .. } => {
                Some("Break the cycle - units cannot reference each other mutually")
            }
            TrellisError::ResourceCreationFailed { .. } => {
                Some("Check the backend's error detail; dependents were not issued")
            }
            TrellisError::PropertyDerivationFailed { .. } => {
                Some("Check the resolved attribute's shape against the transform's expectation")
            }
        }
    }
}
