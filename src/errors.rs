//! Error types for the parts lifecycle.
//!
//! `PartsError` covers construction, planning, execution, state and
//! cleaning failures. Part specification problems carry either a
//! field-level error list or a free-text message.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::domain::Step;

/// Result alias used throughout the crate
pub type Result<T, E = PartsError> = std::result::Result<T, E>;

/// Errors raised by the parts lifecycle
#[derive(Debug, Error)]
pub enum PartsError {
    #[error(
        "Application name {name:?} is invalid: it must start with a letter and contain only letters, digits and underscores"
    )]
    InvalidApplicationName { name: String },

    #[error("Architecture {arch:?} is not supported")]
    InvalidArchitecture { arch: String },

    #[error("Parts definition is malformed: {0}")]
    MalformedProject(String),

    #[error("Parts definition is missing")]
    MissingParts,

    #[error(transparent)]
    PartSpecification(#[from] PartSpecificationError),

    #[error("No plugin was specified for part {part_name:?} and no plugin with that name exists")]
    UndefinedPlugin { part_name: String },

    #[error("Plugin {plugin_name:?} used by part {part_name:?} is not a registered plugin")]
    InvalidPlugin {
        plugin_name: String,
        part_name: String,
    },

    #[error("Part name {part_name:?} is invalid: it must not be empty, \".\", \"..\" or contain path separators")]
    InvalidPartName { part_name: String },

    #[error("A part named {part_name:?} is defined more than once")]
    DuplicatePart { part_name: String },

    #[error("Part {part_name:?} is ordered after {dependency:?}, which is not defined")]
    UnknownDependency {
        part_name: String,
        dependency: String,
    },

    #[error("A circular dependency chain was detected between parts: {}", parts.join(", "))]
    DependencyCycle { parts: Vec<String> },

    #[error("A part named {part_name:?} is not defined in the parts list")]
    PartNotFound { part_name: String },

    #[error("Failed to compute the {step} fingerprint of part {part_name:?}: {message}")]
    Fingerprint {
        part_name: String,
        step: Step,
        message: String,
    },

    #[error("Cannot {step} part {part_name:?}: {missing}")]
    MissingPrerequisite {
        part_name: String,
        step: Step,
        missing: String,
    },

    #[error("Failed to {step} part {part_name:?}: {source}")]
    StepFailed {
        part_name: String,
        step: Step,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Cannot {step} part {part_name:?}: {path:?} conflicts with the files of part {other_part:?}")]
    FileConflict {
        part_name: String,
        other_part: String,
        step: Step,
        path: String,
    },

    #[error("State I/O failed at {}: {source}", path.display())]
    State {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize step record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Work directory {} is in use by another process", path.display())]
    WorkDirLocked { path: PathBuf },

    #[error("Failed to clean {} target(s): {}", failures.len(), format_failures(failures))]
    Clean { failures: Vec<CleanFailure> },

    #[error("Failed to refresh package list: {0}")]
    PackageListRefresh(String),
}

impl PartsError {
    /// Wrap a collaborator failure with the part and step it happened in
    pub fn step_failed(part_name: &str, step: Step, source: anyhow::Error) -> Self {
        Self::StepFailed {
            part_name: part_name.to_string(),
            step,
            source: source.into(),
        }
    }

    pub(crate) fn state(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::State {
            path: path.into(),
            source,
        }
    }
}

/// A part specification failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Part {part_name:?} validation failed: {details}")]
pub struct PartSpecificationError {
    pub part_name: String,
    pub details: SpecificationDetails,
}

impl PartSpecificationError {
    /// Create an error from a field-level validation error list
    pub fn from_field_errors(part_name: impl Into<String>, errors: Vec<FieldError>) -> Self {
        Self {
            part_name: part_name.into(),
            details: SpecificationDetails::Fields(errors),
        }
    }

    /// Create an error carrying a free-text message
    pub fn with_message(part_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            part_name: part_name.into(),
            details: SpecificationDetails::Message(message.into()),
        }
    }

    /// Field errors, if the failure came from schema validation
    pub fn field_errors(&self) -> &[FieldError] {
        match &self.details {
            SpecificationDetails::Fields(errors) => errors,
            SpecificationDetails::Message(_) => &[],
        }
    }
}

/// What went wrong with a part specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecificationDetails {
    Fields(Vec<FieldError>),
    Message(String),
}

impl fmt::Display for SpecificationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fields(errors) => {
                let formatted: Vec<String> = errors.iter().map(ToString::to_string).collect();
                write!(f, "{}", formatted.join("; "))
            }
            Self::Message(message) => write!(f, "{}", message),
        }
    }
}

/// A single schema violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}': {}", self.field, self.message)
    }
}

/// A cleanup target that could not be removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanFailure {
    /// Part being cleaned, `None` for shared work directories
    pub part_name: Option<String>,
    pub step: Option<Step>,
    pub message: String,
}

impl fmt::Display for CleanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.part_name, self.step) {
            (Some(part), Some(step)) => write!(f, "{}:{}: {}", part, step, self.message),
            (Some(part), None) => write!(f, "{}: {}", part, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

fn format_failures(failures: &[CleanFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A step record that could not be loaded
///
/// Corrupt records are treated as "never run" and surfaced as warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateWarning {
    pub part_name: String,
    pub step: Step,
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for StateWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ignoring unreadable {} state of part {:?} ({}): {}",
            self.step,
            self.part_name,
            self.path.display(),
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_errors_display() {
        let err = PartSpecificationError::from_field_errors(
            "foo",
            vec![
                FieldError::new("after", "value is not a valid list"),
                FieldError::new("bogus", "extra field not permitted"),
            ],
        );

        assert_eq!(
            err.to_string(),
            "Part \"foo\" validation failed: 'after': value is not a valid list; 'bogus': extra field not permitted"
        );
        assert_eq!(err.field_errors().len(), 2);
    }

    #[test]
    fn test_message_details_have_no_field_errors() {
        let err = PartSpecificationError::with_message("foo", "part definition is malformed");
        assert!(err.field_errors().is_empty());
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn test_step_failed_keeps_context() {
        let err = PartsError::step_failed("foo", Step::Build, anyhow::anyhow!("make: *** Error 2"));
        assert_eq!(err.to_string(), "Failed to build part \"foo\": make: *** Error 2");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_clean_failures_listed() {
        let err = PartsError::Clean {
            failures: vec![CleanFailure {
                part_name: Some("foo".to_string()),
                step: Some(Step::Stage),
                message: "permission denied".to_string(),
            }],
        };
        assert_eq!(
            err.to_string(),
            "Failed to clean 1 target(s): foo:stage: permission denied"
        );
    }
}
