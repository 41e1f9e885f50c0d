//! CLI error types with exit code handling
//!
//! Library errors are classified into a handful of variants, each with a
//! stable exit code. A trailing `Hint:` in the library message becomes the
//! diagnostic's help text.

use foundry_component::ComponentError;
use foundry_core::CoreError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

pub type Result<T> = std::result::Result<T, CliError>;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Bad input: unknown component, missing flag, invalid configuration
    #[error("{message}")]
    #[diagnostic(code(foundry::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// A dependency is not installed
    #[error("{message}")]
    #[diagnostic(code(foundry::cli::dependency))]
    Dependency {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// SSH, helm, Kubernetes or DNS failure
    #[error("{message}")]
    #[diagnostic(code(foundry::cli::substrate))]
    Substrate {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Automatic repair was refused for a stateful release
    #[error("{message}")]
    #[diagnostic(
        code(foundry::cli::manual_intervention),
        help("no data was deleted; follow the steps above")
    )]
    ManualIntervention { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(foundry::cli::io))]
    Io { message: String },

    #[error("Interrupted")]
    #[diagnostic(
        code(foundry::cli::cancelled),
        help("the operation stopped mid-flight; re-run the same command to reconcile")
    )]
    Cancelled,

    /// Anything else
    #[error("{message}")]
    #[diagnostic(code(foundry::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Dependency { .. } => exit_codes::DEPENDENCY_ERROR,
            CliError::Substrate { .. } => exit_codes::SUBSTRATE_ERROR,
            CliError::ManualIntervention { .. } => exit_codes::MANUAL_INTERVENTION,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Cancelled => exit_codes::CANCELLED,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }
}

/// Split `message\nHint: text` into the message and its hint
fn split_hint(message: &str) -> (String, Option<String>) {
    match message.split_once("\nHint: ") {
        Some((message, hint)) => (message.to_string(), Some(hint.to_string())),
        None => (message.to_string(), None),
    }
}

impl From<ComponentError> for CliError {
    fn from(err: ComponentError) -> Self {
        if err.is_manual_intervention() {
            return CliError::ManualIntervention {
                message: err.to_string(),
            };
        }

        let (message, help) = split_hint(&err.to_string());
        if err.is_validation() {
            return CliError::Validation { message, help };
        }
        if err.is_dependency() {
            return CliError::Dependency { message, help };
        }

        match err {
            ComponentError::Cancelled => CliError::Cancelled,
            ComponentError::Io(_) | ComponentError::Core(CoreError::Io(_)) => {
                CliError::Io { message }
            }
            ComponentError::Core(CoreError::SecretNotFound { .. }) => {
                CliError::Validation { message, help }
            }
            ComponentError::Core(_) | ComponentError::Serialization(_) => {
                CliError::Other { message }
            }
            _ => CliError::Substrate { message, help },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        ComponentError::from(err).into()
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_error_keeps_hint() {
        let err: CliError = ComponentError::DependencyNotSatisfied {
            component: "k3s".to_string(),
            dependency: "openbao".to_string(),
            hint: "run `foundry component install openbao` first".to_string(),
        }
        .into();

        assert_eq!(err.exit_code(), exit_codes::DEPENDENCY_ERROR);
        match err {
            CliError::Dependency { message, help } => {
                assert!(!message.contains("Hint"));
                assert_eq!(
                    help.as_deref(),
                    Some("run `foundry component install openbao` first")
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_classification() {
        let not_found: CliError = ComponentError::ComponentNotFound {
            name: "x".to_string(),
            suggestion: None,
        }
        .into();
        assert_eq!(not_found.exit_code(), exit_codes::VALIDATION_ERROR);

        let host: CliError = ComponentError::Core(CoreError::HostNotFound {
            role: "dns".to_string(),
        })
        .into();
        assert_eq!(host.exit_code(), exit_codes::VALIDATION_ERROR);

        let remote: CliError = ComponentError::RemoteCommand {
            host: "zot-1".to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "boom".to_string(),
        }
        .into();
        assert_eq!(remote.exit_code(), exit_codes::SUBSTRATE_ERROR);

        let cancelled: CliError = ComponentError::Cancelled.into();
        assert_eq!(cancelled.exit_code(), exit_codes::CANCELLED);
    }

    #[test]
    fn test_manual_intervention_exit_code() {
        let err: CliError = ComponentError::ManualIntervention {
            component: "loki".to_string(),
            release: "loki".to_string(),
            namespace: "monitoring".to_string(),
            status: "failed".to_string(),
            source: Box::new(ComponentError::Cancelled),
        }
        .into();
        assert_eq!(err.exit_code(), exit_codes::MANUAL_INTERVENTION);
    }
}
