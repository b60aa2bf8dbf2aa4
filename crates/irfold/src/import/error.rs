use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Non-fatal diagnostic collected while importing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportWarning {
    pub op: String,
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for ImportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.op, self.message)
    }
}

/// Import phase after which error-severity warnings are escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    Inputs,
    Operators,
    Outputs,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImportStage::Inputs => "input",
            ImportStage::Operators => "operator",
            ImportStage::Outputs => "output",
        })
    }
}

fn join(warnings: &[ImportWarning]) -> String {
    warnings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported operator {opcode}: {reason}")]
    UnsupportedOperator { opcode: String, reason: String },
    #[error("{opcode}: unsupported {param}: {reason}")]
    UnsupportedParameter {
        opcode: String,
        param: String,
        reason: String,
    },
    #[error("{opcode}: missing required input {index}")]
    MissingInput { opcode: String, index: usize },
    #[error("unknown tensor {name:?}")]
    UnknownTensor { name: String },
    #[error("malformed tensor {name:?}: {reason}")]
    MalformedTensor { name: String, reason: String },
    #[error("{stage} stage raised errors: {}", join(.warnings))]
    Warnings {
        stage: ImportStage,
        warnings: Vec<ImportWarning>,
    },
}

impl ImportError {
    pub(crate) fn unsupported_parameter(opcode: &str, param: &str, reason: impl Into<String>) -> Self {
        ImportError::UnsupportedParameter {
            opcode: opcode.to_string(),
            param: param.to_string(),
            reason: reason.into(),
        }
    }

    /// Opcode the error is attributed to, when there is one.
    pub fn opcode(&self) -> Option<&str> {
        match self {
            ImportError::UnsupportedOperator { opcode, .. }
            | ImportError::UnsupportedParameter { opcode, .. }
            | ImportError::MissingInput { opcode, .. } => Some(opcode),
            _ => None,
        }
    }
}
