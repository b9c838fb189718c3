use thiserror::Error;

use crate::tagged::Tag;

/// Structured runtime errors for the VM core.
///
/// Drivers (REPL, file runner) match on the kind; messages are for humans.
/// Domain errors carry the exact text the language reference promises.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("Stack underflow: {op} requires {required} value(s) (stack: {stack})")]
    StackUnderflow {
        op: &'static str,
        required: usize,
        stack: String,
    },
    #[error("Stack overflow in {op} (stack: {stack})")]
    StackOverflow { op: &'static str, stack: String },
    #[error("Return stack underflow in {op}")]
    ReturnStackUnderflow { op: &'static str },
    #[error("Return stack overflow in {op}")]
    ReturnStackOverflow { op: &'static str },
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Range error: {0}")]
    Range(String),
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Unexpected token: {token}")]
    UnexpectedToken { token: String },
    #[error("Tag mismatch: expected {expected:?}, got {actual:?}")]
    TagMismatch { expected: Tag, actual: Tag },
    // plain runtime errors with fixed, documented messages
    #[error("{0}")]
    Domain(String),
}

impl VmError {
    pub fn domain(message: impl Into<String>) -> Self {
        VmError::Domain(message.into())
    }

    pub fn range(message: impl Into<String>) -> Self {
        VmError::Range(message.into())
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        VmError::Syntax(message.into())
    }
}

pub type Result<T, E = VmError> = std::result::Result<T, E>;
