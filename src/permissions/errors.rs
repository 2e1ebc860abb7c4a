//! Permission error types.

use thiserror::Error;

/// Errors raised while building rules or evaluating a request.
#[derive(Debug, Error)]
pub enum PermissionError {
    /// A tool or parameter pattern is not a valid regular expression.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A file path glob could not be translated.
    #[error("invalid path glob '{glob}': {reason}")]
    InvalidGlob { glob: String, reason: String },

    /// A scope string was not `global`, `project[:root]` or `session[:id]`.
    #[error("invalid permission scope: '{value}'")]
    InvalidScope { value: String },

    /// The evaluator could not reach a decision.
    #[error("permission evaluation failed for '{tool}': {reason}")]
    EvaluationFailed { tool: String, reason: String },
}
