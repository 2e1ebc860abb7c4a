//! Tool permissions: rule-based authorization for tool calls.
//!
//! The `PermissionManager` evaluates system, tool, file and context rules in
//! that order and falls back to a default action. The MCP client consults a
//! `PermissionEvaluator` before every tool call; hosts may supply their own.

pub mod errors;
pub mod manager;
pub mod matching;
pub mod types;

pub use errors::PermissionError;
pub use manager::{PermissionEvaluator, PermissionManager};
pub use types::{
    CallerContext, EvaluationContext, FileOperation, FilePermissionRule, ParameterRule, PathGlob,
    Pattern, Permission, PermissionAction, PermissionResult, PermissionRule, PermissionScope,
};
