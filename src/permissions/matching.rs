//! Rule matching primitives.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::errors::PermissionError;
use super::types::{EvaluationContext, FileOperation, FilePermissionRule, ParameterRule, PermissionRule};

/// Argument names that commonly carry a file path, in lookup order.
pub const FILE_PARAMETERS: [&str; 5] = ["path", "file", "filename", "filepath", "file_path"];

// ─── Base Rules ──────────────────────────────────────────────────────────────

/// Expiry, tool pattern and every parameter constraint must all hold.
pub fn rule_matches(rule: &PermissionRule, ctx: &EvaluationContext, now: DateTime<Utc>) -> bool {
    if rule.is_expired(now) {
        return false;
    }
    if let Some(pattern) = &rule.tool_pattern {
        if !pattern.is_match(&ctx.tool_name) {
            return false;
        }
    }
    rule.parameter_rules
        .iter()
        .all(|p| parameter_matches(p, &ctx.parameters))
}

/// Check one parameter constraint against the argument map.
///
/// An absent optional parameter passes. Pattern checks apply to strings and
/// bound checks to numbers; other value types skip them.
pub fn parameter_matches(rule: &ParameterRule, params: &Map<String, Value>) -> bool {
    let Some(value) = params.get(&rule.parameter) else {
        return !rule.required;
    };

    if let (Some(pattern), Value::String(text)) = (&rule.pattern, value) {
        if !pattern.is_match(text) {
            return false;
        }
    }

    if let Some(number) = value.as_f64() {
        if rule.min_value.is_some_and(|min| number < min) {
            return false;
        }
        if rule.max_value.is_some_and(|max| number > max) {
            return false;
        }
    }

    true
}

// ─── File Rules ──────────────────────────────────────────────────────────────

/// A file rule matches only when the base rule matches and every declared
/// file constraint holds for the context's file path.
pub fn file_rule_matches(rule: &FilePermissionRule, ctx: &EvaluationContext, now: DateTime<Utc>) -> bool {
    let Some(path) = ctx.file_path.as_deref() else {
        return false;
    };

    if !rule_matches(&rule.rule, ctx, now) {
        return false;
    }

    if let Some(op) = rule.operation {
        if ctx.file_operation != Some(op) {
            return false;
        }
    }

    if let Some(glob) = &rule.path_pattern {
        if !glob.is_match(path) {
            return false;
        }
    }

    if !rule.allowed_paths.is_empty() && !rule.allowed_paths.iter().any(|root| path_within(path, root)) {
        return false;
    }

    if rule.denied_paths.iter().any(|root| path_within(path, root)) {
        return false;
    }

    if let (Some(max), Some(size)) = (rule.max_file_size, ctx.file_size) {
        if size > max {
            return false;
        }
    }

    if !rule.allowed_extensions.is_empty() {
        let Some(ext) = extension_of(path) else {
            return false;
        };
        if !rule
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
        {
            return false;
        }
    }

    true
}

/// Component-aware prefix test: `/tmp` contains `/tmp/a` but not `/tmpfoo`.
pub fn path_within(path: &str, root: &str) -> bool {
    Path::new(path).starts_with(Path::new(root))
}

fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

// ─── Context Inference ───────────────────────────────────────────────────────

/// Fill in file path, operation and size from the tool name and arguments.
///
/// Only the argument map is read; the path names a file on the remote
/// server, so the local filesystem is never consulted. Size comes from the
/// length of a `content` string, else a numeric `size` argument. Values
/// already present on the context are kept.
pub fn infer_file_context(ctx: &mut EvaluationContext) {
    if ctx.file_path.is_none() {
        ctx.file_path = FILE_PARAMETERS
            .iter()
            .find_map(|name| ctx.parameters.get(*name).and_then(Value::as_str))
            .filter(|p| !p.is_empty())
            .map(str::to_string);
    }

    if ctx.file_operation.is_none() {
        ctx.file_operation = infer_operation(&ctx.tool_name);
    }

    if ctx.file_size.is_none() {
        ctx.file_size = match ctx.parameters.get("content").and_then(Value::as_str) {
            Some(content) => Some(content.len() as u64),
            None => ctx.parameters.get("size").and_then(Value::as_u64),
        };
    }
}

/// Guess the file operation from substrings of the tool name.
pub fn infer_operation(tool_name: &str) -> Option<FileOperation> {
    let name = tool_name.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

    if has(&["read", "get"]) {
        Some(FileOperation::Read)
    } else if has(&["write", "create", "save"]) {
        Some(FileOperation::Write)
    } else if has(&["delete", "remove"]) {
        Some(FileOperation::Delete)
    } else if has(&["execute", "run"]) {
        Some(FileOperation::Execute)
    } else {
        None
    }
}

// ─── Glob Translation ────────────────────────────────────────────────────────

/// Translate a shell glob into an anchored regular expression.
///
/// `*` and `?` never match `/`. `[...]` classes are kept, with a leading `!`
/// or `^` negating them. A backslash escapes the next character.
pub fn glob_to_regex(glob: &str) -> Result<String, PermissionError> {
    let invalid = |reason: &str| PermissionError::InvalidGlob {
        glob: glob.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut chars = glob.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '\\' => {
                let escaped = chars.next().ok_or_else(|| invalid("trailing escape"))?;
                out.push_str(&regex::escape(&escaped.to_string()));
            }
            '[' => {
                out.push('[');
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                let mut empty = true;
                for c in chars.by_ref() {
                    match c {
                        ']' if !empty => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | '&' | '~' => {
                            out.push('\\');
                            out.push(c);
                        }
                        _ => out.push(c),
                    }
                    empty = false;
                }
                if !closed {
                    return Err(invalid("unterminated character class"));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    Ok(out)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
