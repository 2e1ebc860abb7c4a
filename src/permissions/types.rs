//! Permission rule model.
//!
//! Rules are declarative: an optional tool-name pattern, parameter
//! constraints, a decision, a scope and a priority. File rules add path,
//! operation, size and extension constraints on top of a base rule.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::PermissionError;

// ─── Decisions & Scopes ──────────────────────────────────────────────────────

/// Decision carried by a rule or returned from evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Allow,
    Deny,
    /// The host should ask the user.
    #[default]
    Ask,
    /// Matches but defers to the next rule.
    Passthrough,
}

impl PermissionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Ask => "ask",
            Self::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a rule applies.
///
/// `Project` and `Session` carry the project root or session id they are
/// bound to. Without one they apply to every project or session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PermissionScope {
    #[default]
    Global,
    Project(Option<String>),
    Session(Option<String>),
}

impl PermissionScope {
    pub fn project(root: &str) -> Self {
        Self::Project(Some(root.to_string()))
    }

    pub fn session(id: &str) -> Self {
        Self::Session(Some(id.to_string()))
    }

    /// Short name without the bound key.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project(_) => "project",
            Self::Session(_) => "session",
        }
    }
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project(Some(key)) | Self::Session(Some(key)) => {
                write!(f, "{}:{key}", self.kind())
            }
            _ => f.write_str(self.kind()),
        }
    }
}

impl FromStr for PermissionScope {
    type Err = PermissionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, key) = match value.split_once(':') {
            Some((kind, key)) if !key.is_empty() => (kind, Some(key.to_string())),
            Some((kind, _)) => (kind, None),
            None => (value, None),
        };
        match (kind, key) {
            ("global", None) => Ok(Self::Global),
            ("project", key) => Ok(Self::Project(key)),
            ("session", key) => Ok(Self::Session(key)),
            _ => Err(PermissionError::InvalidScope {
                value: value.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for PermissionScope {
    type Error = PermissionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PermissionScope> for String {
    fn from(scope: PermissionScope) -> Self {
        scope.to_string()
    }
}

// ─── Patterns ────────────────────────────────────────────────────────────────

/// A compiled regular expression that keeps its source text.
///
/// Matching is a search, not a full match; anchor with `^...$` when needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, PermissionError> {
        let regex = Regex::new(source).map_err(|e| PermissionError::InvalidPattern {
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// A pattern matching exactly this name and nothing else.
    pub fn exact(name: &str) -> Result<Self, PermissionError> {
        Self::new(&format!("^{}$", regex::escape(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl TryFrom<String> for Pattern {
    type Error = PermissionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.source
    }
}

// ─── Rules ───────────────────────────────────────────────────────────────────

/// Constraint on one tool argument.
///
/// `pattern` applies only to string values; the bounds apply only to
/// numeric values. Values of other types skip those checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRule {
    pub parameter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

impl ParameterRule {
    pub fn new(parameter: &str) -> Self {
        Self {
            parameter: parameter.to_string(),
            pattern: None,
            required: false,
            min_value: None,
            max_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, PermissionError> {
        self.pattern = Some(Pattern::new(pattern)?);
        Ok(self)
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }
}

/// A single authorization rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_pattern: Option<Pattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter_rules: Vec<ParameterRule>,
    pub action: PermissionAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub scope: PermissionScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Higher values sort first within a tier.
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl PermissionRule {
    /// A global rule with no constraints; it matches every request.
    pub fn new(id: &str, name: &str, action: PermissionAction) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            tool_pattern: None,
            parameter_rules: Vec::new(),
            action,
            conditions: Vec::new(),
            scope: PermissionScope::Global,
            expires_at: None,
            created_at: now,
            updated_at: now,
            priority: 0,
            tags: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_tool_pattern(mut self, pattern: &str) -> Result<Self, PermissionError> {
        self.tool_pattern = Some(Pattern::new(pattern)?);
        Ok(self)
    }

    pub fn for_tool(mut self, tool: &str) -> Result<Self, PermissionError> {
        self.tool_pattern = Some(Pattern::exact(tool)?);
        Ok(self)
    }

    pub fn with_parameter_rule(mut self, rule: ParameterRule) -> Self {
        self.parameter_rules.push(rule);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_scope(mut self, scope: PermissionScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

/// Kind of file access a tool performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Read,
    Write,
    Delete,
    Execute,
    /// Generic resource access checked via `can_access_resource`.
    Access,
}

/// File-scoped rule: a base rule plus path constraints.
///
/// Each present constraint must hold for the rule to match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePermissionRule {
    #[serde(flatten)]
    pub rule: PermissionRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<PathGlob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<FileOperation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_extensions: Vec<String>,
}

impl FilePermissionRule {
    pub fn new(rule: PermissionRule) -> Self {
        Self {
            rule,
            path_pattern: None,
            operation: None,
            allowed_paths: Vec::new(),
            denied_paths: Vec::new(),
            max_file_size: None,
            allowed_extensions: Vec::new(),
        }
    }

    pub fn with_path_pattern(mut self, glob: &str) -> Result<Self, PermissionError> {
        self.path_pattern = Some(PathGlob::new(glob)?);
        Ok(self)
    }

    pub fn with_operation(mut self, operation: FileOperation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_allowed_paths(mut self, paths: &[&str]) -> Self {
        self.allowed_paths = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_denied_paths(mut self, paths: &[&str]) -> Self {
        self.denied_paths = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn with_allowed_extensions(mut self, extensions: &[&str]) -> Self {
        self.allowed_extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }
}

/// Shell-style path glob (`*`, `?`, `[...]`); wildcards never cross `/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathGlob {
    source: String,
    regex: Regex,
}

impl PathGlob {
    pub fn new(glob: &str) -> Result<Self, PermissionError> {
        let translated = super::matching::glob_to_regex(glob)?;
        let regex = Regex::new(&translated).map_err(|e| PermissionError::InvalidGlob {
            glob: glob.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: glob.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

impl PartialEq for PathGlob {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl TryFrom<String> for PathGlob {
    type Error = PermissionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<PathGlob> for String {
    fn from(glob: PathGlob) -> Self {
        glob.source
    }
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

/// Who is calling and from where.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

impl CallerContext {
    /// Read the well-known string keys of a request context map.
    pub fn from_map(context: &Map<String, Value>) -> Self {
        let get = |key: &str| {
            context
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            user_id: get("userId"),
            session_id: get("sessionId"),
            project_root: get("projectRoot"),
            working_directory: get("workingDirectory"),
        }
    }
}

/// Everything a rule may look at.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub tool_name: String,
    pub parameters: Map<String, Value>,
    pub caller: CallerContext,
    pub file_path: Option<String>,
    pub file_operation: Option<FileOperation>,
    pub file_size: Option<u64>,
    pub metadata: Map<String, Value>,
}

impl EvaluationContext {
    pub fn new(tool_name: &str, parameters: Map<String, Value>, caller: CallerContext) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            parameters,
            caller,
            ..Self::default()
        }
    }
}

/// Outcome of evaluation. Every non-allow result has a reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResult {
    pub allowed: bool,
    pub action: PermissionAction,
    pub reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl PermissionResult {
    pub fn from_action(action: PermissionAction, reason: String) -> Self {
        Self {
            allowed: action == PermissionAction::Allow,
            action,
            reason,
            conditions: Vec::new(),
            metadata: Map::new(),
        }
    }
}

/// A rule as seen from one tool's perspective.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub tool_name: String,
    pub rule_id: String,
    pub scope: PermissionScope,
    pub action: PermissionAction,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    pub granted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
