//! Permission manager: four-tier rule evaluation for tool execution.
//!
//! Tiers are evaluated in order and the first deciding match wins:
//! 1. **System** rules, global authority.
//! 2. **Tool** rules, exact tool-name entries first, then pattern entries.
//! 3. **File** rules, only when a file path is known for the request.
//! 4. **Context** rules, bound to a project root or a session id.
//!
//! Within a tier rules are ordered by descending priority, with insertion
//! order breaking ties. A `passthrough` rule matches without deciding.
//! When nothing decides, the configured default action applies.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::errors::PermissionError;
use super::matching::{file_rule_matches, infer_file_context, rule_matches};
use super::types::{
    CallerContext, EvaluationContext, FileOperation, FilePermissionRule, ParameterRule, Permission,
    PermissionAction, PermissionResult, PermissionRule, PermissionScope,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Priority given to rules created by `grant_tool_permission`.
pub const GRANT_PRIORITY: i32 = 100;

/// Priority given to rules created by `revoke_tool_permission`.
pub const REVOKE_PRIORITY: i32 = 200;

/// Destructive shell fragments denied by the default system rule.
const DANGEROUS_COMMAND_PATTERN: &str = r".*(rm -rf|sudo|chmod 777|> /dev|dd if=).*";

// ─── Evaluator Trait ─────────────────────────────────────────────────────────

/// Decides whether a tool call or resource access may proceed.
pub trait PermissionEvaluator: Send + Sync {
    fn can_execute_tool(
        &self,
        tool_name: &str,
        params: &Map<String, Value>,
        caller: &CallerContext,
    ) -> Result<PermissionResult, PermissionError>;

    fn can_access_resource(
        &self,
        resource_type: &str,
        resource_path: &str,
        caller: &CallerContext,
    ) -> Result<PermissionResult, PermissionError>;

    fn grant_tool_permission(&self, tool_name: &str, scope: PermissionScope) -> Result<(), PermissionError>;

    fn revoke_tool_permission(&self, tool_name: &str, scope: PermissionScope) -> Result<(), PermissionError>;

    fn list_tool_permissions(&self, tool_name: &str) -> Result<Vec<Permission>, PermissionError>;
}

// ─── Rule Storage ────────────────────────────────────────────────────────────

/// Tool-tier bucket: rules keyed by a tool name or a tool-name pattern.
#[derive(Debug)]
struct ToolRuleSet {
    /// Full-match regex for the key, `None` if the key is not a valid pattern.
    matcher: Option<Regex>,
    rules: Vec<PermissionRule>,
}

/// Context-tier key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ContextKey {
    Project(String),
    Session(String),
}

#[derive(Debug, Default)]
struct RuleTiers {
    system: Vec<PermissionRule>,
    tools: BTreeMap<String, ToolRuleSet>,
    files: Vec<FilePermissionRule>,
    contexts: HashMap<ContextKey, Vec<PermissionRule>>,
}

/// Insert keeping descending priority; equal priorities keep insertion order.
fn insert_by_priority<T>(rules: &mut Vec<T>, rule: T, priority: impl Fn(&T) -> i32) {
    let new_priority = priority(&rule);
    let at = rules.partition_point(|existing| priority(existing) >= new_priority);
    rules.insert(at, rule);
}

/// Outcome of scanning one ordered rule list.
fn first_decision<'a>(
    rules: impl IntoIterator<Item = &'a PermissionRule>,
    matches: impl Fn(&PermissionRule) -> bool,
) -> Option<&'a PermissionRule> {
    rules
        .into_iter()
        .filter(|rule| matches(*rule))
        .find(|rule| rule.action != PermissionAction::Passthrough)
}

// ─── PermissionManager ───────────────────────────────────────────────────────

/// Rule-based evaluator holding all four tiers behind one read/write lock.
#[derive(Debug)]
pub struct PermissionManager {
    tiers: RwLock<RuleTiers>,
    default_action: PermissionAction,
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new(PermissionAction::Ask)
    }
}

impl PermissionManager {
    /// A manager with no rules. `Passthrough` as a default becomes `Ask`.
    pub fn new(default_action: PermissionAction) -> Self {
        let default_action = match default_action {
            PermissionAction::Passthrough => PermissionAction::Ask,
            other => other,
        };
        Self {
            tiers: RwLock::new(RuleTiers::default()),
            default_action,
        }
    }

    pub fn default_action(&self) -> PermissionAction {
        self.default_action
    }

    // ─── Rule Registration ───────────────────────────────────────────────

    pub fn add_system_rule(&self, rule: PermissionRule) {
        insert_by_priority(&mut self.tiers.write().system, rule, |r| r.priority);
    }

    /// Add a rule under a tool name or tool-name pattern key.
    pub fn add_tool_rule(&self, key: &str, rule: PermissionRule) {
        let mut tiers = self.tiers.write();
        let set = tiers.tools.entry(key.to_string()).or_insert_with(|| ToolRuleSet {
            matcher: Regex::new(&format!("^(?:{key})$")).ok(),
            rules: Vec::new(),
        });
        insert_by_priority(&mut set.rules, rule, |r| r.priority);
    }

    pub fn add_file_rule(&self, rule: FilePermissionRule) {
        insert_by_priority(&mut self.tiers.write().files, rule, |r| r.rule.priority);
    }

    /// Add a rule bound to the project root or session id its scope names.
    ///
    /// Unbound scopes fall back to the tool tier, keyed by the rule's tool
    /// pattern, or to the system tier when the rule has none.
    pub fn add_context_rule(&self, rule: PermissionRule) {
        if let Some(key) = context_key(&rule.scope) {
            self.insert_context(key, rule);
            return;
        }
        match rule.tool_pattern.as_ref().map(|p| p.as_str().to_string()) {
            Some(key) => self.add_tool_rule(&key, rule),
            None => self.add_system_rule(rule),
        }
    }

    fn insert_context(&self, key: ContextKey, rule: PermissionRule) {
        let mut tiers = self.tiers.write();
        insert_by_priority(tiers.contexts.entry(key).or_default(), rule, |r| r.priority);
    }

    /// Install the built-in system rules. Call once at startup.
    pub fn load_default_rules(&self) -> Result<(), PermissionError> {
        let dangerous = PermissionRule::new(
            "system_dangerous_commands",
            "Block dangerous commands",
            PermissionAction::Deny,
        )
        .with_description("Prevent execution of destructive shell commands")
        .with_tool_pattern("bash|shell|execute")?
        .with_parameter_rule(
            ParameterRule::new("command")
                .required()
                .with_pattern(DANGEROUS_COMMAND_PATTERN)?,
        )
        .with_priority(1000);

        let file_access = PermissionRule::new(
            "system_file_access",
            "Ask for file operations",
            PermissionAction::Ask,
        )
        .with_description("Ask before reading or writing files")
        .with_tool_pattern("file_.*|read_.*|write_.*")?
        .with_priority(100);

        self.add_system_rule(dangerous);
        self.add_system_rule(file_access);
        tracing::info!("loaded default permission rules");
        Ok(())
    }

    // ─── Evaluation ──────────────────────────────────────────────────────

    /// Evaluate a fully built context through the four tiers.
    pub fn evaluate(&self, mut ctx: EvaluationContext) -> PermissionResult {
        infer_file_context(&mut ctx);
        let now = Utc::now();
        let tiers = self.tiers.read();
        let base = |rule: &PermissionRule| rule_matches(rule, &ctx, now);

        if let Some(rule) = first_decision(&tiers.system, base) {
            return decided(rule, "system rule", &ctx);
        }

        if let Some(set) = tiers.tools.get(&ctx.tool_name) {
            if let Some(rule) = first_decision(&set.rules, base) {
                return decided(rule, "tool rule", &ctx);
            }
        }

        let pattern_rules = tiers
            .tools
            .iter()
            .filter(|(key, set)| {
                key.as_str() != ctx.tool_name
                    && set.matcher.as_ref().is_some_and(|m| m.is_match(&ctx.tool_name))
            })
            .flat_map(|(_, set)| set.rules.iter());
        if let Some(rule) = first_decision(pattern_rules, base) {
            return decided(rule, "tool pattern rule", &ctx);
        }

        if ctx.file_path.is_some() {
            let file_rule = tiers
                .files
                .iter()
                .filter(|rule| file_rule_matches(rule, &ctx, now))
                .find(|rule| rule.rule.action != PermissionAction::Passthrough);
            if let Some(rule) = file_rule {
                return decided(&rule.rule, "file rule", &ctx);
            }
        }

        if let Some(root) = &ctx.caller.project_root {
            if let Some(rules) = tiers.contexts.get(&ContextKey::Project(root.clone())) {
                if let Some(rule) = first_decision(rules, base) {
                    return decided(rule, "project context rule", &ctx);
                }
            }
        }

        if let Some(session) = &ctx.caller.session_id {
            if let Some(rules) = tiers.contexts.get(&ContextKey::Session(session.clone())) {
                if let Some(rule) = first_decision(rules, base) {
                    return decided(rule, "session context rule", &ctx);
                }
            }
        }

        tracing::debug!(tool = %ctx.tool_name, action = %self.default_action, "permission from default action");
        PermissionResult::from_action(
            self.default_action,
            format!("default action for tool {}", ctx.tool_name),
        )
    }

    /// Place a grant or revoke rule in the tier its scope selects.
    fn append_scoped(&self, tool_name: &str, rule: PermissionRule) {
        if rule.scope == PermissionScope::Global {
            self.add_system_rule(rule);
        } else if let Some(key) = context_key(&rule.scope) {
            self.insert_context(key, rule);
        } else {
            self.add_tool_rule(tool_name, rule);
        }
    }
}

fn context_key(scope: &PermissionScope) -> Option<ContextKey> {
    match scope {
        PermissionScope::Project(Some(root)) => Some(ContextKey::Project(root.clone())),
        PermissionScope::Session(Some(id)) => Some(ContextKey::Session(id.clone())),
        _ => None,
    }
}

fn decided(rule: &PermissionRule, tier: &str, ctx: &EvaluationContext) -> PermissionResult {
    tracing::debug!(
        tool = %ctx.tool_name,
        tier,
        rule = %rule.id,
        action = %rule.action,
        "permission decided"
    );
    let mut result = PermissionResult::from_action(rule.action, format!("matched {tier}: {}", rule.name));
    result.conditions = rule.conditions.clone();
    result.metadata.insert("ruleId".into(), json!(rule.id));
    result.metadata.insert("ruleName".into(), json!(rule.name));
    result.metadata.insert("ruleType".into(), json!(tier));
    result
}

impl PermissionEvaluator for PermissionManager {
    fn can_execute_tool(
        &self,
        tool_name: &str,
        params: &Map<String, Value>,
        caller: &CallerContext,
    ) -> Result<PermissionResult, PermissionError> {
        let ctx = EvaluationContext::new(tool_name, params.clone(), caller.clone());
        Ok(self.evaluate(ctx))
    }

    fn can_access_resource(
        &self,
        resource_type: &str,
        resource_path: &str,
        caller: &CallerContext,
    ) -> Result<PermissionResult, PermissionError> {
        let mut ctx = EvaluationContext::new(&format!("{resource_type}_access"), Map::new(), caller.clone());
        ctx.file_path = Some(resource_path.to_string());
        ctx.file_operation = Some(FileOperation::Access);
        Ok(self.evaluate(ctx))
    }

    fn grant_tool_permission(&self, tool_name: &str, scope: PermissionScope) -> Result<(), PermissionError> {
        let now = Utc::now();
        let rule = PermissionRule::new(
            &format!("grant_{tool_name}_{}", now.timestamp()),
            &format!("Grant {tool_name}"),
            PermissionAction::Allow,
        )
        .with_description(&format!("granted permission for {tool_name}"))
        .for_tool(tool_name)?
        .with_scope(scope.clone())
        .with_priority(GRANT_PRIORITY);

        self.append_scoped(tool_name, rule);
        tracing::info!(tool = tool_name, scope = %scope, "permission granted");
        Ok(())
    }

    fn revoke_tool_permission(&self, tool_name: &str, scope: PermissionScope) -> Result<(), PermissionError> {
        let now = Utc::now();
        let rule = PermissionRule::new(
            &format!("revoke_{tool_name}_{}", now.timestamp()),
            &format!("Revoke {tool_name}"),
            PermissionAction::Deny,
        )
        .with_description(&format!("revoked permission for {tool_name}"))
        .for_tool(tool_name)?
        .with_scope(scope.clone())
        .with_priority(REVOKE_PRIORITY);

        self.append_scoped(tool_name, rule);
        tracing::info!(tool = tool_name, scope = %scope, "permission revoked");
        Ok(())
    }

    fn list_tool_permissions(&self, tool_name: &str) -> Result<Vec<Permission>, PermissionError> {
        let tiers = self.tiers.read();
        let tool_rules = tiers
            .tools
            .values()
            .filter(|set| set.matcher.as_ref().is_some_and(|m| m.is_match(tool_name)))
            .flat_map(|set| set.rules.iter());
        let context_rules = tiers.contexts.values().flatten();

        let permissions = tiers
            .system
            .iter()
            .chain(tool_rules)
            .chain(context_rules)
            .filter(|rule| rule.tool_pattern.as_ref().is_some_and(|p| p.is_match(tool_name)))
            .map(|rule| Permission {
                tool_name: tool_name.to_string(),
                rule_id: rule.id.clone(),
                scope: rule.scope.clone(),
                action: rule.action,
                conditions: rule.conditions.clone(),
                granted_at: rule.created_at,
                expires_at: rule.expires_at,
                metadata: rule.metadata.clone(),
            })
            .collect();
        Ok(permissions)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
