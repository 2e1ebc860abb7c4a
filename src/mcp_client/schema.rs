//! Compiled JSON Schema cache and tool argument/output validation.
//!
//! The cache is an LRU list with a TTL: an entry older than the TTL is
//! reported absent and dropped on the next lookup, even if LRU eviction has
//! not reached it yet. Entries are keyed by `(server, tool, kind)` so two
//! servers exposing a same-named tool never overwrite each other's schema.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonschema::JSONSchema;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use super::errors::McpError;
use super::types::{duration_ms, SchemaKind, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Capacity used when a non-positive size is configured.
pub const DEFAULT_CACHE_SIZE: usize = 100;

/// TTL used when a zero TTL is configured.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

// ─── Keys ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    pub server: String,
    pub tool: String,
    pub kind: SchemaKind,
}

impl SchemaKey {
    pub fn new(server: &str, tool: &str, kind: SchemaKind) -> Self {
        Self {
            server: server.to_string(),
            tool: tool.to_string(),
            kind,
        }
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.server, self.tool, self.kind)
    }
}

/// Compile a schema document, mapping the error to the owning tool.
pub fn compile_schema(tool: &str, kind: SchemaKind, schema: &Value) -> Result<JSONSchema, McpError> {
    JSONSchema::compile(schema).map_err(|e| McpError::SchemaError {
        tool: tool.to_string(),
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

// ─── LRU Storage ─────────────────────────────────────────────────────────────

struct Node {
    key: SchemaKey,
    schema: Arc<JSONSchema>,
    created_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Slab-backed doubly linked list; head is most recently used.
#[derive(Default)]
struct LruList {
    index: HashMap<SchemaKey, usize>,
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruList {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn node(&self, slot: usize) -> Option<&Node> {
        self.nodes.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node> {
        self.nodes.get_mut(slot).and_then(Option::as_mut)
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.node(slot) {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(node) = self.node_mut(slot) {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(slot) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.node_mut(h) {
                node.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn insert(&mut self, key: SchemaKey, schema: Arc<JSONSchema>, now: Instant) {
        let node = Node {
            key: key.clone(),
            schema,
            created_at: now,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);
    }

    fn remove(&mut self, key: &SchemaKey) -> bool {
        let Some(slot) = self.index.remove(key) else {
            return false;
        };
        self.unlink(slot);
        self.nodes[slot] = None;
        self.free.push(slot);
        true
    }

    fn pop_back(&mut self) -> Option<SchemaKey> {
        let tail = self.tail?;
        let key = self.node(tail)?.key.clone();
        self.remove(&key);
        Some(key)
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ─── SchemaCache ─────────────────────────────────────────────────────────────

/// Point-in-time view of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    #[serde(with = "duration_ms")]
    pub ttl: Duration,
    /// Resident entries already past their TTL.
    pub expired_items: usize,
}

/// Process-wide LRU + TTL cache of compiled schemas.
pub struct SchemaCache {
    inner: RwLock<LruList>,
    max_size: usize,
    ttl: Duration,
}

impl fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaCache")
            .field("size", &self.size())
            .field("max_size", &self.max_size)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE, DEFAULT_CACHE_TTL)
    }
}

impl SchemaCache {
    /// Zero size or TTL falls back to the defaults.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(LruList::default()),
            max_size: if max_size == 0 { DEFAULT_CACHE_SIZE } else { max_size },
            ttl: if ttl.is_zero() { DEFAULT_CACHE_TTL } else { ttl },
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a compiled schema. A hit becomes most recently used; an
    /// expired entry is removed and reported as a miss.
    pub fn get(&self, key: &SchemaKey) -> Option<Arc<JSONSchema>> {
        let mut list = self.inner.write();
        let slot = *list.index.get(key)?;
        let (expired, schema) = {
            let node = list.node(slot)?;
            (node.created_at.elapsed() > self.ttl, Arc::clone(&node.schema))
        };

        if expired {
            list.remove(key);
            tracing::debug!(key = %key, "schema cache entry expired");
            return None;
        }

        list.unlink(slot);
        list.push_front(slot);
        Some(schema)
    }

    /// Compile and insert a schema, evicting least recently used entries
    /// while the cache is full. A compile failure leaves the cache untouched.
    pub fn set(&self, key: SchemaKey, schema: &Value) -> Result<Arc<JSONSchema>, McpError> {
        let compiled = Arc::new(compile_schema(&key.tool, key.kind, schema)?);
        self.insert_compiled(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    fn insert_compiled(&self, key: SchemaKey, compiled: Arc<JSONSchema>) {
        let mut list = self.inner.write();
        list.remove(&key);
        while list.len() >= self.max_size {
            match list.pop_back() {
                Some(evicted) => tracing::debug!(key = %evicted, "evicted schema cache entry"),
                None => break,
            }
        }
        list.insert(key, compiled, Instant::now());
    }

    /// Cache both schemas of every tool that publishes them.
    ///
    /// Schemas that fail to compile are logged and skipped.
    pub fn cache_tool_schemas(&self, server: &str, tools: &[ToolDefinition]) -> usize {
        let mut cached = 0;
        for tool in tools {
            for kind in [SchemaKind::Input, SchemaKind::Output] {
                let Some(schema) = tool.schema(kind) else {
                    continue;
                };
                match self.set(SchemaKey::new(server, &tool.name, kind), schema) {
                    Ok(_) => cached += 1,
                    Err(e) => tracing::warn!(
                        server = %server,
                        tool = %tool.name,
                        error = %e,
                        "failed to cache schema"
                    ),
                }
            }
        }
        cached
    }

    /// Drop every entry belonging to `server`. Returns how many were removed.
    pub fn remove_server(&self, server: &str) -> usize {
        let mut list = self.inner.write();
        let stale: Vec<SchemaKey> = list
            .index
            .keys()
            .filter(|key| key.server == server)
            .cloned()
            .collect();
        for key in &stale {
            list.remove(key);
        }
        if !stale.is_empty() {
            tracing::debug!(server = %server, removed = stale.len(), "dropped cached schemas");
        }
        stale.len()
    }

    pub fn contains(&self, key: &SchemaKey) -> bool {
        self.inner.read().index.contains_key(key)
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Number of resident entries, expired ones included.
    pub fn size(&self) -> usize {
        self.inner.read().len()
    }

    pub fn stats(&self) -> CacheStats {
        let list = self.inner.read();
        let expired_items = list
            .nodes
            .iter()
            .flatten()
            .filter(|node| node.created_at.elapsed() > self.ttl)
            .count();
        CacheStats {
            size: list.len(),
            max_size: self.max_size,
            ttl: self.ttl,
            expired_items,
        }
    }
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Where schemas come from on a cache miss.
pub trait SchemaSource: Send + Sync {
    /// The tool's schema of the given kind, or `None` if it publishes none.
    fn tool_schema(&self, server: &str, tool: &str, kind: SchemaKind) -> Result<Option<Value>, McpError>;
}

/// Validates tool arguments and results.
pub trait ToolValidator: Send + Sync {
    fn validate_input(&self, server: &str, tool: &str, arguments: &Value) -> Result<(), McpError>;
    fn validate_output(&self, server: &str, tool: &str, output: &Value) -> Result<(), McpError>;
}

/// Schema validator backed by the shared cache.
///
/// A tool with no schema passes unless `strict` is set.
#[derive(Clone)]
pub struct SchemaValidator {
    cache: Option<Arc<SchemaCache>>,
    source: Arc<dyn SchemaSource>,
    strict: bool,
}

impl SchemaValidator {
    /// `cache = None` compiles on every call.
    pub fn new(cache: Option<Arc<SchemaCache>>, source: Arc<dyn SchemaSource>, strict: bool) -> Self {
        Self {
            cache,
            source,
            strict,
        }
    }

    /// Compiled input schema, fetched and cached on miss.
    pub fn input_schema(&self, server: &str, tool: &str) -> Result<Option<Arc<JSONSchema>>, McpError> {
        self.compiled(server, tool, SchemaKind::Input)
    }

    pub fn output_schema(&self, server: &str, tool: &str) -> Result<Option<Arc<JSONSchema>>, McpError> {
        self.compiled(server, tool, SchemaKind::Output)
    }

    fn compiled(&self, server: &str, tool: &str, kind: SchemaKind) -> Result<Option<Arc<JSONSchema>>, McpError> {
        let key = SchemaKey::new(server, tool, kind);
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return Ok(Some(hit));
        }

        let Some(document) = self.source.tool_schema(server, tool, kind)? else {
            return Ok(None);
        };

        match &self.cache {
            Some(cache) => cache.set(key, &document).map(Some),
            None => compile_schema(tool, kind, &document).map(|s| Some(Arc::new(s))),
        }
    }

    fn validate(&self, server: &str, tool: &str, kind: SchemaKind, value: &Value) -> Result<(), McpError> {
        let Some(schema) = self.compiled(server, tool, kind)? else {
            if self.strict {
                return Err(McpError::ValidationFailed {
                    tool: tool.to_string(),
                    kind: kind.to_string(),
                    errors: vec![format!("no {kind} schema available")],
                });
            }
            return Ok(());
        };

        let result = schema.validate(value);
        match result {
            Ok(()) => Ok(()),
            Err(errors) => Err(McpError::ValidationFailed {
                tool: tool.to_string(),
                kind: kind.to_string(),
                errors: errors.map(|e| e.to_string()).collect(),
            }),
        }
    }
}

impl ToolValidator for SchemaValidator {
    fn validate_input(&self, server: &str, tool: &str, arguments: &Value) -> Result<(), McpError> {
        self.validate(server, tool, SchemaKind::Input, arguments)
    }

    fn validate_output(&self, server: &str, tool: &str, output: &Value) -> Result<(), McpError> {
        self.validate(server, tool, SchemaKind::Output, output)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn key(tool: &str) -> SchemaKey {
        SchemaKey::new("srv", tool, SchemaKind::Input)
    }

    fn object_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        })
    }

    #[test]
    fn test_key_display() {
        assert_eq!(key("read_file").to_string(), "srv:read_file:input");
    }

    #[test]
    fn test_zero_config_uses_defaults() {
        let cache = SchemaCache::new(0, Duration::ZERO);
        assert_eq!(cache.max_size(), DEFAULT_CACHE_SIZE);
        assert_eq!(cache.ttl(), DEFAULT_CACHE_TTL);
    }

    #[tokio::test]
    async fn test_overflow_evicts_least_recently_used() {
        for n in 1..=5usize {
            let cache = SchemaCache::new(n, Duration::from_secs(60));
            for i in 0..n {
                cache.set(key(&format!("t{i}")), &object_schema()).unwrap();
            }
            // Touch the oldest so t1 (if any) becomes the LRU entry.
            assert!(cache.get(&key("t0")).is_some());
            cache.set(key("extra"), &object_schema()).unwrap();

            assert_eq!(cache.size(), n);
            assert!(cache.contains(&key("extra")));
            if n == 1 {
                assert!(!cache.contains(&key("t0")));
            } else {
                assert!(cache.contains(&key("t0")));
                assert!(!cache.contains(&key("t1")));
            }
        }
    }

    #[tokio::test]
    async fn test_set_replaces_existing_key_without_eviction() {
        let cache = SchemaCache::new(2, Duration::from_secs(60));
        cache.set(key("a"), &object_schema()).unwrap();
        cache.set(key("b"), &object_schema()).unwrap();
        cache.set(key("a"), &json!({"type": "object"})).unwrap();
        assert_eq!(cache.size(), 2);
        assert!(cache.contains(&key("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_reported_absent() {
        let cache = SchemaCache::new(10, Duration::from_secs(5));
        cache.set(key("a"), &object_schema()).unwrap();
        assert!(cache.get(&key("a")).is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.stats().expired_items, 1);
        assert!(cache.contains(&key("a")));
        assert!(cache.get(&key("a")).is_none());
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_invalid_schema_is_not_cached() {
        let cache = SchemaCache::default();
        let err = cache.set(key("bad"), &json!({"type": 12})).unwrap_err();
        assert!(matches!(err, McpError::SchemaError { .. }));
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_cache_tool_schemas_and_clear() {
        let cache = SchemaCache::default();
        let tools: Vec<ToolDefinition> = serde_json::from_value(json!([
            {"name": "a", "inputSchema": {"type": "object"}, "outputSchema": {"type": "object"}},
            {"name": "b"}
        ]))
        .unwrap();
        assert_eq!(cache.cache_tool_schemas("srv", &tools), 2);
        assert!(cache.contains(&SchemaKey::new("srv", "a", SchemaKind::Output)));
        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_remove_server_keeps_other_servers() {
        let cache = SchemaCache::new(10, DEFAULT_CACHE_TTL);
        cache.set(SchemaKey::new("a", "t", SchemaKind::Input), &object_schema()).unwrap();
        cache.set(SchemaKey::new("a", "t", SchemaKind::Output), &object_schema()).unwrap();
        cache.set(SchemaKey::new("b", "t", SchemaKind::Input), &object_schema()).unwrap();

        assert_eq!(cache.remove_server("a"), 2);
        assert_eq!(cache.size(), 1);
        assert!(cache.contains(&SchemaKey::new("b", "t", SchemaKind::Input)));
        assert_eq!(cache.remove_server("a"), 0);

        // freed slots are reused without disturbing LRU order
        cache.set(SchemaKey::new("c", "t", SchemaKind::Input), &object_schema()).unwrap();
        assert_eq!(cache.size(), 2);
    }

    /// Source that counts lookups.
    struct CountingSource {
        schema: Option<Value>,
        calls: Mutex<usize>,
    }

    impl SchemaSource for CountingSource {
        fn tool_schema(&self, _server: &str, _tool: &str, _kind: SchemaKind) -> Result<Option<Value>, McpError> {
            *self.calls.lock() += 1;
            Ok(self.schema.clone())
        }
    }

    #[tokio::test]
    async fn test_validator_fetches_once_then_hits_cache() {
        let source = Arc::new(CountingSource {
            schema: Some(object_schema()),
            calls: Mutex::new(0),
        });
        let validator = SchemaValidator::new(Some(Arc::new(SchemaCache::default())), source.clone(), false);

        validator.validate_input("srv", "read", &json!({"path": "/tmp"})).unwrap();
        let err = validator.validate_input("srv", "read", &json!({"path": 5})).unwrap_err();
        assert!(matches!(err, McpError::ValidationFailed { .. }));
        assert_eq!(*source.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_missing_schema_skips_unless_strict() {
        let source = Arc::new(CountingSource {
            schema: None,
            calls: Mutex::new(0),
        });
        let lenient = SchemaValidator::new(None, source.clone(), false);
        assert!(lenient.validate_output("srv", "t", &json!(1)).is_ok());

        let strict = SchemaValidator::new(None, source, true);
        assert!(strict.validate_output("srv", "t", &json!(1)).is_err());
    }
}
