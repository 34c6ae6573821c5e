//! Key layout for the recall store.
//!
//! Every key is optionally scoped under a deployment namespace. The record
//! prefixes themselves are part of the persisted schema; renaming one needs
//! a migration over existing keys.
//!
//! ```text
//! {ns}:conv:{agentId}                 → sorted set of ConversationRecord JSON
//! {ns}:ctx:{contextId}                → ContextRecord JSON (TTL)
//! {ns}:decision:{decisionId}          → DecisionRecord JSON (TTL)
//! {ns}:decision:index:{agentId}       → sorted set of decision ids
//! {ns}:kb:{category}:{knowledgeId}    → KnowledgeRecord JSON
//! {ns}:kb:index:{category}            → set of knowledge ids
//! {ns}:state:{agentId}                → AgentStateRecord JSON
//! {ns}:checkpoint:{checkpointId}      → CheckpointRecord JSON (TTL)
//! {ns}:thread:{threadId}              → sorted set of checkpoint ids
//! {ns}:metadata:{checkpointId}        → checkpoint metadata JSON (TTL)
//! ```

/// Knowledge category that cannot hold entries: `kb:index:{id}` is the id
/// set of category `{id}`.
pub const RESERVED_CATEGORY: &str = "index";

/// Record families, in the order they are reported by memory statistics.
///
/// `DecisionIndex` and `KnowledgeIndex` share their parent's leading text,
/// so classification always tries them first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPrefix {
    Conversation,
    Context,
    DecisionIndex,
    Decision,
    KnowledgeIndex,
    Knowledge,
    AgentState,
    Checkpoint,
    Thread,
    Metadata,
    Health,
}

impl KeyPrefix {
    pub const ALL: [KeyPrefix; 11] = [
        KeyPrefix::Conversation,
        KeyPrefix::Context,
        KeyPrefix::DecisionIndex,
        KeyPrefix::Decision,
        KeyPrefix::KnowledgeIndex,
        KeyPrefix::Knowledge,
        KeyPrefix::AgentState,
        KeyPrefix::Checkpoint,
        KeyPrefix::Thread,
        KeyPrefix::Metadata,
        KeyPrefix::Health,
    ];

    /// Persisted prefix text, including the trailing colon.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPrefix::Conversation => "conv:",
            KeyPrefix::Context => "ctx:",
            KeyPrefix::DecisionIndex => "decision:index:",
            KeyPrefix::Decision => "decision:",
            KeyPrefix::KnowledgeIndex => "kb:index:",
            KeyPrefix::Knowledge => "kb:",
            KeyPrefix::AgentState => "state:",
            KeyPrefix::Checkpoint => "checkpoint:",
            KeyPrefix::Thread => "thread:",
            KeyPrefix::Metadata => "metadata:",
            KeyPrefix::Health => "health:",
        }
    }

    /// Name used in statistics output.
    pub fn label(&self) -> &'static str {
        match self {
            KeyPrefix::Conversation => "conversation",
            KeyPrefix::Context => "context",
            KeyPrefix::DecisionIndex => "decision_index",
            KeyPrefix::Decision => "decision",
            KeyPrefix::KnowledgeIndex => "knowledge_index",
            KeyPrefix::Knowledge => "knowledge",
            KeyPrefix::AgentState => "agent_state",
            KeyPrefix::Checkpoint => "checkpoint",
            KeyPrefix::Thread => "thread",
            KeyPrefix::Metadata => "metadata",
            KeyPrefix::Health => "health",
        }
    }
}

/// Builds namespaced keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpace {
    root: String,
}

impl KeySpace {
    /// `None` or an empty namespace leaves keys unprefixed.
    pub fn new(namespace: Option<&str>) -> Self {
        let root = match namespace {
            Some(ns) if !ns.is_empty() => format!("{ns}:"),
            _ => String::new(),
        };
        Self { root }
    }

    /// Text every key in this space starts with (empty without a namespace).
    pub fn root(&self) -> &str {
        &self.root
    }

    fn key(&self, prefix: KeyPrefix, rest: &str) -> String {
        format!("{}{}{}", self.root, prefix.as_str(), rest)
    }

    /// Glob pattern matching every key of one family.
    pub fn pattern(&self, prefix: KeyPrefix) -> String {
        self.key(prefix, "*")
    }

    /// Glob pattern matching every key in this space.
    pub fn all_pattern(&self) -> String {
        format!("{}*", self.root)
    }

    /// Family of a key in this space, `None` for foreign keys.
    pub fn classify(&self, key: &str) -> Option<KeyPrefix> {
        let rest = key.strip_prefix(&self.root)?;
        KeyPrefix::ALL
            .into_iter()
            .find(|prefix| rest.starts_with(prefix.as_str()))
    }

    pub fn conversation(&self, agent_id: &str) -> String {
        self.key(KeyPrefix::Conversation, agent_id)
    }

    pub fn context(&self, context_id: &str) -> String {
        self.key(KeyPrefix::Context, context_id)
    }

    pub fn decision(&self, decision_id: &str) -> String {
        self.key(KeyPrefix::Decision, decision_id)
    }

    pub fn decision_index(&self, agent_id: &str) -> String {
        self.key(KeyPrefix::DecisionIndex, agent_id)
    }

    pub fn knowledge(&self, category: &str, knowledge_id: &str) -> String {
        self.key(KeyPrefix::Knowledge, &format!("{category}:{knowledge_id}"))
    }

    pub fn knowledge_index(&self, category: &str) -> String {
        self.key(KeyPrefix::KnowledgeIndex, category)
    }

    pub fn agent_state(&self, agent_id: &str) -> String {
        self.key(KeyPrefix::AgentState, agent_id)
    }

    pub fn checkpoint(&self, checkpoint_id: &str) -> String {
        self.key(KeyPrefix::Checkpoint, checkpoint_id)
    }

    pub fn thread(&self, thread_id: &str) -> String {
        self.key(KeyPrefix::Thread, thread_id)
    }

    pub fn metadata(&self, checkpoint_id: &str) -> String {
        self.key(KeyPrefix::Metadata, checkpoint_id)
    }

    pub fn health_probe(&self) -> String {
        self.key(KeyPrefix::Health, "test")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_key_format() {
        let keys = KeySpace::new(Some("meshnet"));
        assert_eq!(keys.conversation("miner-1"), "meshnet:conv:miner-1");
        assert_eq!(keys.decision_index("miner-1"), "meshnet:decision:index:miner-1");
        assert_eq!(keys.knowledge("pools", "xmr"), "meshnet:kb:pools:xmr");
        assert_eq!(keys.knowledge_index("pools"), "meshnet:kb:index:pools");
        assert_eq!(keys.health_probe(), "meshnet:health:test");
    }

    #[test]
    fn test_unprefixed_key_format() {
        let keys = KeySpace::new(None);
        assert_eq!(keys.checkpoint("abc"), "checkpoint:abc");
        assert_eq!(keys.thread("t1"), "thread:t1");
        assert_eq!(keys.metadata("abc"), "metadata:abc");
        assert_eq!(KeySpace::new(Some("")), keys);
    }

    #[test]
    fn test_classify_prefers_index_families() {
        let keys = KeySpace::new(Some("ns"));
        assert_eq!(
            keys.classify("ns:decision:index:a"),
            Some(KeyPrefix::DecisionIndex)
        );
        assert_eq!(keys.classify("ns:decision:0f3a"), Some(KeyPrefix::Decision));
        assert_eq!(keys.classify("ns:kb:index:general"), Some(KeyPrefix::KnowledgeIndex));
        assert_eq!(keys.classify("ns:kb:general:k1"), Some(KeyPrefix::Knowledge));
        assert_eq!(keys.classify("other:conv:a"), None);
        assert_eq!(keys.classify("ns:unknown:a"), None);
    }

    #[test]
    fn test_patterns() {
        let keys = KeySpace::new(Some("ns"));
        assert_eq!(keys.pattern(KeyPrefix::Checkpoint), "ns:checkpoint:*");
        assert_eq!(keys.all_pattern(), "ns:*");
    }
}
