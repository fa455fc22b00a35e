//! Redis key layout.

use lock_manager_cluster::{AccessKind, MemberId};

/// Builds every key the store touches under one namespace prefix.
#[derive(Debug, Clone)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn write_record(&self, handle: &str) -> String {
        format!("{}:write-lock:{}", self.namespace, handle)
    }

    pub fn read_record(&self, handle: &str) -> String {
        format!("{}:read-lock:{}", self.namespace, handle)
    }

    pub fn access(&self, kind: AccessKind, handle: &str) -> String {
        format!("{}:{}:{}", self.namespace, kind.as_str(), handle)
    }

    /// Prefix of the per-member sets indexing held access mutexes.
    pub fn access_index_prefix(&self) -> String {
        format!("{}:member-access:", self.namespace)
    }

    /// Set of access mutex keys currently held by `member`.
    pub fn access_index(&self, member: &MemberId) -> String {
        format!("{}{}", self.access_index_prefix(), member)
    }

    pub fn down_members(&self) -> String {
        format!("{}:down-members", self.namespace)
    }

    /// Registry of members that have announced themselves.
    pub fn members(&self) -> String {
        format!("{}:members", self.namespace)
    }

    /// Heartbeat key whose presence means `member` is alive.
    pub fn heartbeat(&self, member: &MemberId) -> String {
        format!("{}:member:{}", self.namespace, member)
    }
}
