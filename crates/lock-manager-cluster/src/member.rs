//! Cluster member identity and membership events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of one member process.
///
/// A member keeps its ID for the life of one incarnation; a process that
/// rejoins gets a fresh ID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    /// Generates a fresh random member ID.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Notification delivered by the cluster membership feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    MemberAdded(MemberId),
    MemberRemoved(MemberId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_differ() {
        assert_ne!(MemberId::random(), MemberId::random());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = MemberId::from("node-a");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"node-a\"");
    }
}
