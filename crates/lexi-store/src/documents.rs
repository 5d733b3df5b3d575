use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use lexi_core::documents::DocumentVersion;
use lexi_core::ids::SessionId;

use crate::diff::{compute_diff, DiffConfig};

/// Revision history of the working document, per session.
pub trait DocumentStore: Send + Sync {
    /// Record `content` as the next version. Every version after the first
    /// carries a diff against its predecessor.
    fn add_version(&self, session_id: &SessionId, content: String) -> DocumentVersion;

    fn versions(&self, session_id: &SessionId) -> Vec<DocumentVersion>;

    fn latest(&self, session_id: &SessionId) -> Option<DocumentVersion>;

    /// Drop every version. Returns whether any existed.
    fn clear(&self, session_id: &SessionId) -> bool;
}

pub struct InMemoryDocumentStore {
    sessions: DashMap<SessionId, Vec<DocumentVersion>>,
    config: DiffConfig,
}

impl InMemoryDocumentStore {
    pub fn new(config: DiffConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new(DiffConfig::default())
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn add_version(&self, session_id: &SessionId, content: String) -> DocumentVersion {
        let mut versions = self.sessions.entry(session_id.clone()).or_default();

        let (version, diff) = match versions.last() {
            Some(prev) => (
                prev.version + 1,
                Some(compute_diff(&prev.content, &content, &self.config)),
            ),
            None => (1, None),
        };

        let record = DocumentVersion {
            version,
            content,
            created_at: Utc::now(),
            diff,
        };
        versions.push(record.clone());

        debug!(
            session_id = %session_id,
            version,
            changed = record.diff.as_ref().map(|d| d.has_changes),
            "recorded document version"
        );
        record
    }

    fn versions(&self, session_id: &SessionId) -> Vec<DocumentVersion> {
        self.sessions
            .get(session_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn latest(&self, session_id: &SessionId) -> Option<DocumentVersion> {
        self.sessions.get(session_id).and_then(|v| v.last().cloned())
    }

    fn clear(&self, session_id: &SessionId) -> bool {
        self.sessions
            .remove(session_id)
            .is_some_and(|(_, versions)| !versions.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_version_has_no_diff() {
        let store = InMemoryDocumentStore::default();
        let id = SessionId::new();
        let v1 = store.add_version(&id, "draft".into());
        assert_eq!(v1.version, 1);
        assert!(v1.diff.is_none());
    }

    #[test]
    fn versions_are_contiguous_with_diffs() {
        let store = InMemoryDocumentStore::default();
        let id = SessionId::new();
        for body in ["one", "one\ntwo", "one\ntwo\nthree"] {
            store.add_version(&id, body.into());
        }

        let versions = store.versions(&id);
        let numbers: Vec<u32> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(versions[1..].iter().all(|v| v.diff.is_some()));
        assert_eq!(store.latest(&id).map(|v| v.content), Some("one\ntwo\nthree".into()));
    }

    #[test]
    fn identical_resubmission_has_no_changes() {
        let store = InMemoryDocumentStore::default();
        let id = SessionId::new();
        store.add_version(&id, "Clause 1\nClause 2".into());
        let v2 = store.add_version(&id, "Clause 1\nClause 2".into());

        let diff = v2.diff.expect("second version has a diff");
        assert!(!diff.has_changes);
        assert!(diff.additions.is_empty());
        assert!(diff.deletions.is_empty());
    }

    #[test]
    fn sessions_are_isolated_and_clearable() {
        let store = InMemoryDocumentStore::default();
        let a = SessionId::new();
        let b = SessionId::new();
        store.add_version(&a, "a1".into());
        store.add_version(&b, "b1".into());
        store.add_version(&b, "b2".into());

        assert!(store.clear(&b));
        assert!(store.versions(&b).is_empty());
        assert!(!store.clear(&b));
        assert_eq!(store.versions(&a).len(), 1);
        // numbering restarts after a clear
        assert_eq!(store.add_version(&b, "b3".into()).version, 1);
    }

    #[test]
    fn versions_serialize_for_clients() {
        let store = InMemoryDocumentStore::default();
        let id = SessionId::new();
        store.add_version(&id, "x".into());
        store.add_version(&id, "y".into());
        let json = serde_json::to_value(store.versions(&id)).unwrap();
        assert!(json[0].get("diff").is_none());
        assert_eq!(json[1]["diff"]["has_changes"], true);
    }
}
