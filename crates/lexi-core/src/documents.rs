use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A full-text snapshot of the session's working document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub version: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Present for every version after the first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub additions: Vec<LineEntry>,
    pub deletions: Vec<LineEntry>,
    pub changes: Vec<LineChange>,
    pub has_changes: bool,
}

/// A 1-based line number and its text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    pub line: usize,
    pub content: String,
}

/// A deleted line and an added line similar enough to read as an edit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineChange {
    pub old_line: usize,
    pub new_line: usize,
    pub old_content: String,
    pub new_content: String,
    pub similarity: f64,
}

impl Diff {
    pub fn new(additions: Vec<LineEntry>, deletions: Vec<LineEntry>, changes: Vec<LineChange>) -> Self {
        let has_changes = !additions.is_empty() || !deletions.is_empty();
        Self {
            additions,
            deletions,
            changes,
            has_changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_changes_follows_additions_and_deletions() {
        assert!(!Diff::new(vec![], vec![], vec![]).has_changes);
        let added = LineEntry { line: 1, content: "x".into() };
        assert!(Diff::new(vec![added.clone()], vec![], vec![]).has_changes);
        assert!(Diff::new(vec![], vec![added], vec![]).has_changes);
    }

    #[test]
    fn first_version_serializes_without_diff() {
        let v = DocumentVersion {
            version: 1,
            content: "draft".into(),
            created_at: Utc::now(),
            diff: None,
        };
        let json = serde_json::to_value(&v).unwrap();
        assert!(json.get("diff").is_none());
        assert_eq!(json["version"], 1);
    }
}
