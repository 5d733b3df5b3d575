use serde::{Deserialize, Serialize};
use similar::{Algorithm, ChangeTag, TextDiff};

use lexi_core::documents::{Diff, LineChange, LineEntry};

/// Tuning for pairing deleted and added lines into edits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Pairs scoring strictly above this ratio count as a change.
    pub similarity_threshold: f64,
    /// Above this many candidate pairs, only nearby lines are compared.
    pub max_pair_comparisons: usize,
    /// Largest line-number distance compared in windowed mode.
    pub pair_window: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            max_pair_comparisons: 10_000,
            pair_window: 50,
        }
    }
}

/// Line diff from `old` to `new`. Line numbers are 1-based: additions count
/// in the new text, deletions in the old one.
pub fn compute_diff(old: &str, new: &str, config: &DiffConfig) -> Diff {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_slices(&old_lines, &new_lines);

    let mut additions = Vec::new();
    let mut deletions = Vec::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions.push(LineEntry {
                line: change.new_index().map_or(0, |i| i + 1),
                content: change.value().to_string(),
            }),
            ChangeTag::Delete => deletions.push(LineEntry {
                line: change.old_index().map_or(0, |i| i + 1),
                content: change.value().to_string(),
            }),
            ChangeTag::Equal => {}
        }
    }

    let changes = pair_lines(&additions, &deletions, config);
    Diff::new(additions, deletions, changes)
}

/// Normalized similarity of two strings, `2 * matches / total chars`.
pub fn similarity(a: &str, b: &str) -> f64 {
    f64::from(TextDiff::from_chars(a, b).ratio())
}

fn pair_lines(additions: &[LineEntry], deletions: &[LineEntry], config: &DiffConfig) -> Vec<LineChange> {
    let exhaustive = additions.len().saturating_mul(deletions.len()) <= config.max_pair_comparisons;
    let mut changes = Vec::new();

    for added in additions {
        // deletions are ordered by line, so the window is a contiguous slice
        let candidates = if exhaustive {
            deletions
        } else {
            let lo = added.line.saturating_sub(config.pair_window);
            let hi = added.line.saturating_add(config.pair_window);
            let start = deletions.partition_point(|d| d.line < lo);
            let end = deletions.partition_point(|d| d.line <= hi);
            &deletions[start..end]
        };

        for deleted in candidates {
            let score = similarity(&deleted.content, &added.content);
            if score > config.similarity_threshold {
                changes.push(LineChange {
                    old_line: deleted.line,
                    new_line: added.line,
                    old_content: deleted.content.clone(),
                    new_content: added.content.clone(),
                    similarity: score,
                });
            }
        }
    }

    changes
}
