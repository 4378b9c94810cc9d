//! Line-level delta between two versions of a section's content.
//!
//! Produced when an already-complete section is regenerated, so reviewers
//! can see how much a retry changed.

use serde::{Deserialize, Serialize};
use similar::{DiffTag, TextDiff};

/// Maximum number of significant changes recorded per diff.
const MAX_SIGNIFICANT_CHANGES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    /// Lines present only in the new content.
    pub additions: usize,
    /// Lines present only in the old content.
    pub deletions: usize,
    /// Lines rewritten in place (paired insert/delete).
    pub modifications: usize,
    /// Heading lines that were added, removed, or rewritten.
    pub significant_changes: Vec<String>,
    /// Similarity ratio in `[0.0, 1.0]`.
    pub similarity: f32,
}

/// Compute a line diff summary from `old` to `new`.
pub fn summarize(old: &str, new: &str) -> DiffSummary {
    let diff = TextDiff::from_lines(old, new);

    let mut additions = 0;
    let mut deletions = 0;
    let mut modifications = 0;

    for op in diff.ops() {
        match op.tag() {
            DiffTag::Equal => {}
            DiffTag::Insert => additions += op.new_range().len(),
            DiffTag::Delete => deletions += op.old_range().len(),
            DiffTag::Replace => {
                let old_len = op.old_range().len();
                let new_len = op.new_range().len();
                let paired = old_len.min(new_len);
                modifications += paired;
                additions += new_len - paired;
                deletions += old_len - paired;
            }
        }
    }

    let significant_changes = diff
        .iter_all_changes()
        .filter(|c| c.tag() != similar::ChangeTag::Equal)
        .filter_map(|c| {
            let line = c.value().trim();
            line.starts_with('#').then(|| {
                let sign = match c.tag() {
                    similar::ChangeTag::Insert => '+',
                    _ => '-',
                };
                format!("{sign} {line}")
            })
        })
        .take(MAX_SIGNIFICANT_CHANGES)
        .collect();

    DiffSummary {
        additions,
        deletions,
        modifications,
        significant_changes,
        similarity: diff.ratio(),
    }
}
