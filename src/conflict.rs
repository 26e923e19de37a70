use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::error::{Error, Result};
use crate::hash;

/// Textual diffs are capped so a conflict report stays transportable.
const DIFF_CHAR_LIMIT: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HashSource {
    /// Baseline supplied explicitly by the caller.
    Param,
    /// Baseline recovered from the xattr metadata cache.
    Xattr,
    /// Baseline computed from local file bytes.
    Computed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffBlock {
    pub format: String,
    pub content: String,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub script_id: String,
    pub filename: String,
    pub operation: String,
    pub expected_hash: String,
    pub current_hash: String,
    pub hash_source: HashSource,
    pub diff: DiffBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_details: Option<String>,
}

pub struct ConflictCheck<'a> {
    pub script_id: &'a str,
    pub filename: &'a str,
    pub operation: &'a str,
    /// Content currently stored remotely, when the file exists.
    pub current_remote_content: Option<&'a str>,
    /// Stored-form content the write would install; used only to render the
    /// diff in the report.
    pub proposed_content: Option<&'a str>,
    pub expected_hash: Option<&'a str>,
    pub hash_source: HashSource,
    pub force: bool,
}

/// Decide whether a write may proceed. Pure: no I/O, no state change.
///
/// Force wins outright; an absent baseline means first-write semantics; a
/// matching baseline allows; anything else raises a [`Error::Conflict`] with
/// a truncated unified diff of baseline vs current remote.
pub fn check(input: ConflictCheck<'_>) -> Result<()> {
    if input.force {
        return Ok(());
    }
    let Some(current) = input.current_remote_content else {
        return Ok(());
    };
    let Some(expected) = input.expected_hash else {
        return Ok(());
    };
    let current_hash = hash::git_blob_sha1_str(current);
    if hash::hashes_equal(expected, &current_hash) {
        return Ok(());
    }

    let proposed = input.proposed_content.unwrap_or("");
    let diff = render_unified_diff(current, proposed, input.filename);
    Err(Error::Conflict {
        report: Box::new(ConflictReport {
            script_id: input.script_id.to_string(),
            filename: input.filename.to_string(),
            operation: input.operation.to_string(),
            expected_hash: expected.to_string(),
            current_hash,
            hash_source: input.hash_source,
            diff,
            change_details: None,
        }),
    })
}

pub fn render_unified_diff(current: &str, proposed: &str, filename: &str) -> DiffBlock {
    let diff = TextDiff::from_lines(current, proposed);
    let mut content = diff
        .unified_diff()
        .context_radius(3)
        .header(
            &format!("{filename} (remote)"),
            &format!("{filename} (proposed)"),
        )
        .to_string();
    let mut lines_added = 0;
    let mut lines_removed = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Insert => lines_added += 1,
            similar::ChangeTag::Delete => lines_removed += 1,
            similar::ChangeTag::Equal => {}
        }
    }
    let original_len = content.len();
    let mut truncated = false;
    let mut truncated_message = None;
    if original_len > DIFF_CHAR_LIMIT {
        let mut cut = DIFF_CHAR_LIMIT;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
        truncated = true;
        truncated_message = Some(format!(
            "diff truncated to {DIFF_CHAR_LIMIT} of {original_len} characters"
        ));
    }
    DiffBlock {
        format: "unified".to_string(),
        content,
        lines_added,
        lines_removed,
        truncated,
        truncated_message,
    }
}
