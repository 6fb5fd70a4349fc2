#![forbid(unsafe_code)]

use std::collections::BTreeSet;

/// Dry-run result: the logical names the next published version would carry.
#[derive(Clone, Debug)]
pub struct PublishPreview {
    pub draft_version_id: i64,
    pub program_names: BTreeSet<String>,
    pub question_names: BTreeSet<String>,
}
