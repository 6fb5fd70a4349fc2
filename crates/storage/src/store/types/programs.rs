#![forbid(unsafe_code)]

use intake_core::program::ProgramDefinition;

/// One stored program revision. `id` is the revision identity; the logical
/// identity is `definition.admin_name`.
#[derive(Clone, Debug)]
pub struct ProgramRow {
    pub id: i64,
    pub definition: ProgramDefinition,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// One admin-facing listing entry: the current revisions of a logical
/// program, keyed by admin name.
#[derive(Clone, Debug)]
pub struct ProgramIndexEntry {
    pub admin_name: String,
    pub active: Option<ProgramRow>,
    pub draft: Option<ProgramRow>,
}
