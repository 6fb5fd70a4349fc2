#![forbid(unsafe_code)]

use intake_core::question::QuestionDefinition;

/// One stored question revision. `id` is the revision identity; the logical
/// identity is `definition.name`.
#[derive(Clone, Debug)]
pub struct QuestionRow {
    pub id: i64,
    pub definition: QuestionDefinition,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}
