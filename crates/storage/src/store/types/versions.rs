#![forbid(unsafe_code)]

use intake_core::lifecycle::LifecycleStage;

#[derive(Clone, Debug)]
pub struct VersionRow {
    pub id: i64,
    pub stage: LifecycleStage,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}
