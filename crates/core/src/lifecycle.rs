#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Draft,
    Active,
    Obsolete,
    Deleted,
}

impl LifecycleStage {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStage::Draft => "draft",
            LifecycleStage::Active => "active",
            LifecycleStage::Obsolete => "obsolete",
            LifecycleStage::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(LifecycleStage::Draft),
            "active" => Some(LifecycleStage::Active),
            "obsolete" => Some(LifecycleStage::Obsolete),
            "deleted" => Some(LifecycleStage::Deleted),
            _ => None,
        }
    }
}
