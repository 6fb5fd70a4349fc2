#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::predicate::PredicateDefinition;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionReference {
    pub question_id: i64,
    #[serde(default)]
    pub optional: bool,
}

/// One screen of a program: an ordered run of question references plus the
/// optional visibility and eligibility conditions gating it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub visibility: Option<PredicateDefinition>,
    #[serde(default)]
    pub eligibility: Option<PredicateDefinition>,
    #[serde(default)]
    pub questions: Vec<QuestionReference>,
}

impl BlockDefinition {
    pub fn collect_question_ids(&self, out: &mut BTreeSet<i64>) {
        for reference in &self.questions {
            out.insert(reference.question_id);
        }
        if let Some(visibility) = &self.visibility {
            visibility.root.collect_question_ids(out);
        }
        if let Some(eligibility) = &self.eligibility {
            eligibility.root.collect_question_ids(out);
        }
    }
}

/// The full payload of one program revision. `admin_name` is the logical
/// identity shared by every revision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramDefinition {
    pub admin_name: String,
    #[serde(default)]
    pub admin_description: String,
    pub display_name: String,
    #[serde(default)]
    pub blocks: Vec<BlockDefinition>,
}

impl ProgramDefinition {
    /// Every question revision id the program points at, through block
    /// question lists and predicate leaves alike.
    pub fn question_ids(&self) -> BTreeSet<i64> {
        let mut out = BTreeSet::new();
        for block in &self.blocks {
            block.collect_question_ids(&mut out);
        }
        out
    }

    pub fn references_question(&self, question_id: i64) -> bool {
        self.question_ids().contains(&question_id)
    }
}
