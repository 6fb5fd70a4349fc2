#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Address,
    Checkbox,
    Currency,
    Date,
    Dropdown,
    Email,
    Enumerator,
    FileUpload,
    Id,
    Name,
    Number,
    Phone,
    Radio,
    Static,
    Text,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::Address => "address",
            QuestionType::Checkbox => "checkbox",
            QuestionType::Currency => "currency",
            QuestionType::Date => "date",
            QuestionType::Dropdown => "dropdown",
            QuestionType::Email => "email",
            QuestionType::Enumerator => "enumerator",
            QuestionType::FileUpload => "file_upload",
            QuestionType::Id => "id",
            QuestionType::Name => "name",
            QuestionType::Number => "number",
            QuestionType::Phone => "phone",
            QuestionType::Radio => "radio",
            QuestionType::Static => "static",
            QuestionType::Text => "text",
        }
    }
}

/// Administrative tags on a question. Export tags travel with the logical
/// question across revisions; the universal tag follows each definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionTag {
    Demographic,
    DemographicPii,
    NonDemographic,
    Universal,
}

impl QuestionTag {
    pub fn is_export(self) -> bool {
        matches!(
            self,
            QuestionTag::Demographic | QuestionTag::DemographicPii | QuestionTag::NonDemographic
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i64,
    pub admin_name: String,
    pub text: String,
}

/// The full payload of one question revision. `name` is the logical identity
/// shared by every revision; `enumerator_id` points at the parent enumerator
/// *revision* row, which is why enumerator edits cascade new revisions onto
/// their children.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDefinition {
    pub name: String,
    pub path_segment: String,
    #[serde(default)]
    pub enumerator_id: Option<i64>,
    pub description: String,
    pub question_type: QuestionType,
    pub question_text: String,
    #[serde(default)]
    pub help_text: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub tags: BTreeSet<QuestionTag>,
    /// Raw validation predicate JSON, opaque at this layer.
    #[serde(default)]
    pub validation: Option<String>,
}

impl QuestionDefinition {
    pub fn is_enumerator(&self) -> bool {
        self.question_type == QuestionType::Enumerator
    }

    pub fn export_tags(&self) -> BTreeSet<QuestionTag> {
        self.tags.iter().copied().filter(|t| t.is_export()).collect()
    }
}
