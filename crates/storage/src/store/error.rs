#![forbid(unsafe_code)]

use intake_core::lifecycle::LifecycleStage;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    Json(serde_json::Error),
    InvalidInput(&'static str),
    SchemaMismatch {
        expected: i64,
        actual: i64,
    },
    Conflict(&'static str),
    RetryExhausted {
        op: &'static str,
        attempts: u32,
    },
    NoActiveVersion,
    NoDraftVersion,
    EmptyDraft,
    UnknownVersion {
        version_id: i64,
    },
    UnknownQuestion {
        question_id: i64,
    },
    UnknownQuestionName {
        name: String,
    },
    UnknownProgram {
        program_id: i64,
    },
    UnknownProgramName {
        admin_name: String,
    },
    ProgramNotInDraft {
        admin_name: String,
    },
    NotADraftProgram {
        program_id: i64,
    },
    InvalidRollbackTarget {
        version_id: i64,
        stage: LifecycleStage,
    },
    DuplicateQuestionName {
        name: String,
    },
    DanglingQuestionReference {
        program_id: i64,
        question_id: i64,
    },
    SharedDraftQuestions {
        admin_name: String,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Json(err) => write!(f, "json: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::SchemaMismatch { expected, actual } => write!(
                f,
                "schema version mismatch (expected={expected}, actual={actual})"
            ),
            Self::Conflict(reason) => write!(f, "serialization conflict: {reason}"),
            Self::RetryExhausted { op, attempts } => {
                write!(f, "retries exhausted (op={op}, attempts={attempts})")
            }
            Self::NoActiveVersion => write!(f, "no active version"),
            Self::NoDraftVersion => write!(f, "no draft version"),
            Self::EmptyDraft => write!(f, "draft version has no programs to publish"),
            Self::UnknownVersion { version_id } => {
                write!(f, "unknown version (version_id={version_id})")
            }
            Self::UnknownQuestion { question_id } => {
                write!(f, "unknown question (question_id={question_id})")
            }
            Self::UnknownQuestionName { name } => {
                write!(f, "unknown question name (name={name})")
            }
            Self::UnknownProgram { program_id } => {
                write!(f, "unknown program (program_id={program_id})")
            }
            Self::UnknownProgramName { admin_name } => {
                write!(f, "unknown program name (admin_name={admin_name})")
            }
            Self::ProgramNotInDraft { admin_name } => {
                write!(f, "program has no draft revision (admin_name={admin_name})")
            }
            Self::NotADraftProgram { program_id } => {
                write!(f, "program is not a draft member (program_id={program_id})")
            }
            Self::InvalidRollbackTarget { version_id, stage } => write!(
                f,
                "invalid rollback target (version_id={version_id}, stage={})",
                stage.as_str()
            ),
            Self::DuplicateQuestionName { name } => {
                write!(f, "duplicate question name in version (name={name})")
            }
            Self::DanglingQuestionReference {
                program_id,
                question_id,
            } => write!(
                f,
                "program references a question outside the version (program_id={program_id}, question_id={question_id})"
            ),
            Self::SharedDraftQuestions { admin_name } => write!(
                f,
                "draft questions are shared with another draft program (admin_name={admin_name})"
            ),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
