#![forbid(unsafe_code)]

mod store;

pub use store::{
    ProgramIndexEntry, ProgramRow, PublishPreview, QuestionRow, SqliteStore, StoreError, VersionRow,
};
