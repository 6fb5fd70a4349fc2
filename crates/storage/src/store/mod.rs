#![forbid(unsafe_code)]

mod error;
mod programs;
mod publish;
mod questions;
mod retry;
mod types;
mod versions;

pub use error::StoreError;
pub use types::*;

use intake_core::lifecycle::LifecycleStage;
use intake_core::program::ProgramDefinition;
use intake_core::question::QuestionDefinition;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, params};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA_VERSION: i64 = 1;
const KIND_PROGRAM: &str = "program";
const KIND_QUESTION: &str = "question";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join("intake.db");
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;")?;

        preflight_gate(&conn)?;
        install_schema(&conn)?;

        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }
}

fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    if tables.is_empty() {
        return Ok(());
    }

    let required: BTreeSet<&str> = [
        "store_state",
        "versions",
        "questions",
        "programs",
        "versions_questions",
        "versions_programs",
        "version_tombstones",
    ]
    .into_iter()
    .collect();

    if tables
        .iter()
        .any(|table| !required.contains(table.as_str()))
    {
        return Err(StoreError::InvalidInput(
            "RESET_REQUIRED: unsupported tables detected",
        ));
    }

    for table in required {
        if !tables.contains(table) {
            return Err(StoreError::InvalidInput(
                "RESET_REQUIRED: required table is missing",
            ));
        }
    }

    let version = conn
        .query_row(
            "SELECT schema_version FROM store_state WHERE singleton=1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    match version {
        Some(actual) if actual == SCHEMA_VERSION => Ok(()),
        Some(actual) => Err(StoreError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            actual,
        }),
        None => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema state row is missing",
        )),
    }
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    let now_ms = now_ms();

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS store_state (
          singleton INTEGER PRIMARY KEY CHECK(singleton = 1),
          schema_version INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS versions (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          lifecycle_stage TEXT NOT NULL
            CHECK(lifecycle_stage IN ('draft','active','obsolete','deleted')),
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_versions_lone_draft
          ON versions(lifecycle_stage) WHERE lifecycle_stage='draft';

        CREATE UNIQUE INDEX IF NOT EXISTS idx_versions_lone_active
          ON versions(lifecycle_stage) WHERE lifecycle_stage='active';

        CREATE TABLE IF NOT EXISTS questions (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          path_segment TEXT NOT NULL,
          enumerator_id INTEGER,
          definition TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          FOREIGN KEY(enumerator_id) REFERENCES questions(id) ON DELETE RESTRICT
        );

        CREATE INDEX IF NOT EXISTS idx_questions_name ON questions(name, id);
        CREATE INDEX IF NOT EXISTS idx_questions_enumerator ON questions(enumerator_id);

        CREATE TABLE IF NOT EXISTS programs (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          admin_name TEXT NOT NULL,
          definition TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_programs_admin_name ON programs(admin_name, id);

        CREATE TABLE IF NOT EXISTS versions_questions (
          version_id INTEGER NOT NULL,
          question_id INTEGER NOT NULL,
          PRIMARY KEY(version_id, question_id),
          FOREIGN KEY(version_id) REFERENCES versions(id) ON DELETE CASCADE,
          FOREIGN KEY(question_id) REFERENCES questions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_versions_questions_question
          ON versions_questions(question_id);

        CREATE TABLE IF NOT EXISTS versions_programs (
          version_id INTEGER NOT NULL,
          program_id INTEGER NOT NULL,
          PRIMARY KEY(version_id, program_id),
          FOREIGN KEY(version_id) REFERENCES versions(id) ON DELETE CASCADE,
          FOREIGN KEY(program_id) REFERENCES programs(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_versions_programs_program
          ON versions_programs(program_id);

        CREATE TABLE IF NOT EXISTS version_tombstones (
          version_id INTEGER NOT NULL,
          entity_kind TEXT NOT NULL CHECK(entity_kind IN ('program','question')),
          name TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY(version_id, entity_kind, name),
          FOREIGN KEY(version_id) REFERENCES versions(id) ON DELETE CASCADE
        );
        "#,
    )?;

    conn.execute(
        "INSERT INTO store_state(singleton, schema_version, created_at_ms, updated_at_ms) \
         VALUES (1, ?1, ?2, ?2) \
         ON CONFLICT(singleton) DO UPDATE SET schema_version=excluded.schema_version, updated_at_ms=excluded.updated_at_ms",
        params![SCHEMA_VERSION, now_ms],
    )?;

    // A store carries exactly one active version from the first open on;
    // racing first opens collapse onto one row via the partial unique index.
    let active: i64 = conn.query_row(
        "SELECT COUNT(1) FROM versions WHERE lifecycle_stage='active'",
        [],
        |row| row.get(0),
    )?;
    if active == 0 {
        conn.execute(
            "INSERT OR IGNORE INTO versions(lifecycle_stage, created_at_ms, updated_at_ms) VALUES ('active', ?1, ?1)",
            params![now_ms],
        )?;
    }

    Ok(())
}

fn decode_version(
    id: i64,
    stage: &str,
    created_at_ms: i64,
    updated_at_ms: i64,
) -> Result<VersionRow, StoreError> {
    let Some(stage) = LifecycleStage::parse(stage) else {
        return Err(StoreError::InvalidInput("unknown lifecycle stage in store"));
    };
    Ok(VersionRow {
        id,
        stage,
        created_at_ms,
        updated_at_ms,
    })
}

fn version_by_stage(
    conn: &Connection,
    stage: LifecycleStage,
) -> Result<Option<VersionRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, lifecycle_stage, created_at_ms, updated_at_ms \
             FROM versions WHERE lifecycle_stage=?1",
            params![stage.as_str()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, stage, created_at_ms, updated_at_ms)| {
        decode_version(id, &stage, created_at_ms, updated_at_ms)
    })
    .transpose()
}

fn version_by_id(conn: &Connection, version_id: i64) -> Result<Option<VersionRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, lifecycle_stage, created_at_ms, updated_at_ms FROM versions WHERE id=?1",
            params![version_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, stage, created_at_ms, updated_at_ms)| {
        decode_version(id, &stage, created_at_ms, updated_at_ms)
    })
    .transpose()
}

fn count_versions_in_stage(conn: &Connection, stage: LifecycleStage) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(1) FROM versions WHERE lifecycle_stage=?1",
        params![stage.as_str()],
        |row| row.get(0),
    )?)
}

fn set_stage_tx(
    tx: &Transaction<'_>,
    version_id: i64,
    stage: LifecycleStage,
    now_ms: i64,
) -> Result<(), StoreError> {
    let update = tx.execute(
        "UPDATE versions SET lifecycle_stage=?2, updated_at_ms=?3 WHERE id=?1",
        params![version_id, stage.as_str(), now_ms],
    );
    match update {
        Ok(1) => Ok(()),
        Ok(_) => Err(StoreError::UnknownVersion { version_id }),
        Err(err) => Err(map_constraint_conflict(
            err,
            "another version already holds this stage",
        )),
    }
}

fn insert_version_tx(
    tx: &Transaction<'_>,
    stage: LifecycleStage,
    now_ms: i64,
) -> Result<i64, StoreError> {
    let insert = tx.execute(
        "INSERT INTO versions(lifecycle_stage, created_at_ms, updated_at_ms) VALUES (?1, ?2, ?2)",
        params![stage.as_str(), now_ms],
    );
    if let Err(err) = insert {
        return Err(map_constraint_conflict(
            err,
            "another version already holds this stage",
        ));
    }
    Ok(tx.last_insert_rowid())
}

// Re-checks inside the transaction before inserting; the partial unique index
// turns the losing side of a create race into a retryable conflict.
fn draft_version_or_create_tx(tx: &Transaction<'_>) -> Result<VersionRow, StoreError> {
    if let Some(existing) = version_by_stage(tx, LifecycleStage::Draft)? {
        return Ok(existing);
    }

    let id = insert_version_tx(tx, LifecycleStage::Draft, now_ms())?;
    if count_versions_in_stage(tx, LifecycleStage::Draft)? != 1 {
        return Err(StoreError::Conflict(
            "expected exactly one draft version after create",
        ));
    }

    version_by_id(tx, id)?.ok_or(StoreError::UnknownVersion { version_id: id })
}

fn decode_question_row(
    id: i64,
    payload: &str,
    created_at_ms: i64,
    updated_at_ms: i64,
) -> Result<QuestionRow, StoreError> {
    let definition: QuestionDefinition = serde_json::from_str(payload)?;
    Ok(QuestionRow {
        id,
        definition,
        created_at_ms,
        updated_at_ms,
    })
}

fn decode_program_row(
    id: i64,
    payload: &str,
    created_at_ms: i64,
    updated_at_ms: i64,
) -> Result<ProgramRow, StoreError> {
    let definition: ProgramDefinition = serde_json::from_str(payload)?;
    Ok(ProgramRow {
        id,
        definition,
        created_at_ms,
        updated_at_ms,
    })
}

fn question_by_id(conn: &Connection, question_id: i64) -> Result<Option<QuestionRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, definition, created_at_ms, updated_at_ms FROM questions WHERE id=?1",
            params![question_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, payload, created_at_ms, updated_at_ms)| {
        decode_question_row(id, &payload, created_at_ms, updated_at_ms)
    })
    .transpose()
}

fn program_by_id(conn: &Connection, program_id: i64) -> Result<Option<ProgramRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, definition, created_at_ms, updated_at_ms FROM programs WHERE id=?1",
            params![program_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, payload, created_at_ms, updated_at_ms)| {
        decode_program_row(id, &payload, created_at_ms, updated_at_ms)
    })
    .transpose()
}

fn question_name_by_id(conn: &Connection, question_id: i64) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT name FROM questions WHERE id=?1",
            params![question_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}

fn questions_in_version(
    conn: &Connection,
    version_id: i64,
) -> Result<Vec<QuestionRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT q.id, q.definition, q.created_at_ms, q.updated_at_ms \
         FROM questions q \
         JOIN versions_questions vq ON vq.question_id = q.id \
         WHERE vq.version_id=?1 \
         ORDER BY q.id ASC",
    )?;
    let mut rows = stmt.query(params![version_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(decode_question_row(
            row.get::<_, i64>(0)?,
            &row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
        )?);
    }
    Ok(out)
}

fn programs_in_version(conn: &Connection, version_id: i64) -> Result<Vec<ProgramRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.definition, p.created_at_ms, p.updated_at_ms \
         FROM programs p \
         JOIN versions_programs vp ON vp.program_id = p.id \
         WHERE vp.version_id=?1 \
         ORDER BY p.id ASC",
    )?;
    let mut rows = stmt.query(params![version_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(decode_program_row(
            row.get::<_, i64>(0)?,
            &row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
        )?);
    }
    Ok(out)
}

fn question_by_name_in_version(
    conn: &Connection,
    version_id: i64,
    name: &str,
) -> Result<Option<QuestionRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT q.id, q.definition, q.created_at_ms, q.updated_at_ms \
             FROM questions q \
             JOIN versions_questions vq ON vq.question_id = q.id \
             WHERE vq.version_id=?1 AND q.name=?2 \
             ORDER BY q.id DESC \
             LIMIT 1",
            params![version_id, name],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, payload, created_at_ms, updated_at_ms)| {
        decode_question_row(id, &payload, created_at_ms, updated_at_ms)
    })
    .transpose()
}

fn program_by_name_in_version(
    conn: &Connection,
    version_id: i64,
    admin_name: &str,
) -> Result<Option<ProgramRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT p.id, p.definition, p.created_at_ms, p.updated_at_ms \
             FROM programs p \
             JOIN versions_programs vp ON vp.program_id = p.id \
             WHERE vp.version_id=?1 AND p.admin_name=?2 \
             ORDER BY p.id DESC \
             LIMIT 1",
            params![version_id, admin_name],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, payload, created_at_ms, updated_at_ms)| {
        decode_program_row(id, &payload, created_at_ms, updated_at_ms)
    })
    .transpose()
}

fn question_names_in_version(
    conn: &Connection,
    version_id: i64,
) -> Result<BTreeSet<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT q.name FROM questions q \
         JOIN versions_questions vq ON vq.question_id = q.id \
         WHERE vq.version_id=?1",
    )?;
    let mut rows = stmt.query(params![version_id])?;
    let mut out = BTreeSet::new();
    while let Some(row) = rows.next()? {
        out.insert(row.get::<_, String>(0)?);
    }
    Ok(out)
}

fn program_names_in_version(
    conn: &Connection,
    version_id: i64,
) -> Result<BTreeSet<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT p.admin_name FROM programs p \
         JOIN versions_programs vp ON vp.program_id = p.id \
         WHERE vp.version_id=?1",
    )?;
    let mut rows = stmt.query(params![version_id])?;
    let mut out = BTreeSet::new();
    while let Some(row) = rows.next()? {
        out.insert(row.get::<_, String>(0)?);
    }
    Ok(out)
}

fn count_questions_in_version(conn: &Connection, version_id: i64) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(1) FROM versions_questions WHERE version_id=?1",
        params![version_id],
        |row| row.get(0),
    )?)
}

fn count_programs_in_version(conn: &Connection, version_id: i64) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(1) FROM versions_programs WHERE version_id=?1",
        params![version_id],
        |row| row.get(0),
    )?)
}

fn count_programs_named(
    conn: &Connection,
    version_id: i64,
    admin_name: &str,
) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(1) FROM versions_programs vp \
         JOIN programs p ON p.id = vp.program_id \
         WHERE vp.version_id=?1 AND p.admin_name=?2",
        params![version_id, admin_name],
        |row| row.get(0),
    )?)
}

fn program_in_version(
    conn: &Connection,
    version_id: i64,
    program_id: i64,
) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM versions_programs WHERE version_id=?1 AND program_id=?2",
            params![version_id, program_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn add_question_membership_tx(
    tx: &Transaction<'_>,
    version_id: i64,
    question_id: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR IGNORE INTO versions_questions(version_id, question_id) VALUES (?1, ?2)",
        params![version_id, question_id],
    )?;
    Ok(())
}

fn add_program_membership_tx(
    tx: &Transaction<'_>,
    version_id: i64,
    program_id: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR IGNORE INTO versions_programs(version_id, program_id) VALUES (?1, ?2)",
        params![version_id, program_id],
    )?;
    Ok(())
}

fn remove_question_membership_tx(
    tx: &Transaction<'_>,
    version_id: i64,
    question_id: i64,
) -> Result<bool, StoreError> {
    let removed = tx.execute(
        "DELETE FROM versions_questions WHERE version_id=?1 AND question_id=?2",
        params![version_id, question_id],
    )?;
    Ok(removed > 0)
}

fn remove_program_membership_tx(
    tx: &Transaction<'_>,
    version_id: i64,
    program_id: i64,
) -> Result<bool, StoreError> {
    let removed = tx.execute(
        "DELETE FROM versions_programs WHERE version_id=?1 AND program_id=?2",
        params![version_id, program_id],
    )?;
    Ok(removed > 0)
}

fn remove_question_members_named_tx(
    tx: &Transaction<'_>,
    version_id: i64,
    name: &str,
) -> Result<(), StoreError> {
    tx.execute(
        "DELETE FROM versions_questions \
         WHERE version_id=?1 \
           AND question_id IN (SELECT id FROM questions WHERE name=?2)",
        params![version_id, name],
    )?;
    Ok(())
}

fn remove_program_members_named_tx(
    tx: &Transaction<'_>,
    version_id: i64,
    admin_name: &str,
) -> Result<(), StoreError> {
    tx.execute(
        "DELETE FROM versions_programs \
         WHERE version_id=?1 \
           AND program_id IN (SELECT id FROM programs WHERE admin_name=?2)",
        params![version_id, admin_name],
    )?;
    Ok(())
}

fn tombstoned_names(
    conn: &Connection,
    version_id: i64,
    entity_kind: &str,
) -> Result<BTreeSet<String>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT name FROM version_tombstones WHERE version_id=?1 AND entity_kind=?2")?;
    let mut rows = stmt.query(params![version_id, entity_kind])?;
    let mut out = BTreeSet::new();
    while let Some(row) = rows.next()? {
        out.insert(row.get::<_, String>(0)?);
    }
    Ok(out)
}

fn add_tombstone_tx(
    tx: &Transaction<'_>,
    version_id: i64,
    entity_kind: &str,
    name: &str,
) -> Result<bool, StoreError> {
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO version_tombstones(version_id, entity_kind, name, created_at_ms) \
         VALUES (?1, ?2, ?3, ?4)",
        params![version_id, entity_kind, name, now_ms()],
    )?;
    Ok(inserted > 0)
}

fn remove_tombstone_tx(
    tx: &Transaction<'_>,
    version_id: i64,
    entity_kind: &str,
    name: &str,
) -> Result<bool, StoreError> {
    let removed = tx.execute(
        "DELETE FROM version_tombstones WHERE version_id=?1 AND entity_kind=?2 AND name=?3",
        params![version_id, entity_kind, name],
    )?;
    Ok(removed > 0)
}

// Draft-preferred resolution of a logical question name: the draft revision
// wins while one exists, otherwise the active one. Every reference rewrite
// goes through this rule.
fn latest_revision_by_name(
    conn: &Connection,
    name: &str,
) -> Result<Option<QuestionRow>, StoreError> {
    if let Some(draft) = version_by_stage(conn, LifecycleStage::Draft)? {
        if let Some(row) = question_by_name_in_version(conn, draft.id, name)? {
            return Ok(Some(row));
        }
    }
    if let Some(active) = version_by_stage(conn, LifecycleStage::Active)? {
        if let Some(row) = question_by_name_in_version(conn, active.id, name)? {
            return Ok(Some(row));
        }
    }
    Ok(None)
}

// Newest revision of the name across every version, used for tag
// carry-forward when a name re-enters the draft after being retired.
fn newest_question_named(conn: &Connection, name: &str) -> Result<Option<QuestionRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, definition, created_at_ms, updated_at_ms FROM questions \
             WHERE name=?1 ORDER BY id DESC LIMIT 1",
            params![name],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, payload, created_at_ms, updated_at_ms)| {
        decode_question_row(id, &payload, created_at_ms, updated_at_ms)
    })
    .transpose()
}

fn latest_revision_for_reference(
    conn: &Connection,
    question_id: i64,
    program_id: i64,
) -> Result<i64, StoreError> {
    let name = question_name_by_id(conn, question_id)?.ok_or(
        StoreError::DanglingQuestionReference {
            program_id,
            question_id,
        },
    )?;
    let latest = latest_revision_by_name(conn, &name)?.ok_or(
        StoreError::DanglingQuestionReference {
            program_id,
            question_id,
        },
    )?;
    Ok(latest.id)
}

fn insert_question_tx(
    tx: &Transaction<'_>,
    definition: &QuestionDefinition,
) -> Result<(i64, i64), StoreError> {
    let now_ms = now_ms();
    let payload = serde_json::to_string(definition)?;
    let insert = tx.execute(
        "INSERT INTO questions(name, path_segment, enumerator_id, definition, created_at_ms, updated_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            definition.name,
            definition.path_segment,
            definition.enumerator_id,
            payload,
            now_ms,
        ],
    );
    if let Err(err) = insert {
        return Err(map_constraint_conflict(
            err,
            "question revision insert conflicted",
        ));
    }
    Ok((tx.last_insert_rowid(), now_ms))
}

fn update_question_row_tx(
    tx: &Transaction<'_>,
    question_id: i64,
    definition: &QuestionDefinition,
) -> Result<i64, StoreError> {
    let now_ms = now_ms();
    let payload = serde_json::to_string(definition)?;
    let updated = tx.execute(
        "UPDATE questions SET name=?2, path_segment=?3, enumerator_id=?4, definition=?5, updated_at_ms=?6 \
         WHERE id=?1",
        params![
            question_id,
            definition.name,
            definition.path_segment,
            definition.enumerator_id,
            payload,
            now_ms,
        ],
    )?;
    if updated != 1 {
        return Err(StoreError::UnknownQuestion { question_id });
    }
    Ok(now_ms)
}

fn insert_program_tx(
    tx: &Transaction<'_>,
    definition: &ProgramDefinition,
) -> Result<(i64, i64), StoreError> {
    let now_ms = now_ms();
    let payload = serde_json::to_string(definition)?;
    let insert = tx.execute(
        "INSERT INTO programs(admin_name, definition, created_at_ms, updated_at_ms) \
         VALUES (?1, ?2, ?3, ?3)",
        params![definition.admin_name, payload, now_ms],
    );
    if let Err(err) = insert {
        return Err(map_constraint_conflict(
            err,
            "program revision insert conflicted",
        ));
    }
    Ok((tx.last_insert_rowid(), now_ms))
}

fn update_program_row_tx(
    tx: &Transaction<'_>,
    program_id: i64,
    definition: &ProgramDefinition,
) -> Result<i64, StoreError> {
    let now_ms = now_ms();
    let payload = serde_json::to_string(definition)?;
    let updated = tx.execute(
        "UPDATE programs SET admin_name=?2, definition=?3, updated_at_ms=?4 WHERE id=?1",
        params![program_id, definition.admin_name, payload, now_ms],
    )?;
    if updated != 1 {
        return Err(StoreError::UnknownProgram { program_id });
    }
    Ok(now_ms)
}

fn map_constraint_conflict(err: rusqlite::Error, reason: &'static str) -> StoreError {
    if is_constraint_violation(&err) {
        return StoreError::Conflict(reason);
    }
    StoreError::Sql(err)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return 0,
    };

    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
