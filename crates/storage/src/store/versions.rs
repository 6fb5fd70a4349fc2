#![forbid(unsafe_code)]

use super::*;
use super::programs::upsert_program_draft_tx;
use super::retry::run_serializable;
use rusqlite::{OptionalExtension, params};

impl SqliteStore {
    pub fn get_draft_version(&self) -> Result<Option<VersionRow>, StoreError> {
        version_by_stage(&self.conn, LifecycleStage::Draft)
    }

    pub fn get_active_version(&self) -> Result<VersionRow, StoreError> {
        version_by_stage(&self.conn, LifecycleStage::Active)?.ok_or(StoreError::NoActiveVersion)
    }

    pub fn get_version(&self, version_id: i64) -> Result<VersionRow, StoreError> {
        version_by_id(&self.conn, version_id)?.ok_or(StoreError::UnknownVersion { version_id })
    }

    /// Most recent version preceding `version_id`, skipping deleted ones.
    pub fn get_previous_version(&self, version_id: i64) -> Result<Option<VersionRow>, StoreError> {
        self.get_version(version_id)?;

        let row = self
            .conn
            .query_row(
                "SELECT id, lifecycle_stage, created_at_ms, updated_at_ms FROM versions \
                 WHERE id < ?1 AND lifecycle_stage != 'deleted' \
                 ORDER BY id DESC LIMIT 1",
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

    /// Returns the current draft version, creating it when none exists. The
    /// fast path is a plain read; creation re-checks under `BEGIN IMMEDIATE`
    /// so concurrent callers converge on one row.
    pub fn get_or_create_draft_version(&mut self) -> Result<VersionRow, StoreError> {
        if let Some(existing) = version_by_stage(&self.conn, LifecycleStage::Draft)? {
            return Ok(existing);
        }

        run_serializable(&mut self.conn, "version.draft_create", |tx| {
            draft_version_or_create_tx(tx)
        })
    }

    pub fn questions_for_version(&self, version_id: i64) -> Result<Vec<QuestionRow>, StoreError> {
        self.get_version(version_id)?;
        questions_in_version(&self.conn, version_id)
    }

    pub fn programs_for_version(&self, version_id: i64) -> Result<Vec<ProgramRow>, StoreError> {
        self.get_version(version_id)?;
        programs_in_version(&self.conn, version_id)
    }

    pub fn question_by_name_for_version(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<QuestionRow>, StoreError> {
        self.get_version(version_id)?;
        question_by_name_in_version(&self.conn, version_id, name)
    }

    pub fn program_by_name_for_version(
        &self,
        version_id: i64,
        admin_name: &str,
    ) -> Result<Option<ProgramRow>, StoreError> {
        self.get_version(version_id)?;
        program_by_name_in_version(&self.conn, version_id, admin_name)
    }

    pub fn question_names_for_version(
        &self,
        version_id: i64,
    ) -> Result<BTreeSet<String>, StoreError> {
        self.get_version(version_id)?;
        question_names_in_version(&self.conn, version_id)
    }

    pub fn program_names_for_version(
        &self,
        version_id: i64,
    ) -> Result<BTreeSet<String>, StoreError> {
        self.get_version(version_id)?;
        program_names_in_version(&self.conn, version_id)
    }

    pub fn question_count_for_version(&self, version_id: i64) -> Result<i64, StoreError> {
        self.get_version(version_id)?;
        count_questions_in_version(&self.conn, version_id)
    }

    pub fn program_count_for_version(&self, version_id: i64) -> Result<i64, StoreError> {
        self.get_version(version_id)?;
        count_programs_in_version(&self.conn, version_id)
    }

    pub fn is_draft_program(&self, program_id: i64) -> Result<bool, StoreError> {
        match version_by_stage(&self.conn, LifecycleStage::Draft)? {
            Some(draft) => program_in_version(&self.conn, draft.id, program_id),
            None => Ok(false),
        }
    }

    pub fn is_active_program(&self, program_id: i64) -> Result<bool, StoreError> {
        match version_by_stage(&self.conn, LifecycleStage::Active)? {
            Some(active) => program_in_version(&self.conn, active.id, program_id),
            None => Ok(false),
        }
    }

    /// Resolves a question revision id to the newest revision of the same
    /// logical name, draft-preferred.
    pub fn latest_revision_of_question(
        &self,
        question_id: i64,
    ) -> Result<Option<QuestionRow>, StoreError> {
        let Some(row) = question_by_id(&self.conn, question_id)? else {
            return Err(StoreError::UnknownQuestion { question_id });
        };
        latest_revision_by_name(&self.conn, &row.definition.name)
    }

    pub fn tombstoned_question_names(
        &self,
        version_id: i64,
    ) -> Result<BTreeSet<String>, StoreError> {
        self.get_version(version_id)?;
        tombstoned_names(&self.conn, version_id, KIND_QUESTION)
    }

    pub fn tombstoned_program_names(
        &self,
        version_id: i64,
    ) -> Result<BTreeSet<String>, StoreError> {
        self.get_version(version_id)?;
        tombstoned_names(&self.conn, version_id, KIND_PROGRAM)
    }

    /// Marks a question name for deletion in the current draft, creating the
    /// draft when necessary. Returns false when the tombstone already existed.
    pub fn add_tombstone_for_question(&mut self, name: &str) -> Result<bool, StoreError> {
        run_serializable(&mut self.conn, "tombstone.question_add", |tx| {
            if latest_revision_by_name(tx, name)?.is_none() {
                return Err(StoreError::UnknownQuestionName {
                    name: name.to_string(),
                });
            }
            let draft = draft_version_or_create_tx(tx)?;
            add_tombstone_tx(tx, draft.id, KIND_QUESTION, name)
        })
    }

    pub fn add_tombstone_for_program(&mut self, admin_name: &str) -> Result<bool, StoreError> {
        run_serializable(&mut self.conn, "tombstone.program_add", |tx| {
            let mut known = false;
            for stage in [LifecycleStage::Draft, LifecycleStage::Active] {
                if let Some(version) = version_by_stage(tx, stage)? {
                    if program_by_name_in_version(tx, version.id, admin_name)?.is_some() {
                        known = true;
                        break;
                    }
                }
            }
            if !known {
                return Err(StoreError::UnknownProgramName {
                    admin_name: admin_name.to_string(),
                });
            }
            let draft = draft_version_or_create_tx(tx)?;
            add_tombstone_tx(tx, draft.id, KIND_PROGRAM, admin_name)
        })
    }

    /// Clears a pending question deletion. Returns false when no draft exists
    /// or no such tombstone was recorded.
    pub fn remove_tombstone_for_question(&mut self, name: &str) -> Result<bool, StoreError> {
        if version_by_stage(&self.conn, LifecycleStage::Draft)?.is_none() {
            return Ok(false);
        }

        run_serializable(&mut self.conn, "tombstone.question_remove", |tx| {
            let Some(draft) = version_by_stage(tx, LifecycleStage::Draft)? else {
                return Ok(false);
            };
            remove_tombstone_tx(tx, draft.id, KIND_QUESTION, name)
        })
    }

    pub fn remove_tombstone_for_program(&mut self, admin_name: &str) -> Result<bool, StoreError> {
        if version_by_stage(&self.conn, LifecycleStage::Draft)?.is_none() {
            return Ok(false);
        }

        run_serializable(&mut self.conn, "tombstone.program_remove", |tx| {
            let Some(draft) = version_by_stage(tx, LifecycleStage::Draft)? else {
                return Ok(false);
            };
            remove_tombstone_tx(tx, draft.id, KIND_PROGRAM, admin_name)
        })
    }

    /// Rewrites every question reference in one draft program to the latest
    /// revision of its logical name. The program must be a member of the
    /// current draft and must not be the active revision.
    pub fn update_question_versions(&mut self, program_id: i64) -> Result<ProgramRow, StoreError> {
        run_serializable(&mut self.conn, "program.sync_references", |tx| {
            let Some(program) = program_by_id(tx, program_id)? else {
                return Err(StoreError::UnknownProgram { program_id });
            };
            let Some(draft) = version_by_stage(tx, LifecycleStage::Draft)? else {
                return Err(StoreError::NotADraftProgram { program_id });
            };
            if !program_in_version(tx, draft.id, program_id)? {
                return Err(StoreError::NotADraftProgram { program_id });
            }
            if let Some(active) = version_by_stage(tx, LifecycleStage::Active)? {
                if program_in_version(tx, active.id, program_id)? {
                    return Err(StoreError::NotADraftProgram { program_id });
                }
            }

            update_question_versions_tx(tx, &program)
        })
    }

    /// Propagates a question edit to every program still pointing at an older
    /// revision: draft programs are rewritten in place, active ones gain a
    /// draft counterpart first.
    pub fn update_programs_that_reference_question(
        &mut self,
        question_id: i64,
    ) -> Result<(), StoreError> {
        run_serializable(&mut self.conn, "program.cascade_question", |tx| {
            if question_by_id(tx, question_id)?.is_none() {
                return Err(StoreError::UnknownQuestion { question_id });
            }
            update_programs_that_reference_question_tx(tx, question_id)
        })
    }
}

pub(super) fn update_question_versions_tx(
    tx: &Transaction<'_>,
    program: &ProgramRow,
) -> Result<ProgramRow, StoreError> {
    let mut definition = program.definition.clone();
    for block in &mut definition.blocks {
        for reference in &mut block.questions {
            reference.question_id =
                latest_revision_for_reference(tx, reference.question_id, program.id)?;
        }
        if let Some(predicate) = block.visibility.take() {
            block.visibility = Some(predicate.map_question_ids(&mut |question_id| {
                latest_revision_for_reference(tx, question_id, program.id)
            })?);
        }
        if let Some(predicate) = block.eligibility.take() {
            block.eligibility = Some(predicate.map_question_ids(&mut |question_id| {
                latest_revision_for_reference(tx, question_id, program.id)
            })?);
        }
        tracing::trace!(
            program_id = program.id,
            block_id = block.id,
            "synced block question references"
        );
    }

    let updated_at_ms = update_program_row_tx(tx, program.id, &definition)?;
    Ok(ProgramRow {
        id: program.id,
        definition,
        created_at_ms: program.created_at_ms,
        updated_at_ms,
    })
}

pub(super) fn update_programs_that_reference_question_tx(
    tx: &Transaction<'_>,
    question_id: i64,
) -> Result<(), StoreError> {
    let draft = draft_version_or_create_tx(tx)?;

    for program in programs_in_version(tx, draft.id)? {
        if program.definition.references_question(question_id) {
            update_question_versions_tx(tx, &program)?;
        }
    }

    let Some(active) = version_by_stage(tx, LifecycleStage::Active)? else {
        return Ok(());
    };
    for program in programs_in_version(tx, active.id)? {
        if !program.definition.references_question(question_id) {
            continue;
        }
        if program_by_name_in_version(tx, draft.id, &program.definition.admin_name)?.is_some() {
            continue;
        }
        tracing::debug!(
            program_id = program.id,
            admin_name = %program.definition.admin_name,
            "drafting active program to follow a question edit"
        );
        upsert_program_draft_tx(tx, &draft, Some(program.id), &program.definition)?;
    }

    Ok(())
}
