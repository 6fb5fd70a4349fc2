#![forbid(unsafe_code)]

use super::*;
use super::retry::run_serializable;
use super::versions::update_question_versions_tx;
use intake_core::ids::validate_admin_name;
use std::collections::BTreeMap;

impl SqliteStore {
    /// Writes one program into the current draft, creating the draft when
    /// necessary. `source_id` names the revision the caller edited, or None
    /// for a brand-new program. A name already drafted is edited in place and
    /// keeps its revision id.
    pub fn create_or_update_program_draft(
        &mut self,
        source_id: Option<i64>,
        definition: &ProgramDefinition,
    ) -> Result<ProgramRow, StoreError> {
        validate_admin_name(&definition.admin_name)
            .map_err(|err| StoreError::InvalidInput(err.message()))?;

        run_serializable(&mut self.conn, "program.draft_upsert", |tx| {
            let draft = draft_version_or_create_tx(tx)?;
            upsert_program_draft_tx(tx, &draft, source_id, definition)
        })
    }

    /// One entry per logical program name carrying its active and draft
    /// revisions, ordered by name.
    pub fn program_index(&self) -> Result<Vec<ProgramIndexEntry>, StoreError> {
        let mut entries: BTreeMap<String, ProgramIndexEntry> = BTreeMap::new();

        if let Some(active) = version_by_stage(&self.conn, LifecycleStage::Active)? {
            for row in programs_in_version(&self.conn, active.id)? {
                let admin_name = row.definition.admin_name.clone();
                entries
                    .entry(admin_name.clone())
                    .or_insert_with(|| ProgramIndexEntry {
                        admin_name,
                        active: None,
                        draft: None,
                    })
                    .active = Some(row);
            }
        }
        if let Some(draft) = version_by_stage(&self.conn, LifecycleStage::Draft)? {
            for row in programs_in_version(&self.conn, draft.id)? {
                let admin_name = row.definition.admin_name.clone();
                entries
                    .entry(admin_name.clone())
                    .or_insert_with(|| ProgramIndexEntry {
                        admin_name,
                        active: None,
                        draft: None,
                    })
                    .draft = Some(row);
            }
        }

        Ok(entries.into_values().collect())
    }
}

// A name already drafted is updated in place, keeping its id; otherwise a
// fresh revision is inserted, re-checked against the draft invariants, and
// has its question references synced before it is returned. The invariant
// checks classify as conflicts so a racing edit retries instead of failing.
pub(super) fn upsert_program_draft_tx(
    tx: &Transaction<'_>,
    draft: &VersionRow,
    source_id: Option<i64>,
    definition: &ProgramDefinition,
) -> Result<ProgramRow, StoreError> {
    if let Some(program_id) = source_id {
        if program_by_id(tx, program_id)?.is_none() {
            return Err(StoreError::UnknownProgram { program_id });
        }
    }

    if let Some(existing) = program_by_name_in_version(tx, draft.id, &definition.admin_name)? {
        if let Some(source) = source_id {
            if source != existing.id {
                tracing::warn!(
                    draft_id = existing.id,
                    source_id = source,
                    admin_name = %definition.admin_name,
                    "replacing draft program from a different source revision"
                );
            }
        }
        let updated_at_ms = update_program_row_tx(tx, existing.id, definition)?;
        return Ok(ProgramRow {
            id: existing.id,
            definition: definition.clone(),
            created_at_ms: existing.created_at_ms,
            updated_at_ms,
        });
    }

    let (id, now_ms) = insert_program_tx(tx, definition)?;
    add_program_membership_tx(tx, draft.id, id)?;

    if !program_in_version(tx, draft.id, id)? {
        return Err(StoreError::Conflict(
            "draft program is not visible in draft membership",
        ));
    }
    match version_by_id(tx, draft.id)? {
        Some(current) if current.stage == LifecycleStage::Draft => {}
        _ => {
            return Err(StoreError::Conflict("draft version changed stage mid-edit"));
        }
    }
    if count_programs_named(tx, draft.id, &definition.admin_name)? != 1 {
        return Err(StoreError::Conflict(
            "expected exactly one draft program for name",
        ));
    }

    let row = ProgramRow {
        id,
        definition: definition.clone(),
        created_at_ms: now_ms,
        updated_at_ms: now_ms,
    };
    update_question_versions_tx(tx, &row)
}
