#![forbid(unsafe_code)]

use super::*;
use super::retry::run_serializable;
use super::versions::update_programs_that_reference_question_tx;
use intake_core::ids::{derive_path_segment, validate_question_name};
use intake_core::question::QuestionTag;
use rusqlite::{OptionalExtension, params};
use std::collections::{BTreeMap, VecDeque};

impl SqliteStore {
    /// Writes one question into the current draft, creating the draft when
    /// necessary. A name already present in the draft is edited in place and
    /// keeps its revision id; otherwise a new revision is inserted and every
    /// dependent entity follows: repeated questions are re-keyed to the new
    /// enumerator revision (transitively) and programs pointing at superseded
    /// revisions are rewritten.
    pub fn create_or_update_question_draft(
        &mut self,
        definition: &QuestionDefinition,
    ) -> Result<QuestionRow, StoreError> {
        let definition = canonicalize_question(definition)?;

        run_serializable(&mut self.conn, "question.draft_upsert", |tx| {
            let draft = draft_version_or_create_tx(tx)?;
            let (row, replaced) = upsert_question_draft_tx(tx, draft.id, &definition)?;

            let mut touched = Vec::new();
            let mut worklist = VecDeque::new();
            if let Some(old_id) = replaced {
                touched.push(old_id);
                if row.definition.is_enumerator() {
                    worklist.push_back((old_id, row.id));
                }
            }

            // Each logical name gains at most one new revision per draft
            // cycle, so the worklist drains.
            while let Some((old_id, new_id)) = worklist.pop_front() {
                for child in questions_with_enumerator_tx(tx, old_id)? {
                    let mut child_definition = child.definition.clone();
                    child_definition.enumerator_id = Some(new_id);
                    let (child_row, child_replaced) =
                        upsert_question_draft_tx(tx, draft.id, &child_definition)?;
                    if let Some(child_old) = child_replaced {
                        touched.push(child_old);
                        if child_row.definition.is_enumerator() {
                            worklist.push_back((child_old, child_row.id));
                        }
                    }
                }
            }

            for old_id in &touched {
                update_programs_that_reference_question_tx(tx, *old_id)?;
            }

            Ok(row)
        })
    }

    /// Probes for an existing revision that would collide with `definition`:
    /// same name, or same (enumerator, path segment) pair. Returns the oldest
    /// colliding revision across all versions, or None.
    pub fn find_conflicting_question(
        &self,
        definition: &QuestionDefinition,
    ) -> Result<Option<QuestionRow>, StoreError> {
        let candidate = canonicalize_question(definition)?;

        let row = self
            .conn
            .query_row(
                "SELECT id, definition, created_at_ms, updated_at_ms FROM questions \
                 WHERE name=?1 OR (enumerator_id IS ?2 AND path_segment=?3) \
                 ORDER BY id ASC \
                 LIMIT 1",
                params![
                    candidate.name,
                    candidate.enumerator_id,
                    candidate.path_segment,
                ],
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
}

// Returns the written row plus the id of the revision it supersedes, when a
// new revision was inserted. In-place draft edits supersede nothing.
fn upsert_question_draft_tx(
    tx: &Transaction<'_>,
    draft_version_id: i64,
    definition: &QuestionDefinition,
) -> Result<(QuestionRow, Option<i64>), StoreError> {
    if let Some(enumerator_id) = definition.enumerator_id {
        if question_by_id(tx, enumerator_id)?.is_none() {
            return Err(StoreError::UnknownQuestion {
                question_id: enumerator_id,
            });
        }
    }

    if let Some(existing) = question_by_name_in_version(tx, draft_version_id, &definition.name)? {
        let mut next = definition.clone();
        next.tags = merge_tags(Some(&existing.definition.tags), definition);
        let updated_at_ms = update_question_row_tx(tx, existing.id, &next)?;
        return Ok((
            QuestionRow {
                id: existing.id,
                definition: next,
                created_at_ms: existing.created_at_ms,
                updated_at_ms,
            },
            None,
        ));
    }

    let tag_prior = newest_question_named(tx, &definition.name)?;
    let cascade_prior = latest_revision_by_name(tx, &definition.name)?;

    let mut next = definition.clone();
    next.tags = merge_tags(tag_prior.as_ref().map(|row| &row.definition.tags), definition);

    let (id, now_ms) = insert_question_tx(tx, &next)?;
    add_question_membership_tx(tx, draft_version_id, id)?;

    Ok((
        QuestionRow {
            id,
            definition: next,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        },
        cascade_prior.map(|row| row.id),
    ))
}

// Export tags follow the stored revision of the name; the universal tag
// follows the incoming definition. A name with no prior revision takes the
// definition's tags as given.
fn merge_tags(
    prior: Option<&BTreeSet<QuestionTag>>,
    definition: &QuestionDefinition,
) -> BTreeSet<QuestionTag> {
    let Some(prior) = prior else {
        return definition.tags.clone();
    };

    let mut merged: BTreeSet<QuestionTag> =
        prior.iter().copied().filter(|tag| tag.is_export()).collect();
    merged.extend(
        definition
            .tags
            .iter()
            .copied()
            .filter(|tag| !tag.is_export()),
    );
    merged
}

// Children of an enumerator revision, resolved per logical name with the
// draft revision taking precedence over the active one.
fn questions_with_enumerator_tx(
    tx: &Transaction<'_>,
    enumerator_id: i64,
) -> Result<Vec<QuestionRow>, StoreError> {
    let mut by_name: BTreeMap<String, QuestionRow> = BTreeMap::new();
    if let Some(active) = version_by_stage(tx, LifecycleStage::Active)? {
        for row in questions_in_version(tx, active.id)? {
            by_name.insert(row.definition.name.clone(), row);
        }
    }
    if let Some(draft) = version_by_stage(tx, LifecycleStage::Draft)? {
        for row in questions_in_version(tx, draft.id)? {
            by_name.insert(row.definition.name.clone(), row);
        }
    }

    Ok(by_name
        .into_values()
        .filter(|row| row.definition.enumerator_id == Some(enumerator_id))
        .collect())
}

fn canonicalize_question(definition: &QuestionDefinition) -> Result<QuestionDefinition, StoreError> {
    validate_question_name(&definition.name)
        .map_err(|err| StoreError::InvalidInput(err.message()))?;

    let mut canonical = definition.clone();
    if canonical.path_segment.is_empty() {
        canonical.path_segment = derive_path_segment(&canonical.name);
    }
    if canonical.path_segment.is_empty() {
        return Err(StoreError::InvalidInput(
            "question name yields an empty path segment",
        ));
    }
    Ok(canonical)
}
