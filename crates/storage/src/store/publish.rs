#![forbid(unsafe_code)]

use super::*;
use super::retry::run_serializable;
use intake_core::ids::validate_admin_name;

impl SqliteStore {
    /// Publishes the current draft: carries forward everything untouched from
    /// the active version, drops tombstoned names, then flips the stages.
    /// Returns the new active version.
    pub fn publish_new_synchronized_version(&mut self) -> Result<VersionRow, StoreError> {
        run_serializable(&mut self.conn, "version.publish", |tx| publish_all_tx(tx))
    }

    /// Dry-run of `publish_new_synchronized_version`: the program and
    /// question name sets the active version would end up with, computed
    /// without mutating anything.
    pub fn preview_publish(&mut self) -> Result<PublishPreview, StoreError> {
        let tx = self.conn.transaction()?;
        let Some(draft) = version_by_stage(&tx, LifecycleStage::Draft)? else {
            return Err(StoreError::NoDraftVersion);
        };
        let active =
            version_by_stage(&tx, LifecycleStage::Active)?.ok_or(StoreError::NoActiveVersion)?;
        let plan = carry_forward_plan(&tx, &draft, &active)?;
        tx.commit()?;

        Ok(PublishPreview {
            draft_version_id: draft.id,
            program_names: plan.program_names,
            question_names: plan.question_names,
        })
    }

    /// Publishes a single draft program together with the draft questions it
    /// references. Every other in-flight draft entity moves to a freshly
    /// created draft version.
    pub fn publish_program(&mut self, admin_name: &str) -> Result<VersionRow, StoreError> {
        validate_admin_name(admin_name).map_err(|err| StoreError::InvalidInput(err.message()))?;

        run_serializable(&mut self.conn, "version.publish_program", |tx| {
            publish_program_tx(tx, admin_name)
        })
    }

    /// Makes an obsolete version live again. The current active version goes
    /// obsolete and any draft is discarded.
    pub fn set_live_version(&mut self, version_id: i64) -> Result<(), StoreError> {
        run_serializable(&mut self.conn, "version.rollback", |tx| {
            let Some(target) = version_by_id(tx, version_id)? else {
                return Err(StoreError::UnknownVersion { version_id });
            };
            if target.stage != LifecycleStage::Obsolete {
                return Err(StoreError::InvalidRollbackTarget {
                    version_id,
                    stage: target.stage,
                });
            }

            let now_ms = now_ms();
            if let Some(draft) = version_by_stage(tx, LifecycleStage::Draft)? {
                set_stage_tx(tx, draft.id, LifecycleStage::Deleted, now_ms)?;
            }
            let active = version_by_stage(tx, LifecycleStage::Active)?
                .ok_or(StoreError::NoActiveVersion)?;
            set_stage_tx(tx, active.id, LifecycleStage::Obsolete, now_ms)?;
            set_stage_tx(tx, version_id, LifecycleStage::Active, now_ms)?;

            tracing::debug!(
                version_id,
                previous_active = active.id,
                "rolled back live version"
            );
            Ok(())
        })
    }
}

struct CarryForwardPlan {
    carried_program_ids: Vec<i64>,
    carried_question_ids: Vec<i64>,
    dropped_program_names: BTreeSet<String>,
    dropped_question_names: BTreeSet<String>,
    program_names: BTreeSet<String>,
    question_names: BTreeSet<String>,
}

// The names the published version would hold, and the membership changes
// needed to get there: active revisions carry forward unless tombstoned or
// superseded by a draft revision of the same name.
fn carry_forward_plan(
    conn: &Connection,
    draft: &VersionRow,
    active: &VersionRow,
) -> Result<CarryForwardPlan, StoreError> {
    let draft_program_names = program_names_in_version(conn, draft.id)?;
    let draft_question_names = question_names_in_version(conn, draft.id)?;
    let dropped_program_names = tombstoned_names(conn, draft.id, KIND_PROGRAM)?;
    let dropped_question_names = tombstoned_names(conn, draft.id, KIND_QUESTION)?;

    let mut program_names: BTreeSet<String> = draft_program_names
        .difference(&dropped_program_names)
        .cloned()
        .collect();
    let mut carried_program_ids = Vec::new();
    for row in programs_in_version(conn, active.id)? {
        let name = &row.definition.admin_name;
        if dropped_program_names.contains(name) || draft_program_names.contains(name) {
            continue;
        }
        carried_program_ids.push(row.id);
        program_names.insert(name.clone());
    }

    let mut question_names: BTreeSet<String> = draft_question_names
        .difference(&dropped_question_names)
        .cloned()
        .collect();
    let mut carried_question_ids = Vec::new();
    for row in questions_in_version(conn, active.id)? {
        let name = &row.definition.name;
        if dropped_question_names.contains(name) || draft_question_names.contains(name) {
            continue;
        }
        carried_question_ids.push(row.id);
        question_names.insert(name.clone());
    }

    Ok(CarryForwardPlan {
        carried_program_ids,
        carried_question_ids,
        dropped_program_names,
        dropped_question_names,
        program_names,
        question_names,
    })
}

fn publish_all_tx(tx: &Transaction<'_>) -> Result<VersionRow, StoreError> {
    let Some(draft) = version_by_stage(tx, LifecycleStage::Draft)? else {
        return Err(StoreError::NoDraftVersion);
    };
    let active =
        version_by_stage(tx, LifecycleStage::Active)?.ok_or(StoreError::NoActiveVersion)?;

    let plan = carry_forward_plan(tx, &draft, &active)?;

    for program_id in &plan.carried_program_ids {
        add_program_membership_tx(tx, draft.id, *program_id)?;
    }
    for question_id in &plan.carried_question_ids {
        add_question_membership_tx(tx, draft.id, *question_id)?;
    }

    // A name both drafted and tombstoned within one cycle vanishes here.
    for name in &plan.dropped_program_names {
        remove_program_members_named_tx(tx, draft.id, name)?;
        remove_tombstone_tx(tx, draft.id, KIND_PROGRAM, name)?;
    }
    for name in &plan.dropped_question_names {
        remove_question_members_named_tx(tx, draft.id, name)?;
        remove_tombstone_tx(tx, draft.id, KIND_QUESTION, name)?;
    }

    if count_programs_in_version(tx, draft.id)? == 0 {
        return Err(StoreError::EmptyDraft);
    }

    let now_ms = now_ms();
    set_stage_tx(tx, active.id, LifecycleStage::Obsolete, now_ms)?;
    set_stage_tx(tx, draft.id, LifecycleStage::Active, now_ms)?;

    validate_version_consistency_tx(tx, draft.id)?;

    tracing::debug!(
        version_id = draft.id,
        programs = plan.program_names.len(),
        questions = plan.question_names.len(),
        "published new synchronized version"
    );

    version_by_id(tx, draft.id)?.ok_or(StoreError::UnknownVersion {
        version_id: draft.id,
    })
}

fn publish_program_tx(tx: &Transaction<'_>, admin_name: &str) -> Result<VersionRow, StoreError> {
    let Some(draft) = version_by_stage(tx, LifecycleStage::Draft)? else {
        return Err(StoreError::NoDraftVersion);
    };
    let active =
        version_by_stage(tx, LifecycleStage::Active)?.ok_or(StoreError::NoActiveVersion)?;

    let Some(program) = program_by_name_in_version(tx, draft.id, admin_name)? else {
        return Err(StoreError::ProgramNotInDraft {
            admin_name: admin_name.to_string(),
        });
    };

    let draft_questions = questions_in_version(tx, draft.id)?;
    let referenced = program.definition.question_ids();
    let mut publishing_question_ids = BTreeSet::new();
    let mut publishing_question_names = BTreeSet::new();
    for question in &draft_questions {
        if referenced.contains(&question.id) {
            publishing_question_ids.insert(question.id);
            publishing_question_names.insert(question.definition.name.clone());
        }
    }

    // Another draft program holding one of these questions would be left
    // pointing into the published version; refuse instead.
    let draft_programs = programs_in_version(tx, draft.id)?;
    for other in &draft_programs {
        if other.id == program.id {
            continue;
        }
        if !other
            .definition
            .question_ids()
            .is_disjoint(&publishing_question_ids)
        {
            return Err(StoreError::SharedDraftQuestions {
                admin_name: admin_name.to_string(),
            });
        }
    }

    let moved_program_ids: Vec<i64> = draft_programs
        .iter()
        .filter(|row| row.id != program.id)
        .map(|row| row.id)
        .collect();
    let moved_question_ids: Vec<i64> = draft_questions
        .iter()
        .filter(|row| !publishing_question_ids.contains(&row.id))
        .map(|row| row.id)
        .collect();

    let mut carried_program_ids = Vec::new();
    for row in programs_in_version(tx, active.id)? {
        if row.definition.admin_name != admin_name {
            carried_program_ids.push(row.id);
        }
    }
    let mut carried_question_ids = Vec::new();
    for row in questions_in_version(tx, active.id)? {
        if !publishing_question_names.contains(&row.definition.name) {
            carried_question_ids.push(row.id);
        }
    }

    let now_ms = now_ms();
    set_stage_tx(tx, active.id, LifecycleStage::Obsolete, now_ms)?;
    set_stage_tx(tx, draft.id, LifecycleStage::Active, now_ms)?;

    // The next draft can exist only once the old one has flipped; the partial
    // unique index allows one draft row at a time.
    let next_draft_id = insert_version_tx(tx, LifecycleStage::Draft, now_ms)?;

    for program_id in &moved_program_ids {
        remove_program_membership_tx(tx, draft.id, *program_id)?;
        add_program_membership_tx(tx, next_draft_id, *program_id)?;
    }
    for question_id in &moved_question_ids {
        remove_question_membership_tx(tx, draft.id, *question_id)?;
        add_question_membership_tx(tx, next_draft_id, *question_id)?;
    }

    for program_id in &carried_program_ids {
        add_program_membership_tx(tx, draft.id, *program_id)?;
    }
    for question_id in &carried_question_ids {
        add_question_membership_tx(tx, draft.id, *question_id)?;
    }

    validate_version_consistency_tx(tx, draft.id)?;

    tracing::debug!(
        version_id = draft.id,
        next_draft_id,
        admin_name = %admin_name,
        "published one program"
    );

    version_by_id(tx, draft.id)?.ok_or(StoreError::UnknownVersion {
        version_id: draft.id,
    })
}

// The published version must name each question once and every program
// reference must resolve inside it.
fn validate_version_consistency_tx(
    tx: &Transaction<'_>,
    version_id: i64,
) -> Result<(), StoreError> {
    let questions = questions_in_version(tx, version_id)?;
    let mut names = BTreeSet::new();
    let mut ids = BTreeSet::new();
    for question in &questions {
        ids.insert(question.id);
        if !names.insert(question.definition.name.clone()) {
            return Err(StoreError::DuplicateQuestionName {
                name: question.definition.name.clone(),
            });
        }
    }

    for program in programs_in_version(tx, version_id)? {
        for question_id in program.definition.question_ids() {
            if !ids.contains(&question_id) {
                return Err(StoreError::DanglingQuestionReference {
                    program_id: program.id,
                    question_id,
                });
            }
        }
    }

    Ok(())
}
