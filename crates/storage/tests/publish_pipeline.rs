#![forbid(unsafe_code)]

use intake_core::lifecycle::LifecycleStage;
use intake_core::program::{BlockDefinition, ProgramDefinition, QuestionReference};
use intake_core::question::{QuestionDefinition, QuestionType};
use intake_storage::{SqliteStore, StoreError};
use rusqlite::{Connection, params};
use std::collections::BTreeSet;
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("intake_publish_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn text_question(name: &str) -> QuestionDefinition {
    QuestionDefinition {
        name: name.to_string(),
        path_segment: String::new(),
        enumerator_id: None,
        description: String::new(),
        question_type: QuestionType::Text,
        question_text: format!("{name}?"),
        help_text: String::new(),
        options: Vec::new(),
        tags: BTreeSet::new(),
        validation: None,
    }
}

fn one_block_program(admin_name: &str, question_ids: &[i64]) -> ProgramDefinition {
    ProgramDefinition {
        admin_name: admin_name.to_string(),
        admin_description: String::new(),
        display_name: admin_name.replace('-', " "),
        blocks: vec![BlockDefinition {
            id: 1,
            name: "Screen 1".to_string(),
            description: String::new(),
            visibility: None,
            eligibility: None,
            questions: question_ids
                .iter()
                .map(|id| QuestionReference {
                    question_id: *id,
                    optional: false,
                })
                .collect(),
        }],
    }
}

#[test]
fn carry_forward_keeps_untouched_revision_ids() {
    let dir = temp_dir("carry_forward_keeps_untouched_revision_ids");
    let mut store = SqliteStore::open(&dir).expect("open store");

    let edited_q = store
        .create_or_update_question_draft(&text_question("income"))
        .expect("income question");
    let steady_q = store
        .create_or_update_question_draft(&text_question("zip code"))
        .expect("zip question");
    store
        .create_or_update_program_draft(None, &one_block_program("cash", &[edited_q.id]))
        .expect("cash program");
    store
        .create_or_update_program_draft(None, &one_block_program("housing", &[steady_q.id]))
        .expect("housing program");
    let first = store.publish_new_synchronized_version().expect("publish 1");

    let mut revised = text_question("income");
    revised.question_text = "What was your income last month?".to_string();
    let new_income = store
        .create_or_update_question_draft(&revised)
        .expect("income edit");
    let second = store.publish_new_synchronized_version().expect("publish 2");

    // The edited name moved to a new revision, everything untouched kept its
    // row.
    assert_eq!(
        store
            .question_by_name_for_version(second.id, "income")
            .expect("income lookup")
            .expect("income present")
            .id,
        new_income.id
    );
    assert_eq!(
        store
            .question_by_name_for_version(second.id, "zip code")
            .expect("zip lookup")
            .expect("zip present")
            .id,
        steady_q.id
    );
    let housing = store
        .program_by_name_for_version(second.id, "housing")
        .expect("housing lookup")
        .expect("housing present");
    assert_eq!(
        housing.id,
        store
            .program_by_name_for_version(first.id, "housing")
            .expect("old housing lookup")
            .expect("old housing present")
            .id
    );
    let cash = store
        .program_by_name_for_version(second.id, "cash")
        .expect("cash lookup")
        .expect("cash present");
    assert!(cash.definition.references_question(new_income.id));
}

#[test]
fn tombstoned_names_vanish_at_publish() {
    let dir = temp_dir("tombstoned_names_vanish_at_publish");
    let mut store = SqliteStore::open(&dir).expect("open store");

    let keep_q = store
        .create_or_update_question_draft(&text_question("income"))
        .expect("income question");
    let drop_q = store
        .create_or_update_question_draft(&text_question("assets"))
        .expect("assets question");
    store
        .create_or_update_program_draft(None, &one_block_program("keep", &[keep_q.id]))
        .expect("keep program");
    store
        .create_or_update_program_draft(None, &one_block_program("drop", &[drop_q.id]))
        .expect("drop program");
    let first = store.publish_new_synchronized_version().expect("publish 1");

    assert!(
        store
            .add_tombstone_for_program("drop")
            .expect("tombstone program")
    );
    assert!(
        store
            .add_tombstone_for_question("assets")
            .expect("tombstone question")
    );
    let draft = store
        .get_draft_version()
        .expect("draft lookup")
        .expect("tombstoning opens the draft");
    assert_eq!(
        store
            .tombstoned_program_names(draft.id)
            .expect("program tombstones"),
        BTreeSet::from(["drop".to_string()])
    );

    let second = store.publish_new_synchronized_version().expect("publish 2");
    assert_eq!(second.id, draft.id);
    assert!(
        store
            .program_by_name_for_version(second.id, "drop")
            .expect("drop lookup")
            .is_none()
    );
    assert!(
        store
            .question_by_name_for_version(second.id, "assets")
            .expect("assets lookup")
            .is_none()
    );
    assert!(
        store
            .program_by_name_for_version(second.id, "keep")
            .expect("keep lookup")
            .is_some()
    );
    // Tombstones are consumed by the publish.
    assert!(
        store
            .tombstoned_program_names(second.id)
            .expect("program tombstones")
            .is_empty()
    );
    assert!(
        store
            .tombstoned_question_names(second.id)
            .expect("question tombstones")
            .is_empty()
    );
    // The obsolete version still carries the full history.
    assert!(
        store
            .program_by_name_for_version(first.id, "drop")
            .expect("obsolete drop lookup")
            .is_some()
    );
    assert_eq!(
        store.get_version(first.id).expect("first row").stage,
        LifecycleStage::Obsolete
    );

    // A name created and tombstoned within one cycle never ships.
    let fleeting_q = store
        .create_or_update_question_draft(&text_question("scratch"))
        .expect("scratch question");
    store
        .create_or_update_program_draft(None, &one_block_program("fleeting", &[fleeting_q.id]))
        .expect("fleeting program");
    assert!(
        store
            .add_tombstone_for_program("fleeting")
            .expect("tombstone fleeting")
    );
    assert!(
        store
            .add_tombstone_for_question("scratch")
            .expect("tombstone scratch")
    );
    let third = store.publish_new_synchronized_version().expect("publish 3");
    assert!(
        store
            .program_by_name_for_version(third.id, "fleeting")
            .expect("fleeting lookup")
            .is_none()
    );
    assert!(
        store
            .question_by_name_for_version(third.id, "scratch")
            .expect("scratch lookup")
            .is_none()
    );
}

#[test]
fn tombstone_bookkeeping_edges() {
    let dir = temp_dir("tombstone_bookkeeping_edges");
    let mut store = SqliteStore::open(&dir).expect("open store");

    match store.add_tombstone_for_question("nope") {
        Err(StoreError::UnknownQuestionName { name }) => assert_eq!(name, "nope"),
        other => panic!("expected UnknownQuestionName, got {other:?}"),
    }
    match store.add_tombstone_for_program("nada") {
        Err(StoreError::UnknownProgramName { admin_name }) => assert_eq!(admin_name, "nada"),
        other => panic!("expected UnknownProgramName, got {other:?}"),
    }
    assert!(
        !store
            .remove_tombstone_for_question("income")
            .expect("remove without draft"),
        "removing with no draft is a no-op"
    );

    store
        .create_or_update_question_draft(&text_question("income"))
        .expect("draft question");
    assert!(store.add_tombstone_for_question("income").expect("add"));
    assert!(
        !store
            .add_tombstone_for_question("income")
            .expect("second add"),
        "the tombstone already existed"
    );
    let draft = store
        .get_draft_version()
        .expect("draft lookup")
        .expect("draft must exist");
    assert_eq!(
        store
            .tombstoned_question_names(draft.id)
            .expect("tombstone names"),
        BTreeSet::from(["income".to_string()])
    );
    assert!(store.remove_tombstone_for_question("income").expect("remove"));
    assert!(
        !store
            .remove_tombstone_for_question("income")
            .expect("second remove")
    );
    assert!(
        store
            .tombstoned_question_names(draft.id)
            .expect("tombstone names")
            .is_empty()
    );
}

#[test]
fn preview_reports_the_publish_without_mutating() {
    let dir = temp_dir("preview_reports_the_publish_without_mutating");
    let mut store = SqliteStore::open(&dir).expect("open store");

    match store.preview_publish() {
        Err(StoreError::NoDraftVersion) => {}
        other => panic!("expected NoDraftVersion, got {other:?}"),
    }

    let keep_q = store
        .create_or_update_question_draft(&text_question("income"))
        .expect("income question");
    store
        .create_or_update_program_draft(None, &one_block_program("cash", &[keep_q.id]))
        .expect("cash program");
    store.publish_new_synchronized_version().expect("publish 1");

    store
        .create_or_update_question_draft(&text_question("assets"))
        .expect("assets question");
    store
        .add_tombstone_for_program("cash")
        .expect("tombstone cash");

    let preview = store.preview_publish().expect("preview");
    let draft = store
        .get_draft_version()
        .expect("draft lookup")
        .expect("preview must not consume the draft");
    assert_eq!(preview.draft_version_id, draft.id);
    assert!(preview.program_names.is_empty(), "cash is tombstoned");
    assert_eq!(
        preview.question_names,
        BTreeSet::from(["assets".to_string(), "income".to_string()])
    );

    // The preview is only a report: with every program tombstoned the real
    // publish still refuses.
    match store.publish_new_synchronized_version() {
        Err(StoreError::EmptyDraft) => {}
        other => panic!("expected EmptyDraft, got {other:?}"),
    }

    store
        .remove_tombstone_for_program("cash")
        .expect("undo tombstone");
    let preview = store.preview_publish().expect("second preview");
    assert_eq!(
        preview.program_names,
        BTreeSet::from(["cash".to_string()])
    );
    let published = store.publish_new_synchronized_version().expect("publish 2");
    assert_eq!(published.id, preview.draft_version_id);
    assert_eq!(
        store
            .program_names_for_version(published.id)
            .expect("program names"),
        preview.program_names
    );
    assert_eq!(
        store
            .question_names_for_version(published.id)
            .expect("question names"),
        preview.question_names
    );
}

#[test]
fn publish_program_moves_the_rest_of_the_draft_forward() {
    let dir = temp_dir("publish_program_moves_the_rest_of_the_draft_forward");
    let mut store = SqliteStore::open(&dir).expect("open store");

    let alpha_q = store
        .create_or_update_question_draft(&text_question("alpha question"))
        .expect("alpha question");
    let beta_q = store
        .create_or_update_question_draft(&text_question("beta question"))
        .expect("beta question");
    store
        .create_or_update_program_draft(None, &one_block_program("one", &[alpha_q.id]))
        .expect("program one");
    store
        .create_or_update_program_draft(None, &one_block_program("two", &[beta_q.id]))
        .expect("program two");
    let first = store.publish_new_synchronized_version().expect("publish all");
    let active_two = store
        .program_by_name_for_version(first.id, "two")
        .expect("two lookup")
        .expect("two active");

    // Draft work: edit alpha (drafting program one with it), edit program
    // two, add an unreferenced question.
    let mut revised = text_question("alpha question");
    revised.question_text = "What is your alpha?".to_string();
    let new_alpha = store
        .create_or_update_question_draft(&revised)
        .expect("alpha edit");
    let active_beta = store
        .question_by_name_for_version(first.id, "beta question")
        .expect("beta lookup")
        .expect("beta active");
    let draft_two = store
        .create_or_update_program_draft(
            Some(active_two.id),
            &one_block_program("two", &[active_beta.id]),
        )
        .expect("two edit");
    let gamma_q = store
        .create_or_update_question_draft(&text_question("gamma question"))
        .expect("gamma question");

    let published = store.publish_program("one").expect("publish one");
    assert_eq!(published.stage, LifecycleStage::Active);
    assert_eq!(
        store.get_version(first.id).expect("first row").stage,
        LifecycleStage::Obsolete
    );

    // The published surface: program one's new revision, its question, and
    // everything carried from the old active.
    let published_one = store
        .program_by_name_for_version(published.id, "one")
        .expect("one lookup")
        .expect("one published");
    assert!(published_one.definition.references_question(new_alpha.id));
    assert_eq!(
        store
            .program_by_name_for_version(published.id, "two")
            .expect("two lookup")
            .expect("two carried")
            .id,
        active_two.id,
        "the draft edit of two must not ship"
    );
    assert_eq!(
        store
            .question_by_name_for_version(published.id, "alpha question")
            .expect("alpha lookup")
            .expect("alpha published")
            .id,
        new_alpha.id
    );
    assert_eq!(
        store
            .question_by_name_for_version(published.id, "beta question")
            .expect("beta lookup")
            .expect("beta carried")
            .id,
        active_beta.id
    );
    assert!(
        store
            .question_by_name_for_version(published.id, "gamma question")
            .expect("gamma lookup")
            .is_none(),
        "unreferenced draft work must not ship"
    );

    // The remainder moved onto a fresh draft with row ids intact.
    let next_draft = store
        .get_draft_version()
        .expect("draft lookup")
        .expect("a fresh draft holds the rest");
    assert_ne!(next_draft.id, published.id);
    assert_eq!(
        store
            .program_by_name_for_version(next_draft.id, "two")
            .expect("draft two lookup")
            .expect("two still drafted")
            .id,
        draft_two.id
    );
    assert_eq!(
        store
            .question_by_name_for_version(next_draft.id, "gamma question")
            .expect("draft gamma lookup")
            .expect("gamma still drafted")
            .id,
        gamma_q.id
    );
    assert_eq!(
        store
            .program_count_for_version(next_draft.id)
            .expect("draft program count"),
        1
    );
}

#[test]
fn publish_program_guards_shared_draft_questions() {
    let dir = temp_dir("publish_program_guards_shared_draft_questions");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let seeded = store.get_active_version().expect("seeded active");

    match store.publish_program("one") {
        Err(StoreError::NoDraftVersion) => {}
        other => panic!("expected NoDraftVersion, got {other:?}"),
    }

    let shared_q = store
        .create_or_update_question_draft(&text_question("shared question"))
        .expect("shared question");
    store
        .create_or_update_program_draft(None, &one_block_program("p-one", &[shared_q.id]))
        .expect("program one");
    store
        .create_or_update_program_draft(None, &one_block_program("p-two", &[shared_q.id]))
        .expect("program two");

    match store.publish_program("ghost") {
        Err(StoreError::ProgramNotInDraft { admin_name }) => assert_eq!(admin_name, "ghost"),
        other => panic!("expected ProgramNotInDraft, got {other:?}"),
    }
    match store.publish_program("p-one") {
        Err(StoreError::SharedDraftQuestions { admin_name }) => {
            assert_eq!(admin_name, "p-one");
        }
        other => panic!("expected SharedDraftQuestions, got {other:?}"),
    }

    // Nothing moved.
    let draft = store
        .get_draft_version()
        .expect("draft lookup")
        .expect("draft must survive the refusal");
    assert_eq!(
        store
            .program_count_for_version(draft.id)
            .expect("program count"),
        2
    );
    assert_eq!(store.get_active_version().expect("active").id, seeded.id);
}

#[test]
fn publish_rejects_duplicate_question_names() {
    let dir = temp_dir("publish_rejects_duplicate_question_names");
    let mut store = SqliteStore::open(&dir).expect("open store");

    let question = store
        .create_or_update_question_draft(&text_question("income"))
        .expect("draft question");
    store
        .create_or_update_program_draft(None, &one_block_program("cash", &[question.id]))
        .expect("draft program");
    let draft = store
        .get_draft_version()
        .expect("draft lookup")
        .expect("draft must exist");
    let active = store.get_active_version().expect("active version");
    drop(store);

    // Plant a second revision of the same name inside the same version.
    let mut dup = text_question("income");
    dup.path_segment = "income_dup".to_string();
    let payload = serde_json::to_string(&dup).expect("serialize definition");
    let conn = Connection::open(dir.join("intake.db")).expect("open raw db");
    conn.execute(
        "INSERT INTO questions(name, path_segment, enumerator_id, definition, created_at_ms, updated_at_ms) \
         VALUES (?1, ?2, NULL, ?3, 0, 0)",
        params!["income", "income_dup", payload],
    )
    .expect("insert duplicate revision");
    let dup_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO versions_questions(version_id, question_id) VALUES (?1, ?2)",
        params![draft.id, dup_id],
    )
    .expect("insert duplicate membership");
    drop(conn);

    let mut store = SqliteStore::open(&dir).expect("reopen store");
    match store.publish_new_synchronized_version() {
        Err(StoreError::DuplicateQuestionName { name }) => assert_eq!(name, "income"),
        other => panic!("expected DuplicateQuestionName, got {other:?}"),
    }

    // The failed publish rolled back completely.
    assert_eq!(store.get_active_version().expect("active").id, active.id);
    assert_eq!(
        store
            .get_draft_version()
            .expect("draft lookup")
            .expect("draft intact")
            .id,
        draft.id
    );
}

#[test]
fn publish_rejects_dangling_question_references() {
    let dir = temp_dir("publish_rejects_dangling_question_references");
    let mut store = SqliteStore::open(&dir).expect("open store");

    let question = store
        .create_or_update_question_draft(&text_question("address"))
        .expect("draft question");
    let program = store
        .create_or_update_program_draft(None, &one_block_program("mailer", &[question.id]))
        .expect("draft program");
    let active = store.get_active_version().expect("active version");
    drop(store);

    let broken = one_block_program("mailer", &[999_999]);
    let payload = serde_json::to_string(&broken).expect("serialize definition");
    let conn = Connection::open(dir.join("intake.db")).expect("open raw db");
    conn.execute(
        "UPDATE programs SET definition=?1 WHERE id=?2",
        params![payload, program.id],
    )
    .expect("break the reference");
    drop(conn);

    let mut store = SqliteStore::open(&dir).expect("reopen store");
    match store.publish_new_synchronized_version() {
        Err(StoreError::DanglingQuestionReference {
            program_id,
            question_id,
        }) => {
            assert_eq!(program_id, program.id);
            assert_eq!(question_id, 999_999);
        }
        other => panic!("expected DanglingQuestionReference, got {other:?}"),
    }
    assert_eq!(store.get_active_version().expect("active").id, active.id);
    assert!(
        store.get_draft_version().expect("draft lookup").is_some(),
        "the flip must roll back"
    );
}
