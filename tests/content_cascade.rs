/// Integration tests for administrative content mutations:
/// referential checks, cascading deletes and step renumbering.
mod common;

use opstrainer::trainer::{
    AnswerDraft, CategoryDraft, Completion, LevelDraft, LevelPatch, ScenarioDraft, ScenarioPatch,
    StepDraft, TrainerError,
};
use opstrainer::validation::ValidationError;

#[test]
fn test_delete_scenario_removes_steps_answers_and_results() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let (scenario, answers) = common::scenario_with_steps(
        &store,
        ScenarioDraft::new(basic.id, "Doomed"),
        vec![
            vec![AnswerDraft::new("One", 5, 0).correct()],
            vec![AnswerDraft::new("Two", 5, 0).correct()],
        ],
    );
    let keeper = common::simple_scenario(&store, basic.id, "Keeper");
    let engine = common::engine(&store);
    let doomed_result = engine
        .complete(
            "lena",
            scenario.id,
            Completion {
                score: 10,
                max_score: 10,
                ..Completion::default()
            },
        )
        .unwrap();
    let kept_result = engine
        .complete(
            "lena",
            keeper.id,
            Completion {
                score: 5,
                max_score: 10,
                ..Completion::default()
            },
        )
        .unwrap();
    let step_ids: Vec<u64> = store
        .scenario_steps(scenario.id)
        .unwrap()
        .iter()
        .map(|s| s.id)
        .collect();

    store.delete_scenario(scenario.id).unwrap();

    assert!(matches!(store.get_scenario(scenario.id), Err(TrainerError::NotFound(_))));
    for step_id in step_ids {
        assert!(matches!(store.get_step(step_id), Err(TrainerError::NotFound(_))));
    }
    for answer in answers.iter().flatten() {
        assert!(matches!(store.get_answer(answer.id), Err(TrainerError::NotFound(_))));
    }
    assert!(matches!(
        store.get_result(doomed_result.result_id),
        Err(TrainerError::NotFound(_))
    ));
    let remaining = store.results_for_user("lena").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, kept_result.result_id);
    assert_eq!(store.level_scenarios(basic.id).unwrap().len(), 1);
}

#[test]
fn test_level_constraints() {
    let (_tmp, store) = common::empty_store();
    let (basic, medium) = common::two_levels(&store);

    assert!(matches!(
        store.create_level(LevelDraft::new("Basic again", "basic")),
        Err(TrainerError::ConstraintViolation(_))
    ));
    assert!(matches!(
        store.create_level(LevelDraft::new("Expert", "expert").requires("master", 90)),
        Err(TrainerError::ConstraintViolation(_))
    ));
    assert!(matches!(
        store.create_level(LevelDraft::new("Bad code", "Has Spaces")),
        Err(TrainerError::Validation(_))
    ));

    // basic is required by medium
    assert!(matches!(
        store.delete_level(basic.id),
        Err(TrainerError::ConstraintViolation(_))
    ));

    let scenario = common::simple_scenario(&store, medium.id, "Owned");
    assert!(matches!(
        store.delete_level(medium.id),
        Err(TrainerError::ConstraintViolation(_))
    ));
    store.delete_scenario(scenario.id).unwrap();
    store.delete_level(medium.id).unwrap();
    store.delete_level(basic.id).unwrap();
    assert!(store.list_levels().unwrap().is_empty());
    assert!(store.find_level_by_code("basic").unwrap().is_none());
}

#[test]
fn test_level_update_rejects_empty_patch() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);

    assert!(matches!(
        store.update_level(basic.id, LevelPatch::default()),
        Err(TrainerError::Validation(ValidationError::NoChanges))
    ));
    let renamed = store
        .update_level(
            basic.id,
            LevelPatch {
                name: Some("Foundations".to_string()),
                ..LevelPatch::default()
            },
        )
        .unwrap();
    assert_eq!(renamed.name, "Foundations");
    assert_eq!(renamed.code, "basic");
}

#[test]
fn test_scenario_references_are_checked() {
    let (_tmp, store) = common::empty_store();
    let (basic, medium) = common::two_levels(&store);

    assert!(matches!(
        store.create_scenario(ScenarioDraft::new(9_999, "Orphan")),
        Err(TrainerError::ConstraintViolation(_))
    ));
    assert!(matches!(
        store.create_scenario(ScenarioDraft::new(basic.id, "Orphan").with_category(9_999)),
        Err(TrainerError::ConstraintViolation(_))
    ));
    assert!(matches!(
        store.create_scenario(ScenarioDraft::new(basic.id, "Hostile").with_initial_loyalty(500)),
        Err(TrainerError::Validation(_))
    ));
    assert!(matches!(
        store.create_step(9_999, StepDraft::new("Hello?")),
        Err(TrainerError::ConstraintViolation(_))
    ));

    let scenario = common::simple_scenario(&store, basic.id, "Mover");
    store
        .update_scenario(
            scenario.id,
            ScenarioPatch {
                level_id: Some(medium.id),
                ..ScenarioPatch::default()
            },
        )
        .unwrap();
    assert!(store.level_scenarios(basic.id).unwrap().is_empty());
    assert_eq!(store.level_scenarios(medium.id).unwrap().len(), 1);
    assert_eq!(store.scenarios_by_level("medium", None).unwrap().len(), 1);
}

#[test]
fn test_delete_category_clears_scenario_references() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let category = store
        .create_category(CategoryDraft::new("Billing", "💳", "#2196f3"))
        .unwrap();
    assert_eq!(category.color, "#2196F3");
    let scenario = store
        .create_scenario(ScenarioDraft::new(basic.id, "Invoice query").with_category(category.id))
        .unwrap();
    assert_eq!(
        store.scenarios_by_level("basic", Some(category.id)).unwrap().len(),
        1
    );

    assert_eq!(store.delete_category(category.id).unwrap(), 1);
    assert_eq!(store.get_scenario(scenario.id).unwrap().category_id, None);
    assert!(store
        .scenarios_by_level("basic", Some(category.id))
        .unwrap()
        .is_empty());
    assert!(matches!(
        store.get_category(category.id),
        Err(TrainerError::NotFound(_))
    ));
}

#[test]
fn test_deleting_a_step_keeps_numbering_dense() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let (scenario, answers) = common::scenario_with_steps(
        &store,
        ScenarioDraft::new(basic.id, "Three steps"),
        vec![
            vec![AnswerDraft::new("A", 1, 0)],
            vec![AnswerDraft::new("B", 2, 0)],
            vec![AnswerDraft::new("C", 3, 0)],
        ],
    );
    let middle = store.step_by_num(scenario.id, 2).unwrap();

    store.delete_step(middle.id).unwrap();

    let steps = store.scenario_steps(scenario.id).unwrap();
    assert_eq!(steps.iter().map(|s| s.step_num).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(store.step_by_num(scenario.id, 2).unwrap().id, steps[1].id);
    assert!(matches!(
        store.step_by_num(scenario.id, 3),
        Err(TrainerError::NotFound(_))
    ));
    assert!(matches!(
        store.get_answer(answers[1][0].id),
        Err(TrainerError::NotFound(_))
    ));
    assert_eq!(store.max_score(scenario.id).unwrap(), 4);

    let appended = store.create_step(scenario.id, StepDraft::new("Follow-up")).unwrap();
    assert_eq!(appended.step_num, 3);
}
