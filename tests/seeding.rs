/// Integration tests for default content seeding and seed files.
mod common;

use opstrainer::trainer::{
    apply_seed, is_level_unlocked, load_seed_file, SeedFile, TrainerError, TrainerStore,
};

#[test]
fn test_fresh_store_gets_default_content() {
    let (_tmp, store) = common::seeded_store();

    let levels = store.list_levels().unwrap();
    assert_eq!(
        levels.iter().map(|l| l.code.as_str()).collect::<Vec<_>>(),
        vec!["basic", "medium", "hard"]
    );
    assert_eq!(levels[2].required_level.as_deref(), Some("medium"));
    assert_eq!(store.list_categories().unwrap().len(), 4);

    let basic = store.scenarios_by_level("basic", None).unwrap();
    assert_eq!(basic.len(), 2);
    assert_eq!(basic[0].category_name.as_deref(), Some("Technical"));
    assert_eq!(store.steps_count(basic[0].scenario.id).unwrap(), 4);
    assert_eq!(store.max_score(basic[0].scenario.id).unwrap(), 100);
    assert!(basic[0].scenario.client_info.is_some());

    assert!(is_level_unlocked(&store, "newcomer", "basic").unwrap());
    assert!(!is_level_unlocked(&store, "newcomer", "hard").unwrap());
}

#[test]
fn test_reopening_does_not_seed_twice() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("trainer");
    {
        let store = TrainerStore::open(&path).unwrap();
        assert_eq!(store.all_scenarios(true).unwrap().len(), 2);
        store.flush().unwrap();
    }
    let store = TrainerStore::open(&path).unwrap();
    assert_eq!(store.list_levels().unwrap().len(), 3);
    assert_eq!(store.all_scenarios(true).unwrap().len(), 2);
    assert_eq!(store.seed_defaults_if_needed().unwrap(), 0);
}

#[test]
fn test_seed_file_is_idempotent() {
    let (tmp, store) = common::empty_store();
    let seed_path = tmp.path().join("extra.json");
    std::fs::write(
        &seed_path,
        r##"{
            "levels": [{"name": "Basic", "code": "basic", "color": "#4caf50"}],
            "categories": [{"name": "Complaints", "icon": "😤", "color": "#F44336"}],
            "scenarios": [{
                "level": "basic",
                "category": "Complaints",
                "title": "Late delivery",
                "timer_seconds": 30,
                "steps": [{
                    "client_message": "My order is a week late.",
                    "initial_mood": "irritation",
                    "answers": [
                        {"answer_text": "I'm sorry, let me check the courier status.", "is_correct": true, "points": 20, "mood_impact": 15},
                        {"answer_text": "Deliveries are often late.", "points": 0, "mood_impact": -25}
                    ]
                }]
            }]
        }"##,
    )
    .unwrap();

    let first = apply_seed(&store, load_seed_file(&seed_path).unwrap()).unwrap();
    assert_eq!(first.levels, 1);
    assert_eq!(first.categories, 1);
    assert_eq!(first.scenarios, 1);
    assert_eq!(first.steps, 1);
    assert_eq!(first.answers, 2);

    let second = apply_seed(&store, load_seed_file(&seed_path).unwrap()).unwrap();
    assert_eq!(second.total(), 0);

    let scenarios = store.scenarios_by_level("basic", None).unwrap();
    assert_eq!(scenarios.len(), 1);
    assert_eq!(scenarios[0].scenario.timer_seconds, 30);
    let step = store.step_by_num(scenarios[0].scenario.id, 1).unwrap();
    assert_eq!(step.initial_mood.as_str(), "irritation");
    let answers = store.step_answers(step.id).unwrap();
    assert_eq!(answers[0].order_num, 1);
    assert_eq!(answers[1].order_num, 2);
}

#[test]
fn test_seed_with_unknown_level_is_rejected() {
    let (_tmp, store) = common::empty_store();
    let seed: SeedFile = serde_json::from_str(
        r#"{"scenarios": [{"level": "ghost", "title": "Nowhere", "steps": []}]}"#,
    )
    .unwrap();
    assert!(matches!(
        apply_seed(&store, seed),
        Err(TrainerError::ConstraintViolation(_))
    ));
}

#[test]
fn test_malformed_seed_file_is_reported() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(load_seed_file(&path), Err(TrainerError::Io(_))));
    assert!(matches!(
        load_seed_file(tmp.path().join("missing.json")),
        Err(TrainerError::Io(_))
    ));
}
