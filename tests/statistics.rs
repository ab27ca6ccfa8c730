/// Integration tests for result history, detail views and trainer statistics.
mod common;

use opstrainer::trainer::{
    best_result, overview, result_detail, save_result, scenario_stats, user_results, AnswerDraft,
    Completion, Grade, ScenarioDraft, TrainerError, TraceEntry,
};

fn completion(score: i32, max_score: i32) -> Completion {
    Completion {
        score,
        max_score,
        ..Completion::default()
    }
}

#[test]
fn test_empty_store_reports_zeros() {
    let (_tmp, store) = common::empty_store();
    let stats = overview(&store, 10).unwrap();
    assert_eq!(stats.total_scenarios, 0);
    assert_eq!(stats.total_completions, 0);
    assert_eq!(stats.unique_users, 0);
    assert_eq!(stats.avg_score, 0.0);
    assert!(stats.levels.is_empty());
    assert!(stats.top_users.is_empty());
}

#[test]
fn test_overview_aggregates_levels_and_top_users() {
    let (_tmp, store) = common::empty_store();
    let (basic, medium) = common::two_levels(&store);
    let easy = common::simple_scenario(&store, basic.id, "Easy");
    let hard = common::simple_scenario(&store, medium.id, "Hard");

    save_result(&store, "mia", easy.id, completion(10, 10)).unwrap();
    save_result(&store, "mia", hard.id, completion(8, 10)).unwrap();
    save_result(&store, "noah", easy.id, completion(9, 10)).unwrap();
    save_result(&store, "olga", easy.id, completion(5, 10)).unwrap();

    let stats = overview(&store, 2).unwrap();
    assert_eq!(stats.total_scenarios, 2);
    assert_eq!(stats.total_completions, 4);
    assert_eq!(stats.unique_users, 3);
    assert_eq!(stats.avg_score, 80.0);

    assert_eq!(stats.levels.len(), 2);
    assert_eq!(stats.levels[0].code, "basic");
    assert_eq!(stats.levels[0].completions, 3);
    assert_eq!(stats.levels[0].avg_percent, 80.0);
    assert_eq!(stats.levels[1].completions, 1);

    // mia and noah both average 90; mia has more completions.
    assert_eq!(stats.top_users.len(), 2);
    assert_eq!(stats.top_users[0].user_id, "mia");
    assert_eq!(stats.top_users[0].completions, 2);
    assert_eq!(stats.top_users[1].user_id, "noah");

    let per_scenario = scenario_stats(&store, easy.id).unwrap();
    assert_eq!(per_scenario.completions, 3);
    assert_eq!(per_scenario.min_percent, 50);
    assert_eq!(per_scenario.max_percent, 100);
}

#[test]
fn test_results_list_newest_first_and_best_result() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let first = common::simple_scenario(&store, basic.id, "First");
    let second = common::simple_scenario(&store, basic.id, "Second");

    let low = save_result(&store, "pia", first.id, completion(4, 10)).unwrap();
    let high = save_result(&store, "pia", first.id, completion(9, 10)).unwrap();
    let other = save_result(&store, "pia", second.id, completion(6, 10)).unwrap();
    save_result(&store, "quinn", first.id, completion(10, 10)).unwrap();

    let all = user_results(&store, "pia", None).unwrap();
    assert_eq!(
        all.iter().map(|r| r.result.id).collect::<Vec<_>>(),
        vec![other.id, high.id, low.id]
    );
    assert_eq!(all[0].scenario_title, "Second");

    let only_first = user_results(&store, "pia", Some(first.id)).unwrap();
    assert_eq!(only_first.len(), 2);

    let best = best_result(&store, "pia", first.id).unwrap().unwrap();
    assert_eq!(best.id, high.id);
    assert_eq!(best.grade, Grade::Excellent);
    assert!(best_result(&store, "nobody", first.id).unwrap().is_none());
}

#[test]
fn test_best_result_tie_goes_to_latest() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let scenario = common::simple_scenario(&store, basic.id, "Tied");

    let earlier = save_result(&store, "rosa", scenario.id, completion(8, 10)).unwrap();
    let later = save_result(&store, "rosa", scenario.id, completion(8, 10)).unwrap();
    save_result(&store, "rosa", scenario.id, completion(5, 10)).unwrap();
    assert_eq!(earlier.percent, later.percent);
    assert!(later.completed_at >= earlier.completed_at);

    let best = best_result(&store, "rosa", scenario.id).unwrap().unwrap();
    assert_eq!(best.id, later.id);
    assert_eq!(best.percent, 80);
}

#[test]
fn test_result_validation() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let scenario = common::simple_scenario(&store, basic.id, "Bounds");

    assert!(matches!(
        save_result(&store, "rita", scenario.id, completion(11, 10)),
        Err(TrainerError::Validation(_))
    ));
    assert!(matches!(
        save_result(&store, "rita", scenario.id, completion(0, -1)),
        Err(TrainerError::Validation(_))
    ));
    assert!(matches!(
        save_result(&store, "rita", 777, completion(1, 10)),
        Err(TrainerError::NotFound(_))
    ));

    let zero_max = save_result(&store, "rita", scenario.id, completion(0, 0)).unwrap();
    assert_eq!(zero_max.percent, 0);
    let negative = save_result(&store, "rita", scenario.id, completion(-5, 10)).unwrap();
    assert_eq!(negative.percent, 0);
    assert_eq!(negative.grade, Grade::Fail);
}

#[test]
fn test_result_detail_joins_answers_and_next_scenario() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let (scenario, answers) = common::scenario_with_steps(
        &store,
        ScenarioDraft::new(basic.id, "Opening").with_order(1),
        vec![vec![AnswerDraft::new("Greet and verify identity", 10, 5)
            .correct()
            .with_feedback("Identity checks come first.")]],
    );
    let next = common::scenario_with_steps(
        &store,
        ScenarioDraft::new(basic.id, "Follow-up").with_order(2),
        vec![vec![AnswerDraft::new("Reply", 10, 0)]],
    )
    .0;

    let stored = save_result(
        &store,
        "sam",
        scenario.id,
        Completion {
            score: 10,
            max_score: 10,
            answers_trace: vec![TraceEntry {
                step_num: 1,
                answer_id: Some(answers[0][0].id),
                points: 10,
                is_correct: true,
                is_timeout: false,
                mood_impact: 5,
            }],
            final_loyalty: Some(105),
            ..Completion::default()
        },
    )
    .unwrap();

    let detail = result_detail(&store, stored.id, "sam").unwrap();
    assert_eq!(detail.scenario_title, "Opening");
    assert_eq!(detail.level_code, "basic");
    assert_eq!(detail.grade_info.color, "#4CAF50");
    assert_eq!(detail.answers.len(), 1);
    assert_eq!(
        detail.answers[0].feedback.as_deref(),
        Some("Identity checks come first.")
    );
    assert_eq!(
        detail.next_scenario.map(|view| view.scenario.id),
        Some(next.id)
    );

    assert!(matches!(
        result_detail(&store, stored.id, "someone-else"),
        Err(TrainerError::PermissionDenied(_))
    ));
    assert!(matches!(
        result_detail(&store, 4_040, "sam"),
        Err(TrainerError::NotFound(_))
    ));
}
