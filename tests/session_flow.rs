/// Integration tests for the play-session state machine:
/// loyalty and mood tracking, timeouts, game over and completion.
mod common;

use opstrainer::trainer::{
    AnswerDraft, AnswerSubmission, Grade, Mood, ScenarioDraft, SessionState, TrainerError,
};

#[test]
fn test_two_step_play_through_scores_excellent() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let (scenario, answers) = common::scenario_with_steps(
        &store,
        ScenarioDraft::new(basic.id, "Refund request"),
        vec![
            vec![
                AnswerDraft::new("Apologise and look up the order", 30, 25).correct(),
                AnswerDraft::new("Ask them to call back later", 0, -30),
            ],
            vec![
                AnswerDraft::new("Offer the refund with a short delay", 20, -10).correct(),
                AnswerDraft::new("Refuse outright", 0, -40),
            ],
        ],
    );
    let engine = common::engine(&store);

    let mut session = engine.start_session("alice", scenario.id).unwrap();
    assert_eq!(session.total_steps, 2);
    assert_eq!(session.max_score, 50);
    assert_eq!(session.loyalty(), 100);
    assert_eq!(session.current_step(), Some(1));

    let step = engine.get_step(scenario.id, 1).unwrap();
    assert_eq!(step.total_steps, 2);
    assert_eq!(step.answers.len(), 2);
    assert_eq!(step.client_name, "Client");

    let first = engine
        .play_step(&mut session, Some(answers[0][0].id), 1_200, false)
        .unwrap();
    assert_eq!(first.points_earned, 30);
    assert_eq!(first.new_loyalty, 125);
    assert_eq!(first.new_mood, Mood::Delight);
    assert!(first.is_correct);
    assert!(!first.is_last_step);
    assert_eq!(session.state(), SessionState::AnswerSubmitted(1));
    assert_eq!(session.advance().unwrap(), SessionState::AwaitingStep(2));

    let second = engine
        .play_step(&mut session, Some(answers[1][0].id), 800, false)
        .unwrap();
    assert_eq!(second.new_loyalty, 115);
    assert!(second.is_last_step);
    assert_eq!(session.advance().unwrap(), SessionState::Completed);
    assert_eq!(session.score(), 50);

    let receipt = engine.finish(&session).unwrap();
    assert_eq!(receipt.percent, 100);
    assert_eq!(receipt.grade, Grade::Excellent);
    assert!(!receipt.is_game_over);

    let stored = store.get_result(receipt.result_id).unwrap();
    assert_eq!(stored.user_id, "alice");
    assert_eq!(stored.final_loyalty, Some(115));
    assert_eq!(stored.answers_trace.len(), 2);
    assert_eq!(stored.answers_trace[0].answer_id, Some(answers[0][0].id));
    assert_eq!(stored.answers_trace[1].mood_impact, -10);
}

#[test]
fn test_game_over_ends_session_before_next_step() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let (scenario, answers) = common::scenario_with_steps(
        &store,
        ScenarioDraft::new(basic.id, "Angry caller").with_initial_loyalty(20),
        vec![
            vec![
                AnswerDraft::new("Calm acknowledgement", 10, 10).correct(),
                AnswerDraft::new("Argue back", 0, -30),
            ],
            vec![AnswerDraft::new("Close the ticket", 10, 5).correct()],
        ],
    );
    let engine = common::engine(&store);

    let mut session = engine.start_session("bob", scenario.id).unwrap();
    let outcome = engine
        .play_step(&mut session, Some(answers[0][1].id), 500, false)
        .unwrap();
    assert_eq!(outcome.new_loyalty, 0);
    assert!(outcome.is_game_over);
    assert_eq!(session.state(), SessionState::GameOver);
    assert_eq!(session.current_step(), None);

    // Step 2 is never served.
    assert!(matches!(
        engine.play_step(&mut session, Some(answers[1][0].id), 0, false),
        Err(TrainerError::InvalidState(_))
    ));
    assert!(matches!(session.advance(), Err(TrainerError::InvalidState(_))));

    let receipt = engine.finish(&session).unwrap();
    assert!(receipt.is_game_over);
    assert_eq!(receipt.percent, 0);
    assert_eq!(receipt.grade, Grade::Fail);
    let stored = store.get_result(receipt.result_id).unwrap();
    assert_eq!(stored.answers_trace.len(), 1);
    assert_eq!(stored.final_loyalty, Some(0));
}

#[test]
fn test_timeout_applies_fixed_penalty_and_scores_nothing() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let (scenario, answers) = common::scenario_with_steps(
        &store,
        ScenarioDraft::new(basic.id, "Slow operator"),
        vec![vec![AnswerDraft::new("Friendly reply", 10, 10).correct()]],
    );
    let engine = common::engine(&store);

    let with_selection = engine
        .submit_answer(&AnswerSubmission {
            scenario_id: scenario.id,
            step_num: 1,
            answer_id: Some(answers[0][0].id),
            response_time_ms: 15_000,
            is_timeout: true,
            current_loyalty: 100,
        })
        .unwrap();
    assert_eq!(with_selection.new_loyalty, 80);
    assert_eq!(with_selection.mood_impact, -20);
    assert_eq!(with_selection.points_earned, 0);
    assert!(!with_selection.is_correct);
    assert_eq!(with_selection.answer_id, Some(answers[0][0].id));

    let mut session = engine.start_session("carol", scenario.id).unwrap();
    let without_selection = engine.play_step(&mut session, None, 15_000, true).unwrap();
    assert_eq!(without_selection.new_loyalty, 80);
    assert_eq!(session.timeout_count(), 1);
    session.advance().unwrap();
    let receipt = engine.finish(&session).unwrap();
    let stored = store.get_result(receipt.result_id).unwrap();
    assert_eq!(stored.timeout_count, 1);
    assert!(stored.answers_trace[0].is_timeout);
    assert_eq!(stored.answers_trace[0].answer_id, None);
}

#[test]
fn test_missing_answer_without_timeout_is_rejected() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let scenario = common::simple_scenario(&store, basic.id, "Quiet caller");
    let engine = common::engine(&store);

    let result = engine.submit_answer(&AnswerSubmission {
        scenario_id: scenario.id,
        step_num: 1,
        answer_id: None,
        response_time_ms: 0,
        is_timeout: false,
        current_loyalty: 100,
    });
    assert!(matches!(result, Err(TrainerError::Validation(_))));

    let out_of_range = engine.submit_answer(&AnswerSubmission {
        scenario_id: scenario.id,
        step_num: 1,
        answer_id: None,
        response_time_ms: 0,
        is_timeout: true,
        current_loyalty: 250,
    });
    assert!(matches!(out_of_range, Err(TrainerError::Validation(_))));

    let foreign_answer = engine.submit_answer(&AnswerSubmission {
        scenario_id: scenario.id,
        step_num: 1,
        answer_id: Some(999_999),
        response_time_ms: 0,
        is_timeout: false,
        current_loyalty: 100,
    });
    assert!(matches!(foreign_answer, Err(TrainerError::NotFound(_))));
}

#[test]
fn test_retrying_a_submission_is_side_effect_free() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let (scenario, answers) = common::scenario_with_steps(
        &store,
        ScenarioDraft::new(basic.id, "Retry"),
        vec![vec![AnswerDraft::new("Reply", 10, 5).correct()]],
    );
    let engine = common::engine(&store);
    let submission = AnswerSubmission {
        scenario_id: scenario.id,
        step_num: 1,
        answer_id: Some(answers[0][0].id),
        response_time_ms: 300,
        is_timeout: false,
        current_loyalty: 90,
    };

    let first = engine.submit_answer(&submission).unwrap();
    let second = engine.submit_answer(&submission).unwrap();
    assert_eq!(first, second);
    assert!(store.all_results().unwrap().is_empty());
}

#[test]
fn test_start_session_preconditions() {
    let (_tmp, store) = common::empty_store();
    let (basic, medium) = common::two_levels(&store);
    let engine = common::engine(&store);

    let locked = common::simple_scenario(&store, medium.id, "Escalation");
    assert!(matches!(
        engine.start_session("dave", locked.id),
        Err(TrainerError::PermissionDenied(_))
    ));

    let inactive = store
        .create_scenario(ScenarioDraft {
            is_active: false,
            ..ScenarioDraft::new(basic.id, "Retired scenario")
        })
        .unwrap();
    assert!(matches!(
        engine.start_session("dave", inactive.id),
        Err(TrainerError::NotFound(_))
    ));

    let empty = store
        .create_scenario(ScenarioDraft::new(basic.id, "Work in progress"))
        .unwrap();
    assert!(matches!(
        engine.start_session("dave", empty.id),
        Err(TrainerError::InvalidState(_))
    ));

    assert!(matches!(
        engine.start_session("", empty.id),
        Err(TrainerError::Validation(_))
    ));
    assert!(matches!(
        engine.start_session("dave", 424_242),
        Err(TrainerError::NotFound(_))
    ));
    assert!(engine.is_accepting());
}

#[test]
fn test_completion_requires_terminal_state() {
    let (_tmp, store) = common::empty_store();
    let (basic, _) = common::two_levels(&store);
    let scenario = common::simple_scenario(&store, basic.id, "Unfinished");
    let engine = common::engine(&store);

    let session = engine.start_session("erin", scenario.id).unwrap();
    assert!(matches!(
        engine.finish(&session),
        Err(TrainerError::InvalidState(_))
    ));
    assert!(store.all_results().unwrap().is_empty());
}
