//! Test utilities & fixtures.
//! Throwaway stores under a temp dir plus small content builders.
#![allow(dead_code)] // Each test binary uses a different subset.

use std::sync::Arc;

use opstrainer::trainer::{
    Answer, AnswerDraft, Level, LevelDraft, LogSink, Scenario, ScenarioDraft, SessionEngine,
    StepDraft, TrainerStore, TrainerStoreBuilder,
};
use tempfile::TempDir;

/// Empty store; keep the `TempDir` alive for the duration of the test.
pub fn empty_store() -> (TempDir, Arc<TrainerStore>) {
    let tmp = TempDir::new().expect("tempdir");
    let store = TrainerStoreBuilder::new(tmp.path().join("trainer"))
        .without_default_seed()
        .open()
        .expect("open store");
    (tmp, Arc::new(store))
}

/// Store with the default levels, categories and sample scenarios.
pub fn seeded_store() -> (TempDir, Arc<TrainerStore>) {
    let tmp = TempDir::new().expect("tempdir");
    let store = TrainerStore::open(tmp.path().join("trainer")).expect("open store");
    (tmp, Arc::new(store))
}

pub fn engine(store: &Arc<TrainerStore>) -> SessionEngine {
    SessionEngine::new(store.clone(), Arc::new(LogSink))
}

/// `basic` (always open) and `medium` (needs 80% on basic).
pub fn two_levels(store: &TrainerStore) -> (Level, Level) {
    let basic = store
        .create_level(LevelDraft::new("Basic", "basic").with_order(1))
        .expect("basic level");
    let medium = store
        .create_level(LevelDraft::new("Medium", "medium").requires("basic", 80).with_order(2))
        .expect("medium level");
    (basic, medium)
}

/// Create a scenario with one step per entry of `steps`, each carrying the given answers.
/// Returns the stored answers grouped per step in creation order.
pub fn scenario_with_steps(
    store: &TrainerStore,
    draft: ScenarioDraft,
    steps: Vec<Vec<AnswerDraft>>,
) -> (Scenario, Vec<Vec<Answer>>) {
    let scenario = store.create_scenario(draft).expect("scenario");
    let mut stored = Vec::with_capacity(steps.len());
    for (idx, answers) in steps.into_iter().enumerate() {
        let step = store
            .create_step(scenario.id, StepDraft::new(&format!("Client message {}", idx + 1)))
            .expect("step");
        let mut step_answers = Vec::with_capacity(answers.len());
        for (order, answer) in answers.into_iter().enumerate() {
            step_answers.push(
                store
                    .create_answer(step.id, answer.with_order(order as i32 + 1))
                    .expect("answer"),
            );
        }
        stored.push(step_answers);
    }
    (scenario, stored)
}

/// Single-step scenario whose best answer is worth 10 points.
pub fn simple_scenario(store: &TrainerStore, level_id: u64, title: &str) -> Scenario {
    scenario_with_steps(
        store,
        ScenarioDraft::new(level_id, title),
        vec![vec![
            AnswerDraft::new("Helpful reply", 10, 10).correct(),
            AnswerDraft::new("Curt reply", 0, -15),
        ]],
    )
    .0
}
