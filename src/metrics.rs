//! In-process gameplay counters.
//! Counts are recorded on completion, so a retried `submit_answer` is never counted twice.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

static SESSIONS_STARTED: AtomicU64 = AtomicU64::new(0);
static ANSWERS_RECORDED: AtomicU64 = AtomicU64::new(0);
static TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static GAME_OVERS: AtomicU64 = AtomicU64::new(0);
static COMPLETIONS: AtomicU64 = AtomicU64::new(0);
static NOTIFICATIONS_DROPPED: AtomicU64 = AtomicU64::new(0);

static SCENARIO_COUNTERS: OnceLock<Mutex<HashMap<u64, ScenarioCounter>>> = OnceLock::new();

pub fn inc_sessions_started() {
    SESSIONS_STARTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_notifications_dropped() {
    NOTIFICATIONS_DROPPED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioCounter {
    pub completions: u64,
    pub game_overs: u64,
    pub timeouts: u64,
}

fn scenario_counter_lock() -> &'static Mutex<HashMap<u64, ScenarioCounter>> {
    SCENARIO_COUNTERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Record one persisted completion (a game over is still a completion).
pub fn record_completion(scenario_id: u64, answers: usize, timeouts: u32, game_over: bool) -> ScenarioCounter {
    COMPLETIONS.fetch_add(1, Ordering::Relaxed);
    ANSWERS_RECORDED.fetch_add(answers as u64, Ordering::Relaxed);
    TIMEOUTS.fetch_add(u64::from(timeouts), Ordering::Relaxed);
    if game_over {
        GAME_OVERS.fetch_add(1, Ordering::Relaxed);
    }

    let mut guard = scenario_counter_lock()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let counter = guard.entry(scenario_id).or_default();
    counter.completions = counter.completions.saturating_add(1);
    counter.timeouts = counter.timeouts.saturating_add(u64::from(timeouts));
    if game_over {
        counter.game_overs = counter.game_overs.saturating_add(1);
    }
    *counter
}

pub fn scenario_counters_snapshot() -> HashMap<u64, ScenarioCounter> {
    scenario_counter_lock()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub sessions_started: u64,
    pub answers_recorded: u64,
    pub timeouts: u64,
    pub game_overs: u64,
    pub completions: u64,
    pub notifications_dropped: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        sessions_started: SESSIONS_STARTED.load(Ordering::Relaxed),
        answers_recorded: ANSWERS_RECORDED.load(Ordering::Relaxed),
        timeouts: TIMEOUTS.load(Ordering::Relaxed),
        game_overs: GAME_OVERS.load(Ordering::Relaxed),
        completions: COMPLETIONS.load(Ordering::Relaxed),
        notifications_dropped: NOTIFICATIONS_DROPPED.load(Ordering::Relaxed),
    }
}
