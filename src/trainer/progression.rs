//! Level-unlock progression.
//!
//! A level with a prerequisite opens once the user's average percent over
//! the prerequisite level's results reaches `required_percent`. The unlock is
//! a one-way gate: it is persisted on first success and never recomputed or
//! reverted afterwards, even if the average later drops or new scenarios are
//! added to the prerequisite level.

use std::collections::HashSet;

use chrono::Utc;
use log::{debug, info};
use serde::Serialize;

use crate::trainer::errors::TrainerError;
use crate::trainer::stats::round_tenth;
use crate::trainer::storage::TrainerStore;
use crate::trainer::types::{Level, UserLevelProgress};

/// Outcome of a single unlock evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockState {
    /// The level has no prerequisite.
    AlwaysOpen,
    /// A persisted unlock already exists.
    AlreadyUnlocked,
    /// The threshold was reached by this evaluation and the unlock was persisted.
    NewlyUnlocked,
    Locked,
}

impl UnlockState {
    pub fn is_unlocked(self) -> bool {
        !matches!(self, UnlockState::Locked)
    }
}

/// Whether `user_id` may play scenarios of `level_code`. Unknown levels are `NotFound`.
pub fn is_level_unlocked(
    store: &TrainerStore,
    user_id: &str,
    level_code: &str,
) -> Result<bool, TrainerError> {
    let level = store.get_level_by_code(level_code)?;
    Ok(evaluate_unlock(store, user_id, &level)?.is_unlocked())
}

/// Run the unlock rule for one level, persisting a fresh unlock.
pub fn evaluate_unlock(
    store: &TrainerStore,
    user_id: &str,
    level: &Level,
) -> Result<UnlockState, TrainerError> {
    let Some(required_code) = level.required_level.as_deref() else {
        return Ok(UnlockState::AlwaysOpen);
    };
    if let Some(row) = store.get_progress(user_id, &level.code)? {
        if row.is_unlocked {
            return Ok(UnlockState::AlreadyUnlocked);
        }
    }

    let Some(avg) = average_percent(store, user_id, required_code)? else {
        return Ok(UnlockState::Locked);
    };
    if avg < f64::from(level.required_percent) {
        debug!(
            "Level {} still locked: average {:.1} < {}",
            level.code, avg, level.required_percent
        );
        return Ok(UnlockState::Locked);
    }

    let _guard = store.progress_guard(user_id, &level.code);
    let mut row = store
        .get_progress(user_id, &level.code)?
        .unwrap_or_else(|| UserLevelProgress::new(user_id, &level.code));
    if row.is_unlocked {
        return Ok(UnlockState::AlreadyUnlocked);
    }
    row.is_unlocked = true;
    row.unlocked_at = Some(Utc::now());
    store.put_progress(row)?;
    info!(
        "Level {} unlocked for {} (average {:.1}% on {})",
        level.code,
        crate::validation::log_preview(user_id),
        avg,
        required_code
    );
    Ok(UnlockState::NewlyUnlocked)
}

/// Mean percent of a user's results on scenarios of `level_code`.
/// `None` when the user has no such results or the level does not exist.
pub fn average_percent(
    store: &TrainerStore,
    user_id: &str,
    level_code: &str,
) -> Result<Option<f64>, TrainerError> {
    let Some(level) = store.find_level_by_code(level_code)? else {
        return Ok(None);
    };
    let scenario_ids: HashSet<u64> = store
        .level_scenarios(level.id)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    let percents: Vec<f64> = store
        .results_for_user(user_id)?
        .into_iter()
        .filter(|r| scenario_ids.contains(&r.scenario_id))
        .map(|r| f64::from(r.percent))
        .collect();
    if percents.is_empty() {
        return Ok(None);
    }
    Ok(Some(percents.iter().sum::<f64>() / percents.len() as f64))
}

/// Recompute display counters for (user, level) and re-check every level that
/// requires this one. Returns the codes of levels unlocked by this call.
/// Called after every result write.
pub fn update_user_progress(
    store: &TrainerStore,
    user_id: &str,
    level_code: &str,
) -> Result<Vec<String>, TrainerError> {
    let Some(level) = store.find_level_by_code(level_code)? else {
        return Ok(Vec::new());
    };
    let (completed, total) = level_counters(store, user_id, &level)?;

    {
        let _guard = store.progress_guard(user_id, level_code);
        let mut row = store
            .get_progress(user_id, level_code)?
            .unwrap_or_else(|| UserLevelProgress::new(user_id, level_code));
        row.scenarios_completed = completed;
        row.scenarios_total = total;
        store.put_progress(row)?;
    }

    let mut unlocked = Vec::new();
    for dependent in store
        .list_levels()?
        .into_iter()
        .filter(|l| l.required_level.as_deref() == Some(level_code))
    {
        if evaluate_unlock(store, user_id, &dependent)? == UnlockState::NewlyUnlocked {
            unlocked.push(dependent.code);
        }
    }
    Ok(unlocked)
}

/// (distinct scenarios with at least one result, active scenarios) for a level.
fn level_counters(
    store: &TrainerStore,
    user_id: &str,
    level: &Level,
) -> Result<(u32, u32), TrainerError> {
    let scenarios = store.level_scenarios(level.id)?;
    let total = scenarios.iter().filter(|s| s.is_active).count() as u32;
    let in_level: HashSet<u64> = scenarios.iter().map(|s| s.id).collect();
    let completed: HashSet<u64> = store
        .results_for_user(user_id)?
        .into_iter()
        .map(|r| r.scenario_id)
        .filter(|id| in_level.contains(id))
        .collect();
    Ok((completed.len() as u32, total))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LevelProgress {
    pub code: String,
    pub name: String,
    pub icon: String,
    pub color: String,
    pub completed: u32,
    pub total: u32,
    pub avg_percent: f64,
    pub is_unlocked: bool,
    pub required_level: Option<String>,
    pub required_percent: u8,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressOverview {
    pub user_id: String,
    pub total_completed: u32,
    pub total_scenarios: u32,
    pub average_score: f64,
    /// Ordered like the levels themselves.
    pub levels: Vec<LevelProgress>,
}

/// Per-level progress for one user plus overall totals.
pub fn user_progress(store: &TrainerStore, user_id: &str) -> Result<ProgressOverview, TrainerError> {
    let mut overview = ProgressOverview {
        user_id: user_id.to_string(),
        total_completed: 0,
        total_scenarios: 0,
        average_score: 0.0,
        levels: Vec::new(),
    };

    for level in store.list_levels()? {
        let (completed, total) = level_counters(store, user_id, &level)?;
        let avg = average_percent(store, user_id, &level.code)?.unwrap_or(0.0);
        let is_unlocked = evaluate_unlock(store, user_id, &level)?.is_unlocked();
        overview.total_completed += completed;
        overview.total_scenarios += total;
        overview.levels.push(LevelProgress {
            code: level.code,
            name: level.name,
            icon: level.icon,
            color: level.color,
            completed,
            total,
            avg_percent: round_tenth(avg),
            is_unlocked,
            required_level: level.required_level,
            required_percent: level.required_percent,
        });
    }

    let results = store.results_for_user(user_id)?;
    if !results.is_empty() {
        let sum: f64 = results.iter().map(|r| f64::from(r.percent)).sum();
        overview.average_score = round_tenth(sum / results.len() as f64);
    }
    Ok(overview)
}
