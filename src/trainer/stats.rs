//! Read-only rollups over the result log for dashboards.
//!
//! Nothing here is on the gameplay path. Every aggregate tolerates an empty
//! store and reports zeroes instead of failing.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::trainer::errors::TrainerError;
use crate::trainer::storage::TrainerStore;
use crate::trainer::types::ResultRecord;

/// Default size of the top-users table.
pub const DEFAULT_TOP_USERS: usize = 10;

/// Round to one decimal place, half to even.
pub fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}

fn mean_percent<'a>(results: impl IntoIterator<Item = &'a ResultRecord>) -> f64 {
    let (sum, count) = results
        .into_iter()
        .fold((0u64, 0u64), |(sum, count), r| (sum + u64::from(r.percent), count + 1));
    if count == 0 {
        0.0
    } else {
        round_tenth(sum as f64 / count as f64)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LevelStats {
    pub code: String,
    pub name: String,
    pub scenarios: u32,
    pub completions: u32,
    pub avg_percent: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserStats {
    pub user_id: String,
    pub completions: u32,
    pub avg_percent: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrainerStats {
    pub total_scenarios: u32,
    pub total_completions: u32,
    pub unique_users: u32,
    pub avg_score: f64,
    pub levels: Vec<LevelStats>,
    pub top_users: Vec<UserStats>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScenarioStats {
    pub scenario_id: u64,
    pub completions: u32,
    pub avg_percent: f64,
    pub min_percent: u8,
    pub max_percent: u8,
}

/// Global rollup: totals, per-level figures and the top `top_users` users.
pub fn overview(store: &TrainerStore, top_users: usize) -> Result<TrainerStats, TrainerError> {
    let results = store.all_results()?;
    let levels = store.list_levels()?;

    let mut level_of_scenario: HashMap<u64, u64> = HashMap::new();
    let mut total_scenarios = 0u32;
    let mut level_stats = Vec::with_capacity(levels.len());
    for level in &levels {
        let scenarios = store.level_scenarios(level.id)?;
        let active = scenarios.iter().filter(|s| s.is_active).count() as u32;
        total_scenarios += active;
        for scenario in &scenarios {
            level_of_scenario.insert(scenario.id, level.id);
        }
        let in_level: Vec<&ResultRecord> = results
            .iter()
            .filter(|r| level_of_scenario.get(&r.scenario_id) == Some(&level.id))
            .collect();
        level_stats.push(LevelStats {
            code: level.code.clone(),
            name: level.name.clone(),
            scenarios: active,
            completions: in_level.len() as u32,
            avg_percent: mean_percent(in_level),
        });
    }

    let unique_users: HashSet<&str> = results.iter().map(|r| r.user_id.as_str()).collect();

    Ok(TrainerStats {
        total_scenarios,
        total_completions: results.len() as u32,
        unique_users: unique_users.len() as u32,
        avg_score: mean_percent(&results),
        levels: level_stats,
        top_users: rank_users(&results, top_users),
    })
}

/// Users ordered by average percent, then completion count, then id for a
/// stable order.
pub fn rank_users(results: &[ResultRecord], limit: usize) -> Vec<UserStats> {
    let mut per_user: HashMap<&str, (u64, u32)> = HashMap::new();
    for r in results {
        let entry = per_user.entry(r.user_id.as_str()).or_insert((0, 0));
        entry.0 += u64::from(r.percent);
        entry.1 += 1;
    }
    let mut ranked: Vec<(String, u32, f64)> = per_user
        .into_iter()
        .map(|(user, (sum, count))| (user.to_string(), count, sum as f64 / f64::from(count)))
        .collect();
    ranked.sort_by(|a, b| {
        b.2.total_cmp(&a.2)
            .then_with(|| b.1.cmp(&a.1))
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked
        .into_iter()
        .take(limit)
        .map(|(user_id, completions, avg)| UserStats {
            user_id,
            completions,
            avg_percent: round_tenth(avg),
        })
        .collect()
}

/// Completion count and percent spread for one scenario.
pub fn scenario_stats(store: &TrainerStore, scenario_id: u64) -> Result<ScenarioStats, TrainerError> {
    let results = store.results_for_scenario(scenario_id)?;
    Ok(ScenarioStats {
        scenario_id,
        completions: results.len() as u32,
        avg_percent: mean_percent(&results),
        min_percent: results.iter().map(|r| r.percent).min().unwrap_or(0),
        max_percent: results.iter().map(|r| r.percent).max().unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::types::{Grade, RESULT_SCHEMA_VERSION};
    use chrono::Utc;

    fn result(user: &str, percent: u8) -> ResultRecord {
        ResultRecord {
            id: 0,
            user_id: user.to_string(),
            scenario_id: 1,
            score: i32::from(percent),
            max_score: 100,
            percent,
            grade: Grade::Fail,
            completed_at: Utc::now(),
            answers_trace: Vec::new(),
            final_loyalty: None,
            is_game_over: false,
            timeout_count: 0,
            schema_version: RESULT_SCHEMA_VERSION,
        }
    }

    #[test]
    fn ties_on_average_go_to_more_completions() {
        let results = vec![
            result("bob", 80),
            result("alice", 80),
            result("alice", 80),
            result("carol", 95),
        ];
        let ranked = rank_users(&results, 10);
        let order: Vec<&str> = ranked.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(order, vec!["carol", "alice", "bob"]);
        assert_eq!(ranked[1].completions, 2);
    }

    #[test]
    fn ranking_respects_limit() {
        let results: Vec<ResultRecord> = (0..15).map(|i| result(&format!("u{i}"), 50)).collect();
        assert_eq!(rank_users(&results, DEFAULT_TOP_USERS).len(), 10);
        assert!(rank_users(&[], 10).is_empty());
    }

    #[test]
    fn rounding_to_one_decimal() {
        assert_eq!(round_tenth(66.666), 66.7);
        assert_eq!(round_tenth(0.0), 0.0);
        assert_eq!(mean_percent(&[result("a", 70), result("b", 75)]), 72.5);
    }
}
