//! Seed data for data-driven content initialization.
//!
//! Default levels and categories are defined here; sample scenarios ship as
//! JSON in `data/seeds/scenarios.json` (embedded at build time) so admins can
//! use the same format for their own seed files.

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::Deserialize;

use crate::trainer::errors::TrainerError;
use crate::trainer::storage::TrainerStore;
use crate::trainer::types::{AnswerDraft, CategoryDraft, LevelDraft, ScenarioDraft, StepDraft};

/// Sample scenarios installed into an empty store.
pub const DEFAULT_SCENARIOS_JSON: &str = include_str!("../../data/seeds/scenarios.json");

/// Default difficulty tiers: basic is always open, each further tier needs 80% on the previous one.
pub fn default_levels() -> Vec<LevelDraft> {
    vec![
        LevelDraft {
            description: "Customer-service basics. Simple situations.".to_string(),
            icon: "🌱".to_string(),
            color: Some("#4CAF50".to_string()),
            ..LevelDraft::new("Basic", "basic").with_order(1)
        },
        LevelDraft {
            description: "Difficult situations and conflict-prone customers.".to_string(),
            icon: "⚡".to_string(),
            color: Some("#FF9800".to_string()),
            ..LevelDraft::new("Medium", "medium").requires("basic", 80).with_order(2)
        },
        LevelDraft {
            description: "Unusual cases and VIP customers.".to_string(),
            icon: "🔥".to_string(),
            color: Some("#F44336".to_string()),
            ..LevelDraft::new("Hard", "hard").requires("medium", 80).with_order(3)
        },
    ]
}

pub fn default_categories() -> Vec<CategoryDraft> {
    vec![
        CategoryDraft::new("Technical", "🔧", "#2196F3"),
        CategoryDraft::new("Financial", "💰", "#4CAF50"),
        CategoryDraft::new("Complaints", "😤", "#F44336"),
        CategoryDraft::new("Information requests", "ℹ️", "#9C27B0"),
    ]
}

/// Seed file layout. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub levels: Vec<LevelDraft>,
    #[serde(default)]
    pub categories: Vec<CategoryDraft>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioSeed>,
}

/// A scenario referring to its level by code and its category by name.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioSeed {
    pub level: String,
    #[serde(default)]
    pub category: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub estimated_time: Option<u32>,
    #[serde(default)]
    pub total_points: Option<i32>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub order_num: Option<i32>,
    #[serde(default)]
    pub timer_seconds: Option<u32>,
    #[serde(default)]
    pub initial_loyalty: Option<i32>,
    #[serde(default)]
    pub client_info: Option<serde_json::Value>,
    #[serde(default)]
    pub steps: Vec<StepSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepSeed {
    #[serde(flatten)]
    pub step: StepDraft,
    #[serde(default)]
    pub answers: Vec<AnswerDraft>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub levels: usize,
    pub categories: usize,
    pub scenarios: usize,
    pub steps: usize,
    pub answers: usize,
}

impl SeedReport {
    pub fn total(&self) -> usize {
        self.levels + self.categories + self.scenarios + self.steps + self.answers
    }
}

pub fn parse_seed(contents: &str) -> Result<SeedFile, TrainerError> {
    Ok(serde_json::from_str(contents)?)
}

/// Load a seed file such as `data/seeds/scenarios.json`.
pub fn load_seed_file<P: AsRef<Path>>(path: P) -> Result<SeedFile, TrainerError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| {
        TrainerError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to parse {}: {}", path.display(), e),
        ))
    })
}

/// Install default levels, categories and sample scenarios. Returns the number of records created.
pub fn install_defaults(store: &TrainerStore) -> Result<usize, TrainerError> {
    let mut seed = parse_seed(DEFAULT_SCENARIOS_JSON)?;
    seed.levels = default_levels();
    seed.categories = default_categories();
    Ok(apply_seed(store, seed)?.total())
}

/// Apply a seed file. Levels with an existing code, categories with an
/// existing name and scenarios whose title already exists in their level are
/// skipped, so applying the same file twice is harmless.
pub fn apply_seed(store: &TrainerStore, seed: SeedFile) -> Result<SeedReport, TrainerError> {
    let mut report = SeedReport::default();

    for level in seed.levels {
        if store.find_level_by_code(level.code.trim())?.is_some() {
            debug!("Seed level {} already present", level.code);
            continue;
        }
        store.create_level(level)?;
        report.levels += 1;
    }

    for category in seed.categories {
        let exists = store
            .list_categories()?
            .iter()
            .any(|c| c.name == category.name.trim());
        if exists {
            continue;
        }
        store.create_category(category)?;
        report.categories += 1;
    }

    for (idx, scenario_seed) in seed.scenarios.into_iter().enumerate() {
        let level = store.find_level_by_code(&scenario_seed.level)?.ok_or_else(|| {
            TrainerError::ConstraintViolation(format!(
                "seed scenario '{}' refers to unknown level {}",
                scenario_seed.title, scenario_seed.level
            ))
        })?;
        let category_id = match scenario_seed.category.as_deref() {
            Some(name) => Some(
                store
                    .list_categories()?
                    .into_iter()
                    .find(|c| c.name == name)
                    .map(|c| c.id)
                    .ok_or_else(|| {
                        TrainerError::ConstraintViolation(format!(
                            "seed scenario '{}' refers to unknown category {}",
                            scenario_seed.title, name
                        ))
                    })?,
            ),
            None => None,
        };
        if store
            .level_scenarios(level.id)?
            .iter()
            .any(|s| s.title == scenario_seed.title.trim())
        {
            continue;
        }

        let defaults = ScenarioDraft::new(level.id, &scenario_seed.title);
        let draft = ScenarioDraft {
            category_id,
            description: scenario_seed.description,
            estimated_time: scenario_seed.estimated_time.unwrap_or(defaults.estimated_time),
            total_points: scenario_seed.total_points.unwrap_or(defaults.total_points),
            is_active: scenario_seed.is_active.unwrap_or(defaults.is_active),
            order_num: scenario_seed.order_num.unwrap_or(idx as i32 + 1),
            timer_seconds: scenario_seed.timer_seconds.unwrap_or(defaults.timer_seconds),
            initial_loyalty: scenario_seed.initial_loyalty.unwrap_or(defaults.initial_loyalty),
            client_info: scenario_seed.client_info,
            ..defaults
        };
        let scenario = store.create_scenario(draft)?;
        report.scenarios += 1;

        for step_seed in scenario_seed.steps {
            let step = store.create_step(scenario.id, step_seed.step)?;
            report.steps += 1;
            for (order, mut answer) in step_seed.answers.into_iter().enumerate() {
                if answer.order_num == 0 {
                    answer.order_num = order as i32 + 1;
                }
                store.create_answer(step.id, answer)?;
                report.answers += 1;
            }
        }
    }

    info!(
        "Seed applied: {} levels, {} categories, {} scenarios, {} steps, {} answers",
        report.levels, report.categories, report.scenarios, report.steps, report.answers
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_samples_parse() {
        let seed = parse_seed(DEFAULT_SCENARIOS_JSON).expect("embedded seed");
        assert!(!seed.scenarios.is_empty());
        for scenario in &seed.scenarios {
            assert!(!scenario.steps.is_empty());
            assert!(scenario.steps.iter().all(|s| !s.answers.is_empty()));
        }
    }

    #[test]
    fn default_levels_chain_prerequisites() {
        let levels = default_levels();
        assert_eq!(levels[0].required_level, None);
        assert_eq!(levels[1].required_level.as_deref(), Some("basic"));
        assert_eq!(levels[2].required_level.as_deref(), Some("medium"));
        assert!(levels.iter().skip(1).all(|l| l.required_percent == 80));
    }
}
