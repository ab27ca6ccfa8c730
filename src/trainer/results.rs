//! Grading, percent computation and result queries.
//!
//! Results are append-only. The only writer is [`save_result`], called by the
//! session engine on completion; the only remover is the scenario cascade in
//! the store.

use chrono::Utc;
use log::info;
use serde::Serialize;

use crate::trainer::errors::TrainerError;
use crate::trainer::storage::TrainerStore;
use crate::trainer::types::{
    Grade, ResultRecord, ScenarioView, TraceEntry, RESULT_SCHEMA_VERSION,
};
use crate::validation::{validate_range, validate_user_id, ValidationError};

/// Percent of `max_score` achieved, rounded half-to-even and clamped to 0..=100.
/// A non-positive `max_score` yields 0.
pub fn percent_for(score: i32, max_score: i32) -> u8 {
    if max_score <= 0 {
        return 0;
    }
    let raw = (f64::from(score) / f64::from(max_score) * 100.0).round_ties_even();
    raw.clamp(0.0, 100.0) as u8
}

/// Grade bucket for a percent, evaluated from the highest threshold down.
pub fn grade(percent: u8) -> Grade {
    if percent >= 90 {
        Grade::Excellent
    } else if percent >= 70 {
        Grade::Good
    } else if percent >= 50 {
        Grade::Partial
    } else {
        Grade::Fail
    }
}

/// Display metadata for a grade.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct GradeInfo {
    pub grade: Grade,
    pub name: &'static str,
    pub icon: &'static str,
    pub color: &'static str,
    pub message: &'static str,
}

pub fn grade_info(grade: Grade) -> GradeInfo {
    let (name, icon, color, message) = match grade {
        Grade::Excellent => ("Excellent", "🏆", "#4CAF50", "Outstanding work!"),
        Grade::Good => ("Good", "👍", "#8BC34A", "Good result!"),
        Grade::Partial => ("Satisfactory", "📚", "#FF9800", "There is room to improve."),
        Grade::Fail => ("Needs another try", "📖", "#F44336", "We recommend playing it again."),
    };
    GradeInfo {
        grade,
        name,
        icon,
        color,
        message,
    }
}

/// Everything a completion carries besides the scenario and actor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub score: i32,
    pub max_score: i32,
    pub answers_trace: Vec<TraceEntry>,
    pub final_loyalty: Option<i32>,
    pub is_game_over: bool,
    pub timeout_count: u32,
}

/// Score, grade and append one result row.
pub fn save_result(
    store: &TrainerStore,
    user_id: &str,
    scenario_id: u64,
    completion: Completion,
) -> Result<ResultRecord, TrainerError> {
    validate_user_id(user_id)?;
    validate_range("max_score", i64::from(completion.max_score), 0, i64::from(i32::MAX))?;
    if completion.score > completion.max_score {
        return Err(ValidationError::OutOfRange {
            field: "score",
            min: i64::from(i32::MIN),
            max: i64::from(completion.max_score),
            value: i64::from(completion.score),
        }
        .into());
    }

    let percent = percent_for(completion.score, completion.max_score);
    let record = ResultRecord {
        id: 0,
        user_id: user_id.to_string(),
        scenario_id,
        score: completion.score,
        max_score: completion.max_score,
        percent,
        grade: grade(percent),
        completed_at: Utc::now(),
        answers_trace: completion.answers_trace,
        final_loyalty: completion.final_loyalty,
        is_game_over: completion.is_game_over,
        timeout_count: completion.timeout_count,
        schema_version: RESULT_SCHEMA_VERSION,
    };
    let stored = store.append_result(record)?;
    info!(
        "Result {} saved: user={} scenario={} percent={} grade={}{}",
        stored.id,
        crate::validation::log_preview(user_id),
        scenario_id,
        stored.percent,
        stored.grade,
        if stored.is_game_over { " (game over)" } else { "" }
    );
    Ok(stored)
}

/// Highest percent for a (user, scenario) pair; ties go to the most recent.
pub fn best_result(
    store: &TrainerStore,
    user_id: &str,
    scenario_id: u64,
) -> Result<Option<ResultRecord>, TrainerError> {
    Ok(store
        .results_for_user(user_id)?
        .into_iter()
        .filter(|r| r.scenario_id == scenario_id)
        .max_by_key(|r| (r.percent, r.completed_at, r.id)))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultSummary {
    #[serde(flatten)]
    pub result: ResultRecord,
    pub scenario_title: String,
}

/// A user's results, newest first, optionally limited to one scenario.
pub fn user_results(
    store: &TrainerStore,
    user_id: &str,
    scenario_id: Option<u64>,
) -> Result<Vec<ResultSummary>, TrainerError> {
    let mut summaries = Vec::new();
    for result in store.results_for_user(user_id)? {
        if scenario_id.is_some_and(|id| id != result.scenario_id) {
            continue;
        }
        let scenario_title = store.get_scenario(result.scenario_id)?.title;
        summaries.push(ResultSummary {
            result,
            scenario_title,
        });
    }
    summaries.sort_by(|a, b| {
        (b.result.completed_at, b.result.id).cmp(&(a.result.completed_at, a.result.id))
    });
    Ok(summaries)
}

/// One trace entry joined with the answer it refers to. Answer fields are
/// empty when the step timed out without a selection or the answer was since deleted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnswerDetail {
    pub step_num: u32,
    pub answer_text: Option<String>,
    pub points: i32,
    pub is_correct: bool,
    pub is_partial: bool,
    pub is_timeout: bool,
    pub mood_impact: i32,
    pub feedback: Option<String>,
    pub knowledge_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultDetail {
    pub result: ResultRecord,
    pub scenario_title: String,
    pub scenario_description: String,
    pub level_name: String,
    pub level_code: String,
    pub grade_info: GradeInfo,
    pub answers: Vec<AnswerDetail>,
    /// The active scenario that follows this one in its level, if any.
    pub next_scenario: Option<ScenarioView>,
}

/// Detailed breakdown of one result. Only the owner may read it.
pub fn result_detail(
    store: &TrainerStore,
    result_id: u64,
    user_id: &str,
) -> Result<ResultDetail, TrainerError> {
    let result = store.get_result(result_id)?;
    if result.user_id != user_id {
        return Err(TrainerError::PermissionDenied(format!(
            "result {} belongs to another user",
            result_id
        )));
    }
    let view = store.scenario_view(result.scenario_id)?;

    let mut answers = Vec::with_capacity(result.answers_trace.len());
    for entry in &result.answers_trace {
        let answer = match entry.answer_id {
            Some(answer_id) => match store.get_answer(answer_id) {
                Ok(answer) => Some(answer),
                Err(TrainerError::NotFound(_)) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };
        answers.push(AnswerDetail {
            step_num: entry.step_num,
            answer_text: answer.as_ref().map(|a| a.answer_text.clone()),
            points: entry.points,
            is_correct: entry.is_correct,
            is_partial: answer.as_ref().is_some_and(|a| a.is_partial && !entry.is_timeout),
            is_timeout: entry.is_timeout,
            mood_impact: entry.mood_impact,
            feedback: answer.as_ref().map(|a| a.feedback.clone()),
            knowledge_link: answer.and_then(|a| a.knowledge_link),
        });
    }

    let next_scenario = store
        .scenarios_by_level(&view.level_code, None)?
        .into_iter()
        .skip_while(|s| s.scenario.id != result.scenario_id)
        .nth(1);

    Ok(ResultDetail {
        grade_info: grade_info(result.grade),
        scenario_title: view.scenario.title,
        scenario_description: view.scenario.description,
        level_name: view.level_name,
        level_code: view.level_code,
        answers,
        next_scenario,
        result,
    })
}
