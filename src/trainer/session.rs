//! Play-session state machine.
//!
//! The engine is stateless between steps from the store's point of view: the
//! caller carries `current_loyalty` forward and reports the accumulated trace
//! on completion. [`PlaySession`] is the caller-side carrier that enforces the
//! transition order:
//!
//! ```text
//! AwaitingStep(1) -> AnswerSubmitted(n) -> AwaitingStep(n + 1)
//!                                       -> Completed
//!                 (loyalty reaches 0)   -> GameOver
//! ```
//!
//! Nothing is persisted until [`SessionEngine::complete`]; an abandoned session
//! leaves no trace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::trainer::errors::TrainerError;
use crate::trainer::notify::{MessagingSink, Notification, NotificationEvent};
use crate::trainer::progression;
use crate::trainer::results::{self, Completion};
use crate::trainer::storage::TrainerStore;
use crate::trainer::types::{
    Grade, Mood, TraceEntry, LOYALTY_MAX, LOYALTY_MIN, TIMEOUT_MOOD_IMPACT,
};
use crate::validation::{validate_range, validate_user_id, ValidationError};

/// Mood label for a loyalty value. Each threshold belongs to the higher mood.
pub fn mood_for_loyalty(loyalty: i32) -> Mood {
    if loyalty >= 120 {
        Mood::Delight
    } else if loyalty >= 80 {
        Mood::Satisfaction
    } else if loyalty >= 50 {
        Mood::Neutral
    } else if loyalty >= 25 {
        Mood::Irritation
    } else {
        Mood::Anger
    }
}

/// `clamp(loyalty + impact, LOYALTY_MIN, LOYALTY_MAX)`.
pub fn apply_mood_impact(loyalty: i32, impact: i32) -> i32 {
    loyalty.saturating_add(impact).clamp(LOYALTY_MIN, LOYALTY_MAX)
}

/// A timeout replaces whatever the answer would have done to loyalty.
pub fn effective_mood_impact(answer_impact: i32, is_timeout: bool) -> i32 {
    if is_timeout {
        TIMEOUT_MOOD_IMPACT
    } else {
        answer_impact
    }
}

/// An answer as the player sees it: no correctness, points or feedback.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnswerChoice {
    pub id: u64,
    pub answer_text: String,
    pub order_num: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepView {
    pub id: u64,
    pub step_num: u32,
    pub total_steps: u32,
    pub client_message: String,
    pub client_avatar: String,
    pub client_name: String,
    pub initial_mood: Mood,
    pub answers: Vec<AnswerChoice>,
    pub timer_seconds: u32,
    pub initial_loyalty: i32,
    pub client_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerSubmission {
    pub scenario_id: u64,
    pub step_num: u32,
    /// May be `None` only for a timeout without any selection.
    #[serde(default)]
    pub answer_id: Option<u64>,
    #[serde(default)]
    pub response_time_ms: u64,
    #[serde(default)]
    pub is_timeout: bool,
    pub current_loyalty: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnswerOutcome {
    pub answer_id: Option<u64>,
    pub is_correct: bool,
    pub is_partial: bool,
    pub points_earned: i32,
    pub feedback: String,
    pub mood_impact: i32,
    pub new_mood: Mood,
    pub new_loyalty: i32,
    pub knowledge_link: Option<String>,
    pub is_game_over: bool,
    pub is_last_step: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionReceipt {
    pub result_id: u64,
    pub percent: u8,
    pub grade: Grade,
    pub is_game_over: bool,
    /// Levels opened for the user by this completion.
    pub unlocked_levels: Vec<String>,
}

/// Gameplay surface over a shared store.
pub struct SessionEngine {
    store: Arc<TrainerStore>,
    sink: Arc<dyn MessagingSink>,
    accepting: AtomicBool,
}

impl SessionEngine {
    pub fn new(store: Arc<TrainerStore>, sink: Arc<dyn MessagingSink>) -> Self {
        Self {
            store,
            sink,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn store(&self) -> &Arc<TrainerStore> {
        &self.store
    }

    /// False once a store-connection failure has been observed.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    fn observe<T>(&self, result: Result<T, TrainerError>) -> Result<T, TrainerError> {
        if let Err(e) = &result {
            if e.is_fatal() && self.accepting.swap(false, Ordering::SeqCst) {
                error!("Fatal store error, no longer accepting new sessions: {}", e);
            }
        }
        result
    }

    /// Open a play-through after checking the scenario is active, its level
    /// is unlocked for the user and it has at least one step.
    pub fn start_session(&self, user_id: &str, scenario_id: u64) -> Result<PlaySession, TrainerError> {
        if !self.is_accepting() {
            return Err(TrainerError::StoreUnavailable);
        }
        let session = self.observe(self.open_session(user_id, scenario_id))?;
        crate::metrics::inc_sessions_started();
        debug!(
            "Session started: user={} scenario={} steps={}",
            crate::validation::log_preview(user_id),
            scenario_id,
            session.total_steps
        );
        Ok(session)
    }

    fn open_session(&self, user_id: &str, scenario_id: u64) -> Result<PlaySession, TrainerError> {
        validate_user_id(user_id)?;
        let view = self.store.scenario_view(scenario_id)?;
        if !view.scenario.is_active {
            return Err(TrainerError::NotFound(format!("scenario: {}", scenario_id)));
        }
        if !progression::is_level_unlocked(&self.store, user_id, &view.level_code)? {
            return Err(TrainerError::PermissionDenied(format!(
                "level {} is locked",
                view.level_code
            )));
        }
        let total_steps = self.store.steps_count(scenario_id)? as u32;
        if total_steps == 0 {
            return Err(TrainerError::InvalidState(format!(
                "scenario {} has no steps",
                scenario_id
            )));
        }
        Ok(PlaySession {
            user_id: user_id.to_string(),
            scenario_id,
            total_steps,
            max_score: self.store.max_score(scenario_id)?,
            timer_seconds: view.scenario.timer_seconds,
            state: SessionState::AwaitingStep(1),
            loyalty: view.scenario.initial_loyalty,
            score: 0,
            trace: Vec::with_capacity(total_steps as usize),
            timeout_count: 0,
        })
    }

    /// Step content with answers stripped of correctness metadata.
    pub fn get_step(&self, scenario_id: u64, step_num: u32) -> Result<StepView, TrainerError> {
        self.observe(self.load_step(scenario_id, step_num))
    }

    fn load_step(&self, scenario_id: u64, step_num: u32) -> Result<StepView, TrainerError> {
        let scenario = self.store.get_scenario(scenario_id)?;
        let step = self.store.step_by_num(scenario_id, step_num)?;
        let answers = self
            .store
            .step_answers(step.id)?
            .into_iter()
            .map(|a| AnswerChoice {
                id: a.id,
                answer_text: a.answer_text,
                order_num: a.order_num,
            })
            .collect();
        let client_info = scenario
            .client_info
            .as_ref()
            .map(|payload| payload.to_value())
            .transpose()?;
        Ok(StepView {
            id: step.id,
            step_num: step.step_num,
            total_steps: self.store.steps_count(scenario_id)? as u32,
            client_message: step.client_message,
            client_avatar: step.client_avatar,
            client_name: step.client_name,
            initial_mood: step.initial_mood,
            answers,
            timer_seconds: scenario.timer_seconds,
            initial_loyalty: scenario.initial_loyalty,
            client_info,
        })
    }

    /// Score one step. Read-only: retrying the same submission yields the same outcome.
    pub fn submit_answer(&self, submission: &AnswerSubmission) -> Result<AnswerOutcome, TrainerError> {
        self.observe(self.evaluate(submission))
    }

    fn evaluate(&self, submission: &AnswerSubmission) -> Result<AnswerOutcome, TrainerError> {
        validate_range(
            "current_loyalty",
            i64::from(submission.current_loyalty),
            i64::from(LOYALTY_MIN),
            i64::from(LOYALTY_MAX),
        )?;
        let step = self.store.step_by_num(submission.scenario_id, submission.step_num)?;
        let answer = match submission.answer_id {
            Some(answer_id) => Some(
                self.store
                    .step_answers(step.id)?
                    .into_iter()
                    .find(|a| a.id == answer_id)
                    .ok_or_else(|| {
                        TrainerError::NotFound(format!(
                            "answer {} on step {}",
                            answer_id, submission.step_num
                        ))
                    })?,
            ),
            None if submission.is_timeout => None,
            None => return Err(ValidationError::Empty { field: "answer_id" }.into()),
        };

        let mood_impact = effective_mood_impact(
            answer.as_ref().map_or(0, |a| a.mood_impact),
            submission.is_timeout,
        );
        let new_loyalty = apply_mood_impact(submission.current_loyalty, mood_impact);
        let total_steps = self.store.steps_count(submission.scenario_id)? as u32;
        let scored = answer.as_ref().filter(|_| !submission.is_timeout);

        Ok(AnswerOutcome {
            answer_id: submission.answer_id,
            is_correct: scored.is_some_and(|a| a.is_correct),
            is_partial: scored.is_some_and(|a| a.is_partial),
            points_earned: scored.map_or(0, |a| a.points),
            feedback: answer.as_ref().map(|a| a.feedback.clone()).unwrap_or_default(),
            mood_impact,
            new_mood: mood_for_loyalty(new_loyalty),
            new_loyalty,
            knowledge_link: answer.and_then(|a| a.knowledge_link),
            is_game_over: new_loyalty <= LOYALTY_MIN,
            is_last_step: submission.step_num >= total_steps,
        })
    }

    /// Persist exactly one result, update progression and notify.
    ///
    /// Once the result is written the call succeeds: progression and
    /// notification failures are logged, never returned, so a client never
    /// retries into a duplicate result.
    pub fn complete(
        &self,
        user_id: &str,
        scenario_id: u64,
        completion: Completion,
    ) -> Result<CompletionReceipt, TrainerError> {
        let answers = completion.answers_trace.len();
        let timeouts = completion.timeout_count;
        let record = self.observe(results::save_result(&self.store, user_id, scenario_id, completion))?;
        crate::metrics::record_completion(scenario_id, answers, timeouts, record.is_game_over);

        let unlocked_levels = match self.observe(
            self.store
                .get_scenario(scenario_id)
                .and_then(|s| self.store.get_level(s.level_id))
                .and_then(|level| progression::update_user_progress(&self.store, user_id, &level.code)),
        ) {
            Ok(codes) => codes,
            Err(e) => {
                warn!("Progress update failed after result {}: {}", record.id, e);
                Vec::new()
            }
        };

        self.dispatch(NotificationEvent::ScenarioCompleted {
            user_id: user_id.to_string(),
            scenario_id,
            result_id: record.id,
            percent: record.percent,
            grade: record.grade,
            is_game_over: record.is_game_over,
        });
        for level_code in &unlocked_levels {
            self.dispatch(NotificationEvent::LevelUnlocked {
                user_id: user_id.to_string(),
                level_code: level_code.clone(),
            });
        }

        Ok(CompletionReceipt {
            result_id: record.id,
            percent: record.percent,
            grade: record.grade,
            is_game_over: record.is_game_over,
            unlocked_levels,
        })
    }

    fn dispatch(&self, event: NotificationEvent) {
        if let Err(e) = self.sink.notify(Notification::new(event)) {
            warn!("Messaging sink unavailable: {}", e);
        }
    }

    /// Fetch, score and record the current step of `session` in one call.
    pub fn play_step(
        &self,
        session: &mut PlaySession,
        answer_id: Option<u64>,
        response_time_ms: u64,
        is_timeout: bool,
    ) -> Result<AnswerOutcome, TrainerError> {
        let submission = session.submission(answer_id, response_time_ms, is_timeout)?;
        let outcome = self.submit_answer(&submission)?;
        session.record(&submission, &outcome)?;
        Ok(outcome)
    }

    /// Complete a finished session.
    pub fn finish(&self, session: &PlaySession) -> Result<CompletionReceipt, TrainerError> {
        let completion = session.completion()?;
        self.complete(&session.user_id, session.scenario_id, completion)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum SessionState {
    AwaitingStep(u32),
    AnswerSubmitted(u32),
    GameOver,
    Completed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::GameOver | SessionState::Completed)
    }
}

/// Caller-side play-through carrier.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlaySession {
    pub user_id: String,
    pub scenario_id: u64,
    pub total_steps: u32,
    pub max_score: i32,
    pub timer_seconds: u32,
    state: SessionState,
    loyalty: i32,
    score: i32,
    trace: Vec<TraceEntry>,
    timeout_count: u32,
}

impl PlaySession {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn loyalty(&self) -> i32 {
        self.loyalty
    }

    pub fn mood(&self) -> Mood {
        mood_for_loyalty(self.loyalty)
    }

    pub fn score(&self) -> i32 {
        self.score
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn timeout_count(&self) -> u32 {
        self.timeout_count
    }

    /// Step number to fetch next, if the session is waiting for one.
    pub fn current_step(&self) -> Option<u32> {
        match self.state {
            SessionState::AwaitingStep(n) => Some(n),
            _ => None,
        }
    }

    /// Build the submission for the current step using the carried loyalty.
    pub fn submission(
        &self,
        answer_id: Option<u64>,
        response_time_ms: u64,
        is_timeout: bool,
    ) -> Result<AnswerSubmission, TrainerError> {
        let step_num = self.current_step().ok_or_else(|| {
            TrainerError::InvalidState(format!("no step awaiting an answer in state {:?}", self.state))
        })?;
        Ok(AnswerSubmission {
            scenario_id: self.scenario_id,
            step_num,
            answer_id,
            response_time_ms,
            is_timeout,
            current_loyalty: self.loyalty,
        })
    }

    /// Apply a successful outcome. Loyalty at zero ends the session at once.
    pub fn record(
        &mut self,
        submission: &AnswerSubmission,
        outcome: &AnswerOutcome,
    ) -> Result<SessionState, TrainerError> {
        match self.state {
            SessionState::AwaitingStep(n) if n == submission.step_num => {}
            other => {
                return Err(TrainerError::InvalidState(format!(
                    "cannot record step {} in state {:?}",
                    submission.step_num, other
                )))
            }
        }
        self.loyalty = outcome.new_loyalty;
        self.score = self.score.saturating_add(outcome.points_earned);
        if submission.is_timeout {
            self.timeout_count += 1;
        }
        self.trace.push(TraceEntry {
            step_num: submission.step_num,
            answer_id: submission.answer_id,
            points: outcome.points_earned,
            is_correct: outcome.is_correct,
            is_timeout: submission.is_timeout,
            mood_impact: outcome.mood_impact,
        });
        self.state = if outcome.is_game_over || self.loyalty <= LOYALTY_MIN {
            SessionState::GameOver
        } else {
            SessionState::AnswerSubmitted(submission.step_num)
        };
        Ok(self.state)
    }

    /// Move past the feedback of a submitted step.
    pub fn advance(&mut self) -> Result<SessionState, TrainerError> {
        self.state = match self.state {
            SessionState::AnswerSubmitted(n) if n >= self.total_steps => SessionState::Completed,
            SessionState::AnswerSubmitted(n) => SessionState::AwaitingStep(n + 1),
            other => {
                return Err(TrainerError::InvalidState(format!(
                    "cannot advance from {:?}",
                    other
                )))
            }
        };
        Ok(self.state)
    }

    /// The completion payload; only available in a terminal state.
    pub fn completion(&self) -> Result<Completion, TrainerError> {
        if !self.state.is_terminal() {
            return Err(TrainerError::InvalidState(format!(
                "session not finished ({:?})",
                self.state
            )));
        }
        Ok(Completion {
            score: self.score,
            max_score: self.max_score,
            answers_trace: self.trace.clone(),
            final_loyalty: Some(self.loyalty),
            is_game_over: self.state == SessionState::GameOver,
            timeout_count: self.timeout_count,
        })
    }
}
