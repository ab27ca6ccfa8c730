use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trainer::errors::TrainerError;

pub const LEVEL_SCHEMA_VERSION: u8 = 1;
pub const CATEGORY_SCHEMA_VERSION: u8 = 1;
pub const SCENARIO_SCHEMA_VERSION: u8 = 1;
pub const STEP_SCHEMA_VERSION: u8 = 1;
pub const ANSWER_SCHEMA_VERSION: u8 = 1;
pub const RESULT_SCHEMA_VERSION: u8 = 1;
pub const PROGRESS_SCHEMA_VERSION: u8 = 1;

pub const DEFAULT_REQUIRED_PERCENT: u8 = 80;
pub const DEFAULT_ESTIMATED_TIME: u32 = 5;
pub const DEFAULT_TOTAL_POINTS: i32 = 100;
pub const DEFAULT_TIMER_SECONDS: u32 = 15;
pub const DEFAULT_INITIAL_LOYALTY: i32 = 100;
pub const DEFAULT_CLIENT_AVATAR: &str = "👤";
pub const DEFAULT_CLIENT_NAME: &str = "Client";

/// Lower bound of the loyalty scale.
pub const LOYALTY_MIN: i32 = 0;
/// Upper bound of the loyalty scale.
pub const LOYALTY_MAX: i32 = 200;
/// Loyalty delta applied when an operator lets the step timer run out.
pub const TIMEOUT_MOOD_IMPACT: i32 = -20;

/// Implemented by every persisted record so storage can reject stale encodings.
pub trait Versioned {
    const ENTITY: &'static str;
    const SCHEMA_VERSION: u8;
    fn schema_version(&self) -> u8;
}

macro_rules! versioned {
    ($ty:ty, $entity:literal, $version:ident) => {
        impl Versioned for $ty {
            const ENTITY: &'static str = $entity;
            const SCHEMA_VERSION: u8 = $version;
            fn schema_version(&self) -> u8 {
                self.schema_version
            }
        }
    };
}

/// Simulated customer mood, derived from loyalty.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Delight,
    Satisfaction,
    #[default]
    Neutral,
    Irritation,
    Anger,
}

impl Mood {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Delight => "delight",
            Mood::Satisfaction => "satisfaction",
            Mood::Neutral => "neutral",
            Mood::Irritation => "irritation",
            Mood::Anger => "anger",
        }
    }

    /// Lenient parse used by the visual editor and seed files; unknown labels are neutral.
    pub fn parse_lenient(label: &str) -> Mood {
        match label.trim().to_ascii_lowercase().as_str() {
            "delight" => Mood::Delight,
            "satisfaction" => Mood::Satisfaction,
            "irritation" => Mood::Irritation,
            "anger" => Mood::Anger,
            _ => Mood::Neutral,
        }
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse qualitative bucket derived from a result percent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Excellent,
    Good,
    Partial,
    Fail,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::Excellent => "excellent",
            Grade::Good => "good",
            Grade::Partial => "partial",
            Grade::Fail => "fail",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured metadata the engine stores but never interprets
/// (simulated customer card, editor layouts). Kept as JSON text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct OpaquePayload(String);

impl OpaquePayload {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, TrainerError> {
        Ok(Self(serde_json::to_string(value)?))
    }

    pub fn to_value(&self) -> Result<serde_json::Value, TrainerError> {
        Ok(serde_json::from_str(&self.0)?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Level {
    pub id: u64,
    pub name: String,
    /// Unique, human-stable key used by `required_level` references.
    pub code: String,
    pub description: String,
    pub icon: String,
    pub color: String,
    /// Code of the level whose average must be reached first; `None` means always open.
    pub required_level: Option<String>,
    pub required_percent: u8,
    pub order_num: i32,
    pub schema_version: u8,
}
versioned!(Level, "level", LEVEL_SCHEMA_VERSION);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: u64,
    pub name: String,
    pub icon: String,
    pub color: String,
    pub schema_version: u8,
}
versioned!(Category, "category", CATEGORY_SCHEMA_VERSION);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    pub id: u64,
    pub level_id: u64,
    pub category_id: Option<u64>,
    pub title: String,
    pub description: String,
    /// Minutes.
    pub estimated_time: u32,
    pub total_points: i32,
    pub is_active: bool,
    pub order_num: i32,
    /// Per-step answer deadline enforced by the client.
    pub timer_seconds: u32,
    pub initial_loyalty: i32,
    pub client_info: Option<OpaquePayload>,
    pub visual_layout: Option<OpaquePayload>,
    pub created_at: DateTime<Utc>,
    pub schema_version: u8,
}
versioned!(Scenario, "scenario", SCENARIO_SCHEMA_VERSION);

/// Scenario joined with its level and category names for listings.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScenarioView {
    #[serde(flatten)]
    pub scenario: Scenario,
    pub level_name: String,
    pub level_code: String,
    pub category_name: Option<String>,
    pub category_icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: u64,
    pub scenario_id: u64,
    /// 1-based, dense and unique within the scenario.
    pub step_num: u32,
    pub client_message: String,
    pub client_avatar: String,
    pub client_name: String,
    pub initial_mood: Mood,
    pub schema_version: u8,
}
versioned!(Step, "step", STEP_SCHEMA_VERSION);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub id: u64,
    pub step_id: u64,
    pub answer_text: String,
    pub is_correct: bool,
    pub is_partial: bool,
    pub points: i32,
    pub feedback: String,
    /// Signed loyalty delta applied when this answer is chosen in time.
    pub mood_impact: i32,
    pub order_num: i32,
    pub knowledge_link: Option<String>,
    pub schema_version: u8,
}
versioned!(Answer, "answer", ANSWER_SCHEMA_VERSION);

/// One step of a play-through as reported by the client on completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceEntry {
    pub step_num: u32,
    /// `None` when the step timed out without any selection.
    #[serde(default)]
    pub answer_id: Option<u64>,
    #[serde(default)]
    pub points: i32,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub is_timeout: bool,
    #[serde(default)]
    pub mood_impact: i32,
}

/// One persisted, scored completion of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    pub id: u64,
    pub user_id: String,
    pub scenario_id: u64,
    pub score: i32,
    pub max_score: i32,
    pub percent: u8,
    pub grade: Grade,
    pub completed_at: DateTime<Utc>,
    pub answers_trace: Vec<TraceEntry>,
    pub final_loyalty: Option<i32>,
    pub is_game_over: bool,
    pub timeout_count: u32,
    pub schema_version: u8,
}
versioned!(ResultRecord, "result", RESULT_SCHEMA_VERSION);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserLevelProgress {
    pub user_id: String,
    pub level_code: String,
    pub scenarios_completed: u32,
    pub scenarios_total: u32,
    /// Monotonic: once true it is never written back as false.
    pub is_unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub schema_version: u8,
}
versioned!(UserLevelProgress, "progress", PROGRESS_SCHEMA_VERSION);

impl UserLevelProgress {
    pub fn new(user_id: &str, level_code: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            level_code: level_code.to_string(),
            scenarios_completed: 0,
            scenarios_total: 0,
            is_unlocked: false,
            unlocked_at: None,
            schema_version: PROGRESS_SCHEMA_VERSION,
        }
    }
}

// ---------------------------------------------------------------------------
// Administrative inputs. Drafts double as the seed-file format, so every field
// that has a sensible default is `#[serde(default)]`.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LevelDraft {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub required_level: Option<String>,
    #[serde(default = "default_required_percent")]
    pub required_percent: u8,
    #[serde(default)]
    pub order_num: i32,
}

fn default_required_percent() -> u8 {
    DEFAULT_REQUIRED_PERCENT
}

impl LevelDraft {
    pub fn new(name: &str, code: &str) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
            description: String::new(),
            icon: String::new(),
            color: None,
            required_level: None,
            required_percent: DEFAULT_REQUIRED_PERCENT,
            order_num: 0,
        }
    }

    pub fn requires(mut self, level_code: &str, percent: u8) -> Self {
        self.required_level = Some(level_code.to_string());
        self.required_percent = percent;
        self
    }

    pub fn with_order(mut self, order_num: i32) -> Self {
        self.order_num = order_num;
        self
    }
}

/// Partial level update. `required_level: Some(None)` clears the prerequisite.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LevelPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub required_level: Option<Option<String>>,
    pub required_percent: Option<u8>,
    pub order_num: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryDraft {
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: Option<String>,
}

impl CategoryDraft {
    pub fn new(name: &str, icon: &str, color: &str) -> Self {
        Self {
            name: name.to_string(),
            icon: icon.to_string(),
            color: Some(color.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioDraft {
    pub level_id: u64,
    #[serde(default)]
    pub category_id: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_estimated_time")]
    pub estimated_time: u32,
    #[serde(default = "default_total_points")]
    pub total_points: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub order_num: i32,
    #[serde(default = "default_timer_seconds")]
    pub timer_seconds: u32,
    #[serde(default = "default_initial_loyalty")]
    pub initial_loyalty: i32,
    #[serde(default)]
    pub client_info: Option<serde_json::Value>,
}

fn default_estimated_time() -> u32 {
    DEFAULT_ESTIMATED_TIME
}

fn default_total_points() -> i32 {
    DEFAULT_TOTAL_POINTS
}

fn default_true() -> bool {
    true
}

fn default_timer_seconds() -> u32 {
    DEFAULT_TIMER_SECONDS
}

fn default_initial_loyalty() -> i32 {
    DEFAULT_INITIAL_LOYALTY
}

impl ScenarioDraft {
    pub fn new(level_id: u64, title: &str) -> Self {
        Self {
            level_id,
            category_id: None,
            title: title.to_string(),
            description: String::new(),
            estimated_time: DEFAULT_ESTIMATED_TIME,
            total_points: DEFAULT_TOTAL_POINTS,
            is_active: true,
            order_num: 0,
            timer_seconds: DEFAULT_TIMER_SECONDS,
            initial_loyalty: DEFAULT_INITIAL_LOYALTY,
            client_info: None,
        }
    }

    pub fn with_category(mut self, category_id: u64) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn with_initial_loyalty(mut self, loyalty: i32) -> Self {
        self.initial_loyalty = loyalty;
        self
    }

    pub fn with_order(mut self, order_num: i32) -> Self {
        self.order_num = order_num;
        self
    }
}

/// Partial scenario update. Nested options clear nullable fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScenarioPatch {
    pub level_id: Option<u64>,
    pub category_id: Option<Option<u64>>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub estimated_time: Option<u32>,
    pub total_points: Option<i32>,
    pub is_active: Option<bool>,
    pub order_num: Option<i32>,
    pub timer_seconds: Option<u32>,
    pub initial_loyalty: Option<i32>,
    pub client_info: Option<Option<serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepDraft {
    pub client_message: String,
    #[serde(default)]
    pub client_avatar: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub initial_mood: Option<Mood>,
}

impl StepDraft {
    pub fn new(client_message: &str) -> Self {
        Self {
            client_message: client_message.to_string(),
            ..Self::default()
        }
    }
}

/// Step update. Step numbers are assigned by the store and cannot be patched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepPatch {
    pub client_message: Option<String>,
    pub client_avatar: Option<String>,
    pub client_name: Option<String>,
    pub initial_mood: Option<Mood>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnswerDraft {
    pub answer_text: String,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub is_partial: bool,
    #[serde(default)]
    pub points: i32,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub mood_impact: i32,
    #[serde(default)]
    pub order_num: i32,
    #[serde(default)]
    pub knowledge_link: Option<String>,
}

impl AnswerDraft {
    pub fn new(answer_text: &str, points: i32, mood_impact: i32) -> Self {
        Self {
            answer_text: answer_text.to_string(),
            points,
            mood_impact,
            ..Self::default()
        }
    }

    pub fn correct(mut self) -> Self {
        self.is_correct = true;
        self
    }

    pub fn partial(mut self) -> Self {
        self.is_partial = true;
        self
    }

    pub fn with_feedback(mut self, feedback: &str) -> Self {
        self.feedback = feedback.to_string();
        self
    }

    pub fn with_order(mut self, order_num: i32) -> Self {
        self.order_num = order_num;
        self
    }
}

/// Partial answer update. `knowledge_link: Some(None)` clears the link.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnswerPatch {
    pub answer_text: Option<String>,
    pub is_correct: Option<bool>,
    pub is_partial: Option<bool>,
    pub points: Option<i32>,
    pub feedback: Option<String>,
    pub mood_impact: Option<i32>,
    pub order_num: Option<i32>,
    pub knowledge_link: Option<Option<String>>,
}
