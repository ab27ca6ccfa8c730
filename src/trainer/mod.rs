//! Operator-training core: the scenario content graph, level progression,
//! the play-session state machine and the result log with its statistics.

pub mod editor;
pub mod errors;
pub mod notify;
pub mod progression;
pub mod results;
pub mod seed;
pub mod session;
pub mod stats;
pub mod storage;
pub mod types;

pub use editor::{load_layout, save_layout, EditorLayout, SaveSummary};
pub use errors::TrainerError;
pub use notify::{
    spawn_dispatcher, ChannelSink, IdentityProvider, LogSink, MessagingSink, Notification,
    NotificationEvent, StaticIdentity,
};
pub use progression::{
    evaluate_unlock, is_level_unlocked, update_user_progress, user_progress, ProgressOverview,
    UnlockState,
};
pub use results::{
    best_result, grade, grade_info, percent_for, result_detail, save_result, user_results,
    Completion, GradeInfo, ResultDetail,
};
pub use seed::{apply_seed, install_defaults, load_seed_file, SeedFile, SeedReport};
pub use session::{
    apply_mood_impact, mood_for_loyalty, AnswerOutcome, AnswerSubmission, CompletionReceipt,
    PlaySession, SessionEngine, SessionState, StepView,
};
pub use stats::{overview, scenario_stats, ScenarioStats, TrainerStats};
pub use storage::{TrainerStore, TrainerStoreBuilder};
pub use types::*;
