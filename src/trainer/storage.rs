use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, Transactional};
use sled::Batch;

use crate::trainer::errors::TrainerError;
use crate::trainer::types::{
    Answer, AnswerDraft, AnswerPatch, Category, CategoryDraft, CategoryPatch, Level, LevelDraft,
    LevelPatch, OpaquePayload, ResultRecord, Scenario, ScenarioDraft, ScenarioPatch, ScenarioView,
    Step, StepDraft, StepPatch, UserLevelProgress, Versioned, ANSWER_SCHEMA_VERSION,
    CATEGORY_SCHEMA_VERSION, DEFAULT_CLIENT_AVATAR, DEFAULT_CLIENT_NAME, LEVEL_SCHEMA_VERSION,
    LOYALTY_MAX, PROGRESS_SCHEMA_VERSION, RESULT_SCHEMA_VERSION, SCENARIO_SCHEMA_VERSION,
    STEP_SCHEMA_VERSION,
};
use crate::validation::{
    required_text, sanitize_text, validate_color, validate_icon, validate_level_code,
    validate_range, validate_title, validate_user_id, ValidationError, MAX_LINK_LEN, MAX_TEXT_LEN,
};

const TREE_CONTENT: &str = "trainer_content";
const TREE_RESULTS: &str = "trainer_results";
const TREE_PROGRESS: &str = "trainer_progress";

const PROGRESS_LOCK_SHARDS: usize = 32;

/// Separates a free-form user id from the rest of a key. User ids never
/// contain control characters (see `validate_user_id`).
const USER_KEY_SEP: char = '\u{0}';

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct TrainerStoreBuilder {
    path: PathBuf,
    seed_defaults: bool,
}

impl TrainerStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seed_defaults: true,
        }
    }

    /// Opt out of seeding default levels, categories and sample scenarios.
    pub fn without_default_seed(mut self) -> Self {
        self.seed_defaults = false;
        self
    }

    pub fn open(self) -> Result<TrainerStore, TrainerError> {
        TrainerStore::open_with_options(self.path, self.seed_defaults)
    }
}

/// Sled-backed persistence for trainer content, results and per-user progress.
///
/// The handle is `Send + Sync`; share it as `Arc<TrainerStore>`. Gameplay reads
/// never take a crate-level lock. Administrative writes serialize on the
/// content gate's write side, result appends share its read side so they
/// never block each other, and progress rows are serialized per
/// `(user, level_code)` shard.
pub struct TrainerStore {
    db: sled::Db,
    content: sled::Tree,
    results: sled::Tree,
    progress: sled::Tree,
    content_gate: RwLock<()>,
    progress_locks: Vec<Mutex<()>>,
}

impl TrainerStore {
    /// Open (or create) the store rooted at `path`, seeding default content into an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TrainerError> {
        Self::open_with_options(path, true)
    }

    fn open_with_options<P: AsRef<Path>>(path: P, seed_defaults: bool) -> Result<Self, TrainerError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let content = db.open_tree(TREE_CONTENT)?;
        let results = db.open_tree(TREE_RESULTS)?;
        let progress = db.open_tree(TREE_PROGRESS)?;
        let store = Self {
            db,
            content,
            results,
            progress,
            content_gate: RwLock::new(()),
            progress_locks: (0..PROGRESS_LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
        };
        info!("Opened trainer store at {}", path_ref.display());

        if seed_defaults {
            let seeded = store.seed_defaults_if_needed()?;
            if seeded > 0 {
                info!("Seeded {} default trainer records", seeded);
            }
        }

        Ok(store)
    }

    /// Insert default levels, categories and sample scenarios when no level exists yet.
    pub fn seed_defaults_if_needed(&self) -> Result<usize, TrainerError> {
        if self.content.scan_prefix(b"levels:").next().is_some() {
            return Ok(0);
        }
        crate::trainer::seed::install_defaults(self)
    }

    pub fn flush(&self) -> Result<(), TrainerError> {
        self.db.flush()?;
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Keys
    // ----------------------------------------------------------------------

    fn level_key(id: u64) -> Vec<u8> {
        format!("levels:{:020}", id).into_bytes()
    }

    fn level_code_key(code: &str) -> Vec<u8> {
        format!("level_codes:{}", code).into_bytes()
    }

    fn category_key(id: u64) -> Vec<u8> {
        format!("categories:{:020}", id).into_bytes()
    }

    fn scenario_key(id: u64) -> Vec<u8> {
        format!("scenarios:{:020}", id).into_bytes()
    }

    fn level_scenarios_prefix(level_id: u64) -> Vec<u8> {
        format!("level_scenarios:{:020}:", level_id).into_bytes()
    }

    fn level_scenario_key(level_id: u64, scenario_id: u64) -> Vec<u8> {
        format!("level_scenarios:{:020}:{:020}", level_id, scenario_id).into_bytes()
    }

    fn step_key(id: u64) -> Vec<u8> {
        format!("steps:{:020}", id).into_bytes()
    }

    fn scenario_steps_prefix(scenario_id: u64) -> Vec<u8> {
        format!("scenario_steps:{:020}:", scenario_id).into_bytes()
    }

    fn scenario_step_key(scenario_id: u64, step_num: u32) -> Vec<u8> {
        format!("scenario_steps:{:020}:{:010}", scenario_id, step_num).into_bytes()
    }

    fn answer_key(id: u64) -> Vec<u8> {
        format!("answers:{:020}", id).into_bytes()
    }

    fn step_answers_prefix(step_id: u64) -> Vec<u8> {
        format!("step_answers:{:020}:", step_id).into_bytes()
    }

    fn step_answer_key(step_id: u64, answer_id: u64) -> Vec<u8> {
        format!("step_answers:{:020}:{:020}", step_id, answer_id).into_bytes()
    }

    fn result_key(id: u64) -> Vec<u8> {
        format!("results:{:020}", id).into_bytes()
    }

    fn user_results_prefix(user_id: &str) -> Vec<u8> {
        format!("user_results:{}{}", user_id, USER_KEY_SEP).into_bytes()
    }

    fn user_result_key(user_id: &str, result_id: u64) -> Vec<u8> {
        format!("user_results:{}{}{:020}", user_id, USER_KEY_SEP, result_id).into_bytes()
    }

    fn scenario_results_prefix(scenario_id: u64) -> Vec<u8> {
        format!("scenario_results:{:020}:", scenario_id).into_bytes()
    }

    fn scenario_result_key(scenario_id: u64, result_id: u64) -> Vec<u8> {
        format!("scenario_results:{:020}:{:020}", scenario_id, result_id).into_bytes()
    }

    fn progress_prefix(user_id: &str) -> Vec<u8> {
        format!("progress:{}{}", user_id, USER_KEY_SEP).into_bytes()
    }

    fn progress_key(user_id: &str, level_code: &str) -> Vec<u8> {
        format!("progress:{}{}{}", user_id, USER_KEY_SEP, level_code).into_bytes()
    }

    // ----------------------------------------------------------------------
    // Encoding helpers
    // ----------------------------------------------------------------------

    fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, TrainerError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: DeserializeOwned + Versioned>(bytes: &[u8]) -> Result<T, TrainerError> {
        let record: T = bincode::deserialize(bytes)?;
        if record.schema_version() != T::SCHEMA_VERSION {
            return Err(TrainerError::SchemaMismatch {
                entity: T::ENTITY,
                expected: T::SCHEMA_VERSION,
                found: record.schema_version(),
            });
        }
        Ok(record)
    }

    fn fetch<T: DeserializeOwned + Versioned>(
        tree: &sled::Tree,
        key: &[u8],
    ) -> Result<Option<T>, TrainerError> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_records<T: DeserializeOwned + Versioned>(
        tree: &sled::Tree,
        prefix: &[u8],
    ) -> Result<Vec<T>, TrainerError> {
        tree.scan_prefix(prefix)
            .map(|entry| {
                let (_key, value) = entry?;
                Self::deserialize(&value)
            })
            .collect()
    }

    /// Index entries store the target id as big-endian bytes.
    fn scan_index(tree: &sled::Tree, prefix: &[u8]) -> Result<Vec<u64>, TrainerError> {
        tree.scan_prefix(prefix)
            .map(|entry| {
                let (_key, value) = entry?;
                decode_id(&value)
            })
            .collect()
    }

    fn next_id(&self) -> Result<u64, TrainerError> {
        Ok(self.db.generate_id()? + 1)
    }

    fn admin_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.content_gate.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn append_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.content_gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialize read-modify-write of one `(user, level_code)` progress row.
    pub fn progress_guard(&self, user_id: &str, level_code: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        level_code.hash(&mut hasher);
        let shard = (hasher.finish() as usize) % self.progress_locks.len();
        self.progress_locks[shard]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ----------------------------------------------------------------------
    // Levels
    // ----------------------------------------------------------------------

    pub fn create_level(&self, draft: LevelDraft) -> Result<Level, TrainerError> {
        let code = validate_level_code(&draft.code)?;
        let name = validate_title("name", &draft.name)?;
        let description = sanitize_text("description", &draft.description, MAX_TEXT_LEN)?;
        let icon = validate_icon("icon", &draft.icon)?;
        let color = optional_color(draft.color.as_deref())?;
        validate_range("required_percent", i64::from(draft.required_percent), 0, 100)?;
        let required_level = draft
            .required_level
            .as_deref()
            .map(validate_level_code)
            .transpose()?;

        let _guard = self.admin_guard();
        if self.content.contains_key(Self::level_code_key(&code))? {
            return Err(TrainerError::ConstraintViolation(format!(
                "level code already exists: {}",
                code
            )));
        }
        if let Some(required) = &required_level {
            self.ensure_level_code_exists(required)?;
        }

        let level = Level {
            id: self.next_id()?,
            name,
            code,
            description,
            icon,
            color,
            required_level,
            required_percent: draft.required_percent,
            order_num: draft.order_num,
            schema_version: LEVEL_SCHEMA_VERSION,
        };
        let mut batch = Batch::default();
        batch.insert(Self::level_key(level.id), Self::serialize(&level)?);
        batch.insert(Self::level_code_key(&level.code), level.id.to_be_bytes().to_vec());
        self.content.apply_batch(batch)?;
        self.content.flush()?;
        info!("Created level {} ({})", level.code, level.id);
        Ok(level)
    }

    /// Update a level. The code is immutable: prerequisites and progress rows refer to it.
    pub fn update_level(&self, level_id: u64, patch: LevelPatch) -> Result<Level, TrainerError> {
        if patch == LevelPatch::default() {
            return Err(ValidationError::NoChanges.into());
        }
        let _guard = self.admin_guard();
        let mut level = self.get_level(level_id)?;
        if let Some(name) = patch.name {
            level.name = validate_title("name", &name)?;
        }
        if let Some(description) = patch.description {
            level.description = sanitize_text("description", &description, MAX_TEXT_LEN)?;
        }
        if let Some(icon) = patch.icon {
            level.icon = validate_icon("icon", &icon)?;
        }
        if let Some(color) = patch.color {
            level.color = optional_color(Some(&color))?;
        }
        if let Some(required) = patch.required_level {
            level.required_level = match required {
                Some(code) => {
                    let code = validate_level_code(&code)?;
                    self.ensure_level_code_exists(&code)?;
                    Some(code)
                }
                None => None,
            };
        }
        if let Some(percent) = patch.required_percent {
            validate_range("required_percent", i64::from(percent), 0, 100)?;
            level.required_percent = percent;
        }
        if let Some(order_num) = patch.order_num {
            level.order_num = order_num;
        }
        self.content
            .insert(Self::level_key(level.id), Self::serialize(&level)?)?;
        self.content.flush()?;
        Ok(level)
    }

    /// Delete a level that owns no scenarios and is not required by another level.
    pub fn delete_level(&self, level_id: u64) -> Result<(), TrainerError> {
        let _guard = self.admin_guard();
        let level = self.get_level(level_id)?;
        if self
            .content
            .scan_prefix(Self::level_scenarios_prefix(level_id))
            .next()
            .is_some()
        {
            return Err(TrainerError::ConstraintViolation(format!(
                "level {} still has scenarios",
                level.code
            )));
        }
        if let Some(dependent) = self
            .list_levels()?
            .into_iter()
            .find(|other| other.required_level.as_deref() == Some(level.code.as_str()))
        {
            return Err(TrainerError::ConstraintViolation(format!(
                "level {} is required by level {}",
                level.code, dependent.code
            )));
        }

        let mut content_batch = Batch::default();
        content_batch.remove(Self::level_key(level_id));
        content_batch.remove(Self::level_code_key(&level.code));
        self.content.apply_batch(content_batch)?;

        let mut progress_batch = Batch::default();
        for entry in self.progress.iter() {
            let (key, value) = entry?;
            let row: UserLevelProgress = Self::deserialize(&value)?;
            if row.level_code == level.code {
                progress_batch.remove(key);
            }
        }
        self.progress.apply_batch(progress_batch)?;
        self.flush()?;
        info!("Deleted level {} ({})", level.code, level_id);
        Ok(())
    }

    pub fn get_level(&self, level_id: u64) -> Result<Level, TrainerError> {
        Self::fetch(&self.content, &Self::level_key(level_id))?
            .ok_or_else(|| TrainerError::NotFound(format!("level: {}", level_id)))
    }

    pub fn find_level_by_code(&self, code: &str) -> Result<Option<Level>, TrainerError> {
        match self.content.get(Self::level_code_key(code))? {
            Some(id) => Ok(Some(self.get_level(decode_id(&id)?)?)),
            None => Ok(None),
        }
    }

    pub fn get_level_by_code(&self, code: &str) -> Result<Level, TrainerError> {
        self.find_level_by_code(code)?
            .ok_or_else(|| TrainerError::NotFound(format!("level: {}", code)))
    }

    /// All levels ordered by `order_num`.
    pub fn list_levels(&self) -> Result<Vec<Level>, TrainerError> {
        let mut levels: Vec<Level> = Self::scan_records(&self.content, b"levels:")?;
        levels.sort_by_key(|level| (level.order_num, level.id));
        Ok(levels)
    }

    fn ensure_level_code_exists(&self, code: &str) -> Result<(), TrainerError> {
        if self.content.contains_key(Self::level_code_key(code))? {
            Ok(())
        } else {
            Err(TrainerError::ConstraintViolation(format!(
                "required level does not exist: {}",
                code
            )))
        }
    }

    // ----------------------------------------------------------------------
    // Categories
    // ----------------------------------------------------------------------

    pub fn create_category(&self, draft: CategoryDraft) -> Result<Category, TrainerError> {
        let name = validate_title("name", &draft.name)?;
        let icon = validate_icon("icon", &draft.icon)?;
        let color = optional_color(draft.color.as_deref())?;

        let _guard = self.admin_guard();
        let category = Category {
            id: self.next_id()?,
            name,
            icon,
            color,
            schema_version: CATEGORY_SCHEMA_VERSION,
        };
        self.content
            .insert(Self::category_key(category.id), Self::serialize(&category)?)?;
        self.content.flush()?;
        Ok(category)
    }

    pub fn update_category(&self, category_id: u64, patch: CategoryPatch) -> Result<Category, TrainerError> {
        if patch == CategoryPatch::default() {
            return Err(ValidationError::NoChanges.into());
        }
        let _guard = self.admin_guard();
        let mut category = self.get_category(category_id)?;
        if let Some(name) = patch.name {
            category.name = validate_title("name", &name)?;
        }
        if let Some(icon) = patch.icon {
            category.icon = validate_icon("icon", &icon)?;
        }
        if let Some(color) = patch.color {
            category.color = optional_color(Some(&color))?;
        }
        self.content
            .insert(Self::category_key(category.id), Self::serialize(&category)?)?;
        self.content.flush()?;
        Ok(category)
    }

    /// Delete a category and clear it from every scenario that referenced it.
    pub fn delete_category(&self, category_id: u64) -> Result<usize, TrainerError> {
        let _guard = self.admin_guard();
        self.get_category(category_id)?;
        let mut batch = Batch::default();
        batch.remove(Self::category_key(category_id));
        let mut cleared = 0usize;
        for mut scenario in Self::scan_records::<Scenario>(&self.content, b"scenarios:")? {
            if scenario.category_id == Some(category_id) {
                scenario.category_id = None;
                batch.insert(Self::scenario_key(scenario.id), Self::serialize(&scenario)?);
                cleared += 1;
            }
        }
        self.content.apply_batch(batch)?;
        self.content.flush()?;
        debug!("Deleted category {} (cleared on {} scenarios)", category_id, cleared);
        Ok(cleared)
    }

    pub fn get_category(&self, category_id: u64) -> Result<Category, TrainerError> {
        Self::fetch(&self.content, &Self::category_key(category_id))?
            .ok_or_else(|| TrainerError::NotFound(format!("category: {}", category_id)))
    }

    pub fn list_categories(&self) -> Result<Vec<Category>, TrainerError> {
        Self::scan_records(&self.content, b"categories:")
    }

    // ----------------------------------------------------------------------
    // Scenarios
    // ----------------------------------------------------------------------

    pub fn create_scenario(&self, draft: ScenarioDraft) -> Result<Scenario, TrainerError> {
        let title = validate_title("title", &draft.title)?;
        let description = sanitize_text("description", &draft.description, MAX_TEXT_LEN)?;
        validate_scenario_numbers(
            draft.estimated_time,
            draft.total_points,
            draft.timer_seconds,
            draft.initial_loyalty,
        )?;
        let client_info = draft
            .client_info
            .as_ref()
            .map(OpaquePayload::from_value)
            .transpose()?;

        let _guard = self.admin_guard();
        self.ensure_scenario_refs(draft.level_id, draft.category_id)?;
        let scenario = Scenario {
            id: self.next_id()?,
            level_id: draft.level_id,
            category_id: draft.category_id,
            title,
            description,
            estimated_time: draft.estimated_time,
            total_points: draft.total_points,
            is_active: draft.is_active,
            order_num: draft.order_num,
            timer_seconds: draft.timer_seconds,
            initial_loyalty: draft.initial_loyalty,
            client_info,
            visual_layout: None,
            created_at: Utc::now(),
            schema_version: SCENARIO_SCHEMA_VERSION,
        };
        let mut batch = Batch::default();
        batch.insert(Self::scenario_key(scenario.id), Self::serialize(&scenario)?);
        batch.insert(
            Self::level_scenario_key(scenario.level_id, scenario.id),
            scenario.id.to_be_bytes().to_vec(),
        );
        self.content.apply_batch(batch)?;
        self.content.flush()?;
        info!(
            "Created scenario {} '{}'",
            scenario.id,
            crate::validation::log_preview(&scenario.title)
        );
        Ok(scenario)
    }

    pub fn update_scenario(&self, scenario_id: u64, patch: ScenarioPatch) -> Result<Scenario, TrainerError> {
        if patch == ScenarioPatch::default() {
            return Err(ValidationError::NoChanges.into());
        }
        let _guard = self.admin_guard();
        let mut scenario = self.get_scenario(scenario_id)?;
        let previous_level = scenario.level_id;
        if let Some(level_id) = patch.level_id {
            scenario.level_id = level_id;
        }
        if let Some(category_id) = patch.category_id {
            scenario.category_id = category_id;
        }
        if let Some(title) = patch.title {
            scenario.title = validate_title("title", &title)?;
        }
        if let Some(description) = patch.description {
            scenario.description = sanitize_text("description", &description, MAX_TEXT_LEN)?;
        }
        if let Some(estimated_time) = patch.estimated_time {
            scenario.estimated_time = estimated_time;
        }
        if let Some(total_points) = patch.total_points {
            scenario.total_points = total_points;
        }
        if let Some(is_active) = patch.is_active {
            scenario.is_active = is_active;
        }
        if let Some(order_num) = patch.order_num {
            scenario.order_num = order_num;
        }
        if let Some(timer_seconds) = patch.timer_seconds {
            scenario.timer_seconds = timer_seconds;
        }
        if let Some(initial_loyalty) = patch.initial_loyalty {
            scenario.initial_loyalty = initial_loyalty;
        }
        if let Some(client_info) = patch.client_info {
            scenario.client_info = client_info
                .as_ref()
                .map(OpaquePayload::from_value)
                .transpose()?;
        }
        validate_scenario_numbers(
            scenario.estimated_time,
            scenario.total_points,
            scenario.timer_seconds,
            scenario.initial_loyalty,
        )?;
        self.ensure_scenario_refs(scenario.level_id, scenario.category_id)?;

        let mut batch = Batch::default();
        batch.insert(Self::scenario_key(scenario.id), Self::serialize(&scenario)?);
        if previous_level != scenario.level_id {
            batch.remove(Self::level_scenario_key(previous_level, scenario.id));
            batch.insert(
                Self::level_scenario_key(scenario.level_id, scenario.id),
                scenario.id.to_be_bytes().to_vec(),
            );
        }
        self.content.apply_batch(batch)?;
        self.content.flush()?;
        Ok(scenario)
    }

    /// Delete a scenario together with its steps, their answers and every
    /// historical result. Content and results are removed in one transaction.
    pub fn delete_scenario(&self, scenario_id: u64) -> Result<(), TrainerError> {
        let _guard = self.admin_guard();
        let scenario = self.get_scenario(scenario_id)?;

        let mut content_batch = Batch::default();
        content_batch.remove(Self::scenario_key(scenario_id));
        content_batch.remove(Self::level_scenario_key(scenario.level_id, scenario_id));
        let steps = self.scenario_steps(scenario_id)?;
        let mut answers_removed = 0usize;
        for step in &steps {
            content_batch.remove(Self::step_key(step.id));
            content_batch.remove(Self::scenario_step_key(scenario_id, step.step_num));
            for answer_id in Self::scan_index(&self.content, &Self::step_answers_prefix(step.id))? {
                content_batch.remove(Self::answer_key(answer_id));
                content_batch.remove(Self::step_answer_key(step.id, answer_id));
                answers_removed += 1;
            }
        }

        let mut results_batch = Batch::default();
        let results = self.results_for_scenario(scenario_id)?;
        for result in &results {
            results_batch.remove(Self::result_key(result.id));
            results_batch.remove(Self::user_result_key(&result.user_id, result.id));
            results_batch.remove(Self::scenario_result_key(scenario_id, result.id));
        }

        (&self.content, &self.results).transaction(|(content, results)| {
            content.apply_batch(&content_batch)?;
            results.apply_batch(&results_batch)?;
            Ok::<(), ConflictableTransactionError<TrainerError>>(())
        })?;
        self.flush()?;
        info!(
            "Deleted scenario {} ({} steps, {} answers, {} results)",
            scenario_id,
            steps.len(),
            answers_removed,
            results.len()
        );
        Ok(())
    }

    pub fn get_scenario(&self, scenario_id: u64) -> Result<Scenario, TrainerError> {
        Self::fetch(&self.content, &Self::scenario_key(scenario_id))?
            .ok_or_else(|| TrainerError::NotFound(format!("scenario: {}", scenario_id)))
    }

    /// Scenario with its denormalized level and category names.
    pub fn scenario_view(&self, scenario_id: u64) -> Result<ScenarioView, TrainerError> {
        let scenario = self.get_scenario(scenario_id)?;
        let level = self.get_level(scenario.level_id)?;
        let category = match scenario.category_id {
            Some(id) => Self::fetch::<Category>(&self.content, &Self::category_key(id))?,
            None => None,
        };
        Ok(join_view(scenario, &level, category.as_ref()))
    }

    /// Active scenarios of a level ordered by `order_num`, optionally filtered by category.
    /// An unknown level code yields an empty list.
    pub fn scenarios_by_level(
        &self,
        level_code: &str,
        category_id: Option<u64>,
    ) -> Result<Vec<ScenarioView>, TrainerError> {
        let Some(level) = self.find_level_by_code(level_code)? else {
            return Ok(Vec::new());
        };
        let categories = self.category_map()?;
        let mut scenarios: Vec<Scenario> = self
            .level_scenarios(level.id)?
            .into_iter()
            .filter(|s| s.is_active)
            .filter(|s| category_id.map_or(true, |c| s.category_id == Some(c)))
            .collect();
        scenarios.sort_by_key(|s| (s.order_num, s.id));
        Ok(scenarios
            .into_iter()
            .map(|s| {
                let category = s.category_id.and_then(|id| categories.get(&id));
                join_view(s, &level, category)
            })
            .collect())
    }

    /// Every scenario ordered by level order, then scenario order.
    pub fn all_scenarios(&self, include_inactive: bool) -> Result<Vec<ScenarioView>, TrainerError> {
        let levels: HashMap<u64, Level> = self
            .list_levels()?
            .into_iter()
            .map(|level| (level.id, level))
            .collect();
        let categories = self.category_map()?;
        let mut views = Vec::new();
        for scenario in Self::scan_records::<Scenario>(&self.content, b"scenarios:")? {
            if !include_inactive && !scenario.is_active {
                continue;
            }
            let Some(level) = levels.get(&scenario.level_id) else {
                continue;
            };
            let category = scenario.category_id.and_then(|id| categories.get(&id));
            views.push(join_view(scenario, level, category));
        }
        views.sort_by_key(|view| {
            let level_order = levels
                .get(&view.scenario.level_id)
                .map_or(i32::MAX, |level| level.order_num);
            (level_order, view.scenario.order_num, view.scenario.id)
        });
        Ok(views)
    }

    /// All scenarios (active or not) belonging to a level.
    pub fn level_scenarios(&self, level_id: u64) -> Result<Vec<Scenario>, TrainerError> {
        Self::scan_index(&self.content, &Self::level_scenarios_prefix(level_id))?
            .into_iter()
            .map(|id| self.get_scenario(id))
            .collect()
    }

    /// Replace the opaque editor layout stored on a scenario.
    pub fn set_visual_layout(
        &self,
        scenario_id: u64,
        layout: Option<OpaquePayload>,
    ) -> Result<(), TrainerError> {
        let _guard = self.admin_guard();
        let mut scenario = self.get_scenario(scenario_id)?;
        scenario.visual_layout = layout;
        self.content
            .insert(Self::scenario_key(scenario_id), Self::serialize(&scenario)?)?;
        self.content.flush()?;
        Ok(())
    }

    fn category_map(&self) -> Result<HashMap<u64, Category>, TrainerError> {
        Ok(self
            .list_categories()?
            .into_iter()
            .map(|category| (category.id, category))
            .collect())
    }

    fn ensure_scenario_refs(&self, level_id: u64, category_id: Option<u64>) -> Result<(), TrainerError> {
        if !self.content.contains_key(Self::level_key(level_id))? {
            return Err(TrainerError::ConstraintViolation(format!(
                "unknown level id {}",
                level_id
            )));
        }
        if let Some(category_id) = category_id {
            if !self.content.contains_key(Self::category_key(category_id))? {
                return Err(TrainerError::ConstraintViolation(format!(
                    "unknown category id {}",
                    category_id
                )));
            }
        }
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Steps
    // ----------------------------------------------------------------------

    /// Append a step; its number is `max(step_num) + 1` within the scenario.
    pub fn create_step(&self, scenario_id: u64, draft: StepDraft) -> Result<Step, TrainerError> {
        let mut step = prepare_step(draft)?;

        let _guard = self.admin_guard();
        if !self.content.contains_key(Self::scenario_key(scenario_id))? {
            return Err(TrainerError::ConstraintViolation(format!(
                "unknown scenario id {}",
                scenario_id
            )));
        }
        let max_num = match self
            .content
            .scan_prefix(Self::scenario_steps_prefix(scenario_id))
            .next_back()
        {
            Some(entry) => {
                let (_key, id) = entry?;
                self.get_step(decode_id(&id)?)?.step_num
            }
            None => 0,
        };

        step.id = self.next_id()?;
        step.scenario_id = scenario_id;
        step.step_num = max_num + 1;
        let mut batch = Batch::default();
        batch.insert(Self::step_key(step.id), Self::serialize(&step)?);
        batch.insert(
            Self::scenario_step_key(scenario_id, step.step_num),
            step.id.to_be_bytes().to_vec(),
        );
        self.content.apply_batch(batch)?;
        self.content.flush()?;
        Ok(step)
    }

    pub fn update_step(&self, step_id: u64, patch: StepPatch) -> Result<Step, TrainerError> {
        if patch == StepPatch::default() {
            return Err(ValidationError::NoChanges.into());
        }
        let _guard = self.admin_guard();
        let mut step = self.get_step(step_id)?;
        if let Some(message) = patch.client_message {
            step.client_message = required_text("client_message", &message, MAX_TEXT_LEN)?;
        }
        if let Some(avatar) = patch.client_avatar {
            step.client_avatar = validate_icon("client_avatar", &avatar)?;
        }
        if let Some(name) = patch.client_name {
            step.client_name = validate_title("client_name", &name)?;
        }
        if let Some(mood) = patch.initial_mood {
            step.initial_mood = mood;
        }
        self.content
            .insert(Self::step_key(step.id), Self::serialize(&step)?)?;
        self.content.flush()?;
        Ok(step)
    }

    /// Delete a step and its answers. Later steps move down by one so the
    /// numbering stays dense.
    pub fn delete_step(&self, step_id: u64) -> Result<(), TrainerError> {
        let _guard = self.admin_guard();
        let step = self.get_step(step_id)?;

        let mut batch = Batch::default();
        batch.remove(Self::step_key(step.id));
        batch.remove(Self::scenario_step_key(step.scenario_id, step.step_num));
        for answer_id in Self::scan_index(&self.content, &Self::step_answers_prefix(step.id))? {
            batch.remove(Self::answer_key(answer_id));
            batch.remove(Self::step_answer_key(step.id, answer_id));
        }
        // Batch writes are keyed, so a later insert of the same key wins over
        // the earlier remove. Walk upwards so each slot is refilled.
        for mut later in self.scenario_steps(step.scenario_id)? {
            if later.step_num <= step.step_num {
                continue;
            }
            batch.remove(Self::scenario_step_key(later.scenario_id, later.step_num));
            later.step_num -= 1;
            batch.insert(
                Self::scenario_step_key(later.scenario_id, later.step_num),
                later.id.to_be_bytes().to_vec(),
            );
            batch.insert(Self::step_key(later.id), Self::serialize(&later)?);
        }
        self.content.apply_batch(batch)?;
        self.content.flush()?;
        Ok(())
    }

    /// Swap every step and answer of a scenario for the given ones in a
    /// single batch. Nothing is written unless every draft validates.
    pub fn replace_steps(
        &self,
        scenario_id: u64,
        plan: Vec<(StepDraft, Vec<AnswerDraft>)>,
    ) -> Result<Vec<Step>, TrainerError> {
        let prepared = plan
            .into_iter()
            .map(|(step, answers)| {
                let answers = answers
                    .into_iter()
                    .map(prepare_answer)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((prepare_step(step)?, answers))
            })
            .collect::<Result<Vec<_>, TrainerError>>()?;

        let _guard = self.admin_guard();
        self.get_scenario(scenario_id)?;

        let mut batch = Batch::default();
        for old in self.scenario_steps(scenario_id)? {
            batch.remove(Self::step_key(old.id));
            batch.remove(Self::scenario_step_key(scenario_id, old.step_num));
            for answer_id in Self::scan_index(&self.content, &Self::step_answers_prefix(old.id))? {
                batch.remove(Self::answer_key(answer_id));
                batch.remove(Self::step_answer_key(old.id, answer_id));
            }
        }
        // Reused step slots are inserted after their removal, so they win.
        let mut steps = Vec::with_capacity(prepared.len());
        for (step_num, (mut step, answers)) in (1u32..).zip(prepared) {
            step.id = self.next_id()?;
            step.scenario_id = scenario_id;
            step.step_num = step_num;
            batch.insert(Self::step_key(step.id), Self::serialize(&step)?);
            batch.insert(
                Self::scenario_step_key(scenario_id, step_num),
                step.id.to_be_bytes().to_vec(),
            );
            for mut answer in answers {
                answer.id = self.next_id()?;
                answer.step_id = step.id;
                batch.insert(Self::answer_key(answer.id), Self::serialize(&answer)?);
                batch.insert(
                    Self::step_answer_key(step.id, answer.id),
                    answer.id.to_be_bytes().to_vec(),
                );
            }
            steps.push(step);
        }
        self.content.apply_batch(batch)?;
        self.content.flush()?;
        debug!("Replaced steps of scenario {} ({} steps)", scenario_id, steps.len());
        Ok(steps)
    }

    pub fn get_step(&self, step_id: u64) -> Result<Step, TrainerError> {
        Self::fetch(&self.content, &Self::step_key(step_id))?
            .ok_or_else(|| TrainerError::NotFound(format!("step: {}", step_id)))
    }

    /// Steps of a scenario ordered by `step_num`.
    pub fn scenario_steps(&self, scenario_id: u64) -> Result<Vec<Step>, TrainerError> {
        Self::scan_index(&self.content, &Self::scenario_steps_prefix(scenario_id))?
            .into_iter()
            .map(|id| self.get_step(id))
            .collect()
    }

    pub fn step_by_num(&self, scenario_id: u64, step_num: u32) -> Result<Step, TrainerError> {
        match self.content.get(Self::scenario_step_key(scenario_id, step_num))? {
            Some(id) => self.get_step(decode_id(&id)?),
            None => Err(TrainerError::NotFound(format!(
                "step {} of scenario {}",
                step_num, scenario_id
            ))),
        }
    }

    pub fn steps_count(&self, scenario_id: u64) -> Result<usize, TrainerError> {
        let mut count = 0usize;
        for entry in self.content.scan_prefix(Self::scenario_steps_prefix(scenario_id)) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Best achievable score: the highest-scoring answer of every step.
    pub fn max_score(&self, scenario_id: u64) -> Result<i32, TrainerError> {
        let mut total = 0i32;
        for step in self.scenario_steps(scenario_id)? {
            let best = self
                .step_answers(step.id)?
                .iter()
                .map(|answer| answer.points)
                .max()
                .unwrap_or(0);
            total = total.saturating_add(best.max(0));
        }
        Ok(total)
    }

    // ----------------------------------------------------------------------
    // Answers
    // ----------------------------------------------------------------------

    pub fn create_answer(&self, step_id: u64, draft: AnswerDraft) -> Result<Answer, TrainerError> {
        let mut answer = prepare_answer(draft)?;

        let _guard = self.admin_guard();
        if !self.content.contains_key(Self::step_key(step_id))? {
            return Err(TrainerError::ConstraintViolation(format!(
                "unknown step id {}",
                step_id
            )));
        }
        answer.id = self.next_id()?;
        answer.step_id = step_id;
        let mut batch = Batch::default();
        batch.insert(Self::answer_key(answer.id), Self::serialize(&answer)?);
        batch.insert(
            Self::step_answer_key(step_id, answer.id),
            answer.id.to_be_bytes().to_vec(),
        );
        self.content.apply_batch(batch)?;
        self.content.flush()?;
        Ok(answer)
    }

    pub fn update_answer(&self, answer_id: u64, patch: AnswerPatch) -> Result<Answer, TrainerError> {
        if patch == AnswerPatch::default() {
            return Err(ValidationError::NoChanges.into());
        }
        let _guard = self.admin_guard();
        let mut answer = self.get_answer(answer_id)?;
        if let Some(text) = patch.answer_text {
            answer.answer_text = required_text("answer_text", &text, MAX_TEXT_LEN)?;
        }
        if let Some(is_correct) = patch.is_correct {
            answer.is_correct = is_correct;
        }
        if let Some(is_partial) = patch.is_partial {
            answer.is_partial = is_partial;
        }
        if let Some(points) = patch.points {
            answer.points = points;
        }
        if let Some(feedback) = patch.feedback {
            answer.feedback = sanitize_text("feedback", &feedback, MAX_TEXT_LEN)?;
        }
        if let Some(mood_impact) = patch.mood_impact {
            answer.mood_impact = mood_impact;
        }
        if let Some(order_num) = patch.order_num {
            answer.order_num = order_num;
        }
        if let Some(link) = patch.knowledge_link {
            answer.knowledge_link = optional_link(link.as_deref())?;
        }
        validate_answer_numbers(answer.points, answer.mood_impact)?;
        self.content
            .insert(Self::answer_key(answer.id), Self::serialize(&answer)?)?;
        self.content.flush()?;
        Ok(answer)
    }

    pub fn delete_answer(&self, answer_id: u64) -> Result<(), TrainerError> {
        let _guard = self.admin_guard();
        let answer = self.get_answer(answer_id)?;
        let mut batch = Batch::default();
        batch.remove(Self::answer_key(answer.id));
        batch.remove(Self::step_answer_key(answer.step_id, answer.id));
        self.content.apply_batch(batch)?;
        self.content.flush()?;
        Ok(())
    }

    pub fn get_answer(&self, answer_id: u64) -> Result<Answer, TrainerError> {
        Self::fetch(&self.content, &Self::answer_key(answer_id))?
            .ok_or_else(|| TrainerError::NotFound(format!("answer: {}", answer_id)))
    }

    /// Answers of a step ordered by `order_num`.
    pub fn step_answers(&self, step_id: u64) -> Result<Vec<Answer>, TrainerError> {
        let mut answers = Self::scan_index(&self.content, &Self::step_answers_prefix(step_id))?
            .into_iter()
            .map(|id| self.get_answer(id))
            .collect::<Result<Vec<_>, _>>()?;
        answers.sort_by_key(|answer| (answer.order_num, answer.id));
        Ok(answers)
    }

    // ----------------------------------------------------------------------
    // Results (append-only)
    // ----------------------------------------------------------------------

    /// Append a result and its user/scenario index entries. The id and schema
    /// version are assigned here.
    pub fn append_result(&self, mut record: ResultRecord) -> Result<ResultRecord, TrainerError> {
        validate_user_id(&record.user_id)?;
        let _guard = self.append_guard();
        if !self.content.contains_key(Self::scenario_key(record.scenario_id))? {
            return Err(TrainerError::NotFound(format!(
                "scenario: {}",
                record.scenario_id
            )));
        }
        record.id = self.next_id()?;
        record.schema_version = RESULT_SCHEMA_VERSION;
        let id_bytes = record.id.to_be_bytes().to_vec();
        let mut batch = Batch::default();
        batch.insert(Self::result_key(record.id), Self::serialize(&record)?);
        batch.insert(Self::user_result_key(&record.user_id, record.id), id_bytes.clone());
        batch.insert(Self::scenario_result_key(record.scenario_id, record.id), id_bytes);
        self.results.apply_batch(batch)?;
        self.results.flush()?;
        Ok(record)
    }

    pub fn get_result(&self, result_id: u64) -> Result<ResultRecord, TrainerError> {
        Self::fetch(&self.results, &Self::result_key(result_id))?
            .ok_or_else(|| TrainerError::NotFound(format!("result: {}", result_id)))
    }

    /// Results of one user, oldest first.
    pub fn results_for_user(&self, user_id: &str) -> Result<Vec<ResultRecord>, TrainerError> {
        Self::scan_index(&self.results, &Self::user_results_prefix(user_id))?
            .into_iter()
            .map(|id| self.get_result(id))
            .collect()
    }

    /// Results of one scenario, oldest first.
    pub fn results_for_scenario(&self, scenario_id: u64) -> Result<Vec<ResultRecord>, TrainerError> {
        Self::scan_index(&self.results, &Self::scenario_results_prefix(scenario_id))?
            .into_iter()
            .map(|id| self.get_result(id))
            .collect()
    }

    pub fn all_results(&self) -> Result<Vec<ResultRecord>, TrainerError> {
        Self::scan_records(&self.results, b"results:")
    }

    // ----------------------------------------------------------------------
    // Progress rows
    // ----------------------------------------------------------------------

    pub fn get_progress(
        &self,
        user_id: &str,
        level_code: &str,
    ) -> Result<Option<UserLevelProgress>, TrainerError> {
        Self::fetch(&self.progress, &Self::progress_key(user_id, level_code))
    }

    /// Upsert a progress row. An existing unlock always survives: the stored
    /// flag is `old || new` and the first `unlocked_at` is kept. Callers hold
    /// [`TrainerStore::progress_guard`] for the row.
    pub fn put_progress(&self, mut row: UserLevelProgress) -> Result<UserLevelProgress, TrainerError> {
        validate_user_id(&row.user_id)?;
        if let Some(existing) = self.get_progress(&row.user_id, &row.level_code)? {
            if existing.is_unlocked {
                row.is_unlocked = true;
                row.unlocked_at = existing.unlocked_at.or(row.unlocked_at);
            }
        }
        row.schema_version = PROGRESS_SCHEMA_VERSION;
        self.progress.insert(
            Self::progress_key(&row.user_id, &row.level_code),
            Self::serialize(&row)?,
        )?;
        self.progress.flush()?;
        Ok(row)
    }

    pub fn progress_for_user(&self, user_id: &str) -> Result<Vec<UserLevelProgress>, TrainerError> {
        Self::scan_records(&self.progress, &Self::progress_prefix(user_id))
    }
}

fn decode_id(bytes: &[u8]) -> Result<u64, TrainerError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        TrainerError::Internal(format!("corrupt index entry ({} bytes)", bytes.len()))
    })?;
    Ok(u64::from_be_bytes(raw))
}

fn join_view(scenario: Scenario, level: &Level, category: Option<&Category>) -> ScenarioView {
    ScenarioView {
        level_name: level.name.clone(),
        level_code: level.code.clone(),
        category_name: category.map(|c| c.name.clone()),
        category_icon: category.map(|c| c.icon.clone()),
        scenario,
    }
}

/// Validated step record; the caller assigns `id`, `scenario_id` and `step_num`.
fn prepare_step(draft: StepDraft) -> Result<Step, TrainerError> {
    let client_message = required_text("client_message", &draft.client_message, MAX_TEXT_LEN)?;
    let client_avatar = match draft.client_avatar.as_deref() {
        Some(avatar) if !avatar.trim().is_empty() => validate_icon("client_avatar", avatar)?,
        _ => DEFAULT_CLIENT_AVATAR.to_string(),
    };
    let client_name = match draft.client_name.as_deref() {
        Some(name) if !name.trim().is_empty() => validate_title("client_name", name)?,
        _ => DEFAULT_CLIENT_NAME.to_string(),
    };
    Ok(Step {
        id: 0,
        scenario_id: 0,
        step_num: 0,
        client_message,
        client_avatar,
        client_name,
        initial_mood: draft.initial_mood.unwrap_or_default(),
        schema_version: STEP_SCHEMA_VERSION,
    })
}

/// Validated answer record; the caller assigns `id` and `step_id`.
fn prepare_answer(draft: AnswerDraft) -> Result<Answer, TrainerError> {
    let answer_text = required_text("answer_text", &draft.answer_text, MAX_TEXT_LEN)?;
    let feedback = sanitize_text("feedback", &draft.feedback, MAX_TEXT_LEN)?;
    let knowledge_link = optional_link(draft.knowledge_link.as_deref())?;
    validate_answer_numbers(draft.points, draft.mood_impact)?;
    Ok(Answer {
        id: 0,
        step_id: 0,
        answer_text,
        is_correct: draft.is_correct,
        is_partial: draft.is_partial,
        points: draft.points,
        feedback,
        mood_impact: draft.mood_impact,
        order_num: draft.order_num,
        knowledge_link,
        schema_version: ANSWER_SCHEMA_VERSION,
    })
}

fn optional_color(color: Option<&str>) -> Result<String, TrainerError> {
    match color {
        Some(c) if !c.trim().is_empty() => Ok(validate_color("color", c)?),
        _ => Ok(String::new()),
    }
}

fn optional_link(link: Option<&str>) -> Result<Option<String>, TrainerError> {
    match link {
        Some(l) => {
            let cleaned = sanitize_text("knowledge_link", l, MAX_LINK_LEN)?;
            Ok((!cleaned.is_empty()).then_some(cleaned))
        }
        None => Ok(None),
    }
}

fn validate_scenario_numbers(
    estimated_time: u32,
    total_points: i32,
    timer_seconds: u32,
    initial_loyalty: i32,
) -> Result<(), ValidationError> {
    validate_range("estimated_time", i64::from(estimated_time), 0, 24 * 60)?;
    validate_range("total_points", i64::from(total_points), 0, 1_000_000)?;
    validate_range("timer_seconds", i64::from(timer_seconds), 1, 3600)?;
    validate_range("initial_loyalty", i64::from(initial_loyalty), 1, i64::from(LOYALTY_MAX))
}

fn validate_answer_numbers(points: i32, mood_impact: i32) -> Result<(), ValidationError> {
    validate_range("points", i64::from(points), -10_000, 10_000)?;
    validate_range(
        "mood_impact",
        i64::from(mood_impact),
        -i64::from(LOYALTY_MAX),
        i64::from(LOYALTY_MAX),
    )
}
