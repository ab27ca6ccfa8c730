//! # opstrainer - Operator Training Engine
//!
//! A library and CLI for training call-center operators on scripted customer
//! dialogues. Scenarios are grouped into difficulty levels; each scenario is
//! a linear sequence of client messages with multiple-choice operator replies
//! that move a loyalty meter, earn points and eventually end the session in
//! a completed or game-over result.
//!
//! ## Features
//!
//! - **Content graph**: levels, categories, scenarios, steps and answers with
//!   validated administrative CRUD and cascading deletes
//! - **Level progression**: levels unlock once the average score on their
//!   prerequisite reaches the required percentage, and stay unlocked
//! - **Play sessions**: loyalty and mood tracking, timeout penalty, game over
//!   at zero loyalty, grading on completion
//! - **Results and statistics**: per-user history, best results, leaderboards
//! - **Visual editor round trip**: node/connection layouts rebuilt into steps
//! - **Notifications**: completion and unlock events pushed to a messaging sink
//!
//! ## Architecture
//!
//! - [`trainer`] - Content store, progression, session engine, results, stats
//! - [`config`] - TOML configuration
//! - [`validation`] - Field validation and sanitization shared by all writes
//! - [`metrics`] - In-process session counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use opstrainer::trainer::{LogSink, SessionEngine, TrainerStore};
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(TrainerStore::open("./data/trainer")?);
//!     let engine = SessionEngine::new(store.clone(), Arc::new(LogSink));
//!     let scenario = store.scenarios_by_level("basic", None)?[0].scenario.id;
//!     let session = engine.start_session("alice", scenario)?;
//!     println!("{} steps to play", session.total_steps);
//!     Ok(())
//! }
//! ```
//!
//! ## Storage
//!
//! All state lives in a single sled database: one tree for content, one for
//! results and one for per-user level progress. Records are bincode-encoded
//! and carry a schema version.

pub mod config;
pub mod metrics;
pub mod trainer;
pub mod validation;
