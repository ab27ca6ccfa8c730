//! External collaborators: the messaging sink that receives fire-and-forget
//! notifications and the identity provider that names the current actor.
//!
//! Sinks must never block. [`ChannelSink`] only calls `try_send`; a full or
//! closed queue is reported as [`TrainerError::DependencyUnavailable`] and the
//! caller logs it and moves on.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::trainer::errors::TrainerError;
use crate::trainer::types::Grade;
use crate::validation::validate_user_id;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationEvent {
    ScenarioCompleted {
        user_id: String,
        scenario_id: u64,
        result_id: u64,
        percent: u8,
        grade: Grade,
        is_game_over: bool,
    },
    LevelUnlocked {
        user_id: String,
        level_code: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: NotificationEvent,
}

impl Notification {
    pub fn new(event: NotificationEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            event,
        }
    }

    /// One-line human summary used by the log sink and dispatcher.
    pub fn summary(&self) -> String {
        match &self.event {
            NotificationEvent::ScenarioCompleted {
                user_id,
                scenario_id,
                percent,
                grade,
                is_game_over,
                ..
            } => format!(
                "{} finished scenario {} with {}% ({}){}",
                crate::validation::log_preview(user_id),
                scenario_id,
                percent,
                grade,
                if *is_game_over { ", game over" } else { "" }
            ),
            NotificationEvent::LevelUnlocked { user_id, level_code } => format!(
                "{} unlocked level {}",
                crate::validation::log_preview(user_id),
                level_code
            ),
        }
    }
}

/// Fire-and-forget notification target.
pub trait MessagingSink: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), TrainerError>;
}

/// Writes notifications to the log. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MessagingSink for LogSink {
    fn notify(&self, notification: Notification) -> Result<(), TrainerError> {
        info!("notification {}: {}", notification.id, notification.summary());
        Ok(())
    }
}

/// Bounded queue drained by a background task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl MessagingSink for ChannelSink {
    fn notify(&self, notification: Notification) -> Result<(), TrainerError> {
        self.tx.try_send(notification).map_err(|e| {
            crate::metrics::inc_notifications_dropped();
            match e {
                TrySendError::Full(n) => TrainerError::DependencyUnavailable(format!(
                    "notification queue full, dropped {}",
                    n.id
                )),
                TrySendError::Closed(n) => TrainerError::DependencyUnavailable(format!(
                    "notification channel closed, dropped {}",
                    n.id
                )),
            }
        })
    }
}

/// Drain `rx` on a tokio task, handing each notification to `deliver`.
/// The task ends when every sender is dropped and returns the delivered count.
pub fn spawn_dispatcher<F>(mut rx: mpsc::Receiver<Notification>, deliver: F) -> JoinHandle<u64>
where
    F: Fn(&Notification) -> Result<(), TrainerError> + Send + 'static,
{
    tokio::spawn(async move {
        let mut delivered = 0u64;
        while let Some(notification) = rx.recv().await {
            match deliver(&notification) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("notification {} not delivered: {}", notification.id, e),
            }
        }
        delivered
    })
}

/// Source of the current actor's stable, case-sensitive user id.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Result<String, TrainerError>;
}

/// Fixed identity, used by the CLI (`--user`) and tests.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    user_id: String,
}

impl StaticIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    /// Identity taken from an environment variable such as `USER`.
    pub fn from_env(var: &str) -> Result<Self, TrainerError> {
        std::env::var(var)
            .map(Self::new)
            .map_err(|e| TrainerError::DependencyUnavailable(format!("identity from ${}: {}", var, e)))
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Result<String, TrainerError> {
        validate_user_id(&self.user_id)
            .map_err(|e| TrainerError::DependencyUnavailable(format!("identity provider: {}", e)))?;
        Ok(self.user_id.clone())
    }
}
