//! Trajectory export for finished agent runs.
//!
//! A trajectory records the whole conversation of one run together with how
//! it ended and what it cost. Trajectories are stored as pretty-printed JSON.
//!
//! ```rust,ignore
//! use bashloop::trajectory::Trajectory;
//!
//! let outcome = agent.run("Fix the failing test").await;
//! let trajectory = Trajectory::from_run(&agent, &outcome);
//! trajectory.save("runs/last.json").await?;
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use crate::llm::Message;
use crate::scaffold::{RunOutcome, ToolCallingAgent};

/// Errors that can occur while saving or loading a trajectory.
#[derive(Debug, Error)]
pub enum TrajectoryError {
    /// Failed to read or write the trajectory file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize trajectory data.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Record of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When the trajectory was recorded.
    pub created_at: DateTime<Utc>,
    /// `Submitted`, `LimitsExceeded`, or an error kind.
    pub status: String,
    /// Final answer, limit description, or error message.
    pub detail: String,
    /// Model calls made during the run.
    pub n_calls: u64,
    /// Cost of the run in dollars.
    pub cost: f64,
    /// Full conversation in order.
    pub messages: Vec<Message>,
}

impl Trajectory {
    /// Build a trajectory from explicit parts.
    pub fn new(outcome: &RunOutcome, n_calls: u64, cost: f64, messages: Vec<Message>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            status: outcome.kind().to_string(),
            detail: outcome.detail().to_string(),
            n_calls,
            cost,
            messages,
        }
    }

    /// Snapshot the agent's last run.
    pub fn from_run(agent: &ToolCallingAgent, outcome: &RunOutcome) -> Self {
        Self::new(outcome, agent.n_calls(), agent.cost(), agent.messages().to_vec())
    }

    /// Write the trajectory as pretty JSON, creating parent directories.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), TrajectoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).await?;

        info!(
            run_id = %self.run_id,
            path = %path.display(),
            messages = self.messages.len(),
            "Saved trajectory"
        );
        Ok(())
    }

    /// Read a trajectory written by [`Trajectory::save`].
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TrajectoryError> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Trajectory {
        Trajectory::new(
            &RunOutcome::Submitted("Done.".to_string()),
            1,
            0.25,
            vec![
                Message::system("sys"),
                Message::user("task"),
                Message::assistant("Done."),
            ],
        )
    }

    #[test]
    fn test_new_copies_outcome() {
        let trajectory = Trajectory::new(
            &RunOutcome::Error {
                kind: "LlmError".to_string(),
                message: "boom".to_string(),
            },
            0,
            0.0,
            Vec::new(),
        );
        assert_eq!(trajectory.status, "LlmError");
        assert_eq!(trajectory.detail, "boom");
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["status"], "Submitted");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][2]["content"], "Done.");
        assert!(value["run_id"].is_string());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/run.json");
        let trajectory = sample();

        trajectory.save(&path).await.unwrap();
        let loaded = Trajectory::load(&path).await.unwrap();
        assert_eq!(loaded, trajectory);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Trajectory::load(dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(err, TrajectoryError::Io(_)));
    }
}
