//! Post-Game Result Records
//!
//! When a game ends its lobby is evicted from the live registry. A small
//! result record is written to disk first so later status queries can tell
//! "finished" apart from "never existed".

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final score line for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserScore {
    /// Username as registered in the lobby.
    pub username: String,
    /// Final score.
    pub score: u32,
    /// How many problems the user got through.
    #[serde(rename = "problemsAnswered")]
    pub problems_answered: usize,
}

/// Everything persisted about a finished game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    /// Lobby identifier the record belongs to.
    #[serde(rename = "lobbyId")]
    pub lobby_id: String,
    /// Human-readable lobby name.
    #[serde(rename = "lobbyName")]
    pub lobby_name: String,
    /// When the game ended.
    #[serde(rename = "finishedAt")]
    pub finished_at: DateTime<Utc>,
    /// Per-user final scores.
    pub scores: Vec<UserScore>,
}

/// Errors while writing a result record.
#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be serialized.
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Directory-backed store of result records, one JSON file per lobby.
#[derive(Debug, Clone)]
pub struct ResultsStore {
    dir: PathBuf,
}

impl ResultsStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, lobby_id: &str) -> PathBuf {
        self.dir.join(format!("{lobby_id}.result.json"))
    }

    /// Whether a result record exists for `lobby_id`.
    pub fn exists(&self, lobby_id: &str) -> bool {
        self.record_path(lobby_id).is_file()
    }

    /// Persist a record, overwriting any previous one for the same lobby.
    pub fn record(&self, record: &GameRecord) -> Result<(), ResultsError> {
        fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_vec_pretty(record)?;
        fs::write(self.record_path(&record.lobby_id), body)?;
        Ok(())
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
