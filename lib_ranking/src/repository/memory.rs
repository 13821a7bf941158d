use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{GameCatalog, HistoryLog, UserDirectory};
use crate::errors::{RankingError, Result};
use crate::model::{Game, Submission, User, UserId};

#[derive(Default)]
struct DirectoryState {
    games: HashMap<String, Game>,
    users: HashMap<UserId, User>,
    next_game_id: i64,
}

/// Game catalog and user directory held in memory.
#[derive(Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a game, returning the existing entry when the name is taken.
    pub fn add_game(&self, name: &str) -> Result<Game> {
        let mut state = self.write()?;
        if let Some(game) = state.games.get(name) {
            return Ok(game.clone());
        }
        state.next_game_id += 1;
        let game = Game {
            id: state.next_game_id,
            name: name.to_string(),
        };
        state.games.insert(name.to_string(), game.clone());
        Ok(game)
    }

    pub fn add_user(&self, id: UserId, username: &str) -> Result<User> {
        let user = User {
            id,
            username: username.to_string(),
        };
        self.write()?.users.insert(id, user.clone());
        Ok(user)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, DirectoryState>> {
        self.state
            .read()
            .map_err(|_| RankingError::internal("directory lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, DirectoryState>> {
        self.state
            .write()
            .map_err(|_| RankingError::internal("directory lock poisoned"))
    }
}

#[async_trait]
impl GameCatalog for MemoryDirectory {
    async fn get_by_name(&self, name: &str) -> Result<Game> {
        self.read()?
            .games
            .get(name)
            .cloned()
            .ok_or_else(|| RankingError::not_found(format!("game {name}")))
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn get_by_id(&self, id: UserId) -> Result<User> {
        self.read()?
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| RankingError::not_found(format!("user {id}")))
    }

    async fn get_by_username(&self, username: &str) -> Result<User> {
        self.read()?
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| RankingError::not_found(format!("user {username}")))
    }
}

/// Append-only history held in memory.
///
/// `set_failing(true)` makes every append fail with `Internal`, which lets
/// tests exercise the submission path when the audit store is down.
#[derive(Default)]
pub struct MemoryHistoryLog {
    entries: RwLock<Vec<Submission>>,
    failing: AtomicBool,
}

impl MemoryHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Submission> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HistoryLog for MemoryHistoryLog {
    async fn append(&self, submission: &Submission) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RankingError::internal("history log rejected append"));
        }
        self.entries
            .write()
            .map_err(|_| RankingError::internal("history lock poisoned"))?
            .push(submission.clone());
        Ok(())
    }

    async fn for_user(&self, user_id: UserId, limit: usize) -> Result<Vec<Submission>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| RankingError::internal("history lock poisoned"))?;
        Ok(entries
            .iter()
            .rev()
            .filter(|s| s.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn catalog_lookup() {
        let dir = MemoryDirectory::new();
        let chess = dir.add_game("chess").unwrap();
        assert_eq!(dir.add_game("chess").unwrap().id, chess.id);
        assert_eq!(dir.get_by_name("chess").await.unwrap(), chess);
        assert!(dir.get_by_name("go").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn directory_lookup_by_id_and_name() {
        let dir = MemoryDirectory::new();
        dir.add_user(1, "alice").unwrap();
        assert_eq!(dir.get_by_id(1).await.unwrap().username, "alice");
        assert_eq!(dir.get_by_username("alice").await.unwrap().id, 1);
        assert!(dir.get_by_id(2).await.unwrap_err().is_not_found());
        assert!(dir.get_by_username("bob").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn history_is_newest_first_per_user() {
        let log = MemoryHistoryLog::new();
        for (user_id, score) in [(1, 10), (2, 20), (1, 30), (1, 40)] {
            log.append(&Submission {
                user_id,
                game: "chess".into(),
                score,
                submitted_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        let scores: Vec<i64> = log
            .for_user(1, 2)
            .await
            .unwrap()
            .iter()
            .map(|s| s.score)
            .collect();
        assert_eq!(scores, vec![40, 30]);
        assert_eq!(log.len(), 4);
    }

    #[tokio::test]
    async fn failing_history_rejects_appends() {
        let log = MemoryHistoryLog::new();
        log.set_failing(true);
        let err = log
            .append(&Submission {
                user_id: 1,
                game: "chess".into(),
                score: 1,
                submitted_at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Internal);
        assert!(log.is_empty());
    }
}
