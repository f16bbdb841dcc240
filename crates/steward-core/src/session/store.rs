//! Durable session store.
//!
//! An in-memory cache of per-user sessions in front of the file persistence
//! layer. Each user's entry sits behind its own lock, so writes for the same
//! user serialize while different users never contend - which, combined with
//! the coordinator's single-in-flight rule, makes per-user reads and writes
//! linearizable without any cross-user coordination.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::persistence::{
    append_entry, load_recent, load_session, save_session, CommandLogEntry, PersistenceError,
};
use crate::session::Session;

pub struct SessionStore {
    sessions_dir: PathBuf,
    command_logs_dir: PathBuf,
    default_working_dir: String,
    max_stored_exchanges: usize,
    /// user_id -> session entry, each behind its own lock.
    entries: Mutex<HashMap<i64, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new(
        sessions_dir: PathBuf,
        command_logs_dir: PathBuf,
        default_working_dir: impl Into<String>,
        max_stored_exchanges: usize,
    ) -> Self {
        Self {
            sessions_dir,
            command_logs_dir,
            default_working_dir: default_working_dir.into(),
            max_stored_exchanges,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get-or-create the locked entry for a user.
    ///
    /// Looks in the cache first, then on disk, then creates and persists a
    /// default session. Never fails on a missing key.
    fn entry(&self, user_id: i64) -> Result<Arc<Mutex<Session>>, PersistenceError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(&user_id) {
            return Ok(Arc::clone(entry));
        }

        let session = match load_session(&self.sessions_dir, user_id)? {
            Some(session) => {
                log::info!("session loaded for user {user_id}");
                session
            }
            None => {
                let session = Session::new(user_id, self.default_working_dir.clone());
                save_session(&self.sessions_dir, &session)?;
                log::info!("new session created for user {user_id}");
                session
            }
        };

        let entry = Arc::new(Mutex::new(session));
        entries.insert(user_id, Arc::clone(&entry));
        Ok(entry)
    }

    /// Snapshot of the user's session (created if absent).
    pub fn get(&self, user_id: i64) -> Result<Session, PersistenceError> {
        let entry = self.entry(user_id)?;
        let session = entry.lock().unwrap_or_else(|e| e.into_inner());
        Ok(session.clone())
    }

    /// Append a successful exchange and persist the session.
    pub fn record_exchange(
        &self,
        user_id: i64,
        user: &str,
        assistant: &str,
    ) -> Result<(), PersistenceError> {
        let entry = self.entry(user_id)?;
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());
        session.record_exchange(user, assistant, self.max_stored_exchanges);
        save_session(&self.sessions_dir, &session)
    }

    /// Change the session working directory and persist.
    pub fn set_working_dir(&self, user_id: i64, dir: &str) -> Result<(), PersistenceError> {
        let entry = self.entry(user_id)?;
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());
        session.working_dir = dir.to_string();
        session.updated_at = chrono::Utc::now();
        save_session(&self.sessions_dir, &session)
    }

    /// Reset the session to its initial state and persist. The command log
    /// is untouched; history survives a reset.
    pub fn reset(&self, user_id: i64) -> Result<Session, PersistenceError> {
        let entry = self.entry(user_id)?;
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());
        session.reset(&self.default_working_dir);
        save_session(&self.sessions_dir, &session)?;
        log::info!("session reset for user {user_id}");
        Ok(session.clone())
    }

    /// Append one audit record to the user's command log.
    pub fn append_log(&self, entry: &CommandLogEntry) -> Result<(), PersistenceError> {
        append_entry(&self.command_logs_dir, entry)
    }

    /// The most recent `limit` command log entries, newest first.
    pub fn history(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<CommandLogEntry>, PersistenceError> {
        load_recent(&self.command_logs_dir, user_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &std::path::Path) -> SessionStore {
        SessionStore::new(
            dir.join("sessions"),
            dir.join("command_logs"),
            "/default",
            50,
        )
    }

    #[test]
    fn get_creates_a_default_session() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let session = store.get(1).unwrap();
        assert_eq!(session.user_id, 1);
        assert_eq!(session.working_dir, "/default");
        assert_eq!(session.message_count, 0);
    }

    #[test]
    fn sessions_survive_a_cold_cache() {
        let dir = tempdir().unwrap();
        {
            let store = store(dir.path());
            store.record_exchange(1, "q", "a").unwrap();
        }

        // fresh store, same data dir
        let store = store(dir.path());
        let session = store.get(1).unwrap();
        assert_eq!(session.message_count, 1);
        assert_eq!(session.context[0].user, "q");
    }

    #[test]
    fn message_count_after_n_exchanges_equals_n() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        for i in 0..4 {
            store
                .record_exchange(1, &format!("q{i}"), &format!("a{i}"))
                .unwrap();
        }

        let session = store.get(1).unwrap();
        assert_eq!(session.message_count, 4);
        assert_eq!(session.context.len(), 4);
    }

    #[test]
    fn reset_clears_context_but_keeps_identity_and_history() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        store.record_exchange(1, "q", "a").unwrap();
        store
            .append_log(&CommandLogEntry::success(1, "q", "a", 10))
            .unwrap();
        store.set_working_dir(1, "/elsewhere").unwrap();

        store.reset(1).unwrap();

        let session = store.get(1).unwrap();
        assert_eq!(session.user_id, 1);
        assert!(session.context.is_empty());
        assert_eq!(session.message_count, 0);
        assert_eq!(session.working_dir, "/default");

        // command log survives the reset
        assert_eq!(store.history(1, 10).unwrap().len(), 1);

        // new exchanges accumulate under the same user id
        store.record_exchange(1, "q2", "a2").unwrap();
        assert_eq!(store.get(1).unwrap().message_count, 1);
    }

    #[test]
    fn different_users_have_independent_sessions() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        store.record_exchange(1, "one", "a").unwrap();
        store.record_exchange(2, "two", "b").unwrap();

        assert_eq!(store.get(1).unwrap().context[0].user, "one");
        assert_eq!(store.get(2).unwrap().context[0].user, "two");
    }

    #[test]
    fn same_user_writes_serialize_across_threads() {
        let dir = tempdir().unwrap();
        let store = Arc::new(store(dir.path()));

        std::thread::scope(|scope| {
            for t in 0..4 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for i in 0..5 {
                        store
                            .record_exchange(1, &format!("t{t}q{i}"), "a")
                            .unwrap();
                    }
                });
            }
        });

        let session = store.get(1).unwrap();
        assert_eq!(session.message_count, 20);
        assert_eq!(session.context.len(), 20);
    }
}
