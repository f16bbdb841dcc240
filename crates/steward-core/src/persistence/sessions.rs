//! Session document persistence.
//!
//! One JSON file per user, written atomically (temp file + rename).

use std::fs;
use std::path::Path;

use super::PersistenceError;
use crate::session::Session;

/// Save a session to `{dir}/{user_id}.json` atomically.
pub fn save_session(dir: &Path, session: &Session) -> Result<(), PersistenceError> {
    fs::create_dir_all(dir)?;

    let file_path = dir.join(format!("{}.json", session.user_id));
    let temp_path = dir.join(format!("{}.json.tmp", session.user_id));

    let json = serde_json::to_string_pretty(session)?;
    fs::write(&temp_path, json)?;
    fs::rename(&temp_path, &file_path)?;

    Ok(())
}

/// Load a session from `{dir}/{user_id}.json`.
///
/// Returns `Ok(None)` when no session has been persisted for this user.
pub fn load_session(dir: &Path, user_id: i64) -> Result<Option<Session>, PersistenceError> {
    let file_path = dir.join(format!("{user_id}.json"));

    if !file_path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&file_path)?;
    let session: Session = serde_json::from_str(&contents)?;
    Ok(Some(session))
}
