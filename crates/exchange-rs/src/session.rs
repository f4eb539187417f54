//! Session files: one JSON-serialized [`Message`] per line.
//!
//! ```text
//! {"role":"user","id":"msg_…","created":1718000000,"content":[{"type":"Text","text":"hi"}]}
//! {"role":"assistant","id":"msg_…","created":1718000003,"content":[{"type":"Text","text":"hello"}]}
//! ```
//!
//! Files end in [`SESSION_FILE_SUFFIX`] and are named by session.

use crate::message::Message;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const SESSION_FILE_SUFFIX: &str = ".jsonl";

/// Atomic write: serialize every message to a temp file, then rename into
/// place.
pub fn write_session<'a>(
    path: &Path,
    messages: impl IntoIterator<Item = &'a Message>,
) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create session dir: {e}"))?;
    }

    let mut body = String::new();
    for message in messages {
        let line = serde_json::to_string(message)
            .map_err(|e| format!("Failed to serialize message: {e}"))?;
        body.push_str(&line);
        body.push('\n');
    }

    let tmp_path = path.with_extension("jsonl.tmp");
    std::fs::write(&tmp_path, body).map_err(|e| format!("Failed to write temp session: {e}"))?;
    std::fs::rename(&tmp_path, path).map_err(|e| format!("Failed to rename session: {e}"))?;
    Ok(())
}

/// Load every message from a session file. Blank lines are skipped; any
/// malformed line fails the whole load.
pub fn read_session(path: &Path) -> Result<Vec<Message>, String> {
    let body = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read session {}: {e}", path.display()))?;
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<Message>(line).map_err(|e| {
                format!("Failed to load session due to JSON decode error on line {}: {e}", n + 1)
            })
        })
        .collect()
}

/// Session files in `dir` as `(name, path)`, most recently modified first.
/// A missing directory has no sessions.
pub fn list_sorted_session_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, String> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries =
        std::fs::read_dir(dir).map_err(|e| format!("Failed to read sessions dir: {e}"))?;

    let mut sessions = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| format!("Failed to read entry: {e}"))?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(name) = file_name.strip_suffix(SESSION_FILE_SUFFIX) else {
            continue;
        };
        match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => sessions.push((modified, name.to_string(), entry.path())),
            Err(e) => warn!("Skipping session {} without mtime: {e}", entry.path().display()),
        }
    }
    sessions.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(sessions
        .into_iter()
        .map(|(_, name, path)| (name, path))
        .collect())
}

/// Whether `dir` holds at least one session file.
pub fn session_file_exists(dir: &Path) -> bool {
    std::fs::read_dir(dir).is_ok_and(|mut entries| {
        entries.any(|entry| {
            entry.is_ok_and(|e| e.file_name().to_string_lossy().ends_with(SESSION_FILE_SUFFIX))
        })
    })
}
