//! Topic Snapshot: an immutable view of one topic's messages.

use crate::codec;
use crate::message::Message;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An immutable, fully-loaded view of a topic: its messages sorted
/// strictly newest-first, and the timestamp of the newest one. Replaced
/// wholesale on every update — never mutated in place.
#[derive(Debug, Clone)]
pub struct Topic {
    pub name: String,
    pub dir: PathBuf,
    pub messages: Vec<Arc<Message>>,
    pub latest: u64,
}

impl Topic {
    /// Build a snapshot by scanning every regular file directly under
    /// `dir`, decoding `dir`'s own name as the topic. Corrupt
    /// message files are logged and dropped, not propagated as errors —
    /// only an empty result (no valid messages at all) is "invalid" and
    /// returned as `None`.
    pub fn from_dir(dir: &Path) -> Option<Topic> {
        let name = dir.file_name()?.to_str().and_then(codec::decode)?;
        let entries = std::fs::read_dir(dir).ok()?;

        let mut messages = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            match Message::load(&path, &name) {
                Ok(m) => messages.push(Arc::new(m)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "dropping corrupt message file");
                }
            }
        }

        if messages.is_empty() {
            return None;
        }
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let latest = messages[0].timestamp;
        Some(Topic {
            name,
            dir: dir.to_owned(),
            messages,
            latest,
        })
    }

    /// Produce a new snapshot with `m` merged into `messages` in descending
    /// order, keeping `self` untouched. Requires `m` to actually belong to
    /// this topic and directory; violating that is a caller bug, not a
    /// recoverable condition, so it returns `None` rather than silently
    /// adopting a foreign message.
    ///
    /// Ties are broken by placing the new message before any existing
    /// messages with the same timestamp — an arbitrary but stable rule.
    pub fn with_added(&self, m: Arc<Message>) -> Option<Topic> {
        if m.topic != self.name || !m.path.starts_with(&self.dir) {
            return None;
        }
        let pos = self
            .messages
            .iter()
            .position(|existing| existing.timestamp <= m.timestamp)
            .unwrap_or(self.messages.len());

        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.extend_from_slice(&self.messages[..pos]);
        messages.push(m);
        messages.extend_from_slice(&self.messages[pos..]);
        let latest = messages[0].timestamp;

        Some(Topic {
            name: self.name.clone(),
            dir: self.dir.clone(),
            messages,
            latest,
        })
    }
}
