//! Index (DbContext): three coherent snapshots updated copy-on-write under
//! a single writer lock, with lock-free reads.

use crate::codec;
use crate::error::{ConfigError, IndexError};
use crate::message::{self, Message};
use crate::notify::NotificationBus;
use crate::topic::Topic;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// The three views, always replaced as one unit so that a reader who
/// observes a new `by_name` entry also observes it in `by_recency` and
/// `all_messages`.
struct IndexState {
    by_name: HashMap<String, Arc<Topic>>,
    by_recency: Vec<Arc<Topic>>,
    all_messages: Vec<Arc<Message>>,
}

/// The concurrent topic/message index. Reads take a brief `RwLock::read`
/// only to clone the current `Arc<IndexState>` — no lock is held while a
/// caller walks the snapshot. Writes are serialized by `write_lock`, which
/// covers the whole persist-then-index transaction's indexing half; the
/// actual publish is a single `RwLock::write` swap.
pub struct Index {
    topic_root: PathBuf,
    state: RwLock<Arc<IndexState>>,
    write_lock: Mutex<()>,
    notify: Arc<NotificationBus>,
}

impl Index {
    /// Open (or initialize) the index rooted at `db_root`. Creates
    /// `db_root` and `db_root/topic` if absent; scans `db_root/topic` for
    /// directories whose name matches the hex-UTF-8 topic encoding,
    /// building a [`Topic`] snapshot for each and dropping invalid ones.
    /// This does blocking filesystem I/O and is meant to be
    /// called once at startup.
    pub fn open(db_root: &Path, notify: Arc<NotificationBus>) -> Result<Index, ConfigError> {
        ensure_dir(db_root)?;
        let topic_root = db_root.join("topic");
        ensure_dir(&topic_root)?;

        let mut by_name: HashMap<String, Arc<Topic>> = HashMap::new();
        if let Ok(entries) = std::fs::read_dir(&topic_root) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if !file_type.is_dir() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !is_hex_dirname(name) {
                    continue;
                }
                let Some(topic) = Topic::from_dir(&path) else {
                    continue;
                };
                if by_name.contains_key(&topic.name) {
                    tracing::warn!(topic = %topic.name, "duplicate topic name on disk, keeping first seen");
                    continue;
                }
                by_name.insert(topic.name.clone(), Arc::new(topic));
            }
        }

        let mut by_recency: Vec<Arc<Topic>> = by_name.values().cloned().collect();
        by_recency.sort_by(|a, b| b.latest.cmp(&a.latest));

        let mut all_messages: Vec<Arc<Message>> = by_recency
            .iter()
            .flat_map(|t| t.messages.iter().cloned())
            .collect();
        all_messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Ok(Index {
            topic_root,
            state: RwLock::new(Arc::new(IndexState {
                by_name,
                by_recency,
                all_messages,
            })),
            write_lock: Mutex::new(()),
            notify,
        })
    }

    /// Look up a topic by name.
    pub fn get_topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.snapshot().by_name.get(name).cloned()
    }

    /// All topics, descending by `latest`.
    pub fn topics_by_recency(&self) -> Vec<Arc<Topic>> {
        self.snapshot().by_recency.clone()
    }

    /// All messages across all topics, descending by timestamp.
    pub fn messages_by_recency(&self) -> Vec<Arc<Message>> {
        self.snapshot().all_messages.clone()
    }

    /// Persist and index a freshly posted message.
    ///
    /// Phase 1 (persistence) runs concurrently with any other `put` — it's
    /// plain async filesystem work with no lock held. Phase 2 (indexing)
    /// is serialized by `write_lock` and is itself synchronous: building
    /// the three updated views is pure in-memory work, so no `.await`
    /// happens while the lock is held.
    pub async fn put(&self, lines: Vec<String>) -> Result<Arc<Topic>, IndexError> {
        let topic_name = peek_topic(&lines)?;
        let topic_dir = self.topic_root.join(codec::encode(&topic_name));
        let msg = Message::create(&topic_dir, lines).await?;

        let updated = self.index_message(msg)?;
        self.notify.broadcast(updated.clone());
        Ok(updated)
    }

    fn snapshot(&self) -> Arc<IndexState> {
        self.state.read().unwrap().clone()
    }

    fn index_message(&self, msg: Message) -> Result<Arc<Topic>, IndexError> {
        let _guard = self.write_lock.lock().unwrap();
        let msg = Arc::new(msg);
        let current = self.snapshot();

        let updated = match current.by_name.get(&msg.topic) {
            None => {
                let dir = msg.path.parent().expect("message path always has a parent");
                Topic::from_dir(dir).ok_or_else(|| IndexError::EmptySnapshot(msg.topic.clone()))?
            }
            Some(old) => old
                .with_added(msg.clone())
                .ok_or_else(|| IndexError::EmptySnapshot(msg.topic.clone()))?,
        };
        let updated = Arc::new(updated);

        let mut all_messages = current.all_messages.clone();
        let pos = all_messages
            .iter()
            .position(|m| m.timestamp <= msg.timestamp)
            .unwrap_or(all_messages.len());
        all_messages.insert(pos, msg.clone());

        let mut by_recency: Vec<Arc<Topic>> = current
            .by_recency
            .iter()
            .filter(|t| t.name != updated.name)
            .cloned()
            .collect();
        let pos = by_recency
            .iter()
            .position(|t| t.latest < updated.latest)
            .unwrap_or(by_recency.len());
        by_recency.insert(pos, updated.clone());

        let mut by_name = current.by_name.clone();
        by_name.insert(updated.name.clone(), updated.clone());

        *self.state.write().unwrap() = Arc::new(IndexState {
            by_name,
            by_recency,
            all_messages,
        });

        Ok(updated)
    }
}

fn peek_topic(lines: &[String]) -> Result<String, IndexError> {
    let first = lines
        .first()
        .ok_or_else(|| IndexError::Persist(crate::error::MessageIoError::EmptyFile))?;
    let (_, topic) = message::split_meta(first).map_err(IndexError::Persist)?;
    Ok(topic.to_owned())
}

fn is_hex_dirname(name: &str) -> bool {
    name.len() >= 2 && name.len() % 2 == 0 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

fn ensure_dir(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        if !path.is_dir() {
            return Err(ConfigError::NotADirectory(path.to_owned()));
        }
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|source| ConfigError::CreateDir {
        path: path.to_owned(),
        source,
    })
}
