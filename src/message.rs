//! Message file I/O: parsing a message file's meta line and body, and
//! writing new messages atomically via temp file + rename.

use crate::error::MessageIoError;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// An immutable on-disk message: a topic, a server-assigned timestamp, and
/// the absolute path of the backing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub timestamp: u64,
    pub path: PathBuf,
}

impl Message {
    /// Parse the meta line of the file at `path` and verify its topic
    /// matches `expected_topic`. Any parse, mismatch, or I/O failure is
    /// returned for the caller to log-and-drop — this
    /// function never panics on malformed input.
    pub fn load(path: &Path, expected_topic: &str) -> Result<Message, MessageIoError> {
        let contents = std::fs::read_to_string(path)?;
        let meta = contents.split('\n').next().ok_or(MessageIoError::EmptyFile)?;
        let (ts_str, topic) = split_meta(meta)?;
        if topic != expected_topic {
            return Err(MessageIoError::TopicMismatch {
                expected: expected_topic.to_owned(),
                found: topic.to_owned(),
            });
        }
        let timestamp = ts_str
            .parse::<u64>()
            .map_err(|_| MessageIoError::BadTimestamp(ts_str.to_owned()))?;
        Ok(Message {
            topic: topic.to_owned(),
            timestamp,
            path: path.to_owned(),
        })
    }

    /// Read this message's stored lines back off disk, meta line included
    /// exactly as written (with the server-assigned timestamp). Used when
    /// emitting a message as `K` followed by `K` lines on the wire.
    pub async fn read_lines(&self) -> Result<Vec<String>, MessageIoError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let mut lines: Vec<String> = contents.split('\n').map(str::to_owned).collect();
        if lines.last().is_some_and(String::is_empty) {
            lines.pop();
        }
        Ok(lines)
    }

    /// Validate and persist a freshly posted message.
    ///
    /// `lines[0]` arrives as `"<client_timestamp> <topic>"`; the topic is
    /// authoritative, the timestamp is not — it is discarded and replaced
    /// with the server's own clock. The topic directory is created if it
    /// doesn't exist, the body is written to a fresh temp file, and the
    /// temp file is renamed into place under a random UUID filename.
    ///
    /// The filesystem work runs on a blocking thread, matching the
    /// `spawn_blocking`-wrapped `*_blocking` helper pattern used for
    /// synchronous I/O elsewhere in this codebase.
    pub async fn create(topic_dir: &Path, lines: Vec<String>) -> Result<Message, MessageIoError> {
        if lines.is_empty() {
            return Err(MessageIoError::EmptyFile);
        }
        let (ts_str, topic) = split_meta(&lines[0])?;
        // Validate the inbound timestamp even though it's discarded: a
        // malformed meta line is still a malformed post.
        ts_str
            .parse::<u64>()
            .map_err(|_| MessageIoError::BadTimestamp(ts_str.to_owned()))?;
        let topic = topic.to_owned();
        let topic_dir = topic_dir.to_owned();
        let now = now_secs();

        tokio::task::spawn_blocking(move || create_blocking(&topic_dir, &topic, now, lines))
            .await
            .expect("message persist task panicked")
    }
}

/// Split a meta line into `(timestamp_str, topic)`, requiring a single
/// space with non-empty content on both sides.
pub(crate) fn split_meta(meta: &str) -> Result<(&str, &str), MessageIoError> {
    let (ts, topic) = meta
        .split_once(' ')
        .ok_or_else(|| MessageIoError::MalformedMeta(meta.to_owned()))?;
    if ts.is_empty() {
        return Err(MessageIoError::MalformedMeta(meta.to_owned()));
    }
    if topic.is_empty() {
        return Err(MessageIoError::MissingTopic(meta.to_owned()));
    }
    Ok((ts, topic))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn create_blocking(
    topic_dir: &Path,
    topic: &str,
    now: u64,
    mut lines: Vec<String>,
) -> Result<Message, MessageIoError> {
    std::fs::create_dir_all(topic_dir)?;
    lines[0] = format!("{now} {topic}");

    let mut body = String::new();
    for line in &lines {
        body.push_str(line);
        body.push('\n');
    }

    // Same-filesystem temp file so the later rename is a crash-atomic
    // directory entry swap rather than a copy.
    let mut tmp = tempfile::Builder::new()
        .prefix(".textboard-")
        .tempfile_in(topic_dir)?;
    tmp.write_all(body.as_bytes())?;
    tmp.flush()?;

    let dest = topic_dir.join(uuid::Uuid::new_v4().to_string());
    match tmp.persist(&dest) {
        Ok(_) => Ok(Message {
            topic: topic.to_owned(),
            timestamp: now,
            path: dest,
        }),
        Err(persist_err) => {
            // Atomic rename was rejected (e.g. a filesystem that doesn't
            // support it); fall back to a non-atomic copy, then best-effort
            // clean up the temp file either way.
            let tmp_path = persist_err.file.path().to_owned();
            tracing::warn!(
                path = %tmp_path.display(),
                error = %persist_err.error,
                "atomic rename rejected, falling back to copy"
            );
            let fallback = std::fs::copy(&tmp_path, &dest).and_then(|_| std::fs::remove_file(&tmp_path));
            match fallback {
                Ok(()) => Ok(Message {
                    topic: topic.to_owned(),
                    timestamp: now,
                    path: dest,
                }),
                Err(e) => {
                    let _ = std::fs::remove_file(&tmp_path);
                    Err(MessageIoError::Io(e))
                }
            }
        }
    }
}
