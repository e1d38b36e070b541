//! Connection Protocol Engine: reads a command line, dispatches to a
//! handler, writes a response, then drains and emits any queued topic
//! notifications.

use crate::charset::Charset;
use crate::error::{IndexError, ProtocolError};
use crate::index::Index;
use crate::notify::{self, NotificationBus};
use crate::protocol;
use crate::topic::Topic;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;

/// A single client session, from `accept` to close. Owns its half of the
/// notification bus subscription and deregisters on every exit path.
pub struct Connection {
    id: u64,
    index: Arc<Index>,
    notify: Arc<NotificationBus>,
    receiver: UnboundedReceiver<Arc<Topic>>,
    charset: Arc<Charset>,
}

/// Outcome of trying to parse and execute the multi-line `P` command body.
/// `Eof` is distinguished from a [`ProtocolError`]/[`IndexError`] because it
/// means the client hung up mid-command — the connection closes silently
/// rather than getting an `E` response it will never read.
enum PostOutcome {
    Ok,
    Eof,
    Protocol(ProtocolError),
    Index(IndexError),
}

impl fmt::Display for PostOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostOutcome::Protocol(e) => write!(f, "{e}"),
            PostOutcome::Index(e) => write!(f, "{e}"),
            PostOutcome::Ok | PostOutcome::Eof => unreachable!("not rendered to a client"),
        }
    }
}

impl Connection {
    pub fn new(
        id: u64,
        index: Arc<Index>,
        notify: Arc<NotificationBus>,
        receiver: UnboundedReceiver<Arc<Topic>>,
        charset: Arc<Charset>,
    ) -> Connection {
        Connection {
            id,
            index,
            notify,
            receiver,
            charset,
        }
    }

    /// Drive the connection to completion. Never returns an error — every
    /// failure this function can observe either ends the connection or is
    /// turned into a client-visible `E` line.
    pub async fn run(mut self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = BufWriter::new(write_half);

        loop {
            match self.turn(&mut reader, &mut writer).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    tracing::debug!(id = self.id, error = %e, "connection I/O error, closing");
                    break;
                }
            }
        }

        self.notify.deregister(self.id);
        tracing::debug!(id = self.id, "connection closed");
    }

    /// Run one `READ_COMMAND -> HANDLE -> EMIT_NOTIFICATIONS` cycle.
    /// Returns `Ok(true)` to keep reading, `Ok(false)` when the connection
    /// should close (successful `X`, or end-of-input from the client).
    async fn turn<R, W>(&mut self, reader: &mut R, writer: &mut W) -> std::io::Result<bool>
    where
        R: AsyncBufReadExt + Unpin,
        W: AsyncWriteExt + Unpin,
    {
        let Some(line) = read_line(reader, &self.charset).await? else {
            return Ok(false);
        };
        let (opcode, arg) = protocol::parse_opcode_line(&line);

        match opcode {
            'X' => {
                if arg.is_some() {
                    self.write_error(writer, &ProtocolError::MissingArgument.to_string())
                        .await?;
                    self.emit_notifications(writer).await?;
                    writer.flush().await?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            'P' => {
                match self.handle_post(reader).await {
                    PostOutcome::Eof => return Ok(false),
                    PostOutcome::Ok => {}
                    other => self.write_error(writer, &other.to_string()).await?,
                }
                self.emit_notifications(writer).await?;
                writer.flush().await?;
                Ok(true)
            }
            'L' => {
                self.handle_list(arg, writer).await?;
                self.emit_notifications(writer).await?;
                writer.flush().await?;
                Ok(true)
            }
            'T' => {
                self.handle_topic(arg, writer).await?;
                self.emit_notifications(writer).await?;
                writer.flush().await?;
                Ok(true)
            }
            'W' => {
                self.handle_window(arg, writer).await?;
                self.emit_notifications(writer).await?;
                writer.flush().await?;
                Ok(true)
            }
            _ => {
                let reason = ProtocolError::UnknownCommand(opcode.to_string());
                self.write_error(writer, &reason.to_string()).await?;
                self.emit_notifications(writer).await?;
                writer.flush().await?;
                Ok(true)
            }
        }
    }

    async fn handle_post<R>(&self, reader: &mut R) -> PostOutcome
    where
        R: AsyncBufReadExt + Unpin,
    {
        let count_line = match read_line(reader, &self.charset).await {
            Ok(Some(l)) => l,
            Ok(None) => return PostOutcome::Eof,
            Err(_) => return PostOutcome::Eof,
        };
        let message_count = match protocol::parse_count(&count_line) {
            Ok(n) => n,
            Err(e) => return PostOutcome::Protocol(e),
        };

        // Keep consuming every message in the batch even after one fails to
        // index — a mid-batch `IndexError` still has a well-formed
        // remainder on the wire, and abandoning it here would leave the
        // unread message lines to be misread as the next command. Only the
        // first failure is reported; later ones are still persisted.
        let mut first_failure = None;
        for _ in 0..message_count {
            let k_line = match read_line(reader, &self.charset).await {
                Ok(Some(l)) => l,
                Ok(None) => return PostOutcome::Eof,
                Err(_) => return PostOutcome::Eof,
            };
            let line_count = match protocol::parse_count(&k_line) {
                Ok(n) => n,
                Err(e) => return PostOutcome::Protocol(e),
            };
            if line_count == 0 {
                return PostOutcome::Protocol(ProtocolError::EmptyMessage);
            }

            let mut lines = Vec::with_capacity(line_count as usize);
            for _ in 0..line_count {
                match read_line(reader, &self.charset).await {
                    Ok(Some(l)) => lines.push(l),
                    Ok(None) => return PostOutcome::Eof,
                    Err(_) => return PostOutcome::Eof,
                }
            }

            if let Err(e) = self.index.put(lines).await {
                first_failure.get_or_insert(PostOutcome::Index(e));
            }
        }

        first_failure.unwrap_or(PostOutcome::Ok)
    }

    async fn handle_list<W>(&self, arg: Option<&str>, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWriteExt + Unpin,
    {
        let topics = self.index.topics_by_recency();
        let limit = match arg {
            None => topics.len(),
            Some(s) => match protocol::parse_count(s) {
                Ok(n) => (n as usize).min(topics.len()),
                Err(e) => return self.write_error(writer, &e.to_string()).await,
            },
        };

        let mut out = protocol::format_count_line(limit);
        for topic in topics.iter().take(limit) {
            out.push_str(&protocol::format_topic_line(topic.latest, &topic.name));
        }
        self.write_raw(writer, &out).await
    }

    async fn handle_topic<W>(&self, arg: Option<&str>, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWriteExt + Unpin,
    {
        let Some(name) = arg else {
            return self
                .write_error(writer, &ProtocolError::MissingArgument.to_string())
                .await;
        };

        let Some(topic) = self.index.get_topic(name) else {
            return self.write_raw(writer, &protocol::format_count_line(0)).await;
        };

        let mut blocks = Vec::with_capacity(topic.messages.len());
        for msg in &topic.messages {
            match msg.read_lines().await {
                Ok(lines) => blocks.push(lines),
                Err(e) => {
                    tracing::warn!(path = %msg.path.display(), error = %e, "dropping unreadable message from response");
                }
            }
        }

        let total_lines: usize = blocks.iter().map(Vec::len).sum();
        let mut out = protocol::format_count_line(total_lines);
        for lines in &blocks {
            out.push_str(&protocol::format_message_block(lines));
        }
        self.write_raw(writer, &out).await
    }

    async fn handle_window<W>(&self, arg: Option<&str>, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWriteExt + Unpin,
    {
        let Some(arg) = arg else {
            return self
                .write_error(writer, &ProtocolError::MissingArgument.to_string())
                .await;
        };
        let ts = match protocol::parse_count(arg) {
            Ok(n) => n,
            Err(e) => return self.write_error(writer, &e.to_string()).await,
        };

        let all_messages = self.index.messages_by_recency();
        // Descending by timestamp: the prefix with timestamp >= ts is
        // exactly where the "is this still in the window" predicate holds.
        let limit = all_messages.partition_point(|m| m.timestamp >= ts);

        let mut blocks = Vec::with_capacity(limit);
        for msg in &all_messages[..limit] {
            match msg.read_lines().await {
                Ok(lines) => blocks.push(lines),
                Err(e) => {
                    tracing::warn!(path = %msg.path.display(), error = %e, "dropping unreadable message from response");
                }
            }
        }

        let mut out = protocol::format_count_line(blocks.len());
        for lines in &blocks {
            out.push_str(&protocol::format_message_block(lines));
        }
        self.write_raw(writer, &out).await
    }

    async fn emit_notifications<W>(&mut self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWriteExt + Unpin,
    {
        let drained = notify::drain(&mut self.receiver);
        if drained.is_empty() {
            return Ok(());
        }
        let mut out = protocol::format_notification_header(drained.len());
        for topic in &drained {
            out.push_str(&protocol::format_topic_line(topic.latest, &topic.name));
        }
        self.write_raw(writer, &out).await
    }

    async fn write_error<W>(&self, writer: &mut W, reason: &str) -> std::io::Result<()>
    where
        W: AsyncWriteExt + Unpin,
    {
        self.write_raw(writer, &protocol::format_error(reason)).await
    }

    async fn write_raw<W>(&self, writer: &mut W, text: &str) -> std::io::Result<()>
    where
        W: AsyncWriteExt + Unpin,
    {
        writer.write_all(&self.charset.encode(text)).await
    }
}

/// Read one LF-terminated line, decode it through `charset`, and strip the
/// terminator (and a trailing `\r`, for tolerance of CRLF clients). Returns
/// `Ok(None)` on clean end-of-input.
async fn read_line<R>(reader: &mut R, charset: &Charset) -> std::io::Result<Option<String>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(charset.decode(&buf)))
}
