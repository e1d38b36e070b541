//! End-to-end protocol tests: drive a real loopback `TcpStream` against a
//! server spawned in-process, covering the scenarios and boundary
//! behaviors this project is expected to satisfy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use textboard::charset::Charset;
use textboard::connection::Connection;
use textboard::index::Index;
use textboard::notify::NotificationBus;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

async fn spawn_server(db_root: &std::path::Path) -> SocketAddr {
    let notify = Arc::new(NotificationBus::new());
    let index = Arc::new(Index::open(db_root, notify.clone()).unwrap());
    let charset = Arc::new(Charset::utf8());

    // Bind synchronously so the caller never races the accept loop's startup.
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    std_listener.set_nonblocking(true).unwrap();
    let addr = std_listener.local_addr().unwrap();
    let tokio_listener = tokio::net::TcpListener::from_std(std_listener).unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _peer) = match tokio_listener.accept().await {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            let subscription = notify.register();
            let conn = Connection::new(
                subscription.id,
                index.clone(),
                notify.clone(),
                subscription.receiver,
                charset.clone(),
            );
            tokio::spawn(async move { conn.run(stream).await });
        }
    });

    addr
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for a line")
        .expect("read_line failed");
    line
}

async fn connect(addr: SocketAddr) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.expect("connect failed");
    let (read_half, write_half) = stream.into_split();
    (BufReader::new(read_half), write_half)
}

/// Post a message and block until the server has actually indexed it, by
/// reading the poster's own self-notification (every connection is
/// subscribed to the bus from the moment it's accepted, so a successful
/// `put` always produces at least one notification line back to its own
/// poster). This turns "fire a `P` and move on" into a synchronization
/// point without depending on real wall-clock sleeps.
async fn post_and_await(reader: &mut BufReader<OwnedReadHalf>, writer: &mut OwnedWriteHalf, topic: &str, body: &str) {
    let msg = format!("P\n1\n2\n0 {topic}\n{body}\n");
    writer.write_all(msg.as_bytes()).await.unwrap();
    assert_eq!(read_line(reader).await, "N 1\n");
    read_line(reader).await; // the notification's topic line
}

#[tokio::test]
async fn single_post_and_recency_query() {
    let db = TempDir::new().unwrap();
    let addr = spawn_server(db.path()).await;

    let (mut reader_a, mut writer_a) = connect(addr).await;
    post_and_await(&mut reader_a, &mut writer_a, "hello", "world").await;

    let (mut reader_b, mut writer_b) = connect(addr).await;
    writer_b.write_all(b"L\n").await.unwrap();

    assert_eq!(read_line(&mut reader_b).await, "1\n");
    let topic_line = read_line(&mut reader_b).await;
    assert!(topic_line.ends_with(" hello\n"), "got {topic_line:?}");
}

#[tokio::test]
async fn topic_recency_ordering() {
    let db = TempDir::new().unwrap();
    let addr = spawn_server(db.path()).await;

    for (topic, body) in [("hello", "a"), ("world", "b"), ("hello", "c")] {
        let (mut reader, mut writer) = connect(addr).await;
        post_and_await(&mut reader, &mut writer, topic, body).await;
        // Each post is on its own connection; a short pause keeps distinct
        // posts from landing in the same server-clock second, which would
        // make the recency ordering this test checks ambiguous.
        tokio::time::sleep(Duration::from_millis(1100)).await;
    }

    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"L\n").await.unwrap();
    assert_eq!(read_line(&mut reader).await, "2\n");
    assert!(read_line(&mut reader).await.ends_with(" hello\n"));
    assert!(read_line(&mut reader).await.ends_with(" world\n"));
}

#[tokio::test]
async fn news_window_inclusive_boundary() {
    let db = TempDir::new().unwrap();
    let addr = spawn_server(db.path()).await;

    for (topic, body) in [("hello", "a"), ("world", "b"), ("hello", "c")] {
        let (mut reader, mut writer) = connect(addr).await;
        post_and_await(&mut reader, &mut writer, topic, body).await;
    }

    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"W 0\n").await.unwrap();
    assert_eq!(read_line(&mut reader).await, "3\n");
    for _ in 0..3 {
        assert_eq!(read_line(&mut reader).await, "2\n");
        read_line(&mut reader).await; // meta line
        read_line(&mut reader).await; // body line
    }
}

#[tokio::test]
async fn unknown_topic_returns_zero() {
    let db = TempDir::new().unwrap();
    let addr = spawn_server(db.path()).await;

    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"T ghost\n").await.unwrap();
    assert_eq!(read_line(&mut reader).await, "0\n");
}

#[tokio::test]
async fn notification_fan_out_between_two_clients() {
    let db = TempDir::new().unwrap();
    let addr = spawn_server(db.path()).await;

    let (mut reader_a, mut writer_a) = connect(addr).await;
    let (mut reader_b, mut writer_b) = connect(addr).await;

    // Prime both connections so their subscriptions exist before the post.
    writer_a.write_all(b"L\n").await.unwrap();
    assert_eq!(read_line(&mut reader_a).await, "0\n");
    writer_b.write_all(b"L\n").await.unwrap();
    assert_eq!(read_line(&mut reader_b).await, "0\n");

    writer_a.write_all(b"P\n1\n2\n0 hello\nworld\n").await.unwrap();
    // A's own post turn broadcasts before it drains its own queue, so A
    // sees its own notification as part of this same turn's response.
    assert_eq!(read_line(&mut reader_a).await, "N 1\n");
    assert!(read_line(&mut reader_a).await.ends_with(" hello\n"));

    // B's next turn picks up the notification queued since its last turn.
    writer_b.write_all(b"L\n").await.unwrap();
    assert_eq!(read_line(&mut reader_b).await, "1\n");
    assert!(read_line(&mut reader_b).await.ends_with(" hello\n"));
    assert_eq!(read_line(&mut reader_b).await, "N 1\n");
    assert!(read_line(&mut reader_b).await.ends_with(" hello\n"));
}

#[tokio::test]
async fn persistence_round_trip_across_restart() {
    let db = TempDir::new().unwrap();

    {
        let addr = spawn_server(db.path()).await;
        for topic in ["a", "b", "c"] {
            for i in 0..3 {
                let (mut reader, mut writer) = connect(addr).await;
                let body = format!("msg{i}");
                post_and_await(&mut reader, &mut writer, topic, &body).await;
            }
        }
    }

    let addr = spawn_server(db.path()).await;
    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"L\n").await.unwrap();
    assert_eq!(read_line(&mut reader).await, "3\n");

    for topic in ["a", "b", "c"] {
        let (mut reader, mut writer) = connect(addr).await;
        let cmd = format!("T {topic}\n");
        writer.write_all(cmd.as_bytes()).await.unwrap();
        assert_eq!(read_line(&mut reader).await, "6\n");
    }
}

#[tokio::test]
async fn list_with_zero_limit_and_no_argument() {
    let db = TempDir::new().unwrap();
    let addr = spawn_server(db.path()).await;

    for topic in ["a", "b"] {
        let (mut reader, mut writer) = connect(addr).await;
        post_and_await(&mut reader, &mut writer, topic, "body").await;
    }

    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"L 0\n").await.unwrap();
    assert_eq!(read_line(&mut reader).await, "0\n");

    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"L\n").await.unwrap();
    assert_eq!(read_line(&mut reader).await, "2\n");
}

#[tokio::test]
async fn post_with_zero_messages_is_a_no_op_success() {
    let db = TempDir::new().unwrap();
    let addr = spawn_server(db.path()).await;

    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"P\n0\n").await.unwrap();
    writer.write_all(b"L\n").await.unwrap();
    assert_eq!(read_line(&mut reader).await, "0\n");
}

#[tokio::test]
async fn unknown_command_gets_error_line() {
    let db = TempDir::new().unwrap();
    let addr = spawn_server(db.path()).await;

    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"Z\n").await.unwrap();
    let line = read_line(&mut reader).await;
    assert!(line.starts_with("E "), "got {line:?}");
}

#[tokio::test]
async fn blank_command_line_gets_error_not_a_dropped_connection() {
    let db = TempDir::new().unwrap();
    let addr = spawn_server(db.path()).await;

    let (mut reader, mut writer) = connect(addr).await;
    // A bare newline: the client sent no opcode at all. This must not
    // crash the connection's task; it's just another unrecognized
    // command.
    writer.write_all(b"\n").await.unwrap();
    let line = read_line(&mut reader).await;
    assert!(line.starts_with("E "), "got {line:?}");

    // The connection is still alive and usable afterwards.
    writer.write_all(b"L\n").await.unwrap();
    assert_eq!(read_line(&mut reader).await, "0\n");
}
