//! A line-oriented TCP message board: clients post short text messages to
//! named topics and query them back by recency or time window, with
//! live fan-out notification of topic activity to every connected client.

pub mod charset;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod index;
pub mod listener;
pub mod message;
pub mod notify;
pub mod protocol;
pub mod topic;

use crate::charset::Charset;
use crate::config::Config;
use crate::error::ConfigError;
use crate::index::Index;
use crate::notify::NotificationBus;
use std::sync::Arc;

/// Build the shared index and notification bus from `config`, then run
/// the accept loop until the process is killed. Startup failures (a bad
/// database root, an unknown charset) surface as [`ConfigError`] for
/// `main` to log and turn into a non-zero exit; nothing past this point
/// calls `std::process::exit`.
pub async fn run(config: Config) -> Result<(), ConfigError> {
    let charset = Arc::new(Charset::resolve(&config.charset_label)?);
    let notify = Arc::new(NotificationBus::new());
    let index = Arc::new(Index::open(&config.db_root, notify.clone())?);

    tracing::info!(
        addr = %config.addr,
        db = %config.db_root.display(),
        charset = %config.charset_label,
        "starting"
    );

    if let Err(e) = listener::serve(config.addr, index, notify, charset).await {
        tracing::error!(error = %e, "listener exited");
    }
    Ok(())
}
