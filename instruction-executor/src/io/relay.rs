//! Bot relay client.
//!
//! The relay is an external process bridging to a chat service. The contract
//! is opaque text in both directions, one JSON object per line over TCP:
//! progress notifications go out, `user_response` answers come back. All
//! delivery problems are logged and ignored; the relay is never allowed to
//! stall or fail the protocol loop beyond the caller's timeout.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::io::config::RelayConfig;

/// Wire messages exchanged with the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    BuildStart {
        build_id: String,
        description: String,
    },
    BuildProgress {
        message: String,
    },
    BuildQuestion {
        message: String,
    },
    BuildError {
        message: String,
    },
    BuildComplete {
        message: String,
    },
    /// Inbound: an answer typed by a human.
    UserResponse {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<i64>,
    },
}

pub trait Relay {
    /// Session identifier sent as `build_id`.
    fn session_id(&self) -> &str;

    /// Send a notification. Never fails; problems are logged.
    fn notify(&self, message: &RelayMessage);

    /// Block up to `timeout` for an answer from a human.
    fn wait_for_answer(&self, timeout: Duration) -> Option<String>;

    /// Drop answers that arrived while no question was open.
    ///
    /// Called before every question and on every reset, so a late reply can
    /// only ever answer the question it was typed for.
    fn discard_pending(&self);
}

/// Relay used when none is configured: notifications vanish and nobody answers.
#[derive(Debug, Clone, Default)]
pub struct NullRelay;

impl Relay for NullRelay {
    fn session_id(&self) -> &str {
        "local"
    }

    fn notify(&self, message: &RelayMessage) {
        debug!(?message, "no relay configured; dropping notification");
    }

    fn wait_for_answer(&self, timeout: Duration) -> Option<String> {
        thread::sleep(timeout);
        None
    }

    fn discard_pending(&self) {}
}

/// Newline-delimited JSON relay over a TCP socket.
pub struct TcpRelay {
    session_id: String,
    writer: Mutex<TcpStream>,
    answers: Mutex<Receiver<String>>,
}

impl TcpRelay {
    pub fn connect(addr: &str, session_id: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).with_context(|| format!("connect relay {addr}"))?;
        let reader = stream.try_clone().context("clone relay stream")?;
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("relay-reader".to_string())
            .spawn(move || read_answers(reader, tx))
            .context("spawn relay reader")?;
        let session_id = session_id.into();
        info!(addr, session_id = %session_id, "relay connected");
        Ok(Self {
            session_id,
            writer: Mutex::new(stream),
            answers: Mutex::new(rx),
        })
    }
}

impl Relay for TcpRelay {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn notify(&self, message: &RelayMessage) {
        let mut line = match serde_json::to_string(message) {
            Ok(line) => line,
            Err(err) => {
                warn!(err = %err, "serialize relay message");
                return;
            }
        };
        line.push('\n');
        let Ok(mut writer) = self.writer.lock() else {
            warn!("relay writer lock poisoned");
            return;
        };
        if let Err(err) = writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.flush())
        {
            warn!(err = %err, "relay write failed");
        }
    }

    fn wait_for_answer(&self, timeout: Duration) -> Option<String> {
        let Ok(answers) = self.answers.lock() else {
            warn!("relay answer lock poisoned");
            return None;
        };
        match answers.recv_timeout(timeout) {
            Ok(answer) => Some(answer),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                // Reader is gone; still honor the timeout so callers don't spin.
                drop(answers);
                thread::sleep(timeout);
                None
            }
        }
    }

    fn discard_pending(&self) {
        let Ok(answers) = self.answers.lock() else {
            warn!("relay answer lock poisoned");
            return;
        };
        let mut discarded = 0usize;
        while let Ok(answer) = answers.try_recv() {
            debug!(answer = %answer, "discarding stale relay answer");
            discarded += 1;
        }
        if discarded > 0 {
            info!(discarded, "discarded relay answers with no open question");
        }
    }
}

fn read_answers(stream: TcpStream, tx: Sender<String>) {
    for line in BufReader::new(stream).lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(err = %err, "relay read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RelayMessage>(&line) {
            Ok(RelayMessage::UserResponse { message, chat_id }) => {
                debug!(?chat_id, "relay answer received");
                if tx.send(message).is_err() {
                    break;
                }
            }
            Ok(other) => debug!(message = ?other, "ignoring relay message"),
            Err(err) => warn!(err = %err, "unparsable relay message"),
        }
    }
    debug!("relay reader finished");
}

/// The relay selected at startup.
pub enum RelayClient {
    Tcp(TcpRelay),
    Null(NullRelay),
}

impl RelayClient {
    /// Connect when configured; fall back to [`NullRelay`] on any failure.
    pub fn from_config(config: Option<&RelayConfig>) -> Self {
        let Some(config) = config else {
            return RelayClient::Null(NullRelay);
        };
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(generate_session_id);
        match TcpRelay::connect(&config.addr, session_id) {
            Ok(relay) => RelayClient::Tcp(relay),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "relay unavailable; continuing without it");
                RelayClient::Null(NullRelay)
            }
        }
    }
}

impl Relay for RelayClient {
    fn session_id(&self) -> &str {
        match self {
            RelayClient::Tcp(relay) => relay.session_id(),
            RelayClient::Null(relay) => relay.session_id(),
        }
    }

    fn notify(&self, message: &RelayMessage) {
        match self {
            RelayClient::Tcp(relay) => relay.notify(message),
            RelayClient::Null(relay) => relay.notify(message),
        }
    }

    fn wait_for_answer(&self, timeout: Duration) -> Option<String> {
        match self {
            RelayClient::Tcp(relay) => relay.wait_for_answer(timeout),
            RelayClient::Null(relay) => relay.wait_for_answer(timeout),
        }
    }

    fn discard_pending(&self) {
        match self {
            RelayClient::Tcp(relay) => relay.discard_pending(),
            RelayClient::Null(relay) => relay.discard_pending(),
        }
    }
}

fn generate_session_id() -> String {
    format!("build-{}", chrono::Local::now().format("%Y%m%d%H%M%S"))
}
