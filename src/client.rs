// ABOUTME: The embedded client library: connects, subscribes/unsubscribes, publishes, and receives data

use crate::command::{self, Command, Reply};
use crate::error::{PubSubError, Result};
use crate::frame::Connection;
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpStream, ToSocketAddrs};

/// Returned when the broker answers a command with an `ERR` verdict.
#[derive(Debug, Error)]
#[error("broker rejected {verb}::{topic}: {reason}")]
pub struct ClientError {
    pub verb: String,
    pub topic: String,
    pub reason: String,
}

/// A connection to a broker, wrapping one request/response `Connection` and
/// a buffer of data frames received out of band (e.g. while waiting on a
/// different command's verdict).
pub struct PubSubClient {
    connection: Connection,
    inbound: VecDeque<Bytes>,
}

impl PubSubClient {
    /// Connect to a broker at `addr`. The `addr` argument is passed directly
    /// to `TcpStream::connect`, performing any asynchronous DNS lookup and
    /// establishing the TCP connection; an error at either step is bubbled
    /// up to the caller.
    pub async fn connect<T: ToSocketAddrs>(addr: T) -> Result<PubSubClient> {
        let socket = TcpStream::connect(addr).await?;
        let connection = Connection::new(socket);
        Ok(PubSubClient {
            connection,
            inbound: VecDeque::new(),
        })
    }

    /// Subscribe to `topic`.
    #[tracing::instrument(skip(self))]
    pub async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.send_command(Command::Sub {
            topic: topic.to_string(),
        })
        .await
    }

    /// Unsubscribe from `topic`.
    #[tracing::instrument(skip(self))]
    pub async fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        self.send_command(Command::Usub {
            topic: topic.to_string(),
        })
        .await
    }

    /// Publish `data` to `topic`.
    #[tracing::instrument(skip(self, data))]
    pub async fn publish(&mut self, topic: &str, data: impl Into<Bytes>) -> Result<()> {
        self.send_command(Command::Pub {
            topic: topic.to_string(),
            data: data.into(),
        })
        .await
    }

    async fn send_command(&mut self, command: Command) -> Result<()> {
        self.connection.write_frame(&command.to_body()).await?;

        loop {
            let body = self
                .connection
                .read_frame()
                .await?
                .ok_or_else(|| PubSubError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)))?;

            match command::parse_reply(&body)? {
                Reply::Data { payload } => self.inbound.push_back(payload),
                Reply::Verdict {
                    ok: true,
                    ..
                } => return Ok(()),
                Reply::Verdict { ok: false, verb, topic, extra } => {
                    let reason = extra.join(" ");
                    return Err(PubSubError::Verdict(
                        ClientError { verb, topic, reason }.to_string(),
                    ));
                }
            }
        }
    }

    /// Return a data frame already buffered from a prior read, if any,
    /// without touching the socket.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.inbound.pop_front()
    }

    /// Receive the next published data frame, reading from the socket if
    /// none are already buffered. Stray verdicts (there should be none once
    /// no command is outstanding) are skipped.
    #[tracing::instrument(skip(self))]
    pub async fn recv(&mut self) -> Result<Bytes> {
        if let Some(payload) = self.inbound.pop_front() {
            return Ok(payload);
        }

        loop {
            let body = self
                .connection
                .read_frame()
                .await?
                .ok_or_else(|| PubSubError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)))?;

            if let Reply::Data { payload } = command::parse_reply(&body)? {
                return Ok(payload);
            }
        }
    }

    /// Like `recv`, but gives up after `duration` with `Ok(None)` instead of
    /// waiting indefinitely.
    pub async fn recv_timeout(&mut self, duration: Duration) -> Result<Option<Bytes>> {
        match tokio::time::timeout(duration, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}
