// ABOUTME: Per-client session: pairs a reader task and a writer task over one TCP connection
// ABOUTME: The reader parses commands and dispatches them to the broker; the writer drains the outbound queue

use crate::broker::{Broker, ClientHandle, ClientId};
use crate::command::{self, Command};
use crate::config::BrokerConfig;
use crate::frame::{FrameReader, FrameWriter};
use crate::shutdown::Shutdown;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Allow one framing error in a row (and attempt to resync); a second
/// consecutive error closes the session.
const MAX_CONSECUTIVE_FRAMING_ERRORS: u32 = 2;

/// Drive one client connection until it disconnects or the broker shuts down.
#[tracing::instrument(skip(socket, broker, config, shutdown), fields(client = %id))]
pub async fn run(
    socket: TcpStream,
    id: ClientId,
    broker: Arc<Broker>,
    config: Arc<BrokerConfig>,
    mut shutdown: Shutdown,
) {
    let (read_half, write_half) = socket.into_split();
    let mut reader = FrameReader::new(read_half);
    let writer = FrameWriter::new(write_half);

    let (tx, rx) = mpsc::channel(config.queue_max_size);
    broker.register(id, ClientHandle::new(tx));

    let writer_task = tokio::spawn(run_writer(
        writer,
        rx,
        Shutdown::new(shutdown.resubscribe()),
        config.drain_timeout,
    ));

    let mut consecutive_framing_errors = 0u32;
    loop {
        tokio::select! {
            result = reader.read_frame() => {
                match result {
                    Ok(Some(body)) => {
                        consecutive_framing_errors = 0;
                        if let Some(verdict) = dispatch(&broker, id, &body) {
                            broker.enqueue_to(id, verdict);
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("client disconnected cleanly");
                        break;
                    }
                    Err(err) => {
                        consecutive_framing_errors += 1;
                        tracing::warn!(%err, consecutive_framing_errors, "framing error");
                        if consecutive_framing_errors >= MAX_CONSECUTIVE_FRAMING_ERRORS {
                            let body = command::format_verdict(false, "?", "Invalid message", &[]);
                            broker.enqueue_to(id, body);
                            break;
                        }
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("session observed shutdown");
                break;
            }
        }
    }

    broker.drop_client(id);
    let _ = writer_task.await;
}

/// Drains the outbound queue onto the socket. Runs until the channel closes
/// (the broker dropped its sender in `drop_client`) or, after a shutdown
/// signal, until `drain_timeout` elapses with frames still queued.
async fn run_writer(
    mut writer: FrameWriter,
    mut rx: mpsc::Receiver<Bytes>,
    mut shutdown: Shutdown,
    drain_timeout: Duration,
) {
    loop {
        tokio::select! {
            body = rx.recv() => {
                match body {
                    Some(body) => {
                        if let Err(err) = writer.write_frame(&body).await {
                            tracing::warn!(%err, "failed to write frame, ending writer");
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = shutdown.recv() => {
                drain_remaining(&mut writer, &mut rx, drain_timeout).await;
                return;
            }
        }
    }
}

async fn drain_remaining(
    writer: &mut FrameWriter,
    rx: &mut mpsc::Receiver<Bytes>,
    drain_timeout: Duration,
) {
    let deadline = tokio::time::sleep(drain_timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            body = rx.recv() => {
                match body {
                    Some(body) => {
                        if writer.write_frame(&body).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = &mut deadline => {
                tracing::warn!("drain timeout elapsed with frames still queued");
                return;
            }
        }
    }
}

/// Parse and apply one command body, returning the verdict frame to enqueue.
fn dispatch(broker: &Broker, id: ClientId, body: &[u8]) -> Option<Bytes> {
    let reply = match command::parse(body) {
        Ok(Command::Sub { topic }) => {
            broker.subscribe(id, &topic);
            command::format_verdict(true, command::VERB_SUB, &topic, &[])
        }
        Ok(Command::Usub { topic }) => {
            broker.unsubscribe(id, &topic);
            command::format_verdict(true, command::VERB_USUB, &topic, &[])
        }
        Ok(Command::Pub { topic, data }) => {
            broker.publish(&topic, &data);
            command::format_verdict(true, command::VERB_PUB, &topic, &[])
        }
        Err(command::CommandError::InvalidTopic { verb, topic }) => {
            command::format_verdict(false, &verb, &topic, &["Invalid topic"])
        }
        Err(command::CommandError::UnknownVerb { verb, topic }) => {
            command::format_verdict(false, &verb, &topic, &["Unknown command"])
        }
        Err(command::CommandError::Malformed) => {
            command::format_verdict(false, "?", "?", &["Malformed command"])
        }
    };
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Reply;

    #[test]
    fn dispatch_sub_subscribes_and_acks() {
        let broker = Broker::new();
        let id = broker.next_client_id();

        let reply = dispatch(&broker, id, b"SUB::weather").unwrap();
        assert_eq!(
            command::parse_reply(&reply).unwrap(),
            Reply::Verdict {
                ok: true,
                verb: command::VERB_SUB.to_string(),
                topic: "weather".to_string(),
                extra: vec![],
            }
        );
        assert_eq!(broker.publish("weather", b"x"), 0); // not registered in the registry yet
    }

    #[test]
    fn dispatch_pub_publishes_and_acks() {
        let broker = Broker::new();
        let id = broker.next_client_id();

        let reply = dispatch(&broker, id, b"PUB::weather,sunny").unwrap();
        assert_eq!(
            command::parse_reply(&reply).unwrap(),
            Reply::Verdict {
                ok: true,
                verb: command::VERB_PUB.to_string(),
                topic: "weather".to_string(),
                extra: vec![],
            }
        );
    }

    #[test]
    fn dispatch_invalid_topic_returns_err_verdict() {
        let broker = Broker::new();
        let id = broker.next_client_id();

        let reply = dispatch(&broker, id, b"SUB::bad topic").unwrap();
        let parsed = command::parse_reply(&reply).unwrap();
        match parsed {
            Reply::Verdict { ok, verb, .. } => {
                assert!(!ok);
                assert_eq!(verb, "SUB");
            }
            _ => panic!("expected a verdict"),
        }
    }

    #[test]
    fn dispatch_malformed_returns_err_verdict() {
        let broker = Broker::new();
        let id = broker.next_client_id();

        let reply = dispatch(&broker, id, b"garbage").unwrap();
        let parsed = command::parse_reply(&reply).unwrap();
        match parsed {
            Reply::Verdict { ok, .. } => assert!(!ok),
            _ => panic!("expected a verdict"),
        }
    }
}
