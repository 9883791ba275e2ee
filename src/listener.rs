// ABOUTME: Binds the broker's listening socket, drives the accept loop, and coordinates shutdown

use crate::broker::Broker;
use crate::config::BrokerConfig;
use crate::error::{PubSubError, Result};
use crate::session;
use crate::shutdown::Shutdown;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// A bound, not-yet-running broker listener. Single-use: `run` consumes it.
pub struct Listener {
    listener: TcpListener,
    broker: Arc<Broker>,
    config: Arc<BrokerConfig>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown: Shutdown,
}

impl Listener {
    /// Bind to the first free port in `config.base_port..=config.base_port + config.port_scan_range`.
    #[tracing::instrument(skip(config))]
    pub async fn bind(config: &BrokerConfig) -> Result<Self> {
        let mut last_err = None;
        for port in config.base_port..=config.base_port.saturating_add(config.port_scan_range) {
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => {
                    let (notify_shutdown, shutdown_rx) = broadcast::channel(1);
                    return Ok(Listener {
                        listener,
                        broker: Arc::new(Broker::new()),
                        config: Arc::new(config.clone()),
                        notify_shutdown,
                        shutdown: Shutdown::new(shutdown_rx),
                    });
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(PubSubError::FatalBind(
            last_err.unwrap_or_else(|| std::io::Error::other("no ports configured")),
        ))
    }

    /// The port actually bound, once `bind` has succeeded.
    pub fn local_port(&self) -> u16 {
        self.listener
            .local_addr()
            .expect("bound listener has a local address")
            .port()
    }

    /// A cloneable handle that can trigger a graceful shutdown from elsewhere.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            notify_shutdown: self.notify_shutdown.clone(),
        }
    }

    /// Run the accept loop until a shutdown signal arrives. Every accepted
    /// connection is handed to a freshly spawned session task.
    #[tracing::instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (socket, addr) = accepted?;
                    let id = self.broker.next_client_id();
                    tracing::debug!(%id, %addr, "accepted connection");

                    let broker = Arc::clone(&self.broker);
                    let config = Arc::clone(&self.config);
                    let shutdown = Shutdown::new(self.notify_shutdown.subscribe());
                    tokio::spawn(session::run(socket, id, broker, config, shutdown));
                }
                _ = self.shutdown.recv() => {
                    tracing::info!("listener shutting down, no longer accepting connections");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// A handle that can signal every live session and the accept loop to shut down.
#[derive(Clone)]
pub struct ShutdownHandle {
    notify_shutdown: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Best-effort: if no task is listening (e.g. they've all already exited),
    /// there is nothing left to notify.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }
}
