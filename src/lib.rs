//! A localhost publish/subscribe message broker and embedded client.
//!
//! Clients connect over TCP, subscribe to named topics, and publish data to
//! them; the broker fans each publish out to every current subscriber. See
//! [`Broker`] and [`Listener`] for the server side, and [`PubSubClient`] for
//! the client side.
//!
//! # Examples
//!
//! ```rust,no_run
//! use pubsub::{BrokerConfig, Listener, PubSubClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = Listener::bind(&BrokerConfig::default()).await?;
//!     let port = listener.local_port();
//!     tokio::spawn(listener.run());
//!
//!     let mut client = PubSubClient::connect(("127.0.0.1", port)).await?;
//!     client.subscribe("weather").await?;
//!     client.publish("weather", "sunny").await?;
//!     let data = client.recv().await?;
//!     println!("received {data:?}");
//!
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod frame;
pub mod listener;
pub mod session;
pub mod shutdown;
pub mod topics;

pub use broker::{Broker, ClientId};
pub use client::{ClientError, PubSubClient};
pub use config::BrokerConfig;
pub use error::{PubSubError, Result};
pub use listener::{Listener, ShutdownHandle};
