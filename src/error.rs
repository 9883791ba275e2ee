// ABOUTME: The crate's error taxonomy, covering both broker-side and client-side failures

use crate::command::CommandError;
use crate::frame::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error(transparent)]
    Framing(#[from] FrameError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("no port available in the configured scan range")]
    FatalBind(#[source] std::io::Error),

    #[error("broker rejected the request: {0}")]
    Verdict(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PubSubError>;
