use std::time::Duration;
use thiserror::Error;

/// Outcomes of channel operations other than a successful push or pop
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("invalid channel capacity: {0} (must be at least 1)")]
    InvalidCapacity(usize),

    #[error("channel cancelled by consumer")]
    Cancelled,

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("push on a closed channel")]
    Closed,

    /// Producer closed the channel and every buffered message was consumed
    #[error("end of stream")]
    EndOfStream,
}

impl ChannelError {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ChannelError::EndOfStream)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChannelError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::TimedOut(_))
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
