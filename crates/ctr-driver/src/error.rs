//! Error types for counter board operations.
//!
//! Every failure the driver or the client library can report is a variant of
//! [`CounterError`]. Each variant carries a stable numeric code (see
//! [`CounterError::code`]) and stable display text, so applications can map
//! errors without string matching.

use thiserror::Error;

/// Result type alias for counter board operations.
pub type Result<T> = std::result::Result<T, CounterError>;

/// Errors that can occur when working with a counter board.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// No board is registered at this index
    #[error("Invalid board index {index}")]
    InvalidBoard { index: u32 },

    /// Board is already owned by another handle
    #[error("Board {index} is busy (already opened by another owner)")]
    BoardBusy { index: u32 },

    /// Caller is not allowed to open the board
    #[error("Permission denied for board {index}")]
    PermissionDenied { index: u32 },

    /// A board slot exists but no driver is attached to it
    #[error("No driver attached to board {index}")]
    NoDriver { index: u32 },

    /// Open failed for a reason the driver could not classify
    #[error("Failed to open board {index}: {message}")]
    OpenFailed { index: u32, message: String },

    /// Channel index out of range
    #[error("Invalid channel {channel}: board has {max} channels")]
    InvalidChannel { channel: u32, max: u32 },

    /// Bad source, gate, duration or capacity
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Target channel is already running
    #[error("Channel {channel} is busy")]
    ChannelBusy { channel: u32 },

    /// Pairing neighbor of the target channel is already running
    #[error("Neighbor channel {neighbor} of channel {channel} is busy")]
    NeighborBusy { channel: u32, neighbor: u32 },

    /// Another channel already owns the buffered session slot
    #[error("A buffered counter session is already active on channel {channel}")]
    BufferedSessionActive { channel: u32 },

    /// Waiting for the end of a mode that never ends on its own
    #[error("Cannot wait on a non-terminating mode (channel {channel})")]
    NonTerminatingMode { channel: u32 },

    /// A blocking call was interrupted by a signal
    #[error("Interrupted by signal")]
    Interrupted,

    /// Non-blocking read found no data yet
    #[error("No data available yet")]
    WouldBlock,

    /// The reader did not drain the ring buffer fast enough
    #[error("Buffer overflow: samples were not read fast enough")]
    Overflow,

    /// The hardware latched a new sample before the previous one was taken
    #[error("Gate rate too fast: hardware could not latch samples in time")]
    TooFast,

    /// No buffered session to query or drain
    #[error("No active buffered counter session")]
    NoActiveSession,

    /// Ring buffer could not be allocated
    #[error("Failed to allocate ring buffer of {capacity} samples")]
    AllocationFailed { capacity: usize },

    /// Unspecified internal failure
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CounterError {
    /// Stable numeric code for this error.
    ///
    /// Codes are negative and never reused; they are safe to persist or to
    /// pass across a process boundary.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidBoard { .. } => -1,
            Self::BoardBusy { .. } => -2,
            Self::PermissionDenied { .. } => -3,
            Self::NoDriver { .. } => -4,
            Self::OpenFailed { .. } => -5,
            Self::InvalidChannel { .. } => -10,
            Self::InvalidArgument { .. } => -11,
            Self::ChannelBusy { .. } => -12,
            Self::NeighborBusy { .. } => -13,
            Self::BufferedSessionActive { .. } => -14,
            Self::NonTerminatingMode { .. } => -15,
            Self::Interrupted => -20,
            Self::WouldBlock => -21,
            Self::Overflow => -30,
            Self::TooFast => -31,
            Self::NoActiveSession => -32,
            Self::AllocationFailed { .. } => -33,
            Self::Internal { .. } => -99,
        }
    }

    /// Shorthand for an [`CounterError::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Check if this error is one of the board-open failures.
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidBoard { .. }
                | Self::BoardBusy { .. }
                | Self::PermissionDenied { .. }
                | Self::NoDriver { .. }
                | Self::OpenFailed { .. }
        )
    }

    /// Check if a channel or its neighbor is busy.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::ChannelBusy { .. } | Self::NeighborBusy { .. } | Self::BufferedSessionActive { .. }
        )
    }

    /// Check if this is a latched session fault.
    ///
    /// A faulted session must be stopped and restarted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Overflow | Self::TooFast)
    }

    /// Check if this error is a signal interruption.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
