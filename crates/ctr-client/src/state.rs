//! Per-channel state tracking.
//!
//! The driver only knows whether a channel is armed. The tracker keeps the
//! richer client-side state and decides how far to trust it:
//!
//! - Continuous modes never end on their own, so their state is
//!   *self-reported* and answered without touching hardware.
//! - Single-shot modes end in hardware, so their state is
//!   *hardware-confirmed*: a query asks whether the channel is still armed
//!   and falls back to [`ChannelState::Idle`] once it is not.

use std::fmt;

use ctr_driver::{Channel, Result, N_CHANNELS};

/// What a channel is doing, as far as the client knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// Not started, or finished
    #[default]
    Idle,
    /// Single-shot count gated by an external pin
    Armed,
    /// Single gate pulse, or the gate generator of a buffered session
    PulserRunning,
    /// Free-running pulse train
    ContinuousPulserRunning,
    /// Single-shot count gated by the neighbor
    CounterRunning,
    /// Ungated count, stopped manually
    ContinuousCounterRunning,
    /// Counter feeding the ring buffer
    BufferedCounterRunning,
}

impl ChannelState {
    /// States whose end never shows up in hardware.
    pub fn is_self_reported(self) -> bool {
        matches!(
            self,
            Self::ContinuousPulserRunning
                | Self::ContinuousCounterRunning
                | Self::BufferedCounterRunning
        )
    }

    /// States that end on their own with a terminal count.
    pub fn is_single_shot(self) -> bool {
        matches!(self, Self::Armed | Self::PulserRunning | Self::CounterRunning)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::PulserRunning => "pulser running",
            Self::ContinuousPulserRunning => "continuous pulser running",
            Self::CounterRunning => "counter running",
            Self::ContinuousCounterRunning => "continuous counter running",
            Self::BufferedCounterRunning => "buffered counter running",
        };
        f.write_str(name)
    }
}

/// A recorded state and how it is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracking {
    /// Trusted as recorded
    SelfReported(ChannelState),
    /// Valid while the hardware reports the channel armed
    HardwareConfirmed(ChannelState),
}

impl Tracking {
    fn for_state(state: ChannelState) -> Option<Self> {
        match state {
            ChannelState::Idle => None,
            s if s.is_self_reported() => Some(Self::SelfReported(s)),
            s => Some(Self::HardwareConfirmed(s)),
        }
    }
}

/// Client-side state of every channel on one board.
#[derive(Debug, Default)]
pub struct StateTracker {
    channels: [Option<Tracking>; N_CHANNELS as usize],
}

impl StateTracker {
    /// All channels idle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded tracking entry, without reconciliation.
    pub fn tracking(&self, channel: Channel) -> Option<Tracking> {
        self.channels[channel.index() as usize]
    }

    /// Current state of `channel`.
    ///
    /// `is_armed` is only called for hardware-confirmed states; a channel the
    /// hardware reports disarmed is reconciled to [`ChannelState::Idle`].
    pub fn state<F>(&mut self, channel: Channel, is_armed: F) -> Result<ChannelState>
    where
        F: FnOnce(Channel) -> Result<bool>,
    {
        let slot = &mut self.channels[channel.index() as usize];
        match *slot {
            None => Ok(ChannelState::Idle),
            Some(Tracking::SelfReported(state)) => Ok(state),
            Some(Tracking::HardwareConfirmed(state)) => {
                if is_armed(channel)? {
                    Ok(state)
                } else {
                    *slot = None;
                    Ok(ChannelState::Idle)
                }
            }
        }
    }

    /// Record `state` for `channel`.
    pub fn set(&mut self, channel: Channel, state: ChannelState) {
        self.channels[channel.index() as usize] = Tracking::for_state(state);
    }

    /// Mark `channel` idle.
    pub fn clear(&mut self, channel: Channel) {
        self.channels[channel.index() as usize] = None;
    }

    /// The channel running the buffered session, if any.
    pub fn buffered_channel(&self) -> Option<Channel> {
        Channel::all().find(|ch| {
            self.tracking(*ch)
                == Some(Tracking::SelfReported(ChannelState::BufferedCounterRunning))
        })
    }

    /// Channels with a recorded, not yet reconciled state.
    pub fn active(&self) -> Vec<Channel> {
        Channel::all()
            .filter(|ch| self.tracking(*ch).is_some())
            .collect()
    }
}
