//! Channel register interface.
//!
//! The board exposes [`N_CHANNELS`] identical counter/timer channels. This
//! module defines the capability surface a hardware backend provides
//! ([`CounterHardware`]) and a validated per-channel accessor on top of it
//! ([`ChannelRegisters`]).
//!
//! Register access never blocks and is safe from both interrupt and process
//! context. The only failure mode is an out-of-range channel index, which is
//! rejected once when the [`Channel`] is constructed.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{CounterError, Result};

/// Number of counter channels on the board.
pub const N_CHANNELS: u32 = 4;

/// Highest external input pin number.
pub const MAX_PIN: u8 = 9;

/// A validated channel index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(u32);

impl Channel {
    /// Validate a raw channel index.
    pub fn new(index: u32) -> Result<Self> {
        if index >= N_CHANNELS {
            return Err(CounterError::InvalidChannel {
                channel: index,
                max: N_CHANNELS,
            });
        }
        Ok(Self(index))
    }

    /// Raw channel index.
    pub fn index(self) -> u32 {
        self.0
    }

    /// The hardwired pairing neighbor (index XOR 1).
    pub fn neighbor(self) -> Self {
        Self(self.0 ^ 1)
    }

    /// Iterate over every channel on the board.
    pub fn all() -> impl Iterator<Item = Channel> {
        (0..N_CHANNELS).map(Channel)
    }

    pub(crate) fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctr{}", self.0)
    }
}

bitflags! {
    /// Counter mode register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModeBits: u32 {
        /// Count up instead of down
        const COUNT_UP = 1 << 0;
        /// Reload and restart after terminal count
        const REPEAT = 1 << 1;
        /// Count only while the gate is open
        const GATE_ENABLE = 1 << 2;
        /// Latch the count into the hardware snapshot register on every gate closure
        const LATCH_ON_GATE = 1 << 3;
        /// Drive a pulse on the output at terminal count
        const PULSE_OUTPUT = 1 << 4;
        /// Enable the channel's output pin
        const OUTPUT_ENABLE = 1 << 5;
    }
}

bitflags! {
    /// Channel status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelStatus: u32 {
        /// Single-shot operation completed
        const TERMINAL_COUNT = 1 << 0;
        /// Hardware snapshot register latched a new value
        const HW_LATCHED = 1 << 1;
        /// Software snapshot register latched a new value
        const SW_LATCHED = 1 << 2;
        /// A latch happened before the previous one was acknowledged
        const OVER_RATE = 1 << 3;
    }
}

impl ChannelStatus {
    /// Status bits raised by a gate closure.
    pub const GATE: Self = Self::HW_LATCHED.union(Self::SW_LATCHED).union(Self::OVER_RATE);

    /// True when a latched sample is ready to be taken.
    pub fn sample_ready(self) -> bool {
        self.intersects(Self::HW_LATCHED | Self::SW_LATCHED)
    }
}

bitflags! {
    /// Per-channel interrupt enable bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InterruptSources: u32 {
        /// Interrupt on terminal count
        const TERMINAL_COUNT = 1 << 0;
        /// Interrupt on gate latch
        const GATE = 1 << 1;
    }
}

impl InterruptSources {
    /// Status bits that can assert the line while these sources are enabled.
    pub fn status_mask(self) -> ChannelStatus {
        let mut mask = ChannelStatus::empty();
        if self.contains(Self::TERMINAL_COUNT) {
            mask |= ChannelStatus::TERMINAL_COUNT;
        }
        if self.contains(Self::GATE) {
            mask |= ChannelStatus::GATE;
        }
        mask
    }
}

/// Signal counted by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    /// The channel's dedicated source pin
    #[default]
    Default,
    /// Internal timebase (see [`TIMEBASE_HZ`](crate::TIMEBASE_HZ))
    Timebase,
    /// An external input pin
    Pin(u8),
    /// The pairing neighbor's output
    Neighbor,
}

impl InputSource {
    /// Decode a raw source code from the control surface.
    ///
    /// `0` is the default pin, `1` the timebase, `2` the neighbor output and
    /// `16 + n` external pin `n`.
    pub fn from_raw(raw: i32) -> Result<Self> {
        let source = match raw {
            0 => Self::Default,
            1 => Self::Timebase,
            2 => Self::Neighbor,
            16..=25 => Self::Pin((raw - 16) as u8),
            _ => {
                return Err(CounterError::invalid_argument(format!(
                    "unknown input source code {raw}"
                )))
            }
        };
        Ok(source)
    }

    /// Encode as a raw source code.
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Default => 0,
            Self::Timebase => 1,
            Self::Neighbor => 2,
            Self::Pin(n) => 16 + i32::from(n),
        }
    }

    /// Reject pins the board does not have.
    pub fn validate(self) -> Result<Self> {
        match self {
            Self::Pin(n) if n > MAX_PIN => Err(CounterError::invalid_argument(format!(
                "input pin {n} out of range (0-{MAX_PIN})"
            ))),
            other => Ok(other),
        }
    }
}

/// Gate routed to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateSource {
    /// Ungated: count whenever armed
    #[default]
    None,
    /// Gated by the pairing neighbor's output
    Neighbor,
    /// Gated by an external pin
    Pin(u8),
}

impl GateSource {
    /// Reject pins the board does not have.
    pub fn validate(self) -> Result<Self> {
        match self {
            Self::Pin(n) if n > MAX_PIN => Err(CounterError::invalid_argument(format!(
                "gate pin {n} out of range (0-{MAX_PIN})"
            ))),
            other => Ok(other),
        }
    }
}

/// Register-level capability surface of one counter board.
///
/// Implementations must not block: every method is called from interrupt
/// context as well as from process context.
pub trait CounterHardware: Send + Sync {
    /// Start the channel.
    fn arm(&self, channel: Channel);
    /// Stop the channel.
    fn disarm(&self, channel: Channel);
    /// Write the load register.
    fn load(&self, channel: Channel, value: u32);
    /// Write the mode register.
    fn configure(&self, channel: Channel, mode: ModeBits);
    /// Write the routing register.
    fn route_input(&self, channel: Channel, source: InputSource, gate: GateSource);
    /// Latch and read the live count.
    fn software_snapshot(&self, channel: Channel) -> u32;
    /// Read the value latched at the last gate closure.
    fn hardware_snapshot(&self, channel: Channel) -> u32;
    /// Whether the channel is armed.
    fn is_armed(&self, channel: Channel) -> bool;
    /// Whether the channel is armed and its gate is open.
    fn is_counting(&self, channel: Channel) -> bool;
    /// Read the status register.
    fn status(&self, channel: Channel) -> ChannelStatus;
    /// Clear status bits.
    fn acknowledge(&self, channel: Channel, bits: ChannelStatus);
    /// Read the interrupt enable register.
    fn interrupts(&self, channel: Channel) -> InterruptSources;
    /// Write the interrupt enable register.
    fn set_interrupts(&self, channel: Channel, sources: InterruptSources);
    /// Read the board's digital input lines.
    fn digital_read(&self) -> u8;
    /// Drive the board's digital output lines.
    fn digital_write(&self, value: u8);
}

/// Shared handle to the board registers.
#[derive(Clone)]
pub struct RegisterInterface {
    hw: Arc<dyn CounterHardware>,
}

impl RegisterInterface {
    /// Wrap a hardware backend.
    pub fn new(hw: Arc<dyn CounterHardware>) -> Self {
        Self { hw }
    }

    /// Accessor for one channel, validating the index.
    pub fn channel(&self, index: u32) -> Result<ChannelRegisters<'_>> {
        Ok(self.at(Channel::new(index)?))
    }

    /// Accessor for an already validated channel.
    pub fn at(&self, channel: Channel) -> ChannelRegisters<'_> {
        ChannelRegisters {
            hw: self.hw.as_ref(),
            channel,
        }
    }

    /// Read the digital input lines.
    pub fn digital_read(&self) -> u8 {
        self.hw.digital_read()
    }

    /// Drive the digital output lines.
    pub fn digital_write(&self, value: u8) {
        self.hw.digital_write(value)
    }
}

impl fmt::Debug for RegisterInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterInterface")
            .field("n_channels", &N_CHANNELS)
            .finish()
    }
}

/// Stateless register accessor for one channel.
#[derive(Clone, Copy)]
pub struct ChannelRegisters<'a> {
    hw: &'a dyn CounterHardware,
    channel: Channel,
}

impl ChannelRegisters<'_> {
    /// The channel this accessor addresses.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Start the channel.
    pub fn arm(&self) {
        trace!(channel = %self.channel, "arm");
        self.hw.arm(self.channel)
    }

    /// Stop the channel.
    pub fn disarm(&self) {
        trace!(channel = %self.channel, "disarm");
        self.hw.disarm(self.channel)
    }

    /// Write the load register.
    pub fn load(&self, value: u32) {
        self.hw.load(self.channel, value)
    }

    /// Write the mode register.
    pub fn configure(&self, mode: ModeBits) {
        self.hw.configure(self.channel, mode)
    }

    /// Route the counted signal and the gate.
    pub fn route_input(&self, source: InputSource, gate: GateSource) {
        self.hw.route_input(self.channel, source, gate)
    }

    /// Latch and read the live count.
    pub fn read_software_snapshot(&self) -> u32 {
        self.hw.software_snapshot(self.channel)
    }

    /// Read the count latched at the last gate closure.
    pub fn read_hardware_snapshot(&self) -> u32 {
        self.hw.hardware_snapshot(self.channel)
    }

    /// Whether the channel is armed.
    pub fn is_armed(&self) -> bool {
        self.hw.is_armed(self.channel)
    }

    /// Whether the channel is armed and its gate open.
    pub fn is_counting(&self) -> bool {
        self.hw.is_counting(self.channel)
    }

    /// Read the status register.
    pub fn status(&self) -> ChannelStatus {
        self.hw.status(self.channel)
    }

    /// Clear status bits.
    pub fn acknowledge(&self, bits: ChannelStatus) {
        self.hw.acknowledge(self.channel, bits)
    }

    /// Status bits that are both raised and enabled as interrupt sources.
    pub fn pending(&self) -> ChannelStatus {
        self.status() & self.hw.interrupts(self.channel).status_mask()
    }

    /// Enable interrupt sources, keeping the others as they are.
    pub fn enable_interrupts(&self, sources: InterruptSources) {
        let current = self.hw.interrupts(self.channel);
        self.hw.set_interrupts(self.channel, current | sources)
    }

    /// Disable interrupt sources, keeping the others as they are.
    pub fn disable_interrupts(&self, sources: InterruptSources) {
        let current = self.hw.interrupts(self.channel);
        self.hw.set_interrupts(self.channel, current - sources)
    }
}

impl fmt::Debug for ChannelRegisters<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegisters")
            .field("channel", &self.channel)
            .finish()
    }
}
