//! Control-request surface.
//!
//! Each operation is one fixed-size [`ControlRequest`] answered by one
//! [`ControlResponse`]. Arguments are validated before any register is
//! written, so a rejected request leaves the hardware untouched.
//!
//! The driver only knows whether a channel is armed. Pairing, gating and
//! "which mode is running" are decided by the client library, which issues
//! these requests on its behalf.

use std::sync::Arc;

use bitflags::bitflags;
use tracing::{debug, info};

use crate::board::BoardCore;
use crate::error::{CounterError, Result};
use crate::filler::BufferedSession;
use crate::registers::{
    Channel, ChannelStatus, GateSource, InputSource, InterruptSources, ModeBits,
};
use crate::ring::RingMode;
use crate::wait::{Signal, WaitResult};

bitflags! {
    /// Flags for [`ControlRequest::ReadCount`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReadCountFlags: u32 {
        /// Block until the channel reaches terminal count
        const WAIT = 1 << 0;
        /// Read the live count without blocking
        const POLL = 1 << 1;
    }
}

/// A control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Stop a channel and drop its terminal-count notification
    Disarm {
        /// Channel index
        channel: u32,
    },
    /// Read a channel's count
    ReadCount {
        /// Channel index
        channel: u32,
        /// Wait or poll
        flags: ReadCountFlags,
    },
    /// Start the channel's pulse generator
    StartFreePulse {
        /// Channel index
        channel: u32,
        /// Timebase ticks per pulse (single) or per gate period (repeat)
        ticks: u32,
        /// Repeat until stopped
        repeat: bool,
        /// Arm terminal-count notification
        notify: bool,
    },
    /// Start counting
    StartFreeCounter {
        /// Channel index
        channel: u32,
        /// Raw input source code (see [`InputSource::from_raw`])
        source: i32,
        /// Gate routed to the channel
        gate: GateSource,
        /// Arm terminal-count notification (gated single-shot counts)
        notify: bool,
    },
    /// Start a buffered counter fed by the neighbor's gate
    StartBufferedCounter {
        /// Channel index
        channel: u32,
        /// Raw input source code
        source: i32,
        /// Ring capacity in samples
        capacity: usize,
        /// Wrap around instead of stopping when full
        continuous: bool,
    },
    /// Query readable samples
    GetBufferedAvailable,
    /// Stop the buffered session and free its ring
    StopBufferedCounter,
    /// Read the digital input lines
    DigitalRead,
    /// Drive the digital output lines
    DigitalWrite {
        /// Output bits
        value: u8,
    },
    /// Query whether a channel is armed
    IsBusy {
        /// Channel index
        channel: u32,
    },
}

/// Reply to a [`ControlRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResponse {
    /// Request carried out
    Done,
    /// Count value
    Count(u32),
    /// Readable samples
    Available(usize),
    /// Digital input bits
    Digital(u8),
    /// Whether the channel is armed
    Busy(bool),
}

impl BoardCore {
    pub(crate) fn handle(&self, request: ControlRequest, signal: &Signal) -> Result<ControlResponse> {
        debug!(board = self.index, ?request, "control request");
        match request {
            ControlRequest::Disarm { channel } => self.disarm(Channel::new(channel)?),
            ControlRequest::ReadCount { channel, flags } => {
                self.read_count(Channel::new(channel)?, flags, signal)
            }
            ControlRequest::StartFreePulse {
                channel,
                ticks,
                repeat,
                notify,
            } => self.start_free_pulse(Channel::new(channel)?, ticks, repeat, notify),
            ControlRequest::StartFreeCounter {
                channel,
                source,
                gate,
                notify,
            } => {
                let channel = Channel::new(channel)?;
                let source = InputSource::from_raw(source)?.validate()?;
                self.start_free_counter(channel, source, gate.validate()?, notify)
            }
            ControlRequest::StartBufferedCounter {
                channel,
                source,
                capacity,
                continuous,
            } => {
                let channel = Channel::new(channel)?;
                let source = InputSource::from_raw(source)?.validate()?;
                let mode = if continuous {
                    RingMode::Continuous
                } else {
                    RingMode::Bounded
                };
                self.start_buffered_counter(channel, source, capacity, mode)
            }
            ControlRequest::GetBufferedAvailable => Ok(ControlResponse::Available(
                self.active_session()?.available()?,
            )),
            ControlRequest::StopBufferedCounter => {
                self.stop_session()?;
                Ok(ControlResponse::Done)
            }
            ControlRequest::DigitalRead => Ok(ControlResponse::Digital(self.regs.digital_read())),
            ControlRequest::DigitalWrite { value } => {
                self.regs.digital_write(value);
                Ok(ControlResponse::Done)
            }
            ControlRequest::IsBusy { channel } => Ok(ControlResponse::Busy(
                self.regs.at(Channel::new(channel)?).is_armed(),
            )),
        }
    }

    fn buffered_channel(&self) -> Option<Channel> {
        self.session.read().as_ref().map(|s| s.channel())
    }

    fn ensure_free(&self, channel: Channel) -> Result<()> {
        if self.buffered_channel() == Some(channel) {
            return Err(CounterError::BufferedSessionActive {
                channel: channel.index(),
            });
        }
        if self.regs.at(channel).is_armed() {
            return Err(CounterError::ChannelBusy {
                channel: channel.index(),
            });
        }
        Ok(())
    }

    fn disarm(&self, channel: Channel) -> Result<ControlResponse> {
        if self.buffered_channel() == Some(channel) {
            return Err(CounterError::BufferedSessionActive {
                channel: channel.index(),
            });
        }
        self.tc.disarm(&self.regs, channel);
        let ch = self.regs.at(channel);
        ch.disarm();
        ch.disable_interrupts(InterruptSources::all());
        ch.acknowledge(ChannelStatus::all());
        Ok(ControlResponse::Done)
    }

    fn read_count(
        &self,
        channel: Channel,
        flags: ReadCountFlags,
        signal: &Signal,
    ) -> Result<ControlResponse> {
        if flags.contains(ReadCountFlags::WAIT | ReadCountFlags::POLL) {
            return Err(CounterError::invalid_argument(
                "read-count flags WAIT and POLL are exclusive",
            ));
        }
        if flags.contains(ReadCountFlags::WAIT) {
            if self.tc.wait(channel, signal) == WaitResult::Interrupted {
                return Err(CounterError::Interrupted);
            }
            // Completion is single-shot; stop routing its interrupt here.
            if self.tc.is_armed(channel) && self.tc.is_raised(channel) {
                self.tc.disarm(&self.regs, channel);
            }
        }
        Ok(ControlResponse::Count(
            self.regs.at(channel).read_software_snapshot(),
        ))
    }

    fn start_free_pulse(
        &self,
        channel: Channel,
        ticks: u32,
        repeat: bool,
        notify: bool,
    ) -> Result<ControlResponse> {
        if ticks == 0 {
            return Err(CounterError::invalid_argument("pulse length must be non-zero"));
        }
        self.ensure_free(channel)?;

        let mut mode = ModeBits::PULSE_OUTPUT | ModeBits::OUTPUT_ENABLE;
        if repeat {
            mode |= ModeBits::REPEAT;
        }
        let ch = self.regs.at(channel);
        ch.load(ticks);
        ch.route_input(InputSource::Timebase, GateSource::None);
        ch.configure(mode);
        if notify {
            self.tc.arm(&self.regs, channel);
        } else {
            self.tc.disarm(&self.regs, channel);
        }
        ch.arm();
        debug!(channel = %channel, ticks, repeat, notify, "pulse generator started");
        Ok(ControlResponse::Done)
    }

    fn start_free_counter(
        &self,
        channel: Channel,
        source: InputSource,
        gate: GateSource,
        notify: bool,
    ) -> Result<ControlResponse> {
        self.ensure_free(channel)?;

        let mut mode = ModeBits::COUNT_UP;
        if gate != GateSource::None {
            mode |= ModeBits::GATE_ENABLE;
        }
        let ch = self.regs.at(channel);
        ch.load(0);
        ch.route_input(source, gate);
        ch.configure(mode);
        if notify {
            self.tc.arm(&self.regs, channel);
        } else {
            self.tc.disarm(&self.regs, channel);
        }
        ch.arm();
        debug!(channel = %channel, ?source, ?gate, notify, "counter started");
        Ok(ControlResponse::Done)
    }

    fn start_buffered_counter(
        &self,
        channel: Channel,
        source: InputSource,
        capacity: usize,
        mode: RingMode,
    ) -> Result<ControlResponse> {
        // Holding the slot for the whole check-and-install keeps two starts
        // from both seeing it empty.
        let mut slot = self.session.write();
        if let Some(active) = slot.as_ref() {
            return Err(CounterError::BufferedSessionActive {
                channel: active.channel().index(),
            });
        }
        let ch = self.regs.at(channel);
        if ch.is_armed() {
            return Err(CounterError::ChannelBusy {
                channel: channel.index(),
            });
        }
        let session = Arc::new(BufferedSession::new(channel, capacity, mode)?);

        self.tc.disarm(&self.regs, channel);
        ch.load(0);
        ch.route_input(source, GateSource::Neighbor);
        ch.configure(
            ModeBits::COUNT_UP | ModeBits::GATE_ENABLE | ModeBits::LATCH_ON_GATE | ModeBits::REPEAT,
        );
        ch.acknowledge(ChannelStatus::GATE);
        *slot = Some(session);
        self.set_expect_fill(true);
        ch.enable_interrupts(InterruptSources::GATE);
        ch.arm();
        drop(slot);

        info!(
            board = self.index,
            channel = %channel,
            capacity,
            ?mode,
            "buffered session started"
        );
        Ok(ControlResponse::Done)
    }
}
