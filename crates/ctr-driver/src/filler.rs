//! Buffered counter session and its interrupt-driven filler.
//!
//! One channel per board may run a buffered session. Every gate closure on
//! that channel latches the count and raises an interrupt; [`BufferedSession::fill`]
//! moves the latched sample into the session's [`SampleRing`] and wakes the
//! reader.
//!
//! Faults (`TooFast`, `Overflow`) are latched in the session and reported to
//! the reader on its next call. A faulted session accepts no more samples and
//! has to be stopped and restarted.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::{CounterError, Result};
use crate::registers::{Channel, ChannelStatus, InterruptSources, RegisterInterface};
use crate::ring::{PushError, RingMode, SampleRing};
use crate::wait::WaitQueue;

/// Lifecycle of a buffered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Accepting samples
    Running = 0,
    /// Bounded ring filled; readable until drained
    Complete = 1,
    /// Reader fell behind a continuous ring
    Overflow = 2,
    /// Hardware latched faster than interrupts were serviced
    TooFast = 3,
    /// Stopped by the owner; readable until drained
    Stopped = 4,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Complete,
            2 => Self::Overflow,
            3 => Self::TooFast,
            _ => Self::Stopped,
        }
    }

    /// The error a faulted session reports, if any.
    pub fn fault(self) -> Option<CounterError> {
        match self {
            Self::Overflow => Some(CounterError::Overflow),
            Self::TooFast => Some(CounterError::TooFast),
            Self::Running | Self::Complete | Self::Stopped => None,
        }
    }
}

/// Result of draining the ring without blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// This many samples were copied
    Samples(usize),
    /// Nothing readable yet
    Empty,
    /// The session is complete and fully drained
    EndOfData,
}

/// The single active buffered session of a board.
#[derive(Debug)]
pub struct BufferedSession {
    channel: Channel,
    ring: SampleRing,
    state: AtomicU8,
    discard_next: AtomicBool,
    stored: AtomicU64,
    discarded: AtomicU64,
    readers: Arc<WaitQueue>,
}

impl BufferedSession {
    /// Allocate a session for `channel`.
    pub fn new(channel: Channel, capacity: usize, mode: RingMode) -> Result<Self> {
        Ok(Self {
            channel,
            ring: SampleRing::new(capacity, mode)?,
            state: AtomicU8::new(SessionState::Running as u8),
            discard_next: AtomicBool::new(true),
            stored: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            readers: Arc::new(WaitQueue::new()),
        })
    }

    /// Channel feeding this session.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Ring capacity in samples.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Ring filling policy.
    pub fn mode(&self) -> RingMode {
        self.ring.mode()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Samples stored so far.
    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    /// Samples dropped by the post-start discard.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Wait queue readers park on.
    pub fn readers(&self) -> &Arc<WaitQueue> {
        &self.readers
    }

    /// Interrupt-context handler for one gate interrupt.
    ///
    /// Returns false if the channel had nothing pending (not our interrupt).
    pub fn fill(&self, regs: &RegisterInterface) -> bool {
        let ch = regs.at(self.channel);
        let pending = ch.pending() & ChannelStatus::GATE;
        if pending.is_empty() {
            return false;
        }

        if !pending.sample_ready() {
            ch.acknowledge(pending);
            return true;
        }

        if pending.contains(ChannelStatus::OVER_RATE) {
            ch.disable_interrupts(InterruptSources::GATE);
            ch.acknowledge(ChannelStatus::GATE);
            self.latch(SessionState::TooFast);
            return true;
        }

        let sample = if pending.contains(ChannelStatus::HW_LATCHED) {
            ch.read_hardware_snapshot()
        } else {
            ch.read_software_snapshot()
        };
        ch.acknowledge(ChannelStatus::GATE);

        // The first latch after arming covers a partial gate period.
        if self.discard_next.swap(false, Ordering::AcqRel) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            trace!(channel = %self.channel, sample, "discarded first sample");
            return true;
        }

        match self.ring.push(sample) {
            Ok(()) => {
                self.stored.fetch_add(1, Ordering::Relaxed);
                trace!(channel = %self.channel, sample, "stored sample");
                if self.ring.is_full() {
                    ch.disable_interrupts(InterruptSources::GATE);
                    self.state
                        .store(SessionState::Complete as u8, Ordering::Release);
                }
            }
            Err(PushError::Overflow) => {
                ch.disable_interrupts(InterruptSources::GATE);
                self.latch(SessionState::Overflow);
                return true;
            }
            Err(PushError::Full) => {
                ch.disable_interrupts(InterruptSources::GATE);
                self.state
                    .store(SessionState::Complete as u8, Ordering::Release);
            }
        }

        self.readers.wake_all();
        true
    }

    /// Mark the session stopped and wake its reader.
    pub(crate) fn stop(&self) {
        self.state
            .store(SessionState::Stopped as u8, Ordering::Release);
        self.readers.wake_all();
    }

    fn latch(&self, fault: SessionState) {
        self.state.store(fault as u8, Ordering::Release);
        warn!(channel = %self.channel, state = ?fault, "buffered session faulted");
        self.readers.wake_all();
    }

    /// Samples currently readable, or the latched fault.
    pub fn available(&self) -> Result<usize> {
        if let Some(err) = self.state().fault() {
            return Err(err);
        }
        Ok(self.ring.available())
    }

    /// Whether a blocked reader should wake up.
    pub fn is_readable(&self) -> bool {
        self.state() != SessionState::Running || self.ring.available() > 0
    }

    /// Copy readable samples into `out` as little-endian 4-byte words,
    /// without blocking.
    ///
    /// `Drain::Samples` counts words, not bytes.
    pub fn drain(&self, out: &mut [u8]) -> Result<Drain> {
        // Load the state before popping: a Complete seen here guarantees the
        // final sample is visible to the pop below.
        let state = self.state();
        if let Some(err) = state.fault() {
            return Err(err);
        }
        let n = self.ring.pop_le_bytes(out);
        if n > 0 {
            Ok(Drain::Samples(n))
        } else if matches!(state, SessionState::Complete | SessionState::Stopped) {
            Ok(Drain::EndOfData)
        } else {
            Ok(Drain::Empty)
        }
    }
}
