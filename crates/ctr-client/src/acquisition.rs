//! Client acquisition API.
//!
//! [`Acquisition`] owns an open [`Board`] and turns application requests
//! (start a gated count, read buffered samples, ...) into control requests,
//! with the [`StateTracker`] as the only arbiter of which channel may be
//! started. Every start validates its arguments and checks channel states
//! before the first request reaches the board.
//!
//! # Pairing
//!
//! Channels come in hardwired pairs (0/1, 2/3). Gated and buffered counts
//! use the neighbor's pulse generator as their gate, so they claim both
//! channels; stopping the counter also stops the neighbor's pulser.
//!
//! # Blocking calls
//!
//! [`Acquisition::get_count`] and [`Acquisition::get_buffered_counts`] may
//! block. Both are interrupted by the handle's [`Signal`]
//! (see [`Acquisition::signal`]); `quit_on_signal` picks whether an
//! interruption returns the partial result or the wait resumes.

use std::fmt;
use std::time::{Duration, Instant};

use ctr_driver::{
    Board, BoardRegistry, Channel, ControlRequest, ControlResponse, CounterError, GateSource,
    InputSource, ReadCountFlags, ReadMode, Result, Signal, WaitResult, SAMPLE_BYTES,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::samples::decode_samples;
use crate::state::{ChannelState, StateTracker};
use crate::timing::{gate_ticks, resolve_capacity};

/// How long a buffered read may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Block until the request is satisfied or the session ends
    #[default]
    Block,
    /// Never block
    Poll,
    /// Block for at most this long in total
    TimedWait(Duration),
}

impl WaitPolicy {
    /// Map a wait in seconds: negative polls, zero blocks, positive waits.
    pub fn from_seconds(seconds: f64) -> Result<Self> {
        if seconds.is_nan() {
            return Err(CounterError::invalid_argument("wait time is NaN"));
        }
        if seconds < 0.0 {
            Ok(Self::Poll)
        } else if seconds == 0.0 {
            Ok(Self::Block)
        } else {
            Duration::try_from_secs_f64(seconds)
                .map(Self::TimedWait)
                .map_err(|e| CounterError::invalid_argument(format!("wait time {seconds}: {e}")))
        }
    }
}

/// Outcome of [`Acquisition::get_buffered_counts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferedRead {
    /// Samples written to the output slice
    pub n_read: usize,
    /// The wait budget ran out first
    pub timed_out: bool,
    /// The session has ended and every sample has been read
    pub end_of_data: bool,
    /// A signal ended the wait
    pub interrupted: bool,
}

/// Outcome of [`Acquisition::get_count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountReading {
    /// Count read from the channel
    pub value: u32,
    /// The channel has stopped; the value is final
    pub complete: bool,
    /// A signal ended the wait; the value is a partial count
    pub interrupted: bool,
}

/// Application-facing handle to one counter board.
pub struct Acquisition {
    board: Board,
    tracker: Mutex<StateTracker>,
    signal: Signal,
}

impl Acquisition {
    /// Open board `index` from `registry`.
    pub fn open(registry: &BoardRegistry, index: u32) -> Result<Self> {
        Ok(Self::from_board(registry.open(index)?))
    }

    /// Wrap an already opened board. Every channel starts out idle.
    pub fn from_board(board: Board) -> Self {
        Self {
            board,
            tracker: Mutex::new(StateTracker::new()),
            signal: Signal::new(),
        }
    }

    /// Index of the underlying board.
    pub fn board_index(&self) -> u32 {
        self.board.index()
    }

    /// Handle that interrupts this acquisition's blocking calls.
    pub fn signal(&self) -> Signal {
        self.signal.clone()
    }

    fn control(&self, request: ControlRequest) -> Result<ControlResponse> {
        self.board.control(request, &self.signal)
    }

    fn is_armed(&self, channel: Channel) -> Result<bool> {
        match self.control(ControlRequest::IsBusy {
            channel: channel.index(),
        })? {
            ControlResponse::Busy(busy) => Ok(busy),
            other => Err(unexpected(other)),
        }
    }

    fn read_count(&self, channel: Channel, flags: ReadCountFlags) -> Result<u32> {
        match self.control(ControlRequest::ReadCount {
            channel: channel.index(),
            flags,
        })? {
            ControlResponse::Count(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn disarm(&self, channel: Channel) -> Result<()> {
        self.control(ControlRequest::Disarm {
            channel: channel.index(),
        })
        .map(drop)
    }

    fn require_idle(&self, tracker: &mut StateTracker, channel: Channel) -> Result<()> {
        match tracker.state(channel, |ch| self.is_armed(ch))? {
            ChannelState::Idle => Ok(()),
            _ => Err(CounterError::ChannelBusy {
                channel: channel.index(),
            }),
        }
    }

    fn require_pair_idle(&self, tracker: &mut StateTracker, channel: Channel) -> Result<()> {
        self.require_idle(tracker, channel)?;
        let neighbor = channel.neighbor();
        match tracker.state(neighbor, |ch| self.is_armed(ch))? {
            ChannelState::Idle => Ok(()),
            _ => Err(CounterError::NeighborBusy {
                channel: channel.index(),
                neighbor: neighbor.index(),
            }),
        }
    }

    /// Reconciled state of `channel`.
    pub fn state(&self, channel: u32) -> Result<ChannelState> {
        let channel = Channel::new(channel)?;
        self.tracker.lock().state(channel, |ch| self.is_armed(ch))
    }

    /// Whether `channel` is doing anything.
    pub fn is_busy(&self, channel: u32) -> Result<bool> {
        Ok(self.state(channel)? != ChannelState::Idle)
    }

    /// Start an ungated count that runs until [`stop_counter`](Self::stop_counter).
    pub fn start_counter(&self, channel: u32, source: InputSource) -> Result<()> {
        let channel = Channel::new(channel)?;
        let source = source.validate()?;

        let mut tracker = self.tracker.lock();
        self.require_idle(&mut tracker, channel)?;
        self.control(ControlRequest::StartFreeCounter {
            channel: channel.index(),
            source: source.to_raw(),
            gate: GateSource::None,
            notify: false,
        })?;
        tracker.set(channel, ChannelState::ContinuousCounterRunning);
        info!(channel = %channel, ?source, "counter started");
        Ok(())
    }

    /// Count for one gate of `gate_length` seconds produced by the neighbor.
    ///
    /// The counter stops itself when the gate closes; collect the result
    /// with [`get_count`](Self::get_count).
    pub fn start_gated_counter(
        &self,
        channel: u32,
        gate_length: f64,
        source: InputSource,
    ) -> Result<()> {
        let channel = Channel::new(channel)?;
        let source = source.validate()?;
        let ticks = gate_ticks(gate_length)?;
        let neighbor = channel.neighbor();

        let mut tracker = self.tracker.lock();
        self.require_pair_idle(&mut tracker, channel)?;

        self.control(ControlRequest::StartFreeCounter {
            channel: channel.index(),
            source: source.to_raw(),
            gate: GateSource::Neighbor,
            notify: true,
        })?;
        let gate = ControlRequest::StartFreePulse {
            channel: neighbor.index(),
            ticks,
            repeat: false,
            notify: false,
        };
        if let Err(err) = self.control(gate) {
            self.disarm(channel)?;
            return Err(err);
        }

        tracker.set(channel, ChannelState::CounterRunning);
        tracker.set(neighbor, ChannelState::PulserRunning);
        info!(channel = %channel, gate = %neighbor, ticks, "gated counter started");
        Ok(())
    }

    /// Start a buffered count: one sample per gate of `gate_length` seconds.
    ///
    /// `capacity` of `0` selects a default for continuous sessions; see
    /// [`resolve_capacity`](crate::timing::resolve_capacity).
    pub fn start_buffered_counter(
        &self,
        channel: u32,
        gate_length: f64,
        source: InputSource,
        capacity: usize,
        continuous: bool,
    ) -> Result<()> {
        let channel = Channel::new(channel)?;
        let source = source.validate()?;
        let ticks = gate_ticks(gate_length)?;
        let capacity = resolve_capacity(capacity, continuous, ticks)?;
        let neighbor = channel.neighbor();

        let mut tracker = self.tracker.lock();
        if let Some(active) = tracker.buffered_channel() {
            return Err(CounterError::BufferedSessionActive {
                channel: active.index(),
            });
        }
        self.require_pair_idle(&mut tracker, channel)?;

        self.control(ControlRequest::StartBufferedCounter {
            channel: channel.index(),
            source: source.to_raw(),
            capacity,
            continuous,
        })?;
        let gate = ControlRequest::StartFreePulse {
            channel: neighbor.index(),
            ticks,
            repeat: true,
            notify: false,
        };
        if let Err(err) = self.control(gate) {
            self.control(ControlRequest::StopBufferedCounter)?;
            return Err(err);
        }

        tracker.set(channel, ChannelState::BufferedCounterRunning);
        tracker.set(neighbor, ChannelState::PulserRunning);
        info!(
            channel = %channel,
            gate = %neighbor,
            ticks,
            capacity,
            continuous,
            "buffered counter started"
        );
        Ok(())
    }

    /// Generate pulses from the timebase on `channel`.
    ///
    /// `period_seconds` is the length of a single pulse, or the period of
    /// the train when `continuous` is set.
    pub fn start_pulser(&self, channel: u32, period_seconds: f64, continuous: bool) -> Result<()> {
        let channel = Channel::new(channel)?;
        let ticks = gate_ticks(period_seconds)?;

        let mut tracker = self.tracker.lock();
        self.require_idle(&mut tracker, channel)?;
        self.control(ControlRequest::StartFreePulse {
            channel: channel.index(),
            ticks,
            repeat: continuous,
            notify: !continuous,
        })?;
        let state = if continuous {
            ChannelState::ContinuousPulserRunning
        } else {
            ChannelState::PulserRunning
        };
        tracker.set(channel, state);
        info!(channel = %channel, ticks, continuous, "pulser started");
        Ok(())
    }

    /// Count while external gate pin `gate_pin` is high, once.
    pub fn start_externally_gated_counter(
        &self,
        channel: u32,
        gate_pin: u8,
        source: InputSource,
    ) -> Result<()> {
        let channel = Channel::new(channel)?;
        let source = source.validate()?;
        let gate = GateSource::Pin(gate_pin).validate()?;

        let mut tracker = self.tracker.lock();
        self.require_idle(&mut tracker, channel)?;
        self.control(ControlRequest::StartFreeCounter {
            channel: channel.index(),
            source: source.to_raw(),
            gate,
            notify: true,
        })?;
        tracker.set(channel, ChannelState::Armed);
        info!(channel = %channel, gate_pin, "externally gated counter armed");
        Ok(())
    }

    /// Stop `channel` and a pulser running on its neighbor.
    ///
    /// Stopping an idle channel succeeds and does nothing.
    pub fn stop_counter(&self, channel: u32) -> Result<()> {
        let channel = Channel::new(channel)?;
        let mut tracker = self.tracker.lock();
        self.stop_locked(&mut tracker, channel)
    }

    fn stop_locked(&self, tracker: &mut StateTracker, channel: Channel) -> Result<()> {
        let state = tracker.state(channel, |ch| self.is_armed(ch))?;
        match state {
            ChannelState::Idle => return Ok(()),
            ChannelState::BufferedCounterRunning => {
                self.control(ControlRequest::StopBufferedCounter)?;
            }
            _ => self.disarm(channel)?,
        }
        tracker.clear(channel);

        let neighbor = channel.neighbor();
        if tracker.state(neighbor, |ch| self.is_armed(ch))? == ChannelState::PulserRunning {
            self.disarm(neighbor)?;
            tracker.clear(neighbor);
        }
        info!(channel = %channel, %state, "channel stopped");
        Ok(())
    }

    /// Read the count of `channel`.
    ///
    /// With `wait_for_end`, blocks until a single-shot operation reaches
    /// terminal count. A signal then either ends the wait with the partial
    /// count (`quit_on_signal`) or is ignored and the wait resumes.
    pub fn get_count(
        &self,
        channel: u32,
        wait_for_end: bool,
        quit_on_signal: bool,
    ) -> Result<CountReading> {
        let channel = Channel::new(channel)?;
        let state = self.tracker.lock().state(channel, |ch| self.is_armed(ch))?;

        if !wait_for_end {
            let value = self.read_count(channel, ReadCountFlags::POLL)?;
            let complete = !self.is_armed(channel)?;
            return Ok(CountReading {
                value,
                complete,
                interrupted: false,
            });
        }

        match state {
            ChannelState::ContinuousCounterRunning | ChannelState::ContinuousPulserRunning => {
                return Err(CounterError::NonTerminatingMode {
                    channel: channel.index(),
                })
            }
            ChannelState::BufferedCounterRunning => {
                return Err(CounterError::invalid_argument(format!(
                    "channel {channel} is buffered; drain it with get_buffered_counts"
                )))
            }
            _ => {}
        }

        loop {
            match self.read_count(channel, ReadCountFlags::WAIT) {
                Ok(value) => {
                    debug!(channel = %channel, value, "count complete");
                    return Ok(CountReading {
                        value,
                        complete: true,
                        interrupted: false,
                    });
                }
                Err(CounterError::Interrupted) if quit_on_signal => {
                    let value = self.read_count(channel, ReadCountFlags::POLL)?;
                    debug!(channel = %channel, value, "count wait interrupted");
                    return Ok(CountReading {
                        value,
                        complete: false,
                        interrupted: true,
                    });
                }
                Err(CounterError::Interrupted) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Samples currently readable from the buffered session.
    ///
    /// The value is stale as soon as it is returned.
    pub fn get_buffered_available(&self) -> Result<usize> {
        match self.control(ControlRequest::GetBufferedAvailable)? {
            ControlResponse::Available(n) => Ok(n),
            other => Err(unexpected(other)),
        }
    }

    /// Read up to `max_samples` samples into `out`.
    ///
    /// Returns early with a partial transfer when the session ends, the wait
    /// budget runs out, or (with `quit_on_signal`) a signal arrives. A
    /// latched overflow or over-rate fault is reported as an error once no
    /// samples were transferred by this call.
    pub fn get_buffered_counts(
        &self,
        out: &mut [u32],
        max_samples: usize,
        wait: WaitPolicy,
        quit_on_signal: bool,
    ) -> Result<BufferedRead> {
        let wanted = max_samples.min(out.len());
        if wanted == 0 {
            return Err(CounterError::invalid_argument(
                "buffered read needs room for at least one sample",
            ));
        }
        let deadline = match wait {
            WaitPolicy::TimedWait(budget) => Some(Instant::now() + budget),
            WaitPolicy::Block | WaitPolicy::Poll => None,
        };

        // Bound once: a stop during the transfer ends it with end of data.
        let reader = self.board.reader()?;
        let mut bytes = vec![0u8; wanted * SAMPLE_BYTES];
        let mut result = BufferedRead::default();

        while result.n_read < wanted {
            let offset = result.n_read * SAMPLE_BYTES;
            match reader.read(&mut bytes[offset..], ReadMode::NonBlocking, &self.signal) {
                Ok(0) => {
                    result.end_of_data = true;
                    break;
                }
                Ok(n) => {
                    let decoded =
                        decode_samples(&bytes[offset..offset + n], &mut out[result.n_read..]);
                    result.n_read += decoded;
                }
                Err(CounterError::WouldBlock) => {
                    if wait == WaitPolicy::Poll {
                        break;
                    }
                    match reader.wait_readable(deadline, &self.signal)? {
                        WaitResult::Ready => {}
                        WaitResult::TimedOut => {
                            result.timed_out = true;
                            break;
                        }
                        WaitResult::Interrupted if quit_on_signal => {
                            result.interrupted = true;
                            break;
                        }
                        WaitResult::Interrupted => {}
                    }
                }
                Err(err) if err.is_fatal() && result.n_read > 0 => break,
                Err(err) => return Err(err),
            }
        }
        Ok(result)
    }

    /// Read the board's digital inputs.
    pub fn digital_read(&self) -> Result<u8> {
        match self.control(ControlRequest::DigitalRead)? {
            ControlResponse::Digital(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    /// Drive the board's digital outputs.
    pub fn digital_write(&self, value: u8) -> Result<()> {
        self.control(ControlRequest::DigitalWrite { value }).map(drop)
    }

    /// Stop every running channel and release the board.
    pub fn close(self) -> Result<()> {
        let result = {
            let mut tracker = self.tracker.lock();
            tracker
                .active()
                .into_iter()
                .try_for_each(|channel| self.stop_locked(&mut tracker, channel))
        };
        info!(board = self.board.index(), "acquisition closed");
        self.board.close();
        result
    }
}

impl fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquisition")
            .field("board", &self.board.index())
            .field("active", &self.tracker.lock().active())
            .finish()
    }
}

fn unexpected(response: ControlResponse) -> CounterError {
    CounterError::Internal {
        message: format!("unexpected control response {response:?}"),
    }
}
