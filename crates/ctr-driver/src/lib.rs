//! Driver side of a 4-channel counter/timer acquisition board.
//!
//! This crate owns everything that touches the board: the per-channel
//! register accessors, the shared interrupt line, the terminal-count
//! notifier for single-shot operations, and the ring buffer that a gate
//! interrupt fills one sample at a time. Applications do not use it
//! directly; the `ctr-client` crate builds the acquisition API on top of the
//! control and data surfaces exposed here.
//!
//! # Architecture
//!
//! ## Execution contexts
//! - *Interrupt context*: [`InterruptLine::raise`] runs the dispatcher, which
//!   services terminal counts and feeds the buffered session. It never
//!   blocks.
//! - *Process context*: [`Board::control`] and [`Board::read`], which may
//!   block on a [`WaitQueue`] until the interrupt side publishes state or a
//!   [`Signal`] arrives.
//!
//! ## Components
//! - [`RegisterInterface`] / [`ChannelRegisters`] - validated register access
//!   over a [`CounterHardware`] backend
//! - [`TerminalCountNotifier`] - per-channel single-shot completion flags
//! - [`SampleRing`] - lock-free single-producer/single-consumer sample ring
//! - [`BufferedSession`] - the one active buffered session and its filler
//! - [`BoardRegistry`] / [`Board`] / [`SessionReader`] - attach, exclusive open,
//!   session-bound reads, close cleanup
//! - [`SimulatedHardware`] - register-level model used by tests and demos
//!
//! # Example
//!
//! ```no_run
//! use ctr_driver::{
//!     BoardRegistry, Channel, ControlRequest, ReadMode, Signal, SimulatedBoard,
//! };
//!
//! # fn example() -> ctr_driver::Result<()> {
//! let registry = BoardRegistry::new();
//! let sim = SimulatedBoard::attach(&registry, 0)?;
//! let board = registry.open(0)?;
//! let signal = Signal::new();
//!
//! board.control(
//!     ControlRequest::StartBufferedCounter {
//!         channel: 0,
//!         source: 0,
//!         capacity: 16,
//!         continuous: false,
//!     },
//!     &signal,
//! )?;
//! sim.latch(Channel::new(0)?, 1); // discarded
//! sim.latch(Channel::new(0)?, 42);
//!
//! let mut buf = [0u8; 4];
//! let n = board.read(&mut buf, ReadMode::NonBlocking, &signal)?;
//! assert_eq!((n, u32::from_le_bytes(buf)), (4, 42));
//! # Ok(())
//! # }
//! ```

pub mod board;
pub mod control;
pub mod error;
pub mod filler;
pub mod irq;
pub mod registers;
pub mod ring;
pub mod simulated;
pub mod terminal_count;
pub mod wait;

/// Frequency of the internal timebase in Hz.
pub const TIMEBASE_HZ: f64 = 20_000_000.0;

pub use board::{Board, BoardRegistry, ReadMode, SessionReader, SAMPLE_BYTES};
pub use control::{ControlRequest, ControlResponse, ReadCountFlags};
pub use error::{CounterError, Result};
pub use filler::{BufferedSession, Drain, SessionState};
pub use irq::{InterruptLine, IrqEvent, IrqReturn};
pub use registers::{
    Channel, ChannelRegisters, ChannelStatus, CounterHardware, GateSource, InputSource,
    InterruptSources, ModeBits, RegisterInterface, MAX_PIN, N_CHANNELS,
};
pub use ring::{PushError, RingMode, SampleRing};
pub use simulated::{
    ChannelRegisterBank, EventGenerator, GeneratorConfig, SimulatedBoard, SimulatedHardware,
};
pub use terminal_count::TerminalCountNotifier;
pub use wait::{Signal, WaitQueue, WaitResult};
