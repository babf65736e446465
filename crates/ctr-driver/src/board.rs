//! Board registry and the process-side board handle.
//!
//! A board is attached to the [`BoardRegistry`] once, by whatever owns the
//! hardware backend. Attaching creates the board's driver state and returns
//! the [`InterruptLine`] the hardware asserts. Applications then
//! [`open`](BoardRegistry::open) the board by index; the first opener owns it
//! until its [`Board`] handle is dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::control::{ControlRequest, ControlResponse};
use crate::error::{CounterError, Result};
use crate::filler::{BufferedSession, Drain};
use crate::irq::InterruptLine;
use crate::registers::{Channel, ChannelStatus, CounterHardware, InterruptSources, RegisterInterface};
use crate::terminal_count::TerminalCountNotifier;
use crate::wait::{Signal, WaitResult};

/// Size of one sample word on the data surface.
pub const SAMPLE_BYTES: usize = 4;

/// Driver state of one attached board, shared by its handle and its interrupt line.
pub(crate) struct BoardCore {
    pub(crate) index: u32,
    pub(crate) regs: RegisterInterface,
    pub(crate) tc: TerminalCountNotifier,
    pub(crate) session: RwLock<Option<Arc<BufferedSession>>>,
    expect_fill: AtomicBool,
}

impl BoardCore {
    fn new(index: u32, hw: Arc<dyn CounterHardware>) -> Self {
        Self {
            index,
            regs: RegisterInterface::new(hw),
            tc: TerminalCountNotifier::new(),
            session: RwLock::new(None),
            expect_fill: AtomicBool::new(false),
        }
    }

    pub(crate) fn expecting_fill(&self) -> bool {
        self.expect_fill.load(Ordering::Acquire)
    }

    pub(crate) fn set_expect_fill(&self, expect: bool) {
        self.expect_fill.store(expect, Ordering::Release);
    }

    pub(crate) fn active_session(&self) -> Result<Arc<BufferedSession>> {
        self.session
            .read()
            .clone()
            .ok_or(CounterError::NoActiveSession)
    }

    /// Tear down the buffered session, if any.
    pub(crate) fn stop_session(&self) -> Result<()> {
        let session = self
            .session
            .write()
            .take()
            .ok_or(CounterError::NoActiveSession)?;
        self.set_expect_fill(false);

        let ch = self.regs.at(session.channel());
        ch.disable_interrupts(InterruptSources::GATE);
        ch.disarm();
        ch.acknowledge(ChannelStatus::GATE);
        session.stop();

        info!(
            board = self.index,
            channel = %session.channel(),
            stored = session.stored(),
            discarded = session.discarded(),
            state = ?session.state(),
            "buffered session stopped"
        );
        Ok(())
    }

    /// Put every channel back into its idle configuration.
    fn release_all(&self) {
        if self.stop_session().is_ok() {
            debug!(board = self.index, "released buffered session on close");
        }
        for channel in Channel::all() {
            self.tc.disarm(&self.regs, channel);
            let ch = self.regs.at(channel);
            ch.disarm();
            ch.disable_interrupts(InterruptSources::all());
        }
    }
}

enum SlotKind {
    Attached(Arc<BoardCore>),
    NoDriver,
    Faulty(String),
}

struct Slot {
    kind: SlotKind,
    restricted: bool,
    owned: bool,
}

type Slots = Arc<Mutex<BTreeMap<u32, Slot>>>;

/// Table of the boards known to the driver.
#[derive(Clone, Default)]
pub struct BoardRegistry {
    slots: Slots,
}

impl BoardRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a hardware backend at `index`, replacing whatever was there.
    ///
    /// Fails with [`CounterError::BoardBusy`] if the current board at that
    /// index is open.
    pub fn attach(&self, index: u32, hw: Arc<dyn CounterHardware>) -> Result<InterruptLine> {
        let mut slots = self.slots.lock();
        if slots.get(&index).is_some_and(|slot| slot.owned) {
            return Err(CounterError::BoardBusy { index });
        }
        let core = Arc::new(BoardCore::new(index, hw));
        slots.insert(
            index,
            Slot {
                kind: SlotKind::Attached(Arc::clone(&core)),
                restricted: false,
                owned: false,
            },
        );
        info!(board = index, "board attached");
        Ok(InterruptLine::new(core))
    }

    /// Record a slot whose hardware was found but has no driver.
    pub fn attach_without_driver(&self, index: u32) {
        self.slots.lock().insert(
            index,
            Slot {
                kind: SlotKind::NoDriver,
                restricted: false,
                owned: false,
            },
        );
    }

    /// Record a slot whose driver failed to initialise.
    pub fn attach_faulty(&self, index: u32, message: impl Into<String>) {
        self.slots.lock().insert(
            index,
            Slot {
                kind: SlotKind::Faulty(message.into()),
                restricted: false,
                owned: false,
            },
        );
    }

    /// Deny or allow opening the board at `index`.
    pub fn restrict(&self, index: u32, restricted: bool) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(&index)
            .ok_or(CounterError::InvalidBoard { index })?;
        slot.restricted = restricted;
        Ok(())
    }

    /// Indices of all known slots.
    pub fn indices(&self) -> Vec<u32> {
        self.slots.lock().keys().copied().collect()
    }

    /// Open the board at `index` for exclusive use.
    pub fn open(&self, index: u32) -> Result<Board> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(&index)
            .ok_or(CounterError::InvalidBoard { index })?;

        let core = match &slot.kind {
            SlotKind::Attached(core) => Arc::clone(core),
            SlotKind::NoDriver => return Err(CounterError::NoDriver { index }),
            SlotKind::Faulty(message) => {
                return Err(CounterError::OpenFailed {
                    index,
                    message: message.clone(),
                })
            }
        };
        if slot.restricted {
            return Err(CounterError::PermissionDenied { index });
        }
        if slot.owned {
            return Err(CounterError::BoardBusy { index });
        }
        slot.owned = true;
        info!(board = index, "board opened");

        Ok(Board {
            core,
            slots: Arc::clone(&self.slots),
        })
    }
}

impl fmt::Debug for BoardRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoardRegistry")
            .field("indices", &self.indices())
            .finish()
    }
}

/// Blocking behavior of [`Board::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Wait for data, end of data, or a signal
    #[default]
    Blocking,
    /// Return [`CounterError::WouldBlock`] when no data is ready
    NonBlocking,
}

/// Exclusive handle to an open board.
///
/// Dropping the handle stops the buffered session, disarms every channel and
/// releases ownership.
pub struct Board {
    core: Arc<BoardCore>,
    slots: Slots,
}

impl Board {
    /// Index this board was opened at.
    pub fn index(&self) -> u32 {
        self.core.index
    }

    /// Issue a control request.
    ///
    /// Requests that block (`ReadCount` with the wait flag) return
    /// [`CounterError::Interrupted`] when `signal` is raised.
    pub fn control(&self, request: ControlRequest, signal: &Signal) -> Result<ControlResponse> {
        self.core.handle(request, signal)
    }

    /// Bind a reader to the current buffered session.
    ///
    /// The reader keeps the session alive after it is stopped, so a caller
    /// mid-transfer drains what is left and then sees end of data.
    pub fn reader(&self) -> Result<SessionReader> {
        Ok(SessionReader {
            session: self.core.active_session()?,
        })
    }

    /// Read sample words from the buffered session.
    ///
    /// See [`SessionReader::read`].
    pub fn read(&self, buf: &mut [u8], mode: ReadMode, signal: &Signal) -> Result<usize> {
        check_read_buffer(buf)?;
        self.reader()?.read(buf, mode, signal)
    }

    /// Wait until the buffered session has data, ends, or faults.
    ///
    /// See [`SessionReader::wait_readable`].
    pub fn wait_readable(&self, deadline: Option<Instant>, signal: &Signal) -> Result<WaitResult> {
        self.reader()?.wait_readable(deadline, signal)
    }

    /// Close the board explicitly.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        self.core.release_all();
        let mut slots = self.slots.lock();
        match slots.get_mut(&self.core.index) {
            Some(slot) => slot.owned = false,
            None => warn!(board = self.core.index, "closed board missing from registry"),
        }
        info!(board = self.core.index, "board closed");
    }
}

fn check_read_buffer(buf: &[u8]) -> Result<()> {
    if buf.len() < SAMPLE_BYTES {
        return Err(CounterError::invalid_argument(format!(
            "read buffer of {} bytes cannot hold one sample",
            buf.len()
        )));
    }
    Ok(())
}

/// Data surface bound to one buffered session.
#[derive(Debug, Clone)]
pub struct SessionReader {
    session: Arc<BufferedSession>,
}

impl SessionReader {
    /// The session this reader drains.
    pub fn session(&self) -> &BufferedSession {
        &self.session
    }

    /// Copy whole little-endian 4-byte words into `buf`.
    ///
    /// Returns the number of bytes written. `Ok(0)` means the session has
    /// ended (completed or stopped) and every sample has been read.
    pub fn read(&self, buf: &mut [u8], mode: ReadMode, signal: &Signal) -> Result<usize> {
        check_read_buffer(buf)?;
        let session = &self.session;

        loop {
            match session.drain(buf)? {
                Drain::Samples(n) => return Ok(n * SAMPLE_BYTES),
                Drain::EndOfData => return Ok(0),
                Drain::Empty => {
                    if mode == ReadMode::NonBlocking {
                        return Err(CounterError::WouldBlock);
                    }
                    let result =
                        session
                            .readers()
                            .wait_until(|| session.is_readable(), None, signal);
                    if result == WaitResult::Interrupted {
                        return Err(CounterError::Interrupted);
                    }
                }
            }
        }
    }

    /// Wait until the session has data, ends, or faults.
    ///
    /// `deadline` of `None` waits without limit.
    pub fn wait_readable(&self, deadline: Option<Instant>, signal: &Signal) -> Result<WaitResult> {
        let session = &self.session;
        Ok(session
            .readers()
            .wait_until(|| session.is_readable(), deadline, signal))
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Board")
            .field("index", &self.core.index)
            .field("buffered", &self.core.expecting_fill())
            .finish()
    }
}
