//! Interrupt dispatch for the board's shared interrupt line.
//!
//! Two kinds of source can assert the line: terminal-count events for
//! single-shot operations and gate latches feeding the buffered session.
//! The dispatcher only looks at the sources that are currently expected,
//! turns each pending one into an [`IrqEvent`] and routes it to its handler.
//! The line may be shared with unrelated devices, so an interrupt nobody
//! expected is reported as [`IrqReturn::None`].

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::board::BoardCore;
use crate::filler::BufferedSession;
use crate::registers::Channel;

/// Whether the dispatcher serviced an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Not raised by this board
    None,
    /// At least one source was serviced and acknowledged
    Handled,
}

/// A pending interrupt source, tagged by the handler that owns it.
#[derive(Debug, Clone, Copy)]
pub enum IrqEvent<'a> {
    /// Single-shot completion on a channel
    TerminalCount(Channel),
    /// Gate latch on the buffered channel
    BufferFill(&'a BufferedSession),
}

impl BoardCore {
    /// Service the interrupt line. Runs in interrupt context: never blocks.
    pub(crate) fn dispatch(&self) -> IrqReturn {
        let mut handled = false;

        if self.tc.expecting() {
            for channel in Channel::all() {
                handled |= self.route(IrqEvent::TerminalCount(channel));
            }
        }

        if self.expecting_fill() {
            // The slot is write-locked only while a session is swapped in or out.
            let session = self.session.read().clone();
            if let Some(session) = session {
                handled |= self.route(IrqEvent::BufferFill(&session));
            }
        }

        trace!(board = self.index, handled, "interrupt");
        if handled {
            IrqReturn::Handled
        } else {
            IrqReturn::None
        }
    }

    fn route(&self, event: IrqEvent<'_>) -> bool {
        match event {
            IrqEvent::TerminalCount(channel) => self.tc.service(&self.regs, channel),
            IrqEvent::BufferFill(session) => session.fill(&self.regs),
        }
    }
}

/// Handle through which the hardware side asserts a board's interrupt line.
///
/// Returned by [`BoardRegistry::attach`](crate::BoardRegistry::attach); it
/// stays valid for the lifetime of the board, whether or not it is open.
#[derive(Clone)]
pub struct InterruptLine {
    core: Arc<BoardCore>,
}

impl InterruptLine {
    pub(crate) fn new(core: Arc<BoardCore>) -> Self {
        Self { core }
    }

    /// Assert the line and run the dispatcher.
    pub fn raise(&self) -> IrqReturn {
        self.core.dispatch()
    }
}

impl fmt::Debug for InterruptLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptLine")
            .field("board", &self.core.index)
            .finish()
    }
}
