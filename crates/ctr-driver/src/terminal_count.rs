//! Terminal-count notification for single-shot operations.
//!
//! A gated count or a single pulse ends with a terminal-count event on its
//! channel. Process context arms the notifier, starts the hardware, and
//! later blocks in [`TerminalCountNotifier::wait`] until the dispatcher
//! raises the channel's flag from interrupt context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::registers::{Channel, ChannelStatus, InterruptSources, RegisterInterface, N_CHANNELS};
use crate::wait::{Signal, WaitQueue, WaitResult};

#[derive(Debug, Default)]
struct TerminalCountFlag {
    raised: AtomicBool,
    armed: AtomicBool,
}

/// Per-channel terminal-count flags sharing one wait queue.
#[derive(Debug)]
pub struct TerminalCountNotifier {
    flags: [TerminalCountFlag; N_CHANNELS as usize],
    queue: Arc<WaitQueue>,
    /// Set while any channel is armed; read by the dispatcher.
    expect: AtomicBool,
}

impl Default for TerminalCountNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalCountNotifier {
    /// Create a notifier with every channel disarmed.
    pub fn new() -> Self {
        Self {
            flags: Default::default(),
            queue: Arc::new(WaitQueue::new()),
            expect: AtomicBool::new(false),
        }
    }

    /// Whether any channel expects a terminal-count interrupt.
    pub fn expecting(&self) -> bool {
        self.expect.load(Ordering::Acquire)
    }

    /// Whether `channel` is armed for notification.
    pub fn is_armed(&self, channel: Channel) -> bool {
        self.flags[channel.slot()].armed.load(Ordering::Acquire)
    }

    /// Whether `channel` has reached terminal count since it was armed.
    pub fn is_raised(&self, channel: Channel) -> bool {
        self.flags[channel.slot()].raised.load(Ordering::Acquire)
    }

    /// Clear the raised flag and enable the terminal-count interrupt.
    pub fn arm(&self, regs: &RegisterInterface, channel: Channel) {
        let flag = &self.flags[channel.slot()];
        flag.raised.store(false, Ordering::Release);
        let ch = regs.at(channel);
        ch.acknowledge(ChannelStatus::TERMINAL_COUNT);
        ch.enable_interrupts(InterruptSources::TERMINAL_COUNT);
        flag.armed.store(true, Ordering::Release);
        self.expect.store(true, Ordering::Release);
        debug!(channel = %channel, "terminal-count notification armed");
    }

    /// Disable the interrupt and recompute whether any channel is armed.
    pub fn disarm(&self, regs: &RegisterInterface, channel: Channel) {
        regs.at(channel)
            .disable_interrupts(InterruptSources::TERMINAL_COUNT);
        self.flags[channel.slot()]
            .armed
            .store(false, Ordering::Release);
        let any = self.flags.iter().any(|f| f.armed.load(Ordering::Acquire));
        self.expect.store(any, Ordering::Release);
        self.queue.wake_all();
    }

    /// Interrupt-context handler: latch and acknowledge a terminal count.
    ///
    /// Returns true if the channel was armed and its status showed terminal count.
    pub fn service(&self, regs: &RegisterInterface, channel: Channel) -> bool {
        let flag = &self.flags[channel.slot()];
        if !flag.armed.load(Ordering::Acquire) {
            return false;
        }
        let ch = regs.at(channel);
        if !ch.pending().contains(ChannelStatus::TERMINAL_COUNT) {
            return false;
        }
        ch.acknowledge(ChannelStatus::TERMINAL_COUNT);
        flag.raised.store(true, Ordering::Release);
        trace!(channel = %channel, "terminal count");
        self.queue.wake_all();
        true
    }

    /// Block until `channel` reaches terminal count or `signal` is raised.
    ///
    /// A channel that is not armed for notification has nothing to wait for
    /// and returns at once. Disarming a channel wakes its waiters.
    pub fn wait(&self, channel: Channel, signal: &Signal) -> WaitResult {
        let flag = &self.flags[channel.slot()];
        self.queue.wait_until(
            || flag.raised.load(Ordering::Acquire) || !flag.armed.load(Ordering::Acquire),
            None,
            signal,
        )
    }
}
