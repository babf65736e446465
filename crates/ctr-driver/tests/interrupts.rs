//! Interrupt Dispatch and Terminal-Count Test Suite
//!
//! Drives a simulated board through its interrupt line and checks how the
//! dispatcher routes terminal-count events to blocked control calls.
//!
//! # Test Coverage
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_unexpected_interrupt_not_handled` | Shared line, nothing armed |
//! | `test_pin_gated_count_completes` | Terminal count from an external gate |
//! | `test_neighbor_gate_completes_count` | Single pulse on the neighbor ends the count |
//! | `test_completed_wait_disarms_notification` | Terminal-count source released after the wait |
//! | `test_wait_wakes_across_threads` | Blocked read-count woken from the line |
//! | `test_wait_interrupted_by_signal` | Signal aborts a blocked read-count |
//! | `test_wait_on_unarmed_channel_returns` | Nothing to wait for |

use std::thread;
use std::time::Duration;

use ctr_driver::{
    BoardRegistry, Channel, ChannelStatus, ControlRequest, ControlResponse, CounterError,
    GateSource, InterruptSources, IrqReturn, ReadCountFlags, Signal, SimulatedBoard,
};

// =============================================================================
// Helpers
// =============================================================================

fn setup() -> (BoardRegistry, SimulatedBoard) {
    let registry = BoardRegistry::new();
    let sim = SimulatedBoard::attach(&registry, 0).unwrap();
    (registry, sim)
}

fn ch(index: u32) -> Channel {
    Channel::new(index).unwrap()
}

fn pin_gated_counter(channel: u32, pin: u8) -> ControlRequest {
    ControlRequest::StartFreeCounter {
        channel,
        source: 0,
        gate: GateSource::Pin(pin),
        notify: true,
    }
}

const WAIT: ControlRequest = ControlRequest::ReadCount {
    channel: 0,
    flags: ReadCountFlags::WAIT,
};

// =============================================================================
// Dispatch
// =============================================================================

#[test]
fn test_unexpected_interrupt_not_handled() {
    let (registry, sim) = setup();
    let _board = registry.open(0).unwrap();

    assert_eq!(sim.line().raise(), IrqReturn::None);

    // A latch on a channel with no buffered session is not ours either.
    assert_eq!(sim.latch(ch(1), 5), IrqReturn::None);
}

#[test]
fn test_pin_gated_count_completes() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();

    board.control(pin_gated_counter(0, 3), &signal).unwrap();
    sim.count_events(ch(0), 25);

    assert_eq!(sim.close_pin_gate(3), IrqReturn::Handled);
    // Acknowledged before returning: a second assertion finds nothing.
    assert!(!sim
        .hardware()
        .inspect(ch(0))
        .status
        .contains(ChannelStatus::TERMINAL_COUNT));
    assert_eq!(sim.line().raise(), IrqReturn::None);

    let reply = board.control(WAIT, &signal).unwrap();
    assert_eq!(reply, ControlResponse::Count(25));
    assert_eq!(
        board
            .control(ControlRequest::IsBusy { channel: 0 }, &signal)
            .unwrap(),
        ControlResponse::Busy(false)
    );
}

#[test]
fn test_neighbor_gate_completes_count() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();

    board
        .control(
            ControlRequest::StartFreeCounter {
                channel: 2,
                source: 0,
                gate: GateSource::Neighbor,
                notify: true,
            },
            &signal,
        )
        .unwrap();
    board
        .control(
            ControlRequest::StartFreePulse {
                channel: 3,
                ticks: 2_000,
                repeat: false,
                notify: false,
            },
            &signal,
        )
        .unwrap();

    sim.count_events(ch(2), 7);
    assert_eq!(sim.pulse(ch(3)), IrqReturn::Handled);

    let reply = board
        .control(
            ControlRequest::ReadCount {
                channel: 2,
                flags: ReadCountFlags::WAIT,
            },
            &signal,
        )
        .unwrap();
    assert_eq!(reply, ControlResponse::Count(7));
    assert!(!sim.hardware().inspect(ch(3)).armed);
}

#[test]
fn test_completed_wait_disarms_notification() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();

    board.control(pin_gated_counter(0, 3), &signal).unwrap();
    assert!(sim
        .hardware()
        .inspect(ch(0))
        .interrupts
        .contains(InterruptSources::TERMINAL_COUNT));

    sim.count_events(ch(0), 12);
    assert_eq!(sim.close_pin_gate(3), IrqReturn::Handled);
    assert_eq!(
        board.control(WAIT, &signal),
        Ok(ControlResponse::Count(12))
    );
    assert!(!sim
        .hardware()
        .inspect(ch(0))
        .interrupts
        .contains(InterruptSources::TERMINAL_COUNT));

    // Nothing left to wait for; the latched value is still readable.
    assert_eq!(
        board.control(WAIT, &signal),
        Ok(ControlResponse::Count(12))
    );
    assert_eq!(sim.line().raise(), IrqReturn::None);
}

// =============================================================================
// Blocking waits
// =============================================================================

#[test]
fn test_wait_wakes_across_threads() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    board.control(pin_gated_counter(0, 1), &signal).unwrap();

    let reply = thread::scope(|s| {
        let waiter = s.spawn(|| board.control(WAIT, &signal));
        thread::sleep(Duration::from_millis(20));
        sim.count_events(ch(0), 3);
        sim.close_pin_gate(1);
        waiter.join().unwrap()
    });
    assert_eq!(reply, Ok(ControlResponse::Count(3)));
}

#[test]
fn test_wait_interrupted_by_signal() {
    let (registry, _sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    board.control(pin_gated_counter(0, 1), &signal).unwrap();

    let result = thread::scope(|s| {
        let raiser = signal.clone();
        s.spawn(move || {
            thread::sleep(Duration::from_millis(20));
            raiser.raise();
        });
        board.control(WAIT, &signal)
    });
    assert_eq!(result, Err(CounterError::Interrupted));
    assert!(!signal.is_pending());

    // The channel keeps running after the interruption.
    assert_eq!(
        board
            .control(ControlRequest::IsBusy { channel: 0 }, &signal)
            .unwrap(),
        ControlResponse::Busy(true)
    );
}

#[test]
fn test_wait_on_unarmed_channel_returns() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    sim.hardware().set_count(ch(0), 11);

    let reply = board.control(WAIT, &signal).unwrap();
    assert_eq!(reply, ControlResponse::Count(11));
}
