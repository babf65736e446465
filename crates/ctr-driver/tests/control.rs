//! Board Open and Control-Request Test Suite
//!
//! Validates the board registry's open failures and the argument checking of
//! the control surface.
//!
//! # Test Coverage
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_open_failures_are_distinct` | Each open failure has its own code |
//! | `test_first_opener_wins` | Exclusive ownership until close |
//! | `test_invalid_arguments_touch_no_hardware` | Validation before register writes |
//! | `test_busy_channel_rejected` | Armed channel refuses a second start |
//! | `test_counter_configuration` | Mode and routing written by a start |
//! | `test_digital_passthrough` | Digital read/write requests |

use ctr_driver::{
    BoardRegistry, Channel, ControlRequest, ControlResponse, CounterError, GateSource,
    InputSource, ModeBits, ReadCountFlags, Signal, SimulatedBoard,
};

// =============================================================================
// Open
// =============================================================================

#[test]
fn test_open_failures_are_distinct() {
    let registry = BoardRegistry::new();
    SimulatedBoard::attach(&registry, 0).unwrap();
    registry.attach_without_driver(1);
    registry.attach_faulty(2, "bus error");
    SimulatedBoard::attach(&registry, 3).unwrap();
    registry.restrict(3, true).unwrap();

    let _owner = registry.open(0).unwrap();
    let errors = [
        registry.open(9).unwrap_err(),
        registry.open(0).unwrap_err(),
        registry.open(3).unwrap_err(),
        registry.open(1).unwrap_err(),
        registry.open(2).unwrap_err(),
    ];

    assert_eq!(errors[0], CounterError::InvalidBoard { index: 9 });
    assert_eq!(errors[1], CounterError::BoardBusy { index: 0 });
    assert_eq!(errors[2], CounterError::PermissionDenied { index: 3 });
    assert_eq!(errors[3], CounterError::NoDriver { index: 1 });
    assert!(errors[4].to_string().contains("bus error"));

    let mut codes: Vec<i32> = errors.iter().map(CounterError::code).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), errors.len());
    assert!(errors.iter().all(CounterError::is_open_failure));

    assert_eq!(registry.restrict(7, true), Err(CounterError::InvalidBoard { index: 7 }));
    assert_eq!(registry.indices(), vec![0, 1, 2, 3]);
}

#[test]
fn test_first_opener_wins() {
    let registry = BoardRegistry::new();
    SimulatedBoard::attach(&registry, 0).unwrap();

    let first = registry.open(0).unwrap();
    assert_eq!(first.index(), 0);
    assert!(registry.open(0).unwrap_err().is_open_failure());
    assert_eq!(
        SimulatedBoard::attach(&registry, 0).unwrap_err(),
        CounterError::BoardBusy { index: 0 }
    );

    drop(first);
    assert!(registry.open(0).is_ok());
}

// =============================================================================
// Control requests
// =============================================================================

#[test]
fn test_invalid_arguments_touch_no_hardware() {
    let registry = BoardRegistry::new();
    let sim = SimulatedBoard::attach(&registry, 0).unwrap();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    let before = sim.hardware().register_accesses();

    let rejected = [
        ControlRequest::Disarm { channel: 4 },
        ControlRequest::ReadCount {
            channel: 0,
            flags: ReadCountFlags::WAIT | ReadCountFlags::POLL,
        },
        ControlRequest::StartFreePulse {
            channel: 0,
            ticks: 0,
            repeat: true,
            notify: false,
        },
        ControlRequest::StartFreeCounter {
            channel: 0,
            source: 3,
            gate: GateSource::None,
            notify: false,
        },
        ControlRequest::StartFreeCounter {
            channel: 0,
            source: 0,
            gate: GateSource::Pin(10),
            notify: false,
        },
        ControlRequest::StartBufferedCounter {
            channel: 0,
            source: 40,
            capacity: 10,
            continuous: true,
        },
        ControlRequest::IsBusy { channel: 17 },
    ];
    for request in rejected {
        let err = board.control(request, &signal).unwrap_err();
        assert!(
            matches!(
                err,
                CounterError::InvalidArgument { .. } | CounterError::InvalidChannel { .. }
            ),
            "{request:?} gave {err:?}"
        );
    }
    assert_eq!(sim.hardware().register_accesses(), before);
}

#[test]
fn test_busy_channel_rejected() {
    let registry = BoardRegistry::new();
    let sim = SimulatedBoard::attach(&registry, 0).unwrap();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();

    let start = ControlRequest::StartFreeCounter {
        channel: 1,
        source: 1,
        gate: GateSource::None,
        notify: false,
    };
    board.control(start, &signal).unwrap();
    let configured = sim.hardware().inspect(Channel::new(1).unwrap());

    let pulse = ControlRequest::StartFreePulse {
        channel: 1,
        ticks: 100,
        repeat: false,
        notify: true,
    };
    assert_eq!(
        board.control(pulse, &signal),
        Err(CounterError::ChannelBusy { channel: 1 })
    );
    assert_eq!(sim.hardware().inspect(Channel::new(1).unwrap()), configured);

    board
        .control(ControlRequest::Disarm { channel: 1 }, &signal)
        .unwrap();
    assert!(board.control(pulse, &signal).is_ok());
}

#[test]
fn test_counter_configuration() {
    let registry = BoardRegistry::new();
    let sim = SimulatedBoard::attach(&registry, 0).unwrap();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();

    board
        .control(
            ControlRequest::StartBufferedCounter {
                channel: 2,
                source: InputSource::Pin(4).to_raw(),
                capacity: 8,
                continuous: false,
            },
            &signal,
        )
        .unwrap();
    board
        .control(
            ControlRequest::StartFreePulse {
                channel: 3,
                ticks: 500,
                repeat: true,
                notify: false,
            },
            &signal,
        )
        .unwrap();

    let counter = sim.hardware().inspect(Channel::new(2).unwrap());
    assert!(counter.armed);
    assert_eq!(counter.source, InputSource::Pin(4));
    assert_eq!(counter.gate, GateSource::Neighbor);
    assert!(counter.mode.contains(ModeBits::LATCH_ON_GATE | ModeBits::REPEAT));

    let pulser = sim.hardware().inspect(Channel::new(3).unwrap());
    assert_eq!(pulser.load, 500);
    assert_eq!(pulser.source, InputSource::Timebase);
    assert!(pulser.mode.contains(ModeBits::PULSE_OUTPUT | ModeBits::REPEAT));

    sim.hardware().count_events(Channel::new(2).unwrap(), 9);
    assert_eq!(
        board.control(
            ControlRequest::ReadCount {
                channel: 2,
                flags: ReadCountFlags::POLL
            },
            &signal
        ),
        Ok(ControlResponse::Count(9))
    );
}

#[test]
fn test_digital_passthrough() {
    let registry = BoardRegistry::new();
    let sim = SimulatedBoard::attach(&registry, 0).unwrap();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();

    sim.hardware().set_digital_input(0b1010);
    assert_eq!(
        board.control(ControlRequest::DigitalRead, &signal),
        Ok(ControlResponse::Digital(0b1010))
    );
    board
        .control(ControlRequest::DigitalWrite { value: 0x5a }, &signal)
        .unwrap();
    assert_eq!(sim.hardware().digital_output(), 0x5a);
}
