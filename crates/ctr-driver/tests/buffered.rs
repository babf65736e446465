//! Buffered Counter Test Suite
//!
//! Exercises the ring-buffer filler and the data-read surface of a simulated
//! board: discard of the first sample, bounded completion, continuous
//! overflow, over-rate detection and blocking/non-blocking reads.
//!
//! # Test Coverage
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_first_sample_discarded` | Partial first gate period is dropped |
//! | `test_bounded_session_of_100` | Fill, drain, end of data |
//! | `test_continuous_overflow_latches` | One-slot slack, then overflow |
//! | `test_over_rate_latches_too_fast` | Latch before acknowledge |
//! | `test_software_snapshot_path` | Sample taken from the readback that fired |
//! | `test_second_session_rejected` | Single buffered-session slot |
//! | `test_nonblocking_and_blocking_reads` | WouldBlock, wake-up, signal |
//! | `test_wait_readable_times_out` | Readiness primitive with a deadline |
//! | `test_stop_and_close_release_session` | Explicit stop and board close |
//! | `test_reader_drains_stopped_session` | Bound reader sees end of data after stop |

use std::thread;
use std::time::{Duration, Instant};

use ctr_driver::{
    BoardRegistry, Channel, ControlRequest, ControlResponse, CounterError, InterruptSources,
    IrqReturn, ReadMode, Signal, SimulatedBoard, WaitResult, SAMPLE_BYTES,
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

fn start(channel: u32, capacity: usize, continuous: bool) -> ControlRequest {
    ControlRequest::StartBufferedCounter {
        channel,
        source: 0,
        capacity,
        continuous,
    }
}

fn available(board: &ctr_driver::Board) -> Result<usize, CounterError> {
    match board.control(ControlRequest::GetBufferedAvailable, &Signal::new())? {
        ControlResponse::Available(n) => Ok(n),
        other => panic!("unexpected reply {other:?}"),
    }
}

fn decode(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(SAMPLE_BYTES)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

// =============================================================================
// Filler
// =============================================================================

#[test]
fn test_first_sample_discarded() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    board.control(start(0, 10, false), &signal).unwrap();

    assert_eq!(sim.latch(ch(0), 999), IrqReturn::Handled);
    assert_eq!(available(&board), Ok(0));

    sim.latch(ch(0), 0x0102_0304);
    let mut buf = [0u8; 8];
    let n = board.read(&mut buf, ReadMode::NonBlocking, &signal).unwrap();
    assert_eq!(n, 4);
    assert_eq!(buf[..4], [0x04, 0x03, 0x02, 0x01]);
}

#[test]
fn test_bounded_session_of_100() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    board.control(start(0, 100, false), &signal).unwrap();

    sim.latch(ch(0), 0);
    for i in 0..100 {
        assert_eq!(sim.latch(ch(0), i), IrqReturn::Handled);
    }
    assert_eq!(available(&board), Ok(100));

    // Further gates find the interrupt disabled.
    assert!(!sim
        .hardware()
        .inspect(ch(0))
        .interrupts
        .contains(InterruptSources::GATE));
    assert_eq!(sim.latch(ch(0), 1234), IrqReturn::None);

    let mut buf = vec![0u8; 100 * SAMPLE_BYTES];
    let n = board.read(&mut buf, ReadMode::NonBlocking, &signal).unwrap();
    assert_eq!(n, 400);
    assert_eq!(decode(&buf), (0..100).collect::<Vec<u32>>());

    assert_eq!(board.read(&mut buf, ReadMode::Blocking, &signal), Ok(0));
}

#[test]
fn test_continuous_overflow_latches() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    let capacity = 4;
    board.control(start(1, capacity, true), &signal).unwrap();

    sim.latch(ch(1), 0);
    for i in 1..capacity as u32 {
        sim.latch(ch(1), i);
        assert!(available(&board).unwrap() < capacity);
    }
    assert_eq!(available(&board), Ok(capacity - 1));

    sim.latch(ch(1), 4);
    assert_eq!(available(&board), Err(CounterError::Overflow));
    let mut buf = [0u8; 16];
    assert_eq!(
        board.read(&mut buf, ReadMode::NonBlocking, &signal),
        Err(CounterError::Overflow)
    );
    assert!(!sim
        .hardware()
        .inspect(ch(1))
        .interrupts
        .contains(InterruptSources::GATE));
}

#[test]
fn test_over_rate_latches_too_fast() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    board.control(start(0, 10, true), &signal).unwrap();

    // Two latches before the interrupt is serviced.
    sim.hardware().latch(ch(0), 1);
    sim.hardware().latch(ch(0), 2);
    assert_eq!(sim.line().raise(), IrqReturn::Handled);

    assert_eq!(available(&board), Err(CounterError::TooFast));
    let mut buf = [0u8; 4];
    let err = board
        .read(&mut buf, ReadMode::Blocking, &signal)
        .unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_software_snapshot_path() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    board.control(start(2, 10, false), &signal).unwrap();

    sim.latch_software(ch(2), 1);
    sim.latch_software(ch(2), 77);
    let mut buf = [0u8; 4];
    board.read(&mut buf, ReadMode::NonBlocking, &signal).unwrap();
    assert_eq!(u32::from_le_bytes(buf), 77);
}

#[test]
fn test_second_session_rejected() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    board.control(start(0, 10, false), &signal).unwrap();
    sim.latch(ch(0), 0);
    sim.latch(ch(0), 5);

    assert_eq!(
        board.control(start(2, 10, false), &signal),
        Err(CounterError::BufferedSessionActive { channel: 0 })
    );
    assert!(!sim.hardware().inspect(ch(2)).armed);

    assert_eq!(available(&board), Ok(1));
    assert!(sim.hardware().inspect(ch(0)).armed);
}

// =============================================================================
// Data surface
// =============================================================================

#[test]
fn test_nonblocking_and_blocking_reads() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    board.control(start(0, 10, true), &signal).unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(
        board.read(&mut buf, ReadMode::NonBlocking, &signal),
        Err(CounterError::WouldBlock)
    );
    assert!(matches!(
        board.read(&mut buf[..3], ReadMode::NonBlocking, &signal),
        Err(CounterError::InvalidArgument { .. })
    ));

    let read = thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut buf = [0u8; 8];
            board
                .read(&mut buf, ReadMode::Blocking, &signal)
                .map(|n| (n, u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])))
        });
        thread::sleep(Duration::from_millis(20));
        sim.latch(ch(0), 0);
        sim.latch(ch(0), 31);
        reader.join().unwrap()
    });
    assert_eq!(read, Ok((4, 31)));

    let interrupted = thread::scope(|s| {
        let raiser = signal.clone();
        s.spawn(move || {
            thread::sleep(Duration::from_millis(20));
            raiser.raise();
        });
        board.read(&mut buf, ReadMode::Blocking, &signal)
    });
    assert_eq!(interrupted, Err(CounterError::Interrupted));
}

#[test]
fn test_wait_readable_times_out() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    board.control(start(0, 10, true), &signal).unwrap();

    let begin = Instant::now();
    let result = board
        .wait_readable(Some(begin + Duration::from_millis(50)), &signal)
        .unwrap();
    assert_eq!(result, WaitResult::TimedOut);
    assert!(begin.elapsed() >= Duration::from_millis(50));

    sim.latch(ch(0), 0);
    sim.latch(ch(0), 1);
    assert_eq!(
        board.wait_readable(Some(Instant::now()), &signal),
        Ok(WaitResult::Ready)
    );
}

#[test]
fn test_stop_and_close_release_session() {
    let (registry, sim) = setup();
    let signal = Signal::new();
    {
        let board = registry.open(0).unwrap();
        board.control(start(0, 10, true), &signal).unwrap();
        assert_eq!(
            board.control(ControlRequest::Disarm { channel: 0 }, &signal),
            Err(CounterError::BufferedSessionActive { channel: 0 })
        );
        board
            .control(ControlRequest::StopBufferedCounter, &signal)
            .unwrap();
        assert_eq!(available(&board), Err(CounterError::NoActiveSession));
        assert_eq!(
            board.control(ControlRequest::StopBufferedCounter, &signal),
            Err(CounterError::NoActiveSession)
        );

        board.control(start(3, 10, true), &signal).unwrap();
        board.close();
    }

    let bank = sim.hardware().inspect(ch(3));
    assert!(!bank.armed);
    assert!(bank.interrupts.is_empty());

    let board = registry.open(0).unwrap();
    assert_eq!(available(&board), Err(CounterError::NoActiveSession));
}

#[test]
fn test_reader_drains_stopped_session() {
    let (registry, sim) = setup();
    let board = registry.open(0).unwrap();
    let signal = Signal::new();
    board.control(start(0, 10, true), &signal).unwrap();
    sim.latch(ch(0), 0);
    sim.latch(ch(0), 10);
    sim.latch(ch(0), 11);

    let reader = board.reader().unwrap();
    board
        .control(ControlRequest::StopBufferedCounter, &signal)
        .unwrap();
    assert!(matches!(
        board.read(&mut [0u8; 4], ReadMode::NonBlocking, &signal),
        Err(CounterError::NoActiveSession)
    ));

    let mut buf = [0u8; 16];
    assert_eq!(reader.read(&mut buf, ReadMode::NonBlocking, &signal), Ok(8));
    assert_eq!(decode(&buf[..8]), vec![10, 11]);
    assert_eq!(reader.read(&mut buf, ReadMode::Blocking, &signal), Ok(0));

    // A reader blocked on an empty ring is woken by the stop.
    board.control(start(0, 10, true), &signal).unwrap();
    let reader = board.reader().unwrap();
    let read = thread::scope(|s| {
        let blocked = s.spawn(|| {
            let mut buf = [0u8; 4];
            reader.read(&mut buf, ReadMode::Blocking, &signal)
        });
        thread::sleep(Duration::from_millis(30));
        board
            .control(ControlRequest::StopBufferedCounter, &signal)
            .unwrap();
        blocked.join().unwrap()
    });
    assert_eq!(read, Ok(0));
}
