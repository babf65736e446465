//! Simulated counter board.
//!
//! [`SimulatedHardware`] is a register-level model of the board that
//! implements [`CounterHardware`]. It reproduces the behavior the driver
//! depends on:
//!
//! - A pulse generator reaching terminal count closes the gate of a neighbor
//!   that is gated by it. A latch-on-gate channel latches its count into the
//!   hardware snapshot and restarts; a single-shot gated counter stops and
//!   reports terminal count.
//! - A latch taken while the previous one is still unacknowledged raises
//!   [`ChannelStatus::OVER_RATE`].
//! - Every register access is counted, so tests can assert that an operation
//!   touched no hardware.
//!
//! [`SimulatedBoard`] pairs the hardware with its [`InterruptLine`], and
//! [`EventGenerator`] drives it from a background thread in real time.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::board::BoardRegistry;
use crate::error::{CounterError, Result};
use crate::irq::{InterruptLine, IrqReturn};
use crate::registers::{
    Channel, ChannelStatus, CounterHardware, GateSource, InputSource, InterruptSources, ModeBits,
    N_CHANNELS,
};
use crate::TIMEBASE_HZ;

/// Register contents of one simulated channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelRegisterBank {
    /// Channel is running
    pub armed: bool,
    /// Mode register
    pub mode: ModeBits,
    /// Load register
    pub load: u32,
    /// Live count
    pub count: u32,
    /// Value latched at the last gate closure
    pub hw_snapshot: u32,
    /// Status register
    pub status: ChannelStatus,
    /// Interrupt enable register
    pub interrupts: InterruptSources,
    /// Counted signal
    pub source: InputSource,
    /// Gate
    pub gate: GateSource,
}

/// Register-level model of a 4-channel counter board.
pub struct SimulatedHardware {
    channels: [Mutex<ChannelRegisterBank>; N_CHANNELS as usize],
    digital_in: AtomicU8,
    digital_out: AtomicU8,
    accesses: AtomicU64,
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHardware {
    /// Create a board with every channel idle.
    pub fn new() -> Self {
        Self {
            channels: Default::default(),
            digital_in: AtomicU8::new(0),
            digital_out: AtomicU8::new(0),
            accesses: AtomicU64::new(0),
        }
    }

    /// Number of register accesses made through [`CounterHardware`].
    pub fn register_accesses(&self) -> u64 {
        self.accesses.load(Ordering::SeqCst)
    }

    /// Copy of one channel's registers. Not counted as an access.
    pub fn inspect(&self, channel: Channel) -> ChannelRegisterBank {
        *self.bank(channel).lock()
    }

    /// Overwrite the live count.
    pub fn set_count(&self, channel: Channel, count: u32) {
        self.bank(channel).lock().count = count;
    }

    /// Feed `events` input edges to a channel. Only a counting channel
    /// advances.
    pub fn count_events(&self, channel: Channel, events: u32) {
        if !self.counting(channel) {
            return;
        }
        let mut bank = self.bank(channel).lock();
        if !bank.mode.contains(ModeBits::PULSE_OUTPUT) {
            bank.count = bank.count.wrapping_add(events);
        }
    }

    /// The channel's pulse generator reaches terminal count.
    ///
    /// A non-repeating channel stops. The falling gate edge is propagated to
    /// the neighbor if the neighbor is gated by this channel.
    pub fn pulse(&self, channel: Channel) {
        {
            let mut bank = self.bank(channel).lock();
            if !bank.armed {
                return;
            }
            bank.status |= ChannelStatus::TERMINAL_COUNT;
            if bank.mode.contains(ModeBits::REPEAT) {
                bank.count = bank.load;
            } else {
                bank.armed = false;
            }
        }
        trace!(channel = %channel, "simulated pulse");

        let neighbor = channel.neighbor();
        let gated_by_us = {
            let bank = self.bank(neighbor).lock();
            bank.armed && bank.gate == GateSource::Neighbor
        };
        if gated_by_us {
            self.close_gate(neighbor);
        }
    }

    /// An external gate pin goes low, closing the gate of every armed channel
    /// gated by it.
    pub fn close_pin_gate(&self, pin: u8) {
        for channel in Channel::all() {
            let gated = {
                let bank = self.bank(channel).lock();
                bank.armed && bank.gate == GateSource::Pin(pin)
            };
            if gated {
                self.close_gate(channel);
            }
        }
    }

    /// Latch `value` into the hardware snapshot as a gate closure would.
    pub fn latch(&self, channel: Channel, value: u32) {
        let mut bank = self.bank(channel).lock();
        bank.hw_snapshot = value;
        Self::raise_latch(&mut bank, ChannelStatus::HW_LATCHED);
    }

    /// Latch `value` through the software snapshot path.
    pub fn latch_software(&self, channel: Channel, value: u32) {
        let mut bank = self.bank(channel).lock();
        bank.count = value;
        Self::raise_latch(&mut bank, ChannelStatus::SW_LATCHED);
    }

    /// Set the digital input lines.
    pub fn set_digital_input(&self, value: u8) {
        self.digital_in.store(value, Ordering::SeqCst);
    }

    /// Current digital output lines.
    pub fn digital_output(&self) -> u8 {
        self.digital_out.load(Ordering::SeqCst)
    }

    fn close_gate(&self, channel: Channel) {
        let mut bank = self.bank(channel).lock();
        if bank.mode.contains(ModeBits::LATCH_ON_GATE) {
            let count = bank.count;
            bank.hw_snapshot = count;
            bank.count = 0;
            Self::raise_latch(&mut bank, ChannelStatus::HW_LATCHED);
        } else {
            bank.armed = false;
            bank.status |= ChannelStatus::TERMINAL_COUNT;
        }
    }

    fn raise_latch(bank: &mut ChannelRegisterBank, bit: ChannelStatus) {
        if bank.status.sample_ready() {
            bank.status |= ChannelStatus::OVER_RATE;
        }
        bank.status |= bit;
    }

    fn counting(&self, channel: Channel) -> bool {
        let (armed, gate) = {
            let bank = self.bank(channel).lock();
            (bank.armed, bank.gate)
        };
        match gate {
            _ if !armed => false,
            GateSource::None | GateSource::Pin(_) => true,
            GateSource::Neighbor => self.bank(channel.neighbor()).lock().armed,
        }
    }

    fn bank(&self, channel: Channel) -> &Mutex<ChannelRegisterBank> {
        &self.channels[channel.slot()]
    }

    fn touch(&self) {
        self.accesses.fetch_add(1, Ordering::SeqCst);
    }
}

impl CounterHardware for SimulatedHardware {
    fn arm(&self, channel: Channel) {
        self.touch();
        let mut bank = self.bank(channel).lock();
        bank.count = bank.load;
        bank.armed = true;
    }

    fn disarm(&self, channel: Channel) {
        self.touch();
        self.bank(channel).lock().armed = false;
    }

    fn load(&self, channel: Channel, value: u32) {
        self.touch();
        self.bank(channel).lock().load = value;
    }

    fn configure(&self, channel: Channel, mode: ModeBits) {
        self.touch();
        self.bank(channel).lock().mode = mode;
    }

    fn route_input(&self, channel: Channel, source: InputSource, gate: GateSource) {
        self.touch();
        let mut bank = self.bank(channel).lock();
        bank.source = source;
        bank.gate = gate;
    }

    fn software_snapshot(&self, channel: Channel) -> u32 {
        self.touch();
        self.bank(channel).lock().count
    }

    fn hardware_snapshot(&self, channel: Channel) -> u32 {
        self.touch();
        self.bank(channel).lock().hw_snapshot
    }

    fn is_armed(&self, channel: Channel) -> bool {
        self.touch();
        self.bank(channel).lock().armed
    }

    fn is_counting(&self, channel: Channel) -> bool {
        self.touch();
        self.counting(channel)
    }

    fn status(&self, channel: Channel) -> ChannelStatus {
        self.touch();
        self.bank(channel).lock().status
    }

    fn acknowledge(&self, channel: Channel, bits: ChannelStatus) {
        self.touch();
        self.bank(channel).lock().status.remove(bits);
    }

    fn interrupts(&self, channel: Channel) -> InterruptSources {
        self.touch();
        self.bank(channel).lock().interrupts
    }

    fn set_interrupts(&self, channel: Channel, sources: InterruptSources) {
        self.touch();
        self.bank(channel).lock().interrupts = sources;
    }

    fn digital_read(&self) -> u8 {
        self.touch();
        self.digital_in.load(Ordering::SeqCst)
    }

    fn digital_write(&self, value: u8) {
        self.touch();
        self.digital_out.store(value, Ordering::SeqCst);
    }
}

impl fmt::Debug for SimulatedHardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedHardware")
            .field("accesses", &self.register_accesses())
            .finish()
    }
}

/// A simulated board attached to a registry, with its interrupt line.
///
/// Each event helper updates the hardware and then asserts the line, the
/// way the real board would.
#[derive(Debug, Clone)]
pub struct SimulatedBoard {
    hw: Arc<SimulatedHardware>,
    line: InterruptLine,
}

impl SimulatedBoard {
    /// Attach fresh simulated hardware to `registry` at `index`.
    pub fn attach(registry: &BoardRegistry, index: u32) -> Result<Self> {
        let hw = Arc::new(SimulatedHardware::new());
        let line = registry.attach(index, Arc::clone(&hw) as Arc<dyn CounterHardware>)?;
        Ok(Self { hw, line })
    }

    /// The simulated registers.
    pub fn hardware(&self) -> &Arc<SimulatedHardware> {
        &self.hw
    }

    /// The board's interrupt line.
    pub fn line(&self) -> &InterruptLine {
        &self.line
    }

    /// Feed input edges to a channel. Counting raises no interrupt.
    pub fn count_events(&self, channel: Channel, events: u32) {
        self.hw.count_events(channel, events);
    }

    /// Fire one period of the channel's pulse generator.
    pub fn pulse(&self, channel: Channel) -> IrqReturn {
        self.hw.pulse(channel);
        self.line.raise()
    }

    /// Close an external gate pin.
    pub fn close_pin_gate(&self, pin: u8) -> IrqReturn {
        self.hw.close_pin_gate(pin);
        self.line.raise()
    }

    /// Latch a sample into the channel's hardware snapshot.
    pub fn latch(&self, channel: Channel, value: u32) -> IrqReturn {
        self.hw.latch(channel, value);
        self.line.raise()
    }

    /// Latch a sample through the software snapshot path.
    pub fn latch_software(&self, channel: Channel, value: u32) -> IrqReturn {
        self.hw.latch_software(channel, value);
        self.line.raise()
    }
}

/// Settings for [`EventGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Simulation step
    pub tick: Duration,
    /// Upper bound of input edges fed to each counting channel per step
    pub max_events_per_tick: u32,
    /// RNG seed; `None` seeds from the OS
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(1),
            max_events_per_tick: 100,
            seed: None,
        }
    }
}

/// Background thread that runs a [`SimulatedBoard`] in real time.
///
/// Every step feeds random input edges to counting channels and fires the
/// pulse generators whose period, derived from the load register and the
/// timebase, has elapsed.
pub struct EventGenerator {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventGenerator {
    /// Start the generator thread.
    pub fn spawn(board: SimulatedBoard, config: GeneratorConfig) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let handle = thread::Builder::new()
            .name("ctr-sim-events".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || run_generator(board, config, rng, &stop)
            })
            .map_err(|e| CounterError::Internal {
                message: format!("failed to spawn event generator: {e}"),
            })?;
        debug!(?config, "event generator started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("event generator thread panicked");
            }
        }
    }
}

impl Drop for EventGenerator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for EventGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventGenerator")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

fn pulse_period(load: u32) -> Duration {
    Duration::from_secs_f64(f64::from(load.max(1)) / TIMEBASE_HZ)
}

fn run_generator(board: SimulatedBoard, config: GeneratorConfig, mut rng: ChaCha8Rng, stop: &AtomicBool) {
    let mut next_fire: [Option<Instant>; N_CHANNELS as usize] = [None; N_CHANNELS as usize];

    while !stop.load(Ordering::SeqCst) {
        thread::sleep(config.tick);
        let now = Instant::now();

        for channel in Channel::all() {
            if config.max_events_per_tick > 0 {
                board.count_events(channel, rng.gen_range(0..=config.max_events_per_tick));
            }

            let bank = board.hardware().inspect(channel);
            let slot = &mut next_fire[channel.slot()];
            if !bank.armed || !bank.mode.contains(ModeBits::PULSE_OUTPUT) {
                *slot = None;
                continue;
            }
            let period = pulse_period(bank.load);
            match *slot {
                None => *slot = Some(now + period),
                Some(due) if now >= due => {
                    board.pulse(channel);
                    // Falling behind skips periods instead of bursting.
                    let next = due + period;
                    *slot = Some(if next <= now { now + period } else { next });
                }
                Some(_) => {}
            }
        }
    }
}
