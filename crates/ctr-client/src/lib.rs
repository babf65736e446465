//! Client library for the ctr-daq counter/timer board.
//!
//! Applications link this crate to run counts on a board opened through the
//! driver's [`BoardRegistry`](ctr_driver::BoardRegistry). It layers a
//! per-channel state machine over the driver's armed/not-armed view and
//! offers blocking, polling and timed reads of buffered samples.
//!
//! # Modules
//!
//! - [`acquisition`] - start/stop, counts and buffered reads
//! - [`state`] - client-side channel states and their reconciliation
//! - [`timing`] - seconds to timebase ticks, default buffer sizing
//! - [`samples`] - little-endian sample decoding
//! - [`hal`] - tokio wrappers for async applications
//!
//! # Example
//!
//! ```no_run
//! use ctr_client::{Acquisition, WaitPolicy};
//! use ctr_driver::{BoardRegistry, InputSource, SimulatedBoard};
//!
//! # fn example() -> ctr_driver::Result<()> {
//! let registry = BoardRegistry::new();
//! let _sim = SimulatedBoard::attach(&registry, 0)?;
//! let acq = Acquisition::open(&registry, 0)?;
//!
//! // 10 ms gates, room for 1000 samples
//! acq.start_buffered_counter(0, 0.010, InputSource::Default, 1000, false)?;
//!
//! let mut samples = vec![0u32; 100];
//! let read = acq.get_buffered_counts(&mut samples, 100, WaitPolicy::from_seconds(2.0)?, true)?;
//! println!("{} samples, timed out: {}", read.n_read, read.timed_out);
//!
//! acq.stop_counter(0)?;
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod hal;
pub mod samples;
pub mod state;
pub mod timing;

pub use acquisition::{Acquisition, BufferedRead, CountReading, WaitPolicy};
pub use hal::AsyncAcquisition;
pub use samples::{decode_samples, sample_from_le};
pub use state::{ChannelState, StateTracker, Tracking};
pub use timing::{
    default_capacity, gate_ticks, resolve_capacity, ticks_to_seconds, DEFAULT_BUFFER_SECONDS,
    MAX_DEFAULT_CAPACITY, MIN_DEFAULT_CAPACITY, MIN_GATE_TICKS,
};
