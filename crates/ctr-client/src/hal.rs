//! Async wrappers over the blocking acquisition API.
//!
//! Every call is moved onto tokio's blocking pool with
//! [`tokio::task::spawn_blocking`], so a blocked buffered read or count wait
//! never stalls the async runtime. Interrupting a pending call still goes
//! through the acquisition's [`Signal`].

use std::sync::Arc;

use anyhow::{anyhow, Result};
use ctr_driver::{InputSource, Signal};

use crate::acquisition::{Acquisition, BufferedRead, CountReading, WaitPolicy};
use crate::state::ChannelState;

/// Shareable async handle to an [`Acquisition`].
#[derive(Clone)]
pub struct AsyncAcquisition {
    inner: Arc<Acquisition>,
}

impl AsyncAcquisition {
    /// Wrap an acquisition.
    pub fn new(inner: Acquisition) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// The wrapped acquisition.
    pub fn inner(&self) -> &Acquisition {
        &self.inner
    }

    /// Handle that interrupts pending blocking calls.
    pub fn signal(&self) -> Signal {
        self.inner.signal()
    }

    /// Take the acquisition back, if no other handle shares it.
    pub fn try_into_inner(self) -> std::result::Result<Acquisition, Self> {
        Arc::try_unwrap(self.inner).map_err(|inner| Self { inner })
    }

    async fn run<T, F>(&self, what: &'static str, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Acquisition) -> ctr_driver::Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || call(inner.as_ref()))
            .await
            .map_err(|e| anyhow!("Task join error: {}", e))?
            .map_err(|e| anyhow!("{} error: {}", what, e))
    }

    /// See [`Acquisition::state`].
    pub async fn state(&self, channel: u32) -> Result<ChannelState> {
        self.run("State", move |acq| acq.state(channel)).await
    }

    /// See [`Acquisition::start_counter`].
    pub async fn start_counter(&self, channel: u32, source: InputSource) -> Result<()> {
        self.run("Start", move |acq| acq.start_counter(channel, source))
            .await
    }

    /// See [`Acquisition::start_gated_counter`].
    pub async fn start_gated_counter(
        &self,
        channel: u32,
        gate_length: f64,
        source: InputSource,
    ) -> Result<()> {
        self.run("Start", move |acq| {
            acq.start_gated_counter(channel, gate_length, source)
        })
        .await
    }

    /// See [`Acquisition::start_buffered_counter`].
    pub async fn start_buffered_counter(
        &self,
        channel: u32,
        gate_length: f64,
        source: InputSource,
        capacity: usize,
        continuous: bool,
    ) -> Result<()> {
        self.run("Start", move |acq| {
            acq.start_buffered_counter(channel, gate_length, source, capacity, continuous)
        })
        .await
    }

    /// See [`Acquisition::start_pulser`].
    pub async fn start_pulser(
        &self,
        channel: u32,
        period_seconds: f64,
        continuous: bool,
    ) -> Result<()> {
        self.run("Start", move |acq| {
            acq.start_pulser(channel, period_seconds, continuous)
        })
        .await
    }

    /// See [`Acquisition::stop_counter`].
    pub async fn stop_counter(&self, channel: u32) -> Result<()> {
        self.run("Stop", move |acq| acq.stop_counter(channel)).await
    }

    /// See [`Acquisition::get_count`].
    pub async fn get_count(
        &self,
        channel: u32,
        wait_for_end: bool,
        quit_on_signal: bool,
    ) -> Result<CountReading> {
        self.run("Read", move |acq| {
            acq.get_count(channel, wait_for_end, quit_on_signal)
        })
        .await
    }

    /// See [`Acquisition::get_buffered_available`].
    pub async fn get_buffered_available(&self) -> Result<usize> {
        self.run("Read", |acq| acq.get_buffered_available()).await
    }

    /// Read up to `max_samples` buffered samples.
    ///
    /// Returns the samples actually read together with the read status.
    pub async fn get_buffered_counts(
        &self,
        max_samples: usize,
        wait: WaitPolicy,
        quit_on_signal: bool,
    ) -> Result<(Vec<u32>, BufferedRead)> {
        self.run("Read", move |acq| {
            let mut samples = vec![0u32; max_samples];
            let read = acq.get_buffered_counts(&mut samples, max_samples, wait, quit_on_signal)?;
            samples.truncate(read.n_read);
            Ok((samples, read))
        })
        .await
    }
}

impl std::fmt::Debug for AsyncAcquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncAcquisition")
            .field("board", &self.inner.board_index())
            .finish()
    }
}
