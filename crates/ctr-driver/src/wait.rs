//! Wait queues and signal delivery for blocking calls.
//!
//! Interrupt context never blocks: it publishes state and calls
//! [`WaitQueue::wake_all`]. Process context parks in
//! [`WaitQueue::wait_until`], re-checking its condition under the queue lock
//! so a wake-up that races with parking is never lost.
//!
//! A [`Signal`] stands in for asynchronous process signals. Raising it wakes
//! every queue a holder of the signal is parked on; the first wait to see it
//! consumes the pending signal and reports [`WaitResult::Interrupted`]. A
//! wait whose condition already holds returns [`WaitResult::Ready`] and
//! leaves the signal pending.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// Outcome of a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The awaited condition holds
    Ready,
    /// The deadline passed first
    TimedOut,
    /// A signal arrived first
    Interrupted,
}

/// A queue of threads waiting for a condition published from interrupt context.
#[derive(Debug, Default)]
pub struct WaitQueue {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl WaitQueue {
    /// Create an empty wait queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every waiter so it re-evaluates its condition.
    pub fn wake_all(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Block until `ready` returns true, the deadline passes, or `signal` is raised.
    ///
    /// `ready` is evaluated with the queue lock held and takes precedence over
    /// a pending signal. The deadline is absolute, so spurious wake-ups never
    /// extend it.
    pub fn wait_until<F>(
        self: &Arc<Self>,
        mut ready: F,
        deadline: Option<Instant>,
        signal: &Signal,
    ) -> WaitResult
    where
        F: FnMut() -> bool,
    {
        let _parked = signal.park_on(self);
        let mut generation = self.generation.lock();
        loop {
            if ready() {
                return WaitResult::Ready;
            }
            if signal.take() {
                return WaitResult::Interrupted;
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return WaitResult::TimedOut;
                    }
                    // Timeout is re-checked at the top of the loop together
                    // with the condition.
                    let _ = self.cond.wait_until(&mut generation, deadline);
                }
                None => self.cond.wait(&mut generation),
            }
        }
    }
}

#[derive(Debug, Default)]
struct SignalInner {
    pending: AtomicBool,
    next_park: AtomicU64,
    // One entry per blocked holder, keyed by its park id.
    parked: Mutex<Vec<(u64, Arc<WaitQueue>)>>,
}

/// Asynchronous interruption delivered to a blocked caller.
///
/// Cloning yields another handle to the same signal; typically one clone is
/// kept by the blocking side and another handed to whatever delivers
/// interruptions (a Ctrl-C handler, a supervisor thread).
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

impl Signal {
    /// Create a signal with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver the signal, waking every holder that is blocked on it.
    pub fn raise(&self) {
        self.inner.pending.store(true, Ordering::SeqCst);
        let parked: Vec<Arc<WaitQueue>> = self
            .inner
            .parked
            .lock()
            .iter()
            .map(|(_, queue)| Arc::clone(queue))
            .collect();
        for queue in parked {
            queue.wake_all();
        }
    }

    /// Number of waits currently blocked on this signal.
    pub fn parked(&self) -> usize {
        self.inner.parked.lock().len()
    }

    /// Whether a signal is pending.
    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Consume a pending signal.
    pub fn take(&self) -> bool {
        self.inner.pending.swap(false, Ordering::SeqCst)
    }

    /// Discard any pending signal.
    pub fn clear(&self) {
        self.inner.pending.store(false, Ordering::SeqCst);
    }

    fn park_on(&self, queue: &Arc<WaitQueue>) -> ParkGuard<'_> {
        let id = self.inner.next_park.fetch_add(1, Ordering::Relaxed);
        self.inner.parked.lock().push((id, Arc::clone(queue)));
        ParkGuard { signal: self, id }
    }
}

struct ParkGuard<'a> {
    signal: &'a Signal,
    id: u64,
}

impl Drop for ParkGuard<'_> {
    fn drop(&mut self) {
        self.signal
            .inner
            .parked
            .lock()
            .retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_ready_immediately() {
        let queue = Arc::new(WaitQueue::new());
        let signal = Signal::new();
        assert_eq!(
            queue.wait_until(|| true, None, &signal),
            WaitResult::Ready
        );
    }

    #[test]
    fn test_timeout() {
        let queue = Arc::new(WaitQueue::new());
        let signal = Signal::new();
        let start = Instant::now();
        let deadline = start + Duration::from_millis(50);
        assert_eq!(
            queue.wait_until(|| false, Some(deadline), &signal),
            WaitResult::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_wake_from_other_thread() {
        let queue = Arc::new(WaitQueue::new());
        let flag = Arc::new(AtomicBool::new(false));
        let signal = Signal::new();

        let producer = {
            let queue = Arc::clone(&queue);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::Release);
                queue.wake_all();
            })
        };

        let result = queue.wait_until(
            || flag.load(Ordering::Acquire),
            Some(Instant::now() + Duration::from_secs(5)),
            &signal,
        );
        assert_eq!(result, WaitResult::Ready);
        producer.join().unwrap();
    }

    #[test]
    fn test_signal_interrupts_and_is_consumed() {
        let queue = Arc::new(WaitQueue::new());
        let signal = Signal::new();

        let raiser = {
            let signal = signal.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                signal.raise();
            })
        };

        assert_eq!(
            queue.wait_until(|| false, None, &signal),
            WaitResult::Interrupted
        );
        assert!(!signal.is_pending());
        raiser.join().unwrap();
    }

    #[test]
    fn test_pending_signal_before_wait() {
        let queue = Arc::new(WaitQueue::new());
        let signal = Signal::new();
        signal.raise();
        assert_eq!(
            queue.wait_until(|| false, None, &signal),
            WaitResult::Interrupted
        );
        assert!(!signal.is_pending());
    }

    #[test]
    fn test_ready_condition_wins_over_signal() {
        let queue = Arc::new(WaitQueue::new());
        let signal = Signal::new();
        signal.raise();
        assert_eq!(
            queue.wait_until(|| true, None, &signal),
            WaitResult::Ready
        );
        assert!(signal.is_pending());
        assert_eq!(signal.parked(), 0);
    }

    #[test]
    fn test_each_raise_reaches_a_remaining_waiter() {
        let first = Arc::new(WaitQueue::new());
        let second = Arc::new(WaitQueue::new());
        let signal = Signal::new();

        let waiters: Vec<_> = [&first, &second]
            .into_iter()
            .map(|queue| {
                let queue = Arc::clone(queue);
                let signal = signal.clone();
                thread::spawn(move || queue.wait_until(|| false, None, &signal))
            })
            .collect();

        let deadline = Instant::now() + Duration::from_secs(5);
        while signal.parked() < 2 {
            assert!(Instant::now() < deadline, "waiters never parked");
            thread::sleep(Duration::from_millis(1));
        }

        signal.raise();
        while signal.parked() > 1 {
            assert!(Instant::now() < deadline, "first raise woke nobody");
            thread::sleep(Duration::from_millis(1));
        }
        signal.raise();

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), WaitResult::Interrupted);
        }
        assert_eq!(signal.parked(), 0);
    }
}
