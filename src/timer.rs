use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

/// Countdown granularity for real sessions.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Events emitted by a running session timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Tick {
        remaining_seconds: u32,
        /// `round(elapsed / total * 100)`, monotonically non-decreasing.
        progress_percent: u32,
    },
    /// Emitted exactly once, when the countdown runs out.
    Completed,
}

/// Cancellable countdown emitter for one session.
pub struct SessionTimer;

impl SessionTimer {
    /// Start a countdown over `total_seconds`, emitting one tick per
    /// `interval` — the first immediately, at progress 0 — and a single
    /// `Completed` at the end. `interval` is a parameter so tests can run at
    /// millisecond pace; sessions use [`TICK_INTERVAL`].
    pub fn start(
        total_seconds: u32,
        interval: Duration,
        mut emit: impl FnMut(TimerEvent) + Send + 'static,
    ) -> TimerHandle {
        let cancelled = Arc::new(Mutex::new(false));
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();

        let flag = cancelled.clone();
        let thread = thread::spawn(move || {
            for elapsed in 0..total_seconds {
                {
                    // Emission happens under the cancel lock, so `cancel`
                    // returning means no further events will be observed.
                    let cancelled = flag.lock().unwrap();
                    if *cancelled {
                        return;
                    }
                    emit(TimerEvent::Tick {
                        remaining_seconds: total_seconds - elapsed,
                        progress_percent: progress(elapsed, total_seconds),
                    });
                }
                match cancel_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            let cancelled = flag.lock().unwrap();
            if !*cancelled {
                debug!("countdown finished after {total_seconds}s");
                emit(TimerEvent::Completed);
            }
        });

        TimerHandle {
            cancelled,
            cancel_tx,
            thread,
        }
    }
}

fn progress(elapsed: u32, total: u32) -> u32 {
    (elapsed * 100 + total / 2) / total
}

/// Handle to a running countdown.
pub struct TimerHandle {
    cancelled: Arc<Mutex<bool>>,
    cancel_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl TimerHandle {
    /// Stop the countdown without emitting `Completed`. Idempotent. Waits
    /// for any in-flight emission, so once this returns no stale tick can
    /// appear behind later events.
    pub fn cancel(&self) {
        *self.cancelled.lock().unwrap() = true;
        let _ = self.cancel_tx.send(());
    }

    /// Wait for the emitter thread to exit. Mostly useful in tests.
    pub fn join(self) {
        let _ = self.thread.join();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    const FAST: Duration = Duration::from_millis(2);

    #[test]
    fn emits_one_tick_per_second_then_exactly_one_completed() {
        let (tx, rx) = mpsc::channel();
        let handle = SessionTimer::start(5, FAST, move |event| {
            tx.send(event).unwrap();
        });
        let events: Vec<TimerEvent> = rx.iter().collect();
        handle.join();

        let ticks: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, TimerEvent::Tick { .. }))
            .collect();
        assert_eq!(ticks.len(), 5);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, TimerEvent::Completed))
                .count(),
            1
        );
        assert_eq!(events.last(), Some(&TimerEvent::Completed));
    }

    #[test]
    fn progress_is_monotone_from_zero_and_remaining_counts_down() {
        let (tx, rx) = mpsc::channel();
        let handle = SessionTimer::start(120, Duration::from_micros(200), move |event| {
            tx.send(event).unwrap();
        });
        let events: Vec<TimerEvent> = rx.iter().collect();
        handle.join();

        let mut last_progress = 0;
        let mut expected_remaining = 120;
        let mut ticks = 0;
        for event in &events {
            if let TimerEvent::Tick {
                remaining_seconds,
                progress_percent,
            } = event
            {
                assert_eq!(*remaining_seconds, expected_remaining);
                assert!(*progress_percent >= last_progress);
                last_progress = *progress_percent;
                expected_remaining -= 1;
                ticks += 1;
            }
        }
        assert_eq!(ticks, 120);
        assert_eq!(
            events.first(),
            Some(&TimerEvent::Tick {
                remaining_seconds: 120,
                progress_percent: 0
            })
        );
    }

    #[test]
    fn cancel_stops_ticks_and_suppresses_completed() {
        let (tx, rx) = mpsc::channel();
        let handle = SessionTimer::start(1000, Duration::from_millis(5), move |event| {
            tx.send(event).unwrap();
        });
        // Let a few ticks through, then cancel.
        std::thread::sleep(Duration::from_millis(20));
        handle.cancel();
        let events: Vec<TimerEvent> = rx.iter().collect();
        handle.join();

        assert!(!events.is_empty());
        assert!(!events.iter().any(|e| matches!(e, TimerEvent::Completed)));
    }

    #[test]
    fn no_tick_is_emitted_after_cancel_returns() {
        let (tx, rx) = mpsc::channel();
        let handle = SessionTimer::start(1000, Duration::from_millis(1), move |event| {
            tx.send(event).unwrap();
        });
        std::thread::sleep(Duration::from_millis(5));
        handle.cancel();
        // Everything emitted is already in the channel once cancel returns.
        let _drained: Vec<TimerEvent> = rx.try_iter().collect();
        std::thread::sleep(Duration::from_millis(10));
        let after: Vec<TimerEvent> = rx.try_iter().collect();
        handle.join();

        assert!(after.is_empty());
    }
}
