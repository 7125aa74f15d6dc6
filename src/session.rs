use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::buffer::SampleBuffer;
use crate::errors::{CommandError, LinkError};
use crate::link::{Link, LinkConfig, LinkHandle, MacAddr};
use crate::parser::parse_frames;
use crate::payload::SessionPayload;
use crate::reader::spawn_reader;
use crate::submit::submit;
use crate::timer::{SessionTimer, TimerEvent, TimerHandle, TICK_INTERVAL};

/// Shortest and longest session the command surface accepts, in minutes.
pub const MIN_SESSION_MINUTES: u32 = 1;
pub const MAX_SESSION_MINUTES: u32 = 10;

/// Notifications from the core to whatever surface observes it. The core
/// never touches presentation state; these events are its whole output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Connecting,
    Connected,
    ConnectFailed(String),
    /// Per-second countdown update for the running session.
    Tick {
        remaining_seconds: u32,
        progress_percent: u32,
    },
    /// The link died mid-session; the session is finalizing early.
    LinkLost(String),
    SessionFinished,
    /// Response status and body, or a failure description. One per session.
    SubmissionResult(String),
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Session lifecycle as observable from the outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Collecting {
        label: String,
        elapsed_seconds: u32,
    },
    Finalizing,
}

/// Why a session left Collecting.
#[derive(Debug, Clone)]
enum FinishReason {
    Completed,
    Stopped,
    LinkLost(String),
}

struct ConnSlot {
    state: LinkState,
    link: Option<Link>,
}

/// Everything a running session owns. Torn down, in order, by the finalizer.
struct ActiveSession {
    label: String,
    stop: Arc<AtomicBool>,
    link: LinkHandle,
    timer: TimerHandle,
    buffer: Arc<SampleBuffer>,
    elapsed: Arc<AtomicU32>,
    reader: JoinHandle<()>,
}

struct Inner {
    events: Sender<StatusEvent>,
    endpoint: String,
    link_config: LinkConfig,
    tick_interval: Duration,
    conn: Mutex<ConnSlot>,
    session: Mutex<Option<ActiveSession>>,
    finalizing: AtomicBool,
}

/// The acquisition core: owns the connection, the running session and its
/// background tasks, and reports all progress through the event channel.
///
/// At most one connection and one session exist at a time. Finalization —
/// whether from timer completion, an explicit stop, or a link failure — runs
/// exactly once per session, on its own thread, so no caller blocks on the
/// submission round trip.
pub struct Collector {
    inner: Arc<Inner>,
}

impl Collector {
    pub fn new(events: Sender<StatusEvent>, endpoint: impl Into<String>) -> Self {
        Self::with_config(events, endpoint, LinkConfig::default())
    }

    pub fn with_config(
        events: Sender<StatusEvent>,
        endpoint: impl Into<String>,
        link_config: LinkConfig,
    ) -> Self {
        Self::build(events, endpoint, link_config, TICK_INTERVAL)
    }

    #[cfg(test)]
    pub(crate) fn with_tick_interval(
        events: Sender<StatusEvent>,
        endpoint: impl Into<String>,
        tick_interval: Duration,
    ) -> Self {
        Self::build(events, endpoint, LinkConfig::default(), tick_interval)
    }

    fn build(
        events: Sender<StatusEvent>,
        endpoint: impl Into<String>,
        link_config: LinkConfig,
        tick_interval: Duration,
    ) -> Self {
        Collector {
            inner: Arc::new(Inner {
                events,
                endpoint: endpoint.into(),
                link_config,
                tick_interval,
                conn: Mutex::new(ConnSlot {
                    state: LinkState::Disconnected,
                    link: None,
                }),
                session: Mutex::new(None),
                finalizing: AtomicBool::new(false),
            }),
        }
    }

    /// Validate `address` and start a connection attempt in the background.
    /// Progress arrives as Connecting / Connected / ConnectFailed events.
    pub fn connect(&self, address: &str) -> Result<(), CommandError> {
        let address = address.trim();
        let mac: MacAddr = address
            .parse()
            .map_err(|_| CommandError::InvalidAddress(address.to_string()))?;
        let inner = self.begin_connecting()?;
        thread::spawn(move || {
            let result = Link::open_rfcomm(&mac, &inner.link_config);
            inner.finish_connecting(result, &mac.to_string());
        });
        Ok(())
    }

    /// Like `connect`, for a serial device path bound outside the process.
    pub fn connect_serial(&self, path: &str) -> Result<(), CommandError> {
        let path = path.trim().to_string();
        let inner = self.begin_connecting()?;
        thread::spawn(move || {
            let result = Link::open_serial(&path, &inner.link_config);
            inner.finish_connecting(result, &path);
        });
        Ok(())
    }

    /// Adopt a link opened elsewhere, entering Connected immediately.
    pub fn attach(&self, link: Link) -> Result<(), CommandError> {
        let inner = self.begin_connecting()?;
        inner.finish_connecting(Ok(link), "adopted stream");
        Ok(())
    }

    fn begin_connecting(&self) -> Result<Arc<Inner>, CommandError> {
        if self.inner.session_busy() {
            return Err(CommandError::SessionActive);
        }
        let mut conn = self.inner.conn.lock().unwrap();
        match conn.state {
            LinkState::Connecting | LinkState::Connected => {
                return Err(CommandError::ConnectionBusy)
            }
            LinkState::Disconnected | LinkState::Failed => {}
        }
        conn.state = LinkState::Connecting;
        drop(conn);
        self.inner.emit(StatusEvent::Connecting);
        Ok(self.inner.clone())
    }

    /// Begin collecting under `label` for `duration_minutes`. Requires a
    /// connected link and a non-empty label; rejections change no state.
    pub fn start_session(&self, label: &str, duration_minutes: u32) -> Result<(), CommandError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(CommandError::EmptyLabel);
        }
        if !(MIN_SESSION_MINUTES..=MAX_SESSION_MINUTES).contains(&duration_minutes) {
            return Err(CommandError::DurationOutOfRange(duration_minutes));
        }

        let mut session = self.inner.session.lock().unwrap();
        if session.is_some() || self.inner.finalizing.load(Ordering::SeqCst) {
            return Err(CommandError::SessionActive);
        }

        // Take the read half only once every other precondition holds.
        let mut conn = self.inner.conn.lock().unwrap();
        if conn.state != LinkState::Connected {
            return Err(CommandError::NotConnected);
        }
        let Some(link) = conn.link.take() else {
            return Err(CommandError::NotConnected);
        };
        drop(conn);

        let total_seconds = duration_minutes * 60;
        let (stream, handle) = link.split();
        let buffer = Arc::new(SampleBuffer::new());
        let stop = Arc::new(AtomicBool::new(false));
        let elapsed = Arc::new(AtomicU32::new(0));

        let reader = {
            let inner = self.inner.clone();
            spawn_reader(stream, buffer.clone(), stop.clone(), move |reason| {
                inner.finalize(FinishReason::LinkLost(reason));
            })
        };

        let timer = {
            let inner = self.inner.clone();
            let elapsed = elapsed.clone();
            SessionTimer::start(total_seconds, self.inner.tick_interval, move |event| {
                match event {
                    TimerEvent::Tick {
                        remaining_seconds,
                        progress_percent,
                    } => {
                        elapsed.store(total_seconds - remaining_seconds, Ordering::SeqCst);
                        inner.emit(StatusEvent::Tick {
                            remaining_seconds,
                            progress_percent,
                        });
                    }
                    TimerEvent::Completed => inner.finalize(FinishReason::Completed),
                }
            })
        };

        info!("session '{label}' started for {duration_minutes}m");
        *session = Some(ActiveSession {
            label: label.to_string(),
            stop,
            link: handle,
            timer,
            buffer,
            elapsed,
            reader,
        });
        Ok(())
    }

    /// Stop the running session and finalize it. Idempotent while a session
    /// exists or is finalizing; an error when nothing is running.
    pub fn stop_session(&self) -> Result<(), CommandError> {
        if !self.inner.session_busy() {
            return Err(CommandError::NoSession);
        }
        info!("stop requested");
        self.inner.finalize(FinishReason::Stopped);
        Ok(())
    }

    pub fn link_state(&self) -> LinkState {
        self.inner.conn.lock().unwrap().state
    }

    pub fn session_phase(&self) -> SessionPhase {
        if self.inner.finalizing.load(Ordering::SeqCst) {
            return SessionPhase::Finalizing;
        }
        match &*self.inner.session.lock().unwrap() {
            Some(active) => SessionPhase::Collecting {
                label: active.label.clone(),
                elapsed_seconds: active.elapsed.load(Ordering::SeqCst),
            },
            None => SessionPhase::Idle,
        }
    }
}

impl Inner {
    fn emit(&self, event: StatusEvent) {
        if self.events.send(event).is_err() {
            debug!("status event dropped: receiver gone");
        }
    }

    fn session_busy(&self) -> bool {
        self.finalizing.load(Ordering::SeqCst) || self.session.lock().unwrap().is_some()
    }

    fn finish_connecting(&self, result: Result<Link, LinkError>, target: &str) {
        let mut conn = self.conn.lock().unwrap();
        match result {
            Ok(link) => {
                conn.link = Some(link);
                conn.state = LinkState::Connected;
                drop(conn);
                info!("connected to {target}");
                self.emit(StatusEvent::Connected);
            }
            Err(e) => {
                conn.link = None;
                conn.state = LinkState::Failed;
                drop(conn);
                warn!("connection to {target} failed: {e}");
                self.emit(StatusEvent::ConnectFailed(e.to_string()));
            }
        }
    }

    /// Drive the session into Finalizing exactly once, no matter how many
    /// triggers race; the actual teardown runs on its own thread so no
    /// caller blocks on the network round trip.
    fn finalize(self: &Arc<Self>, reason: FinishReason) {
        if self.finalizing.swap(true, Ordering::SeqCst) {
            debug!("finalize already in progress, extra trigger ignored");
            return;
        }
        let inner = self.clone();
        thread::spawn(move || inner.run_finalize(reason));
    }

    fn run_finalize(&self, reason: FinishReason) {
        let Some(active) = self.session.lock().unwrap().take() else {
            self.finalizing.store(false, Ordering::SeqCst);
            return;
        };

        if let FinishReason::LinkLost(why) = &reason {
            self.emit(StatusEvent::LinkLost(why.clone()));
        }

        // Teardown order matters: flag first, so the read error caused by
        // the close reads as the exit signal; then unblock the reader; then
        // wait for it. Joining before the drain is what guarantees the drain
        // observes every appended byte and that nothing is appended after.
        active.stop.store(true, Ordering::SeqCst);
        active.link.close();
        active.timer.cancel();
        if active.reader.join().is_err() {
            error!("read loop panicked; continuing with what was captured");
        }

        let raw = active.buffer.drain_and_reset();
        info!(
            "session '{}' finalizing ({reason:?}): {} bytes captured",
            active.label,
            raw.len()
        );

        let channels = parse_frames(&raw);
        let payload = SessionPayload::build(channels, &active.label);
        let outcome = match submit(&payload, &self.endpoint) {
            Ok(text) => text,
            Err(e) => format!("submission failed: {e}"),
        };

        // The connection is torn down with the session.
        {
            let mut conn = self.conn.lock().unwrap();
            conn.link = None;
            conn.state = LinkState::Disconnected;
        }

        // Teardown is complete: leave Finalizing before announcing it, so a
        // caller reacting to these events can already start over.
        self.finalizing.store(false, Ordering::SeqCst);
        self.emit(StatusEvent::SessionFinished);
        self.emit(StatusEvent::SubmissionResult(outcome));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(slot) = self.conn.get_mut() {
            if let Some(link) = slot.link.take() {
                link.handle().close();
            }
        }
    }
}
