//! Timed multichannel capture over Bluetooth SPP.
//!
//! The crate drives one serial-profile link to a sensing device, accumulates
//! the device's newline-delimited sample rows for a bounded session, converts
//! them into eight fixed channel series, and submits the result to a
//! collection endpoint as JSON.
//!
//! [`Collector`] owns the whole lifecycle — connection, read loop, countdown,
//! finalization — and reports progress through a channel of [`StatusEvent`]s.
//! The core never touches presentation state; a UI (or the bundled CLI)
//! issues commands and renders the events.

pub mod buffer;
pub mod errors;
pub mod link;
pub mod logging;
pub mod parser;
pub mod payload;
mod reader;
pub mod session;
pub mod submit;
pub mod timer;

#[cfg(test)]
pub(crate) mod testutil;

pub use buffer::SampleBuffer;
pub use errors::{CommandError, LinkError, SubmitError};
pub use link::{Link, LinkConfig, LinkHandle, MacAddr, SPP_SERVICE_UUID};
pub use parser::{parse_frames, CHANNEL_COUNT};
pub use payload::{ChannelSeries, SessionPayload, WAVE_TYPE};
pub use session::{
    Collector, LinkState, SessionPhase, StatusEvent, MAX_SESSION_MINUTES, MIN_SESSION_MINUTES,
};
pub use submit::submit;
pub use timer::{SessionTimer, TimerEvent, TimerHandle};
