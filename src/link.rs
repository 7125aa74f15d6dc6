use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bluer::rfcomm::{SocketAddr, Stream};
use log::{debug, info};
use tokio::runtime::Runtime;

use crate::errors::{LinkError, Result};

/// Serial Port Profile service identifier: the well-known 128-bit UUID the
/// remote device advertises its byte stream under.
pub const SPP_SERVICE_UUID: bluer::Uuid =
    bluer::Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Conventional RFCOMM channel for devices exposing a single SPP service.
const SPP_CHANNEL: u8 = 1;

/// Bound on one blocking read/write, so the read loop wakes to poll its stop
/// flag even when the device goes quiet.
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Bound on the single connection attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Baud rate for serial devices bound outside the process.
const SERIAL_BAUD_RATE: u32 = 115_200;

/// Validated 6-octet device address, canonicalized to uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    fn to_bluer(self) -> bluer::Address {
        bluer::Address::new(self.0)
    }
}

impl FromStr for MacAddr {
    type Err = LinkError;

    /// Accepts `XX:XX:XX:XX:XX:XX` with exactly two hex digits per octet,
    /// any case.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || LinkError::InvalidAddress(s.to_string());
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddr(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Transport tuning.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub channel: u8,
    pub io_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            channel: SPP_CHANNEL,
            io_timeout: DEFAULT_IO_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Cloneable closer for an open link.
///
/// `close` may be called from any thread, including while the read loop is
/// blocked in `read`: shutting the socket down makes that read return, which
/// is the loop's unblock signal. Safe to call repeatedly.
#[derive(Clone)]
pub struct LinkHandle {
    socket: Option<Arc<OwnedFd>>,
    closed: Arc<AtomicBool>,
}

impl LinkHandle {
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(fd) = &self.socket {
            // The handle owns a dup of the stream fd, so the socket is still
            // alive here even after the read half has been dropped.
            unsafe { libc::shutdown(fd.as_raw_fd(), libc::SHUT_RDWR) };
            debug!("link shut down");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// An open byte-stream link to the sensing device.
pub struct Link {
    stream: Box<dyn Read + Send>,
    handle: LinkHandle,
}

impl Link {
    /// Open an RFCOMM stream to the Serial Port Profile service at `mac`.
    ///
    /// Exactly one attempt is made; retry policy, if any, belongs to the
    /// caller. The device must already be paired and trusted.
    pub fn open_rfcomm(mac: &MacAddr, config: &LinkConfig) -> Result<Self> {
        debug!(
            "connecting to {mac}, service {SPP_SERVICE_UUID}, channel {}",
            config.channel
        );
        let rt = Runtime::new().map_err(LinkError::Io)?;
        let target = SocketAddr::new(mac.to_bluer(), config.channel);
        let stream = rt
            .block_on(tokio::time::timeout(
                config.connect_timeout,
                Stream::connect(target),
            ))
            .map_err(|_| LinkError::Connect("connect timed out".into()))?
            .map_err(|e| LinkError::Connect(e.to_string()))?;

        // Dup the fd out of the async stream: the copy becomes a plain
        // blocking socket with bounded reads, the second dup lets the close
        // handle shut the socket down after the read half moved away.
        let file = blocking_file_from(stream.as_raw_fd(), config.io_timeout)?;
        let closer = dup_owned(file.as_raw_fd())?;
        drop(stream);

        info!("rfcomm link established to {mac}");
        Ok(Self {
            stream: Box::new(file),
            handle: LinkHandle {
                socket: Some(Arc::new(closer)),
                closed: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    /// Open a serial device that is already bound to the remote endpoint
    /// (e.g. `/dev/rfcomm0` after an external `rfcomm bind`).
    pub fn open_serial(path: &str, config: &LinkConfig) -> Result<Self> {
        let port = serialport::new(path, SERIAL_BAUD_RATE)
            .timeout(config.io_timeout)
            .open()?;
        info!("serial link open at {path}");
        Ok(Self::from_stream(Box::new(port)))
    }

    /// Adopt a stream opened elsewhere. The handle's close only marks the
    /// link closed — it cannot interrupt a blocked read — so such streams
    /// should carry their own read timeout.
    pub fn from_stream(stream: Box<dyn Read + Send>) -> Self {
        Self {
            stream,
            handle: LinkHandle {
                socket: None,
                closed: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Split into the read half (owned by the read loop) and the close
    /// handle (kept by the session for the finalize path).
    pub fn split(self) -> (Box<dyn Read + Send>, LinkHandle) {
        (self.stream, self.handle)
    }

    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }
}

fn dup_owned(fd: RawFd) -> Result<OwnedFd> {
    let dup = unsafe { libc::dup(fd) };
    if dup < 0 {
        return Err(LinkError::Io(io::Error::last_os_error()));
    }
    let owned = unsafe { OwnedFd::from_raw_fd(dup) };
    if unsafe { libc::fcntl(owned.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(LinkError::Io(io::Error::last_os_error()));
    }
    Ok(owned)
}

/// Duplicate `fd` into a blocking `File` with socket-level read/write
/// timeouts. The `OwnedFd` wrapper closes the dup on any error path.
fn blocking_file_from(fd: RawFd, timeout: Duration) -> Result<File> {
    let owned = dup_owned(fd)?;

    // Clear O_NONBLOCK: the async runtime's socket is nonblocking, the read
    // loop wants plain blocking reads.
    let flags = unsafe { libc::fcntl(owned.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(LinkError::Io(io::Error::last_os_error()));
    }
    if unsafe { libc::fcntl(owned.as_raw_fd(), libc::F_SETFL, flags & !libc::O_NONBLOCK) } < 0 {
        return Err(LinkError::Io(io::Error::last_os_error()));
    }

    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    for opt in [libc::SO_RCVTIMEO, libc::SO_SNDTIMEO] {
        let ret = unsafe {
            libc::setsockopt(
                owned.as_raw_fd(),
                libc::SOL_SOCKET,
                opt,
                &tv as *const _ as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(LinkError::Io(io::Error::last_os_error()));
        }
    }

    Ok(File::from(owned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercase_addresses_canonicalize_to_uppercase() {
        let mac: MacAddr = "98:d3:51:fe:6f:a3".parse().unwrap();
        assert_eq!(mac.to_string(), "98:D3:51:FE:6F:A3");
        assert_eq!(mac.octets()[0], 0x98);
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        for bad in [
            "",
            "98:D3:51:FE:6F",          // too short
            "98:D3:51:FE:6F:A3:00",    // too long
            "98-D3-51-FE-6F-A3",       // wrong separator
            "98:D3:51:FE:6F:G3",       // non-hex digit
            "98:D3:51:FE:6F:3",        // octet too narrow
            "98:D3:51:FE:6F:+3",       // sign accepted by from_str_radix
            "985:D3:51:FE:6F:A",       // octet too wide
        ] {
            assert!(
                bad.parse::<MacAddr>().is_err(),
                "expected rejection of {bad:?}"
            );
        }
    }

    #[test]
    fn parse_accepts_mixed_case() {
        assert!("aB:cD:eF:01:23:45".parse::<MacAddr>().is_ok());
    }

    #[test]
    fn close_is_idempotent_on_adopted_streams() {
        let link = Link::from_stream(Box::new(std::io::empty()));
        let handle = link.handle();
        assert!(!handle.is_closed());
        handle.close();
        handle.close();
        assert!(handle.is_closed());
    }
}
