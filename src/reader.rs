use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, trace, warn};

use crate::buffer::SampleBuffer;

/// Scratch size for one blocking read. Big enough to swallow a burst of rows
/// per syscall; correctness does not depend on it, accumulation is
/// append-based.
const SCRATCH_BYTES: usize = 1024;

/// Spawn the acquisition read loop on its own thread.
///
/// The loop performs bounded blocking reads and appends the decoded text to
/// `buffer` until `stop` is set or the link dies. Timeout-kind errors are
/// quiet poll points for the stop flag. If the loop exits for any reason
/// other than an explicit stop, `on_failure` fires with a reason so the
/// session can finalize early; an unexpected disconnect is never swallowed.
pub(crate) fn spawn_reader(
    mut stream: Box<dyn Read + Send>,
    buffer: Arc<SampleBuffer>,
    stop: Arc<AtomicBool>,
    on_failure: impl FnOnce(String) + Send + 'static,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut scratch = [0u8; SCRATCH_BYTES];
        let failure = loop {
            if stop.load(Ordering::SeqCst) {
                break None;
            }
            match stream.read(&mut scratch) {
                Ok(0) => break Some("link closed by remote".to_string()),
                Ok(n) => {
                    trace!("read {n} bytes from link");
                    buffer.append(&String::from_utf8_lossy(&scratch[..n]));
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) => {}
                Err(e) => break Some(format!("read failed: {e}")),
            }
        };
        match failure {
            Some(reason) if !stop.load(Ordering::SeqCst) => {
                warn!("link failure in read loop: {reason}");
                on_failure(reason);
            }
            Some(reason) => debug!("read loop unblocked by close: {reason}"),
            None => debug!("read loop stopped"),
        }
    })
}
