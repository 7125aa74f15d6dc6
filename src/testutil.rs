//! Minimal one-thread HTTP endpoint for exercising submission in tests.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub(crate) struct TestEndpoint {
    /// `host:port` to hand to the submitter.
    pub addr: String,
    pub hits: Arc<AtomicUsize>,
    pub bodies: Arc<Mutex<Vec<String>>>,
}

/// Spawn a listener that answers up to `max_requests` POSTs with `200 OK`
/// and records each request body.
pub(crate) fn spawn_endpoint(max_requests: usize) -> TestEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test endpoint");
    let addr = listener.local_addr().expect("local addr").to_string();
    let hits = Arc::new(AtomicUsize::new(0));
    let bodies = Arc::new(Mutex::new(Vec::new()));

    let hit_counter = hits.clone();
    let body_log = bodies.clone();
    thread::spawn(move || {
        for _ in 0..max_requests {
            let Ok((mut sock, _)) = listener.accept() else {
                return;
            };
            if let Some(body) = read_request(&mut sock) {
                hit_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                body_log.lock().unwrap().push(body);
            }
            let _ = sock.write_all(
                b"HTTP/1.1 200 OK\r\ncontent-length: 8\r\nconnection: close\r\n\r\naccepted",
            );
        }
    });

    TestEndpoint { addr, hits, bodies }
}

fn read_request(sock: &mut TcpStream) -> Option<String> {
    sock.set_read_timeout(Some(Duration::from_secs(5))).ok()?;
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match sock.read(&mut chunk) {
            Ok(0) | Err(_) => return None,
            Ok(n) => data.extend_from_slice(&chunk[..n]),
        }
        if let Some(split) = headers_end(&data) {
            let wanted = content_length(&data[..split]);
            if data.len() >= split + wanted {
                return Some(String::from_utf8_lossy(&data[split..split + wanted]).into_owned());
            }
        }
    }
}

fn headers_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}
