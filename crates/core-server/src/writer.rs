//! The per-connection writer: sole owner of the socket write side.
//!
//! Producers enqueue already-framed byte buffers; the writer thread drains
//! the FIFO to the socket. The queued-byte count is the throttle signal for
//! slow clients. No terminal lock is ever held while blocking here.

use std::collections::VecDeque;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use core_wire::frame::Framing;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Queue depth that marks a watcher throttled.
pub const THROTTLE_THRESHOLD: usize = 1024 * 1024;

pub struct Writer {
    queue: Mutex<VecDeque<Vec<u8>>>,
    cond: Condvar,
    queued_bytes: AtomicUsize,
    closed: AtomicBool,
    framing: Mutex<Option<Box<dyn Framing>>>,
}

impl Default for Writer {
    fn default() -> Self {
        Writer {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            queued_bytes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            framing: Mutex::new(None),
        }
    }
}

impl Writer {
    pub fn new() -> Self {
        Writer::default()
    }

    /// Install the negotiated transport framing.
    pub fn set_framing(&self, framing: Box<dyn Framing>) {
        *self.framing.lock() = Some(framing);
    }

    /// Enqueue raw bytes (handshake lines, already-wrapped data).
    pub fn enqueue_raw(&self, bytes: Vec<u8>) {
        if self.closed.load(Ordering::Acquire) || bytes.is_empty() {
            return;
        }
        self.queued_bytes.fetch_add(bytes.len(), Ordering::Relaxed);
        self.queue.lock().push_back(bytes);
        self.cond.notify_one();
    }

    /// Wrap one encoded frame per the installed framing and enqueue it.
    pub fn enqueue_frame(&self, frame: &[u8]) {
        let mut wrapped = Vec::with_capacity(frame.len() + 16);
        match &*self.framing.lock() {
            Some(framing) => framing.wrap(frame, &mut wrapped),
            None => wrapped.extend_from_slice(frame),
        }
        self.enqueue_raw(wrapped);
    }

    pub fn queued(&self) -> usize {
        self.queued_bytes.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cond.notify_one();
    }

    /// Drain loop; runs on the connection's writer thread until close or a
    /// socket error.
    pub fn run(&self, mut stream: UnixStream) {
        loop {
            let item = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(item) = queue.pop_front() {
                        break Some(item);
                    }
                    if self.closed.load(Ordering::Acquire) {
                        break None;
                    }
                    self.cond.wait_for(&mut queue, Duration::from_millis(500));
                }
            };

            let Some(item) = item else { break };
            self.queued_bytes.fetch_sub(item.len(), Ordering::Relaxed);

            if let Err(err) = stream.write_all(&item) {
                debug!(%err, "writer socket error");
                self.closed.store(true, Ordering::Release);
                break;
            }
        }

        let _ = stream.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn queued_bytes_track_enqueue_and_drain() {
        let w = Writer::new();
        w.enqueue_raw(vec![0u8; 100]);
        w.enqueue_raw(vec![0u8; 50]);
        assert_eq!(w.queued(), 150);
    }

    #[test]
    fn run_drains_to_socket_and_stops_on_close() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let w = std::sync::Arc::new(Writer::new());

        w.enqueue_raw(b"hello ".to_vec());
        w.enqueue_raw(b"world".to_vec());

        let thread = {
            let w = w.clone();
            std::thread::spawn(move || w.run(a))
        };

        let mut got = [0u8; 11];
        b.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"hello world");

        w.close();
        thread.join().unwrap();
        assert_eq!(w.queued(), 0);
    }

    #[test]
    fn frames_pass_through_installed_framing() {
        let w = Writer::new();
        w.set_framing(Box::new(core_wire::TermFraming::new()));
        w.enqueue_frame(&core_wire::encode_frame(6, b""));
        // Wrapped in an OSC 512 envelope
        assert!(w.queued() > 8);
    }
}
