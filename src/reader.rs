//! Background thread that drains the transport into the receive queue.
//!
//! Closing the port is never done from the caller's thread: the caller sets
//! a flag with [`ReaderHandle::request_close`] and the reader closes the
//! transport itself between two reads, then reports
//! [`ReaderEvent::PortClosed`]. This keeps a close from racing an in-flight
//! read on the same handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::queue::ReceiveQueue;
use crate::transport::Transport;

/// Pause between two iterations of the read loop.
pub const READ_LOOP_INTERVAL: Duration = Duration::from_millis(10);

/// Notifications sent from the reader thread to the consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderEvent {
    /// The queue holds at least one chunk. Sent once per loop iteration, not
    /// per chunk, so the consumer must drain until the queue is empty.
    DataAvailable,
    /// A requested close has been carried out.
    PortClosed,
}

pub struct ReaderHandle {
    close_requested: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    events: Receiver<ReaderEvent>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Starts the read loop on its own thread.
    pub fn spawn(transport: Arc<dyn Transport>, queue: Arc<ReceiveQueue>) -> Self {
        let close_requested = Arc::new(AtomicBool::new(false));
        let stop_requested = Arc::new(AtomicBool::new(false));
        let (tx, events) = mpsc::channel();

        let thread = {
            let close_requested = close_requested.clone();
            let stop_requested = stop_requested.clone();
            thread::spawn(move || run(transport, queue, close_requested, stop_requested, tx))
        };

        Self {
            close_requested,
            stop_requested,
            events,
            thread: Some(thread),
        }
    }

    /// Asks the reader to close the transport on its next iteration.
    pub fn request_close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for the next event.
    pub fn next_event(&self, timeout: Duration) -> Option<ReaderEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Interrupts the loop and waits for the thread to finish. The transport
    /// is left open or closed as it was.
    pub fn stop(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Serial reader thread panicked");
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    transport: Arc<dyn Transport>,
    queue: Arc<ReceiveQueue>,
    close_requested: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    events: Sender<ReaderEvent>,
) {
    log::debug!("Serial reader started");
    while !stop_requested.load(Ordering::SeqCst) {
        if transport.is_open() {
            match transport.read_available() {
                Ok(chunk) if !chunk.is_empty() => {
                    let len = chunk.len();
                    if queue.push(chunk).is_err() {
                        log::warn!("Receive queue full, dropped {} bytes", len);
                    }
                }
                Ok(_) => {}
                Err(e) => log::warn!("{}", e),
            }
        }

        // The consumer may have gone away; the loop keeps running regardless.
        if !queue.is_empty() {
            let _ = events.send(ReaderEvent::DataAvailable);
        }

        if close_requested.swap(false, Ordering::SeqCst) {
            transport.close();
            let _ = events.send(ReaderEvent::PortClosed);
        }

        thread::sleep(READ_LOOP_INTERVAL);
    }
    log::debug!("Serial reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;
    use crate::transport::SimulatedTransport;

    const WAIT: Duration = Duration::from_secs(2);

    fn open_transport() -> Arc<SimulatedTransport> {
        let t = Arc::new(SimulatedTransport::new());
        t.open(&PortConfig::new("sim", 115200)).unwrap();
        t
    }

    fn wait_for(reader: &ReaderHandle, wanted: ReaderEvent) -> bool {
        let deadline = std::time::Instant::now() + WAIT;
        while std::time::Instant::now() < deadline {
            if reader.next_event(Duration::from_millis(50)) == Some(wanted) {
                return true;
            }
        }
        false
    }

    #[test]
    fn pushes_reads_and_signals_data() {
        let transport = open_transport();
        let queue = Arc::new(ReceiveQueue::default());
        let reader = ReaderHandle::spawn(transport.clone(), queue.clone());

        transport.inject(b"hello");
        assert!(wait_for(&reader, ReaderEvent::DataAvailable));
        assert_eq!(queue.pop(), Some(b"hello".to_vec()));
        assert!(reader.is_running());
    }

    #[test]
    fn deferred_close_runs_inside_the_loop() {
        let transport = open_transport();
        let queue = Arc::new(ReceiveQueue::default());
        let reader = ReaderHandle::spawn(transport.clone(), queue);

        reader.request_close();
        assert!(wait_for(&reader, ReaderEvent::PortClosed));
        assert!(!transport.is_open());
        assert!(!reader.close_requested());
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn full_queue_drops_chunks_and_keeps_running() {
        let transport = open_transport();
        let queue = Arc::new(ReceiveQueue::new(1));
        let reader = ReaderHandle::spawn(transport.clone(), queue.clone());

        transport.inject(b"first");
        transport.inject(b"second");
        assert!(wait_for(&reader, ReaderEvent::DataAvailable));
        // Give the loop time to attempt the second push.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some(b"first".to_vec()));

        reader.request_close();
        assert!(wait_for(&reader, ReaderEvent::PortClosed));
    }

    #[test]
    fn stop_leaves_transport_state_alone() {
        let transport = open_transport();
        let queue = Arc::new(ReceiveQueue::default());
        let mut reader = ReaderHandle::spawn(transport.clone(), queue);

        reader.stop();
        assert!(!reader.is_running());
        assert!(transport.is_open());
    }
}
