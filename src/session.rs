//! One terminal session: a transport, its reader thread, the send
//! scheduler and the receive view wired together.
//!
//! A session is driven from a single foreground thread. That thread calls
//! [`Session::pump`] to service reader notifications and
//! [`Session::poll`] to fire send timers; every other method is a user
//! action.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::codec::TextEncoding;
use crate::config::{PortConfig, TerminalConfig};
use crate::counters::TransferCounters;
use crate::error::{PortError, Result};
use crate::queue::ReceiveQueue;
use crate::reader::{ReaderEvent, ReaderHandle};
use crate::scheduler::SendScheduler;
use crate::script::{self, ScriptSource};
use crate::transport::{self, PortInfo, Transport};
use crate::receive::ReceiveView;

/// How long a reopen or [`Session::shutdown`] waits for the reader to carry
/// out a pending close.
const CLOSE_WAIT: Duration = Duration::from_millis(200);

/// Outcome of servicing one reader notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The queue was drained; this many bytes were added to the view.
    Received(usize),
    PortClosed,
}

pub struct Session {
    transport: Arc<dyn Transport>,
    queue: Arc<ReceiveQueue>,
    counters: Arc<TransferCounters>,
    reader: ReaderHandle,
    scheduler: SendScheduler,
    view: Mutex<ReceiveView>,
    /// A close was requested and the reader has not reported it yet.
    closing: bool,
}

impl Session {
    /// Creates the session and starts its reader thread. The port stays
    /// closed until [`Session::open_port`].
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let queue = Arc::new(ReceiveQueue::default());
        let counters = Arc::new(TransferCounters::new());
        let reader = ReaderHandle::spawn(transport.clone(), queue.clone());
        let scheduler = SendScheduler::new(transport.clone(), counters.clone());
        let view = Mutex::new(ReceiveView::new(scheduler.encoding(), false));
        Self {
            transport,
            queue,
            counters,
            reader,
            scheduler,
            view,
            closing: false,
        }
    }

    /// Applies encoding and view preferences from a settings file.
    pub fn apply_settings(&mut self, config: &TerminalConfig) {
        self.set_encoding(config.encoding);
        self.set_receive_hex(config.receive_hex);
    }

    fn view(&self) -> MutexGuard<'_, ReceiveView> {
        self.view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Port
    // ------------------------------------------------------------------

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Opens the port. A close still pending in the reader is waited for
    /// first, and its `PortClosed` is consumed here; if it does not happen
    /// in time the open is refused with [`PortError::Busy`].
    pub fn open_port(&mut self, config: &PortConfig) -> Result<()> {
        if config.port.trim().is_empty() {
            return Err(PortError::NoPortSelected.into());
        }
        if self.closing && !self.await_close() {
            return Err(PortError::Busy.into());
        }
        if self.is_open() {
            return Ok(());
        }
        if let Err(e) = self.transport.open(config) {
            log::error!("Error of opening port, err: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Stops every periodic send and asks the reader to close the port.
    /// Completion is reported as [`SessionEvent::PortClosed`].
    pub fn close_port(&mut self) {
        self.scheduler.stop_all();
        if self.is_open() && !self.reader.close_requested() {
            self.reader.request_close();
            self.closing = true;
        }
    }

    // Services reader events until the pending close is reported. Returns
    // false on timeout or when the reader is gone.
    fn await_close(&mut self) -> bool {
        let deadline = Instant::now() + CLOSE_WAIT;
        while self.closing && self.reader.is_running() && Instant::now() < deadline {
            self.pump(Duration::from_millis(10));
        }
        !self.closing
    }

    /// Lists serial ports; refused while a port is open.
    pub fn list_ports(&self) -> Result<Vec<PortInfo>> {
        if self.is_open() {
            return Err(PortError::Busy.into());
        }
        Ok(transport::list_ports()?)
    }

    // ------------------------------------------------------------------
    // Driving
    // ------------------------------------------------------------------

    /// Waits up to `timeout` for a reader notification and handles it.
    pub fn pump(&mut self, timeout: Duration) -> Option<SessionEvent> {
        let event = self.reader.next_event(timeout)?;
        Some(self.handle_event(event))
    }

    pub fn handle_event(&mut self, event: ReaderEvent) -> SessionEvent {
        match event {
            ReaderEvent::DataAvailable => SessionEvent::Received(self.drain_received()),
            ReaderEvent::PortClosed => {
                self.closing = false;
                log::info!("Port closed");
                SessionEvent::PortClosed
            }
        }
    }

    /// Moves every queued chunk into the view. One notification may stand
    /// for several chunks.
    fn drain_received(&self) -> usize {
        let mut view = self.view();
        let mut total = 0;
        while let Some(chunk) = self.queue.pop() {
            view.append(&chunk);
            self.counters.add_received(chunk.len());
            total += chunk.len();
        }
        total
    }

    /// Fires a due send timer.
    pub fn poll(&mut self, now: Instant) -> Result<usize> {
        self.scheduler.poll(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    pub fn scheduler(&self) -> &SendScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut SendScheduler {
        &mut self.scheduler
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    /// Loads a send file and plays it: plain files go out in one write,
    /// scripts according to their interval.
    pub fn send_file(&mut self, path: &Path, now: Instant) -> Result<usize> {
        if !self.is_open() {
            return Err(PortError::NotOpen.into());
        }
        log::info!("send file: {}", path.display());
        match script::load(path)? {
            ScriptSource::Plain(text) => self.scheduler.send_raw_text(&text),
            ScriptSource::Script(script) => self.scheduler.play_script(script, now),
        }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.scheduler.encoding()
    }

    pub fn set_encoding(&mut self, encoding: TextEncoding) {
        self.scheduler.set_encoding(encoding);
        self.view().set_encoding(encoding);
    }

    pub fn set_receive_hex(&self, hex_mode: bool) {
        self.view().set_hex_mode(hex_mode);
    }

    pub fn received_text(&self) -> String {
        self.view().text().to_string()
    }

    pub fn save_received(&self, path: &Path) -> Result<()> {
        Ok(self.view().save(path)?)
    }

    /// Empties the receive view and zeroes the received counter.
    pub fn clear_received(&self) {
        self.view().clear();
        self.counters.clear_received();
    }

    /// Empties the single send slot and zeroes the sent counter.
    pub fn clear_send(&mut self) {
        self.scheduler.single_mut().text.clear();
        self.counters.clear_sent();
    }

    pub fn counters(&self) -> &TransferCounters {
        &self.counters
    }

    pub fn status_line(&self) -> String {
        self.counters.to_string()
    }

    /// Closes the port through the reader, then stops the reader. Safe to
    /// call more than once.
    pub fn shutdown(&mut self) {
        self.scheduler.stop_all();
        if self.reader.is_running() && (self.closing || self.is_open()) {
            self.close_port();
            self.await_close();
        }
        self.reader.stop();
        // The reader is gone, so nothing else can be touching the handle.
        if self.is_open() {
            self.transport.close();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
