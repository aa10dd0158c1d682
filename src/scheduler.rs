//! Outbound side of the terminal: the only code that writes to the
//! transport.
//!
//! Four ways to send exist: a one-shot write of the single slot or one of
//! the six multi slots, a periodic resend of the single slot, a round-robin
//! cycle over the selected multi slots, and playback of a [`SendScript`].
//! The three periodic modes share one timer and at most one of them is
//! active.
//!
//! Time is passed in explicitly. A driver calls [`SendScheduler::poll`]
//! from one thread; each call fires at most one tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::codec::{self, TextEncoding, Unencodable};
use crate::counters::TransferCounters;
use crate::error::{Error, PortError, Result, ValidationError};
use crate::script::SendScript;
use crate::transport::Transport;

/// Number of addressable multi slots, labelled 1..=6.
pub const SLOT_COUNT: usize = 6;

const CRLF: [u8; 2] = [0x0D, 0x0A];

/// One editable payload source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SendSlot {
    pub text: String,
    pub hex_mode: bool,
    /// Append CR LF to every send.
    pub newline: bool,
    /// Takes part in the multi-slot cycle.
    pub selected: bool,
    /// Already sent in the current round.
    pub sent: bool,
}

impl SendSlot {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn has_content(&self) -> bool {
        !self.text.is_empty()
    }

    /// Bytes this slot would put on the wire, or `None` when there is
    /// nothing to send (no text and no newline).
    pub fn payload(&self, encoding: TextEncoding) -> std::result::Result<Option<Vec<u8>>, ValidationError> {
        if self.text.is_empty() && !self.newline {
            return Ok(None);
        }
        let bytes = if self.hex_mode {
            let mut bytes = codec::from_hex_display(&self.text)?;
            if self.newline {
                bytes.extend_from_slice(&CRLF);
            }
            bytes
        } else if self.newline {
            codec::encode_text(&format!("{}\r\n", self.text), encoding)
        } else {
            codec::encode_text(&self.text, encoding)
        };
        Ok(Some(bytes))
    }

    /// Switches the slot between text and hex display, converting its
    /// content. Leaving hex mode fails, and changes nothing, when the text
    /// is not valid hex.
    pub fn set_hex_mode(&mut self, hex_mode: bool, encoding: TextEncoding) -> std::result::Result<(), ValidationError> {
        if hex_mode == self.hex_mode {
            return Ok(());
        }
        if hex_mode {
            self.text = codec::to_hex_display(&codec::encode_text(&self.text, encoding));
        } else {
            let bytes = codec::from_hex_display(&self.text)?;
            self.text = codec::decode_text(&bytes, encoding);
        }
        self.hex_mode = hex_mode;
        Ok(())
    }

    fn normalize_hex_text(&mut self) {
        if !self.hex_mode {
            return;
        }
        if let Ok(normalized) = codec::normalize_hex(&self.text) {
            if normalized != self.text {
                self.text = normalized;
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Timer {
    interval: Duration,
    next: Instant,
}

impl Timer {
    fn start(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next: now + interval,
        }
    }

    /// True when a tick is due. Late polls fire once, not once per missed
    /// tick.
    fn fire(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next += self.interval;
        if self.next <= now {
            self.next = now + self.interval;
        }
        true
    }
}

enum Mode {
    Idle,
    SingleCycle(Timer),
    MultiCycle(Timer),
    Script { timer: Timer, script: SendScript },
}

impl Mode {
    fn name(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::SingleCycle(_) => "single cycle",
            Mode::MultiCycle(_) => "multi cycle",
            Mode::Script { .. } => "script playback",
        }
    }

    fn timer(&self) -> Option<&Timer> {
        match self {
            Mode::Idle => None,
            Mode::SingleCycle(timer) | Mode::MultiCycle(timer) => Some(timer),
            Mode::Script { timer, .. } => Some(timer),
        }
    }

    fn timer_mut(&mut self) -> Option<&mut Timer> {
        match self {
            Mode::Idle => None,
            Mode::SingleCycle(timer) | Mode::MultiCycle(timer) => Some(timer),
            Mode::Script { timer, .. } => Some(timer),
        }
    }
}

/// Transport plus counters; every write goes through here.
struct Outbound {
    transport: Arc<dyn Transport>,
    counters: Arc<TransferCounters>,
}

impl Outbound {
    fn write(&self, bytes: &[u8]) -> Result<usize> {
        let n = self.transport.write(bytes)?;
        self.counters.add_sent(n);
        Ok(n)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.transport.is_open() {
            Ok(())
        } else {
            Err(PortError::NotOpen.into())
        }
    }
}

pub struct SendScheduler {
    out: Outbound,
    encoding: TextEncoding,
    single: SendSlot,
    slots: [SendSlot; SLOT_COUNT],
    /// Slot indices taking part in the current multi-cycle round, fixed when
    /// the round starts. Empty means a new round starts on the next tick.
    round: Vec<usize>,
    mode: Mode,
}

fn validate_interval(interval_ms: Option<u64>) -> std::result::Result<Duration, ValidationError> {
    match interval_ms {
        None => Err(ValidationError::MissingCycleInterval),
        Some(0) => Err(ValidationError::ZeroCycleInterval),
        Some(ms) => Ok(Duration::from_millis(ms)),
    }
}

impl SendScheduler {
    pub fn new(transport: Arc<dyn Transport>, counters: Arc<TransferCounters>) -> Self {
        Self {
            out: Outbound { transport, counters },
            encoding: TextEncoding::default(),
            single: SendSlot::default(),
            slots: Default::default(),
            round: Vec::new(),
            mode: Mode::Idle,
        }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: TextEncoding) {
        self.encoding = encoding;
    }

    pub fn counters(&self) -> &TransferCounters {
        &self.out.counters
    }

    pub fn single(&self) -> &SendSlot {
        &self.single
    }

    pub fn single_mut(&mut self) -> &mut SendSlot {
        &mut self.single
    }

    fn slot_index(n: usize) -> Result<usize> {
        if (1..=SLOT_COUNT).contains(&n) {
            Ok(n - 1)
        } else {
            Err(ValidationError::NoSuchSlot(n).into())
        }
    }

    /// Multi slot `n`, counted from 1.
    pub fn slot(&self, n: usize) -> Result<&SendSlot> {
        Ok(&self.slots[Self::slot_index(n)?])
    }

    pub fn slot_mut(&mut self, n: usize) -> Result<&mut SendSlot> {
        Ok(&mut self.slots[Self::slot_index(n)?])
    }

    pub fn is_single_cycle_active(&self) -> bool {
        matches!(self.mode, Mode::SingleCycle(_))
    }

    pub fn is_multi_cycle_active(&self) -> bool {
        matches!(self.mode, Mode::MultiCycle(_))
    }

    pub fn is_script_active(&self) -> bool {
        matches!(self.mode, Mode::Script { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.mode, Mode::Idle)
    }

    /// When the active timer fires next, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.mode.timer().map(|timer| timer.next)
    }

    // ------------------------------------------------------------------
    // One-shot sends
    // ------------------------------------------------------------------

    /// Writes the single slot once. Returns the number of bytes written,
    /// 0 when the slot is empty.
    pub fn send_single(&mut self) -> Result<usize> {
        self.out.ensure_open()?;
        match self.single.payload(self.encoding) {
            Ok(None) => Ok(0),
            Ok(Some(bytes)) => {
                self.single.normalize_hex_text();
                self.out.write(&bytes)
            }
            Err(e) => {
                if self.is_single_cycle_active() {
                    self.stop_all();
                }
                log::warn!("Single send: {}", e);
                Err(e.into())
            }
        }
    }

    /// Writes multi slot `n` (1..=6) once.
    pub fn send_slot(&mut self, n: usize) -> Result<usize> {
        let index = Self::slot_index(n)?;
        self.send_slot_index(index)
    }

    fn send_slot_index(&mut self, index: usize) -> Result<usize> {
        self.out.ensure_open()?;
        let slot = &mut self.slots[index];
        match slot.payload(self.encoding) {
            Ok(None) => Ok(0),
            Ok(Some(bytes)) => {
                slot.normalize_hex_text();
                self.out.write(&bytes)
            }
            Err(e) => {
                if self.is_multi_cycle_active() {
                    self.stop_all();
                }
                log::warn!("Not correct hex format in slot {}", index + 1);
                Err(e.into())
            }
        }
    }

    /// Writes the contents of a plain text send file in one go.
    pub fn send_raw_text(&mut self, text: &str) -> Result<usize> {
        self.out.ensure_open()?;
        let bytes = codec::encode_text_with(text, self.encoding, Unencodable::Ignore);
        self.out.write(&bytes)
    }

    // ------------------------------------------------------------------
    // Periodic modes
    // ------------------------------------------------------------------

    /// Stops everything when a different periodic mode is already running.
    fn reject_conflict(&mut self, wanted: &'static str) -> Result<()> {
        if self.is_idle() || self.mode.name() == wanted {
            return Ok(());
        }
        log::error!(
            "Both {} and {} requested, deactivating them all",
            self.mode.name(),
            wanted
        );
        self.stop_all();
        Err(ValidationError::ConflictingCycleModes.into())
    }

    /// Starts resending the single slot every `interval_ms`.
    pub fn activate_single_cycle(&mut self, interval_ms: Option<u64>, now: Instant) -> Result<()> {
        self.reject_conflict("single cycle")?;
        self.out.ensure_open()?;
        let interval = validate_interval(interval_ms)?;
        if !self.single.has_content() {
            return Err(ValidationError::EmptyPayload.into());
        }
        self.mode = Mode::SingleCycle(Timer::start(interval, now));
        log::info!("Single cycle send every {} ms", interval.as_millis());
        Ok(())
    }

    /// Starts the round-robin cycle over the selected multi slots.
    pub fn activate_multi_cycle(&mut self, interval_ms: Option<u64>, now: Instant) -> Result<()> {
        self.reject_conflict("multi cycle")?;
        self.out.ensure_open()?;
        let interval = validate_interval(interval_ms)?;
        self.reset_round();
        self.mode = Mode::MultiCycle(Timer::start(interval, now));
        log::info!("Multi cycle send every {} ms", interval.as_millis());
        Ok(())
    }

    /// Stops the single or multi cycle; script playback is left alone.
    pub fn deactivate_cycle(&mut self) {
        if self.is_single_cycle_active() || self.is_multi_cycle_active() {
            self.stop_all();
        }
    }

    pub fn stop_script(&mut self) {
        if self.is_script_active() {
            self.stop_all();
        }
    }

    /// Halts whatever periodic mode is running. An in-flight write is not
    /// undone.
    pub fn stop_all(&mut self) {
        if !self.is_idle() {
            log::info!("Stopped {}", self.mode.name());
        }
        self.mode = Mode::Idle;
        self.reset_round();
    }

    fn reset_round(&mut self) {
        self.round.clear();
        for slot in &mut self.slots {
            slot.sent = false;
        }
    }

    /// Plays a loaded script. With a zero interval every selected item is
    /// written now, in order; otherwise one item goes out per tick and the
    /// timer stops after the last one. Returns the bytes written now.
    pub fn play_script(&mut self, mut script: SendScript, now: Instant) -> Result<usize> {
        self.out.ensure_open()?;
        self.stop_script();

        if script.is_burst() {
            let mut total = 0;
            for item in script.items.iter().filter(|item| item.selected) {
                total += self.out.write(&item.payload.to_bytes(self.encoding))?;
            }
            return Ok(total);
        }

        self.reject_conflict("script playback")?;
        if script.selected_count() == 0 {
            log::info!("Send script has no selected items");
            return Ok(0);
        }
        script.reset_sent();
        let timer = Timer::start(script.interval(), now);
        log::info!(
            "Playing {} script items every {} ms",
            script.selected_count(),
            script.cycle_ms
        );
        self.mode = Mode::Script { timer, script };
        Ok(0)
    }

    /// Fires the active timer if it is due. Returns the bytes written by
    /// this tick. A tick whose write fails stops its mode.
    pub fn poll(&mut self, now: Instant) -> Result<usize> {
        let due = self.mode.timer_mut().map_or(false, |timer| timer.fire(now));
        if !due {
            return Ok(0);
        }
        let result = match self.mode {
            Mode::Idle => Ok(0),
            Mode::SingleCycle(_) => self.send_single(),
            Mode::MultiCycle(_) => self.multi_cycle_tick(),
            Mode::Script { .. } => self.script_tick(),
        };
        if let Err(Error::Port(ref e)) = result {
            log::error!("{} stopped: {}", self.mode.name(), e);
            self.stop_all();
        }
        result
    }

    fn multi_cycle_tick(&mut self) -> Result<usize> {
        if self.round.is_empty() {
            self.reset_round();
            self.round = (0..SLOT_COUNT)
                .filter(|&i| self.slots[i].selected && self.slots[i].has_content())
                .collect();
        }

        let mut written = 0;
        if let Some(index) = self.round.iter().copied().find(|&i| !self.slots[i].sent) {
            written = self.send_slot_index(index)?;
            self.slots[index].sent = true;
        }

        if self.round.iter().all(|&i| self.slots[i].sent) {
            self.reset_round();
        }
        Ok(written)
    }

    fn script_tick(&mut self) -> Result<usize> {
        let Mode::Script { script, .. } = &mut self.mode else {
            return Ok(0);
        };
        let mut written = 0;
        if let Some(index) = script.next_unsent() {
            let item = &mut script.items[index];
            written = self.out.write(&item.payload.to_bytes(self.encoding))?;
            item.sent = true;
        }
        if script.is_finished() {
            log::info!("Send script finished");
            self.mode = Mode::Idle;
        }
        Ok(written)
    }
}
