//! # Serial Terminal Library
//!
//! This library contains the transfer engine of a serial-port terminal.
//! It owns the port, moves received bytes from a background reader thread
//! into a bounded queue, and schedules outgoing data: one-shot sends,
//! single-slot cycles, round-robin over several slots, and send scripts
//! loaded from file.
//!
//! Everything that talks to a port goes through the [`Transport`] trait so
//! the engine can be driven by [`SimulatedTransport`] in tests.

pub mod codec;
pub mod config;
pub mod counters;
pub mod error;
pub mod queue;
pub mod reader;
pub mod receive;
pub mod scheduler;
pub mod script;
pub mod session;
pub mod transport;

pub use codec::TextEncoding;
pub use config::{Parity, PortConfig, TerminalConfig};
pub use counters::TransferCounters;
pub use error::{Error, Result};
pub use reader::ReaderEvent;
pub use scheduler::{SendScheduler, SendSlot, SLOT_COUNT};
pub use script::{ScriptSource, SendScript};
pub use session::{Session, SessionEvent};
pub use transport::{PortInfo, SerialTransport, SimulatedTransport, Transport};
