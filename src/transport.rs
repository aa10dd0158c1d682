//! The duplex serial connection the engine reads from and writes to.
//!
//! [`Transport`] is the seam between the engine and the OS. The reader
//! thread calls `read_available` and `close`; the scheduler calls `write`.
//! Implementations must tolerate one read and one write in flight at the
//! same time; the engine never issues two concurrent writes.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serialport::SerialPort;

use crate::config::PortConfig;
use crate::error::PortError;

/// Upper bound on the bytes returned by one `read_available` call.
pub const MAX_READ_CHUNK: usize = 4096;

pub trait Transport: Send + Sync {
    /// Opens the connection. Opening an already open transport is an error.
    fn open(&self, config: &PortConfig) -> Result<(), PortError>;

    fn is_open(&self) -> bool;

    /// Writes `data`, returning how many bytes went out.
    fn write(&self, data: &[u8]) -> Result<usize, PortError>;

    /// Returns whatever arrived within the read timeout, possibly nothing.
    fn read_available(&self) -> Result<Vec<u8>, PortError>;

    /// Closes the connection. Closing twice is harmless.
    fn close(&self);
}

/// Information about an available serial port
#[derive(Clone, Debug, PartialEq)]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
}

/// Enumerates the serial ports present on this machine.
pub fn list_ports() -> Result<Vec<PortInfo>, PortError> {
    let ports = serialport::available_ports().map_err(|e| PortError::Enumerate(e.to_string()))?;
    Ok(ports
        .into_iter()
        .map(|p| PortInfo {
            port_name: p.port_name,
            port_type: match p.port_type {
                serialport::SerialPortType::UsbPort(_) => "usb",
                serialport::SerialPortType::PciPort => "pci",
                serialport::SerialPortType::BluetoothPort => "bluetooth",
                serialport::SerialPortType::Unknown => "unknown",
            }
            .to_string(),
        })
        .collect())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// serialport backend
// ============================================================================

/// Transport backed by the `serialport` crate.
///
/// The port handle is cloned at open time so reads and writes each own a
/// handle behind their own lock.
#[derive(Default)]
pub struct SerialTransport {
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    open: AtomicBool,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Whether `port` shows up in the system's port list.
fn is_listed(port: &str) -> bool {
    serialport::available_ports()
        .map(|ports| ports.iter().any(|p| p.port_name == port))
        .unwrap_or(false)
}

// An existing device reported as `NoDevice` is held by another program:
// Windows maps ERROR_ACCESS_DENIED and POSIX maps EBUSY to it.
fn open_error(port: &str, err: serialport::Error, listed: bool) -> PortError {
    match err.kind() {
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => PortError::PermissionDenied {
            port: port.to_string(),
        },
        serialport::ErrorKind::NoDevice if listed => PortError::PermissionDenied {
            port: port.to_string(),
        },
        _ => PortError::Open {
            port: port.to_string(),
            reason: err.to_string(),
        },
    }
}

impl Transport for SerialTransport {
    fn open(&self, config: &PortConfig) -> Result<(), PortError> {
        if self.is_open() {
            return Err(PortError::Open {
                port: config.port.clone(),
                reason: "already open".to_string(),
            });
        }

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(config.serialport_data_bits()?)
            .stop_bits(config.serialport_stop_bits()?)
            .parity(config.serialport_parity())
            .timeout(config.timeout())
            .open()
            .map_err(|e| open_error(&config.port, e, is_listed(&config.port)))?;
        let writer = port
            .try_clone()
            .map_err(|e| open_error(&config.port, e, false))?;

        *lock(&self.reader) = Some(port);
        *lock(&self.writer) = Some(writer);
        self.open.store(true, Ordering::SeqCst);
        log::info!("Opened {}", config);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn write(&self, data: &[u8]) -> Result<usize, PortError> {
        let mut guard = lock(&self.writer);
        let port = guard.as_mut().ok_or(PortError::NotOpen)?;
        port.write_all(data)
            .and_then(|_| port.flush())
            .map_err(|e| PortError::Write(e.to_string()))?;
        Ok(data.len())
    }

    fn read_available(&self) -> Result<Vec<u8>, PortError> {
        let mut guard = lock(&self.reader);
        let Some(port) = guard.as_mut() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        while out.len() < MAX_READ_CHUNK {
            match port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => {
                    if out.is_empty() {
                        return Err(PortError::Read(e.to_string()));
                    }
                    break;
                }
            }
        }
        Ok(out)
    }

    fn close(&self) {
        let had_port = lock(&self.reader).take().is_some();
        lock(&self.writer).take();
        self.open.store(false, Ordering::SeqCst);
        if had_port {
            log::info!("Serial port closed");
        }
    }
}

// ============================================================================
// Simulated transport
// ============================================================================

/// A fully in-memory transport for tests and offline use.
///
/// Incoming data is injected as chunks; every write is recorded as its own
/// chunk so tests can assert on message boundaries.
#[derive(Default)]
pub struct SimulatedTransport {
    open: AtomicBool,
    config: Mutex<Option<PortConfig>>,
    incoming: Mutex<VecDeque<Vec<u8>>>,
    written: Mutex<Vec<Vec<u8>>>,
    fail_writes: AtomicBool,
    open_error: Mutex<Option<PortError>>,
    closes: AtomicUsize,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes bytes available to the next `read_available`.
    pub fn inject(&self, chunk: &[u8]) {
        lock(&self.incoming).push_back(chunk.to_vec());
    }

    /// Each successful write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.written).clone()
    }

    /// All written bytes concatenated.
    pub fn written_bytes(&self) -> Vec<u8> {
        lock(&self.written).concat()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The next `open` fails with `err`.
    pub fn fail_next_open(&self, err: PortError) {
        *lock(&self.open_error) = Some(err);
    }

    /// Configuration of the last successful open.
    pub fn config(&self) -> Option<PortConfig> {
        lock(&self.config).clone()
    }

    /// Number of times `close` ran on an open transport.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for SimulatedTransport {
    fn open(&self, config: &PortConfig) -> Result<(), PortError> {
        if let Some(err) = lock(&self.open_error).take() {
            return Err(err);
        }
        config.validate()?;
        if self.is_open() {
            return Err(PortError::Open {
                port: config.port.clone(),
                reason: "already open".to_string(),
            });
        }
        *lock(&self.config) = Some(config.clone());
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn write(&self, data: &[u8]) -> Result<usize, PortError> {
        if !self.is_open() {
            return Err(PortError::NotOpen);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PortError::Write("simulated write failure".to_string()));
        }
        lock(&self.written).push(data.to_vec());
        Ok(data.len())
    }

    fn read_available(&self) -> Result<Vec<u8>, PortError> {
        if !self.is_open() {
            return Ok(Vec::new());
        }
        Ok(lock(&self.incoming).pop_front().unwrap_or_default())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_transport_requires_open() {
        let t = SimulatedTransport::new();
        assert_eq!(t.write(b"x"), Err(PortError::NotOpen));
        t.inject(b"ignored while closed");
        assert_eq!(t.read_available().unwrap(), Vec::<u8>::new());

        t.open(&PortConfig::new("sim", 9600)).unwrap();
        assert_eq!(t.config().unwrap().baud_rate, 9600);
        assert_eq!(t.write(b"abc").unwrap(), 3);
        assert_eq!(t.read_available().unwrap(), b"ignored while closed".to_vec());
        assert_eq!(t.read_available().unwrap(), Vec::<u8>::new());
        assert_eq!(t.writes(), vec![b"abc".to_vec()]);
    }

    #[test]
    fn simulated_close_is_idempotent() {
        let t = SimulatedTransport::new();
        t.open(&PortConfig::new("sim", 9600)).unwrap();
        t.close();
        t.close();
        assert!(!t.is_open());
        assert_eq!(t.close_count(), 1);
    }

    #[test]
    fn simulated_failures() {
        let t = SimulatedTransport::new();
        t.fail_next_open(PortError::PermissionDenied { port: "sim".into() });
        assert!(matches!(
            t.open(&PortConfig::new("sim", 9600)),
            Err(PortError::PermissionDenied { .. })
        ));
        t.open(&PortConfig::new("sim", 9600)).unwrap();
        t.set_fail_writes(true);
        assert!(matches!(t.write(b"x"), Err(PortError::Write(_))));
        assert!(t.writes().is_empty());
    }

    #[test]
    fn serial_transport_starts_closed() {
        let t = SerialTransport::new();
        assert!(!t.is_open());
        assert_eq!(t.write(b"x"), Err(PortError::NotOpen));
        assert_eq!(t.read_available().unwrap(), Vec::<u8>::new());
        t.close();
    }

    #[test]
    fn opening_a_missing_device_fails() {
        let t = SerialTransport::new();
        let result = t.open(&PortConfig::new("/dev/this-port-does-not-exist", 9600));
        assert!(result.is_err());
        assert!(!t.is_open());
    }

    #[test]
    fn busy_listed_device_maps_to_permission_denied() {
        let busy = || serialport::Error::new(serialport::ErrorKind::NoDevice, "Device or resource busy");
        assert_eq!(
            open_error("COM3", busy(), true),
            PortError::PermissionDenied { port: "COM3".into() }
        );
        assert!(matches!(open_error("COM9", busy(), false), PortError::Open { .. }));

        let denied = serialport::Error::new(
            serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied),
            "Permission denied",
        );
        assert_eq!(
            open_error("/dev/ttyUSB0", denied, false),
            PortError::PermissionDenied { port: "/dev/ttyUSB0".into() }
        );

        let invalid = serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad baud");
        assert_eq!(
            open_error("COM3", invalid, true),
            PortError::Open {
                port: "COM3".into(),
                reason: "bad baud".into()
            }
        );
    }

    #[test]
    fn unsupported_settings_are_refused_on_open() {
        let mut cfg = PortConfig::new("/dev/this-port-does-not-exist", 9600);
        cfg.data_bits = 9;
        let serial = SerialTransport::new();
        assert_eq!(
            serial.open(&cfg),
            Err(PortError::UnsupportedSetting {
                setting: "data bits",
                value: 9
            })
        );

        let sim = SimulatedTransport::new();
        cfg.data_bits = 8;
        cfg.stop_bits = 3;
        assert!(matches!(sim.open(&cfg), Err(PortError::UnsupportedSetting { .. })));
        assert!(!sim.is_open());
    }
}
