//! Serial parameters and terminal settings.
//!
//! The engine never reads global state: a [`PortConfig`] is handed to the
//! transport at open time, and the front-end builds it from flags or a JSON
//! settings file.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, StopBits};

use crate::codec::TextEncoding;
use crate::error::PortError;

/// Baud rates offered to the user.
pub const BAUD_RATES: [u32; 15] = [
    2400, 4800, 9600, 14400, 19200, 38400, 57600, 76800, 115200, 128000, 230400, 256000, 460800,
    921600, 1000000,
];

pub const DATA_BITS: [u8; 4] = [8, 7, 6, 5];
pub const STOP_BITS: [u8; 2] = [1, 2];

pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const DEFAULT_TIMEOUT_MS: u64 = 10;

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    /// One-letter code used in `8N1` style summaries.
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            other => Err(format!("unknown parity '{}'", other)),
        }
    }
}

/// Everything needed to open one serial connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    /// Read timeout; also bounds how long a single drain of the port takes.
    pub timeout_ms: u64,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl PortConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn serialport_data_bits(&self) -> Result<DataBits, PortError> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(PortError::UnsupportedSetting {
                setting: "data bits",
                value: other,
            }),
        }
    }

    pub fn serialport_stop_bits(&self) -> Result<StopBits, PortError> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(PortError::UnsupportedSetting {
                setting: "stop bits",
                value: other,
            }),
        }
    }

    /// Rejects byte sizes and stop bits outside [`DATA_BITS`] and
    /// [`STOP_BITS`].
    pub fn validate(&self) -> Result<(), PortError> {
        self.serialport_data_bits()?;
        self.serialport_stop_bits()?;
        Ok(())
    }

    pub fn serialport_parity(&self) -> SpParity {
        match self.parity {
            Parity::None => SpParity::None,
            Parity::Odd => SpParity::Odd,
            Parity::Even => SpParity::Even,
        }
    }
}

impl fmt::Display for PortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {} baud ({}{}{})",
            self.port,
            self.baud_rate,
            self.data_bits,
            self.parity.letter(),
            self.stop_bits
        )
    }
}

/// Persistable terminal settings: the port plus view preferences.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub serial: PortConfig,
    pub encoding: TextEncoding,
    pub receive_hex: bool,
}

impl TerminalConfig {
    /// Reads settings from a JSON file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        serde_json::from_str(&text)
            .map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_115200_8n1() {
        let cfg = PortConfig::default();
        assert_eq!(cfg.baud_rate, 115200);
        assert_eq!(cfg.data_bits, 8);
        assert_eq!(cfg.stop_bits, 1);
        assert_eq!(cfg.parity, Parity::None);
        assert_eq!(cfg.timeout(), Duration::from_millis(10));
        assert!(BAUD_RATES.contains(&cfg.baud_rate));
    }

    #[test]
    fn converts_to_serialport_types() {
        let mut cfg = PortConfig::new("/dev/ttyS0", 9600);
        cfg.data_bits = 7;
        cfg.stop_bits = 2;
        cfg.parity = Parity::Even;
        assert!(matches!(cfg.serialport_data_bits(), Ok(DataBits::Seven)));
        assert!(matches!(cfg.serialport_stop_bits(), Ok(StopBits::Two)));
        assert!(matches!(cfg.serialport_parity(), SpParity::Even));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_unsupported_byte_size_and_stop_bits() {
        for bits in [0, 4, 9] {
            let mut cfg = PortConfig::new("/dev/ttyS0", 9600);
            cfg.data_bits = bits;
            assert_eq!(
                cfg.validate(),
                Err(PortError::UnsupportedSetting {
                    setting: "data bits",
                    value: bits
                })
            );
        }
        let mut cfg = PortConfig::new("/dev/ttyS0", 9600);
        cfg.stop_bits = 3;
        assert_eq!(
            cfg.serialport_stop_bits().err(),
            Some(PortError::UnsupportedSetting {
                setting: "stop bits",
                value: 3
            })
        );
        for bits in DATA_BITS {
            cfg.data_bits = bits;
            for stop in STOP_BITS {
                cfg.stop_bits = stop;
                assert!(cfg.validate().is_ok());
            }
        }
    }

    #[test]
    fn summary_line() {
        let mut cfg = PortConfig::new("COM3", 9600);
        cfg.parity = Parity::Odd;
        assert_eq!(cfg.to_string(), "COM3 at 9600 baud (8O1)");
    }

    #[test]
    fn parity_parses_names_and_letters() {
        assert_eq!("None".parse::<Parity>().unwrap(), Parity::None);
        assert_eq!("o".parse::<Parity>().unwrap(), Parity::Odd);
        assert_eq!("EVEN".parse::<Parity>().unwrap(), Parity::Even);
        assert!("mark".parse::<Parity>().is_err());
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"serial": {{"port": "/dev/ttyUSB1", "parity": "odd"}}, "encoding": "utf-8"}}"#
        )
        .unwrap();
        let cfg = TerminalConfig::load(file.path()).unwrap();
        assert_eq!(cfg.serial.port, "/dev/ttyUSB1");
        assert_eq!(cfg.serial.parity, Parity::Odd);
        assert_eq!(cfg.serial.baud_rate, 115200);
        assert_eq!(cfg.encoding, TextEncoding::Utf8);
        assert!(!cfg.receive_hex);
    }
}
