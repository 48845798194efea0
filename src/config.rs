//! Connection parameters of the serial Modbus link.
//!
//! A [`ConnectionConfig`] is an immutable snapshot handed to the transport on
//! connect. Data bits and stop bits are fixed to 8N1 framing; only the parity is
//! selectable.
use crate::error::ConnectError;
use std::{fmt, str::FromStr, time::Duration};

/// The number of stop bits used for serial communication.
pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
/// The number of data bits used for serial communication.
pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_RETRIES: usize = 3;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Serial parity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    /// Maps the numeric parity code used by the HMI (0 none, 1 odd, 2 even).
    ///
    /// Unknown codes fall back to no parity.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Parity::Odd,
            2 => Parity::Even,
            _ => Parity::None,
        }
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Parity::None => "none",
            Parity::Odd => "odd",
            Parity::Even => "even",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid parity '{0}', expected none, odd or even")]
pub struct ParseParityError(String);

impl FromStr for Parity {
    type Err = ParseParityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" | "0" => Ok(Parity::None),
            "odd" | "o" | "1" => Ok(Parity::Odd),
            "even" | "e" | "2" => Ok(Parity::Even),
            _ => Err(ParseParityError(s.to_string())),
        }
    }
}

/// Parameters of one serial Modbus session.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConnectionConfig {
    /// Serial port device name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    /// Time to wait for a reply before the request is retried or failed.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub timeout: Duration,
    /// Number of additional attempts after a timed out request.
    pub retries: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: default_device_name(),
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::None,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }
}

impl ConnectionConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32, parity: Parity) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            parity,
            ..Default::default()
        }
    }

    /// Checks the parameters that can be rejected before touching the port.
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.port.trim().is_empty() {
            return Err(ConnectError::EmptyPortName);
        }
        if self.baud_rate == 0 {
            return Err(ConnectError::InvalidBaudRate);
        }
        if self.timeout.is_zero() {
            return Err(ConnectError::InvalidTimeout);
        }
        Ok(())
    }

    /// Creates a `tokio_serial::SerialPortBuilder` with these settings.
    pub fn serial_port_builder(&self) -> tokio_serial::SerialPortBuilder {
        tokio_serial::new(&self.port, self.baud_rate)
            .parity(self.parity.into())
            .stop_bits(*STOP_BITS)
            .data_bits(*DATA_BITS)
            .flow_control(tokio_serial::FlowControl::None)
    }
}

pub fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[cfg(feature = "serde")]
pub use settings::Settings;

#[cfg(feature = "serde")]
mod settings {
    use super::{ConnectionConfig, DEFAULT_POLL_INTERVAL};
    use serde::{Deserialize, Serialize};
    use std::{fs::File, path::Path, time::Duration};

    #[derive(thiserror::Error, Debug)]
    pub enum SettingsError {
        #[error("Cannot open settings file: {0}")]
        Io(#[from] std::io::Error),
        #[error("Cannot parse settings file: {0}")]
        Yaml(#[from] serde_yaml::Error),
    }

    /// Settings file of the HMI.
    ///
    /// ```yaml
    /// modbus:
    ///   port: /dev/ttyUSB1
    ///   baud_rate: 19200
    ///   parity: even
    ///   timeout: 500ms
    ///   retries: 2
    /// poll_interval: 2s
    /// ```
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Settings {
        pub modbus: ConnectionConfig,
        #[serde(with = "humantime_serde")]
        pub poll_interval: Duration,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                modbus: ConnectionConfig::default(),
                poll_interval: DEFAULT_POLL_INTERVAL,
            }
        }
    }

    impl Settings {
        pub fn from_yaml(text: &str) -> Result<Self, SettingsError> {
            Ok(serde_yaml::from_str(text)?)
        }

        pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
            let path = path.as_ref();
            log::debug!("Loading settings from {path:?}");
            let file = File::open(path)?;
            Ok(serde_yaml::from_reader(file)?)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::config::Parity;

        #[test]
        fn parse_full_settings() {
            let settings = Settings::from_yaml(
                "modbus:\n  port: /dev/ttyS1\n  baud_rate: 19200\n  parity: even\n  timeout: 500ms\n  retries: 1\npoll_interval: 2s\n",
            )
            .unwrap();
            assert_eq!(settings.modbus.port, "/dev/ttyS1");
            assert_eq!(settings.modbus.baud_rate, 19200);
            assert_eq!(settings.modbus.parity, Parity::Even);
            assert_eq!(settings.modbus.timeout, Duration::from_millis(500));
            assert_eq!(settings.modbus.retries, 1);
            assert_eq!(settings.poll_interval, Duration::from_secs(2));
        }

        #[test]
        fn missing_fields_use_defaults() {
            let settings = Settings::from_yaml("modbus:\n  port: COM4\n").unwrap();
            assert_eq!(settings.modbus.port, "COM4");
            assert_eq!(settings.modbus.baud_rate, 9600);
            assert_eq!(settings.modbus.parity, Parity::None);
            assert_eq!(settings.modbus.retries, 3);
            assert_eq!(settings.poll_interval, Duration::from_secs(1));
        }

        #[test]
        fn invalid_yaml_is_an_error() {
            assert!(matches!(
                Settings::from_yaml("modbus: [1, 2"),
                Err(SettingsError::Yaml(..))
            ));
        }
    }
}
