//! Published state of the unit and its change notifications.
use crate::protocol::ReadRole;
use std::fmt;

/// Snapshot of everything the master publishes to observers.
///
/// Readings are stale-but-valid: a disconnect clears `connected` but keeps the
/// last known values, which observers must treat as possibly outdated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishedState {
    /// Incremented on every mutation of the snapshot.
    pub version: u64,
    /// Output voltage in V.
    pub voltage: f64,
    /// Output current in A.
    pub current: f64,
    /// Output power in kW.
    pub power: f64,
    /// Raw fan state register, 0 off and 1 on.
    pub fan_state: u16,
    /// Raw high temperature alarm register.
    pub high_temp_state: u16,
    pub has_fan_state_data: bool,
    pub has_high_temp_data: bool,
    pub connected: bool,
    pub last_error: Option<String>,
}

impl PublishedState {
    /// Returns the current reading of a role.
    pub fn reading(&self, role: ReadRole) -> Reading {
        match role {
            ReadRole::Voltage => Reading::Voltage(self.voltage),
            ReadRole::Current => Reading::Current(self.current),
            ReadRole::Power => Reading::Power(self.power),
            ReadRole::FanState => Reading::FanState(self.fan_state),
            ReadRole::HighTemp => Reading::HighTempState(self.high_temp_state),
        }
    }

    /// Whether a latch role has ever been read successfully.
    ///
    /// Always `false` for roles without a latch.
    pub fn has_data(&self, role: ReadRole) -> bool {
        match role {
            ReadRole::FanState => self.has_fan_state_data,
            ReadRole::HighTemp => self.has_high_temp_data,
            _ => false,
        }
    }
}

impl fmt::Display for PublishedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {:.1} V, {:.1} A, {:.2} kW",
            if self.connected {
                "connected"
            } else {
                "disconnected"
            },
            self.voltage,
            self.current,
            self.power
        )?;
        if self.has_fan_state_data {
            write!(f, ", fan {}", if self.fan_state != 0 { "on" } else { "off" })?;
        }
        if self.has_high_temp_data {
            write!(f, ", high temperature alarm {}", self.high_temp_state)?;
        }
        Ok(())
    }
}

/// A typed value of one monitored quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Voltage(f64),
    Current(f64),
    Power(f64),
    FanState(u16),
    HighTempState(u16),
}

impl Reading {
    pub fn role(&self) -> ReadRole {
        match self {
            Reading::Voltage(_) => ReadRole::Voltage,
            Reading::Current(_) => ReadRole::Current,
            Reading::Power(_) => ReadRole::Power,
            Reading::FanState(_) => ReadRole::FanState,
            Reading::HighTempState(_) => ReadRole::HighTemp,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Voltage(v) => write!(f, "{v:.1} V"),
            Reading::Current(a) => write!(f, "{a:.1} A"),
            Reading::Power(kw) => write!(f, "{kw:.2} kW"),
            Reading::FanState(raw) => write!(f, "fan state {raw}"),
            Reading::HighTempState(raw) => write!(f, "high temperature state {raw}"),
        }
    }
}

/// Change notification raised by the master.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A monitored quantity changed its value.
    ValueChanged(Reading),
    /// First successful read of a latch role.
    DataAvailable(ReadRole),
    ConnectedChanged(bool),
    /// Human readable description of a link error.
    ErrorOccurred(String),
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::ValueChanged(reading) => write!(f, "{reading}"),
            Notification::DataAvailable(role) => write!(f, "{role} data available"),
            Notification::ConnectedChanged(true) => f.write_str("connected"),
            Notification::ConnectedChanged(false) => f.write_str("disconnected"),
            Notification::ErrorOccurred(message) => write!(f, "error: {message}"),
        }
    }
}
