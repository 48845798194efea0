//! Register map of the power-conversion unit.
//!
//! The unit exposes its telemetry and controls as Modbus holding registers spread
//! over two slaves: the metering board (slave 3) and the controller (slave 1).
//! Every point is a single unsigned 16-bit register; engineering values are
//! obtained by multiplying the raw register with a fixed scaling factor.

use std::fmt;

/// Slave address of the metering board.
pub const METER_SLAVE_ADDRESS: u8 = 3;
/// Slave address of the unit controller.
pub const CONTROLLER_SLAVE_ADDRESS: u8 = 1;

pub const VOLTAGE_REG_ADDR: u16 = 0;
pub const VOLTAGE_SCALE: f64 = 0.1;
pub const CURRENT_REG_ADDR: u16 = 1;
pub const CURRENT_SCALE: f64 = 0.1;
pub const POWER_REG_ADDR: u16 = 3;
pub const POWER_SCALE: f64 = 0.01;
pub const FAN_STATE_REG_ADDR: u16 = 2;
pub const HIGH_TEMP_REG_ADDR: u16 = 3;

pub const WRITE_VOLTAGE_REG_ADDR: u16 = 50;
pub const WRITE_CURRENT_REG_ADDR: u16 = 51;
pub const WRITE_FAN_REG_ADDR: u16 = 1;
pub const WRITE_UNLOAD_REG_ADDR: u16 = 35;
/// The unload command is a write of this fixed value.
pub const WRITE_UNLOAD_REG_DATA: u16 = 1;

/// Every monitored point is read as a single register.
pub const READ_REG_QUAN: u16 = 1;

/// Semantic role of a monitored (read) point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadRole {
    Voltage,
    Current,
    Power,
    FanState,
    HighTemp,
}

impl fmt::Display for ReadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadRole::Voltage => "voltage",
            ReadRole::Current => "current",
            ReadRole::Power => "power",
            ReadRole::FanState => "fan state",
            ReadRole::HighTemp => "high temperature",
        };
        f.write_str(name)
    }
}

/// Semantic role of a controlled (write) point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteRole {
    Voltage,
    Current,
    Fan,
    Unload,
}

impl fmt::Display for WriteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteRole::Voltage => "voltage setpoint",
            WriteRole::Current => "current setpoint",
            WriteRole::Fan => "fan control",
            WriteRole::Unload => "unload",
        };
        f.write_str(name)
    }
}

/// A polled register and how to interpret it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitoredPoint {
    pub slave: u8,
    pub register: u16,
    /// Multiplier from the raw register value to engineering units.
    pub scale: f64,
    pub role: ReadRole,
    /// Whether the first successful read raises a "data available" event.
    pub latch: bool,
}

impl MonitoredPoint {
    const fn new(slave: u8, register: u16, scale: f64, role: ReadRole, latch: bool) -> Self {
        Self {
            slave,
            register,
            scale,
            role,
            latch,
        }
    }

    /// Converts a raw register value into engineering units.
    pub fn decode(&self, raw: u16) -> f64 {
        raw as f64 * self.scale
    }
}

/// All monitored points, in the order a poll cycle issues them.
pub static REGISTER_MAP: [MonitoredPoint; 5] = [
    MonitoredPoint::new(
        METER_SLAVE_ADDRESS,
        VOLTAGE_REG_ADDR,
        VOLTAGE_SCALE,
        ReadRole::Voltage,
        false,
    ),
    MonitoredPoint::new(
        METER_SLAVE_ADDRESS,
        CURRENT_REG_ADDR,
        CURRENT_SCALE,
        ReadRole::Current,
        false,
    ),
    MonitoredPoint::new(
        METER_SLAVE_ADDRESS,
        POWER_REG_ADDR,
        POWER_SCALE,
        ReadRole::Power,
        false,
    ),
    MonitoredPoint::new(
        CONTROLLER_SLAVE_ADDRESS,
        FAN_STATE_REG_ADDR,
        1.0,
        ReadRole::FanState,
        true,
    ),
    MonitoredPoint::new(
        CONTROLLER_SLAVE_ADDRESS,
        HIGH_TEMP_REG_ADDR,
        1.0,
        ReadRole::HighTemp,
        true,
    ),
];

/// Finds the monitored point answering a reply from `slave` starting at `register`.
pub fn find_point(slave: u8, register: u16) -> Option<&'static MonitoredPoint> {
    REGISTER_MAP
        .iter()
        .find(|point| point.slave == slave && point.register == register)
}

/// Returns the monitored point for a read role.
pub fn point_for(role: ReadRole) -> &'static MonitoredPoint {
    match role {
        ReadRole::Voltage => &REGISTER_MAP[0],
        ReadRole::Current => &REGISTER_MAP[1],
        ReadRole::Power => &REGISTER_MAP[2],
        ReadRole::FanState => &REGISTER_MAP[3],
        ReadRole::HighTemp => &REGISTER_MAP[4],
    }
}

/// A controlled register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePoint {
    pub slave: u8,
    pub register: u16,
    pub role: WriteRole,
}

pub const VOLTAGE_WRITE: WritePoint = WritePoint {
    slave: CONTROLLER_SLAVE_ADDRESS,
    register: WRITE_VOLTAGE_REG_ADDR,
    role: WriteRole::Voltage,
};
pub const CURRENT_WRITE: WritePoint = WritePoint {
    slave: CONTROLLER_SLAVE_ADDRESS,
    register: WRITE_CURRENT_REG_ADDR,
    role: WriteRole::Current,
};
pub const FAN_WRITE: WritePoint = WritePoint {
    slave: CONTROLLER_SLAVE_ADDRESS,
    register: WRITE_FAN_REG_ADDR,
    role: WriteRole::Fan,
};
pub const UNLOAD_WRITE: WritePoint = WritePoint {
    slave: CONTROLLER_SLAVE_ADDRESS,
    register: WRITE_UNLOAD_REG_ADDR,
    role: WriteRole::Unload,
};

/// Returns the register a write role targets.
pub fn write_point_for(role: WriteRole) -> &'static WritePoint {
    match role {
        WriteRole::Voltage => &VOLTAGE_WRITE,
        WriteRole::Current => &CURRENT_WRITE,
        WriteRole::Fan => &FAN_WRITE,
        WriteRole::Unload => &UNLOAD_WRITE,
    }
}

/// Converts an engineering value into a raw register value.
///
/// The value is rounded to the nearest integer (half away from zero). Values
/// outside `0..=65535` are not rejected; the float to integer cast saturates.
pub fn encode_raw(value: f64) -> u16 {
    value.round() as u16
}

/// Raw register value of a fan control write.
pub fn encode_fan_state(on: bool) -> u16 {
    u16::from(on)
}
