use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use pcu_hmi_lib::config::Parity;
use std::{path::PathBuf, time::Duration};

fn parse_slave(s: &str) -> Result<u8, String> {
    clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid slave address format: {e}"))
}

fn parse_register(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid register address format: {e}"))
}

fn parse_parity(s: &str) -> Result<Parity, String> {
    s.parse::<Parity>().map_err(|e| e.to_string())
}

fn parse_engineering_value(s: &str) -> Result<f64, String> {
    let value = s
        .parse::<f64>()
        .map_err(|e| format!("Invalid value format: {e}"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("Value must be a non-negative number, got {value}"));
    }
    Ok(value)
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanSwitch {
    On,
    Off,
}

impl FanSwitch {
    pub fn is_on(self) -> bool {
        self == FanSwitch::On
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Connect, poll continuously and print every change until Ctrl-C.
    Monitor {
        /// Interval between poll cycles (e.g., "1s", "500ms").
        /// Defaults to the settings file value, or 1s.
        #[arg(value_parser = humantime::parse_duration, short, long, verbatim_doc_comment)]
        poll_interval: Option<Duration>,
    },

    /// Run a single poll cycle and print voltage, current, power, fan and alarm state.
    Read,

    /// Set the voltage setpoint in volts.
    SetVoltage {
        #[arg(value_parser = parse_engineering_value)]
        voltage: f64,
    },

    /// Set the current setpoint in amperes.
    SetCurrent {
        #[arg(value_parser = parse_engineering_value)]
        current: f64,
    },

    /// Set voltage and current setpoints with a single write request.
    Set {
        #[arg(value_parser = parse_engineering_value)]
        voltage: f64,
        #[arg(value_parser = parse_engineering_value)]
        current: f64,
    },

    /// Switch the PCU fan on or off.
    Fan {
        #[arg(value_enum)]
        state: FanSwitch,
    },

    /// Send the unload command to the PCU controller.
    /// **Warning:** This removes the load from the unit.
    #[clap(verbatim_doc_comment)]
    Unload {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Write one holding register of any slave on the bus.
    /// The value is rounded to the nearest integer.
    /// Slave and register can be specified in decimal or hexadecimal (e.g., "0x32").
    #[clap(verbatim_doc_comment)]
    WriteRegister {
        #[arg(value_parser = parse_slave)]
        slave: u8,
        #[arg(value_parser = parse_register)]
        register: u16,
        value: f64,
    },
}

const fn about_text() -> &'static str {
    "PCU HMI CLI - Monitor and control a power-conversion unit via Modbus RTU."
}

#[derive(Parser, Debug)]
#[command(name="pcu-hmi", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warn.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: CliCommands,

    /// YAML settings file. Commandline options take precedence over its values.
    #[arg(global = true, short, long)]
    pub config: Option<PathBuf>,

    /// Serial port device name.
    /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
    #[arg(global = true, short, long, verbatim_doc_comment)]
    pub device: Option<String>,

    /// Baud rate for serial communication. Default is 9600.
    #[arg(global = true, long)]
    pub baud_rate: Option<u32>,

    /// Serial parity: none, odd or even. Default is none.
    #[arg(global = true, long, value_parser = parse_parity)]
    pub parity: Option<Parity>,

    /// Modbus reply timeout per attempt.
    /// Examples: "1s", "500ms". Default is 1s.
    #[arg(global = true, long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Option<Duration>,

    /// Number of retries after a timed out request. Default is 3.
    #[arg(global = true, long)]
    pub retries: Option<usize>,
}
