//! PCU HMI CLI
//!
//! A command-line interface (CLI) application for monitoring and controlling a
//! power-conversion unit (PCU) over a Modbus RTU (serial) bus.
//!
//! This tool allows users to:
//! - Continuously monitor voltage, current, power, fan state and the high temperature alarm.
//! - Read all monitored values once.
//! - Set the voltage and current setpoints.
//! - Switch the fan and send the unload command.
//! - Write an arbitrary holding register for commissioning.
//!
//! The CLI leverages the `pcu_hmi_lib` crate for the register map and the Modbus master.

use anyhow::{bail, Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use pcu_hmi_lib::{
    client::Client,
    config::{ConnectionConfig, Settings},
    protocol as proto,
    state::Notification,
};
use std::{panic, time::Duration};
use tokio::sync::broadcast::error::RecvError;

mod commandline;

/// How long to wait for the serial link to come up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Loads the settings file, if any, and applies the commandline overrides.
fn load_settings(args: &commandline::CliArgs) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Cannot load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let modbus = &mut settings.modbus;
    if let Some(device) = &args.device {
        modbus.port = device.clone();
    }
    if let Some(baud_rate) = args.baud_rate {
        modbus.baud_rate = baud_rate;
    }
    if let Some(parity) = args.parity {
        modbus.parity = parity;
    }
    if let Some(timeout) = args.timeout {
        modbus.timeout = timeout;
    }
    if let Some(retries) = args.retries {
        modbus.retries = retries;
    }
    Ok(settings)
}

/// Connects and waits until the link is up or reports an error.
async fn connect(client: &Client, config: ConnectionConfig) -> Result<()> {
    let mut notifications = client.subscribe();
    let port = config.port.clone();
    info!("Connecting to {port} ({} baud, parity {})...", config.baud_rate, config.parity);
    client
        .connect(config)
        .await
        .with_context(|| format!("Cannot connect to {port}"))?;

    let wait = async {
        loop {
            match notifications.recv().await {
                Ok(Notification::ConnectedChanged(true)) => return Ok(()),
                Ok(Notification::ErrorOccurred(message)) => bail!(message),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => bail!("Modbus master stopped"),
            }
        }
    };
    tokio::time::timeout(CONNECT_TIMEOUT, wait)
        .await
        .with_context(|| format!("Timeout while connecting to {port}"))?
}

/// Worst case duration of one poll cycle including all retries.
///
/// A timed out attempt also waits one timeout for the line to settle.
fn cycle_deadline(config: &ConnectionConfig) -> Duration {
    let attempts = u32::try_from(config.retries.saturating_add(1)).unwrap_or(u32::MAX);
    let reads = u32::try_from(proto::REGISTER_MAP.len()).unwrap_or(u32::MAX);
    config
        .timeout
        .saturating_mul(2)
        .saturating_mul(attempts)
        .saturating_mul(reads)
}

async fn handle_read(client: &Client, config: &ConnectionConfig) -> Result<()> {
    info!("Executing: Read");
    let mut state = client.watch();
    client.poll_now().await?;
    // The alarm is the last point of a cycle, requests are served in order.
    let complete = matches!(
        tokio::time::timeout(
            cycle_deadline(config),
            state.wait_for(|s| s.has_fan_state_data && s.has_high_temp_data),
        )
        .await,
        Ok(Ok(_))
    );
    if !complete {
        warn!("Not all values could be read, showing what arrived");
    }
    let state = client.state();
    println!("Voltage: {:.1} V", state.voltage);
    println!("Current: {:.1} A", state.current);
    println!("Power: {:.2} kW", state.power);
    if state.has_fan_state_data {
        println!("Fan: {}", if state.fan_state != 0 { "on" } else { "off" });
    }
    if state.has_high_temp_data {
        println!("High temperature alarm: {}", state.high_temp_state);
    }
    if let Some(error) = &state.last_error {
        println!("Last error: {error}");
    }
    Ok(())
}

async fn handle_monitor(client: &Client, poll_interval: Duration) -> Result<()> {
    info!("Starting monitor mode: interval={poll_interval:?}");
    let mut notifications = client.subscribe();
    client.start_polling(poll_interval).await?;
    println!("{}", client.state());
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Cannot listen for Ctrl-C")?;
                trace!("Received Ctrl-C");
                break;
            }
            notification = notifications.recv() => match notification {
                Ok(notification) => {
                    debug!("Notification: {notification}");
                    println!("{}", client.state());
                    if let Notification::ConnectedChanged(false) = notification {
                        bail!("Connection lost");
                    }
                }
                Err(RecvError::Lagged(count)) => warn!("Skipped {count} notifications"),
                Err(RecvError::Closed) => bail!("Modbus master stopped"),
            },
        }
    }
    client.stop_polling().await?;
    Ok(())
}

fn confirm_unload() -> Result<bool> {
    println!("WARNING: The unload command removes the load from the power-conversion unit.");
    Confirm::new()
        .with_prompt("Do you want to send the unload command?")
        .default(false)
        .show_default(true)
        .interact()
        .context("Failed to get user confirmation.")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "PCU HMI CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    if let commandline::CliCommands::Unload { yes: false } = args.command {
        if !confirm_unload()? {
            info!("Unload aborted by user.");
            return Ok(());
        }
    }

    // 2. Setup the master and connect
    let settings = load_settings(&args)?;
    trace!("Settings: {settings:?}");
    let (client, task) = Client::spawn_rtu();
    connect(&client, settings.modbus.clone()).await?;

    // 3. Execute the command
    match &args.command {
        commandline::CliCommands::Monitor { poll_interval } => {
            handle_monitor(&client, poll_interval.unwrap_or(settings.poll_interval)).await?;
        }
        commandline::CliCommands::Read => {
            handle_read(&client, &settings.modbus).await?;
        }
        commandline::CliCommands::SetVoltage { voltage } => {
            info!("Executing: Set voltage to {voltage} V");
            client
                .write_voltage(*voltage)
                .await
                .with_context(|| format!("Failed to set voltage to {voltage} V"))?;
            println!("Voltage setpoint set to {voltage} V successfully.");
        }
        commandline::CliCommands::SetCurrent { current } => {
            info!("Executing: Set current to {current} A");
            client
                .write_current(*current)
                .await
                .with_context(|| format!("Failed to set current to {current} A"))?;
            println!("Current setpoint set to {current} A successfully.");
        }
        commandline::CliCommands::Set { voltage, current } => {
            info!("Executing: Set voltage to {voltage} V and current to {current} A");
            client
                .write_voltage_and_current(*voltage, *current)
                .await
                .with_context(|| {
                    format!("Failed to set voltage to {voltage} V and current to {current} A")
                })?;
            println!("Setpoints set to {voltage} V / {current} A successfully.");
        }
        commandline::CliCommands::Fan { state } => {
            info!("Executing: Switch fan {state:?}");
            client
                .write_fan_state(state.is_on())
                .await
                .with_context(|| format!("Failed to switch fan {state:?}"))?;
            println!("Fan switched {} successfully.", if state.is_on() { "on" } else { "off" });
        }
        commandline::CliCommands::Unload { .. } => {
            info!("Executing: Unload");
            client
                .write_unload()
                .await
                .context("Failed to send unload command")?;
            println!("Unload command sent successfully.");
        }
        commandline::CliCommands::WriteRegister {
            slave,
            register,
            value,
        } => {
            info!("Executing: Write {value} to slave {slave} register {register}");
            client
                .write_raw_register(*slave, *register, *value)
                .await
                .with_context(|| {
                    format!("Failed to write {value} to slave {slave} register {register}")
                })?;
            println!("Register {register} of slave {slave} written successfully.");
        }
    }

    // 4. Shut down the master, which closes the serial port
    client.disconnect().await?;
    drop(client);
    task.await.context("Modbus master task failed")?;
    Ok(())
}
