//! Modbus RTU master of a power-conversion unit (PCU) operator panel.
//!
//! The crate polls a power meter and a PCU controller sharing one RS485 bus,
//! publishes the decoded readings and issues setpoint and control writes:
//!
//! 1.  **[`client::Client`]**: An async, cloneable handle to a master running on
//!     its own task. This is the recommended approach for most users.
//!
//! 2.  **[`master::Master`]**: The underlying state machine. It is driven by
//!     hand with transport events, which makes it independent of any runtime
//!     and easy to embed in an existing event loop.
//!
//! ## Features
//!
//! - **Register Map**: Every monitored point with its slave, register and scale in [`protocol`].
//! - **Out-of-Order Replies**: Replies are attributed by their own slave and register, never by arrival order.
//! - **Change Notifications**: Only real changes are notified, see [`state::Notification`].
//! - **Write Completion**: Every write reports its outcome exactly once, see [`command::PendingWrite`].
//! - **Pluggable Transport**: The serial link sits behind the [`transport::Transport`] trait; [`rtu::RtuTransport`] is the real one.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pcu_hmi_lib::{client::Client, config::{ConnectionConfig, Parity}, state::Notification};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (client, _task) = Client::spawn_rtu();
//!     let mut notifications = client.subscribe();
//!
//!     client.connect(ConnectionConfig::new("/dev/ttyUSB0", 9600, Parity::None)).await?;
//!     client.start_polling(Duration::from_secs(1)).await?;
//!
//!     while let Ok(notification) = notifications.recv().await {
//!         if let Notification::ConnectedChanged(true) = notification {
//!             client.write_voltage(220.0).await?;
//!         }
//!         println!("{}", client.state());
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod correlator;
pub mod error;
pub mod master;
pub mod poll;
pub mod protocol;
pub mod rtu;
pub mod state;
pub mod transport;
