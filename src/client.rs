//! Async handle to a [`Master`] running on its own task.
//!
//! The master is owned by a single event loop which multiplexes three sources:
//! commands from [`Client`] handles, events reported by the transport and poll
//! timer ticks. Nothing else touches the master, so no locking is involved.
//! [`Client`] is cheap to clone and can be shared freely between tasks.
//!
//! ```no_run
//! use pcu_hmi_lib::{client::Client, config::ConnectionConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (client, _task) = Client::spawn_rtu();
//!     let mut notifications = client.subscribe();
//!     client.connect(ConnectionConfig::new("/dev/ttyUSB0", 9600, Default::default())).await?;
//!     client.start_polling(Duration::from_secs(1)).await?;
//!
//!     while let Ok(notification) = notifications.recv().await {
//!         println!("{notification}");
//!     }
//!     Ok(())
//! }
//! ```
use crate::{
    command::{PendingWrite, WriteOp},
    config::ConnectionConfig,
    error::{ConnectError, Error, Result},
    master::Master,
    rtu::RtuTransport,
    state::{Notification, PublishedState},
    transport::{Transport, TransportEvent},
};
use std::time::Duration;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};

/// Capacity of the command queue.
const COMMAND_CAPACITY: usize = 32;

/// Request sent from a [`Client`] to the event loop.
#[derive(Debug)]
pub enum Command {
    Connect {
        config: ConnectionConfig,
        reply: oneshot::Sender<std::result::Result<(), ConnectError>>,
    },
    Disconnect,
    StartPolling(Duration),
    StopPolling,
    /// Runs one poll cycle right away, independent of the timer.
    PollNow,
    Write {
        op: WriteOp,
        reply: oneshot::Sender<Result<PendingWrite>>,
    },
}

/// Drives `master` until every command sender is gone, then disconnects it.
pub async fn run<T: Transport>(
    mut master: Master<T>,
    mut commands: mpsc::Receiver<Command>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    log::debug!("Master event loop started");
    loop {
        tokio::select! {
            // Commands first, a command sent before an event is handled before it.
            biased;

            command = commands.recv() => match command {
                Some(command) => dispatch(&mut master, command),
                None => break,
            },
            Some(event) = events.recv() => master.handle_event(event),
            () = master.next_poll() => master.poll_cycle(),
        }
    }
    master.disconnect();
    log::debug!("Master event loop stopped");
}

fn dispatch<T: Transport>(master: &mut Master<T>, command: Command) {
    match command {
        Command::Connect { config, reply } => {
            let _ = reply.send(master.connect(config));
        }
        Command::Disconnect => master.disconnect(),
        Command::StartPolling(interval) => master.start_polling(interval),
        Command::StopPolling => master.stop_polling(),
        Command::PollNow => master.poll_cycle(),
        Command::Write { op, reply } => {
            let _ = reply.send(master.write(op));
        }
    }
}

/// Handle to a running master.
#[derive(Debug, Clone)]
pub struct Client {
    commands: mpsc::Sender<Command>,
    notifications: broadcast::Sender<Notification>,
    state: watch::Receiver<PublishedState>,
}

impl Client {
    /// Moves `master` onto a new task fed by `events`.
    ///
    /// The task ends once every clone of the returned client is dropped.
    pub fn spawn<T>(
        master: Master<T>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (Self, JoinHandle<()>)
    where
        T: Transport + Send + 'static,
    {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let client = Self {
            commands,
            notifications: master.notification_sender(),
            state: master.watch(),
        };
        let task = tokio::spawn(run(master, rx, events));
        (client, task)
    }

    /// Spawns a master on the serial RTU transport.
    pub fn spawn_rtu() -> (Self, JoinHandle<()>) {
        let (transport, events) = RtuTransport::channel();
        Self::spawn(Master::new(transport), events)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| Error::Closed)
    }

    /// Starts a session. See [`Master::connect`].
    pub async fn connect(&self, config: ConnectionConfig) -> std::result::Result<(), ConnectError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { config, reply })
            .await
            .map_err(|_| ConnectError::Closed)?;
        rx.await.map_err(|_| ConnectError::Closed)?
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect).await
    }

    pub async fn start_polling(&self, interval: Duration) -> Result<()> {
        self.send(Command::StartPolling(interval)).await
    }

    pub async fn stop_polling(&self) -> Result<()> {
        self.send(Command::StopPolling).await
    }

    pub async fn poll_now(&self) -> Result<()> {
        self.send(Command::PollNow).await
    }

    /// Sends a write command and returns without waiting for the slave.
    pub async fn submit(&self, op: WriteOp) -> Result<PendingWrite> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Write { op, reply }).await?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Sends a write command and waits for its completion.
    pub async fn write(&self, op: WriteOp) -> Result<()> {
        self.submit(op).await?.completion().await.result
    }

    pub async fn write_voltage(&self, value: f64) -> Result<()> {
        self.write(WriteOp::Voltage(value)).await
    }

    pub async fn write_current(&self, value: f64) -> Result<()> {
        self.write(WriteOp::Current(value)).await
    }

    pub async fn write_voltage_and_current(&self, voltage: f64, current: f64) -> Result<()> {
        self.write(WriteOp::pair(voltage, current)).await
    }

    pub async fn write_fan_state(&self, on: bool) -> Result<()> {
        self.write(WriteOp::FanState(on)).await
    }

    pub async fn write_unload(&self) -> Result<()> {
        self.write(WriteOp::Unload).await
    }

    pub async fn write_raw_register(&self, slave: u8, register: u16, value: f64) -> Result<()> {
        self.write(WriteOp::RawRegister {
            slave,
            register,
            value,
        })
        .await
    }

    /// Subscribes to change notifications raised from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Latest published state.
    pub fn state(&self) -> PublishedState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PublishedState> {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Parity,
        state::Reading,
        transport::{mock::MockTransport, LinkState, Reply, RequestHandle},
    };
    use assert_matches::assert_matches;

    fn spawn_mock() -> (Client, JoinHandle<()>, mpsc::UnboundedSender<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (client, task) = Client::spawn(Master::new(MockTransport::new()), rx);
        (client, task, events)
    }

    async fn connect(client: &Client, events: &mpsc::UnboundedSender<TransportEvent>) {
        client
            .connect(ConnectionConfig::new("/dev/ttyUSB0", 9600, Parity::None))
            .await
            .unwrap();
        events
            .send(TransportEvent::StateChanged(LinkState::Connected))
            .unwrap();
        client
            .watch()
            .wait_for(|state| state.connected)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn connect_rejects_invalid_config() {
        let (client, _task, _events) = spawn_mock();
        assert_eq!(
            client
                .connect(ConnectionConfig::new("", 9600, Parity::None))
                .await,
            Err(ConnectError::EmptyPortName)
        );
        assert!(client.state().last_error.is_some());
        assert!(!client.state().connected);
    }

    #[tokio::test]
    async fn write_waits_for_completion() {
        let (client, _task, events) = spawn_mock();
        connect(&client, &events).await;

        let pending = client.submit(WriteOp::Voltage(220.0)).await.unwrap();
        assert_eq!(pending.op(), WriteOp::Voltage(220.0));
        events
            .send(TransportEvent::Completed {
                handle: RequestHandle::new(1),
                result: Ok(Reply {
                    slave: 1,
                    register: 50,
                    values: vec![220],
                }),
            })
            .unwrap();
        let completion = pending.completion().await;
        assert!(completion.is_ok());
    }

    #[tokio::test]
    async fn write_while_disconnected_is_rejected() {
        let (client, _task, _events) = spawn_mock();
        assert_matches!(client.write_unload().await, Err(Error::NotConnected));
    }

    #[tokio::test]
    async fn disconnect_cancels_in_flight_write() {
        let (client, _task, events) = spawn_mock();
        connect(&client, &events).await;

        let pending = client.submit(WriteOp::FanState(true)).await.unwrap();
        client.disconnect().await.unwrap();
        assert_matches!(pending.completion().await.result, Err(Error::Cancelled));
        client
            .watch()
            .wait_for(|state| !state.connected)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn poll_now_publishes_readings() {
        let (client, _task, events) = spawn_mock();
        let mut notifications = client.subscribe();
        connect(&client, &events).await;
        assert_eq!(
            notifications.recv().await.unwrap(),
            Notification::ConnectedChanged(true)
        );

        client.poll_now().await.unwrap();
        // The first read of the cycle is the voltage at slave 3, register 0.
        events
            .send(TransportEvent::Completed {
                handle: RequestHandle::new(1),
                result: Ok(Reply {
                    slave: 3,
                    register: 0,
                    values: vec![2300],
                }),
            })
            .unwrap();
        assert_matches!(
            notifications.recv().await.unwrap(),
            Notification::ValueChanged(Reading::Voltage(v)) if (v - 230.0).abs() < 1e-9
        );
        assert!((client.state().voltage - 230.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn loop_ends_when_clients_are_gone() {
        let (client, task, _events) = spawn_mock();
        let other = client.clone();
        drop(client);
        drop(other);
        task.await.unwrap();
    }
}
