//! Modbus RTU master of the power-conversion unit.
//!
//! [`Master`] owns the transport and everything that happens on top of it: the
//! connection state machine, the poll cycle, attribution of replies to the
//! published state and the issuing of write commands. It is a plain state
//! machine driven from a single event loop (see [`crate::client`]); every method
//! returns immediately and outcomes arrive later as [`TransportEvent`]s passed to
//! [`Master::handle_event`].
use crate::{
    command::{PendingWrite, WriteCompletion, WriteOp},
    config::{ConnectionConfig, DATA_BITS, STOP_BITS},
    correlator,
    error::{ConnectError, Error, Result},
    poll::{self, Poller},
    protocol::{MonitoredPoint, WriteRole},
    state::{Notification, PublishedState},
    transport::{LinkErrorKind, LinkState, Reply, RequestHandle, Transport, TransportEvent},
};
use std::{collections::HashMap, time::Duration};
use tokio::sync::{broadcast, oneshot, watch};

/// Capacity of the notification channel per subscriber.
const NOTIFICATION_CAPACITY: usize = 256;

/// What an in-flight request is waiting for.
#[derive(Debug)]
enum Pending {
    Read(&'static MonitoredPoint),
    Write {
        op: WriteOp,
        done: oneshot::Sender<WriteCompletion>,
    },
}

#[derive(Debug)]
pub struct Master<T> {
    transport: T,
    config: Option<ConnectionConfig>,
    state: PublishedState,
    snapshot: watch::Sender<PublishedState>,
    notifications: broadcast::Sender<Notification>,
    pending: HashMap<RequestHandle, Pending>,
    outstanding_reads: usize,
    poller: Poller,
}

impl<T: Transport> Master<T> {
    pub fn new(transport: T) -> Self {
        let state = PublishedState::default();
        let (snapshot, _) = watch::channel(state.clone());
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            transport,
            config: None,
            state,
            snapshot,
            notifications,
            pending: HashMap::new(),
            outstanding_reads: 0,
            poller: Poller::new(),
        }
    }

    /// Subscribes to change notifications raised from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub(crate) fn notification_sender(&self) -> broadcast::Sender<Notification> {
        self.notifications.clone()
    }

    /// Returns a receiver of published state snapshots.
    pub fn watch(&self) -> watch::Receiver<PublishedState> {
        self.snapshot.subscribe()
    }

    pub fn state(&self) -> &PublishedState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    /// Parameters of the current session, if any.
    pub fn connection_config(&self) -> Option<&ConnectionConfig> {
        self.config.as_ref()
    }

    /// Number of poll reads without a reply yet. Informational only.
    pub fn outstanding_reads(&self) -> usize {
        self.outstanding_reads
    }

    /// Number of requests, reads and writes, waiting for completion.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Starts a session with `config`.
    ///
    /// A connected master disconnects first. Returning `Ok` only means the
    /// handshake was initiated; [`Notification::ConnectedChanged`] reports the
    /// outcome.
    pub fn connect(&mut self, config: ConnectionConfig) -> std::result::Result<(), ConnectError> {
        if self.state.connected {
            self.disconnect();
        }
        self.forget_pending();
        if let Err(err) = self.transport.connect(&config) {
            log::error!("Cannot connect to {}: {err}", config.port);
            self.on_error(LinkErrorKind::Connection, err.to_string());
            return Err(err);
        }
        log::info!(
            "Modbus connection parameters: port {}, baud rate {}, parity {}, data bits {:?}, stop bits {:?}",
            config.port,
            config.baud_rate,
            config.parity,
            DATA_BITS,
            STOP_BITS
        );
        self.config = Some(config);
        Ok(())
    }

    /// Stops polling and tears down the session. Idempotent.
    ///
    /// Published readings are kept; only `connected` is cleared. Writes still in
    /// flight complete with [`Error::Cancelled`].
    pub fn disconnect(&mut self) {
        self.poller.stop();
        self.transport.disconnect();
        self.forget_pending();
        self.config = None;
        self.set_connected(false);
    }

    /// Starts the poll timer, restarting it if already running.
    pub fn start_polling(&mut self, interval: Duration) {
        self.poller.start(interval);
    }

    pub fn stop_polling(&mut self) {
        self.poller.stop();
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    /// Completes at the next poll tick. Never completes while polling is stopped.
    pub async fn next_poll(&mut self) {
        self.poller.tick().await
    }

    /// Issues one read per monitored point. Skipped while not connected.
    ///
    /// Replies of earlier cycles are not waited for.
    pub fn poll_cycle(&mut self) {
        if !self.state.connected {
            return;
        }
        for (handle, point) in poll::issue_cycle(&mut self.transport) {
            self.pending.insert(handle, Pending::Read(point));
            self.outstanding_reads += 1;
        }
        log::trace!("Poll cycle issued, {} reads outstanding", self.outstanding_reads);
    }

    /// Sends a write command.
    ///
    /// Rejected with [`Error::NotConnected`] while not connected, in which case
    /// nothing is sent.
    pub fn write(&mut self, op: WriteOp) -> Result<PendingWrite> {
        if !self.state.connected {
            log::warn!("Modbus not connected, cannot write {op}");
            return Err(Error::NotConnected);
        }
        let request = op.request();
        let Some(handle) =
            self.transport
                .send_write(request.slave, request.register, &request.values)
        else {
            log::warn!("Cannot send write request for {op}");
            return Err(Error::NotQueued);
        };
        log::debug!(
            "Write {handle} issued: {op} (slave {}, register {}, raw {:?})",
            request.slave,
            request.register,
            request.values
        );
        let (done, pending) = PendingWrite::channel(op);
        self.pending.insert(handle, Pending::Write { op, done });
        Ok(pending)
    }

    /// Writes a scalar setpoint (voltage or current).
    pub fn write_engineering_value(&mut self, role: WriteRole, value: f64) -> Result<PendingWrite> {
        self.write(WriteOp::engineering_value(role, value)?)
    }

    /// Writes voltage and current setpoints with one request.
    pub fn write_pair(&mut self, voltage: f64, current: f64) -> Result<PendingWrite> {
        self.write(WriteOp::pair(voltage, current))
    }

    /// Writes an on/off control.
    pub fn write_discrete(&mut self, role: WriteRole, on: bool) -> Result<PendingWrite> {
        self.write(WriteOp::discrete(role, on)?)
    }

    /// Writes a parameterless control command.
    pub fn write_fixed(&mut self, role: WriteRole) -> Result<PendingWrite> {
        self.write(WriteOp::fixed(role)?)
    }

    pub fn write_voltage(&mut self, value: f64) -> Result<PendingWrite> {
        self.write(WriteOp::Voltage(value))
    }

    pub fn write_current(&mut self, value: f64) -> Result<PendingWrite> {
        self.write(WriteOp::Current(value))
    }

    pub fn write_voltage_and_current(&mut self, voltage: f64, current: f64) -> Result<PendingWrite> {
        self.write(WriteOp::pair(voltage, current))
    }

    pub fn write_fan_state(&mut self, on: bool) -> Result<PendingWrite> {
        self.write(WriteOp::FanState(on))
    }

    pub fn write_unload(&mut self) -> Result<PendingWrite> {
        self.write(WriteOp::Unload)
    }

    pub fn write_raw_register(&mut self, slave: u8, register: u16, value: f64) -> Result<PendingWrite> {
        self.write(WriteOp::RawRegister {
            slave,
            register,
            value,
        })
    }

    /// Processes one event reported by the transport.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => self.on_state_changed(state),
            TransportEvent::ErrorOccurred { kind, message } => self.on_error(kind, message),
            TransportEvent::Completed { handle, result } => self.on_completed(handle, result),
        }
    }

    fn on_state_changed(&mut self, state: LinkState) {
        log::debug!("Modbus link state: {state}");
        if state == LinkState::Unconnected {
            // Requests of a closed link never complete.
            self.forget_pending();
        }
        self.set_connected(state == LinkState::Connected);
    }

    fn on_error(&mut self, kind: LinkErrorKind, message: String) {
        if kind.is_benign() {
            return;
        }
        log::warn!("Modbus error ({kind:?}): {message}");
        self.state.last_error = Some(message.clone());
        self.state.version += 1;
        self.publish(vec![Notification::ErrorOccurred(message)]);
    }

    fn on_completed(&mut self, handle: RequestHandle, result: Result<Reply>) {
        let Some(pending) = self.pending.remove(&handle) else {
            log::trace!("Dropping completion of unknown request {handle}");
            return;
        };
        match pending {
            Pending::Read(point) => {
                self.outstanding_reads = self.outstanding_reads.saturating_sub(1);
                match result {
                    Ok(reply) => {
                        if let Some(notifications) = correlator::correlate(&mut self.state, &reply) {
                            self.publish(notifications);
                        }
                    }
                    Err(err) => log::warn!("Modbus read of {} failed: {err}", point.role),
                }
            }
            Pending::Write { op, done } => {
                let result = result.map(|reply| {
                    log::debug!(
                        "Write {handle} successful: {op} (slave {}, register {}, {} register(s))",
                        reply.slave,
                        reply.register,
                        reply.values.len()
                    );
                });
                if let Err(err) = &result {
                    log::warn!("Write {handle} of {op} failed: {err}");
                }
                // The caller may have stopped waiting.
                let _ = done.send(WriteCompletion { op, result });
            }
        }
    }

    fn set_connected(&mut self, connected: bool) {
        if self.state.connected == connected {
            return;
        }
        log::info!(
            "Modbus {}",
            if connected { "connected" } else { "disconnected" }
        );
        self.state.connected = connected;
        self.state.version += 1;
        self.publish(vec![Notification::ConnectedChanged(connected)]);
    }

    /// Drops every in-flight request. Pending writes observe [`Error::Cancelled`].
    fn forget_pending(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("Forgetting {} in-flight request(s)", self.pending.len());
        }
        self.pending.clear();
        self.outstanding_reads = 0;
    }

    fn publish(&mut self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        self.snapshot.send_replace(self.state.clone());
        for notification in notifications {
            // No subscribers is fine.
            let _ = self.notifications.send(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Parity,
        protocol::ReadRole,
        state::Reading,
        transport::mock::{MockTransport, Request},
    };
    use assert_matches::assert_matches;
    use tokio::sync::broadcast::error::TryRecvError;

    fn config(parity: Parity) -> ConnectionConfig {
        ConnectionConfig::new("/dev/ttyUSB0", 9600, parity)
    }

    fn connected_master() -> Master<MockTransport> {
        let mut master = Master::new(MockTransport::new());
        master.connect(config(Parity::None)).unwrap();
        master.handle_event(TransportEvent::StateChanged(LinkState::Connected));
        master
    }

    fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
        let mut received = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(notification) => received.push(notification),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return received,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    /// Handles issued by the last poll cycle, in issue order.
    fn cycle_handles(master: &Master<MockTransport>) -> Vec<RequestHandle> {
        let sent = &master.transport().sent;
        sent[sent.len() - 5..].iter().map(|(handle, _)| *handle).collect()
    }

    fn complete(master: &mut Master<MockTransport>, handle: RequestHandle, raw: u16) {
        let event = master.transport_mut().success(handle, &[raw]);
        master.handle_event(event);
    }

    fn timeout() -> Error {
        Error::Timeout {
            timeout: Duration::from_secs(1),
            attempts: 4,
        }
    }

    #[test]
    fn connected_flag_follows_transport_state() {
        let mut master = Master::new(MockTransport::new());
        let mut rx = master.subscribe();
        master.connect(config(Parity::None)).unwrap();
        assert!(!master.is_connected());

        master.handle_event(TransportEvent::StateChanged(LinkState::Connecting));
        master.handle_event(TransportEvent::StateChanged(LinkState::Connected));
        master.handle_event(TransportEvent::StateChanged(LinkState::Connected));
        assert!(master.is_connected());
        assert_eq!(drain(&mut rx), vec![Notification::ConnectedChanged(true)]);

        master.handle_event(TransportEvent::StateChanged(LinkState::Unconnected));
        master.handle_event(TransportEvent::StateChanged(LinkState::Unconnected));
        assert!(!master.is_connected());
        assert_eq!(drain(&mut rx), vec![Notification::ConnectedChanged(false)]);
    }

    #[test]
    fn errors_are_published_independently_of_state() {
        let mut master = connected_master();
        let mut rx = master.subscribe();
        master.handle_event(TransportEvent::ErrorOccurred {
            kind: LinkErrorKind::NoError,
            message: String::new(),
        });
        assert!(drain(&mut rx).is_empty());

        master.handle_event(TransportEvent::ErrorOccurred {
            kind: LinkErrorKind::Read,
            message: "Device not configured".into(),
        });
        assert_eq!(
            drain(&mut rx),
            vec![Notification::ErrorOccurred("Device not configured".into())]
        );
        assert!(master.is_connected());
        assert_eq!(
            master.state().last_error.as_deref(),
            Some("Device not configured")
        );
    }

    #[test]
    fn invalid_config_is_rejected_and_reported() {
        let mut master = Master::new(MockTransport::new());
        let mut rx = master.subscribe();
        assert_matches!(
            master.connect(ConnectionConfig::new("", 9600, Parity::None)),
            Err(ConnectError::EmptyPortName)
        );
        assert!(!master.is_connected());
        assert!(master.connection_config().is_none());
        assert_matches!(
            drain(&mut rx).as_slice(),
            [Notification::ErrorOccurred(..)]
        );
    }

    #[test]
    fn poll_cycle_reads_all_points() {
        let mut master = connected_master();
        master.poll_cycle();
        assert_eq!(
            master.transport().reads(),
            vec![(3, 0), (3, 1), (3, 3), (1, 2), (1, 3)]
        );
        assert_eq!(master.outstanding_reads(), 5);

        // The next cycle does not wait for replies.
        master.poll_cycle();
        assert_eq!(master.transport().reads().len(), 10);
        assert_eq!(master.outstanding_reads(), 10);
    }

    #[test]
    fn poll_cycle_is_skipped_while_disconnected() {
        let mut master = Master::new(MockTransport::new());
        master.poll_cycle();
        master.connect(config(Parity::None)).unwrap();
        // Handshake not finished yet.
        master.poll_cycle();
        assert!(master.transport().sent.is_empty());
    }

    #[test]
    fn reads_update_scaled_values() {
        let mut master = connected_master();
        let watch = master.watch();
        master.poll_cycle();
        let handles = cycle_handles(&master);
        complete(&mut master, handles[0], 2200);
        complete(&mut master, handles[2], 50);
        assert_eq!(master.state().voltage, 2200.0 * 0.1);
        assert!((master.state().voltage - 220.0).abs() < 1e-9);
        assert!((master.state().power - 0.5).abs() < 1e-12);
        assert_eq!(master.outstanding_reads(), 3);
        assert_eq!(watch.borrow().voltage, master.state().voltage);
        assert_eq!(watch.borrow().version, master.state().version);
    }

    #[test]
    fn repeated_identical_reads_notify_once() {
        let mut master = connected_master();
        let mut rx = master.subscribe();
        for _ in 0..3 {
            master.poll_cycle();
            let handles = cycle_handles(&master);
            complete(&mut master, handles[1], 123);
        }
        let current_changes: Vec<Notification> = drain(&mut rx)
            .into_iter()
            .filter(|n| matches!(n, Notification::ValueChanged(Reading::Current(_))))
            .collect();
        assert_eq!(current_changes.len(), 1);
    }

    #[test]
    fn latch_turns_on_exactly_once() {
        let mut master = connected_master();
        let mut rx = master.subscribe();
        assert!(!master.state().has_fan_state_data);
        for raw in [0, 1, 1, 0] {
            master.poll_cycle();
            let handles = cycle_handles(&master);
            complete(&mut master, handles[3], raw);
        }
        assert!(master.state().has_fan_state_data);
        assert!(!master.state().has_high_temp_data);
        let available = drain(&mut rx)
            .into_iter()
            .filter(|n| *n == Notification::DataAvailable(ReadRole::FanState))
            .count();
        assert_eq!(available, 1);
    }

    #[test]
    fn out_of_order_replies_are_attributed_by_address() {
        let mut master = connected_master();
        master.poll_cycle();
        let handles = cycle_handles(&master);
        // Current answers before voltage.
        complete(&mut master, handles[1], 105);
        complete(&mut master, handles[0], 2300);
        assert!((master.state().current - 10.5).abs() < 1e-9);
        assert!((master.state().voltage - 230.0).abs() < 1e-9);
    }

    #[test]
    fn failed_read_keeps_last_value() {
        let mut master = connected_master();
        master.poll_cycle();
        let handles = cycle_handles(&master);
        complete(&mut master, handles[0], 2200);
        let before = master.state().clone();

        let mut rx = master.subscribe();
        master.poll_cycle();
        let handles = cycle_handles(&master);
        let event = master.transport_mut().failure(handles[0], timeout());
        master.handle_event(event);
        // The rest of the cycle is unaffected.
        complete(&mut master, handles[1], 7);

        assert!((master.state().voltage - 220.0).abs() < 1e-9);
        assert_eq!(master.state().voltage, before.voltage);
        assert_eq!(
            drain(&mut rx),
            vec![Notification::ValueChanged(Reading::Current(7.0 * 0.1))]
        );
        // Four left from the first cycle, three from the second.
        assert_eq!(master.pending_requests(), 7);
    }

    #[test]
    fn handle_completes_only_once() {
        let mut master = connected_master();
        master.poll_cycle();
        let handles = cycle_handles(&master);
        complete(&mut master, handles[0], 2200);
        let version = master.state().version;
        // A second completion of the same handle is dropped.
        master.handle_event(TransportEvent::Completed {
            handle: handles[0],
            result: Ok(Reply {
                slave: 3,
                register: 0,
                values: vec![1000],
            }),
        });
        assert_eq!(master.state().version, version);
        assert_eq!(master.outstanding_reads(), 4);
    }

    #[test]
    fn unmatched_reply_is_silently_dropped() {
        let mut master = connected_master();
        let mut rx = master.subscribe();
        master.poll_cycle();
        let handles = cycle_handles(&master);
        master.handle_event(TransportEvent::Completed {
            handle: handles[0],
            result: Ok(Reply {
                slave: 9,
                register: 9,
                values: vec![1],
            }),
        });
        assert!(drain(&mut rx).is_empty());
        assert_eq!(master.pending_requests(), 4);
    }

    #[test]
    fn disconnect_keeps_readings_and_stops_polling() {
        let mut master = connected_master();
        master.poll_cycle();
        let handles = cycle_handles(&master);
        complete(&mut master, handles[0], 2200);
        master.disconnect();
        master.disconnect();

        assert!(!master.is_connected());
        assert!(!master.is_polling());
        assert_eq!(master.pending_requests(), 0);
        assert!((master.state().voltage - 220.0).abs() < 1e-9);
        assert_eq!(master.transport().disconnects, 1);

        let sent = master.transport().sent.len();
        master.poll_cycle();
        assert_eq!(master.transport().sent.len(), sent);
    }

    #[test]
    fn writes_are_rejected_while_disconnected() {
        let mut master = Master::new(MockTransport::new());
        let version = master.state().version;
        assert_matches!(master.write_voltage(220.0), Err(Error::NotConnected));
        assert_matches!(master.write_unload(), Err(Error::NotConnected));
        assert!(master.transport().sent.is_empty());
        assert_eq!(master.state().version, version);
        assert_eq!(master.pending_requests(), 0);
    }

    #[test]
    fn write_operations_hit_the_write_map() {
        let mut master = connected_master();
        master.write_voltage(220.4).unwrap();
        master.write_current(10.5).unwrap();
        master.write_voltage_and_current(380.0, 25.0).unwrap();
        master.write_fan_state(true).unwrap();
        master.write_unload().unwrap();
        master.write_raw_register(2, 100, 7.0).unwrap();
        assert_eq!(
            master.transport().writes(),
            vec![
                (1, 50, vec![220]),
                (1, 51, vec![11]),
                (1, 50, vec![380, 25]),
                (1, 1, vec![1]),
                (1, 35, vec![1]),
                (2, 100, vec![7]),
            ]
        );
        assert_eq!(master.pending_requests(), 6);
    }

    #[test]
    fn role_based_writes() {
        let mut master = connected_master();
        master.write_engineering_value(WriteRole::Current, 3.0).unwrap();
        master.write_pair(1.0, 2.0).unwrap();
        master.write_discrete(WriteRole::Fan, false).unwrap();
        master.write_fixed(WriteRole::Unload).unwrap();
        assert_matches!(
            master.write_discrete(WriteRole::Voltage, true),
            Err(Error::UnsupportedRole(WriteRole::Voltage))
        );
        assert_eq!(master.transport().writes().len(), 4);
    }

    #[tokio::test]
    async fn concurrent_writes_complete_independently() {
        let mut master = connected_master();
        let voltage = master.write_voltage(200.0).unwrap();
        let fan = master.write_fan_state(true).unwrap();
        let sent = master.transport().sent.clone();
        assert_matches!(sent[0].1, Request::Write { register: 50, .. });

        let event = master.transport_mut().failure(sent[1].0, timeout());
        master.handle_event(event);
        let event = master.transport_mut().success(sent[0].0, &[]);
        master.handle_event(event);

        let fan = fan.completion().await;
        assert_eq!(fan.op, WriteOp::FanState(true));
        assert_matches!(fan.result, Err(Error::Timeout { .. }));
        let voltage = voltage.completion().await;
        assert_eq!(voltage.op, WriteOp::Voltage(200.0));
        assert!(voltage.is_ok());
        assert_eq!(master.pending_requests(), 0);
    }

    #[tokio::test]
    async fn write_errors_do_not_reach_the_global_stream() {
        let mut master = connected_master();
        let mut rx = master.subscribe();
        let unload = master.write_unload().unwrap();
        let handle = master.transport().sent[0].0;
        let event = master
            .transport_mut()
            .failure(handle, Error::TokioExceptionError(tokio_modbus::ExceptionCode::IllegalDataValue));
        master.handle_event(event);
        assert_matches!(unload.completion().await.result, Err(Error::TokioExceptionError(..)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn disconnect_cancels_in_flight_writes() {
        let mut master = connected_master();
        let write = master.write_current(5.0).unwrap();
        let handle = master.transport().sent[0].0;
        master.disconnect();
        // Late completion of the torn down session.
        let event = master.transport_mut().success(handle, &[]);
        master.handle_event(event);
        assert_matches!(write.completion().await.result, Err(Error::Cancelled));
    }

    #[test]
    fn write_not_enqueued() {
        let mut master = connected_master();
        master.transport_mut().accepting = false;
        assert_matches!(master.write_fan_state(false), Err(Error::NotQueued));
        assert_eq!(master.pending_requests(), 0);
    }

    #[test]
    fn reconnect_replaces_the_session() {
        let mut master = connected_master();
        master.disconnect();
        master.connect(config(Parity::Odd)).unwrap();
        master.handle_event(TransportEvent::StateChanged(LinkState::Connected));
        master.connect(config(Parity::None)).unwrap();
        master.handle_event(TransportEvent::StateChanged(LinkState::Connected));

        let transport = master.transport();
        assert_eq!(transport.active.as_ref().map(|c| c.parity), Some(Parity::None));
        assert_eq!(transport.connects.last().map(|c| c.parity), Some(Parity::None));
        assert_eq!(transport.disconnects, 2);
        assert_eq!(
            master.connection_config().map(|c| c.parity),
            Some(Parity::None)
        );
        assert!(master.is_connected());
    }

    #[test]
    fn reconnect_forgets_old_handles() {
        let mut master = connected_master();
        master.poll_cycle();
        let old = cycle_handles(&master);
        master.connect(config(Parity::Even)).unwrap();
        master.handle_event(TransportEvent::StateChanged(LinkState::Connected));
        assert_eq!(master.pending_requests(), 0);
        complete(&mut master, old[0], 999);
        assert_eq!(master.state().voltage, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_drives_cycles() {
        let mut master = connected_master();
        master.start_polling(Duration::from_millis(500));
        master.next_poll().await;
        master.poll_cycle();
        master.next_poll().await;
        master.poll_cycle();
        assert_eq!(master.transport().reads().len(), 10);
        master.stop_polling();
        assert!(!master.is_polling());
    }
}
