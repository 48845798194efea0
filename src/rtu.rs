//! Modbus RTU transport over a serial port.
//!
//! Each session runs a worker task that opens the port with `tokio-serial`,
//! attaches a `tokio-modbus` RTU context and executes queued requests one at a
//! time, which is all the serialization a half-duplex RS485 line needs. Timeouts
//! and retries are handled here; the master never retries on its own.
//!
//! RTU replies carry no register address, so a reply arriving after its request
//! timed out would be taken as the answer to the next request. After every
//! timeout the worker therefore waits another timeout period for the line to
//! settle and discards whatever was received meanwhile.
//!
//! ```no_run
//! use pcu_hmi_lib::{config::ConnectionConfig, master::Master, rtu::RtuTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (transport, mut events) = RtuTransport::channel();
//!     let mut master = Master::new(transport);
//!     master.connect(ConnectionConfig::default())?;
//!     while let Some(event) = events.recv().await {
//!         master.handle_event(event);
//!         if master.is_connected() {
//!             master.poll_cycle();
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use crate::{
    config::ConnectionConfig,
    error::{ConnectError, Error, Result},
    transport::{
        HandleAllocator, LinkErrorKind, LinkState, Reply, RequestHandle, Transport,
        TransportEvent,
    },
};
use std::{
    future::Future,
    io,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{self, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    sync::mpsc,
    task::JoinHandle,
    time,
};
use tokio_modbus::{
    client::Context,
    prelude::{Reader, SlaveContext, Writer},
    Slave,
};
use tokio_serial::{ClearBuffer, SerialPort, SerialStream};

#[derive(Debug)]
enum JobKind {
    Read { count: u16 },
    Write { values: Vec<u16> },
}

#[derive(Debug)]
struct Job {
    handle: RequestHandle,
    slave: u8,
    register: u16,
    kind: JobKind,
}

#[derive(Debug)]
struct Session {
    jobs: mpsc::UnboundedSender<Job>,
    worker: JoinHandle<()>,
}

/// Serial Modbus RTU transport.
///
/// Must be used from within a tokio runtime, the session worker is spawned on it.
#[derive(Debug)]
pub struct RtuTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    handles: HandleAllocator,
    session: Option<Session>,
}

impl RtuTransport {
    /// Creates a transport reporting to `events`.
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            handles: HandleAllocator::default(),
            session: None,
        }
    }

    /// Creates a transport together with the receiving end of its events.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            log::trace!("Transport event dropped, nobody is listening");
        }
    }

    fn enqueue(&mut self, slave: u8, register: u16, kind: JobKind) -> Option<RequestHandle> {
        let Some(session) = self.session.as_ref() else {
            log::warn!("Serial link is not open, request to slave {slave} register {register} dropped");
            return None;
        };
        let handle = self.handles.next_handle();
        let job = Job {
            handle,
            slave,
            register,
            kind,
        };
        match session.jobs.send(job) {
            Ok(()) => Some(handle),
            Err(_) => {
                log::warn!("Serial link is closed, request to slave {slave} register {register} dropped");
                None
            }
        }
    }
}

impl Transport for RtuTransport {
    fn connect(&mut self, config: &ConnectionConfig) -> std::result::Result<(), ConnectError> {
        config.validate()?;
        self.disconnect();
        let (jobs, rx) = mpsc::unbounded_channel();
        self.emit(TransportEvent::StateChanged(LinkState::Connecting));
        let worker = tokio::spawn(run_session(config.clone(), rx, self.events.clone()));
        self.session = Some(Session { jobs, worker });
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            self.emit(TransportEvent::StateChanged(LinkState::Closing));
            // Dropping the context closes the port.
            session.worker.abort();
            self.emit(TransportEvent::StateChanged(LinkState::Unconnected));
        }
    }

    fn send_read(&mut self, slave: u8, register: u16, count: u16) -> Option<RequestHandle> {
        self.enqueue(slave, register, JobKind::Read { count })
    }

    fn send_write(&mut self, slave: u8, register: u16, values: &[u16]) -> Option<RequestHandle> {
        self.enqueue(
            slave,
            register,
            JobKind::Write {
                values: values.to_vec(),
            },
        )
    }
}

impl Drop for RtuTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.worker.abort();
        }
    }
}

/// Serial port shared between the Modbus context and the session worker.
///
/// The context only ever polls it from within a request, so the lock is never
/// contended.
#[derive(Debug, Clone)]
struct SharedPort(Arc<Mutex<SerialStream>>);

impl SharedPort {
    fn new(port: SerialStream) -> Self {
        Self(Arc::new(Mutex::new(port)))
    }

    fn lock(&self) -> MutexGuard<'_, SerialStream> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops everything received but not read yet.
    fn discard_input(&self) -> tokio_serial::Result<()> {
        self.lock().clear(ClearBuffer::Input)
    }
}

impl AsyncRead for SharedPort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.lock()).poll_read(cx, buf)
    }
}

impl AsyncWrite for SharedPort {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut *self.lock()).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.lock()).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.lock()).poll_shutdown(cx)
    }
}

async fn run_session(
    config: ConnectionConfig,
    jobs: mpsc::UnboundedReceiver<Job>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    match SerialStream::open(&config.serial_port_builder()) {
        Ok(port) => serve(port, &config, jobs, &events).await,
        Err(err) => {
            let _ = events.send(TransportEvent::ErrorOccurred {
                kind: LinkErrorKind::Connection,
                message: format!("Cannot open serial port {}: {err}", config.port),
            });
            let _ = events.send(TransportEvent::StateChanged(LinkState::Unconnected));
        }
    }
}

/// Executes queued jobs on an open port until the queue closes or the link is lost.
async fn serve(
    port: SerialStream,
    config: &ConnectionConfig,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    let port = SharedPort::new(port);
    let mut ctx = tokio_modbus::client::rtu::attach(port.clone());
    let _ = events.send(TransportEvent::StateChanged(LinkState::Connected));

    while let Some(job) = jobs.recv().await {
        let result = execute(&mut ctx, &port, config, &job).await;
        let link_lost = matches!(&result, Err(err) if err.is_link_lost());
        if let Err(Error::TokioError(tokio_modbus::Error::Transport(err))) = &result {
            let kind = match (link_lost, &job.kind) {
                (true, _) => LinkErrorKind::Connection,
                (false, JobKind::Read { .. }) => LinkErrorKind::Read,
                (false, JobKind::Write { .. }) => LinkErrorKind::Write,
            };
            let _ = events.send(TransportEvent::ErrorOccurred {
                kind,
                message: format!("Serial port {}: {err}", config.port),
            });
        }
        let _ = events.send(TransportEvent::Completed {
            handle: job.handle,
            result,
        });
        if link_lost {
            log::error!("Serial link {} lost, closing the session", config.port);
            let _ = events.send(TransportEvent::StateChanged(LinkState::Unconnected));
            return;
        }
    }
}

/// Number of attempts a job gets with `retries` retries.
fn max_attempts(retries: usize) -> usize {
    retries.saturating_add(1)
}

/// Executes one job, retrying timeouts and I/O failures up to `config.retries` times.
async fn execute(
    ctx: &mut Context,
    port: &SharedPort,
    config: &ConnectionConfig,
    job: &Job,
) -> Result<Reply> {
    ctx.set_slave(Slave(job.slave));
    let attempts = max_attempts(config.retries);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match &job.kind {
            JobKind::Read { count } => {
                with_timeout(
                    config.timeout,
                    attempt,
                    ctx.read_holding_registers(job.register, *count),
                )
                .await
            }
            // A single register goes out as function 0x06, like the unit expects.
            JobKind::Write { values } if values.len() == 1 => with_timeout(
                config.timeout,
                attempt,
                ctx.write_single_register(job.register, values[0]),
            )
            .await
            .map(|()| values.clone()),
            JobKind::Write { values } => with_timeout(
                config.timeout,
                attempt,
                ctx.write_multiple_registers(job.register, values),
            )
            .await
            .map(|()| values.clone()),
        };
        if let Err(Error::Timeout { .. }) = &result {
            discard_late_reply(port, config.timeout).await;
        }
        match result {
            Err(err) if err.is_retryable() && !err.is_link_lost() && attempt < attempts => {
                log::debug!(
                    "Request {} to slave {} register {} failed ({err}), retry {attempt}/{}",
                    job.handle,
                    job.slave,
                    job.register,
                    config.retries
                );
            }
            result => {
                return result.map(|values| Reply {
                    slave: job.slave,
                    register: job.register,
                    values,
                })
            }
        }
    }
}

/// Gives a late reply `quiet` to arrive, then throws it away.
async fn discard_late_reply(port: &SharedPort, quiet: Duration) {
    time::sleep(quiet).await;
    if let Err(err) = port.discard_input() {
        log::warn!("Cannot flush serial input: {err}");
    }
}

/// Helper function to map a timed tokio result to our result.
async fn with_timeout<T>(
    timeout: Duration,
    attempt: usize,
    request: impl Future<Output = tokio_modbus::Result<T>>,
) -> Result<T> {
    match time::timeout(timeout, request).await {
        Ok(Ok(Ok(result))) => Ok(result),
        Ok(Ok(Err(err))) => Err(err.into()), // Modbus exception
        Ok(Err(err)) => Err(err.into()),     // IO error
        Err(_) => Err(Error::Timeout {
            timeout,
            attempts: attempt,
        }),
    }
}
