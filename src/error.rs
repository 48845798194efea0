//! Error types of the Modbus master.
use crate::protocol::WriteRole;
use std::{io, time::Duration};

/// `EIO`, reported by a tty whose device has gone away.
const EIO: i32 = 5;

/// Represents all possible errors of a request issued through the master.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The request was rejected because the link is not connected.
    #[error("Modbus link is not connected")]
    NotConnected,

    /// The transport could not enqueue the request on the serial link.
    #[error("Request could not be queued on the serial link")]
    NotQueued,

    /// No reply arrived within the configured timeout, including all retries.
    #[error("No reply within {timeout:?} after {attempts} attempt(s)")]
    Timeout { timeout: Duration, attempts: usize },

    /// The session was torn down before the request completed.
    #[error("Session closed before the request completed")]
    Cancelled,

    /// The event loop owning the master has shut down.
    #[error("Modbus event loop has shut down")]
    Closed,

    /// The operation does not apply to the given write role.
    #[error("{0} cannot be written with this operation")]
    UnsupportedRole(WriteRole),

    /// Wraps `ConnectError`.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Wraps `tokio_modbus::ExceptionCode`.
    #[error(transparent)]
    TokioExceptionError(#[from] tokio_modbus::ExceptionCode),

    /// Wraps `tokio_modbus::Error`.
    #[error(transparent)]
    TokioError(#[from] tokio_modbus::Error),
}

impl Error {
    /// Whether the transport may retry the request after this error.
    ///
    /// Exception responses are definitive answers of the slave and are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::TokioError(tokio_modbus::Error::Transport(_))
        )
    }

    /// Whether the serial link itself is gone, e.g. the adapter was unplugged.
    ///
    /// No further request can succeed on the session after such an error.
    pub fn is_link_lost(&self) -> bool {
        let Error::TokioError(tokio_modbus::Error::Transport(err)) = self else {
            return false;
        };
        matches!(
            err.kind(),
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::NotConnected
                | io::ErrorKind::UnexpectedEof
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
        ) || (cfg!(unix) && err.raw_os_error() == Some(EIO))
    }
}

/// Errors reported synchronously by a connect request.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Serial port name must not be empty")]
    EmptyPortName,
    #[error("Baud rate must be greater than zero")]
    InvalidBaudRate,
    #[error("Timeout must be greater than zero")]
    InvalidTimeout,
    #[error("Modbus event loop has shut down")]
    Closed,
}

/// The result type of master operations.
pub type Result<T> = std::result::Result<T, Error>;
