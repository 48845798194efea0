//! Write operations and their completion reporting.
use crate::{
    error::{Error, Result},
    protocol::{self as proto, WriteRole},
};
use std::fmt;
use tokio::sync::oneshot;

/// A write command, carrying its parameters in engineering units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteOp {
    /// Voltage setpoint in V.
    Voltage(f64),
    /// Current setpoint in A.
    Current(f64),
    /// Voltage and current setpoints written as one request spanning both registers.
    VoltageAndCurrent { voltage: f64, current: f64 },
    FanState(bool),
    Unload,
    /// Single register write to an arbitrary slave.
    RawRegister { slave: u8, register: u16, value: f64 },
}

/// Wire form of a write: slave, starting register and raw register values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub slave: u8,
    pub register: u16,
    pub values: Vec<u16>,
}

impl WriteOp {
    /// Single scalar setpoint write.
    pub fn engineering_value(role: WriteRole, value: f64) -> Result<Self> {
        match role {
            WriteRole::Voltage => Ok(WriteOp::Voltage(value)),
            WriteRole::Current => Ok(WriteOp::Current(value)),
            role => Err(Error::UnsupportedRole(role)),
        }
    }

    /// Combined voltage and current write.
    pub fn pair(voltage: f64, current: f64) -> Self {
        WriteOp::VoltageAndCurrent { voltage, current }
    }

    /// On/off control write.
    pub fn discrete(role: WriteRole, on: bool) -> Result<Self> {
        match role {
            WriteRole::Fan => Ok(WriteOp::FanState(on)),
            role => Err(Error::UnsupportedRole(role)),
        }
    }

    /// Parameterless control write.
    pub fn fixed(role: WriteRole) -> Result<Self> {
        match role {
            WriteRole::Unload => Ok(WriteOp::Unload),
            role => Err(Error::UnsupportedRole(role)),
        }
    }

    /// Converts the operation into raw register units.
    pub fn request(&self) -> WriteRequest {
        let target = |role| {
            let point = proto::write_point_for(role);
            (point.slave, point.register)
        };
        let ((slave, register), values) = match *self {
            WriteOp::Voltage(v) => (target(WriteRole::Voltage), vec![proto::encode_raw(v)]),
            WriteOp::Current(a) => (target(WriteRole::Current), vec![proto::encode_raw(a)]),
            // Current follows voltage, one request writes both.
            WriteOp::VoltageAndCurrent { voltage, current } => (
                target(WriteRole::Voltage),
                vec![proto::encode_raw(voltage), proto::encode_raw(current)],
            ),
            WriteOp::FanState(on) => (target(WriteRole::Fan), vec![proto::encode_fan_state(on)]),
            WriteOp::Unload => (target(WriteRole::Unload), vec![proto::WRITE_UNLOAD_REG_DATA]),
            WriteOp::RawRegister {
                slave,
                register,
                value,
            } => ((slave, register), vec![proto::encode_raw(value)]),
        };
        WriteRequest {
            slave,
            register,
            values,
        }
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOp::Voltage(v) => write!(f, "voltage setpoint {v} V"),
            WriteOp::Current(a) => write!(f, "current setpoint {a} A"),
            WriteOp::VoltageAndCurrent { voltage, current } => {
                write!(f, "setpoints {voltage} V / {current} A")
            }
            WriteOp::FanState(on) => write!(f, "fan {}", if *on { "on" } else { "off" }),
            WriteOp::Unload => f.write_str("unload"),
            WriteOp::RawRegister {
                slave,
                register,
                value,
            } => write!(f, "slave {slave} register {register} = {value}"),
        }
    }
}

/// Outcome of a write, echoing the operation it belongs to.
#[derive(Debug)]
pub struct WriteCompletion {
    pub op: WriteOp,
    pub result: Result<()>,
}

impl WriteCompletion {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Receiving end of an in-flight write. Fires exactly once.
#[derive(Debug)]
pub struct PendingWrite {
    op: WriteOp,
    rx: oneshot::Receiver<WriteCompletion>,
}

impl PendingWrite {
    pub(crate) fn channel(op: WriteOp) -> (oneshot::Sender<WriteCompletion>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { op, rx })
    }

    pub fn op(&self) -> WriteOp {
        self.op
    }

    /// Waits for the slave to acknowledge the write.
    ///
    /// If the session is torn down first, the completion reports [`Error::Cancelled`].
    pub async fn completion(self) -> WriteCompletion {
        let op = self.op;
        self.rx.await.unwrap_or(WriteCompletion {
            op,
            result: Err(Error::Cancelled),
        })
    }

    /// Returns the completion if it already arrived.
    pub fn try_completion(&mut self) -> Option<WriteCompletion> {
        match self.rx.try_recv() {
            Ok(completion) => Some(completion),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(WriteCompletion {
                op: self.op,
                result: Err(Error::Cancelled),
            }),
        }
    }
}
