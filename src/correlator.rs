//! Attributes read replies to monitored points and updates the published state.
use crate::{
    protocol::{self as proto, MonitoredPoint, ReadRole},
    state::{Notification, PublishedState, Reading},
    transport::Reply,
};

/// Applies a successful read reply to `state`.
///
/// The reply is matched against the register map by its slave and starting
/// register. Replies matching no point, or carrying no registers, are dropped
/// and `None` is returned. Otherwise the notifications raised by the update are
/// returned, possibly none.
pub fn correlate(state: &mut PublishedState, reply: &Reply) -> Option<Vec<Notification>> {
    let Some(point) = proto::find_point(reply.slave, reply.register) else {
        log::trace!(
            "Dropping reply from slave {} register {}: no monitored point",
            reply.slave,
            reply.register
        );
        return None;
    };
    let Some(&raw) = reply.values.first() else {
        log::trace!("Dropping empty reply for {}", point.role);
        return None;
    };
    Some(apply(state, point, raw))
}

/// Stores the raw register value of `point` and reports what changed.
pub fn apply(state: &mut PublishedState, point: &MonitoredPoint, raw: u16) -> Vec<Notification> {
    let mut notifications = Vec::new();

    if point.latch && !state.has_data(point.role) {
        match point.role {
            ReadRole::FanState => state.has_fan_state_data = true,
            ReadRole::HighTemp => state.has_high_temp_data = true,
            _ => {}
        }
        notifications.push(Notification::DataAvailable(point.role));
    }

    let reading = match point.role {
        ReadRole::Voltage => Reading::Voltage(point.decode(raw)),
        ReadRole::Current => Reading::Current(point.decode(raw)),
        ReadRole::Power => Reading::Power(point.decode(raw)),
        ReadRole::FanState => Reading::FanState(raw),
        ReadRole::HighTemp => Reading::HighTempState(raw),
    };
    if state.reading(point.role) != reading {
        match reading {
            Reading::Voltage(v) => state.voltage = v,
            Reading::Current(a) => state.current = a,
            Reading::Power(kw) => state.power = kw,
            Reading::FanState(raw) => state.fan_state = raw,
            Reading::HighTempState(raw) => state.high_temp_state = raw,
        }
        notifications.push(Notification::ValueChanged(reading));
    }

    if !notifications.is_empty() {
        state.version += 1;
    }
    log::trace!("{}: raw {raw} -> {reading}", point.role);
    notifications
}
