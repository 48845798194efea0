//! Recurring poll cycle over the register map.
//!
//! A cycle fires one read per monitored point and returns immediately; replies
//! are attributed later by the correlator. Cycles may overlap when replies are
//! slow, which is harmless because every reply identifies its own point.
use crate::{
    protocol::{MonitoredPoint, READ_REG_QUAN, REGISTER_MAP},
    transport::{RequestHandle, Transport},
};
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Shortest accepted poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Poll timer. Stopped until [`Poller::start`] is called.
#[derive(Debug)]
pub struct Poller {
    interval: Option<Interval>,
    period: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    pub fn new() -> Self {
        Self {
            interval: None,
            period: crate::config::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Starts the timer, or restarts it with the new period if already running.
    ///
    /// The first tick fires one period after this call. Must be called from
    /// within a tokio runtime.
    pub fn start(&mut self, period: Duration) {
        let period = if period < MIN_POLL_INTERVAL {
            log::warn!("Poll interval {period:?} too short, using {MIN_POLL_INTERVAL:?}");
            MIN_POLL_INTERVAL
        } else {
            period
        };
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        self.period = period;
        log::info!("Started polling every {period:?}");
    }

    /// Stops the timer. Stopping a stopped poller does nothing.
    pub fn stop(&mut self) {
        if self.interval.take().is_some() {
            log::info!("Stopped polling");
        }
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Completes at the next tick. Never completes while stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Issues one read per monitored point, in register map order.
///
/// Points whose request cannot be enqueued are skipped; the rest of the cycle
/// is unaffected.
pub fn issue_cycle<T: Transport>(transport: &mut T) -> Vec<(RequestHandle, &'static MonitoredPoint)> {
    let mut issued = Vec::with_capacity(REGISTER_MAP.len());
    for point in REGISTER_MAP.iter() {
        match transport.send_read(point.slave, point.register, READ_REG_QUAN) {
            Some(handle) => {
                log::trace!(
                    "Read {handle} issued for {} (slave {}, register {})",
                    point.role,
                    point.slave,
                    point.register
                );
                issued.push((handle, point));
            }
            None => log::warn!("Cannot send read request for {}", point.role),
        }
    }
    issued
}
