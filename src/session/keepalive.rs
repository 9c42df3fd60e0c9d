//! Keep-alive monitor.
//!
//! Decides when to send PINGREQ and when a missing PINGRESP means the
//! connection is dead. Purely a state machine over instants; the connection
//! driver owns the timer.

use std::time::Duration;

use tokio::time::Instant;

/// Share of the keep-alive interval after which an idle connection pings.
const PING_THRESHOLD_NUM: u32 = 3;
const PING_THRESHOLD_DEN: u32 = 4;

/// What the driver should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveAction {
    /// Nothing to do before this instant.
    WaitUntil(Instant),
    /// Send a PINGREQ now and report it with [`KeepAlive::on_ping_sent`].
    SendPing,
    /// A PINGRESP is overdue; the connection must be dropped.
    Dead,
    /// Keep-alive is switched off (interval 0).
    Disabled,
}

/// Keep-alive state for one connection.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    interval: Duration,
    last_sent: Instant,
    ping_sent_at: Option<Instant>,
}

impl KeepAlive {
    /// Start monitoring with the negotiated interval.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_sent: now,
            ping_sent_at: None,
        }
    }

    /// Idle time after which a ping is sent.
    pub fn ping_after(&self) -> Duration {
        self.interval * PING_THRESHOLD_NUM / PING_THRESHOLD_DEN
    }

    /// Time allowed for PINGRESP after a PINGREQ.
    pub fn grace(&self) -> Duration {
        self.interval / 2
    }

    /// Record any outbound packet.
    pub fn on_packet_sent(&mut self, now: Instant) {
        self.last_sent = now;
    }

    /// Record that a PINGREQ went out.
    pub fn on_ping_sent(&mut self, now: Instant) {
        self.last_sent = now;
        self.ping_sent_at = Some(now);
    }

    /// Record a PINGRESP.
    pub fn on_pingresp(&mut self) {
        self.ping_sent_at = None;
    }

    /// A PINGREQ is awaiting its response.
    pub fn ping_outstanding(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    /// Evaluate the state at `now`.
    pub fn poll(&self, now: Instant) -> KeepAliveAction {
        if self.interval.is_zero() {
            return KeepAliveAction::Disabled;
        }

        if let Some(sent) = self.ping_sent_at {
            let deadline = sent + self.grace();
            return if now >= deadline {
                KeepAliveAction::Dead
            } else {
                KeepAliveAction::WaitUntil(deadline)
            };
        }

        let due = self.last_sent + self.ping_after();
        if now >= due {
            KeepAliveAction::SendPing
        } else {
            KeepAliveAction::WaitUntil(due)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ping_cycle() {
        let start = Instant::now();
        let mut ka = KeepAlive::new(Duration::from_secs(60), start);

        assert_eq!(
            ka.poll(start),
            KeepAliveAction::WaitUntil(start + Duration::from_secs(45))
        );
        assert_eq!(ka.poll(start + Duration::from_secs(45)), KeepAliveAction::SendPing);

        let pinged = start + Duration::from_secs(45);
        ka.on_ping_sent(pinged);
        assert!(ka.ping_outstanding());
        assert_eq!(
            ka.poll(pinged),
            KeepAliveAction::WaitUntil(pinged + Duration::from_secs(30))
        );

        ka.on_pingresp();
        assert_eq!(
            ka.poll(pinged + Duration::from_secs(1)),
            KeepAliveAction::WaitUntil(pinged + Duration::from_secs(45))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_traffic_defers_ping() {
        let start = Instant::now();
        let mut ka = KeepAlive::new(Duration::from_secs(20), start);

        ka.on_packet_sent(start + Duration::from_secs(10));
        assert_eq!(
            ka.poll(start + Duration::from_secs(15)),
            KeepAliveAction::WaitUntil(start + Duration::from_secs(25))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pingresp_is_dead() {
        let start = Instant::now();
        let mut ka = KeepAlive::new(Duration::from_secs(10), start);
        ka.on_ping_sent(start);

        assert!(matches!(
            ka.poll(start + Duration::from_secs(4)),
            KeepAliveAction::WaitUntil(_)
        ));
        assert_eq!(ka.poll(start + Duration::from_secs(5)), KeepAliveAction::Dead);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_disables() {
        let start = Instant::now();
        let ka = KeepAlive::new(Duration::ZERO, start);
        assert_eq!(ka.poll(start + Duration::from_secs(3600)), KeepAliveAction::Disabled);
    }
}
