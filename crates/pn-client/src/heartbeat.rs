//! Heartbeat liveness timers
//!
//! Two one-shot timers, kept as deadlines and driven by [`Heartbeat::poll`]:
//!
//! - the send timer is armed when the server's heartbeat arrives and, when it
//!   fires, tells the session to answer with its own heartbeat;
//! - the check timer is armed by that send and compares the liveness deadline
//!   with the current time. Every received packet pushes the deadline out.
//!
//! A check that finds more than [`GAP_THRESHOLD`] left reschedules itself for
//! the remainder instead of timing out.

use std::time::Duration;

use tokio::time::Instant;

/// Slack below which a pending liveness deadline counts as expired
pub const GAP_THRESHOLD: Duration = Duration::from_millis(100);

/// What a heartbeat timer asks the session to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a HEARTBEAT packet to the server
    Send,
    /// The server missed its liveness deadline
    TimedOut,
}

/// Heartbeat state of one session
#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    send_at: Option<Instant>,
    check_at: Option<Instant>,
    deadline: Option<Instant>,
}

impl Heartbeat {
    /// Heartbeat with the given send interval; zero disables it
    ///
    /// The liveness timeout is twice the interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timeout: interval * 2,
            ..Self::default()
        }
    }

    /// Heartbeat from the handshake's `sys.heartbeat` value in seconds
    pub fn from_secs(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Self::default();
        }
        Self::new(Duration::from_millis((secs * 1000.0).round() as u64))
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current liveness deadline
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Any packet arrived
    pub fn on_packet(&mut self, now: Instant) {
        if self.is_enabled() {
            self.deadline = Some(now + self.timeout);
        }
    }

    /// A HEARTBEAT packet arrived
    pub fn on_heartbeat(&mut self, now: Instant) {
        if !self.is_enabled() {
            return;
        }
        self.check_at = None;
        if self.send_at.is_some() {
            return;
        }
        self.send_at = Some(now + self.interval);
    }

    /// Fire whichever timer is due at `now`
    pub fn poll(&mut self, now: Instant) -> Option<HeartbeatEvent> {
        if self.send_at.is_some_and(|at| at <= now) {
            self.send_at = None;
            self.deadline = Some(now + self.timeout);
            self.check_at = Some(now + self.timeout);
            return Some(HeartbeatEvent::Send);
        }

        if self.check_at.is_some_and(|at| at <= now) {
            let gap = self
                .deadline
                .map(|d| d.saturating_duration_since(now))
                .unwrap_or_default();
            if gap > GAP_THRESHOLD {
                self.check_at = Some(now + gap);
                return None;
            }
            self.check_at = None;
            return Some(HeartbeatEvent::TimedOut);
        }

        None
    }

    /// Earliest armed timer
    pub fn next_wakeup(&self) -> Option<Instant> {
        match (self.send_at, self.check_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Disarm both timers
    pub fn cancel(&mut self) {
        self.send_at = None;
        self.check_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_from_secs() {
        let hb = Heartbeat::from_secs(5.0);
        assert_eq!(hb.interval(), Duration::from_secs(5));
        assert_eq!(hb.timeout(), Duration::from_secs(10));

        assert_eq!(Heartbeat::from_secs(0.1).interval(), ms(100));
        assert!(!Heartbeat::from_secs(0.0).is_enabled());
    }

    #[test]
    fn test_disabled_never_arms() {
        let t0 = Instant::now();
        let mut hb = Heartbeat::default();
        hb.on_heartbeat(t0);
        hb.on_packet(t0);
        assert_eq!(hb.next_wakeup(), None);
        assert_eq!(hb.poll(t0 + Duration::from_secs(60)), None);
    }

    #[test]
    fn test_send_then_timeout() {
        let t0 = Instant::now();
        let mut hb = Heartbeat::new(ms(100));

        hb.on_heartbeat(t0);
        hb.on_packet(t0);
        assert_eq!(hb.next_wakeup(), Some(t0 + ms(100)));
        assert_eq!(hb.poll(t0 + ms(99)), None);

        assert_eq!(hb.poll(t0 + ms(100)), Some(HeartbeatEvent::Send));
        assert_eq!(hb.next_wakeup(), Some(t0 + ms(300)));

        assert_eq!(hb.poll(t0 + ms(300)), Some(HeartbeatEvent::TimedOut));
        assert_eq!(hb.next_wakeup(), None);
        assert_eq!(hb.poll(t0 + ms(1000)), None);
    }

    #[test]
    fn test_repeated_heartbeat_is_debounced() {
        let t0 = Instant::now();
        let mut hb = Heartbeat::new(ms(100));

        hb.on_heartbeat(t0);
        hb.on_heartbeat(t0 + ms(50));
        assert_eq!(hb.next_wakeup(), Some(t0 + ms(100)));
    }

    #[test]
    fn test_traffic_postpones_timeout() {
        let t0 = Instant::now();
        let mut hb = Heartbeat::new(ms(100));

        hb.on_heartbeat(t0);
        assert_eq!(hb.poll(t0 + ms(100)), Some(HeartbeatEvent::Send));

        // data arrives, liveness deadline moves to 450
        hb.on_packet(t0 + ms(250));
        assert_eq!(hb.poll(t0 + ms(300)), None);
        assert_eq!(hb.next_wakeup(), Some(t0 + ms(450)));
        assert_eq!(hb.poll(t0 + ms(450)), Some(HeartbeatEvent::TimedOut));
    }

    #[test]
    fn test_server_heartbeat_clears_check() {
        let t0 = Instant::now();
        let mut hb = Heartbeat::new(ms(100));

        hb.on_heartbeat(t0);
        assert_eq!(hb.poll(t0 + ms(100)), Some(HeartbeatEvent::Send));

        hb.on_heartbeat(t0 + ms(150));
        hb.on_packet(t0 + ms(150));
        assert_eq!(hb.next_wakeup(), Some(t0 + ms(250)));
        assert_eq!(hb.poll(t0 + ms(250)), Some(HeartbeatEvent::Send));
    }
}
