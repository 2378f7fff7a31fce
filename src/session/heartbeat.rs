//! Heart-beating
//!
//! Each direction is independent:
//! - server → client: the broker writes a single EOL every `server_ms`.
//! - client → server: the broker expects inbound traffic at least every
//!   `client_ms` (plus the configured error margin) and closes the
//!   connection when it does not get it.
//!
//! Timers run as their own tokio tasks, outside the connection's read loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::broker::events::{BrokerEvent, EventBus};
use crate::client::ClientHandle;
use crate::utils::error::BrokerError;

/// Resolution of the liveness check.
const LIVENESS_TICK: Duration = Duration::from_millis(1);

/// Agreed heart-beat cadence for one session; zero disables a direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiatedHeartbeat {
    /// Interval at which the broker pings the client.
    pub server_ms: u64,
    /// Interval at which the client must show activity.
    pub client_ms: u64,
}

impl NegotiatedHeartbeat {
    /// `configured` is the broker's `[send_ms, receive_ms]`; `client` is the
    /// CONNECT frame's `heart-beat` (`can_send_ms`, `wants_ms`).
    pub fn negotiate(configured: [u64; 2], client: (u64, u64)) -> Self {
        let [server_send, server_receive] = configured;
        let (client_send, client_receive) = client;

        let server_ms = if server_send > 0 && client_receive > 0 {
            server_send.max(client_receive)
        } else {
            0
        };
        let client_ms = if client_send > 0 && server_receive > 0 {
            client_send.max(server_receive)
        } else {
            0
        };
        Self {
            server_ms,
            client_ms,
        }
    }

    /// Value of the CONNECTED frame's `heart-beat` header.
    pub fn to_header(self) -> String {
        format!("{},{}", self.server_ms, self.client_ms)
    }

    pub fn is_disabled(self) -> bool {
        self.server_ms == 0 && self.client_ms == 0
    }
}

/// Parse a `heart-beat: x,y` header. Anything malformed means `0,0`.
pub fn parse_heart_beat(header: Option<&str>) -> (u64, u64) {
    let Some(value) = header else {
        return (0, 0);
    };
    let mut parts = value.split(',').map(|p| p.trim().parse::<u64>());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y)), None) => (x, y),
        _ => (0, 0),
    }
}

/// Last inbound activity on a connection.
///
/// Written by the read path, read by the liveness timer.
#[derive(Debug)]
pub struct Activity {
    origin: Instant,
    last_nanos: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_nanos: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let nanos = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_nanos.store(nanos, Ordering::Release);
    }

    pub fn last(&self) -> Instant {
        self.origin + Duration::from_nanos(self.last_nanos.load(Ordering::Acquire))
    }

    pub fn idle(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last())
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Timers for one session. Dropping the monitor cancels them.
#[derive(Debug, Default)]
pub struct HeartbeatMonitor {
    tasks: Vec<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the directions enabled in `heartbeat`. Any previous timers are
    /// cancelled first.
    pub fn start(
        &mut self,
        session_id: &str,
        heartbeat: NegotiatedHeartbeat,
        error_margin: Duration,
        client: ClientHandle,
        activity: Arc<Activity>,
        events: EventBus,
    ) {
        self.turn_off();

        if heartbeat.server_ms > 0 {
            let period = Duration::from_millis(heartbeat.server_ms);
            self.tasks.push(tokio::spawn(send_pings(
                session_id.to_string(),
                period,
                client.clone(),
            )));
        }

        if heartbeat.client_ms > 0 {
            let period = Duration::from_millis(heartbeat.client_ms);
            activity.touch();
            self.tasks.push(tokio::spawn(watch_liveness(
                session_id.to_string(),
                period + error_margin,
                client,
                activity,
                events,
            )));
        }
    }

    pub fn is_active(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Cancel all timers. Safe to call any number of times.
    pub fn turn_off(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.turn_off();
    }
}

async fn send_pings(session_id: String, period: Duration, client: ClientHandle) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !client.is_open() {
            break;
        }
        debug!("PING {session_id}");
        if !client.ping() {
            break;
        }
    }
}

async fn watch_liveness(
    session_id: String,
    limit: Duration,
    client: ClientHandle,
    activity: Arc<Activity>,
    events: EventBus,
) {
    loop {
        // re-arm from the latest activity so drift does not accumulate; the
        // limit itself is still allowed, so wake one tick past it
        tokio::time::sleep_until(activity.last() + limit + LIVENESS_TICK).await;
        let idle = activity.idle();
        if idle > limit {
            let err = BrokerError::LivenessTimeout(idle);
            warn!("Health check failed for {session_id}: {err}; closing");
            events.emit(BrokerEvent::Error {
                session_id: Some(session_id.clone()),
                message: err.to_string(),
            });
            client.close();
            break;
        }
        debug!("Health check ok for {session_id}, idle {idle:?}");
    }
}
