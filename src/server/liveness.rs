//! Liveness monitor
//!
//! Every sweep first evicts connections that did not answer the previous
//! sweep's ping, then marks all remaining connections not-alive and pings
//! them. A `pong` before the next sweep marks the connection alive again.
//!
//! ```text
//!   Alive ──sweep: ping, is_alive=false──► Pending ──pong──► Alive
//!                                            │
//!                                       next sweep
//!                                            ▼
//!                                   terminated + unregistered
//! ```
//!
//! Eviction is a hard close with no warning to the client.
//!
//! A silent connection is evicted on the second sweep after it registers,
//! so its time to eviction is between one and two intervals. A connection
//! that has been pinged at least once always gets one full interval to
//! answer. Connections that registered a moment before a sweep are pinged
//! right away and so are evicted soonest.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::protocol::Message;
use crate::registry::ConnectionId;

use super::context::ServerContext;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections terminated because they missed the previous ping
    pub evicted: Vec<ConnectionId>,
    /// Connections pinged in this sweep
    pub pinged: usize,
}

/// Periodic ping/evict cycle over all registered connections
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    context: Arc<ServerContext>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(context: Arc<ServerContext>, interval: Duration) -> Self {
        Self { context, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep
    pub async fn sweep(&self) -> SweepReport {
        let mut state = self.context.lock().await;
        let mut report = SweepReport::default();

        let dead: Vec<ConnectionId> = state
            .registry
            .iter()
            .filter(|c| !c.is_alive)
            .map(|c| c.id().clone())
            .collect();

        for id in dead {
            if let Some(connection) = state.registry.unregister(&id) {
                self.context.stats().connection_evicted();
                tracing::warn!(
                    conn_id = %id,
                    age_secs = connection.age().as_secs(),
                    "Connection missed ping, terminating"
                );
                report.evicted.push(id);
            }
        }

        let ping: Arc<str> = match Message::Ping.encode() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode ping");
                return report;
            }
        };

        for connection in state.registry.iter_mut() {
            connection.is_alive = false;
            connection.send_text(Arc::clone(&ping));
            report.pinged += 1;
        }

        tracing::debug!(
            evicted = report.evicted.len(),
            pinged = report.pinged,
            "Liveness sweep"
        );
        report
    }

    /// Spawn the sweep loop
    ///
    /// The first sweep runs one full interval after spawning. Returns a
    /// handle that can be used to abort the task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Outbound, SocketHandle};
    use crate::server::Dispatcher;

    fn setup() -> (Dispatcher, LivenessMonitor) {
        let context = Arc::new(ServerContext::new());
        let monitor = LivenessMonitor::new(Arc::clone(&context), Duration::from_secs(30));
        (Dispatcher::new(context), monitor)
    }

    #[tokio::test]
    async fn test_sweep_pings_and_marks_pending() {
        let (dispatcher, monitor) = setup();
        let (socket, mut rx) = SocketHandle::channel();
        let id = dispatcher.connect(socket).await;

        let report = monitor.sweep().await;
        assert!(report.evicted.is_empty());
        assert_eq!(report.pinged, 1);

        match rx.try_recv().unwrap() {
            Outbound::Text(text) => assert_eq!(Message::decode(&text).unwrap(), Message::Ping),
            other => panic!("expected ping, got {:?}", other),
        }
        let state = dispatcher.context().lock().await;
        assert!(!state.registry.find(&id).unwrap().is_alive());
    }

    #[tokio::test]
    async fn test_silent_connection_evicted_on_second_sweep() {
        let (dispatcher, monitor) = setup();
        let (socket, mut rx) = SocketHandle::channel();
        let id = dispatcher.connect(socket).await;

        // One sweep of silence is not enough
        monitor.sweep().await;
        assert_eq!(dispatcher.context().connection_count().await, 1);

        let report = monitor.sweep().await;
        assert_eq!(report.evicted, vec![id.clone()]);
        assert_eq!(report.pinged, 0);
        assert_eq!(dispatcher.context().connection_count().await, 0);

        // ping from the first sweep, then the hard close
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Text(_)));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Terminate);
        assert_eq!(dispatcher.context().stats().snapshot().connections_evicted, 1);
    }

    #[tokio::test]
    async fn test_pong_keeps_connection() {
        let (dispatcher, monitor) = setup();
        let (socket, _rx) = SocketHandle::channel();
        let id = dispatcher.connect(socket).await;

        for _ in 0..5 {
            monitor.sweep().await;
            dispatcher.handle_frame(&id, r#"{"type":"pong"}"#).await;
        }
        assert_eq!(dispatcher.context().connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_evicted_connection_stops_receiving_broadcasts() {
        let (dispatcher, monitor) = setup();
        let (silent, mut silent_rx) = SocketHandle::channel();
        let (writer, _writer_rx) = SocketHandle::channel();
        let silent_id = dispatcher.connect(silent).await;
        let writer_id = dispatcher.connect(writer).await;

        dispatcher.handle_frame(&silent_id, r#"{"type":"on","key":["k"]}"#).await;
        monitor.sweep().await;
        dispatcher.handle_frame(&writer_id, r#"{"type":"pong"}"#).await;
        monitor.sweep().await;

        while silent_rx.try_recv().is_ok() {}
        dispatcher
            .handle_frame(&writer_id, r#"{"type":"update","key":["k"],"data":1}"#)
            .await;
        assert!(silent_rx.try_recv().is_err());
        assert_eq!(dispatcher.context().connection_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_registration_gets_one_full_interval() {
        let (dispatcher, monitor) = setup();
        let interval = monitor.interval();
        let handle = monitor.spawn();

        // Register just before the first sweep
        time::sleep(interval - Duration::from_secs(1)).await;
        let (socket, _rx) = SocketHandle::channel();
        let id = dispatcher.connect(socket).await;

        time::sleep(Duration::from_secs(2)).await;
        {
            let state = dispatcher.context().lock().await;
            assert!(!state.registry.find(&id).unwrap().is_alive());
        }

        // Still present until a full interval after the ping
        time::sleep(interval - Duration::from_secs(2)).await;
        assert_eq!(dispatcher.context().connection_count().await, 1);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(dispatcher.context().connection_count().await, 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_evicts_after_two_intervals() {
        let (dispatcher, monitor) = setup();
        let interval = monitor.interval();
        let (socket, _rx) = SocketHandle::channel();
        dispatcher.connect(socket).await;

        let handle = monitor.spawn();

        time::sleep(interval + Duration::from_secs(1)).await;
        assert_eq!(dispatcher.context().connection_count().await, 1);

        time::sleep(interval).await;
        assert_eq!(dispatcher.context().connection_count().await, 0);

        handle.abort();
    }
}
