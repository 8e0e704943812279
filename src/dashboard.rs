//! Process-wide counters for operational monitoring
//!
//! Nothing here influences relay behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;

use crate::registry::{RoomRegistry, RoomStatus};

/// Number of recent errors kept for the status report
const MAX_RECENT_ERRORS: usize = 20;

/// Socket and message counters
#[derive(Debug)]
pub struct Dashboard {
    started_at: Instant,
    total_ws: AtomicU64,
    open_ws: AtomicU64,
    total_recv_msgs: AtomicU64,
    total_sent_msgs: AtomicU64,
    ws_errors: AtomicU64,
    recent_errors: Mutex<VecDeque<String>>,
}

/// Serializable snapshot of the dashboard and the rooms
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub uptime_secs: u64,
    pub total_ws: u64,
    pub open_ws: u64,
    pub total_recv_msgs: u64,
    pub total_sent_msgs: u64,
    pub ws_errors: u64,
    pub recent_errors: Vec<String>,
    pub room_count: usize,
    pub registered_ws: usize,
    pub rooms: Vec<RoomStatus>,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Dashboard {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_ws: AtomicU64::new(0),
            open_ws: AtomicU64::new(0),
            total_recv_msgs: AtomicU64::new(0),
            total_sent_msgs: AtomicU64::new(0),
            ws_errors: AtomicU64::new(0),
            recent_errors: Mutex::new(VecDeque::with_capacity(MAX_RECENT_ERRORS)),
        }
    }

    pub fn ws_opened(&self) {
        self.total_ws.fetch_add(1, Ordering::Relaxed);
        self.open_ws.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ws_closed(&self) {
        // Saturating: a close without a matching open must not wrap
        let _ = self
            .open_ws
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn message_received(&self) {
        self.total_recv_msgs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.total_sent_msgs.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a socket error and remember its description
    pub fn record_error(&self, error: impl std::fmt::Display) {
        self.ws_errors.fetch_add(1, Ordering::Relaxed);
        let mut recent = self
            .recent_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if recent.len() == MAX_RECENT_ERRORS {
            recent.pop_front();
        }
        recent.push_back(error.to_string());
    }

    pub fn report(&self, registry: &RoomRegistry) -> StatusReport {
        let recent_errors = self
            .recent_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();

        StatusReport {
            uptime_secs: self.started_at.elapsed().as_secs(),
            total_ws: self.total_ws.load(Ordering::Relaxed),
            open_ws: self.open_ws.load(Ordering::Relaxed),
            total_recv_msgs: self.total_recv_msgs.load(Ordering::Relaxed),
            total_sent_msgs: self.total_sent_msgs.load(Ordering::Relaxed),
            ws_errors: self.ws_errors.load(Ordering::Relaxed),
            recent_errors,
            room_count: registry.room_count(),
            registered_ws: registry.ws_count(),
            rooms: registry.rooms_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection;
    use crate::registry::RegistryConfig;
    use crate::types::{ClientId, RoomId};

    #[test]
    fn test_counters() {
        let dashboard = Dashboard::new();
        dashboard.ws_opened();
        dashboard.ws_opened();
        dashboard.ws_closed();
        dashboard.message_received();
        dashboard.message_sent();
        dashboard.message_sent();

        let report = dashboard.report(&RoomRegistry::new(RegistryConfig::default()));

        assert_eq!(report.total_ws, 2);
        assert_eq!(report.open_ws, 1);
        assert_eq!(report.total_recv_msgs, 1);
        assert_eq!(report.total_sent_msgs, 2);
        assert_eq!(report.room_count, 0);
    }

    #[test]
    fn test_open_ws_does_not_underflow() {
        let dashboard = Dashboard::new();
        dashboard.ws_closed();
        let report = dashboard.report(&RoomRegistry::new(RegistryConfig::default()));
        assert_eq!(report.open_ws, 0);
    }

    #[test]
    fn test_recent_errors_bounded() {
        let dashboard = Dashboard::new();
        for i in 0..MAX_RECENT_ERRORS + 5 {
            dashboard.record_error(format!("error {}", i));
        }

        let report = dashboard.report(&RoomRegistry::new(RegistryConfig::default()));

        assert_eq!(report.ws_errors, (MAX_RECENT_ERRORS + 5) as u64);
        assert_eq!(report.recent_errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(report.recent_errors[0], "error 5");
    }

    #[tokio::test]
    async fn test_report_includes_rooms() {
        let registry = RoomRegistry::new(RegistryConfig::default());
        let (conn, _inbox) = connection::channel(4);
        registry
            .register(&RoomId::from("r1"), &ClientId::from("a"), conn)
            .unwrap();

        let report = Dashboard::new().report(&registry);
        let json = serde_json::to_string(&report).unwrap();

        assert_eq!(report.registered_ws, 1);
        assert!(json.contains("\"room_id\":\"r1\""));
        assert!(json.contains("\"ws_count\":1"));
    }
}
