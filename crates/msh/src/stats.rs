use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use msh_config::LogType;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToServer,
    ToClient,
}

/// Bytes moved since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Traffic {
    pub to_server: u64,
    pub to_clients: u64,
}

impl Traffic {
    pub fn is_empty(&self) -> bool {
        self.to_server == 0 && self.to_clients == 0
    }
}

/// Counters shared by every connection task.
#[derive(Debug, Default)]
pub struct Stats {
    track_traffic: bool,
    traffic: Mutex<Traffic>,
    connections: AtomicU64,
}

impl Stats {
    pub fn new(track_traffic: bool) -> Self {
        Self {
            track_traffic,
            ..Default::default()
        }
    }

    pub fn connection_accepted(&self) -> u64 {
        self.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn record(&self, direction: Direction, bytes: usize) {
        if !self.track_traffic {
            return;
        }
        if let Ok(mut traffic) = self.traffic.lock() {
            match direction {
                Direction::ToServer => traffic.to_server += bytes as u64,
                Direction::ToClient => traffic.to_clients += bytes as u64,
            }
        }
    }

    pub fn traffic(&self) -> Traffic {
        self.traffic.lock().map(|t| *t).unwrap_or_default()
    }

    /// Returns the counters and zeroes them.
    pub fn take_traffic(&self) -> Traffic {
        self.traffic
            .lock()
            .map(|mut t| std::mem::take(&mut *t))
            .unwrap_or_default()
    }
}

/// Logs proxied throughput once per second while there is any.
pub async fn print_data_usage(stats: std::sync::Arc<Stats>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let traffic = stats.take_traffic();
                if !traffic.is_empty() {
                    info!(
                        log_type = LogType::Telemetry.as_str(),
                        "data usage: {:.3} KB/s to clients | {:.3} KB/s to server",
                        traffic.to_clients as f64 / 1024.0,
                        traffic.to_server as f64 / 1024.0
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_take() {
        let stats = Stats::new(true);
        stats.record(Direction::ToServer, 100);
        stats.record(Direction::ToClient, 300);
        stats.record(Direction::ToClient, 24);

        assert_eq!(
            stats.take_traffic(),
            Traffic {
                to_server: 100,
                to_clients: 324
            }
        );
        assert!(stats.traffic().is_empty());
    }

    #[test]
    fn test_disabled_tracking() {
        let stats = Stats::new(false);
        stats.record(Direction::ToServer, 100);
        assert!(stats.traffic().is_empty());
        assert_eq!(stats.connection_accepted(), 1);
        assert_eq!(stats.connections(), 1);
    }
}
