//! 전송 통계

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 노드 누적 카운터 (핸들러 태스크 간 공유)
#[derive(Debug)]
pub struct NodeStats {
    started: Instant,
    connections: AtomicU64,
    files_stored: AtomicU64,
    files_served: AtomicU64,
    relays_forwarded: AtomicU64,
    failures: AtomicU64,
    bytes_stored: AtomicU64,
    bytes_forwarded: AtomicU64,
}

impl Default for NodeStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            connections: AtomicU64::new(0),
            files_stored: AtomicU64::new(0),
            files_served: AtomicU64::new(0),
            relays_forwarded: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            bytes_stored: AtomicU64::new(0),
            bytes_forwarded: AtomicU64::new(0),
        }
    }
}

impl NodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self, bytes: u64) {
        self.files_stored.fetch_add(1, Ordering::Relaxed);
        self.bytes_stored.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_served(&self) {
        self.files_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self, bytes: u64) {
        self.relays_forwarded.fetch_add(1, Ordering::Relaxed);
        self.bytes_forwarded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// 실패 Response를 상류로 보낸 횟수
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started.elapsed(),
            connections: self.connections.load(Ordering::Relaxed),
            files_stored: self.files_stored.load(Ordering::Relaxed),
            files_served: self.files_served.load(Ordering::Relaxed),
            relays_forwarded: self.relays_forwarded.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            bytes_stored: self.bytes_stored.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
        }
    }
}

/// 특정 시점의 카운터 값
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub connections: u64,
    pub files_stored: u64,
    pub files_served: u64,
    pub relays_forwarded: u64,
    pub failures: u64,
    pub bytes_stored: u64,
    pub bytes_forwarded: u64,
}

impl StatsSnapshot {
    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Uptime: {:.1}s | Connections: {} | Stored: {} ({} bytes) | Served: {} | Relayed: {} ({} bytes) | Failures: {}",
            self.uptime.as_secs_f64(),
            self.connections,
            self.files_stored,
            self.bytes_stored,
            self.files_served,
            self.relays_forwarded,
            self.bytes_forwarded,
            self.failures,
        )
    }
}

/// 처리율 (MB/s)
pub fn throughput_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    bytes as f64 / secs / 1_000_000.0
}
