//! 노드/오리지네이터 설정
//!
//! 전역 변수 없이 생성자에 명시적으로 넘기는 값

use std::collections::HashMap;
use std::time::Duration;

use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_PORT};

/// HopRelay 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 페이로드 스트리밍 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 다음 홉 연결 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,

    /// 청크 단위 읽기/쓰기 및 하류 Response 대기 타임아웃 (밀리초)
    /// 0이면 무제한 대기
    pub io_timeout_ms: u64,

    /// 허용하는 최대 파일 이름 길이 (바이트)
    pub max_name_len: usize,

    /// 주소록에 없는 노드 ID에 붙이는 기본 포트
    pub default_port: u16,

    /// 노드 ID -> `host:port`
    pub peers: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout_ms: 5_000,
            io_timeout_ms: 30_000,
            max_name_len: 4096,
            default_port: DEFAULT_PORT,
            peers: HashMap::new(),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 주소록 항목 추가
    pub fn with_peer(mut self, node: impl Into<String>, addr: impl Into<String>) -> Self {
        self.peers.insert(node.into(), addr.into());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_ms > 0).then(|| Duration::from_millis(self.io_timeout_ms))
    }

    /// 노드 ID를 와이어에 실을 `host:port`로 변환
    ///
    /// 주소록 > ID 자체(`:` 포함 시) > `ID:default_port` 순서
    pub fn resolve(&self, node: &str) -> String {
        if let Some(addr) = self.peers.get(node) {
            return addr.clone();
        }
        if node.contains(':') {
            node.to_string()
        } else {
            format!("{}:{}", node, self.default_port)
        }
    }

    /// 같은 LAN 안의 노드용 설정
    pub fn lan() -> Self {
        Self {
            chunk_size: 64 * 1024,
            connect_timeout_ms: 1_000,
            io_timeout_ms: 5_000,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크(VPN 오버레이 등)용 설정
    pub fn unstable_network() -> Self {
        Self {
            chunk_size: 4096,
            connect_timeout_ms: 15_000,
            io_timeout_ms: 120_000,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_order() {
        let config = Config::default().with_peer("A", "10.0.0.1:4000");

        assert_eq!(config.resolve("A"), "10.0.0.1:4000");
        assert_eq!(config.resolve("10.0.0.2:5000"), "10.0.0.2:5000");
        assert_eq!(config.resolve("10.0.0.3"), format!("10.0.0.3:{}", DEFAULT_PORT));
    }

    #[test]
    fn test_io_timeout_disabled() {
        let config = Config {
            io_timeout_ms: 0,
            ..Config::default()
        };
        assert!(config.io_timeout().is_none());
        assert_eq!(Config::lan().io_timeout(), Some(Duration::from_secs(5)));
    }
}
