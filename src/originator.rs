//! 전송 시작측
//!
//! 경로의 첫 홉에만 연결하고, 체인 전체의 결과는 Response 하나로 돌아온다.

use std::path::Path;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::frame::{Frame, Status};
use crate::graph::CostGraph;
use crate::path::{shortest_path, Route};
use crate::stats::throughput_mbps;
use crate::stream::{copy_exact, with_timeout, write_all};
use crate::{Config, Error, Result};

/// 완료된 전송 결과
#[derive(Debug, Clone)]
pub struct Delivery {
    pub route: Route,
    /// 종단 노드가 돌려준 메시지
    pub message: String,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Delivery {
    /// 처리율 (MB/s)
    pub fn throughput_mbps(&self) -> f64 {
        throughput_mbps(self.bytes, self.elapsed)
    }
}

/// 최적 경로와 직접 경로 비교 결과
#[derive(Debug, Clone)]
pub struct Comparison {
    pub optimal: Delivery,
    pub direct: Delivery,
}

impl Comparison {
    /// 직접 경로 소요 시간 / 최적 경로 소요 시간
    pub fn speedup(&self) -> f64 {
        let optimal = self.optimal.elapsed.as_secs_f64();
        if optimal == 0.0 {
            return 0.0;
        }
        self.direct.elapsed.as_secs_f64() / optimal
    }
}

/// 전송 시작자
#[derive(Debug, Clone, Default)]
pub struct Originator {
    config: Config,
}

impl Originator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 네트워크 I/O 전에 경로 계산
    pub fn plan(&self, graph: &CostGraph, origin: &str, destination: &str) -> Result<Route> {
        let route = shortest_path(graph, origin, destination)?;
        info!("Planned route: {}", route);
        Ok(route)
    }

    /// 첫 홉에 보낼 헤더 구성
    ///
    /// 와이어에 실리는 홉 주소는 연결 전에 모두 검증된다
    fn header(&self, route: &Route, name: &str, size: u64) -> Result<(String, Frame)> {
        if route.nodes().len() < 2 {
            return Err(Error::InvalidRoute(format!(
                "route needs at least 2 nodes, got {}",
                route.nodes().len()
            )));
        }

        let hops = route.hops();
        let first = self.config.resolve(&hops[0]);
        let frame = if route.is_direct() {
            Frame::Send {
                filename: name.to_string(),
                size,
            }
        } else {
            Frame::Relay {
                filename: name.to_string(),
                hops: hops[1..].iter().map(|h| self.config.resolve(h)).collect(),
                size,
            }
        };
        Ok((first, frame))
    }

    async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let stream = with_timeout(Some(self.config.connect_timeout()), async {
            Ok::<_, Error>(TcpStream::connect(addr).await?)
        })
        .await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// 임의의 reader에서 `size` 바이트를 경로를 따라 전송
    pub async fn send<R>(&self, route: &Route, name: &str, reader: &mut R, size: u64) -> Result<Delivery>
    where
        R: AsyncRead + Unpin,
    {
        let (first, header) = self.header(route, name, size)?;
        let encoded = header.encode()?;
        let limit = self.config.io_timeout();

        debug!("{} 전송 시작: {} via {}", name, header, first);
        let started = Instant::now();

        let mut stream = self.connect(&first).await?;
        write_all(&mut stream, &encoded, limit).await?;
        let crc = copy_exact(reader, &mut stream, size, self.config.chunk_size, limit).await?;
        stream.flush().await?;

        let (status, message) =
            with_timeout(limit, Frame::read_response(&mut stream, self.config.max_name_len)).await?;
        let elapsed = started.elapsed();

        match status {
            Status::Success => {
                let delivery = Delivery {
                    route: route.clone(),
                    message,
                    bytes: size,
                    elapsed,
                };
                info!(
                    "Delivered {} ({} bytes, crc32={:08X}) via {} in {:.3}s ({:.2} MB/s)",
                    name,
                    size,
                    crc,
                    route,
                    elapsed.as_secs_f64(),
                    delivery.throughput_mbps()
                );
                Ok(delivery)
            }
            Status::Failure => {
                warn!("Delivery of {} failed: {}", name, message);
                Err(Error::DownstreamFailure { message })
            }
        }
    }

    /// 로컬 파일을 파일 이름(경로 제외)으로 전송
    pub async fn send_file(&self, route: &Route, path: impl AsRef<Path>) -> Result<Delivery> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::LocalIo(format!("no usable file name: {}", path.display())))?;

        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::LocalIo(format!("{}: {}", path.display(), e)))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| Error::LocalIo(format!("{}: {}", path.display(), e)))?
            .len();

        self.send(route, name, &mut file, size).await
    }

    /// 계산된 경로와 직접 경로로 각각 전송해 비교
    ///
    /// 두 번째 전송은 같은 이름에 같은 바이트를 덮어쓴다
    pub async fn compare(&self, route: &Route, path: impl AsRef<Path>) -> Result<Comparison> {
        let path = path.as_ref();
        let optimal = self.send_file(route, path).await?;

        let direct_route = Route::direct(route.origin(), route.destination());
        let direct = self.send_file(&direct_route, path).await?;

        let comparison = Comparison { optimal, direct };
        info!(
            "Optimal {:.3}s vs direct {:.3}s (speedup {:.2}x)",
            comparison.optimal.elapsed.as_secs_f64(),
            comparison.direct.elapsed.as_secs_f64(),
            comparison.speedup()
        );
        Ok(comparison)
    }

    /// 노드에 저장된 파일을 요청해 `sink`로 받음
    ///
    /// 받은 바이트 수 반환
    pub async fn fetch<W>(&self, node: &str, name: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let addr = self.config.resolve(node);
        let limit = self.config.io_timeout();

        let mut stream = self.connect(&addr).await?;
        let request = Frame::Request {
            filename: name.to_string(),
        };
        with_timeout(limit, request.write_to(&mut stream)).await?;

        let reply = with_timeout(limit, Frame::read_from(&mut stream, self.config.max_name_len)).await?;
        match reply {
            Some(Frame::Send { size, .. }) => {
                let crc = copy_exact(&mut stream, sink, size, self.config.chunk_size, limit).await?;
                sink.flush().await?;
                info!("Fetched {} from {} ({} bytes, crc32={:08X})", name, addr, size, crc);
                Ok(size)
            }
            Some(Frame::Response {
                status: Status::Failure,
                message,
            }) => Err(Error::DownstreamFailure { message }),
            Some(other) => Err(Error::UnexpectedFrame {
                expected: "Send".into(),
                got: other.kind().into(),
            }),
            None => Err(Error::PrematureClose),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::RelayNode;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[test]
    fn test_header_direct_and_relay() {
        let originator = Originator::new(Config::default().with_peer("B", "10.0.0.2:3843"));

        let direct = Route::new(vec!["A".into(), "B".into()], 1.0).unwrap();
        let (first, frame) = originator.header(&direct, "f", 3).unwrap();
        assert_eq!(first, "10.0.0.2:3843");
        assert_eq!(
            frame,
            Frame::Send {
                filename: "f".into(),
                size: 3
            }
        );

        let chain = Route::new(vec!["A".into(), "B".into(), "C".into(), "D".into()], 2.0).unwrap();
        let (first, frame) = originator.header(&chain, "f", 3).unwrap();
        assert_eq!(first, "10.0.0.2:3843");
        assert_eq!(
            frame,
            Frame::Relay {
                filename: "f".into(),
                hops: vec!["C:3843".into(), "D:3843".into()],
                size: 3
            }
        );
    }

    #[tokio::test]
    async fn test_long_hop_rejected_before_connecting() {
        // 첫 홉에 리스너가 없어도 주소 검증이 먼저 실패해야 함
        let originator = Originator::new(
            Config::default()
                .with_peer("B", "127.0.0.1:1")
                .with_peer("C", "a-very-long-relay-hostname.example:3843"),
        );
        let route = Route::new(vec!["A".into(), "B".into(), "C".into()], 1.0).unwrap();

        let data = b"payload";
        let err = originator
            .send(&route, "f", &mut &data[..], data.len() as u64)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HopAddressTooLong { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_direct_send_and_fetch() {
        let storage = MemoryStorage::new();
        let node = Arc::new(RelayNode::new(Config::lan(), storage.clone()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let handle = node.spawn(listener).unwrap();
        let addr = handle.local_addr().to_string();

        let originator = Originator::new(Config::lan().with_peer("B", addr.clone()));
        let route = Route::new(vec!["A".into(), "B".into()], 1.0).unwrap();

        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let delivery = originator
            .send(&route, "blob.bin", &mut &data[..], data.len() as u64)
            .await
            .unwrap();
        assert_eq!(delivery.bytes, 20_000);
        assert_eq!(delivery.message, "file received: blob.bin (20000 bytes)");
        assert_eq!(storage.get("blob.bin").unwrap().as_ref(), &data[..]);

        let mut fetched = Vec::new();
        let size = originator.fetch("B", "blob.bin", &mut fetched).await.unwrap();
        assert_eq!(size, 20_000);
        assert_eq!(fetched, data);

        let err = originator.fetch("B", "nope.bin", &mut Vec::new()).await.unwrap_err();
        match err {
            Error::DownstreamFailure { message } => assert_eq!(message, "file not found: nope.bin"),
            other => panic!("unexpected error: {:?}", other),
        }

        handle.shutdown().await.unwrap();
    }

    #[test]
    fn test_plan_unreachable() {
        let graph = CostGraph::new();
        graph.add_or_update_edge("A", "B", 1.0).unwrap();
        graph.add_node("Z");

        let originator = Originator::default();
        assert!(originator.plan(&graph, "A", "B").unwrap().is_direct());
        assert!(matches!(
            originator.plan(&graph, "A", "Z"),
            Err(Error::Unreachable { .. })
        ));
    }

    #[test]
    fn test_speedup() {
        let route = Route::direct("A", "B");
        let delivery = |ms| Delivery {
            route: route.clone(),
            message: String::new(),
            bytes: 1,
            elapsed: Duration::from_millis(ms),
        };
        let comparison = Comparison {
            optimal: delivery(100),
            direct: delivery(250),
        };
        assert!((comparison.speedup() - 2.5).abs() < 1e-9);
    }
}
