//! # HopRelay
//!
//! 측정된 링크 비용 위에서 최단 경로를 골라 평문 TCP로 파일을 릴레이
//!
//! ## 핵심 특징
//! - **경로 선택**: 지연(ms) 또는 대역폭 역수를 가중치로 하는 Dijkstra
//! - **단일 응답 체인**: 종단 노드의 Response가 모든 홉을 거쳐 그대로 돌아옴
//! - **스트리밍 전달**: 파일 전체를 메모리에 올리지 않고 청크 단위로 전달
//! - **고정 바이너리 프레임**: big-endian, 홉 주소는 22바이트 고정 필드
//! - **연결별 태스크**: JoinSet으로 감독되는 핸들러, 종료 시 모두 join

pub mod config;
pub mod error;
pub mod frame;
pub mod graph;
pub mod node;
pub mod originator;
pub mod path;
pub mod stats;
pub mod storage;
pub mod stream;

pub use config::Config;
pub use error::{Error, Result};
pub use frame::{Frame, Status};
pub use graph::{CostGraph, GraphSnapshot, Measurement, Metric};
pub use node::{NodeHandle, RelayNode};
pub use originator::{Comparison, Delivery, Originator};
pub use path::{shortest_path, Route};
pub use stats::{NodeStats, StatsSnapshot};
pub use storage::{FsStorage, MemoryStorage, Storage};

/// 기본 릴레이 포트
pub const DEFAULT_PORT: u16 = 3843;

/// 홉 주소 필드 길이 (바이트, 공백 패딩)
pub const HOP_ADDR_LEN: usize = 22;

/// 기본 스트리밍 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
