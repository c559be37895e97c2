//! 비용 그래프
//!
//! 노드 간 측정값(지연/대역폭)을 가중치로 가지는 방향 그래프.
//! 측정 수집기가 갱신하고, 경로 탐색은 읽기 잠금 아래에서 수행한다.

use std::collections::HashMap;

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

/// 측정 수집기가 넘겨주는 한 쌍의 링크 측정값
///
/// 측정 실패는 `NaN`으로 표시됨
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub origin: String,
    pub destination: String,
    pub latency_ms: f64,
    pub bandwidth_mbps: f64,
}

impl Measurement {
    pub fn new(
        origin: impl Into<String>,
        destination: impl Into<String>,
        latency_ms: f64,
        bandwidth_mbps: f64,
    ) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
            latency_ms,
            bandwidth_mbps,
        }
    }
}

/// 가중치로 사용할 지표
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// 측정 지연(ms) 그대로 최소화
    #[default]
    Latency,

    /// 대역폭의 역수를 최소화 (= 경로 대역폭 최대화)
    Bandwidth,
}

impl Metric {
    /// 측정값을 가중치로 변환, 쓸 수 없는 값이면 `None`
    pub fn weight(&self, m: &Measurement) -> Option<f64> {
        match self {
            Metric::Latency => m.latency_ms.is_finite().then_some(m.latency_ms),
            Metric::Bandwidth => {
                (m.bandwidth_mbps.is_finite() && m.bandwidth_mbps > 0.0).then(|| 1.0 / m.bandwidth_mbps)
            }
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "latency" | "lat" => Ok(Metric::Latency),
            "bandwidth" | "bw" => Ok(Metric::Bandwidth),
            other => Err(Error::InvalidConfig(format!("unknown metric: {}", other))),
        }
    }
}

/// 잠금 안쪽 그래프 데이터
///
/// 노드와 이웃은 삽입 순서를 유지 (탐색 결과 재현성)
#[derive(Debug, Default, Clone)]
pub(crate) struct GraphInner {
    pub(crate) nodes: Vec<String>,
    pub(crate) index: HashMap<String, usize>,
    /// 노드 인덱스별 (이웃 인덱스, 가중치)
    pub(crate) adjacency: Vec<Vec<(usize, f64)>>,
}

impl GraphInner {
    fn ensure_node(&mut self, id: &str) -> usize {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(id.to_string());
        self.index.insert(id.to_string(), idx);
        self.adjacency.push(Vec::new());
        idx
    }

    fn upsert(&mut self, from: &str, to: &str, weight: f64) -> Result<()> {
        if weight.is_nan() || weight < 0.0 {
            return Err(Error::InvalidWeight {
                from: from.to_string(),
                to: to.to_string(),
                weight,
            });
        }

        let f = self.ensure_node(from);
        let t = self.ensure_node(to);
        let edges = &mut self.adjacency[f];
        match edges.iter_mut().find(|(n, _)| *n == t) {
            Some(edge) => edge.1 = weight,
            None => edges.push((t, weight)),
        }
        Ok(())
    }
}

/// 방향 가중 그래프
#[derive(Debug, Default)]
pub struct CostGraph {
    inner: RwLock<GraphInner>,
}

impl CostGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 측정값 목록으로 그래프 생성
    pub fn from_measurements<'a, I>(measurements: I, metric: Metric) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Measurement>,
    {
        let graph = Self::new();
        graph.apply_measurements(measurements, metric)?;
        Ok(graph)
    }

    /// 고립 노드 등록
    pub fn add_node(&self, id: &str) {
        self.inner.write().ensure_node(id);
    }

    /// 간선 추가 또는 갱신 (last-write-wins)
    ///
    /// 음수/NaN 가중치는 `InvalidWeight`
    pub fn add_or_update_edge(&self, from: &str, to: &str, weight: f64) -> Result<()> {
        self.inner.write().upsert(from, to, weight)
    }

    /// 측정 라운드 결과를 한 번의 쓰기 잠금으로 반영
    ///
    /// 사용할 수 없는 측정(NaN 등)은 0 비용이 아니라 간선 없음으로 남긴다.
    /// 반영된 간선 수를 반환
    pub fn apply_measurements<'a, I>(&self, measurements: I, metric: Metric) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Measurement>,
    {
        let mut inner = self.inner.write();
        // 중간에 실패하면 아무것도 반영하지 않음 (copy-on-write)
        let mut staged = inner.clone();
        let mut applied = 0;

        for m in measurements {
            staged.ensure_node(&m.origin);
            staged.ensure_node(&m.destination);

            match metric.weight(m) {
                Some(weight) => {
                    staged.upsert(&m.origin, &m.destination, weight)?;
                    applied += 1;
                }
                None => {
                    debug!(
                        "측정값 생략: {} -> {} ({:?}: latency={}, bandwidth={})",
                        m.origin, m.destination, metric, m.latency_ms, m.bandwidth_mbps
                    );
                }
            }
        }

        if applied == 0 {
            warn!("No usable measurements for metric {:?}", metric);
        }

        *inner = staged;
        Ok(applied)
    }

    pub fn edge_weight(&self, from: &str, to: &str) -> Option<f64> {
        let inner = self.inner.read();
        let f = *inner.index.get(from)?;
        let t = *inner.index.get(to)?;
        inner.adjacency[f]
            .iter()
            .find(|(n, _)| *n == t)
            .map(|(_, w)| *w)
    }

    pub fn neighbors(&self, node: &str) -> Vec<String> {
        let inner = self.inner.read();
        match inner.index.get(node) {
            Some(&idx) => inner.adjacency[idx]
                .iter()
                .map(|(n, _)| inner.nodes[*n].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn nodes(&self) -> Vec<String> {
        self.inner.read().nodes.clone()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.inner.read().index.contains_key(node)
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().adjacency.iter().map(Vec::len).sum()
    }

    /// 표시용 스냅샷
    pub fn snapshot(&self) -> GraphSnapshot {
        let inner = self.inner.read();
        let nodes = &inner.nodes;
        let edges = inner
            .adjacency
            .iter()
            .enumerate()
            .flat_map(|(from, edges)| {
                edges.iter().map(move |(to, weight)| SnapshotEdge {
                    from: nodes[from].clone(),
                    to: nodes[*to].clone(),
                    weight: *weight,
                })
            })
            .collect();

        GraphSnapshot {
            nodes: inner.nodes.clone(),
            edges,
        }
    }

    /// 경로 탐색 동안 갱신이 끼어들지 않도록 읽기 잠금 유지
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, GraphInner> {
        self.inner.read()
    }
}

/// 표시 계층에 넘기는 읽기 전용 복사본
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<String>,
    pub edges: Vec<SnapshotEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub from: String,
    pub to: String,
    pub weight: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_update_last_write_wins() {
        let graph = CostGraph::new();
        graph.add_or_update_edge("A", "B", 100.0).unwrap();
        graph.add_or_update_edge("A", "B", 40.0).unwrap();

        assert_eq!(graph.edge_weight("A", "B"), Some(40.0));
        // 방향 그래프
        assert_eq!(graph.edge_weight("B", "A"), None);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.nodes(), vec!["A", "B"]);
    }

    #[test]
    fn test_invalid_weight() {
        let graph = CostGraph::new();
        assert!(matches!(
            graph.add_or_update_edge("A", "B", -1.0),
            Err(Error::InvalidWeight { .. })
        ));
        assert!(matches!(
            graph.add_or_update_edge("A", "B", f64::NAN),
            Err(Error::InvalidWeight { .. })
        ));
        assert_eq!(graph.edge_count(), 0);
        graph.add_or_update_edge("A", "B", 0.0).unwrap();
    }

    #[test]
    fn test_neighbors_insertion_order() {
        let graph = CostGraph::new();
        graph.add_or_update_edge("A", "C", 1.0).unwrap();
        graph.add_or_update_edge("A", "B", 1.0).unwrap();
        graph.add_node("Z");

        assert_eq!(graph.neighbors("A"), vec!["C", "B"]);
        assert!(graph.neighbors("Z").is_empty());
        assert!(graph.neighbors("missing").is_empty());
        assert!(graph.contains("Z"));
    }

    #[test]
    fn test_measurements_skip_nan() {
        let measurements = vec![
            Measurement::new("10.0.0.1", "10.0.0.2", 12.5, 90.0),
            Measurement::new("10.0.0.1", "10.0.0.3", f64::NAN, 40.0),
            Measurement::new("10.0.0.1", "10.0.0.4", 30.0, f64::NAN),
            Measurement::new("10.0.0.1", "10.0.0.5", 8.0, 0.0),
        ];

        let latency = CostGraph::from_measurements(&measurements, Metric::Latency).unwrap();
        assert_eq!(latency.edge_weight("10.0.0.1", "10.0.0.2"), Some(12.5));
        assert_eq!(latency.edge_weight("10.0.0.1", "10.0.0.3"), None);
        assert_eq!(latency.edge_count(), 3);
        // 측정 실패한 노드도 노드 목록에는 존재
        assert_eq!(latency.nodes().len(), 5);

        let bandwidth = CostGraph::from_measurements(&measurements, Metric::Bandwidth).unwrap();
        assert_eq!(bandwidth.edge_weight("10.0.0.1", "10.0.0.3"), Some(1.0 / 40.0));
        assert_eq!(bandwidth.edge_weight("10.0.0.1", "10.0.0.4"), None);
        assert_eq!(bandwidth.edge_weight("10.0.0.1", "10.0.0.5"), None);
        assert_eq!(bandwidth.edge_count(), 2);
    }

    #[test]
    fn test_failed_batch_leaves_graph_untouched() {
        let graph = CostGraph::new();
        graph.add_or_update_edge("A", "B", 5.0).unwrap();

        let measurements = vec![
            Measurement::new("A", "B", 1.0, 10.0),
            Measurement::new("B", "C", -3.0, 10.0),
        ];
        assert!(graph.apply_measurements(&measurements, Metric::Latency).is_err());

        assert_eq!(graph.edge_weight("A", "B"), Some(5.0));
        assert!(!graph.contains("C"));
    }

    #[test]
    fn test_snapshot() {
        let graph = CostGraph::new();
        graph.add_or_update_edge("A", "B", 2.0).unwrap();
        graph.add_or_update_edge("B", "A", 3.0).unwrap();

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.nodes, vec!["A", "B"]);
        assert_eq!(snapshot.edges.len(), 2);
        assert_eq!(snapshot.edges[1].from, "B");
        assert_eq!(snapshot.edges[1].weight, 3.0);
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("latency".parse::<Metric>().unwrap(), Metric::Latency);
        assert_eq!("BW".parse::<Metric>().unwrap(), Metric::Bandwidth);
        assert!("hops".parse::<Metric>().is_err());
    }
}
