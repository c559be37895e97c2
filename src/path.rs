//! 경로 선택 (Dijkstra)
//!
//! 비용 그래프 위에서 출발지 -> 목적지 최단 경로를 계산.
//! 가중치는 항상 0 이상이므로 확정된 노드의 거리는 다시 바뀌지 않는다.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::CostGraph;
use crate::{Error, Result};

/// 한 번의 전송을 위해 계산된 경로
///
/// `[origin, hop1, ..., destination]` (길이 2 이상) + 총 비용
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    nodes: Vec<String>,
    cost: f64,
}

impl Route {
    pub fn new(nodes: Vec<String>, cost: f64) -> Result<Self> {
        if nodes.len() < 2 {
            return Err(Error::InvalidRoute(format!(
                "route needs at least 2 nodes, got {}",
                nodes.len()
            )));
        }
        Ok(Self { nodes, cost })
    }

    /// 중간 홉 없는 직접 경로 (비교용)
    pub fn direct(origin: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            nodes: vec![origin.into(), destination.into()],
            cost: f64::NAN,
        }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn origin(&self) -> &str {
        &self.nodes[0]
    }

    pub fn destination(&self) -> &str {
        &self.nodes[self.nodes.len() - 1]
    }

    /// 출발지를 제외한 홉 (와이어에 실리는 부분)
    pub fn hops(&self) -> &[String] {
        &self.nodes[1..]
    }

    pub fn hop_count(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_direct(&self) -> bool {
        self.hop_count() == 1
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (cost {:.3})", self.nodes.join(" -> "), self.cost)
    }
}

/// 최단 경로 계산
///
/// - 경로가 없으면 `Unreachable` (부분 경로는 반환하지 않음)
/// - 동일 거리는 frontier 삽입 순서로 처리해 결과를 재현 가능하게 유지
/// - 탐색하는 동안 그래프 읽기 잠금을 유지
pub fn shortest_path(graph: &CostGraph, origin: &str, destination: &str) -> Result<Route> {
    if origin == destination {
        return Err(Error::InvalidRoute(format!(
            "origin and destination are the same node: {}",
            origin
        )));
    }

    let unreachable = || Error::Unreachable {
        origin: origin.to_string(),
        destination: destination.to_string(),
    };

    let inner = graph.read();
    let (src, dst) = match (inner.index.get(origin), inner.index.get(destination)) {
        (Some(&s), Some(&d)) => (s, d),
        _ => return Err(unreachable()),
    };

    let n = inner.nodes.len();
    let mut dist = vec![f64::INFINITY; n];
    let mut prev: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];

    // (거리, 삽입 순번, 노드)
    let mut frontier = BinaryHeap::new();
    let mut seq = 0u64;

    dist[src] = 0.0;
    frontier.push(Reverse((OrderedFloat(0.0), seq, src)));

    while let Some(Reverse((OrderedFloat(d), _, node))) = frontier.pop() {
        if visited[node] {
            continue;
        }
        visited[node] = true;

        if node == dst {
            break;
        }

        for &(next, weight) in &inner.adjacency[node] {
            if next == node || visited[next] {
                continue;
            }
            let candidate = d + weight;
            if candidate < dist[next] {
                dist[next] = candidate;
                prev[next] = Some(node);
                seq += 1;
                frontier.push(Reverse((OrderedFloat(candidate), seq, next)));
            }
        }
    }

    if !visited[dst] {
        debug!("경로 없음: {} -> {}", origin, destination);
        return Err(unreachable());
    }

    let mut nodes = vec![inner.nodes[dst].clone()];
    let mut cursor = dst;
    while let Some(p) = prev[cursor] {
        nodes.push(inner.nodes[p].clone());
        cursor = p;
    }
    nodes.reverse();

    let route = Route::new(nodes, dist[dst])?;
    debug!("최단 경로: {}", route);
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// 원래 측정 예제의 4노드 지연 그래프 (양방향)
    fn sample_graph() -> CostGraph {
        let graph = CostGraph::new();
        for (a, b, w) in [("A", "B", 100.0), ("A", "C", 50.0), ("C", "D", 30.0), ("B", "D", 75.0)] {
            graph.add_or_update_edge(a, b, w).unwrap();
            graph.add_or_update_edge(b, a, w).unwrap();
        }
        graph
    }

    #[test]
    fn test_sample_route() {
        let graph = sample_graph();
        let route = shortest_path(&graph, "A", "D").unwrap();

        assert_eq!(route.nodes(), &["A", "C", "D"]);
        assert_eq!(route.cost(), 80.0);
        assert_eq!(route.hops(), &["C", "D"]);
        assert!(!route.is_direct());
    }

    #[test]
    fn test_direct_edge_route() {
        let graph = sample_graph();
        let route = shortest_path(&graph, "A", "C").unwrap();
        assert!(route.is_direct());
        assert_eq!(route.cost(), 50.0);
    }

    #[test]
    fn test_unreachable() {
        let graph = sample_graph();
        graph.add_node("E");
        // 단방향 간선만 있는 경우
        graph.add_or_update_edge("F", "A", 1.0).unwrap();

        assert!(matches!(
            shortest_path(&graph, "A", "E"),
            Err(Error::Unreachable { .. })
        ));
        assert!(matches!(
            shortest_path(&graph, "A", "F"),
            Err(Error::Unreachable { .. })
        ));
        assert!(matches!(
            shortest_path(&graph, "A", "nowhere"),
            Err(Error::Unreachable { .. })
        ));
        assert!(shortest_path(&graph, "F", "D").is_ok());
    }

    #[test]
    fn test_same_endpoints() {
        let graph = sample_graph();
        assert!(matches!(
            shortest_path(&graph, "A", "A"),
            Err(Error::InvalidRoute(_))
        ));
    }

    #[test]
    fn test_self_loop_and_zero_weight() {
        let graph = CostGraph::new();
        graph.add_or_update_edge("A", "A", 0.0).unwrap();
        graph.add_or_update_edge("A", "B", 0.0).unwrap();
        graph.add_or_update_edge("B", "B", 0.0).unwrap();
        graph.add_or_update_edge("B", "C", 2.0).unwrap();

        let route = shortest_path(&graph, "A", "C").unwrap();
        assert_eq!(route.nodes(), &["A", "B", "C"]);
        assert_eq!(route.cost(), 2.0);
    }

    #[test]
    fn test_tie_break_is_stable() {
        let graph = CostGraph::new();
        graph.add_or_update_edge("A", "B", 1.0).unwrap();
        graph.add_or_update_edge("A", "C", 1.0).unwrap();
        graph.add_or_update_edge("B", "D", 1.0).unwrap();
        graph.add_or_update_edge("C", "D", 1.0).unwrap();

        let first = shortest_path(&graph, "A", "D").unwrap();
        for _ in 0..10 {
            assert_eq!(shortest_path(&graph, "A", "D").unwrap(), first);
        }
        assert_eq!(first.nodes(), &["A", "B", "D"]);
    }

    #[test]
    fn test_bandwidth_metric_prefers_wide_path() {
        use crate::graph::{Measurement, Metric};

        // A->B->D는 느린 직결 A->D보다 대역폭이 큼
        let measurements = vec![
            Measurement::new("A", "D", 5.0, 2.0),
            Measurement::new("A", "B", 20.0, 100.0),
            Measurement::new("B", "D", 20.0, 100.0),
        ];

        let by_latency = CostGraph::from_measurements(&measurements, Metric::Latency).unwrap();
        let by_bandwidth = CostGraph::from_measurements(&measurements, Metric::Bandwidth).unwrap();

        assert_eq!(shortest_path(&by_latency, "A", "D").unwrap().nodes(), &["A", "D"]);
        let wide = shortest_path(&by_bandwidth, "A", "D").unwrap();
        assert_eq!(wide.nodes(), &["A", "B", "D"]);
        assert!((wide.cost() - 0.02).abs() < 1e-12);
    }

    /// 모든 단순 경로를 나열해 최소 비용 계산
    fn brute_force(graph: &CostGraph, from: &str, to: &str) -> Option<f64> {
        fn walk(
            graph: &CostGraph,
            node: &str,
            to: &str,
            cost: f64,
            seen: &mut Vec<String>,
            best: &mut Option<f64>,
        ) {
            if node == to {
                if best.map_or(true, |b| cost < b) {
                    *best = Some(cost);
                }
                return;
            }
            for next in graph.neighbors(node) {
                if seen.contains(&next) {
                    continue;
                }
                let w = graph.edge_weight(node, &next).unwrap();
                seen.push(next.clone());
                walk(graph, &next, to, cost + w, seen, best);
                seen.pop();
            }
        }

        let mut best = None;
        walk(graph, from, to, 0.0, &mut vec![from.to_string()], &mut best);
        best
    }

    #[test]
    fn test_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(0x5EED);

        for _ in 0..200 {
            let graph = CostGraph::new();
            let n = rng.gen_range(2..7);
            let names: Vec<String> = (0..n).map(|i| format!("n{}", i)).collect();
            for name in &names {
                graph.add_node(name);
            }
            for a in &names {
                for b in &names {
                    if rng.gen_bool(0.4) {
                        let w = rng.gen_range(0..50) as f64;
                        graph.add_or_update_edge(a, b, w).unwrap();
                    }
                }
            }

            let from = &names[0];
            let to = &names[n - 1];
            match (shortest_path(&graph, from, to), brute_force(&graph, from, to)) {
                (Ok(route), Some(best)) => {
                    assert_eq!(route.cost(), best);
                    assert_eq!(route.origin(), from);
                    assert_eq!(route.destination(), to);
                    // 비용 = 경로 간선 가중치 합
                    let sum: f64 = route
                        .nodes()
                        .windows(2)
                        .map(|w| graph.edge_weight(&w[0], &w[1]).unwrap())
                        .sum();
                    assert_eq!(sum, route.cost());
                }
                (Err(Error::Unreachable { .. }), None) => {}
                (got, expected) => panic!("mismatch: {:?} vs {:?}", got, expected),
            }
        }
    }
}
