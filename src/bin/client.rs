//! HopRelay 클라이언트 (전송 시작측)
//!
//! 링크 측정값으로 비용 그래프를 만들고 최단 경로로 파일을 보낸다.
//!
//! 사용법:
//!   cargo run --release --bin hoprelay-client -- [OPTIONS]
//!
//! 예시:
//!   # A -> D 최단 경로로 전송
//!   cargo run --release --bin hoprelay-client -- --from A --to D \
//!     --link A,B,100,50 --link A,C,50,20 --link C,D,30,20 --link B,D,75,80 \
//!     --peer B=10.0.0.2:3843 --peer C=10.0.0.3:3843 --peer D=10.0.0.4:3843 \
//!     --file data.bin
//!
//!   # 직접 경로와 속도 비교
//!   cargo run --release --bin hoprelay-client -- ... --file data.bin --compare

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hoprelay::{Config, CostGraph, Measurement, Metric, Originator};

/// 클라이언트 설정
struct ClientConfig {
    from: Option<String>,
    to: Option<String>,
    links: Vec<Measurement>,
    metric: Metric,
    bidirectional: bool,
    file_path: Option<PathBuf>,
    compare: bool,
    fetch: Option<String>,
    output_path: Option<PathBuf>,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            links: Vec::new(),
            metric: Metric::default(),
            bidirectional: false,
            file_path: None,
            compare: false,
            fetch: None,
            output_path: None,
            config: Config::default(),
        }
    }
}

fn fail(message: String) -> ! {
    eprintln!("{}", message);
    std::process::exit(2);
}

/// 옵션 값 파싱, 실패 시 종료
fn value<T: FromStr>(args: &[String], i: usize, what: &str) -> T {
    match args.get(i + 1).map(|s| s.parse()) {
        Some(Ok(v)) => v,
        _ => fail(format!("{} 옵션에 유효한 값 필요", what)),
    }
}

/// `from,to,latency_ms,bandwidth_mbps` (측정 실패는 NaN)
fn parse_link(entry: &str) -> Measurement {
    let parts: Vec<&str> = entry.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        fail(format!("--link 형식: from,to,latency_ms,bandwidth_mbps ({})", entry));
    }
    let number = |s: &str| -> f64 {
        if s.eq_ignore_ascii_case("nan") || s == "-" {
            return f64::NAN;
        }
        s.parse()
            .unwrap_or_else(|_| fail(format!("--link 숫자 오류: {}", entry)))
    };
    Measurement::new(parts[0], parts[1], number(parts[2]), number(parts[3]))
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--from" => {
                config.from = Some(value(&args, i, "--from"));
                i += 1;
            }
            "--to" => {
                config.to = Some(value(&args, i, "--to"));
                i += 1;
            }
            "--link" | "-l" => {
                let entry: String = value(&args, i, "--link");
                config.links.push(parse_link(&entry));
                i += 1;
            }
            "--bidirectional" => {
                config.bidirectional = true;
            }
            "--peer" | "-p" => {
                let entry: String = value(&args, i, "--peer");
                match entry.split_once('=') {
                    Some((id, addr)) => config.config.peers.insert(id.into(), addr.into()),
                    None => fail(format!("--peer 형식: id=host:port ({})", entry)),
                };
                i += 1;
            }
            "--metric" | "-m" => {
                let name: String = value(&args, i, "--metric");
                config.metric = name.parse().unwrap_or_else(|e| fail(format!("{}", e)));
                i += 1;
            }
            "--file" | "-f" => {
                config.file_path = Some(value(&args, i, "--file"));
                i += 1;
            }
            "--compare" | "-c" => {
                config.compare = true;
            }
            "--fetch" => {
                config.fetch = Some(value(&args, i, "--fetch"));
                i += 1;
            }
            "--output" | "-o" => {
                config.output_path = Some(value(&args, i, "--output"));
                i += 1;
            }
            "--chunk-size" => {
                config.config.chunk_size = value(&args, i, "--chunk-size");
                i += 1;
            }
            "--connect-timeout" => {
                config.config.connect_timeout_ms = value(&args, i, "--connect-timeout");
                i += 1;
            }
            "--io-timeout" => {
                config.config.io_timeout_ms = value(&args, i, "--io-timeout");
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"HopRelay Client - 최단 경로 파일 전송

링크 측정값(지연 ms, 대역폭 Mbps)으로 그래프를 만들고
Dijkstra로 고른 경로를 따라 파일을 릴레이한다.

사용법:
  cargo run --release --bin hoprelay-client -- [OPTIONS]

옵션:
  --from <ID>                 출발 노드 ID
  --to <ID>                   목적지 노드 ID
  -l, --link <F,T,LAT,BW>     측정 링크 (반복 가능, 측정 실패는 nan)
  --bidirectional             각 링크를 양방향으로 추가
  -p, --peer <ID=HOST:PORT>   노드 주소록 항목 (반복 가능)
  -m, --metric <NAME>         latency | bandwidth (기본: latency)
  -f, --file <PATH>           전송할 파일
  -c, --compare               직접 경로로도 전송해 소요 시간 비교
  --fetch <NAME>              --to 노드에서 파일을 받아옴
  -o, --output <PATH>         --fetch 저장 경로 (기본: NAME)
  --chunk-size <SIZE>         스트리밍 청크 크기 바이트 (기본: 4096)
  --connect-timeout <MS>      연결 타임아웃 (기본: 5000)
  --io-timeout <MS>           청크/응답 타임아웃, 0 = 무제한 (기본: 30000)
  -h, --help                  이 도움말 출력

주소록에 없는 ID는 ':'를 포함하면 그대로, 아니면 ID:3843 으로 연결

예시:
  # 경로만 계산
  cargo run --release --bin hoprelay-client -- --from A --to D \
    --link A,B,100,50 --link A,C,50,20 --link C,D,30,20 --link B,D,75,80

  # 대역폭 기준 전송 + 비교
  cargo run --release --bin hoprelay-client -- --from A --to D -m bandwidth \
    --link ... --peer C=10.0.0.3:3843 --peer D=10.0.0.4:3843 -f data.bin -c

  # 파일 받아오기
  cargo run --release --bin hoprelay-client -- --to 10.0.0.4:3843 --fetch data.bin
"#
                );
                std::process::exit(0);
            }
            other => fail(format!("알 수 없는 옵션: {} (--help 참고)", other)),
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client_config = parse_args();
    let originator = Originator::new(client_config.config.clone());

    info!("HopRelay Client starting...");

    if let Some(name) = &client_config.fetch {
        let node = client_config
            .to
            .as_deref()
            .unwrap_or_else(|| fail("--fetch 에는 --to 가 필요".into()));
        let output = client_config
            .output_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(name));

        let mut file = tokio::fs::File::create(&output).await?;
        let size = originator.fetch(node, name, &mut file).await?;
        info!("Saved {} ({} bytes)", output.display(), size);
        return Ok(());
    }

    let (from, to) = match (&client_config.from, &client_config.to) {
        (Some(from), Some(to)) => (from.as_str(), to.as_str()),
        _ => fail("--from 과 --to 가 필요 (--help 참고)".into()),
    };

    let mut links = client_config.links.clone();
    if client_config.bidirectional {
        let reversed: Vec<Measurement> = links
            .iter()
            .map(|m| {
                Measurement::new(
                    m.destination.clone(),
                    m.origin.clone(),
                    m.latency_ms,
                    m.bandwidth_mbps,
                )
            })
            .collect();
        links.extend(reversed);
    }

    let graph = CostGraph::from_measurements(&links, client_config.metric)?;
    info!(
        "Graph: {} nodes, {} edges (metric: {:?})",
        graph.nodes().len(),
        graph.edge_count(),
        client_config.metric
    );
    for edge in graph.snapshot().edges {
        info!("  {} -> {}: {:.4}", edge.from, edge.to, edge.weight);
    }

    let route = originator.plan(&graph, from, to)?;
    info!("Route: {}", route);

    let Some(path) = &client_config.file_path else {
        warn!("No --file given, route computed only");
        return Ok(());
    };

    if client_config.compare {
        let comparison = originator.compare(&route, path).await?;
        info!(
            "Optimal: {:.3}s ({:.2} MB/s) via {}",
            comparison.optimal.elapsed.as_secs_f64(),
            comparison.optimal.throughput_mbps(),
            comparison.optimal.route
        );
        info!(
            "Direct:  {:.3}s ({:.2} MB/s)",
            comparison.direct.elapsed.as_secs_f64(),
            comparison.direct.throughput_mbps()
        );
        info!("Speedup: {:.2}x", comparison.speedup());
    } else {
        let delivery = originator.send_file(&route, path).await?;
        info!("Destination replied: {}", delivery.message);
        info!(
            "Transfer complete: {} bytes in {:.3}s ({:.2} MB/s)",
            delivery.bytes,
            delivery.elapsed.as_secs_f64(),
            delivery.throughput_mbps()
        );
    }

    Ok(())
}
