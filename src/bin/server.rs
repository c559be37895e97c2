//! HopRelay 노드 서버
//!
//! 받은 Send는 저장 디렉터리에 기록하고, Relay는 다음 홉으로 넘기고,
//! Request에는 저장된 파일로 응답한다.
//!
//! 사용법:
//!   cargo run --release --bin hoprelay-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 포트로 실행
//!   cargo run --release --bin hoprelay-server -- --bind 0.0.0.0:3843 --storage ./inbox
//!
//!   # VPN 오버레이 등 느린 링크
//!   cargo run --release --bin hoprelay-server -- --unstable --io-timeout 300000

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hoprelay::{Config, FsStorage, RelayNode, DEFAULT_PORT};

/// 서버 설정
struct ServerConfig {
    bind_addr: String,
    storage_dir: PathBuf,
    config: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            storage_dir: PathBuf::from("received"),
            config: Config::default(),
        }
    }
}

/// 옵션 값 파싱, 실패 시 종료
fn value<T: FromStr>(args: &[String], i: usize, what: &str) -> T {
    match args.get(i + 1).map(|s| s.parse()) {
        Some(Ok(v)) => v,
        _ => {
            eprintln!("{} 옵션에 유효한 값 필요", what);
            std::process::exit(2);
        }
    }
}

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                config.bind_addr = value(&args, i, "--bind");
                i += 1;
            }
            "--storage" | "-s" => {
                config.storage_dir = value(&args, i, "--storage");
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
            "--lan" => {
                config.config = Config::lan();
            }
            "--unstable" => {
                config.config = Config::unstable_network();
            }
            "--help" | "-h" => {
                println!(
                    r#"HopRelay Server - 다중 홉 파일 릴레이 노드

- Send: 저장 디렉터리에 파일 기록
- Relay: 첫 홉을 꺼내 다음 노드로 전달, 종단 응답을 그대로 돌려줌
- Request: 저장된 파일을 Send로 응답

사용법:
  cargo run --release --bin hoprelay-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>          바인드 주소 (기본: 0.0.0.0:3843)
  -s, --storage <DIR>        저장 디렉터리 (기본: ./received)
  --chunk-size <SIZE>        스트리밍 청크 크기 바이트 (기본: 4096)
  --connect-timeout <MS>     다음 홉 연결 타임아웃 (기본: 5000)
  --io-timeout <MS>          청크 읽기/쓰기 타임아웃, 0 = 무제한 (기본: 30000)
  --lan                      LAN 프리셋 (이후 옵션으로 덮어쓰기 가능)
  --unstable                 불안정 네트워크 프리셋
  -h, --help                 이 도움말 출력

로그 레벨은 RUST_LOG 환경 변수로 조정 (기본: info)

예시:
  cargo run --release --bin hoprelay-server -- --bind 0.0.0.0:3843 --storage ./inbox
  RUST_LOG=hoprelay=debug cargo run --release --bin hoprelay-server -- --lan
"#
                );
                std::process::exit(0);
            }
            other => {
                eprintln!("알 수 없는 옵션: {} (--help 참고)", other);
                std::process::exit(2);
            }
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

    let server_config = parse_args();

    info!("HopRelay Server starting...");
    info!("Bind address: {}", server_config.bind_addr);
    info!("Storage: {}", server_config.storage_dir.display());
    info!("Chunk size: {} bytes", server_config.config.chunk_size);
    info!(
        "Timeouts: connect {}ms, io {}ms",
        server_config.config.connect_timeout_ms, server_config.config.io_timeout_ms
    );

    tokio::fs::create_dir_all(&server_config.storage_dir).await?;

    let listener = TcpListener::bind(&server_config.bind_addr).await?;
    let storage = FsStorage::new(server_config.storage_dir);
    let node = Arc::new(RelayNode::new(server_config.config, storage));

    node.serve_until(listener, async {
        // Ctrl+C 대기 (신호 등록 실패 시 바로 종료)
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    info!("HopRelay Server stopped");
    Ok(())
}
