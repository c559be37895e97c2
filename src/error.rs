//! 에러 타입 정의

use std::time::Duration;

use thiserror::Error;

/// HopRelay 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 네트워크 I/O 전에 보고되는 유일한 에러
    #[error("경로 없음: {origin} -> {destination}")]
    Unreachable { origin: String, destination: String },

    /// 선언된 길이를 다 읽기 전에 상대가 연결을 닫음
    #[error("연결이 조기 종료됨 (선언된 바이트 수신 전)")]
    PrematureClose,

    #[error("잘못된 프레임: {0}")]
    MalformedFrame(String),

    #[error("예상하지 못한 프레임: expected {expected}, got {got}")]
    UnexpectedFrame { expected: String, got: String },

    /// 하류 홉이 Response(failure)를 돌려줌
    #[error("하류 노드 실패: {message}")]
    DownstreamFailure { message: String },

    #[error("로컬 저장소 에러: {0}")]
    LocalIo(String),

    #[error("유효하지 않은 가중치: {from} -> {to} = {weight}")]
    InvalidWeight { from: String, to: String, weight: f64 },

    #[error("유효하지 않은 경로: {0}")]
    InvalidRoute(String),

    #[error("홉 주소가 너무 김: {addr:?} ({max}바이트 초과)")]
    HopAddressTooLong { addr: String, max: usize },

    #[error("홉 수 초과: {0} (최대 255)")]
    TooManyHops(usize),

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),

    #[error("타임아웃: {0:?}")]
    Timeout(Duration),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
