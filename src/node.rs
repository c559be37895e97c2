//! 릴레이 노드 (서버측)
//!
//! 연결마다 핸들러 태스크 하나:
//!
//! ```text
//! AwaitOpcode -> Sending    -> Acknowledging -> (AwaitOpcode | Closed)
//!             -> Requesting -> (Send | Response)
//!             -> Relaying   -> AwaitNext     -> Acknowledging
//! ```
//!
//! - Send: 로컬 저장 후 Response
//! - Relay: 첫 홉을 꺼내 다음 노드로 전달, 하류 Response를 그대로 상류에 돌려줌
//! - Request: 파일이 있으면 Send로 밀어주고, 없으면 실패 Response
//!
//! 잘 구성된 Send/Relay/Request 요청에는 어떤 실패가 있어도 종단 응답 하나를 보낸다.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::frame::{Frame, Status};
use crate::stats::{NodeStats, StatsSnapshot};
use crate::storage::Storage;
use crate::stream::{chunk_buffer, copy_exact, drain, read_chunk, with_timeout, write_all};
use crate::{Config, Error, Result};

/// 전달 중 실패가 어느 쪽에서 났는지
enum Side {
    /// 상류 연결이 끊김 - 더 이상 응답할 수 없음
    Upstream(Error),

    /// 다음 홉 문제 - 실패 Response로 변환
    Downstream(Error),

    /// 페이로드를 다 받기 전에 다음 홉이 먼저 응답함
    Answered(Frame),
}

/// 쓰기 실패 후 다음 홉이 남긴 응답을 기다리는 시간
const EARLY_REPLY_WAIT: Duration = Duration::from_millis(500);

/// 릴레이 노드
pub struct RelayNode<S: Storage> {
    config: Config,
    storage: S,
    stats: NodeStats,
}

impl<S: Storage> RelayNode<S> {
    pub fn new(config: Config, storage: S) -> Self {
        Self {
            config,
            storage,
            stats: NodeStats::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 주소에 바인딩하고 백그라운드에서 실행
    pub async fn bind<A: ToSocketAddrs>(self: Arc<Self>, addr: A) -> Result<NodeHandle> {
        let listener = TcpListener::bind(addr).await?;
        self.spawn(listener)
    }

    /// 리스너를 백그라운드 태스크로 실행
    pub fn spawn(self: Arc<Self>, listener: TcpListener) -> Result<NodeHandle> {
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(self.serve_until(listener, async move {
            // 핸들이 drop되어도 종료
            let _ = shutdown_rx.await;
        }));

        Ok(NodeHandle {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    /// 종료 없이 계속 실행
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        self.serve_until(listener, std::future::pending()).await
    }

    /// `shutdown`이 끝날 때까지 연결 수락
    ///
    /// 종료 신호 이후에는 새 연결을 받지 않고, 진행 중인 핸들러가
    /// 모두 끝난 뒤에 반환
    pub async fn serve_until<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!("Relay node listening on {}", listener.local_addr()?);

        let mut handlers = JoinSet::new();
        let (closing_tx, closing_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, waiting for {} handler(s)", handlers.len());
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("accept 실패: {}", e);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    };

                    self.stats.record_connection();
                    debug!("연결 수락: {}", peer);

                    let node = self.clone();
                    let closing = closing_rx.clone();
                    handlers.spawn(async move {
                        match node.handle_connection(stream, peer, closing).await {
                            Ok(()) => debug!("연결 종료: {}", peer),
                            Err(e) => warn!("Connection {} closed with error: {}", peer, e),
                        }
                    });
                }
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Handler task failed: {}", e);
                    }
                }
            }
        }

        // 프레임 경계에서 대기 중인 유휴 연결 정리
        let _ = closing_tx.send(true);

        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                warn!("Handler task failed: {}", e);
            }
        }

        info!("{}", self.stats.snapshot().summary());
        Ok(())
    }

    /// 연결 하나 처리 (순차적인 여러 요청 허용)
    ///
    /// 종료 신호는 요청 사이에서만 반영
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        mut closing: watch::Receiver<bool>,
    ) -> Result<()> {
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        loop {
            // 첫 바이트가 도착한 요청은 종료 중에도 끝까지 처리
            let at_eof = tokio::select! {
                filled = reader.fill_buf() => filled?.is_empty(),
                _ = closing.changed() => {
                    debug!("종료 중, 유휴 연결 닫음: {}", peer);
                    return Ok(());
                }
            };
            if at_eof {
                return Ok(());
            }

            // 헤더 도중 멈춘 상대는 io 타임아웃으로 정리
            let header = with_timeout(
                self.config.io_timeout(),
                Frame::read_from(&mut reader, self.config.max_name_len),
            );
            let frame = match header.await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(Error::MalformedFrame(reason)) => {
                    // 프레임 경계를 잃었으므로 응답 후 종료
                    warn!("Malformed frame from {}: {}", peer, reason);
                    self.reply(&mut writer, Frame::failure(format!("malformed frame: {}", reason)))
                        .await?;
                    return Err(Error::MalformedFrame(reason));
                }
                Err(e) => return Err(e),
            };

            debug!("{} -> {}", peer, frame);

            match frame {
                Frame::Send { filename, size } => {
                    let reply = self.receive_file(&mut reader, &filename, size).await?;
                    self.reply(&mut writer, reply).await?;
                }
                Frame::Relay {
                    filename,
                    hops,
                    size,
                } => {
                    let reply = self.relay(&mut reader, filename, hops, size).await?;
                    self.reply(&mut writer, reply).await?;
                }
                Frame::Request { filename } => {
                    self.serve_request(&mut writer, &filename).await?;
                }
                Frame::Response { .. } => {
                    warn!("Unexpected Response frame from {}", peer);
                    self.reply(&mut writer, Frame::failure("unexpected Response frame"))
                        .await?;
                    return Err(Error::UnexpectedFrame {
                        expected: "Send, Relay or Request".into(),
                        got: "Response".into(),
                    });
                }
            }
        }
    }

    async fn reply<W>(&self, writer: &mut W, reply: Frame) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if let Frame::Response {
            status: Status::Failure,
            ..
        } = &reply
        {
            self.stats.record_failure();
        }
        with_timeout(self.config.io_timeout(), reply.write_to(writer)).await
    }

    /// Send: 정확히 `size` 바이트를 저장소에 기록
    ///
    /// 저장소 실패 시에도 페이로드는 끝까지 읽어 프레임 경계를 유지하고
    /// 실패 Response를 돌려준다. `Err`는 상류 연결이 깨진 경우뿐.
    async fn receive_file<R>(&self, reader: &mut R, filename: &str, size: u64) -> Result<Frame>
    where
        R: AsyncRead + Unpin,
    {
        let limit = self.config.io_timeout();
        let mut storage_err: Option<io::Error> = None;

        let mut sink = match self.storage.create(filename).await {
            Ok(writer) => Some(writer),
            Err(e) => {
                storage_err = Some(e);
                None
            }
        };

        let mut buf = chunk_buffer(self.config.chunk_size, size);
        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = size;

        while remaining > 0 {
            let want = (buf.len() as u64).min(remaining) as usize;
            let n = read_chunk(reader, &mut buf[..want], limit).await?;

            let failed = match sink.as_mut() {
                Some(writer) => writer.write_all(&buf[..n]).await.err(),
                None => None,
            };
            if let Some(e) = failed {
                storage_err = Some(e);
                sink = None;
            }

            hasher.update(&buf[..n]);
            remaining -= n as u64;
        }

        if let Some(mut writer) = sink {
            if let Err(e) = writer.shutdown().await {
                storage_err = Some(e);
            }
        }

        match storage_err {
            Some(e) => {
                warn!("Failed to store {}: {}", filename, e);
                Ok(Frame::failure(format!("storage error: {}", e)))
            }
            None => {
                self.stats.record_stored(size);
                info!(
                    "File stored: {} ({} bytes, crc32={:08X})",
                    filename,
                    size,
                    hasher.finalize()
                );
                Ok(Frame::success(format!("file received: {} ({} bytes)", filename, size)))
            }
        }
    }

    /// Relay: 첫 홉을 꺼내 다음 노드로 전달하고 하류 응답을 기다림
    async fn relay<R>(
        &self,
        reader: &mut R,
        filename: String,
        mut hops: Vec<String>,
        size: u64,
    ) -> Result<Frame>
    where
        R: AsyncRead + Unpin,
    {
        let limit = self.config.io_timeout();

        if hops.is_empty() {
            drain(reader, size, self.config.chunk_size, limit).await?;
            return Ok(Frame::failure("relay frame carries no hops"));
        }

        let next = hops.remove(0);
        let downstream = if hops.is_empty() {
            // 남은 홉이 없으면 다음 노드가 종단
            Frame::Send { filename, size }
        } else {
            Frame::Relay {
                filename,
                hops,
                size,
            }
        };

        info!("Relaying {} to {}", downstream, next);

        let mut consumed = 0u64;
        match self.forward(reader, &next, &downstream, &mut consumed).await {
            Ok(reply) => {
                match &reply {
                    Frame::Response {
                        status: Status::Success,
                        message,
                    } => {
                        self.stats.record_forwarded(size);
                        info!("Downstream {} confirmed: {}", next, message)
                    }
                    Frame::Response { message, .. } => {
                        warn!("Downstream {} reported failure: {}", next, message)
                    }
                    _ => {}
                }
                Ok(reply)
            }
            Err(Side::Upstream(e)) => Err(e),
            Err(Side::Answered(reply)) => {
                warn!("Downstream {} answered before the payload ended: {}", next, reply);
                drain(reader, size - consumed, self.config.chunk_size, limit).await?;
                Ok(reply)
            }
            Err(Side::Downstream(e)) => {
                warn!("릴레이 실패 ({}): {}", next, e);
                drain(reader, size - consumed, self.config.chunk_size, limit).await?;
                Ok(Frame::failure(format!("relay via {} failed: {}", next, e)))
            }
        }
    }

    /// 다음 홉에 연결해 헤더와 페이로드를 흘려보내고 Response 수신
    ///
    /// `consumed`는 상류에서 읽어낸 페이로드 바이트 수
    async fn forward<R>(
        &self,
        reader: &mut R,
        next: &str,
        header: &Frame,
        consumed: &mut u64,
    ) -> std::result::Result<Frame, Side>
    where
        R: AsyncRead + Unpin,
    {
        let limit = self.config.io_timeout();
        let encoded = header.encode().map_err(Side::Downstream)?;

        let mut out = with_timeout(Some(self.config.connect_timeout()), async {
            Ok::<_, Error>(TcpStream::connect(next).await?)
        })
        .await
        .map_err(Side::Downstream)?;
        out.set_nodelay(true).map_err(|e| Side::Downstream(e.into()))?;

        write_all(&mut out, &encoded, limit)
            .await
            .map_err(Side::Downstream)?;

        let size = header.payload_len();
        let mut buf = chunk_buffer(self.config.chunk_size, size);

        while *consumed < size {
            let want = (buf.len() as u64).min(size - *consumed) as usize;
            let n = read_chunk(reader, &mut buf[..want], limit)
                .await
                .map_err(Side::Upstream)?;
            *consumed += n as u64;
            if let Err(e) = write_all(&mut out, &buf[..n], limit).await {
                // 하류가 실패 응답을 보내고 닫았으면 그 메시지를 우선
                return Err(match self.early_reply(&mut out).await {
                    Some(reply) => Side::Answered(reply),
                    None => Side::Downstream(e),
                });
            }
        }

        let (status, message) =
            with_timeout(limit, Frame::read_response(&mut out, self.config.max_name_len))
                .await
                .map_err(Side::Downstream)?;

        Ok(Frame::Response { status, message })
    }

    async fn early_reply(&self, out: &mut TcpStream) -> Option<Frame> {
        let read = Frame::read_response(out, self.config.max_name_len);
        match with_timeout(Some(EARLY_REPLY_WAIT), read).await {
            Ok((status, message)) => Some(Frame::Response { status, message }),
            Err(e) => {
                debug!("하류 조기 응답 없음: {}", e);
                None
            }
        }
    }

    /// Request: 파일이 있으면 Send로 밀어줌
    async fn serve_request<W>(&self, writer: &mut W, filename: &str) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        match self.storage.open(filename).await {
            Ok(Some((mut file, size))) => {
                info!("Serving {} ({} bytes)", filename, size);
                let header = Frame::Send {
                    filename: filename.to_string(),
                    size,
                };
                with_timeout(self.config.io_timeout(), header.write_to(writer)).await?;
                copy_exact(
                    &mut file,
                    writer,
                    size,
                    self.config.chunk_size,
                    self.config.io_timeout(),
                )
                .await?;
                writer.flush().await?;
                self.stats.record_served();
                Ok(())
            }
            Ok(None) => {
                debug!("요청 파일 없음: {}", filename);
                self.reply(writer, Frame::failure(format!("file not found: {}", filename)))
                    .await
            }
            Err(e) => {
                warn!("Failed to open {}: {}", filename, e);
                self.reply(
                    writer,
                    Frame::failure(format!("storage error: {}", e)),
                )
                .await
            }
        }
    }
}

/// 백그라운드에서 실행 중인 노드 핸들
pub struct NodeHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl NodeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 새 연결 수락을 멈추고 진행 중인 핸들러가 끝날 때까지 대기
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(Error::Io(io::Error::new(io::ErrorKind::Other, e))),
        }
    }
}
