//! 로컬 저장소
//!
//! 수신한 파일을 이름으로 저장하고, Request에 응답할 파일을 연다.
//! 프로토콜 자체는 파일 이름을 검증하지 않으므로 `FsStorage`가 그 역할을 맡는다.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// 저장소가 돌려주는 쓰기 핸들
pub type StorageWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 저장소가 돌려주는 읽기 핸들
pub type StorageReader = Box<dyn AsyncRead + Send + Unpin>;

/// 파일 저장소 협력자
///
/// 쓰기 핸들은 `shutdown`까지 호출되어야 저장이 완료된 것으로 본다.
pub trait Storage: Send + Sync + 'static {
    /// 이름으로 새 파일 생성 (기존 파일은 덮어씀)
    fn create(&self, name: &str) -> impl Future<Output = io::Result<StorageWriter>> + Send;

    /// 이름으로 파일 열기, 없으면 `None`
    fn open(&self, name: &str)
        -> impl Future<Output = io::Result<Option<(StorageReader, u64)>>> + Send;
}

/// 디렉터리 기반 저장소
///
/// `.<name>.<n>.part`에 쓰고 `shutdown` 시점에 최종 이름으로 rename.
/// 중단된 전송은 기존 파일을 건드리지 않는다.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
    next_part: Arc<AtomicU64>,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_part: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 이름을 루트 아래 경로로 변환
    ///
    /// 디렉터리 구분자, `..`, 절대 경로, `.`으로 시작하는 이름(임시 파일용)은 거부
    fn path_for(&self, name: &str) -> io::Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None)
                if !name.contains(['/', '\\']) && !name.starts_with('.') =>
            {
                Ok(self.root.join(part))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("rejected file name: {:?}", name),
            )),
        }
    }
}

impl Storage for FsStorage {
    async fn create(&self, name: &str) -> io::Result<StorageWriter> {
        let target = self.path_for(name)?;
        let seq = self.next_part.fetch_add(1, Ordering::Relaxed);
        let part = self.root.join(format!(".{}.{}.part", name, seq));

        tokio::fs::create_dir_all(&self.root).await?;
        let file = tokio::fs::File::create(&part).await?;
        Ok(Box::new(FsWriter {
            file,
            part,
            target,
            rename: None,
            committed: false,
        }))
    }

    async fn open(&self, name: &str) -> io::Result<Option<(StorageReader, u64)>> {
        let path = self.path_for(name)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => {
                let size = file.metadata().await?.len();
                Ok(Some((Box::new(file), size)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

type Commit = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// 임시 파일에 쓰고 `shutdown`에서 최종 경로로 교체
///
/// 커밋 전에 drop되면 임시 파일 삭제
struct FsWriter {
    file: tokio::fs::File,
    part: PathBuf,
    target: PathBuf,
    rename: Option<Commit>,
    committed: bool,
}

impl AsyncWrite for FsWriter {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.committed {
            return Poll::Ready(Ok(()));
        }

        if self.rename.is_none() {
            ready!(Pin::new(&mut self.file).poll_shutdown(cx))?;
            let (part, target) = (self.part.clone(), self.target.clone());
            self.rename = Some(Box::pin(tokio::fs::rename(part, target)));
        }

        let result = match self.rename.as_mut() {
            Some(rename) => ready!(rename.as_mut().poll(cx)),
            None => Ok(()),
        };
        self.rename = None;
        self.committed = result.is_ok();
        Poll::Ready(result)
    }
}

impl Drop for FsWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.part);
        }
    }
}

/// 메모리 저장소 (테스트/임베딩용)
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<DashMap<String, Bytes>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.files.insert(name.into(), data.into());
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.files.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Storage for MemoryStorage {
    async fn create(&self, name: &str) -> io::Result<StorageWriter> {
        Ok(Box::new(MemoryWriter {
            name: name.to_string(),
            buf: BytesMut::new(),
            files: self.files.clone(),
        }))
    }

    async fn open(&self, name: &str) -> io::Result<Option<(StorageReader, u64)>> {
        Ok(self.get(name).map(|data| {
            let size = data.len() as u64;
            (Box::new(MemoryReader { data }) as StorageReader, size)
        }))
    }
}

/// `shutdown` 시점에 맵에 반영 (중간 상태는 보이지 않음)
struct MemoryWriter {
    name: String,
    buf: BytesMut,
    files: Arc<DashMap<String, Bytes>>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let data = std::mem::take(&mut self.buf).freeze();
        let name = self.name.clone();
        self.files.insert(name, data);
        Poll::Ready(Ok(()))
    }
}

struct MemoryReader {
    data: Bytes,
}

impl AsyncRead for MemoryReader {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let n = self.data.len().min(buf.remaining());
        let chunk = self.data.split_to(n);
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}
