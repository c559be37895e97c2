//! 스트림 유틸리티
//!
//! - 선언된 길이만큼 정확히 읽기 (단일 read 결과에 의존하지 않음)
//! - 청크 단위 페이로드 복사 (파일 전체를 메모리에 올리지 않음)
//! - 선택적 타임아웃

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// `limit`이 있으면 타임아웃을 걸어 실행
pub async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => fut.await,
    }
}

/// `buf`를 가득 채울 때까지 읽기
///
/// 중간에 EOF를 만나면 `PrematureClose`
pub async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::PrematureClose),
        Err(e) => Err(Error::Io(e)),
    }
}

/// 최대 `buf.len()` 바이트 읽기, 0바이트(EOF)는 `PrematureClose`
pub async fn read_chunk<R>(reader: &mut R, buf: &mut [u8], limit: Option<Duration>) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let n = with_timeout(limit, async { Ok::<_, Error>(reader.read(buf).await?) }).await?;
    if n == 0 {
        return Err(Error::PrematureClose);
    }
    Ok(n)
}

/// 버퍼 전체 쓰기 (타임아웃 포함)
pub async fn write_all<W>(writer: &mut W, buf: &[u8], limit: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    with_timeout(limit, async { Ok::<_, Error>(writer.write_all(buf).await?) }).await
}

/// 청크 버퍼 할당 (남은 크기보다 크게 잡지 않음)
pub(crate) fn chunk_buffer(chunk_size: usize, size: u64) -> Vec<u8> {
    let len = (chunk_size.max(1) as u64).min(size.max(1)) as usize;
    vec![0u8; len]
}

/// `reader`에서 정확히 `size` 바이트를 `writer`로 복사
///
/// 복사한 데이터의 CRC-32를 반환
pub async fn copy_exact<R, W>(
    reader: &mut R,
    writer: &mut W,
    size: u64,
    chunk_size: usize,
    limit: Option<Duration>,
) -> Result<u32>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = chunk_buffer(chunk_size, size);
    let mut hasher = crc32fast::Hasher::new();
    let mut remaining = size;

    while remaining > 0 {
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = read_chunk(reader, &mut buf[..want], limit).await?;
        write_all(writer, &buf[..n], limit).await?;
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }

    Ok(hasher.finalize())
}

/// 남은 페이로드를 버림 (프레임 경계 유지용)
pub async fn drain<R>(reader: &mut R, size: u64, chunk_size: usize, limit: Option<Duration>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    if size == 0 {
        return Ok(());
    }
    copy_exact(reader, &mut tokio::io::sink(), size, chunk_size, limit).await?;
    Ok(())
}
