//! 릴레이 프레임 정의
//!
//! 모든 정수는 big-endian
//!
//! ```text
//! Request : op(1) | name_len(u32) | name
//! Send    : op(1) | name_len(u32) | name | size(u64) | payload...
//! Relay   : op(1) | name_len(u32) | name | hop_count(u8) | hop(22) * N | size(u64) | payload...
//! Response: op(1) | status(u8) | msg_len(u32) | msg
//! ```
//!
//! 프레임 값에는 헤더 필드만 담기고, `Send`/`Relay` 뒤의 페이로드는
//! 호출자가 `stream` 모듈로 직접 흘려보낸다.

use std::fmt;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::stream::read_exact;
use crate::{Error, Result, HOP_ADDR_LEN};

/// 파일 요청 (상대가 Send 또는 실패 Response로 응답)
pub const OP_REQUEST: u8 = 0x01;

/// 파일 직접 전송 (종단)
pub const OP_SEND: u8 = 0x02;

/// N개 홉을 거쳐 전달할 파일 전송
pub const OP_RELAY: u8 = 0x03;

/// Send/Relay 결과 응답
pub const OP_RESPONSE: u8 = 0x04;

/// 한 프레임이 실을 수 있는 최대 홉 수 (u8)
pub const MAX_HOPS: usize = u8::MAX as usize;

/// Response 메시지는 이름 한도에 이만큼 더 허용 (이름을 담은 결과 문구용)
pub const MESSAGE_SLACK: usize = 4096;

/// 응답 상태 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0x00,
    Failure = 0x01,
}

impl Status {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Status::Success),
            0x01 => Some(Status::Failure),
            _ => None,
        }
    }
}

/// 릴레이 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 이름으로 파일 요청
    Request { filename: String },

    /// 파일 직접 전송, 헤더 뒤에 `size` 바이트가 따라옴
    Send { filename: String, size: u64 },

    /// 남은 홉 목록과 함께 전송, 헤더 뒤에 `size` 바이트가 따라옴
    Relay {
        filename: String,
        hops: Vec<String>,
        size: u64,
    },

    /// 이전 Send/Relay에 대한 응답
    Response { status: Status, message: String },
}

impl Frame {
    pub fn success(message: impl Into<String>) -> Self {
        Frame::Response {
            status: Status::Success,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Frame::Response {
            status: Status::Failure,
            message: message.into(),
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Frame::Request { .. } => OP_REQUEST,
            Frame::Send { .. } => OP_SEND,
            Frame::Relay { .. } => OP_RELAY,
            Frame::Response { .. } => OP_RESPONSE,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Request { .. } => "Request",
            Frame::Send { .. } => "Send",
            Frame::Relay { .. } => "Relay",
            Frame::Response { .. } => "Response",
        }
    }

    /// 헤더 뒤에 따라오는 페이로드 크기
    pub fn payload_len(&self) -> u64 {
        match self {
            Frame::Send { size, .. } | Frame::Relay { size, .. } => *size,
            _ => 0,
        }
    }

    /// 헤더를 바이트로 직렬화
    ///
    /// 22바이트를 넘는 홉 주소는 잘라내지 않고 에러로 거부
    pub fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.opcode());

        match self {
            Frame::Request { filename } => {
                put_name(&mut buf, filename)?;
            }
            Frame::Send { filename, size } => {
                put_name(&mut buf, filename)?;
                buf.put_u64(*size);
            }
            Frame::Relay {
                filename,
                hops,
                size,
            } => {
                put_name(&mut buf, filename)?;
                if hops.len() > MAX_HOPS {
                    return Err(Error::TooManyHops(hops.len()));
                }
                buf.put_u8(hops.len() as u8);
                for hop in hops {
                    put_hop(&mut buf, hop)?;
                }
                buf.put_u64(*size);
            }
            Frame::Response { status, message } => {
                buf.put_u8(*status as u8);
                put_name(&mut buf, message)?;
            }
        }

        Ok(buf)
    }

    fn encoded_len(&self) -> usize {
        match self {
            Frame::Request { filename } => 1 + 4 + filename.len(),
            Frame::Send { filename, .. } => 1 + 4 + filename.len() + 8,
            Frame::Relay { filename, hops, .. } => {
                1 + 4 + filename.len() + 1 + hops.len() * HOP_ADDR_LEN + 8
            }
            Frame::Response { message, .. } => 1 + 1 + 4 + message.len(),
        }
    }

    /// 헤더를 스트림에 쓰기
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let buf = self.encode()?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// 스트림에서 프레임 헤더 하나 읽기
    ///
    /// opcode 이전에 상대가 정상 종료하면 `Ok(None)`
    pub async fn read_from<R>(reader: &mut R, max_name_len: usize) -> Result<Option<Frame>>
    where
        R: AsyncRead + Unpin,
    {
        let mut op = [0u8; 1];
        if reader.read(&mut op).await? == 0 {
            return Ok(None);
        }

        let frame = match op[0] {
            OP_REQUEST => Frame::Request {
                filename: read_name(reader, max_name_len).await?,
            },
            OP_SEND => {
                let filename = read_name(reader, max_name_len).await?;
                let size = read_u64(reader).await?;
                Frame::Send { filename, size }
            }
            OP_RELAY => {
                let filename = read_name(reader, max_name_len).await?;
                let count = read_u8(reader).await? as usize;
                let mut hops = Vec::with_capacity(count);
                for _ in 0..count {
                    hops.push(read_hop(reader).await?);
                }
                let size = read_u64(reader).await?;
                Frame::Relay {
                    filename,
                    hops,
                    size,
                }
            }
            OP_RESPONSE => {
                let code = read_u8(reader).await?;
                let status = Status::from_u8(code)
                    .ok_or_else(|| Error::MalformedFrame(format!("unknown status 0x{:02X}", code)))?;
                // 메시지는 파일 이름을 포함할 수 있음
                let limit = max_name_len.saturating_add(MESSAGE_SLACK);
                let message = read_name(reader, limit).await?;
                Frame::Response { status, message }
            }
            other => {
                return Err(Error::MalformedFrame(format!(
                    "unknown opcode 0x{:02X}",
                    other
                )))
            }
        };

        Ok(Some(frame))
    }

    /// 반드시 Response여야 하는 자리에서 읽기 (EOF도 조기 종료로 취급)
    pub async fn read_response<R>(reader: &mut R, max_len: usize) -> Result<(Status, String)>
    where
        R: AsyncRead + Unpin,
    {
        match Frame::read_from(reader, max_len).await? {
            Some(Frame::Response { status, message }) => Ok((status, message)),
            Some(other) => Err(Error::UnexpectedFrame {
                expected: "Response".into(),
                got: other.kind().into(),
            }),
            None => Err(Error::PrematureClose),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Request { filename } => write!(f, "Request({})", filename),
            Frame::Send { filename, size } => write!(f, "Send({}, {} bytes)", filename, size),
            Frame::Relay {
                filename,
                hops,
                size,
            } => write!(f, "Relay({}, {} bytes, via {:?})", filename, size, hops),
            Frame::Response { status, message } => write!(f, "Response({:?}, {})", status, message),
        }
    }
}

fn put_name(buf: &mut BytesMut, name: &str) -> Result<()> {
    let len = u32::try_from(name.len())
        .map_err(|_| Error::MalformedFrame(format!("field too long: {} bytes", name.len())))?;
    buf.put_u32(len);
    buf.put_slice(name.as_bytes());
    Ok(())
}

fn put_hop(buf: &mut BytesMut, hop: &str) -> Result<()> {
    let bytes = hop.as_bytes();
    if bytes.len() > HOP_ADDR_LEN {
        return Err(Error::HopAddressTooLong {
            addr: hop.to_string(),
            max: HOP_ADDR_LEN,
        });
    }
    buf.put_slice(bytes);
    buf.put_bytes(b' ', HOP_ADDR_LEN - bytes.len());
    Ok(())
}

async fn read_u8<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8> {
    let mut b = [0u8; 1];
    read_exact(reader, &mut b).await?;
    Ok(b[0])
}

async fn read_u32<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    read_exact(reader, &mut b).await?;
    Ok(u32::from_be_bytes(b))
}

async fn read_u64<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64> {
    let mut b = [0u8; 8];
    read_exact(reader, &mut b).await?;
    Ok(u64::from_be_bytes(b))
}

async fn read_name<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> Result<String> {
    let len = read_u32(reader).await? as usize;
    if len > max_len {
        return Err(Error::MalformedFrame(format!(
            "field length {} exceeds limit {}",
            len, max_len
        )));
    }
    let mut buf = vec![0u8; len];
    read_exact(reader, &mut buf).await?;
    String::from_utf8(buf).map_err(|_| Error::MalformedFrame("field is not valid UTF-8".into()))
}

async fn read_hop<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut buf = [0u8; HOP_ADDR_LEN];
    read_exact(reader, &mut buf).await?;
    let hop = std::str::from_utf8(&buf)
        .map_err(|_| Error::MalformedFrame("hop address is not valid UTF-8".into()))?
        .trim();
    if hop.is_empty() {
        return Err(Error::MalformedFrame("empty hop address".into()));
    }
    Ok(hop.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 4096;

    async fn decode(bytes: &[u8]) -> Result<Option<Frame>> {
        let mut reader = bytes;
        Frame::read_from(&mut reader, LIMIT).await
    }

    #[test]
    fn test_send_layout() {
        let frame = Frame::Send {
            filename: "a.bin".into(),
            size: 0x0102,
        };
        let bytes = frame.encode().unwrap();

        let mut expected = vec![OP_SEND, 0, 0, 0, 5];
        expected.extend_from_slice(b"a.bin");
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
        assert_eq!(&bytes[..], &expected[..]);
    }

    #[test]
    fn test_response_layout() {
        let bytes = Frame::failure("no").encode().unwrap();
        assert_eq!(&bytes[..], &[OP_RESPONSE, 0x01, 0, 0, 0, 2, b'n', b'o']);
    }

    #[test]
    fn test_relay_hop_padding() {
        let frame = Frame::Relay {
            filename: "f".into(),
            hops: vec!["10.0.0.3:3843".into()],
            size: 9,
        };
        let bytes = frame.encode().unwrap();

        // op + len + name + count
        let hop = &bytes[1 + 4 + 1 + 1..1 + 4 + 1 + 1 + HOP_ADDR_LEN];
        assert_eq!(&hop[..13], b"10.0.0.3:3843");
        assert!(hop[13..].iter().all(|&b| b == b' '));
        assert_eq!(bytes.len(), 1 + 4 + 1 + 1 + HOP_ADDR_LEN + 8);
    }

    #[tokio::test]
    async fn test_roundtrip_all_variants() {
        // 22바이트 경계 주소 포함
        let boundary = "relay-node-01.lan:3843".to_string();
        assert_eq!(boundary.len(), HOP_ADDR_LEN);

        let frames = vec![
            Frame::Request {
                filename: "report.pdf".into(),
            },
            Frame::Send {
                filename: "데이터.bin".into(),
                size: u64::MAX,
            },
            Frame::Relay {
                filename: "movie.mkv".into(),
                hops: vec!["10.0.0.2:3843".into(), boundary],
                size: 1 << 40,
            },
            Frame::success("file received"),
            Frame::failure(""),
        ];

        for frame in frames {
            let bytes = frame.encode().unwrap();
            let decoded = decode(&bytes).await.unwrap().unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_oversized_hop_rejected() {
        let frame = Frame::Relay {
            filename: "f".into(),
            hops: vec!["very-long-hostname.example:3843".into()],
            size: 1,
        };
        assert!(matches!(
            frame.encode(),
            Err(Error::HopAddressTooLong { max: HOP_ADDR_LEN, .. })
        ));
    }

    #[test]
    fn test_too_many_hops() {
        let frame = Frame::Relay {
            filename: "f".into(),
            hops: vec!["h:1".into(); MAX_HOPS + 1],
            size: 1,
        };
        assert!(matches!(frame.encode(), Err(Error::TooManyHops(256))));
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        assert!(decode(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_is_premature_close() {
        let bytes = Frame::Send {
            filename: "abc".into(),
            size: 10,
        }
        .encode()
        .unwrap();

        for cut in 1..bytes.len() {
            let err = decode(&bytes[..cut]).await.unwrap_err();
            assert!(matches!(err, Error::PrematureClose), "cut at {}", cut);
        }
    }

    #[tokio::test]
    async fn test_unknown_opcode_and_status() {
        assert!(matches!(
            decode(&[0x09]).await,
            Err(Error::MalformedFrame(_))
        ));
        assert!(matches!(
            decode(&[OP_RESPONSE, 0x07, 0, 0, 0, 0]).await,
            Err(Error::MalformedFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_name_limit() {
        let mut bytes = vec![OP_REQUEST];
        bytes.extend_from_slice(&(LIMIT as u32 + 1).to_be_bytes());
        assert!(matches!(
            decode(&bytes).await,
            Err(Error::MalformedFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_response_message_may_exceed_name_limit() {
        // 이름 한도에 꽉 찬 파일 이름을 담은 결과 문구
        let message = format!("file received: {} (3 bytes)", "n".repeat(LIMIT));
        let bytes = Frame::Response {
            status: Status::Success,
            message: message.clone(),
        }
        .encode()
        .unwrap();
        let mut reader = &bytes[..];
        let (status, decoded) = Frame::read_response(&mut reader, LIMIT).await.unwrap();
        assert_eq!(status, Status::Success);
        assert_eq!(decoded, message);

        let mut bytes = vec![OP_RESPONSE, Status::Failure as u8];
        bytes.extend_from_slice(&((LIMIT + MESSAGE_SLACK + 1) as u32).to_be_bytes());
        assert!(matches!(
            decode(&bytes).await,
            Err(Error::MalformedFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_read_response_rejects_other_frames() {
        let bytes = Frame::Request {
            filename: "x".into(),
        }
        .encode()
        .unwrap();
        let mut reader = &bytes[..];
        let err = Frame::read_response(&mut reader, LIMIT).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedFrame { .. }));

        let mut empty: &[u8] = &[];
        let err = Frame::read_response(&mut empty, LIMIT).await.unwrap_err();
        assert!(matches!(err, Error::PrematureClose));
    }
}
