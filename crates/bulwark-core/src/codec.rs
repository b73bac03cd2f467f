//! Newline-delimited JSON framing with a hard size bound
//!
//! A frame is one JSON document followed by `\n`. Readers never buffer more
//! than `limit + 1` bytes, so an oversized frame is rejected before any
//! parsing happens.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};

/// Read the raw bytes of one frame, without the trailing newline
pub async fn read_frame_bytes<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut limited = (&mut *reader).take(limit as u64 + 1);
    let read = limited.read_until(b'\n', &mut buf).await?;

    if read == 0 {
        return Err(ProtocolError::UnexpectedEof);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > limit {
        return Err(ProtocolError::FrameTooLarge { limit });
    }

    if buf.iter().all(u8::is_ascii_whitespace) {
        return Err(ProtocolError::Malformed("empty message".to_string()));
    }

    Ok(buf)
}

/// Discard input up to and including the next newline, or to EOF
///
/// Used after [`ProtocolError::FrameTooLarge`] so the peer can finish
/// writing and still read the rejection. Nothing is buffered beyond the
/// reader's own buffer. Returns the number of bytes skipped.
pub async fn skip_frame<R>(reader: &mut R) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0u64;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(skipped);
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(skipped + pos as u64 + 1);
            }
            None => {
                let len = available.len();
                reader.consume(len);
                skipped += len as u64;
            }
        }
    }
}

/// Read and decode one frame
pub async fn read_frame<R, T>(reader: &mut R, limit: usize) -> Result<T>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let bytes = read_frame_bytes(reader, limit).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Encode and write one frame, then flush
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_write_then_read() {
        let request = Request::module_info("firewall");
        let mut wire = Vec::new();
        write_frame(&mut wire, &request).await.unwrap();
        assert_eq!(wire.last(), Some(&b'\n'));

        let mut reader = BufReader::new(wire.as_slice());
        let decoded: Request = read_frame(&mut reader, 1024).await.unwrap();
        assert_eq!(decoded, request);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let wire = vec![b'a'; 2048];
        let mut reader = BufReader::new(wire.as_slice());

        let err = read_frame_bytes(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn test_skip_after_oversized_frame() {
        let mut wire = vec![b'a'; 5000];
        wire.push(b'\n');
        wire.extend_from_slice(b"{\"type\":\"ping\",\"request_id\":\"next\"}\n");
        let mut reader = BufReader::with_capacity(64, wire.as_slice());

        let err = read_frame_bytes(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));

        skip_frame(&mut reader).await.unwrap();
        let next: Request = read_frame(&mut reader, 1024).await.unwrap();
        assert_eq!(next.request_id(), "next");

        assert_eq!(skip_frame(&mut reader).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_frame_at_limit_accepted() {
        let mut wire = vec![b' '; 9];
        wire.push(b'1');
        wire.push(b'\n');
        let mut reader = BufReader::new(wire.as_slice());

        let bytes = read_frame_bytes(&mut reader, 10).await.unwrap();
        assert_eq!(bytes.len(), 10);
    }

    #[tokio::test]
    async fn test_empty_stream_is_eof() {
        let mut reader = BufReader::new(&b""[..]);
        let err = read_frame_bytes(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_blank_line_is_malformed() {
        let mut reader = BufReader::new(&b"  \n"[..]);
        let err = read_frame_bytes(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let mut reader = BufReader::new(&b"{not json\n"[..]);
        let err = read_frame::<_, Request>(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_missing_newline_at_eof_still_decodes() {
        let mut reader = BufReader::new(&br#"{"type":"ping","request_id":"p"}"#[..]);
        let request: Request = read_frame(&mut reader, 1024).await.unwrap();
        assert_eq!(request.request_id(), "p");
    }
}
