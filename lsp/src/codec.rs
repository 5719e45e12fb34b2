//! Framed JSON-RPC transport.
//!
//! Language servers frame every message as `Content-Length: N\r\n\r\n<json>`
//! over stdio. [`FrameReader`] and [`FrameWriter`] handle the header parsing
//! and byte-exact body reads on either side.

use codemap_types::{ProtocolError, TransportError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body; a server announcing more than this is
/// treated as a protocol violation rather than an allocation request.
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Reads length-prefixed JSON-RPC frames from a byte stream.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame. `Ok(None)` means the stream ended cleanly at a
    /// frame boundary; EOF anywhere inside a frame is an error.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, TransportError> {
        let Some(content_length) = self.read_content_length().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                size: content_length,
                max: MAX_FRAME_BYTES,
            }
            .into());
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;

        let value = serde_json::from_slice(&body).map_err(ProtocolError::MalformedBody)?;
        Ok(Some(value))
    }

    /// Consume header lines up to the blank separator and return the declared
    /// body length, or `None` on EOF before any header byte.
    async fn read_content_length(&mut self) -> Result<Option<usize>, TransportError> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut in_headers = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                if in_headers {
                    // EOF between header lines is never a clean shutdown,
                    // even if Content-Length was already seen.
                    return Err(ProtocolError::EofInHeaders.into());
                }
                return Ok(None);
            }
            in_headers = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let value = value.trim();
                content_length = Some(
                    value
                        .parse()
                        .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()))?,
                );
            }
            // Other headers (Content-Type, ...) are ignored.
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => Err(ProtocolError::MissingContentLength.into()),
        }
    }
}

/// Writes length-prefixed JSON-RPC frames to a byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<(), TransportError> {
        let body = serde_json::to_vec(msg).map_err(ProtocolError::MalformedBody)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_single_frame() {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "textDocument/documentSymbol",
            "params": { "textDocument": { "uri": "file:///a.py" } }
        });

        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_frame(&msg).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), msg);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn frames_stay_in_order() {
        let first = serde_json::json!({"jsonrpc": "2.0", "id": 1});
        let second = serde_json::json!({"jsonrpc": "2.0", "id": 2});

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&first).await.unwrap();
        writer.write_frame(&second).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), first);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), second);
    }

    #[tokio::test]
    async fn empty_stream_is_clean_eof() {
        let mut reader = FrameReader::new(&b""[..]);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_between_header_lines_is_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 10\r\n"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn eof_after_foreign_header_is_error() {
        let mut reader = FrameReader::new(&b"Content-Type: application/json\r\n"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn missing_content_length_rejected() {
        let mut reader = FrameReader::new(&b"Content-Type: application/json\r\n\r\n{}"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn header_name_is_case_insensitive() {
        let body = r#"{"jsonrpc":"2.0","id":3}"#;
        let frame = format!("content-length: {}\r\n\r\n{body}", body.len());
        let mut reader = FrameReader::new(frame.as_bytes());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["id"], 3);
    }

    #[tokio::test]
    async fn extra_headers_ignored() {
        let body = r#"{"jsonrpc":"2.0","id":4}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n{body}",
            body.len(),
        );
        let mut reader = FrameReader::new(frame.as_bytes());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["id"], 4);
    }

    #[tokio::test]
    async fn truncated_body_is_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 100\r\n\r\n{\"id\""[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn oversized_frame_rejected_without_reading_body() {
        let frame = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(frame.as_bytes());
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn non_numeric_content_length_rejected() {
        let mut reader = FrameReader::new(&b"Content-Length: twelve\r\n\r\n"[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::InvalidContentLength(_))
        ));
    }

    #[tokio::test]
    async fn invalid_json_body_rejected() {
        let body = b"}{ not json";
        let frame = format!("Content-Length: {}\r\n\r\n", body.len());
        let mut buf = frame.into_bytes();
        buf.extend_from_slice(body);
        let mut reader = FrameReader::new(buf.as_slice());
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn content_length_counts_bytes_not_chars() {
        let msg = serde_json::json!({"name": "Müller"});
        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_frame(&msg).await.unwrap();

        let body = serde_json::to_vec(&msg).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["name"], "Müller");
    }
}
