//! Byte-level framing of the direct peer-to-peer fetch.
//!
//! ```text
//! requester -> responder:  <filename>\n
//! responder -> requester:  FILE_NOT_FOUND\n                  (then close)
//!                      or  <decimal size>\n<raw bytes...>    (then close)
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::utils::{P2PError, Result};

pub const FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
pub const MAX_REQUEST_LEN: usize = 1024;
pub const MAX_HEADER_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHeader {
    NotFound,
    Size(u64),
}

/// Read one `\n`-terminated line of at most `max_len` bytes (terminator excluded).
///
/// `Ok(None)` means the stream ended before any byte arrived.
pub async fn read_line<R>(reader: &mut R, max_len: usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = (max_len + 1) as u64;
    (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;

    if buf.last() != Some(&b'\n') {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf.len() > max_len {
            return Err(P2PError::ProtocolError(format!(
                "line longer than {} bytes",
                max_len
            )));
        }
        return Err(P2PError::ProtocolError(
            "connection closed mid-line".to_string(),
        ));
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| P2PError::ProtocolError("line is not valid UTF-8".to_string()))
}

pub async fn write_request<W>(writer: &mut W, filename: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(filename.len() + 1);
    frame.extend_from_slice(filename.as_bytes());
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_request<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    read_line(reader, MAX_REQUEST_LEN)
        .await?
        .ok_or_else(|| P2PError::ProtocolError("connection closed before request".to_string()))
}

pub async fn write_header<W>(writer: &mut W, header: ResponseHeader) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = match header {
        ResponseHeader::NotFound => format!("{}\n", FILE_NOT_FOUND),
        ResponseHeader::Size(size) => format!("{}\n", size),
    };
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_header<R>(reader: &mut R) -> Result<ResponseHeader>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader, MAX_HEADER_LEN)
        .await?
        .ok_or_else(|| P2PError::ProtocolError("connection closed before header".to_string()))?;

    if line == FILE_NOT_FOUND {
        return Ok(ResponseHeader::NotFound);
    }
    line.trim()
        .parse::<u64>()
        .map(ResponseHeader::Size)
        .map_err(|_| P2PError::ProtocolError(format!("unparseable size header '{}'", line)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_request_line() {
        let mut reader = BufReader::new(&b"notes.txt\n"[..]);
        assert_eq!(read_request(&mut reader).await.unwrap(), "notes.txt");

        let mut crlf = BufReader::new(&b"notes.txt\r\n"[..]);
        assert_eq!(read_request(&mut crlf).await.unwrap(), "notes.txt");
    }

    #[tokio::test]
    async fn test_request_errors() {
        let mut empty = BufReader::new(&b""[..]);
        assert!(matches!(
            read_request(&mut empty).await,
            Err(P2PError::ProtocolError(_))
        ));

        let mut unterminated = BufReader::new(&b"notes.txt"[..]);
        assert!(matches!(
            read_request(&mut unterminated).await,
            Err(P2PError::ProtocolError(_))
        ));

        let long = vec![b'a'; MAX_REQUEST_LEN + 10];
        let mut too_long = BufReader::new(&long[..]);
        assert!(matches!(
            read_request(&mut too_long).await,
            Err(P2PError::ProtocolError(_))
        ));
    }

    #[tokio::test]
    async fn test_header_leaves_payload_in_reader() {
        let mut reader = BufReader::new(&b"5\nhello"[..]);
        assert_eq!(read_header(&mut reader).await.unwrap(), ResponseHeader::Size(5));
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"hello");
    }

    #[tokio::test]
    async fn test_header_variants() {
        let mut not_found = BufReader::new(&b"FILE_NOT_FOUND\n"[..]);
        assert_eq!(
            read_header(&mut not_found).await.unwrap(),
            ResponseHeader::NotFound
        );

        let mut garbage = BufReader::new(&b"twelve\n"[..]);
        assert!(matches!(
            read_header(&mut garbage).await,
            Err(P2PError::ProtocolError(_))
        ));

        let mut out = Vec::new();
        write_header(&mut out, ResponseHeader::Size(1024)).await.unwrap();
        assert_eq!(out, b"1024\n");
    }
}
