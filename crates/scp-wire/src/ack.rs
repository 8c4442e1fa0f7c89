//! ACK bytes: the per-step acknowledgements both peers exchange.

use crate::{ScpError, ScpResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Acknowledgement: proceed.
pub const ACK_OK: u8 = 0x00;
/// Acknowledgement: warning, followed by a message line.
pub const ACK_WARN: u8 = 0x01;
/// Acknowledgement: fatal, followed by a message line.
pub const ACK_FATAL: u8 = 0x02;

/// A parsed acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub code: u8,
    pub message: String,
}

impl Ack {
    pub fn is_ok(&self) -> bool {
        self.code == ACK_OK
    }

    /// Convert into a result, failing on warning or fatal.
    pub fn into_result(self) -> ScpResult<()> {
        match self.code {
            ACK_OK => Ok(()),
            ACK_WARN => Err(ScpError::RemoteWarning(self.message)),
            _ => Err(ScpError::RemoteFatal(self.message)),
        }
    }
}

/// Read one acknowledgement. Non-zero codes carry a message line.
pub async fn read_ack<R: AsyncRead + Unpin>(reader: &mut R) -> ScpResult<Ack> {
    let code = reader.read_u8().await?;
    if code == ACK_OK {
        return Ok(Ack {
            code,
            message: String::new(),
        });
    }

    let mut message = Vec::new();
    loop {
        let byte = reader.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        message.push(byte);
        if message.len() > 4096 {
            return Err(ScpError::Protocol("ACK message too long".to_string()));
        }
    }

    Ok(Ack {
        code,
        message: String::from_utf8_lossy(&message).into_owned(),
    })
}

/// Write the OK acknowledgement.
pub async fn write_ok<W: AsyncWrite + Unpin>(writer: &mut W) -> ScpResult<()> {
    writer.write_all(&[ACK_OK]).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a warning acknowledgement with a single-line message.
pub async fn write_warning<W: AsyncWrite + Unpin>(writer: &mut W, message: &str) -> ScpResult<()> {
    write_message(writer, ACK_WARN, message).await
}

/// Write a fatal acknowledgement with a single-line message. Embedded
/// newlines are replaced with spaces so the record stays one line.
pub async fn write_fatal<W: AsyncWrite + Unpin>(writer: &mut W, message: &str) -> ScpResult<()> {
    write_message(writer, ACK_FATAL, message).await
}

async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    code: u8,
    message: &str,
) -> ScpResult<()> {
    let line = message.replace('\n', " ");
    writer.write_all(&[code]).await?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_ok() {
        let mut input: &[u8] = &[0x00];
        let ack = read_ack(&mut input).await.unwrap();
        assert!(ack.is_ok());
        assert!(ack.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_read_fatal_with_message() {
        let mut input: &[u8] = b"\x02scp: no such file\n";
        let ack = read_ack(&mut input).await.unwrap();
        assert_eq!(ack.code, ACK_FATAL);
        assert_eq!(ack.message, "scp: no such file");
        assert!(matches!(
            ack.into_result(),
            Err(ScpError::RemoteFatal(msg)) if msg == "scp: no such file"
        ));
    }

    #[tokio::test]
    async fn test_read_warning() {
        let mut input: &[u8] = b"\x01slow down\n";
        let ack = read_ack(&mut input).await.unwrap();
        assert_eq!(ack.code, ACK_WARN);
        assert!(matches!(
            ack.into_result(),
            Err(ScpError::RemoteWarning(_))
        ));
    }

    #[tokio::test]
    async fn test_write_fatal_collapses_newlines() {
        let mut out = Vec::new();
        write_fatal(&mut out, "line one\nline two").await.unwrap();
        assert_eq!(out, b"\x02line one line two\n");
    }

    #[tokio::test]
    async fn test_write_ok_single_byte() {
        let mut out = Vec::new();
        write_ok(&mut out).await.unwrap();
        assert_eq!(out, vec![0x00]);
    }
}
