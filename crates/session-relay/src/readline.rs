//! Minimal line editing over a raw downstream PTY.
//!
//! The downstream terminal is in raw mode, so the menu has to echo
//! keystrokes and handle backspace itself. Control characters beyond
//! carriage return, backspace, Ctrl-C, and Ctrl-D are ignored.

use crate::RelayResult;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// Read one line, echoing input. Returns `None` on EOF, Ctrl-C, or Ctrl-D.
pub async fn read_line_echo<R, W>(reader: &mut R, writer: &mut W) -> RelayResult<Option<String>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Ok(None);
        }
        match byte[0] {
            b'\r' | b'\n' => {
                writer.write_all(b"\r\n").await?;
                writer.flush().await?;
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            CTRL_C | CTRL_D => return Ok(None),
            BACKSPACE | DELETE => {
                if line.pop().is_some() {
                    writer.write_all(b"\x08 \x08").await?;
                    writer.flush().await?;
                }
            }
            b if b.is_ascii_graphic() || b == b' ' => {
                line.push(b);
                writer.write_all(&[b]).await?;
                writer.flush().await?;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_line_and_echoes() {
        let mut input: &[u8] = b"42\r";
        let mut echo = Vec::new();
        let line = read_line_echo(&mut input, &mut echo).await.unwrap();
        assert_eq!(line.as_deref(), Some("42"));
        assert_eq!(echo, b"42\r\n");
    }

    #[tokio::test]
    async fn test_backspace_edits_line() {
        let mut input: &[u8] = b"13\x7f2\r";
        let mut echo = Vec::new();
        let line = read_line_echo(&mut input, &mut echo).await.unwrap();
        assert_eq!(line.as_deref(), Some("12"));
    }

    #[tokio::test]
    async fn test_backspace_on_empty_line_is_ignored() {
        let mut input: &[u8] = b"\x7f\x7fa\r";
        let mut echo = Vec::new();
        let line = read_line_echo(&mut input, &mut echo).await.unwrap();
        assert_eq!(line.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_ctrl_c_and_eof_return_none() {
        let mut input: &[u8] = b"abc\x03";
        let mut echo = Vec::new();
        assert!(read_line_echo(&mut input, &mut echo)
            .await
            .unwrap()
            .is_none());

        let mut empty: &[u8] = b"";
        assert!(read_line_echo(&mut empty, &mut echo)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_non_printable_bytes_ignored() {
        let mut input: &[u8] = b"\x1b[Aok\r";
        let mut echo = Vec::new();
        let line = read_line_echo(&mut input, &mut echo).await.unwrap();
        // The escape byte is dropped; the printable remainder survives.
        assert_eq!(line.as_deref(), Some("[Aok"));
    }
}
