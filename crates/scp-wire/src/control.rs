//! Typed control records: `C` (file), `D`/`E` (directory), `T` (times).

use crate::ack::{Ack, ACK_FATAL, ACK_WARN};
use crate::{ScpError, ScpResult};
use tokio::io::{AsyncRead, AsyncReadExt};

const MAX_CONTROL_LINE: usize = 4096;

/// A single control record as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRecord {
    /// `C<perm> <size> <name>` — a file follows.
    File {
        /// Octal permission string, validated strictly.
        perm: String,
        size: u64,
        name: String,
    },
    /// `D<perm> 0 <name>` — directory start. Not relayed.
    DirStart { perm: String, name: String },
    /// `E` — directory end. Not relayed.
    DirEnd,
    /// `T<mtime> 0 <atime> 0` — timestamp preamble, accepted and forwarded.
    Time { mtime: u64, atime: u64 },
}

impl ControlRecord {
    /// Read one control record line (through the terminating `\n`).
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> ScpResult<Self> {
        let mut line = Vec::new();
        loop {
            let byte = reader.read_u8().await?;
            if byte == b'\n' {
                break;
            }
            line.push(byte);
            if line.len() > MAX_CONTROL_LINE {
                return Err(ScpError::Protocol("control record too long".to_string()));
            }
        }
        let line = String::from_utf8(line)
            .map_err(|_| ScpError::Protocol("control record is not UTF-8".to_string()))?;
        Self::parse(&line)
    }

    /// Parse a control record line without its terminating `\n`.
    pub fn parse(line: &str) -> ScpResult<Self> {
        let mut chars = line.chars();
        let flag = chars
            .next()
            .ok_or_else(|| ScpError::Protocol("empty control record".to_string()))?;
        let rest = chars.as_str();

        match flag {
            'C' => {
                let (perm, size, name) = parse_file_fields(rest)?;
                Ok(ControlRecord::File { perm, size, name })
            }
            'D' => {
                let (perm, _size, name) = parse_file_fields(rest)?;
                Ok(ControlRecord::DirStart { perm, name })
            }
            'E' => {
                if !rest.is_empty() {
                    return Err(ScpError::Protocol(
                        "unexpected fields after directory end".to_string(),
                    ));
                }
                Ok(ControlRecord::DirEnd)
            }
            'T' => {
                let fields: Vec<&str> = rest.split(' ').collect();
                if fields.len() != 4 {
                    return Err(ScpError::Protocol(format!(
                        "expected 4 time fields, got {}",
                        fields.len()
                    )));
                }
                let mtime = parse_u64(fields[0], "mtime")?;
                let atime = parse_u64(fields[2], "atime")?;
                Ok(ControlRecord::Time { mtime, atime })
            }
            other => Err(ScpError::Protocol(format!(
                "expected control record, got {other:?}"
            ))),
        }
    }

    /// Encode the record including its terminating `\n`.
    pub fn encode(&self) -> String {
        match self {
            ControlRecord::File { perm, size, name } => format!("C{perm} {size} {name}\n"),
            ControlRecord::DirStart { perm, name } => format!("D{perm} 0 {name}\n"),
            ControlRecord::DirEnd => "E\n".to_string(),
            ControlRecord::Time { mtime, atime } => format!("T{mtime} 0 {atime} 0\n"),
        }
    }
}

/// What a source peer sends where a control record is expected: either a
/// record or a warning/fatal acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRecord {
    Control(ControlRecord),
    Failure(Ack),
}

/// Read the source's next record, tolerating an error acknowledgement in
/// its place.
pub async fn read_source_record<R: AsyncRead + Unpin>(reader: &mut R) -> ScpResult<SourceRecord> {
    let first = reader.read_u8().await?;
    if first == ACK_WARN || first == ACK_FATAL {
        let mut message = Vec::new();
        loop {
            let byte = reader.read_u8().await?;
            if byte == b'\n' {
                break;
            }
            message.push(byte);
            if message.len() > MAX_CONTROL_LINE {
                return Err(ScpError::Protocol("ACK message too long".to_string()));
            }
        }
        return Ok(SourceRecord::Failure(Ack {
            code: first,
            message: String::from_utf8_lossy(&message).into_owned(),
        }));
    }

    let mut line = vec![first];
    loop {
        let byte = reader.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        line.push(byte);
        if line.len() > MAX_CONTROL_LINE {
            return Err(ScpError::Protocol("control record too long".to_string()));
        }
    }
    let line = String::from_utf8(line)
        .map_err(|_| ScpError::Protocol("control record is not UTF-8".to_string()))?;
    Ok(SourceRecord::Control(ControlRecord::parse(&line)?))
}

/// Parse `<perm> <size> <name>` with a strictly octal permission string.
fn parse_file_fields(rest: &str) -> ScpResult<(String, u64, String)> {
    let mut fields = rest.splitn(3, ' ');
    let perm = fields
        .next()
        .ok_or_else(|| ScpError::Protocol("missing permission field".to_string()))?;
    let size = fields
        .next()
        .ok_or_else(|| ScpError::Protocol("missing size field".to_string()))?;
    let name = fields
        .next()
        .ok_or_else(|| ScpError::Protocol("missing filename field".to_string()))?;

    validate_octal(perm)?;
    let size = parse_u64(size, "size")?;
    if name.is_empty() || name.contains('/') {
        return Err(ScpError::Protocol(format!("invalid filename {name:?}")));
    }

    Ok((perm.to_string(), size, name.to_string()))
}

/// Permissions arrive as an octal string; anything else is a protocol
/// violation.
fn validate_octal(perm: &str) -> ScpResult<()> {
    if perm.is_empty() || perm.len() > 4 || !perm.chars().all(|c| ('0'..='7').contains(&c)) {
        return Err(ScpError::Protocol(format!(
            "invalid octal permission {perm:?}"
        )));
    }
    Ok(())
}

fn parse_u64(field: &str, what: &str) -> ScpResult<u64> {
    field
        .parse::<u64>()
        .map_err(|_| ScpError::Protocol(format!("invalid {what} field {field:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_record() {
        let record = ControlRecord::parse("C0644 11 hello.txt").unwrap();
        assert_eq!(
            record,
            ControlRecord::File {
                perm: "0644".into(),
                size: 11,
                name: "hello.txt".into(),
            }
        );
    }

    #[test]
    fn test_parse_file_name_with_spaces() {
        let record = ControlRecord::parse("C0644 5 my file.txt").unwrap();
        assert_eq!(
            record,
            ControlRecord::File {
                perm: "0644".into(),
                size: 5,
                name: "my file.txt".into(),
            }
        );
    }

    #[test]
    fn test_parse_directory_records() {
        assert_eq!(
            ControlRecord::parse("D0755 0 foo").unwrap(),
            ControlRecord::DirStart {
                perm: "0755".into(),
                name: "foo".into(),
            }
        );
        assert_eq!(ControlRecord::parse("E").unwrap(), ControlRecord::DirEnd);
    }

    #[test]
    fn test_parse_time_record() {
        assert_eq!(
            ControlRecord::parse("T1700000000 0 1700000001 0").unwrap(),
            ControlRecord::Time {
                mtime: 1_700_000_000,
                atime: 1_700_000_001,
            }
        );
    }

    #[test]
    fn test_reject_non_octal_permission() {
        assert!(ControlRecord::parse("C0648 11 hello.txt").is_err());
        assert!(ControlRecord::parse("C06f4 11 hello.txt").is_err());
        assert!(ControlRecord::parse("Crwxr 11 hello.txt").is_err());
    }

    #[test]
    fn test_reject_malformed_records() {
        assert!(ControlRecord::parse("").is_err());
        assert!(ControlRecord::parse("C0644").is_err());
        assert!(ControlRecord::parse("C0644 notanumber x").is_err());
        assert!(ControlRecord::parse("X0644 11 hello.txt").is_err());
        assert!(ControlRecord::parse("C0644 11 ../etc/passwd").is_err());
        assert!(ControlRecord::parse("E trailing").is_err());
    }

    #[test]
    fn test_encode_roundtrip() {
        let record = ControlRecord::File {
            perm: "0644".into(),
            size: 11,
            name: "hello.txt".into(),
        };
        assert_eq!(record.encode(), "C0644 11 hello.txt\n");
        assert_eq!(
            ControlRecord::parse(record.encode().trim_end()).unwrap(),
            record
        );
    }

    #[tokio::test]
    async fn test_read_source_record_control() {
        let mut input: &[u8] = b"C0644 11 hello.txt\n";
        let record = read_source_record(&mut input).await.unwrap();
        assert!(matches!(
            record,
            SourceRecord::Control(ControlRecord::File { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_source_record_failure() {
        let mut input: &[u8] = b"\x01scp: /x: No such file or directory\n";
        match read_source_record(&mut input).await.unwrap() {
            SourceRecord::Failure(ack) => {
                assert_eq!(ack.code, 0x01);
                assert!(ack.message.contains("No such file"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_from_stream() {
        let mut input: &[u8] = b"C0600 3 id_rsa\nxyz";
        let record = ControlRecord::read(&mut input).await.unwrap();
        assert_eq!(
            record,
            ControlRecord::File {
                perm: "0600".into(),
                size: 3,
                name: "id_rsa".into(),
            }
        );
        // Payload bytes stay in the reader.
        assert_eq!(input, b"xyz");
    }
}
