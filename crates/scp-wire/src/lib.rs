//! SCP wire protocol.
//!
//! SCP is a line-oriented control protocol layered on an exec channel. Each
//! direction writes typed records terminated by `\n` and single-byte ACKs:
//! `0x00` ok, `0x01` warning + message line, `0x02` fatal + message line.
//! This crate owns the codec and the payload spool; the relay crate drives
//! it against live channels.

mod ack;
mod control;
mod error;
mod spool;

pub use ack::{read_ack, write_fatal, write_ok, write_warning, Ack, ACK_FATAL, ACK_OK, ACK_WARN};
pub use control::{read_source_record, ControlRecord, SourceRecord};
pub use error::{ScpError, ScpResult};
pub use spool::SpoolFile;
