//! Length-prefixed JSON framing for the core's request/response/update
//! transport (§6).
//!
//! Every frame is a `u32` big-endian length prefix followed by that many
//! bytes of UTF-8 JSON.

use crate::dispatch::{OpId, UpdateId};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// One request envelope: `{id, kind, payload}` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub kind: String,
    pub payload: serde_json::Value,
}

/// One outgoing update envelope: `{kind, opId, updateId, payload}` (§4.8,
/// §6). `op_id` is `None` for updates not tied to a mutating request (e.g.
/// an unsolicited status ping).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEnvelope {
    pub kind: String,
    pub op_id: Option<u64>,
    pub update_id: u64,
    pub payload: serde_json::Value,
}

impl StreamEnvelope {
    /// Builds an update tied to a mutating operation.
    pub fn for_operation(kind: impl Into<String>, op_id: OpId, update_id: UpdateId, payload: serde_json::Value) -> Self {
        Self { kind: kind.into(), op_id: Some(op_id.0), update_id: update_id.0, payload }
    }

    /// Builds an update with no owning operation (e.g. a status push).
    pub fn unsolicited(kind: impl Into<String>, update_id: UpdateId, payload: serde_json::Value) -> Self {
        Self { kind: kind.into(), op_id: None, update_id: update_id.0, payload }
    }
}

/// Reads one length-prefixed JSON frame from `reader`. Returns `Ok(None)` on
/// a clean EOF between frames (the peer closed the stream); any other I/O
/// failure, or malformed JSON, is `ErrorUnexpected`.
pub fn read_frame<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> CoreResult<Option<T>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    let value = serde_json::from_slice(&body)
        .map_err(|err| CoreError::ErrorUnexpected(format!("malformed frame: {err}")))?;
    Ok(Some(value))
}

/// Writes one length-prefixed JSON frame to `writer`.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> CoreResult<()> {
    let body = serde_json::to_vec(value)?;
    let len = u32::try_from(body.len())
        .map_err(|_| CoreError::ErrorUnexpected("frame too large to encode".into()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_round_trips() {
        let envelope = Envelope { id: 1, kind: "step".into(), payload: serde_json::json!({"a": 1}) };
        let mut buf = Vec::new();
        write_frame(&mut buf, &envelope).unwrap();
        let mut cursor = Cursor::new(buf);
        let read_back: Envelope = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(read_back.id, 1);
        assert_eq!(read_back.kind, "step");
    }

    #[test]
    fn clean_eof_between_frames_is_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let frame: Option<Envelope> = read_frame(&mut cursor).unwrap();
        assert!(frame.is_none());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut cursor = Cursor::new(vec![10, 0, 0, 0, 1, 2]);
        let result: CoreResult<Option<Envelope>> = read_frame(&mut cursor);
        assert!(result.is_err());
    }

    #[test]
    fn stream_envelope_echoes_operation_ids() {
        let envelope = StreamEnvelope::for_operation("status", OpId(7), UpdateId(2), serde_json::json!(null));
        assert_eq!(envelope.op_id, Some(7));
        assert_eq!(envelope.update_id, 2);
    }
}
