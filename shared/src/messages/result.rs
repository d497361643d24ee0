//! Worker → Coordinator result messages and their framing
//!
//! Each worker writes exactly one length-prefixed bincode frame into its
//! result channel. The coordinator decodes whatever bytes it drained once
//! the worker has exited.

use serde::{Deserialize, Serialize};

use super::snapshot::CapturedFailure;
use crate::errors::{SharedError, SharedResult};

/// Upper bound on a single encoded result
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Outcome reported by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultMessage {
    Success,
    Failure(CapturedFailure),
}

impl ResultMessage {
    /// Encode as one frame: big-endian u32 length followed by the payload
    pub fn encode_frame(&self) -> SharedResult<Vec<u8>> {
        let data = bincode::serialize(self).map_err(|e| SharedError::SerializationError {
            message: e.to_string(),
        })?;

        if data.len() > MAX_FRAME_LEN {
            return Err(SharedError::protocol(format!("Message too large: {} bytes", data.len())));
        }

        let mut frame = Vec::with_capacity(LEN_PREFIX + data.len());
        frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
        frame.extend_from_slice(&data);
        Ok(frame)
    }

    /// Decode the complete contents of a drained result channel
    ///
    /// Returns `Ok(None)` when the channel held no bytes at all. Anything other
    /// than exactly zero or one complete frame is a protocol error.
    pub fn decode_channel(buf: &[u8]) -> SharedResult<Option<ResultMessage>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if buf.len() < LEN_PREFIX {
            return Err(SharedError::protocol(format!(
                "Truncated length prefix: {} bytes",
                buf.len()
            )));
        }

        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&buf[..LEN_PREFIX]);
        let length = u32::from_be_bytes(len_bytes) as usize;

        if length > MAX_FRAME_LEN {
            return Err(SharedError::protocol(format!("Message too large: {length} bytes")));
        }

        let body = &buf[LEN_PREFIX..];
        if body.len() < length {
            return Err(SharedError::protocol(format!(
                "Truncated message: expected {length} bytes, got {}",
                body.len()
            )));
        }
        if body.len() > length {
            return Err(SharedError::protocol(format!(
                "Unexpected {} trailing bytes after result message",
                body.len() - length
            )));
        }

        bincode::deserialize(body)
            .map(Some)
            .map_err(|e| SharedError::DeserializationError { message: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::snapshot::{FailureKind, StackFrame};

    fn sample_failure() -> ResultMessage {
        ResultMessage::Failure(CapturedFailure::new(
            FailureKind::Assertion,
            "expected true",
            vec![
                StackFrame::new("worker/src/entry.rs", 88, "worker::capture::isolated_entry"),
                StackFrame::new("coordinator/src/suite/sandbox_cases.rs", 31, "sandbox_trivial")
                    .with_source_line("assert!(ctx.sandbox.is_restricted(), \"expected true\");"),
            ],
        ))
    }

    #[test]
    fn test_empty_channel_is_no_message() {
        assert!(ResultMessage::decode_channel(&[]).unwrap().is_none());
    }

    #[test]
    fn test_failure_survives_framing() {
        let message = sample_failure();
        let frame = message.encode_frame().unwrap();
        let decoded = ResultMessage::decode_channel(&frame).unwrap();
        assert_eq!(decoded, Some(message));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let frame = ResultMessage::Success.encode_frame().unwrap();
        assert!(ResultMessage::decode_channel(&frame[..2]).is_err());

        let frame = sample_failure().encode_frame().unwrap();
        let err = ResultMessage::decode_channel(&frame[..frame.len() - 1]).unwrap_err();
        assert!(err.to_string().contains("Truncated message"));
    }

    #[test]
    fn test_second_message_rejected() {
        let mut buf = ResultMessage::Success.encode_frame().unwrap();
        buf.extend(ResultMessage::Success.encode_frame().unwrap());
        let err = ResultMessage::decode_channel(&buf).unwrap_err();
        assert!(err.to_string().contains("trailing bytes"));
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let buf = (u32::MAX).to_be_bytes();
        let err = ResultMessage::decode_channel(&buf).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}
