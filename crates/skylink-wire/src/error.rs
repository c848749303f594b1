use thiserror::Error;

/// Why a buffer could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("truncated packet: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unsupported header version {0}")]
    BadVersion(u8),
    #[error("unknown packet type {0:#04x}")]
    UnknownPacketType(u8),
    #[error("unknown negotiation command {0}")]
    UnknownCommand(u8),
    #[error("payload length mismatch: expected exactly {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

pub(crate) fn need(buf: &[u8], need: usize) -> Result<(), WireError> {
    if buf.len() < need {
        Err(WireError::Truncated {
            need,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}
