//! Error taxonomy: wire-visible `QuicError` vs. process-local `LocalError`.
//!
//! `QuicError` values are carried in CONNECTION_CLOSE/APPLICATION_CLOSE frames.
//! `LocalError` values never reach the wire and tell the packet pipeline how to
//! treat the triggering packet (drop silently, drop the connection, etc).

use thiserror::Error;

pub type QuicheResult<T> = Result<T, QuicheError>;

/// Transport error codes, wire-visible via CONNECTION_CLOSE. Values 0x0100-0x01ff
/// are reserved for TLS alert codes mapped into QUIC's error space.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuicError {
    #[error("NO_ERROR")]
    NoError,
    #[error("INTERNAL_ERROR")]
    InternalError,
    #[error("SERVER_BUSY")]
    ServerBusy,
    #[error("FLOW_CONTROL_ERROR")]
    FlowControlError,
    #[error("STREAM_ID_ERROR")]
    StreamIdError,
    #[error("STREAM_STATE_ERROR")]
    StreamStateError,
    #[error("FINAL_OFFSET_ERROR")]
    FinalOffsetError,
    #[error("FRAME_ENCODING_ERROR")]
    FrameEncodingError,
    #[error("TRANSPORT_PARAMETER_ERROR")]
    TransportParameterError,
    #[error("VERSION_NEGOTIATION_ERROR")]
    VersionNegotiationError,
    #[error("PROTOCOL_VIOLATION")]
    ProtocolViolation,
    #[error("TLS alert {0:#x}")]
    TlsAlert(u16),
}

impl QuicError {
    pub const fn code(self) -> u64 {
        match self {
            QuicError::NoError => 0x00,
            QuicError::InternalError => 0x01,
            QuicError::ServerBusy => 0x02,
            QuicError::FlowControlError => 0x03,
            QuicError::StreamIdError => 0x04,
            QuicError::StreamStateError => 0x05,
            QuicError::FinalOffsetError => 0x06,
            QuicError::FrameEncodingError => 0x07,
            QuicError::TransportParameterError => 0x08,
            QuicError::VersionNegotiationError => 0x09,
            QuicError::ProtocolViolation => 0x0a,
            QuicError::TlsAlert(alert) => 0x100 + alert as u64,
        }
    }

    pub fn from_code(code: u64) -> Self {
        match code {
            0x00 => QuicError::NoError,
            0x01 => QuicError::InternalError,
            0x02 => QuicError::ServerBusy,
            0x03 => QuicError::FlowControlError,
            0x04 => QuicError::StreamIdError,
            0x05 => QuicError::StreamStateError,
            0x06 => QuicError::FinalOffsetError,
            0x07 => QuicError::FrameEncodingError,
            0x08 => QuicError::TransportParameterError,
            0x09 => QuicError::VersionNegotiationError,
            0x100..=0x1ff => QuicError::TlsAlert((code - 0x100) as u16),
            _ => QuicError::ProtocolViolation,
        }
    }
}

/// Local-only signal produced while processing a single inbound packet.
/// Never serialized; consumed entirely within the packet pipeline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalError {
    #[error("packet ignored, connection unaffected")]
    IgnorePacket,
    #[error("AEAD open failed on ambient packet")]
    DecryptionFailure,
    #[error("operation timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum QuicheError {
    #[error(transparent)]
    Quic(#[from] QuicError),

    #[error(transparent)]
    Local(#[from] LocalError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for QuicheError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        QuicheError::Other(err.to_string())
    }
}

impl QuicheError {
    pub fn other(msg: impl Into<String>) -> Self {
        QuicheError::Other(msg.into())
    }

    /// `true` if this failure indicates a peer protocol violation that must
    /// be surfaced on the wire via CONNECTION_CLOSE.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QuicheError::Quic(_))
    }
}

pub fn require(cond: bool, msg: &'static str) -> QuicheResult<()> {
    if !cond {
        tracing::warn!(%msg, "protocol invariant violated");
        return Err(QuicheError::Quic(QuicError::ProtocolViolation));
    }
    Ok(())
}

pub fn require_with(cond: bool, err: QuicError) -> QuicheResult<()> {
    if !cond {
        return Err(QuicheError::Quic(err));
    }
    Ok(())
}
