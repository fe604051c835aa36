//! TLS handshake engine contract, modeled after quinn-proto's
//! `crypto::Session` trait: the connection state machine feeds it
//! CRYPTO-frame bytes and asks it for bytes to send in return, without
//! knowing anything about TLS 1.3 itself.

use crate::crypto::epoch::CryptoEpoch;
use crate::error::QuicheResult;

/// What happened as a result of feeding handshake bytes to a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandshakeProgress {
    /// Bytes to send back to the peer in a CRYPTO frame, if any.
    pub outgoing: Vec<u8>,
    /// `true` once this side has installed 1-RTT keys.
    pub handshake_complete: bool,
    /// A new epoch's keys became available and should be installed.
    pub keys_updated: Option<CryptoEpoch>,
}

/// External collaborator that owns the actual TLS 1.3 state machine: fed
/// handshake bytes, and read for bytes to send back. No concrete
/// implementation ships with this crate — certificate policy and cipher
/// negotiation are kept external.
pub trait Session: Send {
    /// Produce the first flight of handshake bytes (ClientHello-equivalent).
    fn initiate(&mut self) -> QuicheResult<HandshakeProgress>;

    /// Feed handshake bytes received at `epoch`, get back bytes (if any) to
    /// send in response and whether new key material became available.
    fn recv_handshake_data(
        &mut self,
        epoch: CryptoEpoch,
        data: &[u8],
    ) -> QuicheResult<HandshakeProgress>;

    fn is_handshake_complete(&self) -> bool;
}

/// A test double that completes instantly with no real cryptographic
/// handshake, used by this crate's own tests and the demo CLI. Grounded the
/// same way quinn tests its own crypto abstractions against a stub session.
#[derive(Debug, Default)]
pub struct NullSession {
    complete: bool,
}

impl Session for NullSession {
    fn initiate(&mut self) -> QuicheResult<HandshakeProgress> {
        Ok(HandshakeProgress {
            outgoing: b"null-client-hello".to_vec(),
            handshake_complete: false,
            keys_updated: None,
        })
    }

    fn recv_handshake_data(
        &mut self,
        epoch: CryptoEpoch,
        _data: &[u8],
    ) -> QuicheResult<HandshakeProgress> {
        self.complete = true;
        Ok(HandshakeProgress {
            outgoing: Vec::new(),
            handshake_complete: true,
            keys_updated: (epoch == CryptoEpoch::Initial).then_some(CryptoEpoch::Handshake),
        })
    }

    fn is_handshake_complete(&self) -> bool {
        self.complete
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn null_session_completes_after_one_round_trip() {
        let mut session = NullSession::default();
        let first = session.initiate().unwrap();
        assert!(!first.handshake_complete);
        assert!(!session.is_handshake_complete());

        let second = session
            .recv_handshake_data(CryptoEpoch::Initial, b"server-hello")
            .unwrap();
        assert!(second.handshake_complete);
        assert!(session.is_handshake_complete());
        assert_eq!(second.keys_updated, Some(CryptoEpoch::Handshake));
    }
}
