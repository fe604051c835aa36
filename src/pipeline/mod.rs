//! Packet pipeline: the inbound decode/open/parse chain and the outbound
//! gating (MTU, congestion, flow control) that a connection's send path runs
//! every datagram through. Kept separate from [`Connection`]
//! so the two directions' logic can be read (and tested) independently of
//! connection state.
//!
//! [`Connection`]: crate::connection::Connection

use bytes::Buf;

use crate::crypto::aead::PacketKeys;
use crate::error::{require, QuicError, QuicheError, QuicheResult};
use crate::packet::frame::Frame;
use crate::packet::header::Header;
use crate::primitives::pn::{self, PnWidth};

/// Recover this packet's full packet number from its truncated wire form,
/// given the largest number already seen in its space.
pub fn recover_packet_number(header: &Header, largest_received: Option<u64>) -> QuicheResult<u64> {
    let (truncated, width) = match header {
        Header::Initial(h) | Header::ZeroRtt(h) | Header::Handshake(h) => {
            (h.packet_number_truncated, h.pn_width)
        }
        Header::Short(h) => (h.packet_number_truncated, h.pn_width),
        Header::Retry(_) | Header::VersionNegotiation(_) => {
            return Err(QuicheError::Quic(QuicError::ProtocolViolation))
        }
    };
    Ok(pn::recover(truncated, largest_received, width))
}

/// Open an AEAD-protected packet payload, the header bytes serving as
/// associated data.
pub fn open_payload(
    keys: &PacketKeys,
    packet_number: u64,
    header: &Header,
    ciphertext: &[u8],
) -> QuicheResult<Vec<u8>> {
    let header_bytes = header.encode()?;
    let mut ciphertext = ciphertext.to_vec();
    let plaintext = keys.open(packet_number, &header_bytes, &mut ciphertext)?;
    Ok(plaintext.to_vec())
}

/// Seal a plaintext frame payload under the packet's epoch keys.
pub fn seal_payload(
    keys: &PacketKeys,
    packet_number: u64,
    header: &Header,
    plaintext: Vec<u8>,
) -> QuicheResult<Vec<u8>> {
    let header_bytes = header.encode()?;
    keys.seal(packet_number, &header_bytes, plaintext)
}

/// Parse every frame out of a decrypted packet payload. Unknown frame types
/// are fatal, and so is a payload with no frames at all.
pub fn parse_frames(mut plaintext: &[u8]) -> QuicheResult<Vec<Frame>> {
    require(!plaintext.is_empty(), "packet carried no frames")?;
    let mut frames = Vec::new();
    while plaintext.has_remaining() {
        frames.push(Frame::decode(&mut plaintext)?);
    }
    Ok(frames)
}

/// Picks the truncation width the sender should use for its next packet
/// number in a space, given the largest number the peer has acknowledged
/// there.
pub fn pn_width_for_next(next: u64, largest_acked: Option<u64>) -> PnWidth {
    PnWidth::smallest_for(next, largest_acked)
}

/// Gates outbound packet construction on MTU, congestion window, and flow
/// control.
pub struct OutboundGate {
    pub mtu: usize,
}

impl OutboundGate {
    pub fn new(mtu: usize) -> Self {
        Self { mtu }
    }

    /// Whether `frame_len` more bytes still fit in a datagram already
    /// holding `built_len` bytes.
    pub fn fits_in_datagram(&self, built_len: usize, frame_len: usize) -> bool {
        built_len + frame_len <= self.mtu
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gate_rejects_frames_that_would_exceed_the_mtu() {
        let gate = OutboundGate::new(1280);
        assert!(gate.fits_in_datagram(1200, 80));
        assert!(!gate.fits_in_datagram(1200, 81));
    }

    #[test]
    fn parse_frames_rejects_an_empty_payload() {
        assert!(parse_frames(&[]).is_err());
    }
}
