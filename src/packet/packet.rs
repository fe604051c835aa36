use crate::{
    error::{require, QuicError, QuicheError, QuicheResult},
    primitives::{pn::PnWidth, varint::VarInt},
};

use super::{
    header::{Header, LongHeader, RetryHeader, ShortHeader, VersionNegotiationHeader},
    types::{ConnectionId, LongPacketType, SingleBit},
};

/// One QUIC packet: a header plus its (already decrypted, for this module's
/// purposes) frame payload. Retry and Version Negotiation packets carry no
/// frames.
#[derive(PartialEq, Debug)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn contains_frames(&self) -> bool {
        !matches!(self.header, Header::Retry(_) | Header::VersionNegotiation(_))
    }

    #[allow(clippy::too_many_arguments)]
    fn long(
        long_packet_type: LongPacketType,
        pn_width: PnWidth,
        version_id: u32,
        dst_cid: ConnectionId,
        src_cid: ConnectionId,
        packet_number_truncated: u64,
        payload: Vec<u8>,
    ) -> Self {
        let length = VarInt::new_u32((pn_width.bytes() + payload.len()) as u32);
        let header = LongHeader::new(
            long_packet_type,
            pn_width,
            version_id,
            dst_cid,
            src_cid,
            length,
            packet_number_truncated,
        );
        let wrapped = if long_packet_type == LongPacketType::initial() {
            Header::Initial(header)
        } else if long_packet_type == LongPacketType::zero_rtt() {
            Header::ZeroRtt(header)
        } else {
            Header::Handshake(header)
        };
        Self {
            header: wrapped,
            payload,
        }
    }

    pub fn initial(
        version_id: u32,
        dst_cid: ConnectionId,
        src_cid: ConnectionId,
        pn_width: PnWidth,
        packet_number_truncated: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self::long(
            LongPacketType::initial(),
            pn_width,
            version_id,
            dst_cid,
            src_cid,
            packet_number_truncated,
            payload,
        )
    }

    pub fn zero_rtt(
        version_id: u32,
        dst_cid: ConnectionId,
        src_cid: ConnectionId,
        pn_width: PnWidth,
        packet_number_truncated: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self::long(
            LongPacketType::zero_rtt(),
            pn_width,
            version_id,
            dst_cid,
            src_cid,
            packet_number_truncated,
            payload,
        )
    }

    pub fn handshake(
        version_id: u32,
        dst_cid: ConnectionId,
        src_cid: ConnectionId,
        pn_width: PnWidth,
        packet_number_truncated: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self::long(
            LongPacketType::handshake(),
            pn_width,
            version_id,
            dst_cid,
            src_cid,
            packet_number_truncated,
            payload,
        )
    }

    pub fn retry(
        version_id: u32,
        dst_cid: ConnectionId,
        src_cid: ConnectionId,
        retry_token: Vec<u8>,
    ) -> Self {
        Self {
            header: Header::Retry(RetryHeader::new(version_id, dst_cid, src_cid, retry_token)),
            payload: Vec::new(),
        }
    }

    pub fn version_negotiation(
        dst_cid: ConnectionId,
        src_cid: ConnectionId,
        supported_versions: Vec<u32>,
    ) -> Self {
        Self {
            header: Header::VersionNegotiation(VersionNegotiationHeader::new(
                dst_cid,
                src_cid,
                supported_versions,
            )),
            payload: Vec::new(),
        }
    }

    pub fn short(
        spin_bit: SingleBit,
        key_phase: SingleBit,
        pn_width: PnWidth,
        dst_cid: ConnectionId,
        packet_number_truncated: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            header: Header::Short(ShortHeader::new(
                spin_bit,
                key_phase,
                pn_width,
                dst_cid,
                packet_number_truncated,
            )),
            payload,
        }
    }

    pub fn encode(&self) -> QuicheResult<Vec<u8>> {
        let mut encoded = self.header.encode()?;
        encoded.extend(self.payload.iter());
        Ok(encoded)
    }

    /// Decode one packet from the front of `bytes`, leaving any trailing
    /// bytes (a coalesced packet) in place for a follow-up call.
    pub fn decode(bytes: &mut Vec<u8>, short_dcid_len: usize) -> QuicheResult<Self> {
        require(!bytes.is_empty(), "empty packet")?;
        let header = Header::decode(bytes, short_dcid_len)?;

        let payload = match &header {
            Header::Initial(h) | Header::ZeroRtt(h) | Header::Handshake(h) => {
                let payload_len = h
                    .length
                    .usize()
                    .checked_sub(h.pn_width.bytes())
                    .ok_or(QuicheError::Quic(QuicError::FrameEncodingError))?;
                require(bytes.len() >= payload_len, "truncated packet payload")?;
                bytes.drain(0..payload_len).collect()
            }
            // Retry/VersionNegotiation headers consume the rest of the
            // datagram themselves; neither can be coalesced with anything.
            Header::Retry(_) | Header::VersionNegotiation(_) => Vec::new(),
            // Short headers have no self-describing length; a 1-RTT packet
            // always occupies the remainder of its datagram.
            Header::Short(_) => std::mem::take(bytes),
        };

        Ok(Self { header, payload })
    }

    /// Decode every packet coalesced into one datagram.
    pub fn decode_coalesced(bytes: &mut Vec<u8>, short_dcid_len: usize) -> QuicheResult<Vec<Self>> {
        let mut packets = Vec::new();
        while !bytes.is_empty() {
            packets.push(Self::decode(bytes, short_dcid_len)?);
        }
        Ok(packets)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::header::test_header::rand;
    use crate::primitives::pn::PnWidth;

    fn generate_random_payload() -> Vec<u8> {
        let len = rand(19);
        (0..len).map(|_| rand(255)).collect()
    }

    #[test]
    fn round_trips_initial_packet() {
        let original = Packet::initial(
            0xff00_0012,
            ConnectionId::new(8, vec![0; 8]),
            ConnectionId::new(8, vec![1; 8]),
            PnWidth::One,
            3,
            vec![0xaa; 12],
        );
        let mut bytes = original.encode().unwrap();
        let reconstructed = Packet::decode(&mut bytes, 8).unwrap();
        assert_eq!(original, reconstructed);
        assert!(bytes.is_empty());
    }

    #[test]
    fn round_trips_short_packet() {
        let original = Packet::short(
            SingleBit::zero(),
            SingleBit::one(),
            PnWidth::Two,
            ConnectionId::new(8, vec![2; 8]),
            42,
            generate_random_payload(),
        );
        let mut bytes = original.encode().unwrap();
        let reconstructed = Packet::decode(&mut bytes, 8).unwrap();
        assert_eq!(original, reconstructed);
    }

    #[test]
    fn round_trips_retry_packet() {
        let original = Packet::retry(
            0xff00_0012,
            ConnectionId::new(8, vec![0; 8]),
            ConnectionId::new(8, vec![1; 8]),
            vec![1, 2, 3, 4],
        );
        assert!(!original.contains_frames());
        let mut bytes = original.encode().unwrap();
        let reconstructed = Packet::decode(&mut bytes, 8).unwrap();
        assert_eq!(original, reconstructed);
    }

    #[test]
    fn decodes_coalesced_initial_and_handshake() {
        let initial = Packet::initial(
            0xff00_0012,
            ConnectionId::new(8, vec![0; 8]),
            ConnectionId::new(8, vec![1; 8]),
            PnWidth::One,
            1,
            vec![0x11; 8],
        );
        let handshake = Packet::handshake(
            0xff00_0012,
            ConnectionId::new(8, vec![1; 8]),
            ConnectionId::new(8, vec![0; 8]),
            PnWidth::One,
            1,
            vec![0x22; 8],
        );

        let mut datagram = initial.encode().unwrap();
        datagram.extend(handshake.encode().unwrap());

        let decoded = Packet::decode_coalesced(&mut datagram, 8).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], initial);
        assert_eq!(decoded[1], handshake);
    }
}
