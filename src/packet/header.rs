use crate::{
    bits::BitsExt,
    error::{require, require_with, QuicError, QuicheResult},
    primitives::{pn::PnWidth, varint::VarInt},
};

use super::types::*;

// From QUIC spec
// Upon first receiving an Initial or Retry packet from the server, the client uses the Source Connection ID supplied by the server as the Destination Connection ID for subsequent packets, including any 0-RTT packets.
// This means that a client might have to change the connection ID it sets in the Destination Connection ID field twice during connection establishment:
// once in response to a Retry packet and once in response to an Initial packet from the server.
// Once a client has received a valid Initial packet from the server, it MUST discard any subsequent packet it receives on that connection with a different Source Connection ID.

/// Long or short header. Version Negotiation and Retry are carried as their
/// own variants since neither has a packet number or an AEAD-protected
/// payload.
#[derive(PartialEq, Debug, Clone)]
pub enum Header {
    Initial(LongHeader),
    ZeroRtt(LongHeader),
    Handshake(LongHeader),
    Retry(RetryHeader),
    VersionNegotiation(VersionNegotiationHeader),
    Short(ShortHeader),
}

impl Header {
    /// Decode a header from the front of `bytes`. `short_dcid_len` is the
    /// length of locally-issued connection IDs, needed because short headers
    /// do not self-describe their destination CID length — it's inferred
    /// from connection state instead.
    pub fn decode(bytes: &mut Vec<u8>, short_dcid_len: usize) -> QuicheResult<Header> {
        require(!bytes.is_empty(), "empty packet")?;
        let header_form_bit = bytes[0] & 1;
        if header_form_bit == HeaderForm::long().to_inner() {
            LongHeader::decode(bytes)
        } else {
            ShortHeader::decode(bytes, short_dcid_len).map(Header::Short)
        }
    }

    pub fn encode(&self) -> QuicheResult<Vec<u8>> {
        match self {
            Header::Initial(h) | Header::ZeroRtt(h) | Header::Handshake(h) => h.encode(),
            Header::Retry(h) => h.encode(),
            Header::VersionNegotiation(h) => h.encode(),
            Header::Short(h) => h.encode(),
        }
    }

    pub fn dst_cid(&self) -> &ConnectionId {
        match self {
            Header::Initial(h) | Header::ZeroRtt(h) | Header::Handshake(h) => &h.dst_cid,
            Header::Retry(h) => &h.dst_cid,
            Header::VersionNegotiation(h) => &h.dst_cid,
            Header::Short(h) => &h.dst_cid,
        }
    }

    pub fn src_cid(&self) -> Option<&ConnectionId> {
        match self {
            Header::Initial(h) | Header::ZeroRtt(h) | Header::Handshake(h) => Some(&h.src_cid),
            Header::Retry(h) => Some(&h.src_cid),
            Header::VersionNegotiation(h) => Some(&h.src_cid),
            Header::Short(_) => None,
        }
    }
}

/// Long header used by Initial, 0-RTT, and Handshake packets.
// First byte:
// bit 0: header form (1 = long)
// bit 1: fixed bit (must be 1 for any non-VN long header)
// bits 2-3: long packet type
// bits 4-5: reserved (must be 0)
// bits 6-7: packet number length code (0/1/2 -> 1/2/4 bytes; 3 is a reserved pattern)
#[derive(PartialEq, Debug, Clone)]
pub struct LongHeader {
    pub long_packet_type: LongPacketType,
    pub pn_width: PnWidth,
    pub version_id: u32,
    pub dst_cid: ConnectionId,
    pub src_cid: ConnectionId,
    pub length: VarInt,
    pub packet_number_truncated: u64,
}

impl LongHeader {
    pub fn initial(
        version_id: u32,
        dst_cid: ConnectionId,
        src_cid: ConnectionId,
        pn_width: PnWidth,
        length: VarInt,
        packet_number_truncated: u64,
    ) -> Self {
        Self {
            long_packet_type: LongPacketType::initial(),
            pn_width,
            version_id,
            dst_cid,
            src_cid,
            length,
            packet_number_truncated,
        }
    }

    pub fn new(
        long_packet_type: LongPacketType,
        pn_width: PnWidth,
        version_id: u32,
        dst_cid: ConnectionId,
        src_cid: ConnectionId,
        length: VarInt,
        packet_number_truncated: u64,
    ) -> Self {
        Self {
            long_packet_type,
            pn_width,
            version_id,
            dst_cid,
            src_cid,
            length,
            packet_number_truncated,
        }
    }

    fn decode(bytes: &mut Vec<u8>) -> QuicheResult<Header> {
        let first_byte = bytes.remove(0);

        let header_form = first_byte & 1;
        require(header_form == HeaderForm::long().to_inner(), "long header form bit")?;

        let fixed_bit = (first_byte >> 1) & 1;
        require(fixed_bit == 1, "fixed bit must be set on a long header")?;

        let long_type_code = (first_byte >> 2) & 0b11;
        let long_packet_type = LongPacketType::from_num(long_type_code);

        let reserved = (first_byte >> 4) & 0b11;
        require_with(reserved == 0, QuicError::ProtocolViolation)?;

        let pn_width_code = (first_byte >> 6) & 0b11;
        let pn_width = pn_width_from_code(pn_width_code)?;

        require(bytes.len() >= 4, "truncated version id")?;
        let version_bytes: [u8; 4] = bytes.drain(0..4).collect::<Vec<u8>>().try_into().unwrap();
        let version_id = u32::from_be_bytes(version_bytes);

        if version_id == 0 {
            return VersionNegotiationHeader::decode_body(bytes).map(Header::VersionNegotiation);
        }

        require(!bytes.is_empty(), "missing cid length byte")?;
        let cid_len_byte = bytes.remove(0);
        let dst_cid_len = ConnectionId::len_from_nibble((cid_len_byte >> 4) & 0xF);
        let src_cid_len = ConnectionId::len_from_nibble(cid_len_byte & 0xF);

        require(bytes.len() >= dst_cid_len as usize, "truncated dst cid")?;
        let dst_cid_bytes = bytes.drain(0..dst_cid_len as usize).collect::<Vec<u8>>();
        let dst_cid = ConnectionId::new(dst_cid_len, dst_cid_bytes);

        require(bytes.len() >= src_cid_len as usize, "truncated src cid")?;
        let src_cid_bytes = bytes.drain(0..src_cid_len as usize).collect::<Vec<u8>>();
        let src_cid = ConnectionId::new(src_cid_len, src_cid_bytes);

        if long_packet_type == LongPacketType::retry() {
            return Ok(Header::Retry(RetryHeader {
                version_id,
                dst_cid,
                src_cid,
                retry_token: std::mem::take(bytes),
            }));
        }

        let length = VarInt::decode(bytes)?;

        require(bytes.len() >= pn_width.bytes(), "truncated packet number")?;
        let pn_bytes = bytes.drain(0..pn_width.bytes()).collect::<Vec<u8>>();
        let mut padded = [0u8; 8];
        padded[8 - pn_bytes.len()..].copy_from_slice(&pn_bytes);
        let packet_number_truncated = u64::from_be_bytes(padded);

        let header = LongHeader {
            long_packet_type: LongPacketType::from_num(long_type_code),
            pn_width,
            version_id,
            dst_cid,
            src_cid,
            length,
            packet_number_truncated,
        };

        if long_packet_type == LongPacketType::initial() {
            Ok(Header::Initial(header))
        } else if long_packet_type == LongPacketType::zero_rtt() {
            Ok(Header::ZeroRtt(header))
        } else {
            Ok(Header::Handshake(header))
        }
    }

    pub fn encode(&self) -> QuicheResult<Vec<u8>> {
        let mut bytes = Vec::new();

        let mut first_byte = 0u8;
        first_byte |= HeaderForm::long().to_inner();
        first_byte |= 1 << 1; // fixed bit
        first_byte |= self.long_packet_type.to_inner() << 2;
        // bits 4-5 reserved, left as 0
        first_byte |= pn_width_code(self.pn_width) << 6;
        bytes.push(first_byte);

        bytes.extend(self.version_id.to_be_bytes());

        let cid_len_byte = (self.dst_cid.len_nibble() << 4) | self.src_cid.len_nibble();
        bytes.push(cid_len_byte);
        bytes.extend(self.dst_cid.cid.iter());
        bytes.extend(self.src_cid.cid.iter());

        bytes.extend(self.length.encode());

        let pn_bytes = self.packet_number_truncated.to_be_bytes();
        bytes.extend(&pn_bytes[8 - self.pn_width.bytes()..]);

        Ok(bytes)
    }
}

/// Retry carries a fresh server-chosen source CID and an opaque retry token;
/// it has no packet number and is never AEAD-protected.
#[derive(PartialEq, Debug, Clone)]
pub struct RetryHeader {
    pub version_id: u32,
    pub dst_cid: ConnectionId,
    pub src_cid: ConnectionId,
    pub retry_token: Vec<u8>,
}

impl RetryHeader {
    pub fn new(version_id: u32, dst_cid: ConnectionId, src_cid: ConnectionId, retry_token: Vec<u8>) -> Self {
        Self {
            version_id,
            dst_cid,
            src_cid,
            retry_token,
        }
    }

    pub fn encode(&self) -> QuicheResult<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut first_byte = 0u8;
        first_byte |= HeaderForm::long().to_inner();
        first_byte |= 1 << 1;
        first_byte |= LongPacketType::retry().to_inner() << 2;
        bytes.push(first_byte);

        bytes.extend(self.version_id.to_be_bytes());

        let cid_len_byte = (self.dst_cid.len_nibble() << 4) | self.src_cid.len_nibble();
        bytes.push(cid_len_byte);
        bytes.extend(self.dst_cid.cid.iter());
        bytes.extend(self.src_cid.cid.iter());
        bytes.extend(self.retry_token.iter());

        Ok(bytes)
    }
}

/// Distinguished by version == 0; carries the server's list of supported
/// versions. Never AEAD-protected.
#[derive(PartialEq, Debug, Clone)]
pub struct VersionNegotiationHeader {
    pub dst_cid: ConnectionId,
    pub src_cid: ConnectionId,
    pub supported_versions: Vec<u32>,
}

impl VersionNegotiationHeader {
    pub fn new(dst_cid: ConnectionId, src_cid: ConnectionId, supported_versions: Vec<u32>) -> Self {
        Self {
            dst_cid,
            src_cid,
            supported_versions,
        }
    }

    fn decode_body(bytes: &mut Vec<u8>) -> QuicheResult<Self> {
        require(!bytes.is_empty(), "missing cid length byte")?;
        let cid_len_byte = bytes.remove(0);
        let dst_cid_len = ConnectionId::len_from_nibble((cid_len_byte >> 4) & 0xF);
        let src_cid_len = ConnectionId::len_from_nibble(cid_len_byte & 0xF);

        require(bytes.len() >= dst_cid_len as usize, "truncated dst cid")?;
        let dst_cid = ConnectionId::new(dst_cid_len, bytes.drain(0..dst_cid_len as usize).collect());

        require(bytes.len() >= src_cid_len as usize, "truncated src cid")?;
        let src_cid = ConnectionId::new(src_cid_len, bytes.drain(0..src_cid_len as usize).collect());

        require(bytes.len() % 4 == 0, "version list must be 4-byte aligned")?;
        let supported_versions = bytes
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes(c.try_into().unwrap()))
            .collect();

        Ok(Self {
            dst_cid,
            src_cid,
            supported_versions,
        })
    }

    pub fn encode(&self) -> QuicheResult<Vec<u8>> {
        let mut bytes = Vec::new();
        bytes.push(HeaderForm::long().to_inner());
        bytes.extend(0u32.to_be_bytes());

        let cid_len_byte = (self.dst_cid.len_nibble() << 4) | self.src_cid.len_nibble();
        bytes.push(cid_len_byte);
        bytes.extend(self.dst_cid.cid.iter());
        bytes.extend(self.src_cid.cid.iter());

        for version in &self.supported_versions {
            bytes.extend(version.to_be_bytes());
        }

        Ok(bytes)
    }
}

/// Short header used by 1-RTT packets.
// First byte:
// bit 0: header form (0 = short)
// bit 1: fixed bit (must be 1)
// bit 2: spin bit
// bits 3-4: reserved (must be 0)
// bit 5: key phase
// bits 6-7: packet number length code
#[derive(PartialEq, Debug, Clone)]
pub struct ShortHeader {
    pub spin_bit: SingleBit,
    pub key_phase: SingleBit,
    pub pn_width: PnWidth,
    pub dst_cid: ConnectionId,
    pub packet_number_truncated: u64,
}

impl ShortHeader {
    pub fn new(
        spin_bit: SingleBit,
        key_phase: SingleBit,
        pn_width: PnWidth,
        dst_cid: ConnectionId,
        packet_number_truncated: u64,
    ) -> Self {
        Self {
            spin_bit,
            key_phase,
            pn_width,
            dst_cid,
            packet_number_truncated,
        }
    }

    fn decode(bytes: &mut Vec<u8>, dst_cid_len: usize) -> QuicheResult<Self> {
        let first_byte = bytes.remove(0);

        require((first_byte & 1) == HeaderForm::short().to_inner(), "short header form bit")?;
        require_with((first_byte >> 1) & 1 == 1, QuicError::ProtocolViolation)?;

        let spin_bit = SingleBit::from_num((first_byte >> 2) & 1);
        let reserved = (first_byte >> 3) & 0b11;
        require_with(reserved == 0, QuicError::ProtocolViolation)?;
        let key_phase = SingleBit::from_num((first_byte >> 5) & 1);
        let pn_width = pn_width_from_code((first_byte >> 6) & 0b11)?;

        require(bytes.len() >= dst_cid_len, "truncated dst cid")?;
        let dst_cid_bytes = bytes.drain(0..dst_cid_len).collect::<Vec<u8>>();
        let dst_cid = ConnectionId::new(dst_cid_len as u8, dst_cid_bytes);

        require(bytes.len() >= pn_width.bytes(), "truncated packet number")?;
        let pn_bytes = bytes.drain(0..pn_width.bytes()).collect::<Vec<u8>>();
        let mut padded = [0u8; 8];
        padded[8 - pn_bytes.len()..].copy_from_slice(&pn_bytes);
        let packet_number_truncated = u64::from_be_bytes(padded);

        Ok(Self {
            spin_bit,
            key_phase,
            pn_width,
            dst_cid,
            packet_number_truncated,
        })
    }

    pub fn encode(&self) -> QuicheResult<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut first_byte = 0u8;
        first_byte |= HeaderForm::short().to_inner();
        first_byte |= 1 << 1;
        first_byte |= self.spin_bit.to_inner() << 2;
        first_byte |= self.key_phase.to_inner() << 5;
        first_byte |= pn_width_code(self.pn_width) << 6;
        bytes.push(first_byte);

        bytes.extend(self.dst_cid.cid.iter());

        let pn_bytes = self.packet_number_truncated.to_be_bytes();
        bytes.extend(&pn_bytes[8 - self.pn_width.bytes()..]);

        Ok(bytes)
    }
}

#[cfg(test)]
pub(crate) mod test_header {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn rand(modulus: u128) -> u8 {
        (SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
            % modulus) as u8
    }

    fn random_cid() -> ConnectionId {
        let choices = [0u8, 4, 8, 18];
        let len = choices[rand(choices.len() as u128) as usize];
        let data = (0..len).map(|_| rand(256)).collect();
        ConnectionId::new(len, data)
    }

    fn random_pn_width() -> PnWidth {
        match rand(3) {
            0 => PnWidth::One,
            1 => PnWidth::Two,
            _ => PnWidth::Four,
        }
    }

    pub fn generate_random_long_header() -> Header {
        let dst_cid = random_cid();
        let src_cid = random_cid();
        let pn_width = random_pn_width();
        let version_id = 0xff00_0012 ^ (rand(256) as u32);
        let packet_number_truncated = rand(256) as u64;
        let length = VarInt::new_u32(rand(64) as u32);

        match rand(3) {
            0 => Header::Initial(LongHeader::initial(
                version_id,
                dst_cid,
                src_cid,
                pn_width,
                length,
                packet_number_truncated,
            )),
            1 => Header::ZeroRtt(LongHeader::new(
                LongPacketType::zero_rtt(),
                pn_width,
                version_id,
                dst_cid,
                src_cid,
                length,
                packet_number_truncated,
            )),
            _ => Header::Handshake(LongHeader::new(
                LongPacketType::handshake(),
                pn_width,
                version_id,
                dst_cid,
                src_cid,
                length,
                packet_number_truncated,
            )),
        }
    }

    pub fn generate_random_short_header() -> Header {
        Header::Short(ShortHeader::new(
            SingleBit::from_num(rand(2)),
            SingleBit::from_num(rand(2)),
            random_pn_width(),
            random_cid(),
            rand(256) as u64,
        ))
    }

    #[test]
    fn test_long_encode_decode() {
        let original_initial_header = Header::Initial(LongHeader::initial(
            0xff00_0012,
            ConnectionId::new(8, vec![0; 8]),
            ConnectionId::new(8, vec![0; 8]),
            PnWidth::One,
            VarInt::new_u32(4),
            3,
        ));

        let mut initial_header_bytes = original_initial_header.encode().unwrap();
        let reconstructed = Header::decode(&mut initial_header_bytes, 8).unwrap();
        assert_eq!(original_initial_header, reconstructed);

        for i in 0..100 {
            println!("Testing random long header {}", i);
            let original_header = generate_random_long_header();
            let mut header_bytes = original_header.encode().unwrap();
            let reconstructed_header = Header::decode(&mut header_bytes, 8).unwrap();
            assert_eq!(original_header, reconstructed_header);
        }
    }

    #[test]
    fn test_short_encode_decode() {
        for i in 0..100 {
            println!("Testing random short header {}", i);
            let original_header = generate_random_short_header();
            let dcid_len = original_header.dst_cid().cid_len as usize;
            let mut header_bytes = original_header.encode().unwrap();
            let reconstructed_header = Header::decode(&mut header_bytes, dcid_len).unwrap();
            assert_eq!(original_header, reconstructed_header);
        }
    }

    #[test]
    fn version_negotiation_has_version_zero() {
        let vn = VersionNegotiationHeader::new(
            ConnectionId::new(8, vec![1; 8]),
            ConnectionId::new(8, vec![2; 8]),
            vec![0xff00_0012, 0xff00_0011],
        );
        let mut bytes = vn.encode().unwrap();
        assert_eq!(&bytes[1..5], &0u32.to_be_bytes());
        let decoded = Header::decode(&mut bytes, 8).unwrap();
        assert_eq!(decoded, Header::VersionNegotiation(vn));
    }

    #[test]
    fn reserved_bits_rejected() {
        let mut bytes = Header::Initial(LongHeader::initial(
            0xff00_0012,
            ConnectionId::new(8, vec![0; 8]),
            ConnectionId::new(8, vec![0; 8]),
            PnWidth::One,
            VarInt::new_u32(4),
            3,
        ))
        .encode()
        .unwrap();
        bytes[0] |= 0b0011_0000; // set reserved bits
        assert!(Header::decode(&mut bytes, 8).is_err());
    }
}
