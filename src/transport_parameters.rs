//! Transport parameter TLV codec. Peer-advertised limits
//! are exchanged during the handshake as a sequence of
//! `(identifier: VarInt, length: VarInt, value: bytes)` tuples, mirroring the
//! frame codec's VLIE-prefixed encoding.

use bytes::{Buf, BufMut};

use crate::error::{require, QuicheResult};
use crate::primitives::varint::VarInt;

macro_rules! transport_parameter_ids {
    ($($name:ident = $id:expr,)*) => {
        #[allow(non_camel_case_types)]
        #[repr(u64)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum ParamId {
            $($name = $id),*
        }
    }
}

transport_parameter_ids! {
    INITIAL_MAX_DATA = 0x00,
    INITIAL_MAX_STREAM_DATA = 0x01,
    INITIAL_MAX_STREAM_ID_BIDI = 0x02,
    INITIAL_MAX_STREAM_ID_UNI = 0x03,
    IDLE_TIMEOUT = 0x04,
    MAX_PACKET_SIZE = 0x05,
    ACTIVE_CONNECTION_ID_LIMIT = 0x06,
}

/// Peer-advertised connection limits, decoded from the handshake's
/// transport-parameter extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParameters {
    pub initial_max_data: u64,
    pub initial_max_stream_data: u64,
    pub initial_max_stream_id_bidi: u64,
    pub initial_max_stream_id_uni: u64,
    pub idle_timeout_secs: u64,
    pub max_packet_size: u64,
    pub active_connection_id_limit: u64,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            initial_max_data: 1_250_000,
            initial_max_stream_data: 625_000,
            initial_max_stream_id_bidi: 100,
            initial_max_stream_id_uni: 100,
            idle_timeout_secs: 30,
            max_packet_size: 1280,
            active_connection_id_limit: 4,
        }
    }
}

impl TransportParameters {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_param(&mut buf, ParamId::INITIAL_MAX_DATA, self.initial_max_data);
        encode_param(
            &mut buf,
            ParamId::INITIAL_MAX_STREAM_DATA,
            self.initial_max_stream_data,
        );
        encode_param(
            &mut buf,
            ParamId::INITIAL_MAX_STREAM_ID_BIDI,
            self.initial_max_stream_id_bidi,
        );
        encode_param(
            &mut buf,
            ParamId::INITIAL_MAX_STREAM_ID_UNI,
            self.initial_max_stream_id_uni,
        );
        encode_param(&mut buf, ParamId::IDLE_TIMEOUT, self.idle_timeout_secs);
        encode_param(&mut buf, ParamId::MAX_PACKET_SIZE, self.max_packet_size);
        encode_param(
            &mut buf,
            ParamId::ACTIVE_CONNECTION_ID_LIMIT,
            self.active_connection_id_limit,
        );
        buf
    }

    pub fn decode(bytes: &[u8]) -> QuicheResult<Self> {
        let mut params = Self::default();
        let mut buf = bytes;
        while buf.has_remaining() {
            let id = VarInt::decode_buf(&mut buf)?.to_inner();
            let len = VarInt::decode_buf(&mut buf)?.usize();
            require(buf.remaining() >= len, "truncated transport parameter")?;
            let mut value = &buf[..len];
            let value_len_before = value.remaining();
            match id {
                x if x == ParamId::INITIAL_MAX_DATA as u64 => {
                    params.initial_max_data = VarInt::decode_buf(&mut value)?.to_inner()
                }
                x if x == ParamId::INITIAL_MAX_STREAM_DATA as u64 => {
                    params.initial_max_stream_data = VarInt::decode_buf(&mut value)?.to_inner()
                }
                x if x == ParamId::INITIAL_MAX_STREAM_ID_BIDI as u64 => {
                    params.initial_max_stream_id_bidi = VarInt::decode_buf(&mut value)?.to_inner()
                }
                x if x == ParamId::INITIAL_MAX_STREAM_ID_UNI as u64 => {
                    params.initial_max_stream_id_uni = VarInt::decode_buf(&mut value)?.to_inner()
                }
                x if x == ParamId::IDLE_TIMEOUT as u64 => {
                    params.idle_timeout_secs = VarInt::decode_buf(&mut value)?.to_inner()
                }
                x if x == ParamId::MAX_PACKET_SIZE as u64 => {
                    params.max_packet_size = VarInt::decode_buf(&mut value)?.to_inner()
                }
                x if x == ParamId::ACTIVE_CONNECTION_ID_LIMIT as u64 => {
                    params.active_connection_id_limit = VarInt::decode_buf(&mut value)?.to_inner()
                }
                // unknown transport parameters are ignored, per spec
                _ => {}
            }
            let _ = value_len_before;
            buf.advance(len);
        }
        Ok(params)
    }
}

fn encode_param(buf: &mut Vec<u8>, id: ParamId, value: u64) {
    VarInt::new_u64(id as u64).unwrap().encode_buf(buf);
    let encoded_value = VarInt::new_u64(value).unwrap_or(VarInt::MAX).encode();
    VarInt::new_u32(encoded_value.len() as u32).encode_buf(buf);
    buf.put_slice(&encoded_value);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_default_parameters() {
        let params = TransportParameters::default();
        let encoded = params.encode();
        let decoded = TransportParameters::decode(&encoded).unwrap();
        assert_eq!(params, decoded);
    }

    #[test]
    fn round_trips_custom_parameters() {
        let params = TransportParameters {
            initial_max_data: 9_999_999,
            initial_max_stream_data: 4096,
            initial_max_stream_id_bidi: 7,
            initial_max_stream_id_uni: 3,
            idle_timeout_secs: 120,
            max_packet_size: 1452,
            active_connection_id_limit: 2,
        };
        let encoded = params.encode();
        let decoded = TransportParameters::decode(&encoded).unwrap();
        assert_eq!(params, decoded);
    }

    #[test]
    fn unknown_parameter_ids_are_ignored() {
        let mut buf = Vec::new();
        VarInt::new_u32(0xff).encode_buf(&mut buf); // unknown id
        VarInt::new_u32(2).encode_buf(&mut buf);
        buf.extend_from_slice(&[1, 2]);
        buf.extend(TransportParameters::default().encode());
        let decoded = TransportParameters::decode(&buf).unwrap();
        assert_eq!(decoded, TransportParameters::default());
    }
}
