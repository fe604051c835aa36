use bytes::{Buf, BufMut};

use crate::{
    error::{require, QuicError, QuicheError, QuicheResult},
    frame,
    primitives::varint::VarInt,
};

use super::types::ConnectionId;

// Frame type codes, draft-12 vintage. STREAM occupies the low three bits
// 0x10-0x17 as flags (OFF/LEN/FIN); CRYPTO carries TLS handshake bytes and
// sits just past the STREAM range so it cannot collide with a flag
// combination.
frame! {
    PADDING = 0x00,
    RST_STREAM = 0x01,
    CONNECTION_CLOSE = 0x02,
    APPLICATION_CLOSE = 0x03,
    MAX_DATA = 0x04,
    MAX_STREAM_DATA = 0x05,
    MAX_STREAM_ID = 0x06,
    PING = 0x07,
    BLOCKED = 0x08,
    STREAM_BLOCKED = 0x09,
    STREAM_ID_BLOCKED = 0x0a,
    NEW_CONNECTION_ID = 0x0b,
    STOP_SENDING = 0x0c,
    ACK = 0x0d,
    PATH_CHALLENGE = 0x0e,
    PATH_RESPONSE = 0x0f,
    STREAM = 0x10,
    CRYPTO = 0x18,
}

const STREAM_FLAG_OFF: u64 = 0x01;
const STREAM_FLAG_LEN: u64 = 0x02;
const STREAM_FLAG_FIN: u64 = 0x04;

/// One ACK range below the largest acknowledged: a gap of unacked packets
/// followed by a run of acked ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRange {
    pub gap: u64,
    pub ack_range_length: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AckFrame {
    pub largest_acknowledged: u64,
    pub ack_delay: u64,
    pub first_ack_range: u64,
    pub ack_ranges: Vec<AckRange>,
}

impl AckFrame {
    /// The packet numbers this frame claims are acknowledged, largest first.
    pub fn acked_packet_numbers(&self) -> Vec<u64> {
        let mut out = Vec::new();
        let mut largest = self.largest_acknowledged;
        let smallest = largest.saturating_sub(self.first_ack_range);
        out.extend((smallest..=largest).rev());

        let mut next_largest = smallest;
        for range in &self.ack_ranges {
            // largest of next range = previous smallest - gap - 2
            if next_largest < range.gap + 2 {
                break;
            }
            largest = next_largest - range.gap - 2;
            let range_smallest = largest.saturating_sub(range.ack_range_length);
            out.extend((range_smallest..=largest).rev());
            next_largest = range_smallest;
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Padding,
    Ping,
    Ack(AckFrame),
    RstStream {
        stream_id: VarInt,
        error_code: VarInt,
        final_size: VarInt,
    },
    StopSending {
        stream_id: VarInt,
        error_code: VarInt,
    },
    Crypto {
        offset: VarInt,
        data: Vec<u8>,
    },
    MaxData {
        maximum_data: VarInt,
    },
    MaxStreamData {
        stream_id: VarInt,
        maximum_stream_data: VarInt,
    },
    MaxStreamId {
        maximum_stream_id: VarInt,
    },
    Blocked {
        maximum_data: VarInt,
    },
    StreamBlocked {
        stream_id: VarInt,
        maximum_stream_data: VarInt,
    },
    StreamIdBlocked {
        maximum_stream_id: VarInt,
    },
    NewConnectionId {
        sequence_number: VarInt,
        retire_prior_to: VarInt,
        connection_id: ConnectionId,
        stateless_reset_token: [u8; 16],
    },
    PathChallenge {
        data: [u8; 8],
    },
    PathResponse {
        data: [u8; 8],
    },
    ConnectionClose {
        error_code: VarInt,
        frame_type: VarInt,
        reason: Vec<u8>,
    },
    ApplicationClose {
        error_code: VarInt,
        reason: Vec<u8>,
    },
    Stream {
        stream_id: VarInt,
        offset: VarInt,
        fin: bool,
        data: Vec<u8>,
    },
}

impl Frame {
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(self, Frame::Ack(_) | Frame::Padding)
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Padding => buf.put_u8(FrameType::PADDING as u8),
            Frame::Ping => buf.put_u8(FrameType::PING as u8),
            Frame::Ack(ack) => encode_ack(ack, buf),
            Frame::RstStream {
                stream_id,
                error_code,
                final_size,
            } => {
                buf.put_u8(FrameType::RST_STREAM as u8);
                stream_id.encode_buf(buf);
                error_code.encode_buf(buf);
                final_size.encode_buf(buf);
            }
            Frame::StopSending {
                stream_id,
                error_code,
            } => {
                buf.put_u8(FrameType::STOP_SENDING as u8);
                stream_id.encode_buf(buf);
                error_code.encode_buf(buf);
            }
            Frame::Crypto { offset, data } => {
                buf.put_u8(FrameType::CRYPTO as u8);
                offset.encode_buf(buf);
                VarInt::new_u32(data.len() as u32).encode_buf(buf);
                buf.extend_from_slice(data);
            }
            Frame::MaxData { maximum_data } => {
                buf.put_u8(FrameType::MAX_DATA as u8);
                maximum_data.encode_buf(buf);
            }
            Frame::MaxStreamData {
                stream_id,
                maximum_stream_data,
            } => {
                buf.put_u8(FrameType::MAX_STREAM_DATA as u8);
                stream_id.encode_buf(buf);
                maximum_stream_data.encode_buf(buf);
            }
            Frame::MaxStreamId { maximum_stream_id } => {
                buf.put_u8(FrameType::MAX_STREAM_ID as u8);
                maximum_stream_id.encode_buf(buf);
            }
            Frame::Blocked { maximum_data } => {
                buf.put_u8(FrameType::BLOCKED as u8);
                maximum_data.encode_buf(buf);
            }
            Frame::StreamBlocked {
                stream_id,
                maximum_stream_data,
            } => {
                buf.put_u8(FrameType::STREAM_BLOCKED as u8);
                stream_id.encode_buf(buf);
                maximum_stream_data.encode_buf(buf);
            }
            Frame::StreamIdBlocked { maximum_stream_id } => {
                buf.put_u8(FrameType::STREAM_ID_BLOCKED as u8);
                maximum_stream_id.encode_buf(buf);
            }
            Frame::NewConnectionId {
                sequence_number,
                retire_prior_to,
                connection_id,
                stateless_reset_token,
            } => {
                buf.put_u8(FrameType::NEW_CONNECTION_ID as u8);
                sequence_number.encode_buf(buf);
                retire_prior_to.encode_buf(buf);
                buf.put_u8(connection_id.cid_len);
                buf.extend_from_slice(&connection_id.cid);
                buf.extend_from_slice(stateless_reset_token);
            }
            Frame::PathChallenge { data } => {
                buf.put_u8(FrameType::PATH_CHALLENGE as u8);
                buf.extend_from_slice(data);
            }
            Frame::PathResponse { data } => {
                buf.put_u8(FrameType::PATH_RESPONSE as u8);
                buf.extend_from_slice(data);
            }
            Frame::ConnectionClose {
                error_code,
                frame_type,
                reason,
            } => {
                buf.put_u8(FrameType::CONNECTION_CLOSE as u8);
                error_code.encode_buf(buf);
                frame_type.encode_buf(buf);
                VarInt::new_u32(reason.len() as u32).encode_buf(buf);
                buf.extend_from_slice(reason);
            }
            Frame::ApplicationClose { error_code, reason } => {
                buf.put_u8(FrameType::APPLICATION_CLOSE as u8);
                error_code.encode_buf(buf);
                VarInt::new_u32(reason.len() as u32).encode_buf(buf);
                buf.extend_from_slice(reason);
            }
            Frame::Stream {
                stream_id,
                offset,
                fin,
                data,
            } => {
                let mut type_byte = FrameType::STREAM as u64;
                if offset.to_inner() != 0 {
                    type_byte |= STREAM_FLAG_OFF;
                }
                type_byte |= STREAM_FLAG_LEN;
                if *fin {
                    type_byte |= STREAM_FLAG_FIN;
                }
                buf.put_u8(type_byte as u8);
                stream_id.encode_buf(buf);
                if offset.to_inner() != 0 {
                    offset.encode_buf(buf);
                }
                VarInt::new_u32(data.len() as u32).encode_buf(buf);
                buf.extend_from_slice(data);
            }
        }
    }

    pub fn decode(buf: &mut impl Buf) -> QuicheResult<Self> {
        require(buf.has_remaining(), "empty frame")?;
        let type_byte = buf.get_u8() as u64;

        let stream_base = FrameType::STREAM as u64;
        if (stream_base..=stream_base + 0x07).contains(&type_byte) {
            return decode_stream(buf, type_byte);
        }

        match type_byte {
            t if t == FrameType::PADDING as u64 => Ok(Frame::Padding),
            t if t == FrameType::PING as u64 => Ok(Frame::Ping),
            t if t == FrameType::ACK as u64 => decode_ack(buf),
            t if t == FrameType::RST_STREAM as u64 => Ok(Frame::RstStream {
                stream_id: VarInt::decode_buf(buf)?,
                error_code: VarInt::decode_buf(buf)?,
                final_size: VarInt::decode_buf(buf)?,
            }),
            t if t == FrameType::STOP_SENDING as u64 => Ok(Frame::StopSending {
                stream_id: VarInt::decode_buf(buf)?,
                error_code: VarInt::decode_buf(buf)?,
            }),
            t if t == FrameType::CRYPTO as u64 => {
                let offset = VarInt::decode_buf(buf)?;
                let len = VarInt::decode_buf(buf)?.usize();
                require(buf.remaining() >= len, "truncated crypto frame")?;
                let mut data = vec![0u8; len];
                buf.copy_to_slice(&mut data);
                Ok(Frame::Crypto { offset, data })
            }
            t if t == FrameType::MAX_DATA as u64 => Ok(Frame::MaxData {
                maximum_data: VarInt::decode_buf(buf)?,
            }),
            t if t == FrameType::MAX_STREAM_DATA as u64 => Ok(Frame::MaxStreamData {
                stream_id: VarInt::decode_buf(buf)?,
                maximum_stream_data: VarInt::decode_buf(buf)?,
            }),
            t if t == FrameType::MAX_STREAM_ID as u64 => Ok(Frame::MaxStreamId {
                maximum_stream_id: VarInt::decode_buf(buf)?,
            }),
            t if t == FrameType::BLOCKED as u64 => Ok(Frame::Blocked {
                maximum_data: VarInt::decode_buf(buf)?,
            }),
            t if t == FrameType::STREAM_BLOCKED as u64 => Ok(Frame::StreamBlocked {
                stream_id: VarInt::decode_buf(buf)?,
                maximum_stream_data: VarInt::decode_buf(buf)?,
            }),
            t if t == FrameType::STREAM_ID_BLOCKED as u64 => Ok(Frame::StreamIdBlocked {
                maximum_stream_id: VarInt::decode_buf(buf)?,
            }),
            t if t == FrameType::NEW_CONNECTION_ID as u64 => {
                let sequence_number = VarInt::decode_buf(buf)?;
                let retire_prior_to = VarInt::decode_buf(buf)?;
                require(buf.has_remaining(), "truncated new_connection_id")?;
                let cid_len = buf.get_u8();
                require(
                    cid_len == 0 || (4..=18).contains(&cid_len),
                    "invalid connection id length",
                )?;
                require(
                    buf.remaining() >= cid_len as usize + 16,
                    "truncated new_connection_id",
                )?;
                let mut cid_bytes = vec![0u8; cid_len as usize];
                buf.copy_to_slice(&mut cid_bytes);
                let mut stateless_reset_token = [0u8; 16];
                buf.copy_to_slice(&mut stateless_reset_token);
                Ok(Frame::NewConnectionId {
                    sequence_number,
                    retire_prior_to,
                    connection_id: ConnectionId::new(cid_len, cid_bytes),
                    stateless_reset_token,
                })
            }
            t if t == FrameType::PATH_CHALLENGE as u64 => {
                require(buf.remaining() >= 8, "truncated path_challenge")?;
                let mut data = [0u8; 8];
                buf.copy_to_slice(&mut data);
                Ok(Frame::PathChallenge { data })
            }
            t if t == FrameType::PATH_RESPONSE as u64 => {
                require(buf.remaining() >= 8, "truncated path_response")?;
                let mut data = [0u8; 8];
                buf.copy_to_slice(&mut data);
                Ok(Frame::PathResponse { data })
            }
            t if t == FrameType::CONNECTION_CLOSE as u64 => {
                let error_code = VarInt::decode_buf(buf)?;
                let frame_type = VarInt::decode_buf(buf)?;
                let len = VarInt::decode_buf(buf)?.usize();
                require(buf.remaining() >= len, "truncated connection_close reason")?;
                let mut reason = vec![0u8; len];
                buf.copy_to_slice(&mut reason);
                Ok(Frame::ConnectionClose {
                    error_code,
                    frame_type,
                    reason,
                })
            }
            t if t == FrameType::APPLICATION_CLOSE as u64 => {
                let error_code = VarInt::decode_buf(buf)?;
                let len = VarInt::decode_buf(buf)?.usize();
                require(buf.remaining() >= len, "truncated application_close reason")?;
                let mut reason = vec![0u8; len];
                buf.copy_to_slice(&mut reason);
                Ok(Frame::ApplicationClose { error_code, reason })
            }
            _ => Err(QuicheError::Quic(QuicError::FrameEncodingError)),
        }
    }
}

fn decode_stream(buf: &mut impl Buf, type_byte: u64) -> QuicheResult<Frame> {
    let flags = type_byte - (FrameType::STREAM as u64);
    let stream_id = VarInt::decode_buf(buf)?;
    let offset = if flags & STREAM_FLAG_OFF != 0 {
        VarInt::decode_buf(buf)?
    } else {
        VarInt::zero()
    };
    let data = if flags & STREAM_FLAG_LEN != 0 {
        let len = VarInt::decode_buf(buf)?.usize();
        require(buf.remaining() >= len, "truncated stream frame")?;
        let mut data = vec![0u8; len];
        buf.copy_to_slice(&mut data);
        data
    } else {
        let len = buf.remaining();
        let mut data = vec![0u8; len];
        buf.copy_to_slice(&mut data);
        data
    };
    let fin = flags & STREAM_FLAG_FIN != 0;
    Ok(Frame::Stream {
        stream_id,
        offset,
        fin,
        data,
    })
}

fn encode_ack(ack: &AckFrame, buf: &mut Vec<u8>) {
    buf.put_u8(FrameType::ACK as u8);
    VarInt::new_u64(ack.largest_acknowledged)
        .unwrap_or(VarInt::MAX)
        .encode_buf(buf);
    VarInt::new_u64(ack.ack_delay).unwrap_or(VarInt::MAX).encode_buf(buf);
    VarInt::new_u32(ack.ack_ranges.len() as u32).encode_buf(buf);
    VarInt::new_u64(ack.first_ack_range)
        .unwrap_or(VarInt::MAX)
        .encode_buf(buf);
    for range in &ack.ack_ranges {
        VarInt::new_u64(range.gap).unwrap_or(VarInt::MAX).encode_buf(buf);
        VarInt::new_u64(range.ack_range_length)
            .unwrap_or(VarInt::MAX)
            .encode_buf(buf);
    }
}

fn decode_ack(buf: &mut impl Buf) -> QuicheResult<Frame> {
    let largest_acknowledged = VarInt::decode_buf(buf)?.to_inner();
    let ack_delay = VarInt::decode_buf(buf)?.to_inner();
    let ack_range_count = VarInt::decode_buf(buf)?.usize();
    let first_ack_range = VarInt::decode_buf(buf)?.to_inner();

    require(first_ack_range <= largest_acknowledged, "ack range underflows")?;

    let mut ack_ranges = Vec::with_capacity(ack_range_count);
    for _ in 0..ack_range_count {
        let gap = VarInt::decode_buf(buf)?.to_inner();
        let ack_range_length = VarInt::decode_buf(buf)?.to_inner();
        ack_ranges.push(AckRange { gap, ack_range_length });
    }

    Ok(Frame::Ack(AckFrame {
        largest_acknowledged,
        ack_delay,
        first_ack_range,
        ack_ranges,
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(frame: Frame) {
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        let mut cursor = &buf[..];
        let decoded = Frame::decode(&mut cursor).unwrap();
        assert_eq!(frame, decoded);
        assert!(!cursor.has_remaining(), "decode left unconsumed bytes");
    }

    #[test]
    fn round_trips_simple_frames() {
        round_trip(Frame::Padding);
        round_trip(Frame::Ping);
        round_trip(Frame::MaxData {
            maximum_data: VarInt::new_u32(9000),
        });
        round_trip(Frame::RstStream {
            stream_id: VarInt::new_u32(4),
            error_code: VarInt::new_u32(1),
            final_size: VarInt::new_u32(1000),
        });
        round_trip(Frame::StopSending {
            stream_id: VarInt::new_u32(4),
            error_code: VarInt::new_u32(2),
        });
        round_trip(Frame::PathChallenge { data: [7; 8] });
        round_trip(Frame::PathResponse { data: [9; 8] });
    }

    #[test]
    fn round_trips_stream_frame_with_offset_and_fin() {
        round_trip(Frame::Stream {
            stream_id: VarInt::new_u32(4),
            offset: VarInt::new_u32(128),
            fin: true,
            data: vec![1, 2, 3, 4],
        });
        round_trip(Frame::Stream {
            stream_id: VarInt::new_u32(0),
            offset: VarInt::zero(),
            fin: false,
            data: vec![],
        });
    }

    #[test]
    fn round_trips_crypto_frame() {
        round_trip(Frame::Crypto {
            offset: VarInt::new_u32(16),
            data: vec![0xaa; 32],
        });
    }

    #[test]
    fn round_trips_ack_frame_with_ranges() {
        round_trip(Frame::Ack(AckFrame {
            largest_acknowledged: 100,
            ack_delay: 50,
            first_ack_range: 5,
            ack_ranges: vec![
                AckRange {
                    gap: 2,
                    ack_range_length: 3,
                },
                AckRange {
                    gap: 0,
                    ack_range_length: 1,
                },
            ],
        }));
    }

    #[test]
    fn ack_range_expands_to_packet_numbers() {
        // largest = 20, first_ack_range = 2 -> acks {18,19,20}
        // one ack range: gap=1, ack_range_length=1 -> next largest = 18-1-2=15, acks {14,15}
        let ack = AckFrame {
            largest_acknowledged: 20,
            ack_delay: 0,
            first_ack_range: 2,
            ack_ranges: vec![AckRange {
                gap: 1,
                ack_range_length: 1,
            }],
        };
        let pns = ack.acked_packet_numbers();
        assert_eq!(pns, vec![20, 19, 18, 15, 14]);
    }

    #[test]
    fn unknown_frame_type_is_fatal() {
        let mut buf = &[0xffu8][..];
        assert!(Frame::decode(&mut buf).is_err());
    }

    #[test]
    fn new_connection_id_round_trips() {
        round_trip(Frame::NewConnectionId {
            sequence_number: VarInt::new_u32(1),
            retire_prior_to: VarInt::zero(),
            connection_id: ConnectionId::new(8, vec![1; 8]),
            stateless_reset_token: [0x42; 16],
        });
    }

    #[test]
    fn connection_close_round_trips() {
        round_trip(Frame::ConnectionClose {
            error_code: VarInt::new_u32(QuicError::ProtocolViolation.code() as u32),
            frame_type: VarInt::zero(),
            reason: b"bad".to_vec(),
        });
        round_trip(Frame::ApplicationClose {
            error_code: VarInt::new_u32(0),
            reason: vec![],
        });
    }
}
