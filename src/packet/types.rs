use crate::bits::{Bits, BitsExt};
use crate::bits_ext;
use crate::error::{QuicError, QuicheError, QuicheResult};
use crate::primitives::pn::PnWidth;

/// An opaque connection identifier. Valid lengths are 0 or 4-18 bytes; this
/// range is what the header codec's nibble-packed CID length field can
/// represent.
#[derive(PartialEq, Eq, Clone, Debug, Hash)]
pub struct ConnectionId {
    pub cid_len: u8,
    pub cid: Vec<u8>,
}

impl ConnectionId {
    pub fn new(cid_len: u8, cid: Vec<u8>) -> Self {
        debug_assert_eq!(cid_len as usize, cid.len());
        Self { cid_len, cid }
    }

    pub fn from_bytes(cid: Vec<u8>) -> QuicheResult<Self> {
        let len = cid.len();
        if len != 0 && !(4..=18).contains(&len) {
            return Err(QuicheError::Quic(QuicError::ProtocolViolation));
        }
        Ok(Self {
            cid_len: len as u8,
            cid,
        })
    }

    pub const fn empty() -> Self {
        Self {
            cid_len: 0,
            cid: Vec::new(),
        }
    }

    /// Nibble encoding used by the long-header CID-length byte: 0 means a
    /// zero-length CID, otherwise `actual_len - 3` (so nibble 1..=15 maps to
    /// lengths 4..=18).
    pub fn len_nibble(&self) -> u8 {
        if self.cid_len == 0 {
            0
        } else {
            self.cid_len - 3
        }
    }

    pub fn len_from_nibble(nibble: u8) -> u8 {
        if nibble == 0 {
            0
        } else {
            nibble + 3
        }
    }
}

pub(crate) fn pn_width_from_code(code: u8) -> QuicheResult<PnWidth> {
    match code {
        0 => Ok(PnWidth::One),
        1 => Ok(PnWidth::Two),
        2 => Ok(PnWidth::Four),
        _ => Err(QuicheError::Quic(QuicError::ProtocolViolation)),
    }
}

pub(crate) fn pn_width_code(width: PnWidth) -> u8 {
    match width {
        PnWidth::One => 0,
        PnWidth::Two => 1,
        PnWidth::Four => 2,
    }
}

bits_ext!(SingleBit, crate::bits::BitsExt<u8>, 1, u8);
bits_ext!(TwoBits, crate::bits::BitsExt<u8>, 2, u8);
bits_ext!(FourBits, crate::bits::BitsExt<u8>, 4, u8);
bits_ext!(SevenBits, crate::bits::BitsExt<u8>, 7, u8);
bits_ext!(LongPacketType, crate::bits::BitsExt<u8>, 2, u8);
bits_ext!(HeaderForm, crate::bits::BitsExt<u8>, 1, u8);

impl LongPacketType {
    pub fn initial() -> Self {
        Self::zero()
    }

    pub fn zero_rtt() -> Self {
        Self::one()
    }

    pub fn handshake() -> Self {
        Self(Bits::from(0b10))
    }

    pub fn retry() -> Self {
        Self(Bits::from(0b11))
    }
}

impl HeaderForm {
    pub fn short() -> Self {
        Self::zero()
    }

    pub fn long() -> Self {
        Self::one()
    }
}
