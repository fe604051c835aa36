//! Per-epoch AEAD seal/open, built on `ring::aead`. Each
//! direction gets its own key and IV; the nonce for a given packet is the IV
//! XORed with the packet number in network byte order, as QUIC specifies.

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, NONCE_LEN};

use crate::error::{LocalError, QuicheError, QuicheResult};

const TAG_LEN: usize = 16;

struct DirectionalKey {
    key: LessSafeKey,
    iv: [u8; NONCE_LEN],
}

impl DirectionalKey {
    fn new(key_bytes: &[u8], iv: [u8; NONCE_LEN]) -> Self {
        let unbound = UnboundKey::new(&aead::AES_128_GCM, key_bytes).expect("128-bit AES-GCM key");
        Self {
            key: LessSafeKey::new(unbound),
            iv,
        }
    }

    fn nonce_for(&self, packet_number: u64) -> Nonce {
        let mut nonce_bytes = self.iv;
        let pn_bytes = packet_number.to_be_bytes();
        for (i, byte) in pn_bytes.iter().enumerate() {
            nonce_bytes[NONCE_LEN - pn_bytes.len() + i] ^= byte;
        }
        Nonce::assume_unique_for_key(nonce_bytes)
    }
}

/// One direction's worth of sealing/opening keys for one [`CryptoEpoch`].
///
/// [`CryptoEpoch`]: super::epoch::CryptoEpoch
pub struct PacketKeys {
    seal: DirectionalKey,
    open: DirectionalKey,
}

impl PacketKeys {
    pub fn new(seal_key: &[u8], seal_iv: [u8; NONCE_LEN], open_key: &[u8], open_iv: [u8; NONCE_LEN]) -> Self {
        Self {
            seal: DirectionalKey::new(seal_key, seal_iv),
            open: DirectionalKey::new(open_key, open_iv),
        }
    }

    /// Encrypt `payload` in place, appending the AEAD tag. `header` is the
    /// packet's unprotected header bytes, authenticated but not encrypted.
    pub fn seal(&self, packet_number: u64, header: &[u8], mut payload: Vec<u8>) -> QuicheResult<Vec<u8>> {
        let nonce = self.seal.nonce_for(packet_number);
        self.seal
            .key
            .seal_in_place_append_tag(nonce, Aad::from(header), &mut payload)
            .map_err(|_| QuicheError::Local(LocalError::DecryptionFailure))?;
        Ok(payload)
    }

    /// Decrypt `ciphertext` (header bytes separate, tag included at the
    /// end) in place, returning the plaintext slice with the tag stripped.
    pub fn open<'a>(
        &self,
        packet_number: u64,
        header: &[u8],
        ciphertext: &'a mut [u8],
    ) -> QuicheResult<&'a [u8]> {
        if ciphertext.len() < TAG_LEN {
            return Err(QuicheError::Local(LocalError::DecryptionFailure));
        }
        let nonce = self.open.nonce_for(packet_number);
        let plaintext = self
            .open
            .key
            .open_in_place(nonce, Aad::from(header), ciphertext)
            .map_err(|_| QuicheError::Local(LocalError::DecryptionFailure))?;
        Ok(plaintext)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_keys() -> PacketKeys {
        PacketKeys::new(&[7u8; 16], [1u8; NONCE_LEN], &[7u8; 16], [1u8; NONCE_LEN])
    }

    #[test]
    fn seal_then_open_recovers_plaintext() {
        let keys = test_keys();
        let header = b"quic-header";
        let plaintext = b"hello handshake".to_vec();
        let mut ciphertext = keys.seal(1, header, plaintext.clone()).unwrap();
        let opened = keys.open(1, header, &mut ciphertext).unwrap();
        assert_eq!(opened, &plaintext[..]);
    }

    #[test]
    fn wrong_packet_number_fails_to_open() {
        let keys = test_keys();
        let header = b"quic-header";
        let mut ciphertext = keys.seal(1, header, b"data".to_vec()).unwrap();
        assert!(keys.open(2, header, &mut ciphertext).is_err());
    }

    #[test]
    fn tampered_header_fails_to_open() {
        let keys = test_keys();
        let mut ciphertext = keys.seal(5, b"header-a", b"data".to_vec()).unwrap();
        assert!(keys.open(5, b"header-b", &mut ciphertext).is_err());
    }
}
