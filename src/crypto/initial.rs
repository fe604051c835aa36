//! Epoch key derivation. Initial keys are derived by both endpoints from the
//! client's chosen destination connection ID alone, with no prior secret
//! exchange required. Handshake and 1-RTT keys reuse the same HKDF ladder,
//! keyed from whatever input keying material the session produces in place
//! of a real TLS key exporter (this crate has no TLS stack of its own).

use ring::aead::NONCE_LEN;
use ring::hkdf;

use super::aead::PacketKeys;

// The draft-12-era Initial salt (distinct per QUIC version; this one matches
// this crate's own MINI_QUICHE_VERSION rather than any IETF-assigned value).
const INITIAL_SALT: [u8; 20] = [
    0x9c, 0x10, 0x8f, 0x98, 0x52, 0x0a, 0x5c, 0x5c, 0x32, 0x96, 0x8e, 0x95, 0x0e, 0x8a, 0x2c, 0x5f,
    0xe0, 0x6d, 0x6c, 0x38,
];

const KEY_LEN: usize = 16;

struct OkmLen(usize);
impl hkdf::KeyType for OkmLen {
    fn len(&self) -> usize {
        self.0
    }
}

fn hkdf_expand_label(secret: &hkdf::Prk, label: &[u8], len: usize) -> Vec<u8> {
    // quic_v1 "tls13 " label construction, trimmed to what this codec needs:
    // the derivation context is just the label, no external context octets.
    let mut info = Vec::with_capacity(label.len() + 1);
    info.push(label.len() as u8);
    info.extend_from_slice(label);
    let okm = secret
        .expand(&[&info], OkmLen(len))
        .expect("hkdf expand within ring's output limit");
    let mut out = vec![0u8; len];
    okm.fill(&mut out).expect("fill matches requested length");
    out
}

fn derive_secret(salt: &[u8], ikm: &[u8], label: &[u8]) -> Vec<u8> {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, salt);
    let secret = salt.extract(ikm);
    hkdf_expand_label(&secret, label, 32)
}

/// Derive a pair of complementary `PacketKeys` from arbitrary input keying
/// material, labelling each direction's secret with `client_label` and
/// `server_label`. `is_client` picks which direction this endpoint seals
/// with. Initial keys are the special case where `ikm` is the client's
/// destination connection ID and the salt is the fixed per-version value;
/// callers deriving Handshake or 1-RTT keys pass an empty salt and whatever
/// keying material the session produced.
pub fn derive_keys_with_labels(
    salt: &[u8],
    ikm: &[u8],
    client_label: &[u8],
    server_label: &[u8],
    is_client: bool,
) -> PacketKeys {
    let client_secret_bytes = derive_secret(salt, ikm, client_label);
    let server_secret_bytes = derive_secret(salt, ikm, server_label);

    let client_prk = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]).extract(&client_secret_bytes);
    let server_prk = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]).extract(&server_secret_bytes);

    let client_key = hkdf_expand_label(&client_prk, b"quic key", KEY_LEN);
    let client_iv: [u8; NONCE_LEN] = hkdf_expand_label(&client_prk, b"quic iv", NONCE_LEN)
        .try_into()
        .unwrap();
    let server_key = hkdf_expand_label(&server_prk, b"quic key", KEY_LEN);
    let server_iv: [u8; NONCE_LEN] = hkdf_expand_label(&server_prk, b"quic iv", NONCE_LEN)
        .try_into()
        .unwrap();

    if is_client {
        PacketKeys::new(&client_key, client_iv, &server_key, server_iv)
    } else {
        PacketKeys::new(&server_key, server_iv, &client_key, client_iv)
    }
}

/// Derive the Initial `PacketKeys` for both directions from the client's
/// chosen destination connection ID. `is_client` picks which direction this
/// endpoint seals with.
pub fn initial_keys(client_dst_cid: &[u8], is_client: bool) -> PacketKeys {
    derive_keys_with_labels(&INITIAL_SALT, client_dst_cid, b"client in", b"server in", is_client)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn client_and_server_derive_complementary_keys() {
        let cid = [0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08];
        let client = initial_keys(&cid, true);
        let server = initial_keys(&cid, false);

        let header = b"initial-header";
        let mut ciphertext = client.seal(0, header, b"client hello".to_vec()).unwrap();
        let opened = server.open(0, header, &mut ciphertext).unwrap();
        assert_eq!(opened, b"client hello");
    }

    #[test]
    fn different_connection_ids_derive_different_keys() {
        let a = initial_keys(&[1; 8], true);
        let b = initial_keys(&[2; 8], true);
        let header = b"h";
        let ciphertext_a = a.seal(0, header, b"data".to_vec()).unwrap();
        let mut ciphertext_a_clone = ciphertext_a.clone();
        assert!(b.open(0, header, &mut ciphertext_a_clone).is_err());
    }
}
