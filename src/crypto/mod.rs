pub mod aead;
pub mod epoch;
pub mod initial;
pub mod tls;

pub use aead::PacketKeys;
pub use epoch::CryptoEpoch;
pub use tls::{HandshakeProgress, NullSession, Session};
