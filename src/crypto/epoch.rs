/// The four independent encryption levels a connection keeps packet-number
/// spaces and key material for. Ordered the way a handshake progresses
/// through them, which `Ord` below relies on for coalescing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CryptoEpoch {
    Initial,
    Handshake,
    ZeroRtt,
    OneRtt,
}

impl CryptoEpoch {
    pub const ALL: [CryptoEpoch; 4] = [
        CryptoEpoch::Initial,
        CryptoEpoch::ZeroRtt,
        CryptoEpoch::Handshake,
        CryptoEpoch::OneRtt,
    ];

    /// Epochs carry their own packet-number space except 0-RTT and 1-RTT,
    /// which share the application data space.
    pub fn shares_packet_number_space_with(self, other: CryptoEpoch) -> bool {
        use CryptoEpoch::*;
        matches!(
            (self, other),
            (ZeroRtt, OneRtt) | (OneRtt, ZeroRtt) | (ZeroRtt, ZeroRtt) | (OneRtt, OneRtt)
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_rtt_and_one_rtt_share_a_space() {
        assert!(CryptoEpoch::ZeroRtt.shares_packet_number_space_with(CryptoEpoch::OneRtt));
        assert!(!CryptoEpoch::Initial.shares_packet_number_space_with(CryptoEpoch::Handshake));
    }

    #[test]
    fn epochs_order_handshake_progression() {
        assert!(CryptoEpoch::Initial < CryptoEpoch::Handshake);
        assert!(CryptoEpoch::Handshake < CryptoEpoch::ZeroRtt);
        assert!(CryptoEpoch::ZeroRtt < CryptoEpoch::OneRtt);
    }
}
