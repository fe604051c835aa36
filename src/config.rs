//! Transport configuration, grounded in quinn-proto's `config.rs`: a
//! builder-style struct with `with_*` setters and tuned defaults, split into
//! a connection-facing `TransportConfig` and an endpoint-facing
//! `EndpointConfig`.

use std::time::Duration;

use crate::primitives::varint::VarInt;

/// Parameters governing a single connection's transport behavior.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_idle_timeout: Duration,
    pub initial_rtt: Duration,
    pub packet_threshold: u64,
    pub time_threshold: f64,
    pub max_udp_payload_size: u16,
    pub active_connection_id_limit: u64,
    pub initial_max_data: VarInt,
    pub initial_max_stream_data: VarInt,
    pub initial_max_stream_id_bidi: VarInt,
    pub initial_max_stream_id_uni: VarInt,
}

impl TransportConfig {
    pub fn with_max_idle_timeout(mut self, timeout: Duration) -> Self {
        self.max_idle_timeout = timeout;
        self
    }

    pub fn with_initial_rtt(mut self, rtt: Duration) -> Self {
        self.initial_rtt = rtt;
        self
    }

    pub fn with_max_udp_payload_size(mut self, size: u16) -> Self {
        self.max_udp_payload_size = size;
        self
    }

    pub fn with_initial_max_data(mut self, bytes: u64) -> Self {
        self.initial_max_data = VarInt::new_u64(bytes).unwrap_or(VarInt::MAX);
        self
    }

    pub fn with_initial_max_stream_data(mut self, bytes: u64) -> Self {
        self.initial_max_stream_data = VarInt::new_u64(bytes).unwrap_or(VarInt::MAX);
        self
    }
}

impl Default for TransportConfig {
    // tuned the way quinn documents its defaults: a 100Mbps/100ms link
    fn default() -> Self {
        Self {
            max_idle_timeout: Duration::from_secs(30),
            initial_rtt: Duration::from_millis(333),
            packet_threshold: 3,
            time_threshold: 9.0 / 8.0,
            max_udp_payload_size: 1280, // no PMTUD, so stay below the IPv6 minimum MTU
            active_connection_id_limit: 4,
            initial_max_data: VarInt::new_u32(1_250_000),
            initial_max_stream_data: VarInt::new_u32(625_000),
            initial_max_stream_id_bidi: VarInt::new_u32(100),
            initial_max_stream_id_uni: VarInt::new_u32(100),
        }
    }
}

/// Parameters shared by every connection an endpoint accepts or initiates.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub local_cid_len: u8,
    pub supported_versions: Vec<u32>,
    pub transport: TransportConfig,
}

impl EndpointConfig {
    pub fn with_local_cid_len(mut self, len: u8) -> Self {
        self.local_cid_len = len;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            local_cid_len: 8,
            supported_versions: vec![crate::MINI_QUICHE_VERSION],
            transport: TransportConfig::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transport_config_builders_compose() {
        let cfg = TransportConfig::default()
            .with_max_idle_timeout(Duration::from_secs(10))
            .with_initial_max_data(2_000_000);
        assert_eq!(cfg.max_idle_timeout, Duration::from_secs(10));
        assert_eq!(cfg.initial_max_data.to_inner(), 2_000_000);
    }

    #[test]
    fn endpoint_config_defaults_to_protocol_version() {
        let cfg = EndpointConfig::default();
        assert_eq!(cfg.supported_versions, vec![crate::MINI_QUICHE_VERSION]);
        assert_eq!(cfg.local_cid_len, 8);
    }
}
