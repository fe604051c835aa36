//! The connection state machine: owns a connection's packet-number spaces,
//! crypto epochs, reliability and congestion state, and stream table, and
//! drives them from inbound datagrams and outbound application calls. One
//! `Connection` runs on one logical executor (its own `tokio::task`), per
//! the single-threaded-cooperative-per-connection model.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::net::UdpSocket;

use crate::config::EndpointConfig;
use crate::congestion::CongestionController;
use crate::crypto::initial::derive_keys_with_labels;
use crate::crypto::{CryptoEpoch, HandshakeProgress, PacketKeys, Session};
use crate::error::{require, LocalError, QuicError, QuicheError, QuicheResult};
use crate::packet::frame::{AckFrame, Frame};
use crate::packet::header::{Header, LongHeader, RetryHeader, VersionNegotiationHeader};
use crate::packet::packet::Packet;
use crate::packet::types::ConnectionId;
use crate::pipeline::{self, OutboundGate};
use crate::primitives::pn::PnWidth;
use crate::primitives::varint::VarInt;
use crate::reliability::{AckManager, LossDetector, PacketNumberSpace, RttEstimator};
use crate::stream::{next_local_stream_id, FlowControl, ReassemblyBuffer, RecvState, Stream, StreamIdAllocator, StreamType};
use crate::transport_parameters::TransportParameters;

use super::{ConnectionIdDiscipline, ConnectionState, Role, SpaceId};

/// No QUIC datagram sent from a client before address validation may exceed
/// a server's received bytes by more than 3x; in practice that means the
/// client's first flight must itself be at least this large.
const MIN_CLIENT_INITIAL_SIZE: usize = 1200;

/// A byte delivered to the application from a stream's receive side.
#[derive(Debug, Clone)]
pub struct StreamData {
    pub stream_id: u64,
    pub data: Vec<u8>,
    pub fin: bool,
}

/// A connection between this endpoint and one peer.
pub struct Connection {
    role: Role,
    state: ConnectionState,
    version: u32,
    vn_attempted: bool,
    supported_versions: Vec<u32>,

    local_cid: ConnectionId,
    remote_cid: ConnectionId,
    cid_discipline: ConnectionIdDiscipline,
    retry_token: Option<Vec<u8>>,

    config: crate::config::TransportConfig,
    peer_transport_parameters: Option<TransportParameters>,

    session: Box<dyn Session>,
    initial_keys: PacketKeys,
    handshake_keys: Option<PacketKeys>,
    one_rtt_keys: Option<PacketKeys>,

    spaces: [PacketNumberSpace; 3],
    ack_managers: [AckManager; 3],
    loss_detectors: [LossDetector; 3],
    rtt: RttEstimator,
    congestion: CongestionController,

    stream_allocator: StreamIdAllocator,
    streams: HashMap<u64, Stream>,
    connection_send_flow: FlowControl,
    connection_recv_flow: FlowControl,

    crypto_send_offset: [u64; 3],
    crypto_recv: [ReassemblyBuffer; 3],

    socket: UdpSocket,
    peer_addr: SocketAddr,
    last_activity: Instant,
}

fn random_connection_id(len: u8) -> ConnectionId {
    let mut bytes = vec![0u8; len as usize];
    rand::thread_rng().fill_bytes(&mut bytes);
    ConnectionId::new(len, bytes)
}

impl Connection {
    /// Open a client connection: bind a socket, pick connection IDs, and
    /// send the first flight.
    pub async fn connect(
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        endpoint_config: EndpointConfig,
        session: Box<dyn Session>,
    ) -> QuicheResult<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        socket.connect(peer_addr).await?;

        let local_cid = random_connection_id(endpoint_config.local_cid_len);
        // The destination CID a client sends its first Initial to is itself
        // chosen at random (there is no peer CID to echo yet); Initial keys
        // are derived from this value on both sides.
        let remote_cid = random_connection_id(8);
        let version = endpoint_config.supported_versions[0];
        let initial_keys = crate::crypto::initial::initial_keys(&remote_cid.cid, true);
        let transport = endpoint_config.transport.clone();

        let mut conn = Self {
            role: Role::Client,
            state: ConnectionState::Initial,
            version,
            vn_attempted: false,
            supported_versions: endpoint_config.supported_versions.clone(),
            local_cid,
            remote_cid,
            cid_discipline: ConnectionIdDiscipline::default(),
            retry_token: None,
            connection_recv_flow: FlowControl::new(transport.initial_max_data.to_inner()),
            config: transport,
            peer_transport_parameters: None,
            session,
            initial_keys,
            handshake_keys: None,
            one_rtt_keys: None,
            spaces: std::array::from_fn(|_| PacketNumberSpace::new()),
            ack_managers: std::array::from_fn(|_| AckManager::new(Duration::from_millis(25))),
            loss_detectors: std::array::from_fn(|_| LossDetector::new()),
            rtt: RttEstimator::new(endpoint_config.transport.initial_rtt),
            congestion: CongestionController::new(),
            stream_allocator: StreamIdAllocator::new(),
            streams: HashMap::new(),
            connection_send_flow: FlowControl::new(0),
            crypto_send_offset: [0; 3],
            crypto_recv: std::array::from_fn(|_| ReassemblyBuffer::new()),
            socket,
            peer_addr,
            last_activity: Instant::now(),
        };

        conn.send_client_initial().await?;
        Ok(conn)
    }

    /// Accept a server-side connection from a client's first Initial
    /// datagram. `socket` must already be connected to `peer_addr` (UDP
    /// "connect" just fixes the default peer for an already-bound socket,
    /// so a listener can hand off its own socket here without rebinding).
    /// `client_dst_cid`/`client_src_cid` come from peeking that datagram's
    /// header before this call. This demo endpoint serves one peer per
    /// bound socket; it does not demultiplex multiple connections off a
    /// single shared socket by connection ID the way a production listener
    /// would.
    pub async fn accept(
        socket: UdpSocket,
        peer_addr: SocketAddr,
        endpoint_config: EndpointConfig,
        session: Box<dyn Session>,
        client_dst_cid: &[u8],
        client_src_cid: ConnectionId,
        first_datagram: Vec<u8>,
    ) -> QuicheResult<Self> {
        let local_cid = random_connection_id(endpoint_config.local_cid_len);
        let version = endpoint_config.supported_versions[0];
        let initial_keys = crate::crypto::initial::initial_keys(client_dst_cid, false);
        let transport = endpoint_config.transport.clone();

        let mut conn = Self {
            role: Role::Server,
            state: ConnectionState::WaitingHandshake,
            version,
            vn_attempted: true,
            supported_versions: endpoint_config.supported_versions.clone(),
            local_cid,
            remote_cid: client_src_cid,
            cid_discipline: ConnectionIdDiscipline::default(),
            retry_token: None,
            connection_recv_flow: FlowControl::new(transport.initial_max_data.to_inner()),
            config: transport,
            peer_transport_parameters: None,
            session,
            initial_keys,
            handshake_keys: None,
            one_rtt_keys: None,
            spaces: std::array::from_fn(|_| PacketNumberSpace::new()),
            ack_managers: std::array::from_fn(|_| AckManager::new(Duration::from_millis(25))),
            loss_detectors: std::array::from_fn(|_| LossDetector::new()),
            rtt: RttEstimator::new(endpoint_config.transport.initial_rtt),
            congestion: CongestionController::new(),
            stream_allocator: StreamIdAllocator::new(),
            streams: HashMap::new(),
            connection_send_flow: FlowControl::new(0),
            crypto_send_offset: [0; 3],
            crypto_recv: std::array::from_fn(|_| ReassemblyBuffer::new()),
            socket,
            peer_addr,
            last_activity: Instant::now(),
        };

        conn.on_datagram(first_datagram).await?;
        Ok(conn)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_draining(&self) -> bool {
        matches!(self.state, ConnectionState::Draining | ConnectionState::Closed)
    }

    pub fn is_established(&self) -> bool {
        self.state == ConnectionState::Installed
    }

    async fn send_client_initial(&mut self) -> QuicheResult<()> {
        let progress = self.session.initiate()?;
        self.state = ConnectionState::WaitingHandshake;
        self.send_crypto_and_pad(CryptoEpoch::Initial, progress.outgoing).await
    }

    /// Encode a CRYPTO frame carrying `data` at this epoch's send offset,
    /// padding the datagram to the client's anti-amplification floor if
    /// this is an Initial-epoch packet.
    async fn send_crypto_and_pad(&mut self, epoch: CryptoEpoch, data: Vec<u8>) -> QuicheResult<()> {
        let offset = self.crypto_send_offset[SpaceId::of(epoch).index()];
        self.crypto_send_offset[SpaceId::of(epoch).index()] += data.len() as u64;
        let frame = Frame::Crypto {
            offset: VarInt::new_u64(offset).unwrap_or(VarInt::MAX),
            data,
        };
        let pad_to = if epoch == CryptoEpoch::Initial && self.role == Role::Client {
            MIN_CLIENT_INITIAL_SIZE
        } else {
            0
        };
        self.send_frames(epoch, vec![frame], pad_to).await
    }

    fn keys_for(&self, epoch: CryptoEpoch) -> Option<&PacketKeys> {
        match epoch {
            CryptoEpoch::Initial => Some(&self.initial_keys),
            CryptoEpoch::Handshake => self.handshake_keys.as_ref(),
            CryptoEpoch::ZeroRtt => None,
            CryptoEpoch::OneRtt => self.one_rtt_keys.as_ref(),
        }
    }

    fn build_header(&self, epoch: CryptoEpoch, pn: u64, pn_width: PnWidth, plaintext_len: usize) -> Header {
        match epoch {
            CryptoEpoch::Initial => Header::Initial(LongHeader::initial(
                self.version,
                self.remote_cid.clone(),
                self.local_cid.clone(),
                pn_width,
                VarInt::new_u32((pn_width.bytes() + plaintext_len + 16) as u32),
                pn,
            )),
            CryptoEpoch::Handshake => Header::Handshake(LongHeader::new(
                crate::packet::types::LongPacketType::handshake(),
                pn_width,
                self.version,
                self.remote_cid.clone(),
                self.local_cid.clone(),
                VarInt::new_u32((pn_width.bytes() + plaintext_len + 16) as u32),
                pn,
            )),
            CryptoEpoch::ZeroRtt => Header::ZeroRtt(LongHeader::new(
                crate::packet::types::LongPacketType::zero_rtt(),
                pn_width,
                self.version,
                self.remote_cid.clone(),
                self.local_cid.clone(),
                VarInt::new_u32((pn_width.bytes() + plaintext_len + 16) as u32),
                pn,
            )),
            CryptoEpoch::OneRtt => Header::Short(crate::packet::header::ShortHeader::new(
                crate::packet::types::SingleBit::zero(),
                crate::packet::types::SingleBit::zero(),
                pn_width,
                self.remote_cid.clone(),
                pn,
            )),
        }
    }

    /// Seal `frames` into one packet at `epoch` and send it, padding the
    /// resulting datagram up to `pad_to` bytes with PADDING frames.
    async fn send_frames(&mut self, epoch: CryptoEpoch, mut frames: Vec<Frame>, pad_to: usize) -> QuicheResult<()> {
        let keys = self
            .keys_for(epoch)
            .ok_or_else(|| QuicheError::other("no keys installed for epoch"))?;

        let space = SpaceId::of(epoch).index();
        let pn = self.spaces[space].allocate_send();
        let pn_width = pipeline::pn_width_for_next(pn, self.spaces[space].largest_acked_by_peer());

        let mut plaintext = Vec::new();
        for frame in &frames {
            frame.encode(&mut plaintext);
        }
        let ack_eliciting = frames.iter().any(Frame::is_ack_eliciting);

        let header = self.build_header(epoch, pn, pn_width, plaintext.len());
        let sealed = pipeline::seal_payload(keys, pn, &header, plaintext)?;

        let mut datagram = header.encode()?;
        datagram.extend(sealed);
        while datagram.len() < pad_to {
            frames.push(Frame::Padding);
            datagram.push(0);
        }

        self.loss_detectors[space].on_packet_sent(pn, datagram.len(), ack_eliciting);
        if ack_eliciting {
            self.congestion.on_packet_sent(datagram.len());
        }

        tracing::trace!(epoch = ?epoch, pn, len = datagram.len(), "sending packet");
        self.socket.send(&datagram).await?;
        Ok(())
    }

    /// Receive one datagram from the socket this connection owns.
    pub async fn recv_datagram(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.socket.recv(buf).await
    }

    /// Drain every stream that has newly delivered bytes since the last
    /// call, reporting whether each drained chunk reaches that stream's FIN.
    pub fn drain_readable(&mut self) -> Vec<StreamData> {
        let mut out = Vec::new();
        for (&stream_id, stream) in self.streams.iter_mut() {
            let data = stream.take_received();
            let fin = stream.recv_state() == RecvState::DataRecvd;
            if data.is_empty() && !fin {
                continue;
            }
            if fin {
                stream.mark_data_read();
            }
            out.push(StreamData { stream_id, data, fin });
        }
        out
    }

    /// Process one inbound datagram, dispatching every coalesced packet it
    /// contains in turn.
    pub async fn on_datagram(&mut self, mut bytes: Vec<u8>) -> QuicheResult<()> {
        self.last_activity = Instant::now();
        let local_cid_len = self.local_cid.cid_len as usize;
        let packets = Packet::decode_coalesced(&mut bytes, local_cid_len)?;
        for packet in packets {
            if let Err(err) = self.on_packet(packet).await {
                match &err {
                    QuicheError::Local(LocalError::IgnorePacket | LocalError::DecryptionFailure) => {
                        tracing::debug!(?err, "dropping packet");
                    }
                    _ => return Err(err),
                }
            }
        }
        Ok(())
    }

    async fn on_packet(&mut self, packet: Packet) -> QuicheResult<()> {
        match &packet.header {
            Header::VersionNegotiation(vn) => self.on_version_negotiation(vn.clone()).await,
            Header::Retry(retry) => self.on_retry(retry.clone()).await,
            _ => self.on_protected_packet(packet).await,
        }
    }

    async fn on_version_negotiation(&mut self, vn: VersionNegotiationHeader) -> QuicheResult<()> {
        if self.vn_attempted {
            return Err(QuicheError::Local(LocalError::IgnorePacket));
        }
        if vn.supported_versions.contains(&self.version) {
            return Err(QuicheError::Local(LocalError::IgnorePacket));
        }
        let chosen = self
            .supported_versions
            .iter()
            .filter(|v| vn.supported_versions.contains(v))
            .max()
            .copied();
        let chosen = match chosen {
            Some(v) => v,
            None => return Err(QuicheError::Quic(QuicError::VersionNegotiationError)),
        };

        self.vn_attempted = true;
        self.version = chosen;
        self.spaces = std::array::from_fn(|_| PacketNumberSpace::new());
        self.state = ConnectionState::Initial;
        self.send_client_initial().await
    }

    async fn on_retry(&mut self, retry: RetryHeader) -> QuicheResult<()> {
        if !self.cid_discipline.can_replace_on_retry() {
            return Err(QuicheError::Local(LocalError::IgnorePacket));
        }
        self.cid_discipline.record_retry_replacement();
        self.remote_cid = retry.src_cid.clone();
        self.initial_keys = crate::crypto::initial::initial_keys(&self.remote_cid.cid, true);
        self.retry_token = Some(retry.retry_token);
        self.send_client_initial().await
    }

    async fn on_protected_packet(&mut self, packet: Packet) -> QuicheResult<()> {
        let epoch = match &packet.header {
            Header::Initial(_) => CryptoEpoch::Initial,
            Header::ZeroRtt(_) => CryptoEpoch::ZeroRtt,
            Header::Handshake(_) => {
                if self.cid_discipline.can_replace_on_handshake() {
                    if let Some(src) = packet.header.src_cid() {
                        self.cid_discipline.record_handshake_replacement();
                        self.remote_cid = src.clone();
                    }
                } else if packet.header.src_cid() != Some(&self.remote_cid) {
                    return Err(QuicheError::Local(LocalError::IgnorePacket));
                }
                CryptoEpoch::Handshake
            }
            Header::Short(_) => CryptoEpoch::OneRtt,
            Header::Retry(_) | Header::VersionNegotiation(_) => unreachable!("handled by caller"),
        };

        let keys = self
            .keys_for(epoch)
            .ok_or(QuicheError::Local(LocalError::DecryptionFailure))?;
        let space = SpaceId::of(epoch).index();
        let pn = pipeline::recover_packet_number(&packet.header, self.spaces[space].largest_received())?;

        if self.spaces[space].has_received(pn) {
            return Err(QuicheError::Local(LocalError::IgnorePacket));
        }

        let plaintext = pipeline::open_payload(keys, pn, &packet.header, &packet.payload)?;
        let frames = pipeline::parse_frames(&plaintext)?;

        self.spaces[space].record_received(pn);
        let ack_eliciting = frames.iter().any(Frame::is_ack_eliciting);
        self.ack_managers[space].on_packet_received(pn, ack_eliciting);

        for frame in frames {
            self.on_frame(epoch, frame).await?;
        }
        Ok(())
    }

    async fn on_frame(&mut self, epoch: CryptoEpoch, frame: Frame) -> QuicheResult<()> {
        match frame {
            Frame::Padding | Frame::Ping => {}
            Frame::Ack(ack) => self.on_ack(epoch, ack).await?,
            Frame::Crypto { offset, data } => self.on_crypto(epoch, offset.to_inner(), data).await?,
            Frame::Stream {
                stream_id,
                offset,
                fin,
                data,
            } => self.on_stream_frame(stream_id.to_inner(), offset.to_inner(), fin, data)?,
            Frame::MaxData { maximum_data } => {
                self.connection_send_flow.raise_max(maximum_data.to_inner());
            }
            Frame::MaxStreamData {
                stream_id,
                maximum_stream_data,
            } => {
                if let Some(stream) = self.streams.get_mut(&stream_id.to_inner()) {
                    stream.remote_flow_mut().raise_max(maximum_stream_data.to_inner());
                }
            }
            Frame::MaxStreamId { .. } | Frame::Blocked { .. } | Frame::StreamBlocked { .. } | Frame::StreamIdBlocked { .. } => {
                // advisory only; this crate has no send-side backpressure signal to raise in response
            }
            Frame::RstStream {
                stream_id,
                final_size,
                ..
            } => {
                if let Some(stream) = self.streams.get_mut(&stream_id.to_inner()) {
                    stream.on_reset_received(final_size.to_inner());
                }
            }
            Frame::StopSending { stream_id, .. } => {
                if let Some(stream) = self.streams.get_mut(&stream_id.to_inner()) {
                    stream.reset_send();
                }
            }
            Frame::NewConnectionId { .. } => {
                // a single-path, single-local-CID connection has no use for spare peer CIDs yet
            }
            Frame::PathChallenge { data } => {
                self.send_frames(epoch, vec![Frame::PathResponse { data }], 0).await?;
            }
            Frame::PathResponse { .. } => {}
            Frame::ConnectionClose { error_code, .. } => {
                let reason = QuicError::from_code(error_code.to_inner());
                if reason.is_fatal() {
                    tracing::warn!(code = error_code.to_inner(), ?reason, "peer closed connection");
                } else {
                    tracing::info!(code = error_code.to_inner(), ?reason, "peer closed connection");
                }
                self.state = ConnectionState::Draining;
            }
            Frame::ApplicationClose { error_code, .. } => {
                tracing::info!(code = error_code.to_inner(), "peer closed connection (application)");
                self.state = ConnectionState::Draining;
            }
        }
        Ok(())
    }

    async fn on_ack(&mut self, epoch: CryptoEpoch, ack: AckFrame) -> QuicheResult<()> {
        let space = SpaceId::of(epoch).index();
        let acked_pns = ack.acked_packet_numbers();
        self.spaces[space].on_peer_ack(&acked_pns);

        let acked = self.loss_detectors[space].on_ack_received_with_times(&acked_pns);
        if acked.is_empty() {
            return Ok(());
        }
        if let Some((_, sent_at)) = acked.iter().max_by_key(|(_, t)| *t) {
            let sample = sent_at.elapsed();
            self.rtt.update(sample, Duration::from_micros(ack.ack_delay));
        }

        let total_acked: usize = acked.iter().map(|(size, _)| size).sum();
        let sent_times: Vec<Instant> = acked.iter().map(|(_, t)| *t).collect();
        self.congestion.on_packets_acked(total_acked, &sent_times);

        if let Some(largest) = self.spaces[space].largest_acked_by_peer() {
            let losses = self.loss_detectors[space].detect_losses(largest, &self.rtt);
            if !losses.is_empty() {
                self.congestion.on_packets_lost(Instant::now());
            }
        }

        for stream in self.streams.values_mut() {
            stream.on_send_acked(ack.largest_acknowledged);
        }
        Ok(())
    }

    async fn on_crypto(&mut self, epoch: CryptoEpoch, offset: u64, data: Vec<u8>) -> QuicheResult<()> {
        let space = SpaceId::of(epoch).index();
        self.crypto_recv[space].insert(offset, &data);
        let contiguous = self.crypto_recv[space].take_contiguous();
        if contiguous.is_empty() {
            return Ok(());
        }
        let progress = self.session.recv_handshake_data(epoch, &contiguous)?;
        self.apply_handshake_progress(epoch, progress).await
    }

    async fn apply_handshake_progress(&mut self, epoch: CryptoEpoch, progress: HandshakeProgress) -> QuicheResult<()> {
        if let Some(new_epoch) = progress.keys_updated {
            self.install_keys(new_epoch);
        }
        if !progress.outgoing.is_empty() {
            let send_epoch = progress.keys_updated.unwrap_or(epoch);
            self.send_crypto_and_pad(send_epoch, progress.outgoing).await?;
        }
        if progress.handshake_complete {
            self.state = ConnectionState::Installed;
            if self.one_rtt_keys.is_none() {
                self.install_keys(CryptoEpoch::OneRtt);
            }
            tracing::info!("handshake complete");
        }
        Ok(())
    }

    /// Install keys for an epoch that isn't Initial. This crate carries no
    /// TLS key schedule, so the input keying material is a stand-in: both
    /// peers derive it from their connection IDs in a role-independent
    /// order, which only holds the wire format together well enough to
    /// exercise the rest of the transport and is not a substitute for a real
    /// exporter secret.
    fn install_keys(&mut self, epoch: CryptoEpoch) {
        let mut ikm = [self.local_cid.cid.clone(), self.remote_cid.cid.clone()];
        ikm.sort();
        let ikm = ikm.concat();
        let is_client = self.role == Role::Client;
        let keys = match epoch {
            CryptoEpoch::Handshake => {
                derive_keys_with_labels(&[], &ikm, b"handshake client", b"handshake server", is_client)
            }
            CryptoEpoch::OneRtt => derive_keys_with_labels(&[], &ikm, b"app client", b"app server", is_client),
            CryptoEpoch::Initial | CryptoEpoch::ZeroRtt => return,
        };
        match epoch {
            CryptoEpoch::Handshake => self.handshake_keys = Some(keys),
            CryptoEpoch::OneRtt => self.one_rtt_keys = Some(keys),
            _ => {}
        }
    }

    fn get_or_create_stream(&mut self, stream_id: u64) -> QuicheResult<&mut Stream> {
        if !self.streams.contains_key(&stream_id) {
            let id = VarInt::new_u64(stream_id)?;
            let stream = Stream::new(
                id,
                self.config.initial_max_stream_data.to_inner(),
                self.config.initial_max_stream_data.to_inner(),
            );
            self.streams.insert(stream_id, stream);
        }
        Ok(self.streams.get_mut(&stream_id).unwrap())
    }

    fn on_stream_frame(&mut self, stream_id: u64, offset: u64, fin: bool, data: Vec<u8>) -> QuicheResult<()> {
        let end = offset + data.len() as u64;
        self.connection_recv_flow.on_data_received(end)?;
        let stream = self.get_or_create_stream(stream_id)?;
        stream.on_stream_data(offset, &data, fin)
    }

    /// Open a new locally-initiated stream and return its ID.
    pub fn open_stream(&mut self, ty: StreamType) -> u64 {
        let id = next_local_stream_id(&mut self.stream_allocator, ty);
        self.streams.insert(
            id.to_inner(),
            Stream::new(id, self.config.initial_max_stream_data.to_inner(), self.config.initial_max_stream_data.to_inner()),
        );
        id.to_inner()
    }

    /// Queue application bytes to write on `stream_id`, returning the number
    /// of bytes actually admitted by flow control.
    pub fn write_stream(&mut self, stream_id: u64, data: &[u8]) -> QuicheResult<usize> {
        require(self.streams.contains_key(&stream_id), "write to unknown stream")?;
        Ok(self.streams.get_mut(&stream_id).unwrap().write(data))
    }

    pub fn finish_stream(&mut self, stream_id: u64) -> QuicheResult<()> {
        require(self.streams.contains_key(&stream_id), "finish unknown stream")?;
        self.streams.get_mut(&stream_id).unwrap().finish();
        Ok(())
    }

    /// Drain any bytes delivered so far on `stream_id`.
    pub fn read_stream(&mut self, stream_id: u64) -> Vec<u8> {
        self.streams
            .get_mut(&stream_id)
            .map(|s| s.take_received())
            .unwrap_or_default()
    }

    /// Flush every stream's pending send buffer into STREAM frames, gated by
    /// MTU, the congestion window, and each stream's flow-control window,
    /// and hand the resulting datagram(s) to the socket.
    pub async fn flush_streams(&mut self) -> QuicheResult<()> {
        if self.one_rtt_keys.is_none() {
            return Ok(());
        }
        let gate = OutboundGate::new(self.config.max_udp_payload_size as usize);
        let mut frames = Vec::new();
        let mut built_len = 0usize;

        let stream_ids: Vec<u64> = self.streams.keys().copied().collect();
        for stream_id in stream_ids {
            if !self.congestion.is_congestion_window_available(built_len) {
                break;
            }
            let stream = self.streams.get_mut(&stream_id).unwrap();
            let (offset, chunk, fin) = stream.drain_send(1024);
            if chunk.is_empty() && !fin {
                continue;
            }
            let frame = Frame::Stream {
                stream_id: VarInt::new_u64(stream_id).unwrap_or(VarInt::MAX),
                offset: VarInt::new_u64(offset).unwrap_or(VarInt::MAX),
                fin,
                data: chunk,
            };
            let mut encoded = Vec::new();
            frame.encode(&mut encoded);
            if !gate.fits_in_datagram(built_len, encoded.len()) {
                break;
            }
            built_len += encoded.len();
            frames.push(frame);
        }

        if frames.is_empty() {
            return Ok(());
        }
        self.send_frames(CryptoEpoch::OneRtt, frames, 0).await
    }

    /// Send any owed ACK for every packet-number space that has one.
    pub async fn flush_acks(&mut self) -> QuicheResult<()> {
        for epoch in [CryptoEpoch::Initial, CryptoEpoch::Handshake, CryptoEpoch::OneRtt] {
            let space = SpaceId::of(epoch).index();
            if !self.ack_managers[space].ack_owed() {
                continue;
            }
            if self.keys_for(epoch).is_none() {
                continue;
            }
            if let Some(ack) = self.ack_managers[space].build_ack_frame(0) {
                self.send_frames(epoch, vec![Frame::Ack(ack)], 0).await?;
            }
        }
        Ok(())
    }

    pub fn idle_timeout_expired(&self) -> bool {
        self.last_activity.elapsed() >= self.config.max_idle_timeout
    }

    /// Close the connection locally, sending a CONNECTION_CLOSE and entering
    /// the draining state. The draining period's teardown is left to the
    /// caller's own timer (the connection just stops being driven after it).
    pub async fn close(&mut self, error_code: QuicError, reason: &[u8]) -> QuicheResult<()> {
        if self.is_draining() {
            return Ok(());
        }
        let epoch = if self.one_rtt_keys.is_some() {
            CryptoEpoch::OneRtt
        } else if self.handshake_keys.is_some() {
            CryptoEpoch::Handshake
        } else {
            CryptoEpoch::Initial
        };
        let frame = Frame::ConnectionClose {
            error_code: VarInt::new_u64(error_code.code()).unwrap_or(VarInt::MAX),
            frame_type: VarInt::zero(),
            reason: reason.to_vec(),
        };
        let result = self.send_frames(epoch, vec![frame], 0).await;
        self.state = ConnectionState::Draining;
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn connection_id_discipline_allows_one_retry_then_one_handshake_replacement() {
        let mut discipline = ConnectionIdDiscipline::default();
        assert!(discipline.can_replace_on_retry());
        discipline.record_retry_replacement();
        assert!(!discipline.can_replace_on_retry());
        assert!(discipline.can_replace_on_handshake());
        discipline.record_handshake_replacement();
        assert!(!discipline.can_replace_on_handshake());
    }

    #[test]
    fn random_connection_ids_have_the_requested_length() {
        let cid = random_connection_id(8);
        assert_eq!(cid.cid_len, 8);
        assert_eq!(cid.cid.len(), 8);
    }

    #[tokio::test]
    async fn accept_installs_one_rtt_keys_from_a_clients_first_datagram() {
        let server_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_socket.local_addr().unwrap();

        let client = Connection::connect(
            "127.0.0.1:0".parse().unwrap(),
            server_addr,
            EndpointConfig::default(),
            Box::new(crate::crypto::NullSession::default()),
        )
        .await
        .unwrap();
        assert_eq!(client.role(), Role::Client);
        assert!(!client.is_established());

        let mut buf = vec![0u8; 65535];
        let (n, peer_addr) = server_socket.recv_from(&mut buf).await.unwrap();
        buf.truncate(n);

        let mut peek = buf.clone();
        let header = Header::decode(&mut peek, 8).unwrap();
        let (client_dst_cid, client_src_cid) = match header {
            Header::Initial(h) => (h.dst_cid.cid, h.src_cid),
            _ => panic!("expected an Initial header"),
        };

        server_socket.connect(peer_addr).await.unwrap();
        let server = Connection::accept(
            server_socket,
            peer_addr,
            EndpointConfig::default(),
            Box::new(crate::crypto::NullSession::default()),
            &client_dst_cid,
            client_src_cid,
            buf,
        )
        .await
        .unwrap();

        assert_eq!(server.role(), Role::Server);
        assert!(server.is_established());
    }

    #[tokio::test]
    async fn drain_readable_reports_new_bytes_and_fin_once() {
        // a throwaway bound socket just to get a real, reachable port to
        // connect() to; nothing needs to be listening on it.
        let dummy_peer = UdpSocket::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let mut conn = Connection::connect(
            "127.0.0.1:0".parse().unwrap(),
            dummy_peer,
            EndpointConfig::default(),
            Box::new(crate::crypto::NullSession::default()),
        )
        .await
        .unwrap();

        conn.on_stream_frame(7, 0, true, vec![1, 2, 3]).unwrap();

        let drained = conn.drain_readable();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].stream_id, 7);
        assert_eq!(drained[0].data, vec![1, 2, 3]);
        assert!(drained[0].fin);

        assert!(conn.drain_readable().is_empty());
    }
}
