use crate::error::{require_with, QuicError, QuicheResult};
use crate::primitives::varint::VarInt;
use crate::stream::flow::FlowControl;
use crate::stream::id::StreamType;
use crate::stream::reassembly::ReassemblyBuffer;

/// Send-side states. Ready is the state before any byte or FIN has been
/// queued; there is no wire frame to emit until it leaves Ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Ready,
    Send,
    DataSent,
    ResetSent,
    DataRecvd,
    ResetRecvd,
}

/// Receive-side states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    Recv,
    SizeKnown,
    DataRecvd,
    ResetRecvd,
    DataRead,
    ResetRead,
}

/// One stream's full state: ID, both halves' state machines, flow control
/// windows, and the reassembly buffer for out-of-order receives.
#[derive(Debug)]
pub struct Stream {
    id: VarInt,
    stream_type: StreamType,

    send_state: SendState,
    send_offset: u64,
    send_buffer: Vec<u8>,
    remote_flow: FlowControl,
    fin_requested: bool,
    fin_sent: bool,

    recv_state: RecvState,
    local_flow: FlowControl,
    reassembly: ReassemblyBuffer,
    received: Vec<u8>,
    final_size: Option<u64>,
}

impl Stream {
    pub fn new(id: VarInt, initial_remote_max: u64, initial_local_max: u64) -> Self {
        Self {
            id,
            stream_type: StreamType::of(id),
            send_state: SendState::Ready,
            send_offset: 0,
            send_buffer: Vec::new(),
            remote_flow: FlowControl::new(initial_remote_max),
            fin_requested: false,
            fin_sent: false,
            recv_state: RecvState::Recv,
            local_flow: FlowControl::new(initial_local_max),
            reassembly: ReassemblyBuffer::new(),
            received: Vec::new(),
            final_size: None,
        }
    }

    pub fn id(&self) -> VarInt {
        self.id
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    pub fn send_state(&self) -> SendState {
        self.send_state
    }

    pub fn recv_state(&self) -> RecvState {
        self.recv_state
    }

    /// Queue application bytes for sending, admitting only as many as the
    /// remote flow control window currently allows; returns the bytes
    /// actually accepted. A sender must never emit past the peer's
    /// advertised `max_stream_data`.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let admit = self.remote_flow.available().min(data.len() as u64) as usize;
        self.send_buffer.extend_from_slice(&data[..admit]);
        if admit > 0 && self.send_state == SendState::Ready {
            self.send_state = SendState::Send;
        }
        admit
    }

    /// Pull off up to `max_len` bytes ready to go out in a STREAM frame,
    /// returning the data, the offset it starts at, and whether this chunk
    /// carries the stream's FIN. The FIN is delivered at most once.
    pub fn drain_send(&mut self, max_len: usize) -> (u64, Vec<u8>, bool) {
        let take = self.send_buffer.len().min(max_len);
        let chunk: Vec<u8> = self.send_buffer.drain(..take).collect();
        let offset = self.send_offset;
        self.send_offset += chunk.len() as u64;
        self.remote_flow.on_data_received(self.send_offset).ok();

        let fin = self.fin_requested && !self.fin_sent && self.send_buffer.is_empty();
        if fin {
            self.fin_sent = true;
            self.send_state = SendState::DataSent;
        }
        (offset, chunk, fin)
    }

    /// Mark that no more application bytes will be written; the FIN goes out
    /// on the next frame that drains the buffer empty.
    pub fn finish(&mut self) {
        self.fin_requested = true;
    }

    pub fn on_send_acked(&mut self, up_to_offset: u64) {
        if self.send_state == SendState::DataSent && up_to_offset >= self.send_offset {
            self.send_state = SendState::DataRecvd;
        }
    }

    pub fn reset_send(&mut self) {
        self.send_state = SendState::ResetSent;
        self.send_buffer.clear();
    }

    /// Apply an inbound STREAM frame's payload at `offset`, buffering any
    /// now-contiguous bytes for [`take_received`](Self::take_received).
    /// Enforces per-stream flow control and the invariant that FIN fixes a
    /// final size no later write may exceed.
    pub fn on_stream_data(&mut self, offset: u64, data: &[u8], fin: bool) -> QuicheResult<()> {
        let end = offset + data.len() as u64;

        if let Some(final_size) = self.final_size {
            require_with(end <= final_size, QuicError::FinalOffsetError)?;
        }
        if fin {
            self.final_size = Some(end);
            if self.recv_state == RecvState::Recv {
                self.recv_state = RecvState::SizeKnown;
            }
        }

        self.local_flow.on_data_received(end)?;
        self.reassembly.insert(offset, data);
        self.received.extend(self.reassembly.take_contiguous());

        if let Some(final_size) = self.final_size {
            if self.reassembly.read_offset() == final_size {
                self.recv_state = RecvState::DataRecvd;
            }
        }

        Ok(())
    }

    /// Drain bytes delivered so far by [`on_stream_data`](Self::on_stream_data).
    pub fn take_received(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.received)
    }

    pub fn on_reset_received(&mut self, final_size: u64) {
        self.final_size = Some(final_size);
        self.recv_state = RecvState::ResetRecvd;
    }

    pub fn mark_data_read(&mut self) {
        if self.recv_state == RecvState::DataRecvd {
            self.recv_state = RecvState::DataRead;
        }
    }

    pub fn local_flow_mut(&mut self) -> &mut FlowControl {
        &mut self.local_flow
    }

    pub fn remote_flow_mut(&mut self) -> &mut FlowControl {
        &mut self.remote_flow
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn client_bidi(id: u64) -> Stream {
        Stream::new(VarInt::new_u64(id).unwrap(), 100, 100)
    }

    #[test]
    fn write_is_admitted_up_to_the_remote_window() {
        let mut s = client_bidi(0);
        let admitted = s.write(&[0u8; 150]);
        assert_eq!(admitted, 100);
        assert_eq!(s.send_state(), SendState::Send);
    }

    #[test]
    fn drain_send_advances_offset_and_moves_to_data_sent_once_empty() {
        let mut s = client_bidi(0);
        s.write(b"hello");
        let (offset, chunk, fin) = s.drain_send(1024);
        assert_eq!(offset, 0);
        assert_eq!(chunk, b"hello");
        assert!(!fin);
        s.finish();
        let (offset, chunk, fin) = s.drain_send(1024);
        assert_eq!(offset, 5);
        assert!(chunk.is_empty());
        assert!(fin);
        assert_eq!(s.send_state(), SendState::DataSent);
    }

    #[test]
    fn out_of_order_receive_delivers_once_contiguous() {
        let mut s = client_bidi(0);
        s.on_stream_data(5, b"world", false).unwrap();
        assert!(s.take_received().is_empty());
        s.on_stream_data(0, b"hello", false).unwrap();
        assert_eq!(s.take_received(), b"helloworld");
    }

    #[test]
    fn fin_past_a_smaller_established_final_size_is_rejected() {
        let mut s = client_bidi(0);
        s.on_stream_data(0, b"hello", true).unwrap();
        assert!(s.on_stream_data(5, b"!", false).is_err());
    }

    #[test]
    fn receiving_through_final_size_marks_data_received() {
        let mut s = client_bidi(0);
        s.on_stream_data(0, b"hello", true).unwrap();
        assert_eq!(s.recv_state(), RecvState::DataRecvd);
    }
}
