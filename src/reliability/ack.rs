use std::time::{Duration, Instant};

use crate::packet::frame::{AckFrame, AckRange};

/// Builds outgoing ACK frames from the set of received packet numbers and
/// tracks whether an ACK is currently owed.
#[derive(Debug)]
pub struct AckManager {
    received: Vec<u64>,
    ack_eliciting_since: Option<Instant>,
    max_ack_delay: Duration,
}

impl AckManager {
    pub fn new(max_ack_delay: Duration) -> Self {
        Self {
            received: Vec::new(),
            ack_eliciting_since: None,
            max_ack_delay,
        }
    }

    pub fn on_packet_received(&mut self, packet_number: u64, ack_eliciting: bool) {
        self.received.push(packet_number);
        if ack_eliciting && self.ack_eliciting_since.is_none() {
            self.ack_eliciting_since = Some(Instant::now());
        }
    }

    /// An ACK is owed once an ack-eliciting packet has been waiting longer
    /// than the negotiated max ack delay.
    pub fn ack_owed(&self) -> bool {
        self.ack_eliciting_since
            .is_some_and(|since| since.elapsed() >= self.max_ack_delay)
    }

    /// Build the ACK frame covering every received packet number, collapsing
    /// contiguous runs into ranges via the gap/ack_range_length encoding.
    pub fn build_ack_frame(&mut self, ack_delay_micros: u64) -> Option<AckFrame> {
        if self.received.is_empty() {
            return None;
        }
        let mut sorted = self.received.clone();
        sorted.sort_unstable();
        sorted.dedup();
        sorted.reverse(); // largest first

        let largest_acknowledged = sorted[0];
        let mut first_ack_range = 0u64;
        let mut i = 1;
        while i < sorted.len() && sorted[i - 1] - sorted[i] == 1 {
            first_ack_range += 1;
            i += 1;
        }

        let mut ack_ranges = Vec::new();
        while i < sorted.len() {
            let gap_start = sorted[i - 1];
            let range_largest = sorted[i];
            let gap = gap_start - range_largest - 2;
            let mut ack_range_length = 0u64;
            let mut j = i + 1;
            while j < sorted.len() && sorted[j - 1] - sorted[j] == 1 {
                ack_range_length += 1;
                j += 1;
            }
            ack_ranges.push(AckRange { gap, ack_range_length });
            i = j;
        }

        self.ack_eliciting_since = None;

        Some(AckFrame {
            largest_acknowledged,
            ack_delay: ack_delay_micros,
            first_ack_range,
            ack_ranges,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn no_ack_owed_with_nothing_received() {
        let manager = AckManager::new(Duration::from_millis(25));
        assert!(!manager.ack_owed());
    }

    #[test]
    fn builds_contiguous_ack_frame() {
        let mut manager = AckManager::new(Duration::from_millis(25));
        for pn in [0, 1, 2, 3] {
            manager.on_packet_received(pn, true);
        }
        let ack = manager.build_ack_frame(0).unwrap();
        assert_eq!(ack.largest_acknowledged, 3);
        assert_eq!(ack.first_ack_range, 3);
        assert!(ack.ack_ranges.is_empty());
        assert_eq!(ack.acked_packet_numbers(), vec![3, 2, 1, 0]);
    }

    #[test]
    fn builds_ack_frame_with_gaps() {
        let mut manager = AckManager::new(Duration::from_millis(25));
        for pn in [0, 1, 4, 5, 6] {
            manager.on_packet_received(pn, true);
        }
        let ack = manager.build_ack_frame(0).unwrap();
        assert_eq!(ack.largest_acknowledged, 6);
        assert_eq!(ack.first_ack_range, 2);
        assert_eq!(ack.ack_ranges.len(), 1);
        let mut expected: Vec<u64> = vec![6, 5, 4, 1, 0];
        expected.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(ack.acked_packet_numbers(), expected);
    }
}
